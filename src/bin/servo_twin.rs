use std::io::{self, BufRead, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use servo_link::cli::LinkArgs;
use servo_link::discovery::{format_port_list, list_ports};
use servo_link::logging::init_logger;
use servo_link::twin::{
    drain_input, render_frame, ConnectionStatus, SharedTwin, TwinInput, TwinState, FRAME_RATE,
    STEP_SIZE,
};
use servo_link::worker::LinkWorker;
use servo_link::ServoLink;
use structopt::StructOpt;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::info;

#[derive(StructOpt)]
#[structopt(name = "servo-twin", about = "Servo motor digital twin")]
struct Args {
    #[structopt(flatten)]
    link: LinkArgs,
}

/// Stdin is read on a plain thread so a pending read never holds up shutdown.
fn spawn_input_reader() -> mpsc::UnboundedReceiver<TwinInput> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };
            match TwinInput::parse(&line) {
                Some(input) => {
                    if tx.send(input).is_err() {
                        break;
                    }
                }
                None => println!("\nUnknown input {:?}", line.trim()),
            }
        }
    });
    rx
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    init_logger(args.link.verbose, "info");

    if args.link.list_ports {
        println!("{}", format_port_list(&list_ports()));
        return Ok(());
    }

    println!("Starting Servo Digital Twin");
    println!(
        "Controls: + / - (or up, down, left, right) move {} degrees, \"scroll <n>\" moves n steps, a number sets the angle, q quits",
        STEP_SIZE
    );

    let config = args.link.link_config();
    let port = args.link.resolve_port();
    match &port {
        Some(port) => println!("Using port: {}", port),
        None => println!("Running in simulation mode (no controller connection)"),
    }

    let mut link = ServoLink::new(port, config.clone());
    let status = if link.is_simulated() {
        ConnectionStatus::Simulation
    } else {
        match link.connect().await {
            Ok(()) => ConnectionStatus::Connected,
            Err(err) => {
                println!("Failed to connect to controller: {}", err);
                println!("Running in simulation mode");
                link = ServoLink::new(None, config);
                ConnectionStatus::Simulation
            }
        }
    };

    let twin = SharedTwin::new(TwinState::new(status));
    let running = Arc::new(AtomicBool::new(true));
    let (commands, command_receiver) = mpsc::unbounded_channel();
    let worker = tokio::spawn(
        LinkWorker::new(link, twin.clone(), command_receiver, running.clone()).run(),
    );

    let interrupt = running.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down");
            interrupt.store(false, Ordering::SeqCst);
        }
    });

    let mut inputs = Some(spawn_input_reader());
    let mut frames = interval(Duration::from_secs_f64(1.0 / FRAME_RATE as f64));
    let mut last_frame = String::new();
    while running.load(Ordering::SeqCst) {
        frames.tick().await;
        if let Some(receiver) = inputs.as_mut() {
            let input = drain_input(receiver, &twin);
            for angle in input.targets {
                // worker only goes away once shutdown started
                let _ = commands.send(angle);
            }
            if input.quit {
                running.store(false, Ordering::SeqCst);
            }
            if input.closed {
                info!("input closed, running until interrupted");
                inputs = None;
            }
        }

        let state = twin.advance();
        let frame = render_frame(&state);
        if frame != last_frame {
            print!("\r{}", frame);
            io::stdout().flush()?;
            last_frame = frame;
        }
    }

    running.store(false, Ordering::SeqCst);
    drop(commands);
    worker.await?;
    println!("\nDigital twin terminated");
    Ok(())
}
