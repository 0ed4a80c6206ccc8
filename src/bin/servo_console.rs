use std::io::{self, Write};

use servo_link::cli::LinkArgs;
use servo_link::console::{
    parse_exact_angle, render_menu, rotate_left, rotate_right, AngleInputError, MenuChoice,
    Rotation, COMMAND_SETTLE, ROTATE_STEP,
};
use servo_link::discovery::{format_port_list, list_ports};
use servo_link::logging::init_logger;
use servo_link::{Angle, ServoLink, StatusLine};
use structopt::StructOpt;
use tokio::time::sleep;

#[derive(StructOpt)]
#[structopt(name = "servo-console", about = "Servo motor controller")]
struct Args {
    #[structopt(flatten)]
    link: LinkArgs,
}

fn prompt(text: &str) -> io::Result<Option<String>> {
    print!("{}", text);
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

fn is_local(link: &ServoLink) -> bool {
    link.is_simulated() || link.has_given_up()
}

/// Simulated links, and links that gave up reconnecting, accept every
/// angle locally.
async fn send(link: &mut ServoLink, angle: Angle) -> bool {
    if is_local(link) {
        return true;
    }
    match link.send(angle.degrees() as i64).await {
        Ok(_) => true,
        Err(err) if link.has_given_up() => {
            println!("Error sending command: {}", err);
            println!("Running in simulation mode.");
            true
        }
        Err(err) => {
            println!("Error sending command: {}", err);
            false
        }
    }
}

fn link_status(link: &ServoLink) -> String {
    if is_local(link) {
        "Simulation".to_owned()
    } else {
        link.state().to_string()
    }
}

fn latest_report(link: &mut ServoLink) -> Option<Angle> {
    let mut latest = None;
    loop {
        match link.poll_incoming() {
            Ok(Some(StatusLine::Ack(angle))) => latest = Some(angle),
            Ok(Some(_)) => {}
            Ok(None) => return latest,
            Err(err) => {
                println!("Error reading status: {}", err);
                return latest;
            }
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    init_logger(args.link.verbose, "warn");

    if args.link.list_ports {
        println!("{}", format_port_list(&list_ports()));
        return Ok(());
    }

    let config = args.link.link_config();
    let port = args.link.resolve_port();
    if port.is_none() {
        println!("No controller port specified or detected. Running in simulation mode.");
    }
    let mut link = ServoLink::new(port, config.clone());
    if let Some(port) = link.port().map(str::to_owned) {
        match link.connect().await {
            Ok(()) => println!("Connected to controller on {}", port),
            Err(err) => {
                println!("Failed to connect to controller: {}", err);
                println!("Running in simulation mode.");
                link = ServoLink::new(None, config);
            }
        }
    }

    let mut position = Angle::CENTER;
    println!("Initial position: {} degrees (center)", position);
    if !send(&mut link, position).await {
        println!("Warning: Failed to send initial position.");
    }

    loop {
        if let Some(angle) = latest_report(&mut link) {
            position = angle;
        }

        println!("{}", render_menu(position, &link_status(&link)));
        let choice = match prompt("\nEnter your choice: ")? {
            Some(choice) => choice,
            None => break,
        };

        match MenuChoice::parse(&choice) {
            MenuChoice::RotateRight => match rotate_right(position) {
                Rotation::Moved(angle) => {
                    position = angle;
                    if send(&mut link, position).await {
                        println!(
                            "Rotating right {} degrees. New position: {}",
                            ROTATE_STEP, position
                        );
                    } else {
                        println!("Failed to send command to controller.");
                    }
                }
                Rotation::AtLimit => {
                    println!("Cannot rotate further right. Maximum position reached.")
                }
            },
            MenuChoice::RotateLeft => match rotate_left(position) {
                Rotation::Moved(angle) => {
                    position = angle;
                    if send(&mut link, position).await {
                        println!(
                            "Rotating left {} degrees. New position: {}",
                            ROTATE_STEP, position
                        );
                    } else {
                        println!("Failed to send command to controller.");
                    }
                }
                Rotation::AtLimit => {
                    println!("Cannot rotate further left. Minimum position reached.")
                }
            },
            MenuChoice::SetAngle => {
                let input = prompt("Enter angle (0-180): ")?.unwrap_or_default();
                match parse_exact_angle(&input) {
                    Ok(angle) => {
                        position = angle;
                        if send(&mut link, position).await {
                            println!("Setting position to {} degrees.", position);
                        } else {
                            println!("Failed to send command to controller.");
                        }
                    }
                    Err(AngleInputError::OutOfRange(_)) => {
                        println!("Invalid angle. Must be between 0 and 180.")
                    }
                    Err(AngleInputError::NotANumber) => {
                        println!("Invalid input. Please enter a number.")
                    }
                }
            }
            MenuChoice::ListPorts => {
                println!("{}", format_port_list(&list_ports()));
                let _ = prompt("Press Enter to continue...")?;
            }
            MenuChoice::Quit => {
                println!("Exiting the program.");
                break;
            }
            MenuChoice::Invalid(_) => println!("Invalid choice. Please enter 1, 2, 3, 4, or q."),
        }

        sleep(COMMAND_SETTLE).await;
    }

    if !link.is_simulated() {
        link.close();
        println!("Serial connection closed.");
    }
    Ok(())
}
