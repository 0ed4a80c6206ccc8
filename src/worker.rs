use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::link::ServoLink;
use crate::protocol::{Angle, StatusLine};
use crate::twin::{ConnectionStatus, SharedTwin};

/// Background loop that owns the link: forwards requested angles, polls
/// for reports and reconnects after read failures.
pub struct LinkWorker {
    link: ServoLink,
    twin: SharedTwin,
    commands: mpsc::UnboundedReceiver<Angle>,
    running: Arc<AtomicBool>,
}

impl LinkWorker {
    pub fn new(
        link: ServoLink,
        twin: SharedTwin,
        commands: mpsc::UnboundedReceiver<Angle>,
        running: Arc<AtomicBool>,
    ) -> LinkWorker {
        LinkWorker {
            link,
            twin,
            commands,
            running,
        }
    }

    pub fn link(&self) -> &ServoLink {
        &self.link
    }

    fn is_local(&self) -> bool {
        self.link.is_simulated() || self.link.has_given_up()
    }

    fn status(&self) -> ConnectionStatus {
        if self.is_local() {
            ConnectionStatus::Simulation
        } else if self.link.is_connected() {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    async fn forward_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(angle) => {
                    if self.is_local() {
                        continue;
                    }
                    if let Err(err) = self.link.send(angle.degrees() as i64).await {
                        warn!(%err, %angle, "command dropped");
                        if !self.link.is_connected() {
                            sleep(self.link.config().reconnect.delay).await;
                            return;
                        }
                    }
                }
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.running.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    async fn read_reports(&mut self) {
        loop {
            match self.link.poll_incoming() {
                Ok(Some(StatusLine::Ack(angle))) => self.twin.confirm(angle),
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(err) => {
                    warn!(%err, "serial reading error");
                    sleep(self.link.config().reconnect.delay).await;
                    return;
                }
            }
        }
    }

    async fn recover(&mut self) {
        if self.is_local() || self.link.is_connected() {
            return;
        }
        if let Err(err) = self.link.reconnect().await {
            if self.link.has_given_up() {
                return;
            }
            warn!(%err, "reconnect failed");
            sleep(self.link.config().reconnect.delay).await;
        }
    }

    /// One pass of the loop. At most one reconnect is attempted per tick,
    /// whether it comes from a failed send or from recovery.
    pub async fn tick(&mut self) {
        let attempts = self.link.reconnect_attempts();
        self.forward_commands().await;
        self.read_reports().await;
        if self.link.reconnect_attempts() == attempts {
            self.recover().await;
        }
        self.twin.set_status(self.status());
    }

    pub async fn run(mut self) -> ServoLink {
        info!("link worker started");
        while self.running.load(Ordering::SeqCst) {
            self.tick().await;
            sleep(self.link.config().poll_interval).await;
        }
        self.link.close();
        info!("link worker stopped");
        self.link
    }
}
