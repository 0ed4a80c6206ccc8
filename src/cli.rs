use structopt::StructOpt;

use crate::config::{LinkConfig, ReconnectPolicy, RECONNECT_DELAY};
use crate::discovery;

/// Serial options shared by the twin and the console.
#[derive(StructOpt, Debug, Clone)]
pub struct LinkArgs {
    #[structopt(long, help = "Serial port to use (e.g. COM3, /dev/ttyUSB0)")]
    pub port: Option<String>,
    #[structopt(long, default_value = "9600", help = "Baud rate")]
    pub baud: u32,
    #[structopt(long, help = "List available serial ports and exit")]
    pub list_ports: bool,
    #[structopt(long, help = "Run without a controller")]
    pub sim: bool,
    #[structopt(long, help = "Give up after this many failed reconnects in a row")]
    pub max_reconnects: Option<u32>,
    #[structopt(short, long, help = "Verbose logging")]
    pub verbose: bool,
}

impl LinkArgs {
    pub fn link_config(&self) -> LinkConfig {
        let reconnect = match self.max_reconnects {
            Some(max) => ReconnectPolicy::bounded(RECONNECT_DELAY, max),
            None => ReconnectPolicy::unbounded(RECONNECT_DELAY),
        };
        LinkConfig {
            reconnect,
            ..LinkConfig::with_baud_rate(self.baud)
        }
    }

    /// `None` means simulation mode.
    pub fn resolve_port(&self) -> Option<String> {
        if self.sim {
            return None;
        }
        self.port.clone().or_else(discovery::detect_port)
    }
}
