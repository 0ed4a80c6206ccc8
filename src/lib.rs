pub mod cli;
pub mod config;
pub mod console;
pub mod discovery;
mod error;
pub mod link;
pub mod logging;
pub mod protocol;
mod serial_driver;
pub mod twin;
pub mod worker;

pub use config::{LinkConfig, ReconnectPolicy};
pub use discovery::{detect_port, list_ports, PortDetector, PortInfo};
pub use error::{LinkError, Result};
pub use link::{Connector, LinkState, SerialConnector, ServoLink};
pub use protocol::{clamp_and_format, Angle, SetAngle, StatusLine};
pub use serial_driver::{FramedDriver, FramedSerialDriver, ServoLineProtocol};
