use std::fmt;
use std::path::Path;

use tokio_serial::{SerialPortInfo, SerialPortType};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

impl PortInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> PortInfo {
        PortInfo {
            name: name.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.description)
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let description = match info.port_type {
            SerialPortType::UsbPort(usb) => describe_usb(usb.product, usb.manufacturer),
            SerialPortType::PciPort => "PCI Device".to_owned(),
            SerialPortType::BluetoothPort => "Bluetooth Device".to_owned(),
            SerialPortType::Unknown => "n/a".to_owned(),
        };
        PortInfo::new(info.port_name, description)
    }
}

fn describe_usb(product: Option<String>, manufacturer: Option<String>) -> String {
    let parts: Vec<String> = [product, manufacturer]
        .into_iter()
        .flatten()
        .filter(|part| !part.trim().is_empty())
        .collect();
    if parts.is_empty() {
        "USB Serial Device".to_owned()
    } else {
        parts.join(" - ")
    }
}

pub type PortMatcher = Box<dyn Fn(&PortInfo) -> bool + Send + Sync>;

pub fn description_contains(keyword: &'static str) -> PortMatcher {
    Box::new(move |port: &PortInfo| port.description.contains(keyword))
}

/// Default device path tried when nothing is enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackPort {
    pub name: String,
    pub verify_exists: bool,
}

impl FallbackPort {
    pub fn unchecked(name: impl Into<String>) -> FallbackPort {
        FallbackPort {
            name: name.into(),
            verify_exists: false,
        }
    }

    pub fn checked(name: impl Into<String>) -> FallbackPort {
        FallbackPort {
            name: name.into(),
            verify_exists: true,
        }
    }

    fn is_available(&self) -> bool {
        !self.verify_exists || Path::new(&self.name).exists()
    }
}

pub fn platform_fallbacks() -> Vec<FallbackPort> {
    if cfg!(target_os = "windows") {
        vec![FallbackPort::unchecked("COM3")]
    } else if cfg!(target_os = "linux") {
        vec![
            FallbackPort::checked("/dev/ttyACM0"),
            FallbackPort::checked("/dev/ttyUSB0"),
            FallbackPort::checked("/dev/ttyS0"),
        ]
    } else if cfg!(target_os = "macos") {
        vec![FallbackPort::checked("/dev/cu.usbmodem1101")]
    } else {
        vec![]
    }
}

/// Picks the most likely controller port.
///
/// Matchers are tried in order and the first one matching any port wins.
/// Without a match the first enumerated port is used, and with nothing
/// enumerated the fallback paths are tried.
pub struct PortDetector {
    matchers: Vec<PortMatcher>,
    fallbacks: Vec<FallbackPort>,
}

impl PortDetector {
    pub fn new(matchers: Vec<PortMatcher>, fallbacks: Vec<FallbackPort>) -> PortDetector {
        PortDetector {
            matchers,
            fallbacks,
        }
    }

    pub fn detect(&self, ports: &[PortInfo]) -> Option<String> {
        for matcher in &self.matchers {
            if let Some(port) = ports.iter().find(|&port| matcher(port)) {
                info!(port = %port, "found likely controller");
                return Some(port.name.clone());
            }
        }
        if let Some(port) = ports.first() {
            info!(port = %port, "using first available port");
            return Some(port.name.clone());
        }
        let fallback = self
            .fallbacks
            .iter()
            .find(|fallback| fallback.is_available())
            .map(|fallback| fallback.name.clone());
        match &fallback {
            Some(name) => info!(port = %name, "no ports enumerated, using platform default"),
            None => info!("no serial port found"),
        }
        fallback
    }
}

impl Default for PortDetector {
    fn default() -> Self {
        PortDetector::new(
            vec![description_contains("Arduino"), description_contains("USB")],
            platform_fallbacks(),
        )
    }
}

pub fn list_ports() -> Vec<PortInfo> {
    match tokio_serial::available_ports() {
        Ok(ports) => ports.into_iter().map(PortInfo::from).collect(),
        Err(err) => {
            warn!(%err, "failed to enumerate serial ports");
            vec![]
        }
    }
}

pub fn detect_port() -> Option<String> {
    PortDetector::default().detect(&list_ports())
}

pub fn format_port_list(ports: &[PortInfo]) -> String {
    if ports.is_empty() {
        return "No serial ports found.".to_owned();
    }
    let mut listing = String::from("Available serial ports:");
    for (index, port) in ports.iter().enumerate() {
        listing.push_str(&format!("\n  {}. {}", index + 1, port));
    }
    listing
}
