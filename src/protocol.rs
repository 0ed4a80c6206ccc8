use std::fmt;

use crate::error::{LinkError, Result};

pub const MIN_ANGLE: u8 = 0;
pub const MAX_ANGLE: u8 = 180;

const COMMAND_PREFIX: &str = "S:";
const REPORT_PREFIX: &str = "A:";
const ACK_PREFIX: &str = "ACK:";

/// Servo position in whole degrees, always within `[0, 180]`.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct Angle(u8);

impl Angle {
    pub const MIN: Angle = Angle(MIN_ANGLE);
    pub const MAX: Angle = Angle(MAX_ANGLE);
    pub const CENTER: Angle = Angle(90);

    pub fn new(degrees: u8) -> Option<Angle> {
        if degrees <= MAX_ANGLE {
            Some(Angle(degrees))
        } else {
            None
        }
    }

    pub fn clamped(degrees: i64) -> Angle {
        Angle(degrees.clamp(MIN_ANGLE as i64, MAX_ANGLE as i64) as u8)
    }

    pub fn degrees(&self) -> u8 {
        self.0
    }

    pub fn offset(&self, delta: i64) -> Angle {
        Angle::clamped(self.0 as i64 + delta)
    }

    pub fn is_min(&self) -> bool {
        *self == Angle::MIN
    }

    pub fn is_max(&self) -> bool {
        *self == Angle::MAX
    }
}

impl Default for Angle {
    fn default() -> Self {
        Angle::CENTER
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Angle> for f32 {
    fn from(angle: Angle) -> Self {
        angle.0 as f32
    }
}

pub(crate) trait Instruction: Send {
    fn serialize(&self) -> Vec<u8>;
}

/// `S:<angle>\n`
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SetAngle {
    angle: Angle,
}

impl SetAngle {
    pub fn new(angle: Angle) -> SetAngle {
        SetAngle { angle }
    }

    pub fn clamped(degrees: i64) -> SetAngle {
        SetAngle::new(Angle::clamped(degrees))
    }

    pub fn angle(&self) -> Angle {
        self.angle
    }
}

impl From<Angle> for SetAngle {
    fn from(angle: Angle) -> Self {
        SetAngle::new(angle)
    }
}

impl Instruction for SetAngle {
    fn serialize(&self) -> Vec<u8> {
        format!("{}{}\n", COMMAND_PREFIX, self.angle).into_bytes()
    }
}

pub fn clamp_and_format(degrees: i64) -> String {
    format!("{}{}\n", COMMAND_PREFIX, Angle::clamped(degrees))
}

/// Decoded line sent by the controller.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum StatusLine {
    Ack(Angle),
    Acknowledged(String),
    Unrecognized(String),
}

impl StatusLine {
    pub fn parse(line: &str) -> StatusLine {
        let line = line.trim();
        if let Some(content) = line.strip_prefix(ACK_PREFIX) {
            return StatusLine::Acknowledged(content.to_owned());
        }
        match parse_angle_report(line) {
            Ok(angle) => StatusLine::Ack(angle),
            Err(_) => StatusLine::Unrecognized(line.to_owned()),
        }
    }

    pub fn confirmed_angle(&self) -> Option<Angle> {
        match self {
            StatusLine::Ack(angle) => Some(*angle),
            _ => None,
        }
    }

    /// Any line the controller only sends in reply to a command.
    pub fn is_response(&self) -> bool {
        !matches!(self, StatusLine::Unrecognized(_))
    }
}

pub fn parse_angle_report(line: &str) -> Result<Angle> {
    let value = line
        .trim()
        .strip_prefix(REPORT_PREFIX)
        .ok_or_else(|| LinkError::MalformedLine(line.to_owned()))?;
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|degrees| u8::try_from(degrees).ok())
        .and_then(Angle::new)
        .ok_or_else(|| LinkError::MalformedLine(line.to_owned()))
}
