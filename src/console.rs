use std::time::Duration;

use crate::protocol::Angle;

/// Degrees moved by the rotate entries.
pub const ROTATE_STEP: i64 = 5;
/// Time the controller gets to act before the next status read.
pub const COMMAND_SETTLE: Duration = Duration::from_secs(1);

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuChoice {
    RotateRight,
    RotateLeft,
    SetAngle,
    ListPorts,
    Quit,
    Invalid(String),
}

impl MenuChoice {
    pub fn parse(input: &str) -> MenuChoice {
        match input.trim() {
            "1" => MenuChoice::RotateRight,
            "2" => MenuChoice::RotateLeft,
            "3" => MenuChoice::SetAngle,
            "4" => MenuChoice::ListPorts,
            choice if choice.eq_ignore_ascii_case("q") => MenuChoice::Quit,
            other => MenuChoice::Invalid(other.to_owned()),
        }
    }
}

/// Result of applying a rotate entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Moved(Angle),
    AtLimit,
}

pub fn rotate_right(current: Angle) -> Rotation {
    if current.is_max() {
        Rotation::AtLimit
    } else {
        Rotation::Moved(current.offset(ROTATE_STEP))
    }
}

pub fn rotate_left(current: Angle) -> Rotation {
    if current.is_min() {
        Rotation::AtLimit
    } else {
        Rotation::Moved(current.offset(-ROTATE_STEP))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AngleInputError {
    NotANumber,
    OutOfRange(i64),
}

pub fn parse_exact_angle(input: &str) -> Result<Angle, AngleInputError> {
    let degrees: i64 = input
        .trim()
        .parse()
        .map_err(|_| AngleInputError::NotANumber)?;
    u8::try_from(degrees)
        .ok()
        .and_then(Angle::new)
        .ok_or(AngleInputError::OutOfRange(degrees))
}

pub fn render_menu(position: Angle, link_status: &str) -> String {
    format!(
        "{}\n=== Servo Motor Controller ===\n\
         Current position: {} degrees\n\
         Link: {}\n\
         \nChoose an option:\n\
         1: Rotate {step} degrees right\n\
         2: Rotate {step} degrees left\n\
         3: Set specific angle\n\
         4: Show available ports\n\
         q: Quit",
        CLEAR_SCREEN,
        position,
        link_status,
        step = ROTATE_STEP
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_choices() {
        assert_eq!(MenuChoice::parse("1\n"), MenuChoice::RotateRight);
        assert_eq!(MenuChoice::parse(" 2 "), MenuChoice::RotateLeft);
        assert_eq!(MenuChoice::parse("3"), MenuChoice::SetAngle);
        assert_eq!(MenuChoice::parse("4"), MenuChoice::ListPorts);
        assert_eq!(MenuChoice::parse("Q"), MenuChoice::Quit);
        assert_eq!(MenuChoice::parse("7"), MenuChoice::Invalid("7".to_owned()));
    }

    #[test]
    fn rotate_within_range() {
        assert_eq!(
            rotate_right(Angle::CENTER),
            Rotation::Moved(Angle::new(95).unwrap())
        );
        assert_eq!(
            rotate_left(Angle::CENTER),
            Rotation::Moved(Angle::new(85).unwrap())
        );
    }

    #[test]
    fn rotate_saturates_then_stops() {
        assert_eq!(
            rotate_right(Angle::new(178).unwrap()),
            Rotation::Moved(Angle::MAX)
        );
        assert_eq!(rotate_right(Angle::MAX), Rotation::AtLimit);
        assert_eq!(
            rotate_left(Angle::new(3).unwrap()),
            Rotation::Moved(Angle::MIN)
        );
        assert_eq!(rotate_left(Angle::MIN), Rotation::AtLimit);
    }

    #[test]
    fn exact_angle_input() {
        assert_eq!(parse_exact_angle(" 45\n"), Ok(Angle::new(45).unwrap()));
        assert_eq!(
            parse_exact_angle("200"),
            Err(AngleInputError::OutOfRange(200))
        );
        assert_eq!(
            parse_exact_angle("-5"),
            Err(AngleInputError::OutOfRange(-5))
        );
        assert_eq!(parse_exact_angle("abc"), Err(AngleInputError::NotANumber));
    }

    #[test]
    fn menu_lists_entries() {
        let menu = render_menu(Angle::CENTER, "Connected");
        assert!(menu.contains("Current position: 90 degrees"));
        assert!(menu.contains("1: Rotate 5 degrees right"));
        assert!(menu.contains("q: Quit"));
    }
}
