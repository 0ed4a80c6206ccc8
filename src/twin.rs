use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};

use crate::protocol::{Angle, MAX_ANGLE};

pub const FRAME_RATE: u32 = 60;
/// Degrees per arrow key press or scroll notch.
pub const STEP_SIZE: i64 = 10;
/// Degrees the displayed angle moves per frame.
pub const ANIMATION_STEP: f32 = 1.5;
const SETTLED_TOLERANCE: f32 = 0.5;
const GAUGE_WIDTH: usize = 37;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Simulation,
}

impl ConnectionStatus {
    fn label(&self) -> &'static str {
        match self {
            ConnectionStatus::Connected => "Connected",
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Simulation => "Simulation",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TwinState {
    pub displayed: f32,
    pub target: Angle,
    pub confirmed: Option<Angle>,
    pub status: ConnectionStatus,
}

impl TwinState {
    pub fn new(status: ConnectionStatus) -> TwinState {
        TwinState {
            displayed: Angle::CENTER.into(),
            target: Angle::CENTER,
            confirmed: None,
            status,
        }
    }

    /// Linear ease toward the target, never overshooting.
    pub fn advance(&mut self, step: f32) {
        let target: f32 = self.target.into();
        let distance = target - self.displayed;
        if distance.abs() <= SETTLED_TOLERANCE {
            return;
        }
        if distance > 0.0 {
            self.displayed = (self.displayed + step).min(target);
        } else {
            self.displayed = (self.displayed - step).max(target);
        }
    }

    pub fn is_settled(&self) -> bool {
        let target: f32 = self.target.into();
        (target - self.displayed).abs() <= SETTLED_TOLERANCE
    }
}

/// Twin state shared between the render loop and the link worker.
#[derive(Debug, Clone)]
pub struct SharedTwin {
    inner: Arc<Mutex<TwinState>>,
}

fn retarget(state: &mut TwinState, degrees: i64) -> Option<Angle> {
    let target = Angle::clamped(degrees);
    if target == state.target {
        return None;
    }
    state.target = target;
    Some(target)
}

impl SharedTwin {
    pub fn new(state: TwinState) -> SharedTwin {
        SharedTwin {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TwinState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TwinState {
        self.lock().clone()
    }

    pub fn target(&self) -> Angle {
        self.lock().target
    }

    /// Returns the new target when it changed.
    pub fn set_target(&self, degrees: i64) -> Option<Angle> {
        retarget(&mut self.lock(), degrees)
    }

    /// Moves the target by whole steps, read and write under one lock.
    pub fn step_target(&self, steps: i64) -> Option<Angle> {
        let mut state = self.lock();
        let degrees = state.target.degrees() as i64 + steps * STEP_SIZE;
        retarget(&mut state, degrees)
    }

    /// Position reported by the controller.
    pub fn confirm(&self, angle: Angle) {
        let mut state = self.lock();
        state.confirmed = Some(angle);
        state.target = angle;
    }

    pub fn set_status(&self, status: ConnectionStatus) {
        self.lock().status = status;
    }

    pub fn advance(&self) -> TwinState {
        let mut state = self.lock();
        state.advance(ANIMATION_STEP);
        state.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwinInput {
    Step(i64),
    Set(i64),
    Quit,
}

impl TwinInput {
    pub fn parse(line: &str) -> Option<TwinInput> {
        let line = line.trim().to_lowercase();
        match line.as_str() {
            "+" | "up" | "right" => return Some(TwinInput::Step(1)),
            "-" | "down" | "left" => return Some(TwinInput::Step(-1)),
            "q" | "quit" | "esc" => return Some(TwinInput::Quit),
            _ => {}
        }
        if let Some(notches) = line.strip_prefix("scroll") {
            return notches.trim().parse().ok().map(TwinInput::Step);
        }
        line.parse().ok().map(TwinInput::Set)
    }
}

/// Outcome of draining the pending input for one frame.
#[derive(Debug, Default, PartialEq)]
pub struct FrameInput {
    /// Targets that changed, in order.
    pub targets: Vec<Angle>,
    pub quit: bool,
    /// The input source is gone. The twin keeps running without it.
    pub closed: bool,
}

pub fn drain_input(inputs: &mut UnboundedReceiver<TwinInput>, twin: &SharedTwin) -> FrameInput {
    let mut frame = FrameInput::default();
    loop {
        let input = match inputs.try_recv() {
            Ok(input) => input,
            Err(TryRecvError::Empty) => return frame,
            Err(TryRecvError::Disconnected) => {
                frame.closed = true;
                return frame;
            }
        };
        let changed = match input {
            TwinInput::Step(steps) => twin.step_target(steps),
            TwinInput::Set(degrees) => twin.set_target(degrees),
            TwinInput::Quit => {
                frame.quit = true;
                None
            }
        };
        frame.targets.extend(changed);
    }
}

pub fn render_frame(state: &TwinState) -> String {
    let angle = state.displayed.round().clamp(0.0, MAX_ANGLE as f32);
    let horn = ((angle / MAX_ANGLE as f32) * (GAUGE_WIDTH - 1) as f32).round() as usize;
    let gauge: String = (0..GAUGE_WIDTH)
        .map(|cell| if cell == horn { '|' } else { '-' })
        .collect();
    format!(
        "0 [{}] 180  Angle: {:>3}°  Servo: {}",
        gauge,
        angle as u16,
        state.status.label()
    )
}
