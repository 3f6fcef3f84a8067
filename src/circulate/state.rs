use std::fmt;

/// Lifecycle of a circulating channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Disabled,
    Initializing,
    Starting,
    Running,
    Paused,
    Stopping,
}

impl State {
    /// Whether the hardware is moving through the frame ring
    pub fn is_circulating(self) -> bool {
        matches!(self, State::Running | State::Paused | State::Starting)
    }

    pub fn is_stopped(self) -> bool {
        self == State::Disabled
    }
}

impl Default for State {
    fn default() -> Self {
        State::Disabled
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            State::Disabled => write!(f, "disabled"),
            State::Initializing => write!(f, "initializing"),
            State::Starting => write!(f, "starting"),
            State::Running => write!(f, "running"),
            State::Paused => write!(f, "paused"),
            State::Stopping => write!(f, "stopping"),
        }
    }
}

/// Transition waiting for the next vertical interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pending {
    Pause,
    Resume { clear_drops: bool },
}
