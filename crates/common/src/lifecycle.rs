//! Start/stop state machine shared by long-lived components.
//!
//! Every pipeline (inbox, outbox, pubsub fabric) embeds a [`Lifecycle`] and
//! refuses operations outside the `Started` state. Transitions are one-way;
//! a stopped component is never restarted, a new instance is created instead.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::{AppError, AppResult};

/// Component lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum State {
    /// Created but not yet started.
    New = 0,
    /// Start in progress.
    Starting = 1,
    /// Accepting operations.
    Started = 2,
    /// Stop in progress; draining in-flight work.
    Stopping = 3,
    /// Fully stopped.
    Stopped = 4,
}

impl State {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::New,
            1 => Self::Starting,
            2 => Self::Started,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// One-way start/stop state machine.
#[derive(Debug)]
pub struct Lifecycle {
    name: String,
    state: AtomicU8,
}

impl Lifecycle {
    /// Create a new lifecycle in the `New` state.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: AtomicU8::new(State::New as u8),
        }
    }

    /// The component name, used in error messages and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Transition `New -> Starting`. Fails if the component was already
    /// started or stopped.
    pub fn starting(&self) -> AppResult<()> {
        self.transition(State::New, State::Starting)
    }

    /// Transition `Starting -> Started`.
    pub fn started(&self) -> AppResult<()> {
        self.transition(State::Starting, State::Started)
    }

    /// Transition `Started -> Stopping`.
    pub fn stopping(&self) -> AppResult<()> {
        self.transition(State::Started, State::Stopping)
    }

    /// Transition `Stopping -> Stopped`.
    pub fn stopped(&self) -> AppResult<()> {
        self.transition(State::Stopping, State::Stopped)
    }

    /// Guard used at the top of every public operation.
    pub fn check_started(&self) -> AppResult<()> {
        match self.state() {
            State::Started => Ok(()),
            State::New | State::Starting => Err(AppError::NotStarted(self.name.clone())),
            State::Stopping | State::Stopped => Err(AppError::ShuttingDown(self.name.clone())),
        }
    }

    fn transition(&self, from: State, to: State) -> AppResult<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|actual| match State::from_u8(actual) {
                State::Stopping | State::Stopped => AppError::ShuttingDown(self.name.clone()),
                _ => AppError::NotStarted(self.name.clone()),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_full_lifecycle() {
        let lc = Lifecycle::new("inbox");
        assert_eq!(lc.state(), State::New);
        assert!(lc.check_started().is_err());

        lc.starting().unwrap();
        lc.started().unwrap();
        assert_eq!(lc.state(), State::Started);
        assert!(lc.check_started().is_ok());

        lc.stopping().unwrap();
        assert!(matches!(
            lc.check_started(),
            Err(AppError::ShuttingDown(_))
        ));
        lc.stopped().unwrap();
        assert_eq!(lc.state(), State::Stopped);
    }

    #[test]
    fn test_transitions_are_one_way() {
        let lc = Lifecycle::new("outbox");
        lc.starting().unwrap();
        lc.started().unwrap();
        lc.stopping().unwrap();
        lc.stopped().unwrap();

        // Restarting a stopped component is refused.
        assert!(matches!(lc.starting(), Err(AppError::ShuttingDown(_))));
    }

    #[test]
    fn test_check_started_before_start() {
        let lc = Lifecycle::new("fabric");
        assert!(matches!(lc.check_started(), Err(AppError::NotStarted(_))));
    }

    #[test]
    fn test_double_start_refused() {
        let lc = Lifecycle::new("inbox");
        lc.starting().unwrap();
        assert!(lc.starting().is_err());
    }
}
