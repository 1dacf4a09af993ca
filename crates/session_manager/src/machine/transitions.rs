//! Turn transitions - FSM transition logic.

use log::debug;

use super::events::TurnEvent;
use super::states::TurnState;

/// Represents a state transition result.
#[derive(Debug, Clone)]
pub struct TurnTransition {
    /// The state before the transition.
    pub from: TurnState,
    /// The state after the transition.
    pub to: TurnState,
    /// The event that triggered the transition.
    pub event: TurnEvent,
    /// Whether the state actually changed.
    pub changed: bool,
}

/// State machine for one conversation's text turns.
///
/// Events that are meaningless in the current state leave it unchanged; the
/// actor may receive late events for superseded streams and must not be
/// derailed by them.
#[derive(Debug, Clone)]
pub struct TurnMachine {
    current_state: TurnState,
    /// Transition history (limited).
    history: Vec<TurnTransition>,
    max_history: usize,
}

impl Default for TurnMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnMachine {
    /// Create a new machine in the Idle state.
    pub fn new() -> Self {
        Self {
            current_state: TurnState::Idle,
            history: Vec::new(),
            max_history: 50,
        }
    }

    /// Get the current state.
    pub fn state(&self) -> &TurnState {
        &self.current_state
    }

    /// Get the transition history.
    pub fn history(&self) -> &[TurnTransition] {
        &self.history
    }

    /// Handle an event and transition to a new state.
    pub fn handle_event(&mut self, event: TurnEvent) -> TurnTransition {
        let old_state = self.current_state.clone();
        let new_state = Self::compute_next_state(&old_state, &event);
        let changed = old_state != new_state;

        if changed {
            debug!("turn {:?} -> {:?} on {}", old_state, new_state, event);
        }
        self.current_state = new_state.clone();

        let transition = TurnTransition {
            from: old_state,
            to: new_state,
            event,
            changed,
        };

        self.history.push(transition.clone());
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        transition
    }

    /// Compute the next state given the current state and an event.
    fn compute_next_state(state: &TurnState, event: &TurnEvent) -> TurnState {
        use TurnEvent::*;
        use TurnState::*;

        match (state, event) {
            // ========== Turn Start ==========
            (Idle | Completed | FailedFallback | FailedTerminal, TurnStarted) => Sending,

            // ========== Request Issued ==========
            (Sending, StreamOpened) => Streaming,
            (Sending, TransportFailed) => FailedFallback,
            (Sending, AuthRejected | RateLimited) => FailedTerminal,

            // ========== Streaming ==========
            (Streaming, StreamCompleted) => Completed,
            (Streaming, PermissionDenied) => FailedTerminal,

            // ========== Cancellation ==========
            (Sending | Streaming, Cancelled) => Idle,

            // Anything else leaves the state unchanged.
            (state, _) => state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(machine: &mut TurnMachine, events: &[TurnEvent]) {
        for event in events {
            machine.handle_event(event.clone());
        }
    }

    #[test]
    fn happy_path_reaches_completed() {
        let mut machine = TurnMachine::new();
        drive(
            &mut machine,
            &[
                TurnEvent::TurnStarted,
                TurnEvent::StreamOpened,
                TurnEvent::StreamCompleted,
            ],
        );
        assert_eq!(machine.state(), &TurnState::Completed);
        assert!(machine.state().is_terminal());
    }

    #[test]
    fn transport_failure_before_streaming_falls_back() {
        let mut machine = TurnMachine::new();
        drive(&mut machine, &[TurnEvent::TurnStarted, TurnEvent::TransportFailed]);
        assert_eq!(machine.state(), &TurnState::FailedFallback);
    }

    #[test]
    fn auth_and_rate_limit_rejections_are_terminal() {
        for event in [TurnEvent::AuthRejected, TurnEvent::RateLimited] {
            let mut machine = TurnMachine::new();
            drive(&mut machine, &[TurnEvent::TurnStarted, event]);
            assert_eq!(machine.state(), &TurnState::FailedTerminal);
        }
    }

    #[test]
    fn forbidden_sentinel_terminates_a_streaming_turn() {
        let mut machine = TurnMachine::new();
        drive(
            &mut machine,
            &[
                TurnEvent::TurnStarted,
                TurnEvent::StreamOpened,
                TurnEvent::PermissionDenied,
            ],
        );
        assert_eq!(machine.state(), &TurnState::FailedTerminal);
    }

    #[test]
    fn cancellation_returns_to_idle_from_any_in_flight_state() {
        let mut machine = TurnMachine::new();
        drive(&mut machine, &[TurnEvent::TurnStarted, TurnEvent::Cancelled]);
        assert_eq!(machine.state(), &TurnState::Idle);

        drive(
            &mut machine,
            &[
                TurnEvent::TurnStarted,
                TurnEvent::StreamOpened,
                TurnEvent::Cancelled,
            ],
        );
        assert_eq!(machine.state(), &TurnState::Idle);
    }

    #[test]
    fn a_new_turn_can_start_from_any_terminal_state() {
        for terminal in [
            TurnEvent::StreamCompleted,
            TurnEvent::PermissionDenied,
        ] {
            let mut machine = TurnMachine::new();
            drive(
                &mut machine,
                &[TurnEvent::TurnStarted, TurnEvent::StreamOpened, terminal],
            );
            let transition = machine.handle_event(TurnEvent::TurnStarted);
            assert!(transition.changed);
            assert_eq!(machine.state(), &TurnState::Sending);
        }
    }

    #[test]
    fn late_events_leave_the_state_unchanged() {
        let mut machine = TurnMachine::new();
        drive(
            &mut machine,
            &[
                TurnEvent::TurnStarted,
                TurnEvent::StreamOpened,
                TurnEvent::StreamCompleted,
            ],
        );
        // A late fragment-era event from a superseded stream.
        let transition = machine.handle_event(TurnEvent::PermissionDenied);
        assert!(!transition.changed);
        assert_eq!(machine.state(), &TurnState::Completed);
    }

    #[test]
    fn history_is_bounded() {
        let mut machine = TurnMachine::new();
        for _ in 0..60 {
            machine.handle_event(TurnEvent::TurnStarted);
            machine.handle_event(TurnEvent::Cancelled);
        }
        assert_eq!(machine.history().len(), 50);
    }
}
