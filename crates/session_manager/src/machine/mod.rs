//! State machine module
//!
//! Contains the FSM for the lifecycle of a single text turn.

mod events;
mod states;
mod transitions;

pub use events::TurnEvent;
pub use states::TurnState;
pub use transitions::{TurnMachine, TurnTransition};
