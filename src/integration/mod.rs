//! Configuration, state machine and the orchestrator that ties the
//! components together

pub mod config;
pub mod orchestrator;
pub mod state;

pub use config::Config;
pub use orchestrator::{Components, Orchestrator, OrchestratorEvent, OrchestratorHandle};
pub use state::{ApplicationState, StateMachine, Transition, Trigger};
