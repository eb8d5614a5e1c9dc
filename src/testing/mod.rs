//! Deterministic devices and backends
//!
//! Used by the crate's own tests and available to front ends that want to
//! exercise the full cycle without hardware or network access.

pub mod backends;
pub mod devices;

pub use backends::{FailingLanguageModel, HangingLanguageModel, ScriptedRecognizer, ScriptedSynthesizer};
pub use devices::{SimulatedSpeaker, SpeakerMonitor, SyntheticMicrophone};
