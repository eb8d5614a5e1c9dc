//! Lyra - push-to-talk voice coaching device
//!
//! Holding the input control records the user; releasing it runs
//! speech-to-text, a language model and text-to-speech in sequence and plays
//! the reply. Every external call is wrapped so that failures come back as a
//! classified [`component::ComponentResult`], and the
//! [`integration::Orchestrator`] turns any failure into a spoken fallback and
//! a return to idle.

pub mod audio;
pub mod component;
pub mod input;
pub mod integration;
pub mod llm;
pub mod speech;
pub mod testing;
pub mod utils;

use component::ErrorClass;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LyraError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Nothing to stop: capture is not recording")]
    NothingToStop,

    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Playback error: {0}")]
    Playback(String),
}

impl From<std::io::Error> for LyraError {
    fn from(e: std::io::Error) -> Self {
        LyraError::Io(e.to_string())
    }
}

impl From<hound::Error> for LyraError {
    fn from(e: hound::Error) -> Self {
        match e {
            hound::Error::IoError(io) => LyraError::Io(io.to_string()),
            other => LyraError::AudioFormat(other.to_string()),
        }
    }
}

impl LyraError {
    /// Position of this error in the failure taxonomy
    pub fn class(&self) -> ErrorClass {
        match self {
            LyraError::AudioDevice(_)
            | LyraError::AudioFormat(_)
            | LyraError::Io(_)
            | LyraError::Playback(_) => ErrorClass::LocalResource,
            LyraError::NothingToStop
            | LyraError::InvalidTransition { .. }
            | LyraError::Channel(_)
            | LyraError::Config(_) => ErrorClass::InternalInvariant,
        }
    }

    /// Get a user-friendly description
    pub fn user_message(&self) -> String {
        match self {
            LyraError::AudioDevice(_) => {
                "Audio device error. Please check your microphone/speakers.".to_string()
            }
            LyraError::NothingToStop => "No recording was in progress.".to_string(),
            LyraError::AudioFormat(_) => "The audio could not be decoded.".to_string(),
            LyraError::Io(_) => "File system error occurred.".to_string(),
            LyraError::Config(_) => {
                "Configuration error. Please check settings.".to_string()
            }
            LyraError::Channel(_) => {
                "Internal communication error. Please restart the device.".to_string()
            }
            LyraError::InvalidTransition { .. } => {
                "Internal state error. The device has been reset.".to_string()
            }
            LyraError::Playback(_) => "Audio playback failed.".to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LyraError>;
