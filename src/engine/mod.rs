//! Boundary to the external speech engine.
//!
//! Sessions talk to the engine through the [`Transcriber`] trait so they can
//! be exercised without the native library; the real backend lives behind
//! the `vosk` feature.

#[cfg(feature = "vosk")]
pub mod sys;
#[cfg(feature = "vosk")]
pub mod vosk;

#[cfg(feature = "vosk")]
pub use vosk::{set_log_level, LogLevel, Model, Recognizer, VoskFactory};

use std::path::Path;

use thiserror::Error;

/// Outcome of one waveform-accept call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// An utterance boundary was reached; a full result is available.
    Utterance,
    /// Still accumulating; only a partial result is available.
    Running,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid model path: {0}")]
    ModelPath(String),

    #[error("Failed to load speech model from {0}")]
    ModelCreation(String),

    #[error("Failed to create speech recognizer")]
    RecognizerCreation,

    #[error("Engine rejected a waveform chunk of {0} samples")]
    Accept(usize),
}

impl EngineError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::ModelPath(_) | Self::ModelCreation(_) => {
                "Failed to load the speech recognition model. Check the model folder and try again."
            }
            Self::RecognizerCreation => "Failed to create the speech recognizer.",
            Self::Accept(_) => "The speech engine rejected the audio stream.",
        }
    }
}

/// Minimal streaming interface over the engine.
///
/// Audio is 16 kHz mono S16LE. Result methods return the engine's raw JSON
/// payloads; parsing lives in [`crate::transcript`].
pub trait Transcriber: Send {
    /// Feed one chunk of samples.
    fn accept_pcm16(&mut self, pcm: &[i16]) -> Result<Acceptance, EngineError>;

    /// Full result for the utterance that just ended.
    fn result_json(&mut self) -> String;

    /// Tentative result for the in-flight utterance.
    fn partial_json(&mut self) -> String;

    /// Flush the pipeline and return the trailing result.
    fn final_json(&mut self) -> String;

    /// Discard pending state so recognition restarts from scratch.
    fn reset(&mut self);
}

/// Creates a model/recognizer pair bound to one sample rate.
pub trait EngineFactory: Send + Sync {
    fn load(
        &self,
        model_dir: &Path,
        sample_rate: f32,
    ) -> Result<Box<dyn Transcriber>, EngineError>;
}
