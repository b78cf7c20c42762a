use thiserror::Error;

use crate::audio::RecordingError;
use crate::engine::EngineError;

/// Unified wrapper errors.
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Recording: {0}")]
    Recording(#[from] RecordingError),

    #[error("Engine: {0}")]
    Engine(#[from] EngineError),

    #[error("No speech recognition model found")]
    ModelNotFound,

    #[error("Session: {0}")]
    Session(String),
}

impl serde::Serialize for SpeechError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl SpeechError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Recording(e) => e.user_message().to_string(),
            Self::Engine(e) => e.user_message().to_string(),
            Self::ModelNotFound => {
                "No speech recognition model found. Please install a Vosk model.".to_string()
            }
            Self::Session(message) => message.clone(),
        }
    }
}
