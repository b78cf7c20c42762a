pub mod audio;
pub mod engine;
pub mod model_store;
pub mod transcript;

mod error;
mod session;

pub use error::SpeechError;
pub use session::{SessionConfig, SessionSnapshot, SpeechEvent, SpeechSession, Status};
