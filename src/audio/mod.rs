//! Microphone capture and conditioning to the engine's PCM format.

mod capture;
mod conditioner;

pub use conditioner::{f32_to_i16, AudioConditioner};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;

/// Sample rate the recognizer is created with; capture is conditioned to it.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Interval between feed-loop drains of the capture ring buffer.
pub const FEED_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Error, Debug, Clone)]
pub enum RecordingError {
    #[error("Recording is already in progress")]
    AlreadyRecording,
    #[error("No recording in progress")]
    NotRecording,
    #[error("No default input device available")]
    NoInputDevice,
    #[error("Device error: {0}")]
    Device(String),
    #[error("Audio conditioning error: {0}")]
    Conditioning(String),
    #[error("Mutex lock failed")]
    LockFailed,
    #[error("Audio thread panicked or failed to start")]
    ThreadError,
}

impl RecordingError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyRecording => "Recording is already in progress.",
            Self::NotRecording => "No recording in progress.",
            Self::NoInputDevice => "No microphone found. Please check your audio settings.",
            Self::Device(_) => "A microphone error occurred. Please check your audio settings.",
            Self::LockFailed => "The recorder is busy. Please try again.",
            Self::Conditioning(_) | Self::ThreadError => {
                "Internal audio error. Please try again."
            }
        }
    }
}

/// Sink receiving conditioned 16 kHz mono S16LE chunks.
pub type PcmSink = Box<dyn FnMut(&[i16]) + Send>;

/// Push-based audio producer.
///
/// `stop` flushes buffered-but-unprocessed audio through the sink before it
/// returns, so no captured samples are lost at the end of a session.
pub trait AudioSource: Send {
    fn start(&mut self, sink: PcmSink) -> Result<(), RecordingError>;
    fn stop(&mut self) -> Result<(), RecordingError>;
}

pub(super) enum AudioCmd {
    Stop,
}

/// Default-input-device source. A worker thread owns the cpal stream and
/// drains the capture ring buffer on a fixed tick.
pub struct CpalRecorder {
    cmd_tx: Option<Sender<AudioCmd>>,
    worker: Option<thread::JoinHandle<()>>,
    overrun_count: Arc<AtomicUsize>,
}

impl CpalRecorder {
    pub fn new() -> Self {
        Self {
            cmd_tx: None,
            worker: None,
            overrun_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Samples dropped because the capture callback outpaced the feed loop.
    pub fn overruns(&self) -> usize {
        self.overrun_count.load(Ordering::Relaxed)
    }
}

impl Default for CpalRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for CpalRecorder {
    fn start(&mut self, sink: PcmSink) -> Result<(), RecordingError> {
        if self.worker.is_some() {
            return Err(RecordingError::AlreadyRecording);
        }

        self.overrun_count.store(0, Ordering::Relaxed);

        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (init_tx, init_rx) = mpsc::channel();
        let overruns = self.overrun_count.clone();

        let handle = thread::spawn(move || {
            capture::run_capture_thread(cmd_rx, init_tx, sink, overruns);
        });

        match init_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(())) => {
                self.cmd_tx = Some(cmd_tx);
                self.worker = Some(handle);
                Ok(())
            }
            res => {
                let _ = handle.join();
                match res {
                    Ok(Err(e)) => Err(e),
                    _ => Err(RecordingError::ThreadError),
                }
            }
        }
    }

    fn stop(&mut self) -> Result<(), RecordingError> {
        let cmd_tx = self.cmd_tx.take().ok_or(RecordingError::NotRecording)?;
        let _ = cmd_tx.send(AudioCmd::Stop);

        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }

        let overruns = self.overrun_count.load(Ordering::Relaxed);
        if overruns > 0 {
            log::warn!("Capture ring buffer overran {overruns} time(s)");
        }

        Ok(())
    }
}
