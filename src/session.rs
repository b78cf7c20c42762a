//! Recording session: observable state, event fan-out, and the feed path
//! between capture and the speech engine.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::audio::{AudioSource, RecordingError, TARGET_SAMPLE_RATE};
use crate::engine::{Acceptance, EngineError, EngineFactory, Transcriber};
use crate::error::SpeechError;
use crate::model_store;
use crate::transcript;

/// User-visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ready,
    LoadingModel,
    NoModel,
    ModelLoadFailed,
    RecognizerFailed,
    NoMicrophone,
    AudioError,
    Listening,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::LoadingModel => "Loading model...",
            Self::NoModel => "No model found",
            Self::ModelLoadFailed => "Model load failed",
            Self::RecognizerFailed => "Recognizer creation failed",
            Self::NoMicrophone => "No microphone",
            Self::AudioError => "Audio error",
            Self::Listening => "Listening...",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change notifications and recognition results delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SpeechEvent {
    RecordingChanged(bool),
    ModelLoadedChanged(bool),
    TranscriptionChanged(String),
    StatusChanged(Status),
    DurationChanged(u64),
    Partial(String),
    Final(String),
    Error(String),
}

/// Point-in-time copy of the observable state.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub recording: bool,
    pub model_loaded: bool,
    pub transcription: String,
    pub status: Status,
    pub elapsed_secs: u64,
}

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sample rate the recognizer is created with.
    pub sample_rate: u32,
    /// Roots searched when no explicit model path is given.
    pub model_search_roots: Vec<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            model_search_roots: model_store::default_search_roots(),
        }
    }
}

struct SharedState {
    model_loaded: bool,
    transcription: String,
    status: Status,
    elapsed_secs: u64,
    last_partial: String,
}

struct Inner {
    state: Mutex<SharedState>,
    engine: Mutex<Option<Box<dyn Transcriber>>>,
    subscribers: Mutex<Vec<Sender<SpeechEvent>>>,
    recording: AtomicBool,
}

impl Inner {
    fn emit(&self, event: SpeechEvent) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    fn set_status(&self, status: Status) {
        let changed = match self.state.lock() {
            Ok(mut state) => {
                if state.status == status {
                    false
                } else {
                    state.status = status;
                    true
                }
            }
            Err(_) => false,
        };

        if changed {
            self.emit(SpeechEvent::StatusChanged(status));
        }
    }

    fn report_error(&self, message: String) {
        log::error!("{message}");
        self.emit(SpeechEvent::Error(message));
    }

    /// One waveform-accept call per drained chunk.
    fn ingest(&self, pcm: &[i16]) {
        if pcm.is_empty() {
            return;
        }

        let mut engine_guard = match self.engine.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let Some(engine) = engine_guard.as_mut() else {
            return;
        };

        match engine.accept_pcm16(pcm) {
            Ok(Acceptance::Utterance) => {
                let json = engine.result_json();
                drop(engine_guard);
                if let Some(text) = transcript::parse_text(&json) {
                    self.publish_final(text);
                }
            }
            Ok(Acceptance::Running) => {
                let json = engine.partial_json();
                drop(engine_guard);
                if let Some(text) = transcript::parse_partial(&json) {
                    self.publish_partial(text);
                }
            }
            Err(e) => {
                log::error!("Waveform ingestion failed: {e}");
            }
        }
    }

    fn publish_partial(&self, text: String) {
        let changed = match self.state.lock() {
            Ok(mut state) => {
                if state.last_partial == text {
                    false
                } else {
                    state.last_partial = text.clone();
                    true
                }
            }
            Err(_) => false,
        };

        if changed {
            self.emit(SpeechEvent::Partial(text));
        }
    }

    fn publish_final(&self, text: String) {
        let transcription = match self.state.lock() {
            Ok(mut state) => {
                transcript::append_utterance(&mut state.transcription, &text);
                state.last_partial.clear();
                state.transcription.clone()
            }
            Err(_) => return,
        };

        self.emit(SpeechEvent::TranscriptionChanged(transcription));
        self.emit(SpeechEvent::Final(text));
    }

    /// Flush the engine pipeline and publish any trailing result.
    fn finalize_utterance(&self) {
        let json = {
            let mut guard = match self.engine.lock() {
                Ok(guard) => guard,
                Err(_) => return,
            };
            match guard.as_mut() {
                Some(engine) => engine.final_json(),
                None => return,
            }
        };

        if let Some(text) = transcript::parse_text(&json) {
            self.publish_final(text);
        }
    }
}

/// Microphone transcription session.
///
/// Owns the engine handles, the audio source, and the observable state; all
/// notifications flow through the receivers handed out by [`subscribe`].
///
/// [`subscribe`]: SpeechSession::subscribe
pub struct SpeechSession {
    inner: Arc<Inner>,
    source: Mutex<Box<dyn AudioSource>>,
    factory: Box<dyn EngineFactory>,
    config: SessionConfig,
    ticker: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SpeechSession {
    /// Microphone-backed session using the Vosk engine.
    ///
    /// Engine-internal logging is turned down; recognition progress is
    /// reported through [`subscribe`] instead.
    ///
    /// [`subscribe`]: SpeechSession::subscribe
    #[cfg(feature = "vosk")]
    pub fn new(config: SessionConfig) -> Self {
        crate::engine::set_log_level(crate::engine::LogLevel::Quiet);
        Self::with_parts(
            Box::new(crate::audio::CpalRecorder::new()),
            Box::new(crate::engine::VoskFactory),
            config,
        )
    }

    /// Explicit-construction variant; callers supply the audio source and
    /// engine factory.
    pub fn with_parts(
        source: Box<dyn AudioSource>,
        factory: Box<dyn EngineFactory>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SharedState {
                    model_loaded: false,
                    transcription: String::new(),
                    status: Status::Ready,
                    elapsed_secs: 0,
                    last_partial: String::new(),
                }),
                engine: Mutex::new(None),
                subscribers: Mutex::new(Vec::new()),
                recording: AtomicBool::new(false),
            }),
            source: Mutex::new(source),
            factory,
            config,
            ticker: Mutex::new(None),
        }
    }

    /// Receiver for all state-change notifications and recognition results.
    pub fn subscribe(&self) -> Receiver<SpeechEvent> {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.inner.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let recording = self.is_recording();
        match self.inner.state.lock() {
            Ok(state) => SessionSnapshot {
                recording,
                model_loaded: state.model_loaded,
                transcription: state.transcription.clone(),
                status: state.status,
                elapsed_secs: state.elapsed_secs,
            },
            Err(_) => SessionSnapshot {
                recording,
                model_loaded: false,
                transcription: String::new(),
                status: Status::Ready,
                elapsed_secs: 0,
            },
        }
    }

    pub fn is_recording(&self) -> bool {
        self.inner.recording.load(Ordering::SeqCst)
    }

    pub fn transcription(&self) -> String {
        self.inner
            .state
            .lock()
            .map(|state| state.transcription.clone())
            .unwrap_or_default()
    }

    /// Attempt model discovery and load; a miss is not an error here.
    pub fn load_model_if_available(&self) -> bool {
        match model_store::locate_model_in(&self.config.model_search_roots) {
            Some(path) => self.load_model(Some(&path)).is_ok(),
            None => {
                log::info!("No speech model discovered; waiting for an explicit load");
                false
            }
        }
    }

    /// Load a model from `model_path`, or auto-discover one when `None`.
    ///
    /// Any previously loaded recognizer/model pair is released first, the
    /// recognizer strictly before its model.
    pub fn load_model(&self, model_path: Option<&Path>) -> Result<(), SpeechError> {
        let path = match model_path {
            Some(path) => path.to_path_buf(),
            None => match model_store::locate_model_in(&self.config.model_search_roots) {
                Some(path) => path,
                None => {
                    self.inner.report_error(
                        "No speech recognition model found. Please install a Vosk model."
                            .to_string(),
                    );
                    self.inner.set_status(Status::NoModel);
                    return Err(SpeechError::ModelNotFound);
                }
            },
        };

        self.inner.set_status(Status::LoadingModel);
        log::info!("Loading speech model from {}", path.display());

        if let Ok(mut guard) = self.inner.engine.lock() {
            guard.take();
        }

        match self.factory.load(&path, self.config.sample_rate as f32) {
            Ok(engine) => {
                if let Ok(mut guard) = self.inner.engine.lock() {
                    *guard = Some(engine);
                }
                self.set_model_loaded(true);
                self.inner.set_status(Status::Ready);
                log::info!("Speech model loaded");
                Ok(())
            }
            Err(err) => {
                let status = match err {
                    EngineError::RecognizerCreation => Status::RecognizerFailed,
                    _ => Status::ModelLoadFailed,
                };
                log::error!("Model load failed: {err}");
                self.inner.emit(SpeechEvent::Error(err.user_message().to_string()));
                self.set_model_loaded(false);
                self.inner.set_status(status);
                Err(err.into())
            }
        }
    }

    /// Start capturing and feeding the engine.
    pub fn start(&self) -> Result<(), SpeechError> {
        if self.inner.recording.swap(true, Ordering::SeqCst) {
            return Err(RecordingError::AlreadyRecording.into());
        }

        let model_loaded = self
            .inner
            .state
            .lock()
            .map(|state| state.model_loaded)
            .unwrap_or(false);
        if !model_loaded {
            self.inner.recording.store(false, Ordering::SeqCst);
            let message = "Model not loaded. Please load a model first.";
            self.inner.report_error(message.to_string());
            return Err(SpeechError::Session(message.to_string()));
        }

        // Fresh recognizer state for the new session.
        if let Ok(mut guard) = self.inner.engine.lock() {
            if let Some(engine) = guard.as_mut() {
                engine.reset();
            }
        }
        if let Ok(mut state) = self.inner.state.lock() {
            state.last_partial.clear();
            state.elapsed_secs = 0;
        }

        let sink_inner = self.inner.clone();
        let start_result = {
            let mut source = self.source.lock().map_err(|_| RecordingError::LockFailed)?;
            source.start(Box::new(move |pcm: &[i16]| sink_inner.ingest(pcm)))
        };

        if let Err(err) = start_result {
            self.inner.recording.store(false, Ordering::SeqCst);
            let status = match err {
                RecordingError::NoInputDevice => Status::NoMicrophone,
                _ => Status::AudioError,
            };
            self.inner.report_error(err.user_message().to_string());
            self.inner.set_status(status);
            return Err(err.into());
        }

        self.spawn_duration_ticker();

        self.inner.emit(SpeechEvent::RecordingChanged(true));
        self.inner.emit(SpeechEvent::DurationChanged(0));
        self.inner.set_status(Status::Listening);
        log::info!("Recording started");
        Ok(())
    }

    /// Stop capture, flush buffered audio through the feed path, then fetch
    /// the engine's trailing result before going idle.
    pub fn stop(&self) -> Result<(), SpeechError> {
        if self
            .inner
            .recording
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RecordingError::NotRecording.into());
        }

        // Source stop delivers buffered-but-unprocessed audio to the sink
        // before it returns.
        {
            let mut source = self.source.lock().map_err(|_| RecordingError::LockFailed)?;
            if let Err(err) = source.stop() {
                log::warn!("Audio source stop failed: {err}");
            }
        }

        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                let _ = handle.join();
            }
        }

        self.inner.finalize_utterance();

        self.inner.emit(SpeechEvent::RecordingChanged(false));
        self.inner.set_status(Status::Ready);
        log::info!("Recording stopped");
        Ok(())
    }

    /// Empty the accumulated transcription. Emits exactly one change event.
    pub fn clear_transcription(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.transcription.clear();
        }
        self.inner.emit(SpeechEvent::TranscriptionChanged(String::new()));
    }

    /// Feed conditioned 16 kHz mono samples directly, bypassing the audio
    /// source. Useful for non-microphone inputs.
    pub fn feed_pcm(&self, pcm: &[i16]) {
        self.inner.ingest(pcm);
    }

    fn spawn_duration_ticker(&self) {
        let inner = self.inner.clone();
        let started = Instant::now();

        let handle = thread::spawn(move || {
            let mut last = 0u64;
            while inner.recording.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(200));
                let elapsed = started.elapsed().as_secs();
                if elapsed != last && inner.recording.load(Ordering::SeqCst) {
                    last = elapsed;
                    if let Ok(mut state) = inner.state.lock() {
                        state.elapsed_secs = elapsed;
                    }
                    inner.emit(SpeechEvent::DurationChanged(elapsed));
                }
            }
        });

        if let Ok(mut ticker) = self.ticker.lock() {
            *ticker = Some(handle);
        }
    }

    fn set_model_loaded(&self, loaded: bool) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.model_loaded = loaded;
        }
        self.inner.emit(SpeechEvent::ModelLoadedChanged(loaded));
    }
}

impl Drop for SpeechSession {
    fn drop(&mut self) {
        if self.is_recording() {
            let _ = self.stop();
        }
    }
}
