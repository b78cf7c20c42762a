use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use hushscribe::audio::{AudioSource, PcmSink, RecordingError};
use hushscribe::engine::{Acceptance, EngineError, EngineFactory, Transcriber};
use hushscribe::{
    SessionConfig, SpeechError, SpeechEvent, SpeechSession, Status,
};

/// One scripted engine response per waveform chunk.
#[derive(Clone, Copy)]
enum Step {
    Partial(&'static str),
    Utterance(&'static str),
}

struct ScriptedEngine {
    steps: VecDeque<Step>,
    pending_result: String,
    pending_partial: String,
    final_text: &'static str,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Transcriber for ScriptedEngine {
    fn accept_pcm16(&mut self, pcm: &[i16]) -> Result<Acceptance, EngineError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("accept:{}", pcm.len()));

        match self.steps.pop_front() {
            Some(Step::Partial(text)) => {
                self.pending_partial = format!(r#"{{"partial": "{text}"}}"#);
                Ok(Acceptance::Running)
            }
            Some(Step::Utterance(text)) => {
                self.pending_result = format!(r#"{{"text": "{text}"}}"#);
                Ok(Acceptance::Utterance)
            }
            None => {
                self.pending_partial = r#"{"partial": ""}"#.to_string();
                Ok(Acceptance::Running)
            }
        }
    }

    fn result_json(&mut self) -> String {
        self.pending_result.clone()
    }

    fn partial_json(&mut self) -> String {
        self.pending_partial.clone()
    }

    fn final_json(&mut self) -> String {
        self.calls.lock().unwrap().push("final".to_string());
        format!(r#"{{"text": "{}"}}"#, self.final_text)
    }

    fn reset(&mut self) {
        self.calls.lock().unwrap().push("reset".to_string());
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        self.calls.lock().unwrap().push("drop".to_string());
    }
}

#[derive(Clone, Copy)]
enum FailKind {
    Model,
    Recognizer,
}

struct ScriptedFactory {
    steps: Mutex<VecDeque<Step>>,
    final_text: &'static str,
    calls: Arc<Mutex<Vec<String>>>,
    fail: Option<FailKind>,
}

impl ScriptedFactory {
    fn new(steps: &[Step], final_text: &'static str, calls: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            steps: Mutex::new(steps.iter().copied().collect()),
            final_text,
            calls,
            fail: None,
        }
    }

    fn failing(kind: FailKind) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            final_text: "",
            calls: Arc::new(Mutex::new(Vec::new())),
            fail: Some(kind),
        }
    }
}

impl EngineFactory for ScriptedFactory {
    fn load(
        &self,
        model_dir: &Path,
        _sample_rate: f32,
    ) -> Result<Box<dyn Transcriber>, EngineError> {
        self.calls.lock().unwrap().push("load".to_string());
        match self.fail {
            Some(FailKind::Model) => {
                return Err(EngineError::ModelCreation(model_dir.display().to_string()))
            }
            Some(FailKind::Recognizer) => return Err(EngineError::RecognizerCreation),
            None => {}
        }

        let steps = std::mem::take(&mut *self.steps.lock().unwrap());
        Ok(Box::new(ScriptedEngine {
            steps,
            pending_result: String::new(),
            pending_partial: String::new(),
            final_text: self.final_text,
            calls: self.calls.clone(),
        }))
    }
}

/// Feeds `live` chunks when started and `tail` chunks when stopped, matching
/// the flush-on-stop contract.
struct BufferedSource {
    sink: Option<PcmSink>,
    live: Vec<Vec<i16>>,
    tail: Vec<Vec<i16>>,
}

impl BufferedSource {
    fn new(live: Vec<Vec<i16>>, tail: Vec<Vec<i16>>) -> Self {
        Self {
            sink: None,
            live,
            tail,
        }
    }

    fn silent() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl AudioSource for BufferedSource {
    fn start(&mut self, mut sink: PcmSink) -> Result<(), RecordingError> {
        for chunk in self.live.drain(..) {
            sink(&chunk);
        }
        self.sink = Some(sink);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), RecordingError> {
        let mut sink = self.sink.take().ok_or(RecordingError::NotRecording)?;
        for chunk in self.tail.drain(..) {
            sink(&chunk);
        }
        Ok(())
    }
}

struct FailingSource;

impl AudioSource for FailingSource {
    fn start(&mut self, _sink: PcmSink) -> Result<(), RecordingError> {
        Err(RecordingError::NoInputDevice)
    }

    fn stop(&mut self) -> Result<(), RecordingError> {
        Err(RecordingError::NotRecording)
    }
}

fn temp_model_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "hushscribe_{}_{}",
        label,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    std::fs::create_dir_all(dir.join("am")).expect("model dir should be creatable");
    std::fs::write(dir.join("am").join("final.mdl"), b"ok").expect("write should succeed");
    dir
}

fn test_config() -> SessionConfig {
    SessionConfig {
        sample_rate: 16_000,
        // No discovery; tests load with explicit paths.
        model_search_roots: Vec::new(),
    }
}

fn drain(rx: &Receiver<SpeechEvent>) -> Vec<SpeechEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn fresh_session_snapshot_is_idle() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );

    let snapshot = session.snapshot();
    assert!(!snapshot.recording);
    assert!(!snapshot.model_loaded);
    assert_eq!(snapshot.transcription, "");
    assert_eq!(snapshot.status, Status::Ready);
    assert_eq!(snapshot.elapsed_secs, 0);
}

#[test]
fn load_model_reports_missing_model() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    let rx = session.subscribe();

    let result = session.load_model(None);
    assert!(matches!(result, Err(SpeechError::ModelNotFound)));

    let events = drain(&rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, SpeechEvent::Error(msg) if msg.contains("model"))));
    assert!(events.contains(&SpeechEvent::StatusChanged(Status::NoModel)));
    // The loaded flag never changed, so no notification for it.
    assert!(!events
        .iter()
        .any(|e| matches!(e, SpeechEvent::ModelLoadedChanged(_))));
    assert!(!session.snapshot().model_loaded);
}

#[test]
fn repeated_model_misses_notify_status_once() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    let rx = session.subscribe();

    assert!(session.load_model(None).is_err());
    assert!(session.load_model(None).is_err());

    let events = drain(&rx);
    // Errors surface every time; the unchanged status notifies only once.
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SpeechEvent::Error(_)))
            .count(),
        2
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SpeechEvent::StatusChanged(Status::NoModel)))
            .count(),
        1
    );
    assert_eq!(session.snapshot().status, Status::NoModel);
}

#[test]
fn autoload_miss_is_silent() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    let rx = session.subscribe();

    assert!(!session.load_model_if_available());

    assert!(drain(&rx).is_empty(), "a miss must not notify subscribers");
    let snapshot = session.snapshot();
    assert!(!snapshot.model_loaded);
    assert_eq!(snapshot.status, Status::Ready);
}

#[test]
fn autoload_uses_a_discovered_model() {
    let root = temp_model_dir("autoload");
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        SessionConfig {
            sample_rate: 16_000,
            model_search_roots: vec![root.clone()],
        },
    );
    let rx = session.subscribe();

    assert!(session.load_model_if_available());

    assert!(drain(&rx).contains(&SpeechEvent::ModelLoadedChanged(true)));
    assert!(session.snapshot().model_loaded);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn load_model_success_notifies_and_reaches_ready() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    let rx = session.subscribe();

    session
        .load_model(Some(Path::new("any-model-dir")))
        .expect("scripted load should succeed");

    let events = drain(&rx);
    assert_eq!(
        events,
        vec![
            SpeechEvent::StatusChanged(Status::LoadingModel),
            SpeechEvent::ModelLoadedChanged(true),
            SpeechEvent::StatusChanged(Status::Ready),
        ]
    );
    assert!(session.snapshot().model_loaded);
}

#[test]
fn model_load_failure_sets_failure_status() {
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::failing(FailKind::Model)),
        test_config(),
    );
    let rx = session.subscribe();

    let result = session.load_model(Some(Path::new("broken-model")));
    assert!(result.is_err());

    let events = drain(&rx);
    assert!(events.contains(&SpeechEvent::StatusChanged(Status::ModelLoadFailed)));
    assert!(events.contains(&SpeechEvent::ModelLoadedChanged(false)));
    assert!(events.iter().any(|e| matches!(e, SpeechEvent::Error(_))));
}

#[test]
fn recognizer_failure_is_distinguished_from_model_failure() {
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::failing(FailKind::Recognizer)),
        test_config(),
    );
    let rx = session.subscribe();

    assert!(session.load_model(Some(Path::new("m"))).is_err());

    let events = drain(&rx);
    assert!(events.contains(&SpeechEvent::StatusChanged(Status::RecognizerFailed)));
}

#[test]
fn start_without_model_is_rejected() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    let rx = session.subscribe();

    assert!(session.start().is_err());
    assert!(!session.is_recording());

    let events = drain(&rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, SpeechEvent::Error(msg) if msg.contains("load a model"))));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SpeechEvent::RecordingChanged(true))));
}

#[test]
fn missing_microphone_sets_status_and_leaves_session_idle() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(FailingSource),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    session
        .load_model(Some(Path::new("m")))
        .expect("scripted load should succeed");
    let rx = session.subscribe();

    let result = session.start();
    assert!(matches!(
        result,
        Err(SpeechError::Recording(RecordingError::NoInputDevice))
    ));
    assert!(!session.is_recording());

    let events = drain(&rx);
    assert!(events.contains(&SpeechEvent::StatusChanged(Status::NoMicrophone)));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SpeechEvent::RecordingChanged(true))));
}

#[test]
fn stop_without_start_is_rejected() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );

    assert!(matches!(
        session.stop(),
        Err(SpeechError::Recording(RecordingError::NotRecording))
    ));
}

#[test]
fn full_session_publishes_partials_finals_and_flush() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let script = [
        Step::Partial("hel"),
        Step::Partial("hel"),
        Step::Partial("hello"),
        Step::Utterance("hello world"),
    ];
    let live: Vec<Vec<i16>> = (0..script.len()).map(|_| vec![0i16; 160]).collect();
    let tail = vec![vec![0i16; 80]];

    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::new(live, tail)),
        Box::new(ScriptedFactory::new(&script, "goodbye", calls.clone())),
        test_config(),
    );
    session
        .load_model(Some(Path::new("m")))
        .expect("scripted load should succeed");
    let rx = session.subscribe();

    session.start().expect("start should succeed");
    assert!(session.is_recording());
    session.stop().expect("stop should succeed");
    assert!(!session.is_recording());

    let events = drain(&rx);

    // Repeated identical partials collapse into one notification.
    let partials: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SpeechEvent::Partial(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(partials, vec!["hel", "hello"]);

    let finals: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SpeechEvent::Final(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(finals, vec!["hello world", "goodbye"]);

    let transcriptions: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SpeechEvent::TranscriptionChanged(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(transcriptions, vec!["hello world", "hello world goodbye"]);

    assert!(events.contains(&SpeechEvent::RecordingChanged(true)));
    assert!(events.contains(&SpeechEvent::StatusChanged(Status::Listening)));
    assert!(events.contains(&SpeechEvent::RecordingChanged(false)));
    assert!(events.contains(&SpeechEvent::StatusChanged(Status::Ready)));

    assert_eq!(session.transcription(), "hello world goodbye");

    // The engine was reset before audio flowed and flushed exactly once.
    let calls = calls.lock().unwrap();
    let first_accept = calls
        .iter()
        .position(|c| c.starts_with("accept"))
        .expect("audio should reach the engine");
    let reset = calls
        .iter()
        .position(|c| c == "reset")
        .expect("start should reset the engine");
    assert!(reset < first_accept, "reset must precede audio: {calls:?}");
    assert_eq!(calls.iter().filter(|c| *c == "final").count(), 1);
    // Four live chunks plus the flushed tail chunk.
    assert_eq!(calls.iter().filter(|c| c.starts_with("accept")).count(), 5);
    // Flushed audio reaches the engine before the finalize call.
    let last_accept = calls.iter().rposition(|c| c.starts_with("accept")).unwrap();
    let finalize = calls.iter().position(|c| c == "final").unwrap();
    assert!(last_accept < finalize, "flush must precede finalize: {calls:?}");
}

#[test]
fn silent_session_publishes_no_text() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let live = vec![vec![0i16; 160]];

    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::new(live, Vec::new())),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    session
        .load_model(Some(Path::new("m")))
        .expect("scripted load should succeed");
    let rx = session.subscribe();

    session.start().expect("start should succeed");
    session.stop().expect("stop should succeed");

    let events = drain(&rx);
    assert!(!events.iter().any(|e| matches!(
        e,
        SpeechEvent::Partial(_) | SpeechEvent::Final(_) | SpeechEvent::TranscriptionChanged(_)
    )));
    assert_eq!(session.transcription(), "");
}

#[test]
fn starting_twice_is_rejected() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );
    session
        .load_model(Some(Path::new("m")))
        .expect("scripted load should succeed");

    session.start().expect("first start should succeed");
    assert!(matches!(
        session.start(),
        Err(SpeechError::Recording(RecordingError::AlreadyRecording))
    ));

    session.stop().expect("stop should succeed");
}

#[test]
fn clear_transcription_emits_one_change() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let script = [Step::Utterance("some words")];

    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&script, "", calls)),
        test_config(),
    );
    session
        .load_model(Some(Path::new("m")))
        .expect("scripted load should succeed");
    session.feed_pcm(&[0i16; 160]);
    assert_eq!(session.transcription(), "some words");

    let rx = session.subscribe();
    session.clear_transcription();

    let events = drain(&rx);
    assert_eq!(
        events,
        vec![SpeechEvent::TranscriptionChanged(String::new())]
    );
    assert_eq!(session.transcription(), "");
}

#[test]
fn feed_pcm_without_engine_is_a_noop() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );

    session.feed_pcm(&[0i16; 160]);
    assert_eq!(session.transcription(), "");
}

#[test]
fn empty_chunks_are_skipped() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls.clone())),
        test_config(),
    );
    session
        .load_model(Some(Path::new("m")))
        .expect("scripted load should succeed");

    session.feed_pcm(&[]);
    assert!(!calls.lock().unwrap().iter().any(|c| c.starts_with("accept")));
}

#[test]
fn reloading_releases_the_old_engine_first() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let script = [Step::Utterance("first engine")];

    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&script, "", calls.clone())),
        test_config(),
    );
    session
        .load_model(Some(Path::new("m")))
        .expect("first load should succeed");
    session.feed_pcm(&[0i16; 160]);
    assert_eq!(session.transcription(), "first engine");

    // The factory's script is spent, so the second engine yields no text.
    session
        .load_model(Some(Path::new("m")))
        .expect("second load should succeed");
    session.feed_pcm(&[0i16; 160]);
    assert_eq!(session.transcription(), "first engine");

    // The first engine is dropped before the replacement is created.
    let calls = calls.lock().unwrap();
    let first_drop = calls
        .iter()
        .position(|c| c == "drop")
        .expect("old engine should be released");
    let second_load = calls
        .iter()
        .rposition(|c| c == "load")
        .expect("second load should reach the factory");
    assert!(
        first_drop < second_load,
        "old engine must be released before the new one is created: {calls:?}"
    );
}

#[test]
fn dropped_subscribers_do_not_block_events() {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let session = SpeechSession::with_parts(
        Box::new(BufferedSource::silent()),
        Box::new(ScriptedFactory::new(&[], "", calls)),
        test_config(),
    );

    drop(session.subscribe());
    let rx = session.subscribe();

    session
        .load_model(Some(Path::new("m")))
        .expect("scripted load should succeed");

    assert!(drain(&rx).contains(&SpeechEvent::ModelLoadedChanged(true)));
}
