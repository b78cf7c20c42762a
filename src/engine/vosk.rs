//! Safe ownership wrappers over the Vosk C API.
//!
//! A [`Recognizer`] keeps an `Arc` to the [`Model`] it was created from, so
//! the model handle is released strictly after every recognizer bound to it,
//! on every path including errors.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::ptr::NonNull;
use std::sync::Arc;

use super::sys;
use super::{Acceptance, EngineError, EngineFactory, Transcriber};

/// Engine log verbosity, configured process-wide once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Info and error messages, no debug output.
    Default,
    /// No info messages.
    Quiet,
    /// No engine output at all.
    Silent,
}

pub fn set_log_level(level: LogLevel) {
    let raw = match level {
        LogLevel::Default => 0,
        LogLevel::Quiet => -1,
        LogLevel::Silent => -2,
    };
    unsafe { sys::vosk_set_log_level(raw) };
}

/// Loaded model data. The engine reference-counts it internally; the `Arc`
/// on top makes the release ordering visible to the borrow checker.
pub struct Model {
    ptr: NonNull<sys::VoskModel>,
}

// The engine documents model data as shareable across threads.
unsafe impl Send for Model {}
unsafe impl Sync for Model {}

impl Model {
    pub fn open(model_dir: &Path) -> Result<Arc<Self>, EngineError> {
        let path = model_dir
            .to_str()
            .ok_or_else(|| EngineError::ModelPath(model_dir.display().to_string()))?;
        let c_path =
            CString::new(path).map_err(|_| EngineError::ModelPath(path.to_string()))?;

        let ptr = unsafe { sys::vosk_model_new(c_path.as_ptr()) };
        NonNull::new(ptr)
            .map(|ptr| Arc::new(Self { ptr }))
            .ok_or_else(|| EngineError::ModelCreation(model_dir.display().to_string()))
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        log::debug!("Releasing speech model");
        unsafe { sys::vosk_model_free(self.ptr.as_ptr()) };
    }
}

/// Streaming recognizer bound to one model and one sample rate.
pub struct Recognizer {
    ptr: NonNull<sys::VoskRecognizer>,
    // Keeps the model alive until after the recognizer handle is freed.
    _model: Arc<Model>,
}

unsafe impl Send for Recognizer {}

impl Recognizer {
    pub fn new(model: Arc<Model>, sample_rate: f32) -> Result<Self, EngineError> {
        let ptr = unsafe { sys::vosk_recognizer_new(model.ptr.as_ptr(), sample_rate) };
        let ptr = NonNull::new(ptr).ok_or(EngineError::RecognizerCreation)?;
        Ok(Self { ptr, _model: model })
    }

    /// Include per-word timing in full results.
    pub fn set_words(&mut self, enabled: bool) {
        unsafe { sys::vosk_recognizer_set_words(self.ptr.as_ptr(), enabled as c_int) };
    }

    fn read_result(ptr: *const c_char) -> String {
        if ptr.is_null() {
            return String::new();
        }
        // The engine owns the buffer; it stays valid until the next call on
        // this recognizer, so copy it out immediately.
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
    }
}

impl Drop for Recognizer {
    fn drop(&mut self) {
        unsafe { sys::vosk_recognizer_free(self.ptr.as_ptr()) };
    }
}

impl Transcriber for Recognizer {
    fn accept_pcm16(&mut self, pcm: &[i16]) -> Result<Acceptance, EngineError> {
        if pcm.len() > c_int::MAX as usize {
            return Err(EngineError::Accept(pcm.len()));
        }

        let status = unsafe {
            sys::vosk_recognizer_accept_waveform_s(
                self.ptr.as_ptr(),
                pcm.as_ptr(),
                pcm.len() as c_int,
            )
        };

        match status {
            s if s > 0 => Ok(Acceptance::Utterance),
            0 => Ok(Acceptance::Running),
            _ => Err(EngineError::Accept(pcm.len())),
        }
    }

    fn result_json(&mut self) -> String {
        Self::read_result(unsafe { sys::vosk_recognizer_result(self.ptr.as_ptr()) })
    }

    fn partial_json(&mut self) -> String {
        Self::read_result(unsafe { sys::vosk_recognizer_partial_result(self.ptr.as_ptr()) })
    }

    fn final_json(&mut self) -> String {
        Self::read_result(unsafe { sys::vosk_recognizer_final_result(self.ptr.as_ptr()) })
    }

    fn reset(&mut self) {
        unsafe { sys::vosk_recognizer_reset(self.ptr.as_ptr()) };
    }
}

/// Default factory: one model/recognizer pair per load, word timing on.
pub struct VoskFactory;

impl EngineFactory for VoskFactory {
    fn load(
        &self,
        model_dir: &Path,
        sample_rate: f32,
    ) -> Result<Box<dyn Transcriber>, EngineError> {
        let model = Model::open(model_dir)?;
        let mut recognizer = Recognizer::new(model, sample_rate)?;
        recognizer.set_words(true);
        Ok(Box::new(recognizer))
    }
}
