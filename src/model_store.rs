//! Filesystem discovery of Vosk model directories.
//!
//! Search order prefers locations bundled next to the executable over the
//! per-user data directory. A miss is not an error; the caller surfaces it.

use std::fs;
use std::path::{Path, PathBuf};

/// Directory names the locator tries inside each search root.
const MODEL_DIR_NAMES: &[&str] = &[
    "vosk-model-small-en-us-0.15",
    "vosk-model-small-en-in-0.4",
    "model",
];

/// Unpacked model downloads all share this prefix.
const MODEL_DIR_PREFIX: &str = "vosk-model";

/// True if `path` looks like a Vosk model directory itself.
pub fn is_model_dir(path: &Path) -> bool {
    path.join("am").join("final.mdl").exists() || path.join("graph").join("HCLG.fst").exists()
}

/// Search roots in preference order.
pub fn default_search_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            roots.push(dir.join("model"));
            roots.push(dir.join("..").join("model"));
            roots.push(dir.join("..").join("share").join("hushscribe").join("model"));
        }
    }

    if let Some(data) = dirs_next::data_dir() {
        roots.push(data.join("hushscribe").join("model"));
    }

    roots
}

/// Locate a model under the default search roots.
pub fn locate_model() -> Option<PathBuf> {
    locate_model_in(&default_search_roots())
}

/// Locate a model under explicit roots. Each root may itself be a model
/// directory, contain one of the commonly used model directory names, or
/// contain an unpacked `vosk-model-*` download.
pub fn locate_model_in(roots: &[PathBuf]) -> Option<PathBuf> {
    for root in roots {
        if !root.is_dir() {
            log::debug!("Model search: {} does not exist", root.display());
            continue;
        }

        if is_model_dir(root) {
            log::info!("Found model at {}", root.display());
            return Some(root.clone());
        }

        for name in MODEL_DIR_NAMES {
            let candidate = root.join(name);
            if candidate.is_dir() {
                log::info!("Found model at {}", candidate.display());
                return Some(candidate);
            }
        }

        if let Some(found) = scan_for_model(root) {
            return Some(found);
        }
    }

    log::info!("No model found in {} search root(s)", roots.len());
    None
}

fn scan_for_model(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let is_download = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(MODEL_DIR_PREFIX));

        if is_download && is_model_dir(&path) {
            log::info!("Found model at {}", path.display());
            return Some(path);
        }
    }

    None
}
