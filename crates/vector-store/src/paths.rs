use std::path::{Path, PathBuf};

pub const CACHE_DIR_NAME: &str = "skinmatch";
pub const MODELS_DIR_NAME: &str = "models";
pub const MODELS_MANIFEST_FILE: &str = "manifest.json";

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_CATALOG_FILE: &str = "skin_list.txt";
pub const DEFAULT_ALIAS_FILE: &str = "skin_name_mapping.json";
pub const DEFAULT_CACHE_FILE: &str = "cache/skin_embeddings.bin";

/// Directory holding ONNX models and `manifest.json`.
///
/// Lookup order: explicit override, `SKINMATCH_MODEL_DIR`, a `models/`
/// folder with a manifest next to the executable or above the working
/// directory, then the user cache directory.
#[must_use]
pub fn model_dir(explicit: Option<&Path>) -> PathBuf {
    if let Some(dir) = explicit {
        return dir.to_path_buf();
    }
    if let Ok(path) = std::env::var("SKINMATCH_MODEL_DIR") {
        return PathBuf::from(path);
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(found) = find_models_upwards(dir) {
                return found;
            }
        }
    }
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(found) = find_models_upwards(&cwd) {
            return found;
        }
    }

    if let Ok(path) = std::env::var("XDG_CACHE_HOME") {
        return PathBuf::from(path)
            .join(CACHE_DIR_NAME)
            .join(MODELS_DIR_NAME);
    }
    std::env::var("HOME")
        .map_or_else(|_| PathBuf::from("."), PathBuf::from)
        .join(".cache")
        .join(CACHE_DIR_NAME)
        .join(MODELS_DIR_NAME)
}

fn find_models_upwards(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(MODELS_DIR_NAME);
        if candidate.join(MODELS_MANIFEST_FILE).exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Sidecar lock file guarding writes of a cache artifact.
#[must_use]
pub fn lock_path_for(cache_path: &Path) -> PathBuf {
    let mut name = cache_path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    cache_path.with_file_name(name)
}
