//! On-disk dumps of what a turn received (`--logs`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chathub_core::ServerFrame;
use chrono::Utc;

/// Write each frame as pretty JSON to
/// `<dir>/<conversation_id>-<index>-<timestamp>.json`.
pub fn write_frames(dir: &Path, conversation_id: &str, frames: &[ServerFrame]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let mut written = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let path = dir.join(format!("{conversation_id}-{index}-{stamp}.json"));
        let body = serde_json::to_string_pretty(frame)?;
        std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }
    Ok(written)
}

/// Write the payloads exactly as received, one per line, to
/// `<dir>/<conversation_id>-<timestamp>.raw`. Nothing is written for an empty
/// turn.
pub fn write_raw(dir: &Path, conversation_id: &str, payloads: &[String]) -> Result<Option<PathBuf>> {
    if payloads.is_empty() {
        return Ok(None);
    }
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
    let path = dir.join(format!("{conversation_id}-{stamp}.raw"));
    let mut body = payloads.join("\n");
    body.push('\n');
    std::fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(Some(path))
}

/// Delete every `.json` and `.raw` dump in `dir`. Returns how many were
/// removed.
pub fn clear(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json" || ext == "raw") {
            std::fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}
