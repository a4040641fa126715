//! Incremental rendering of turn progress to the terminal.

use chathub_core::{TurnProgress, TurnStatus};

use crate::theme as t;

/// Tracks what has already been written so each update only prints the
/// new part of the answer.
#[derive(Debug, Default)]
pub struct ProgressPrinter {
    printed: String,
    last_status: Option<TurnStatus>,
}

impl ProgressPrinter {
    /// Text to write for this update, if any.
    pub fn update(&mut self, progress: &TurnProgress) -> Option<String> {
        let status_changed = self.last_status != Some(progress.status);
        self.last_status = Some(progress.status);

        match progress.status {
            TurnStatus::Writing | TurnStatus::Finished => {
                // Structured payloads (cards, adaptive JSON) are not shown.
                if progress.text.starts_with("{\"") || progress.text == self.printed {
                    return None;
                }
                let out = match progress.text.strip_prefix(self.printed.as_str()) {
                    Some(suffix) if !self.printed.is_empty() => suffix.to_string(),
                    _ if self.printed.is_empty() => progress.text.clone(),
                    // The service rewrote its answer: start over on a fresh line.
                    _ => format!("\n{}", progress.text),
                };
                self.printed.clone_from(&progress.text);
                Some(out)
            }
            TurnStatus::Searching => Some(format!(
                "{} {}\n",
                t::status_tag(progress.status),
                t::muted(&progress.text)
            )),
            TurnStatus::Delivered if status_changed => {
                Some(format!("{}\n", t::status_tag(progress.status)))
            }
            _ => None,
        }
    }

    /// Whether any answer text has been written.
    pub fn wrote_answer(&self) -> bool {
        !self.printed.is_empty()
    }
}
