//! Terminal colours for the interactive client.
//!
//! Respects the `NO_COLOR` env-var and the `--no-color` flag.

use chathub_core::TurnStatus;
use colored::Colorize;

// ── Global color toggle ─────────────────────────────────────────────────────

/// Initialise the colour system.
pub fn init_color(no_color_flag: bool) {
    let env_disabled = std::env::var("NO_COLOR")
        .map(|v| !v.is_empty())
        .unwrap_or(false);
    if no_color_flag || env_disabled {
        colored::control::set_override(false);
    }
}

// ── Palette ─────────────────────────────────────────────────────────────────

pub mod palette {
    pub const ACCENT: (u8, u8, u8) = (0x3D, 0x8B, 0xFF);
    pub const SUCCESS: (u8, u8, u8) = (0x2F, 0xBF, 0x71);
    pub const WARN: (u8, u8, u8) = (0xFF, 0xB0, 0x20);
    pub const ERROR: (u8, u8, u8) = (0xE2, 0x3D, 0x2D);
    pub const MUTED: (u8, u8, u8) = (0x8B, 0x7F, 0x77);
}

fn apply(text: &str, rgb: (u8, u8, u8)) -> String {
    text.truecolor(rgb.0, rgb.1, rgb.2).to_string()
}

pub fn accent(text: &str) -> String {
    let (r, g, b) = palette::ACCENT;
    text.truecolor(r, g, b).bold().to_string()
}

pub fn success(text: &str) -> String {
    apply(text, palette::SUCCESS)
}

pub fn warn(text: &str) -> String {
    apply(text, palette::WARN)
}

pub fn error(text: &str) -> String {
    apply(text, palette::ERROR)
}

pub fn muted(text: &str) -> String {
    apply(text, palette::MUTED)
}

/// Bracketed status tag shown while a turn is in flight.
pub fn status_tag(status: TurnStatus) -> String {
    let tag = format!("[{status}]");
    match status {
        TurnStatus::Finished => success(&tag),
        TurnStatus::Failed => error(&tag),
        TurnStatus::Searching => warn(&tag),
        _ => muted(&tag),
    }
}
