//! Styling for CLI output.
//!
//! Each stream is styled only when it is a terminal, so piped output and
//! redirected logs stay plain text.

use owo_colors::OwoColorize;
use panorec_core::CaptureStatus;
use std::io::IsTerminal;

/// Role of a piece of stdout text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Success,
    Info,
    /// Labels in summaries
    Label,
    /// Headings and the program name
    Strong,
    Path,
}

pub fn is_interactive() -> bool {
    std::io::stdout().is_terminal()
}

fn paint(enabled: bool, tone: Tone, text: &str) -> String {
    if !enabled {
        return text.to_string();
    }
    match tone {
        Tone::Success => text.green().to_string(),
        Tone::Info => text.cyan().to_string(),
        Tone::Label => text.dimmed().to_string(),
        Tone::Strong => text.bold().to_string(),
        Tone::Path => text.underline().to_string(),
    }
}

/// Style text bound for stdout.
pub fn styled(tone: Tone, text: &str) -> String {
    paint(is_interactive(), tone, text)
}

fn prefixed(label: &str, msg: &str, color: fn(&str) -> String) -> String {
    if std::io::stderr().is_terminal() {
        format!("{} {}", color(label), msg)
    } else {
        format!("{} {}", label, msg)
    }
}

/// Error line for stderr.
pub fn error(msg: &str) -> String {
    prefixed("error:", msg, |l| l.red().bold().to_string())
}

/// Warning line for stderr.
pub fn warning(msg: &str) -> String {
    prefixed("warning:", msg, |l| l.yellow().bold().to_string())
}

/// Frame counter; highlighted when non-zero and `alert` is set.
pub fn count(value: u64, alert: bool) -> String {
    let text = value.to_string();
    if !is_interactive() {
        return text;
    }
    if alert && value > 0 {
        text.yellow().bold().to_string()
    } else {
        text.cyan().to_string()
    }
}

/// Session status label, colored by lifecycle phase.
pub fn status(status: CaptureStatus) -> String {
    let text = status.as_str();
    if !is_interactive() {
        return text.to_string();
    }
    match status {
        CaptureStatus::Started => text.red().bold().to_string(),
        CaptureStatus::Stopped => text.yellow().to_string(),
        CaptureStatus::Finish => text.green().to_string(),
        CaptureStatus::NotStart => text.dimmed().to_string(),
    }
}

/// Plain progress line: status, scene time and frame counters.
pub fn progress_text(status: &str, seconds: u64, captured: u64, dropped: u64) -> String {
    format!(
        "[{}] {:02}:{:02}  {} frames captured, {} dropped",
        status,
        seconds / 60,
        seconds % 60,
        captured,
        dropped
    )
}

/// Progress line for an interactive terminal, rewritten in place with `\r`.
pub fn progress(state: CaptureStatus, seconds: u64, captured: u64, dropped: u64) -> String {
    if !is_interactive() {
        return progress_text(state.as_str(), seconds, captured, dropped);
    }
    let clock = format!("{:02}:{:02}", seconds / 60, seconds % 60);
    format!(
        "[{}] {}  {} frames captured, {} dropped",
        status(state),
        clock.yellow().bold(),
        count(captured, false),
        count(dropped, true)
    )
}
