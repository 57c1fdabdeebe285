//! Panel rendering and time formatting.

use serde::Serialize;
use tokio::time::Instant;

use crate::protocol_constants::{
    MAX_REMOVE_BUTTONS, PROGRESS_BAR_WIDTH, REMOVE_BUTTONS_PER_ROW, UP_NEXT_CHAR_BUDGET,
};
use crate::session::Session;

/// Formats seconds as `MM:SS`, or `H:MM:SS` once there are hours.
pub fn fmt_time(secs: u64) -> String {
    let (m, s) = (secs / 60, secs % 60);
    let (h, m) = (m / 60, m % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m:02}:{s:02}")
    }
}

/// Formats seconds in Japanese units (`1時間2分3秒`), omitting zero parts.
pub fn fmt_time_jp(secs: u64) -> String {
    let (h, rem) = (secs / 3600, secs % 3600);
    let (m, s) = (rem / 60, rem % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{h}時間"));
    }
    if m > 0 {
        out.push_str(&format!("{m}分"));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{s}秒"));
    }
    out
}

/// Draws a `━━⚪──` style bar with the knob at `pos / total`.
pub fn make_bar(pos: u64, total: u64, width: usize) -> String {
    if total == 0 || width == 0 {
        return "─".repeat(width);
    }
    let pos = pos.min(total);
    let index = ((pos as f64 / total as f64) * (width - 1) as f64).round() as usize;
    let index = index.min(width - 1);
    format!("{}⚪{}", "━".repeat(index), "─".repeat(width - index - 1))
}

/// Keycap emoji for 0–10, `[n]` beyond.
pub fn num_emoji(n: usize) -> String {
    const KEYCAPS: [&str; 11] = [
        "0️⃣", "1️⃣", "2️⃣", "3️⃣", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣", "🔟",
    ];
    KEYCAPS
        .get(n)
        .map_or_else(|| format!("[{n}]"), |emoji| (*emoji).to_string())
}

/// A remove button on the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveButton {
    /// 1-based Up Next index.
    pub index: usize,
    pub label: String,
    /// Row 0 holds the transport controls.
    pub row: usize,
}

/// Platform-neutral description of the queue panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelView {
    pub title: String,
    pub now_playing: Option<String>,
    /// `[bar] MM:SS / MM:SS`, only once the track started and its length is known.
    pub progress: Option<String>,
    pub up_next: String,
    pub footer: String,
    pub loop_label: String,
    pub auto_leave_label: String,
    pub remove_buttons: Vec<RemoveButton>,
}

impl PanelView {
    /// Renders the panel from a session snapshot at `now`.
    pub fn render(session: &Session, now: Instant) -> Self {
        let current = session.current();
        let now_playing = current.map(|t| t.title.clone());

        let progress = match (current.and_then(|t| t.duration), session.clock().has_started()) {
            (Some(duration), true) if duration > 0 => {
                let pos = session.position(now);
                Some(format!(
                    "[{}] {} / {}",
                    make_bar(pos, duration, PROGRESS_BAR_WIDTH),
                    fmt_time(pos),
                    fmt_time(duration)
                ))
            }
            _ => None,
        };

        let titles: Vec<&str> = session.up_next().map(|t| t.title.as_str()).collect();
        let up_next = up_next_body(&titles);

        let remove_buttons = (1..=titles.len().min(MAX_REMOVE_BUTTONS))
            .map(|index| RemoveButton {
                index,
                label: format!("🗑 {index}"),
                row: 1 + (index - 1) / REMOVE_BUTTONS_PER_ROW,
            })
            .collect();

        let loop_label = session.loop_mode.label().to_string();
        let auto_leave_label = if session.auto_leave { "ON" } else { "OFF" }.to_string();

        Self {
            title: "🎶 Queue".to_string(),
            now_playing,
            progress,
            up_next,
            footer: format!("Loop: {loop_label} | Auto Leave: {auto_leave_label}"),
            loop_label,
            auto_leave_label,
            remove_buttons,
        }
    }

    /// Renders the panel as plain text (console front-ends, logs).
    pub fn to_text(&self) -> String {
        let mut out = format!("{}\n", self.title);
        match &self.now_playing {
            Some(title) => out.push_str(&format!("▶️ Now Playing: {title}\n")),
            None => out.push_str("Now Playing: Nothing\n"),
        }
        if let Some(progress) = &self.progress {
            out.push_str(progress);
            out.push('\n');
        }
        out.push_str("Up Next\n");
        out.push_str(&self.up_next);
        out.push('\n');
        out.push_str(&self.footer);
        out
    }
}

fn up_next_body(titles: &[&str]) -> String {
    if titles.is_empty() {
        return "Empty".to_string();
    }
    let mut lines = Vec::new();
    let mut chars = 0usize;
    for (i, title) in titles.iter().enumerate() {
        let n = i + 1;
        let line = format!("{} {}", num_emoji(n), title);
        let len = line.chars().count();
        if chars + len + 1 > UP_NEXT_CHAR_BUDGET {
            lines.push(format!("…and **{}** more", titles.len() - n + 1));
            break;
        }
        chars += len + 1;
        lines.push(line);
    }
    lines.join("\n")
}
