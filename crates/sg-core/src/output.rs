//! Output shaping: the byte cap applied to captured streams, and the
//! raw/json/table renderings offered to callers.

use std::sync::LazyLock;

use regex::Regex;
use sg_protocol::OutputFormat;

/// Marker appended to a stream that was cut at the cap.
pub fn truncation_marker(total: usize, shown: usize) -> String {
    format!("\n[output truncated: {total} bytes total, showing first {shown}]")
}

/// Cut `text` to at most `cap` bytes on a char boundary and append the
/// truncation marker. Text within the cap is returned unchanged.
pub fn truncate_output(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut cut = cap;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut out = String::with_capacity(cut + 64);
    out.push_str(&text[..cut]);
    out.push_str(&truncation_marker(text.len(), cut));
    out
}

/// Render captured output for the caller.
pub fn format_output(raw: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Raw => raw.to_string(),
        OutputFormat::Json => to_json(raw),
        OutputFormat::Table => to_table(raw).unwrap_or_else(|| raw.to_string()),
    }
}

/// Pretty-print output that already is JSON, otherwise wrap it in a text
/// envelope.
fn to_json(raw: &str) -> String {
    let value = match serde_json::from_str::<serde_json::Value>(raw.trim()) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "output": raw,
            "format": "text",
            "timestamp": chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }),
    };
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string())
}

static MULTI_SPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}").expect("column gap pattern is valid and tested"));

#[derive(Debug, Clone, Copy)]
enum Delimiter {
    Tab,
    Comma,
    Pipe,
    Spaces,
}

impl Delimiter {
    const ALL: [Delimiter; 4] = [
        Delimiter::Tab,
        Delimiter::Comma,
        Delimiter::Pipe,
        Delimiter::Spaces,
    ];

    fn split(self, line: &str) -> Vec<String> {
        let line = line.trim();
        let cells: Vec<&str> = match self {
            Delimiter::Tab => line.split('\t').collect(),
            Delimiter::Comma => line.split(',').collect(),
            Delimiter::Pipe => line
                .trim_start_matches('|')
                .trim_end_matches('|')
                .split('|')
                .collect(),
            Delimiter::Spaces => MULTI_SPACE.split(line).collect(),
        };
        cells.into_iter().map(|c| c.trim().to_string()).collect()
    }
}

/// A header plus at least two data rows, all with the same number of
/// columns (at least two) under one delimiter.
fn detect(lines: &[&str]) -> Option<Vec<Vec<String>>> {
    if lines.len() < 3 {
        return None;
    }
    Delimiter::ALL.iter().find_map(|delim| {
        let rows: Vec<Vec<String>> = lines.iter().map(|l| delim.split(l)).collect();
        let width = rows[0].len();
        let uniform = width >= 2 && rows.iter().all(|r| r.len() == width);
        uniform.then_some(rows)
    })
}

fn to_table(raw: &str) -> Option<String> {
    let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
    let rows = detect(&lines)?;

    let columns = rows[0].len();
    let widths: Vec<usize> = (0..columns)
        .map(|i| {
            rows.iter()
                .map(|r| r[i].chars().count())
                .max()
                .unwrap_or(0)
                .max(3)
        })
        .collect();

    let render = |cells: &[String]| -> String {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, w)| format!("{cell:<w$}"))
            .collect();
        padded.join(" | ").trim_end().to_string()
    };

    let mut out = Vec::with_capacity(rows.len() + 1);
    out.push(render(&rows[0]));
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.extend(rows[1..].iter().map(|r| render(r)));
    Some(out.join("\n"))
}
