//! Typewriter timeline and filter-graph construction.
//!
//! Pure functions: the same [`TextSpec`] and [`RenderGeometry`] always
//! produce the same events and the same filter string, byte for byte.

use std::fmt::Write as _;
use std::path::PathBuf;

/// Intro text with its timing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TextSpec {
    pub lines: Vec<String>,
    /// Intro duration in seconds. Always > 0.
    pub duration: f64,
    /// Per-character reveal delay in seconds. Only meaningful in
    /// typewriter mode. Always >= 0.
    pub char_delay: f64,
    pub font: Option<PathBuf>,
}

impl TextSpec {
    /// Split newline-separated CLI/recipe text into lines.
    pub fn from_text(text: &str, duration: f64, char_delay: f64, font: Option<PathBuf>) -> Self {
        Self {
            lines: text.split('\n').map(str::to_string).collect(),
            duration,
            char_delay,
            font,
        }
    }
}

/// Parameters the filter needs from the render target.
#[derive(Debug, Clone)]
pub struct RenderGeometry {
    /// Font file reference as it should appear in the filter (a bare file
    /// name; the render command runs with its working directory set to the
    /// directory holding the font).
    pub font_file: String,
    pub font_size: u32,
}

/// One reveal step: `chars` characters of `line` are visible during
/// `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TypewriterEvent {
    pub line: usize,
    pub chars: usize,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub events: Vec<TypewriterEvent>,
    pub filter: String,
}

/// Build the reveal schedule and the drawtext filter chain for `spec`.
///
/// Typewriter mode reveals each line character by character; every line is
/// scheduled independently and displayed simultaneously (stacked). A line
/// whose naive reveal time `len * char_delay` exceeds the duration has its
/// delay scaled by `duration / naive_total` so the line finishes exactly at
/// the duration — characters are never dropped. With typewriter mode off,
/// each line collapses to a single full-text overlay covering the whole
/// intro.
pub fn build_timeline(spec: &TextSpec, geometry: &RenderGeometry, typewriter: bool) -> Timeline {
    let line_count = spec.lines.len();
    let mut events = Vec::new();
    let mut filters = Vec::new();

    for (index, line) in spec.lines.iter().enumerate() {
        let chars: Vec<char> = line.chars().collect();
        if chars.is_empty() {
            continue;
        }
        let y = y_expression(index, line_count, geometry.font_size);

        if !typewriter {
            events.push(TypewriterEvent {
                line: index,
                chars: chars.len(),
                start: 0.0,
                end: spec.duration,
            });
            filters.push(drawtext(geometry, &escape(line), &y, None));
            continue;
        }

        let naive_total = chars.len() as f64 * spec.char_delay;
        let delay = if naive_total > spec.duration && naive_total > 0.0 {
            spec.char_delay * (spec.duration / naive_total)
        } else {
            spec.char_delay
        };

        for revealed in 1..=chars.len() {
            let start = (revealed - 1) as f64 * delay;
            let end = if revealed < chars.len() {
                revealed as f64 * delay
            } else {
                spec.duration
            };
            events.push(TypewriterEvent {
                line: index,
                chars: revealed,
                start,
                end,
            });

            let prefix: String = chars[..revealed].iter().collect();
            let window = format!("between(t,{start:.3},{end:.3})");
            filters.push(drawtext(geometry, &escape(&prefix), &y, Some(&window)));
        }
    }

    Timeline {
        events,
        filter: filters.join(","),
    }
}

/// Vertical placement expression for line `index` of `count` stacked
/// lines, centered as a block with 1.5x font-size spacing between lines.
fn y_expression(index: usize, count: usize, font_size: u32) -> String {
    if count <= 1 {
        return "(h-text_h)/2".to_string();
    }
    let spacing = (font_size as f64 * 1.5) as u64;
    let block = spacing * (count as u64 - 1);
    let offset = spacing * index as u64;
    if offset == 0 {
        format!("(h-text_h*{count}-{block})/2")
    } else {
        format!("(h-text_h*{count}-{block})/2+{offset}")
    }
}

fn drawtext(geometry: &RenderGeometry, text: &str, y: &str, enable: Option<&str>) -> String {
    let mut part = String::new();
    let _ = write!(
        part,
        "drawtext=fontfile={}:text='{}':fontsize={}:fontcolor=white:x=(w-text_w)/2:y={}",
        geometry.font_file, text, geometry.font_size, y
    );
    if let Some(window) = enable {
        let _ = write!(part, ":enable='{window}'");
    }
    part
}

/// Escape drawtext metacharacters the way the engine expects: backslashes
/// first, then single quotes.
fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('\'', "\\'")
}
