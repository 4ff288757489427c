//! Intro clip synthesis.
//!
//! Builds the engine command that renders a black clip with the overlay
//! text, forcing every encoding parameter to match the probed source so the
//! concat demuxer can join the two without re-encoding.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::engine::{Engine, EngineCommand, EngineError};
use crate::probe::{self, StreamParameters};
use crate::timeline::{RenderGeometry, TextSpec, Timeline, build_timeline};

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("no usable font found; pass a font path or place font.ttf next to the executable")]
    FontNotFound,
    #[error("failed to stage font '{path}': {source}")]
    FontStage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A rendered intro clip plus how it was produced.
#[derive(Debug)]
pub struct IntroClip {
    pub path: PathBuf,
    pub duration: f64,
    /// True when a requested font could not be found and a bundled/system
    /// font was substituted.
    pub font_fallback: bool,
    pub timeline: Timeline,
}

/// Title size scales with the frame height.
pub fn font_size_for(height: u32) -> u32 {
    (f64::from(height) * 0.055) as u32
}

/// anullsrc layout name for a channel count.
pub fn channel_layout(channels: u32) -> String {
    match channels {
        1 => "mono".to_string(),
        2 => "stereo".to_string(),
        6 => "5.1".to_string(),
        other => format!("{other}ch"),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSelection {
    pub name: String,
    pub extra_args: &'static [&'static str],
}

/// Map a probed codec id onto the engine's encoder for the same family.
/// Unknown codecs are passed through verbatim; the engine rejects them
/// with its own diagnostic if it has no encoder of that name.
pub fn encoder_for(codec: &str) -> EncoderSelection {
    const CRF: &[&str] = &["-b:v", "0", "-crf", "30"];
    let (name, extra_args): (&str, &'static [&'static str]) = match codec.to_lowercase().as_str() {
        "hevc" | "h265" | "x265" => ("libx265", &["-x265-params", "log-level=error"]),
        "h264" | "avc" | "x264" => ("libx264", &[]),
        "vp9" => ("libvpx-vp9", CRF),
        "vp8" => ("libvpx", CRF),
        "av1" => ("libaom-av1", CRF),
        "mpeg4" | "mp4v" => ("mpeg4", &[]),
        "mpeg2video" | "mpeg2" => ("mpeg2video", &[]),
        other => {
            return EncoderSelection {
                name: other.to_string(),
                extra_args: &[],
            };
        }
    };
    EncoderSelection {
        name: name.to_string(),
        extra_args,
    }
}

/// Locate the font to render with: the requested path if it exists, else
/// the first hit in `candidates`. The boolean is the fallback flag — true
/// when an explicitly requested font was missing and a substitute was used.
pub fn resolve_font_in(
    requested: Option<&Path>,
    candidates: &[PathBuf],
) -> Result<(PathBuf, bool), SynthesisError> {
    if let Some(path) = requested
        && path.exists()
    {
        return Ok((path.to_path_buf(), false));
    }

    let substituted = requested.is_some();
    for candidate in candidates {
        if candidate.exists() {
            return Ok((candidate.clone(), substituted));
        }
    }

    Err(SynthesisError::FontNotFound)
}

pub fn resolve_font(requested: Option<&Path>) -> Result<(PathBuf, bool), SynthesisError> {
    resolve_font_in(requested, &default_font_candidates())
}

/// Bundled fonts beside the executable, then common system fonts.
fn default_font_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(exe) = std::env::current_exe()
        && let Some(dir) = exe.parent()
    {
        for name in ["font.ttf", "font.otf"] {
            candidates.push(dir.join(name));
            candidates.push(dir.join("fonts").join(name));
        }
    }

    if cfg!(target_os = "windows") {
        candidates.push(PathBuf::from("C:/Windows/Fonts/msyh.ttc"));
        candidates.push(PathBuf::from("C:/Windows/Fonts/simsun.ttc"));
    } else if cfg!(target_os = "macos") {
        candidates.push(PathBuf::from("/System/Library/Fonts/PingFang.ttc"));
        candidates.push(PathBuf::from("/Library/Fonts/Arial.ttf"));
    } else {
        candidates.push(PathBuf::from(
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        ));
        candidates.push(PathBuf::from(
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        ));
    }

    candidates
}

/// Assemble the render invocation. The command runs inside `work_dir` and
/// references the font by bare file name, sidestepping drawtext's path
/// escaping rules on absolute paths.
pub fn build_render_command(
    engine: &Engine,
    params: &StreamParameters,
    spec: &TextSpec,
    typewriter: bool,
    font_file: &str,
    work_dir: &Path,
    output_name: &str,
) -> (EngineCommand, Timeline) {
    let geometry = RenderGeometry {
        font_file: font_file.to_string(),
        font_size: font_size_for(params.height),
    };
    let timeline = build_timeline(spec, &geometry, typewriter);

    // fps filter rather than -r: keeps the synthesized time base aligned
    // with the source.
    let filter = if timeline.filter.is_empty() {
        format!("fps={}", params.frame_rate)
    } else {
        format!("{},fps={}", timeline.filter, params.frame_rate)
    };

    let duration = spec.duration;
    let mut command = EngineCommand::new(&engine.ffmpeg)
        .args(["-y", "-v", "error", "-f", "lavfi", "-i"])
        .arg(format!(
            "color=black:s={}x{}:d={}",
            params.width, params.height, duration
        ));

    if let Some(audio) = &params.audio {
        command = command.args(["-f", "lavfi", "-i"]).arg(format!(
            "anullsrc=channel_layout={}:sample_rate={}:duration={}",
            channel_layout(audio.channels),
            audio.sample_rate,
            duration
        ));
    }

    let encoder = encoder_for(&params.video_codec);
    command = command
        .args(["-vf", filter.as_str()])
        .args(["-t", duration.to_string().as_str()])
        .args(["-pix_fmt", params.pixel_format.as_str()])
        .args(["-c:v", encoder.name.as_str()])
        .args(["-preset", "ultrafast"])
        .args(encoder.extra_args);

    if let Some(audio) = &params.audio {
        command = command
            .args(["-map", "0:v", "-map", "1:a"])
            .args(["-c:a", audio.codec.as_str()]);
    } else {
        command = command.args(["-map", "0:v"]);
    }

    (command.arg(output_name).current_dir(work_dir), timeline)
}

/// Render the intro clip into `work_dir`, matching `params`.
pub fn synthesize(
    engine: &Engine,
    params: &StreamParameters,
    spec: &TextSpec,
    typewriter: bool,
    work_dir: &Path,
) -> Result<IntroClip, SynthesisError> {
    let (font_path, font_fallback) = resolve_font(spec.font.as_deref())?;
    if font_fallback {
        warn!(
            requested = %spec.font.as_deref().unwrap_or(Path::new("")).display(),
            substitute = %font_path.display(),
            "Requested font not found, using fallback"
        );
    }

    let font_name = stage_font(&font_path, work_dir)?;

    let output_name = "intro.mp4";
    let (command, timeline) =
        build_render_command(engine, params, spec, typewriter, &font_name, work_dir, output_name);
    command.run()?;

    let clip_path = work_dir.join(output_name);
    verify_duration(engine, &clip_path, spec.duration);

    Ok(IntroClip {
        path: clip_path,
        duration: spec.duration,
        font_fallback,
        timeline,
    })
}

/// Copy the font into the work dir so the filter can use a relative file
/// name, and return that name.
fn stage_font(font_path: &Path, work_dir: &Path) -> Result<String, SynthesisError> {
    let name = font_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "font.ttf".to_string());

    let staged = work_dir.join(&name);
    if staged != *font_path {
        fs::copy(font_path, &staged).map_err(|source| SynthesisError::FontStage {
            path: font_path.to_path_buf(),
            source,
        })?;
    }
    Ok(name)
}

/// Re-probe the rendered clip and warn when its duration drifts from the
/// requested one by more than 0.1 s; drift at this step surfaces later as
/// concat timestamp trouble.
fn verify_duration(engine: &Engine, clip: &Path, expected: f64) {
    match probe::probe_duration(engine, clip) {
        Ok(Some(actual)) if (actual - expected).abs() > 0.1 => {
            warn!(
                clip = %clip.display(),
                expected,
                actual,
                "Rendered intro duration deviates from the requested duration"
            );
        }
        Ok(_) => {}
        Err(err) => {
            warn!(clip = %clip.display(), error = %err, "Could not verify intro duration");
        }
    }
}
