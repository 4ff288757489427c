//! Lossless concatenation through a timestamp-tolerant intermediate.
//!
//! Both clips are stream-copied into MPEG-TS, joined with the concat
//! demuxer (stream copy only, never a re-encode), and remuxed back into
//! the source container. The full re-encode used by the orchestrator's
//! degrade policy also lives here as a separate mechanism; the decision to
//! use it does not.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::{Engine, EngineCommand, EngineError};
use crate::intro::{channel_layout, encoder_for};
use crate::probe::{self, StreamParameters, StreamSelector};

#[derive(Debug, Error)]
#[error("{step} step failed: {diagnostic}")]
pub struct ConcatError {
    pub step: &'static str,
    pub diagnostic: String,
}

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error("container restore failed: {diagnostic}")]
    Remux { diagnostic: String },
    #[error("restored output is missing: {0}")]
    MissingOutput(PathBuf),
    #[error(
        "restored output is {output_bytes} bytes but the intro alone is {intro_bytes}; \
         the body was not joined"
    )]
    BodyMissing {
        output_bytes: u64,
        intro_bytes: u64,
    },
    #[error(
        "restored output is {output_bytes} bytes, below 90% of intro + body \
         ({expected_bytes} bytes); the join was incomplete"
    )]
    Undersized {
        output_bytes: u64,
        expected_bytes: u64,
    },
}

/// Annex B conversion is required when h264/hevc payloads leave MP4-family
/// containers for MPEG-TS; other codecs go through untouched.
pub fn bitstream_filter_for(codec: &str) -> Option<&'static str> {
    match codec.to_lowercase().as_str() {
        "h264" | "avc" | "x264" => Some("h264_mp4toannexb"),
        "hevc" | "h265" | "x265" => Some("hevc_mp4toannexb"),
        _ => None,
    }
}

/// Stream-copy `input` into an MPEG-TS intermediate.
pub fn plan_to_intermediate(
    engine: &Engine,
    input: &Path,
    output: &Path,
    bitstream_filter: Option<&str>,
) -> EngineCommand {
    let mut command = EngineCommand::new(&engine.ffmpeg)
        .args(["-y", "-i"])
        .arg(input)
        .args(["-c", "copy"]);
    if let Some(filter) = bitstream_filter {
        command = command.args(["-bsf:v", filter]);
    }
    command.args(["-f", "mpegts"]).arg(output)
}

/// Join the intermediates listed in `list` by stream copy.
pub fn plan_join(engine: &Engine, list: &Path, output: &Path) -> EngineCommand {
    EngineCommand::new(&engine.ffmpeg)
        .args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(list)
        .args(["-c", "copy", "-f", "mpegts"])
        .arg(output)
}

/// Remux the joined stream back into the delivery container.
pub fn plan_restore(engine: &Engine, input: &Path, output: &Path) -> EngineCommand {
    EngineCommand::new(&engine.ffmpeg)
        .args(["-y", "-i"])
        .arg(input)
        .args(["-c", "copy", "-movflags", "+faststart"])
        .arg(output)
}

/// Write the concat demuxer's file list. Paths are single-quoted with
/// embedded quotes escaped, backslashes normalized to forward slashes.
pub fn write_concat_list(path: &Path, entries: &[&Path]) -> io::Result<()> {
    let mut file = File::create(path)?;
    for entry in entries {
        let quoted = entry
            .to_string_lossy()
            .replace('\\', "/")
            .replace('\'', "'\\''");
        writeln!(file, "file '{quoted}'")?;
    }
    Ok(())
}

fn run_step(step: &'static str, command: EngineCommand) -> Result<(), ConcatError> {
    debug!(step, "Running concat step");
    command.run().map(|_| ()).map_err(|err| ConcatError {
        step,
        diagnostic: diagnostic_for(err),
    })
}

fn diagnostic_for(err: EngineError) -> String {
    match err {
        EngineError::Failed { diagnostic, .. } if !diagnostic.trim().is_empty() => diagnostic,
        other => other.to_string(),
    }
}

/// Produce the joined MPEG-TS stream for `intro` + `original` inside
/// `work_dir`. Every step is a stream copy; any engine failure surfaces as
/// a [`ConcatError`] naming the step. No re-encoding is attempted here.
pub fn concat_lossless(
    engine: &Engine,
    intro: &Path,
    original: &Path,
    work_dir: &Path,
) -> Result<PathBuf, ConcatError> {
    // Re-probe both clips rather than trusting the synthesis request; the
    // bitstream filter must match what was actually encoded.
    let intro_codec = probed_codec(engine, intro)?;
    let original_codec = probed_codec(engine, original)?;

    let intro_ts = work_dir.join("intro.ts");
    let original_ts = work_dir.join("body.ts");
    let joined_ts = work_dir.join("joined.ts");

    run_step(
        "intro-to-intermediate",
        plan_to_intermediate(engine, intro, &intro_ts, bitstream_filter_for(&intro_codec)),
    )?;
    run_step(
        "source-to-intermediate",
        plan_to_intermediate(
            engine,
            original,
            &original_ts,
            bitstream_filter_for(&original_codec),
        ),
    )?;

    let list = work_dir.join("concat_list.txt");
    write_concat_list(&list, &[&intro_ts, &original_ts]).map_err(|err| ConcatError {
        step: "concat",
        diagnostic: format!("failed to write concat list: {err}"),
    })?;

    run_step("concat", plan_join(engine, &list, &joined_ts))?;

    Ok(joined_ts)
}

fn probed_codec(engine: &Engine, path: &Path) -> Result<String, ConcatError> {
    probe::probe(engine, path, StreamSelector::default())
        .map(|params| params.video_codec)
        .map_err(|err| ConcatError {
            step: "inspect",
            diagnostic: err.to_string(),
        })
}

/// Remux the joined intermediate into `output` (container-level copy).
pub fn restore_container(
    engine: &Engine,
    joined: &Path,
    output: &Path,
) -> Result<(), RestoreError> {
    plan_restore(engine, joined, output)
        .run()
        .map(|_| ())
        .map_err(|err| RestoreError::Remux {
            diagnostic: diagnostic_for(err),
        })
}

/// Guard against the silent concat failure mode where the output carries
/// only the intro: the restored file must outweigh the intro and reach 90%
/// of intro + body. Duration is re-probed as a softer cross-check.
pub fn validate_restored(
    engine: &Engine,
    output: &Path,
    intro: &Path,
    original: &Path,
) -> Result<(), RestoreError> {
    if !output.exists() {
        return Err(RestoreError::MissingOutput(output.to_path_buf()));
    }

    let output_bytes = file_size(output);
    let intro_bytes = file_size(intro);
    let original_bytes = file_size(original);

    if output_bytes <= intro_bytes {
        return Err(RestoreError::BodyMissing {
            output_bytes,
            intro_bytes,
        });
    }

    let expected_bytes = ((intro_bytes + original_bytes) as f64 * 0.9) as u64;
    if output_bytes < expected_bytes {
        return Err(RestoreError::Undersized {
            output_bytes,
            expected_bytes,
        });
    }

    match (
        probe::probe_duration(engine, output),
        probe::probe_duration(engine, original),
    ) {
        (Ok(Some(output_duration)), Ok(Some(original_duration)))
            if output_duration <= original_duration =>
        {
            warn!(
                output = %output.display(),
                output_duration,
                original_duration,
                "Restored output is not longer than the body; the intro may be missing"
            );
        }
        (Err(err), _) | (_, Err(err)) => {
            warn!(output = %output.display(), error = %err, "Could not verify restored duration");
        }
        _ => {}
    }

    Ok(())
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|meta| meta.len()).unwrap_or(0)
}

/// Full re-encode join: the degrade mechanism. Sacrifices losslessness for
/// a valid output by pushing both clips through the concat filter and the
/// matched encoder. Selected only by the orchestrator's fallback policy.
pub fn plan_reencode(
    engine: &Engine,
    intro: &Path,
    original: &Path,
    params: &StreamParameters,
    output: &Path,
) -> EngineCommand {
    let encoder = encoder_for(&params.video_codec);
    let mut command = EngineCommand::new(&engine.ffmpeg)
        .args(["-y", "-i"])
        .arg(intro)
        .arg("-i")
        .arg(original);

    if let Some(audio) = &params.audio {
        command = command
            .args([
                "-filter_complex",
                "[0:v][0:a][1:v][1:a]concat=n=2:v=1:a=1[v][a]",
            ])
            .args(["-map", "[v]", "-map", "[a]"])
            .args(["-c:a", audio.codec.as_str()])
            .args(["-ar", audio.sample_rate.to_string().as_str()])
            .args(["-channel_layout", channel_layout(audio.channels).as_str()]);
    } else {
        command = command
            .args(["-filter_complex", "[0:v][1:v]concat=n=2:v=1:a=0[v]"])
            .args(["-map", "[v]"]);
    }

    command
        .args(["-c:v", encoder.name.as_str()])
        .args(["-preset", "ultrafast"])
        .args(encoder.extra_args)
        .args(["-pix_fmt", params.pixel_format.as_str()])
        .arg(output)
}

pub fn concat_reencode(
    engine: &Engine,
    intro: &Path,
    original: &Path,
    params: &StreamParameters,
    output: &Path,
) -> Result<(), ConcatError> {
    run_step(
        "reencode",
        plan_reencode(engine, intro, original, params, output),
    )
}
