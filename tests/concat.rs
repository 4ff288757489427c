use std::path::Path;

use introcat::concat::{plan_join, plan_reencode, plan_restore, plan_to_intermediate};
use introcat::engine::{Engine, EngineCommand};
use introcat::probe::{AudioParameters, Rational, StreamParameters};

fn engine() -> Engine {
    Engine::locate(None).unwrap()
}

fn params(audio: bool) -> StreamParameters {
    StreamParameters {
        container_ext: "mkv".to_string(),
        video_codec: "h264".to_string(),
        width: 1920,
        height: 1080,
        frame_rate: Rational { num: 25, den: 1 },
        pixel_format: "yuv420p".to_string(),
        audio: audio.then(|| AudioParameters {
            codec: "aac".to_string(),
            sample_rate: 48_000,
            channels: 2,
        }),
        duration: Some(600.0),
    }
}

fn args_of(command: &EngineCommand) -> Vec<String> {
    command
        .arguments()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect()
}

fn is_stream_copy(args: &[String]) -> bool {
    args.windows(2).any(|w| w == ["-c", "copy"])
        && !args.iter().any(|arg| arg == "-c:v" || arg == "-filter_complex" || arg == "-vf")
}

#[test]
fn intermediate_step_is_a_stream_copy_into_mpegts() {
    let command = plan_to_intermediate(
        &engine(),
        Path::new("/work/intro.mp4"),
        Path::new("/work/intro.ts"),
        Some("h264_mp4toannexb"),
    );
    let args = args_of(&command);

    assert!(is_stream_copy(&args));
    assert!(args.windows(2).any(|w| w == ["-bsf:v", "h264_mp4toannexb"]));
    assert!(args.windows(2).any(|w| w == ["-f", "mpegts"]));
}

#[test]
fn non_annexb_codecs_skip_the_bitstream_filter() {
    let command = plan_to_intermediate(
        &engine(),
        Path::new("/work/body.webm"),
        Path::new("/work/body.ts"),
        None,
    );
    let args = args_of(&command);

    assert!(is_stream_copy(&args));
    assert!(!args.iter().any(|arg| arg == "-bsf:v"));
}

#[test]
fn join_step_never_re_encodes() {
    let command = plan_join(
        &engine(),
        Path::new("/work/concat_list.txt"),
        Path::new("/work/joined.ts"),
    );
    let args = args_of(&command);

    assert!(args.windows(2).any(|w| w == ["-f", "concat"]));
    assert!(args.windows(2).any(|w| w == ["-safe", "0"]));
    assert!(is_stream_copy(&args));
}

#[test]
fn restore_step_is_a_container_copy() {
    let command = plan_restore(
        &engine(),
        Path::new("/work/joined.ts"),
        Path::new("/work/restored.mkv"),
    );
    let args = args_of(&command);

    assert!(is_stream_copy(&args));
    assert!(args.windows(2).any(|w| w == ["-movflags", "+faststart"]));
    assert_eq!(args.last().map(String::as_str), Some("/work/restored.mkv"));
}

#[test]
fn reencode_fallback_joins_both_streams() {
    let command = plan_reencode(
        &engine(),
        Path::new("/work/intro.mp4"),
        Path::new("/in/movie.mkv"),
        &params(true),
        Path::new("/work/restored.mkv"),
    );
    let args = args_of(&command);

    assert!(args.windows(2).any(|w| {
        w == ["-filter_complex", "[0:v][0:a][1:v][1:a]concat=n=2:v=1:a=1[v][a]"]
    }));
    assert!(args.windows(2).any(|w| w == ["-map", "[v]"]));
    assert!(args.windows(2).any(|w| w == ["-map", "[a]"]));
    assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
    assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
}

#[test]
fn reencode_fallback_without_audio_drops_the_audio_leg() {
    let command = plan_reencode(
        &engine(),
        Path::new("/work/intro.mp4"),
        Path::new("/in/movie.mkv"),
        &params(false),
        Path::new("/work/restored.mkv"),
    );
    let args = args_of(&command);

    assert!(
        args.windows(2)
            .any(|w| w == ["-filter_complex", "[0:v][1:v]concat=n=2:v=1:a=0[v]"])
    );
    assert!(!args.iter().any(|arg| arg == "-c:a"));
    assert!(!args.iter().any(|arg| arg == "[a]"));
}
