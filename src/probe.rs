//! Stream inspection via the engine's `ffprobe`.
//!
//! Raw JSON output is parsed into [`StreamParameters`] here, at the
//! boundary; downstream components never see engine text.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

use crate::engine::{Engine, EngineCommand, EngineError};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("input file does not exist: {0}")]
    FileNotFound(PathBuf),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("ffprobe produced no output for {0}")]
    EmptyOutput(PathBuf),
    #[error("failed to parse ffprobe output for {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("no video stream found in {0}")]
    NoVideoStream(PathBuf),
}

/// Frame rate as the engine reports it: an exact fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rational {
    pub num: u32,
    pub den: u32,
}

impl Rational {
    pub const FALLBACK: Rational = Rational { num: 25, den: 1 };

    /// Parse `"24000/1001"`. `None` for malformed or degenerate (`0/0`)
    /// values; callers substitute [`Rational::FALLBACK`].
    pub fn parse(text: &str) -> Option<Self> {
        let (num, den) = text.split_once('/')?;
        let num: u32 = num.trim().parse().ok()?;
        let den: u32 = den.trim().parse().ok()?;
        if num == 0 || den == 0 {
            return None;
        }
        Some(Self { num, den })
    }

    pub fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Seconds spanned by one frame.
    pub fn frame_interval(&self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioParameters {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u32,
}

/// Normalized per-file stream record. Absence of an audio stream is
/// `audio: None`, never zeroed fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamParameters {
    /// Lowercased extension of the source container, e.g. `mp4`, `mkv`.
    pub container_ext: String,
    pub video_codec: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub pixel_format: String,
    pub audio: Option<AudioParameters>,
    /// Total duration in seconds when the container reports one.
    pub duration: Option<f64>,
}

impl StreamParameters {
    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }
}

/// Which streams to normalize when a container has several of a kind.
/// Default is first-found for both, matching the engine's own ordering.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamSelector {
    pub video_index: usize,
    pub audio_index: usize,
}

#[derive(Debug, Deserialize)]
struct FfprobeReport {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u32>,
}

/// Inspect `path` and return its normalized stream parameters.
pub fn probe(
    engine: &Engine,
    path: &Path,
    selector: StreamSelector,
) -> Result<StreamParameters, ProbeError> {
    if !path.exists() {
        return Err(ProbeError::FileNotFound(path.to_path_buf()));
    }

    let stdout = EngineCommand::new(&engine.ffprobe)
        .args(["-v", "error", "-print_format", "json", "-show_format", "-show_streams"])
        .arg(path)
        .run()?;

    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Err(ProbeError::EmptyOutput(path.to_path_buf()));
    }

    let report: FfprobeReport =
        serde_json::from_slice(&stdout).map_err(|source| ProbeError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    parse_report(report, path, selector)
}

/// Convenience probe of the container duration only.
pub fn probe_duration(engine: &Engine, path: &Path) -> Result<Option<f64>, ProbeError> {
    probe(engine, path, StreamSelector::default()).map(|params| params.duration)
}

fn parse_report(
    report: FfprobeReport,
    path: &Path,
    selector: StreamSelector,
) -> Result<StreamParameters, ProbeError> {
    let video = report
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("video"))
        .nth(selector.video_index)
        .ok_or_else(|| ProbeError::NoVideoStream(path.to_path_buf()))?;

    let audio = report
        .streams
        .iter()
        .filter(|s| s.codec_type.as_deref() == Some("audio"))
        .nth(selector.audio_index);

    // r_frame_rate is more reliable than avg_frame_rate; both can come back
    // as "0/0" for broken files.
    let frame_rate = video
        .r_frame_rate
        .as_deref()
        .and_then(Rational::parse)
        .or_else(|| video.avg_frame_rate.as_deref().and_then(Rational::parse))
        .unwrap_or(Rational::FALLBACK);

    let duration = report
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok());

    let container_ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
        .unwrap_or_else(|| "mp4".to_string());

    Ok(StreamParameters {
        container_ext,
        video_codec: video
            .codec_name
            .clone()
            .unwrap_or_else(|| "h264".to_string()),
        width: video.width.filter(|w| *w > 0).unwrap_or(1920),
        height: video.height.filter(|h| *h > 0).unwrap_or(1080),
        frame_rate,
        pixel_format: video
            .pix_fmt
            .clone()
            .unwrap_or_else(|| "yuv420p".to_string()),
        audio: audio.map(|stream| AudioParameters {
            codec: stream
                .codec_name
                .clone()
                .unwrap_or_else(|| "aac".to_string()),
            sample_rate: stream
                .sample_rate
                .as_deref()
                .and_then(|rate| rate.parse().ok())
                .unwrap_or(48_000),
            channels: stream.channels.unwrap_or(2),
        }),
        duration,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_from(json: &str) -> FfprobeReport {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parses_video_and_audio_streams() {
        let report = report_from(
            r#"{
                "streams": [
                    {"codec_type": "video", "codec_name": "hevc", "width": 1280,
                     "height": 720, "pix_fmt": "yuv420p10le",
                     "r_frame_rate": "24000/1001", "avg_frame_rate": "24000/1001"},
                    {"codec_type": "audio", "codec_name": "ac3",
                     "sample_rate": "44100", "channels": 6}
                ],
                "format": {"duration": "1325.44"}
            }"#,
        );

        let params =
            parse_report(report, Path::new("movie.mkv"), StreamSelector::default()).unwrap();
        assert_eq!(params.container_ext, "mkv");
        assert_eq!(params.video_codec, "hevc");
        assert_eq!((params.width, params.height), (1280, 720));
        assert_eq!(params.frame_rate, Rational { num: 24000, den: 1001 });
        assert_eq!(params.pixel_format, "yuv420p10le");
        let audio = params.audio.unwrap();
        assert_eq!(audio.codec, "ac3");
        assert_eq!(audio.sample_rate, 44_100);
        assert_eq!(audio.channels, 6);
        assert_eq!(params.duration, Some(1325.44));
    }

    #[test]
    fn missing_audio_is_explicit() {
        let report = report_from(
            r#"{
                "streams": [
                    {"codec_type": "video", "codec_name": "h264", "width": 1920,
                     "height": 1080, "pix_fmt": "yuv420p", "r_frame_rate": "30/1"}
                ],
                "format": {}
            }"#,
        );

        let params =
            parse_report(report, Path::new("clip.mp4"), StreamSelector::default()).unwrap();
        assert!(params.audio.is_none());
        assert_eq!(params.duration, None);
    }

    #[test]
    fn degenerate_frame_rate_falls_back() {
        let report = report_from(
            r#"{
                "streams": [
                    {"codec_type": "video", "codec_name": "h264", "width": 640,
                     "height": 480, "pix_fmt": "yuv420p",
                     "r_frame_rate": "0/0", "avg_frame_rate": "0/0"}
                ],
                "format": {}
            }"#,
        );

        let params =
            parse_report(report, Path::new("odd.avi"), StreamSelector::default()).unwrap();
        assert_eq!(params.frame_rate, Rational::FALLBACK);
    }

    #[test]
    fn first_stream_policy_is_stable() {
        let report = report_from(
            r#"{
                "streams": [
                    {"codec_type": "video", "codec_name": "h264", "width": 1920,
                     "height": 1080, "pix_fmt": "yuv420p", "r_frame_rate": "25/1"},
                    {"codec_type": "video", "codec_name": "mjpeg", "width": 320,
                     "height": 180, "pix_fmt": "yuvj420p", "r_frame_rate": "1/1"},
                    {"codec_type": "audio", "codec_name": "aac",
                     "sample_rate": "48000", "channels": 2},
                    {"codec_type": "audio", "codec_name": "opus",
                     "sample_rate": "48000", "channels": 2}
                ],
                "format": {"duration": "60.0"}
            }"#,
        );

        let params =
            parse_report(report, Path::new("multi.mkv"), StreamSelector::default()).unwrap();
        assert_eq!(params.video_codec, "h264");
        assert_eq!(params.audio.unwrap().codec, "aac");
    }

    #[test]
    fn no_video_stream_is_an_error() {
        let report = report_from(
            r#"{"streams": [{"codec_type": "audio", "codec_name": "mp3",
                             "sample_rate": "44100", "channels": 2}],
                "format": {}}"#,
        );

        let result = parse_report(report, Path::new("song.mp3"), StreamSelector::default());
        assert!(matches!(result, Err(ProbeError::NoVideoStream(_))));
    }

    #[test]
    fn rational_parsing() {
        assert_eq!(Rational::parse("30/1"), Some(Rational { num: 30, den: 1 }));
        assert_eq!(Rational::parse("0/0"), None);
        assert_eq!(Rational::parse("25"), None);
        assert_eq!(Rational::parse("abc/def"), None);
        let ntsc = Rational { num: 24000, den: 1001 };
        assert!((ntsc.as_f64() - 23.976).abs() < 0.001);
        assert!((ntsc.frame_interval() - 0.0417).abs() < 0.001);
    }
}
