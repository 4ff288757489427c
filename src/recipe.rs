use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::glob;
use serde::Deserialize;

use crate::scheduler::Parallelism;

/// Batch run description, loaded from YAML once per run and read-only
/// thereafter.
#[derive(Debug, Deserialize)]
pub struct Recipe {
    pub version: u32,
    pub inputs: Vec<InputSpec>,
    pub output: OutputSpec,
    pub intro: IntroSpec,
    #[serde(default)]
    pub engine: EngineSpec,
    #[serde(default)]
    pub policy: PolicySpec,
    #[serde(default)]
    pub probe: ProbeSpec,
}

impl Recipe {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read recipe file: {}", path.display()))?;
        let recipe: Recipe = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse recipe YAML: {}", path.display()))?;
        Ok(recipe)
    }

    pub fn expand_inputs(&self) -> Result<Vec<PathBuf>> {
        let mut resolved = Vec::new();
        for input in &self.inputs {
            let matches = glob(&input.path)
                .with_context(|| format!("Invalid glob pattern: {}", input.path))?;
            let mut found = false;
            for entry in matches {
                let path = entry?;
                if path.is_file() {
                    resolved.push(path);
                    found = true;
                }
            }
            if !found {
                anyhow::bail!("No inputs matched pattern: {}", input.path);
            }
        }
        Ok(resolved)
    }
}

#[derive(Debug, Deserialize)]
pub struct InputSpec {
    pub path: String,
}

#[derive(Debug, Deserialize)]
pub struct OutputSpec {
    pub directory: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct IntroSpec {
    /// Newline-separated intro lines.
    pub text: String,
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(default)]
    pub typewriter: bool,
    #[serde(default = "default_char_delay")]
    pub char_delay: f64,
    #[serde(default)]
    pub font: Option<PathBuf>,
}

fn default_duration() -> f64 {
    3.0
}

fn default_char_delay() -> f64 {
    0.15
}

#[derive(Debug, Default, Deserialize)]
pub struct EngineSpec {
    /// ffmpeg install directory; `None` uses `$PATH`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PolicySpec {
    /// Retry a failed lossless concat once with a full re-encode.
    #[serde(default)]
    pub fallback_reencode: bool,
    #[serde(default)]
    pub keep_temp: bool,
    #[serde(default)]
    pub jobs: Parallelism,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProbeSpec {
    /// Which video stream to normalize when a container has several.
    #[serde(default)]
    pub video_stream: usize,
    #[serde(default)]
    pub audio_stream: usize,
}
