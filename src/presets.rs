use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
struct PresetRecipe {
    version: u32,
    inputs: Vec<InputPattern>,
    output: OutputPreset,
    intro: IntroPreset,
    policy: PolicyPreset,
}

#[derive(Debug, Clone, Serialize)]
struct InputPattern {
    path: String,
}

#[derive(Debug, Clone, Serialize)]
struct OutputPreset {
    directory: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
struct IntroPreset {
    text: String,
    duration: f64,
    typewriter: bool,
    char_delay: f64,
}

#[derive(Debug, Clone, Serialize)]
struct PolicyPreset {
    fallback_reencode: bool,
    keep_temp: bool,
    jobs: String,
}

pub fn known_presets() -> &'static [&'static str] {
    &["title", "typewriter", "batch"]
}

pub fn generate_preset(name: &str, destination: &Path) -> Result<PathBuf> {
    let preset = match name {
        "title" => title_preset(),
        "typewriter" => typewriter_preset(),
        "batch" => batch_preset(),
        other => anyhow::bail!(
            "Unknown preset '{other}'. Available presets: {}",
            known_presets().join(", ")
        ),
    };

    let rendered = serde_yaml::to_string(&preset)?;
    if let Some(parent) = destination.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(destination, rendered)
        .with_context(|| format!("Failed to write preset recipe: {}", destination.display()))?;

    Ok(destination.to_path_buf())
}

fn title_preset() -> PresetRecipe {
    PresetRecipe {
        version: 1,
        inputs: vec![InputPattern {
            path: "./videos/*.mp4".into(),
        }],
        output: OutputPreset {
            directory: PathBuf::from("./out"),
        },
        intro: IntroPreset {
            text: "My Channel".into(),
            duration: 3.0,
            typewriter: false,
            char_delay: 0.15,
        },
        policy: PolicyPreset {
            fallback_reencode: false,
            keep_temp: false,
            jobs: "auto".into(),
        },
    }
}

fn typewriter_preset() -> PresetRecipe {
    PresetRecipe {
        version: 1,
        inputs: vec![InputPattern {
            path: "./videos/*.mkv".into(),
        }],
        output: OutputPreset {
            directory: PathBuf::from("./out"),
        },
        intro: IntroPreset {
            text: "My Channel\npresents".into(),
            duration: 4.0,
            typewriter: true,
            char_delay: 0.15,
        },
        policy: PolicyPreset {
            fallback_reencode: false,
            keep_temp: false,
            jobs: "auto".into(),
        },
    }
}

fn batch_preset() -> PresetRecipe {
    PresetRecipe {
        version: 1,
        inputs: vec![
            InputPattern {
                path: "./videos/**/*.mp4".into(),
            },
            InputPattern {
                path: "./videos/**/*.mkv".into(),
            },
        ],
        output: OutputPreset {
            directory: PathBuf::from("./out"),
        },
        intro: IntroPreset {
            text: "My Channel".into(),
            duration: 3.0,
            typewriter: false,
            char_delay: 0.15,
        },
        policy: PolicyPreset {
            // Large heterogeneous batches hit the occasional stream that
            // refuses lossless concat; degrade instead of failing the file.
            fallback_reencode: true,
            keep_temp: false,
            jobs: "auto".into(),
        },
    }
}
