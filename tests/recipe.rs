use std::fs;

use introcat::presets::{generate_preset, known_presets};
use introcat::recipe::Recipe;
use introcat::scheduler::Parallelism;
use introcat::validation::validate_recipe;
use tempfile::tempdir;

fn load_yaml(yaml: &str) -> Recipe {
    let temp = tempdir().unwrap();
    let path = temp.path().join("recipe.yaml");
    fs::write(&path, yaml).unwrap();
    Recipe::load(&path).unwrap()
}

#[test]
fn full_recipe_round_trips() {
    let recipe = load_yaml(
        r#"
version: 1
inputs:
  - path: "./videos/*.mp4"
output:
  directory: ./out
intro:
  text: "Movie Night\npresents"
  duration: 2.5
  typewriter: true
  char_delay: 0.1
engine:
  path: /opt/ffmpeg
policy:
  fallback_reencode: true
  keep_temp: true
  jobs: 2
probe:
  video_stream: 1
"#,
    );

    assert_eq!(recipe.version, 1);
    assert_eq!(recipe.inputs.len(), 1);
    assert_eq!(recipe.intro.text, "Movie Night\npresents");
    assert_eq!(recipe.intro.duration, 2.5);
    assert!(recipe.intro.typewriter);
    assert_eq!(recipe.intro.char_delay, 0.1);
    assert!(recipe.policy.fallback_reencode);
    assert!(recipe.policy.keep_temp);
    assert_eq!(recipe.policy.jobs, Parallelism::Fixed(2));
    assert_eq!(recipe.probe.video_stream, 1);
    assert_eq!(recipe.probe.audio_stream, 0);
}

#[test]
fn defaults_apply_to_a_minimal_recipe() {
    let recipe = load_yaml(
        r#"
version: 1
inputs:
  - path: "./videos/*.mkv"
output:
  directory: ./out
intro:
  text: "Hello"
"#,
    );

    assert_eq!(recipe.intro.duration, 3.0);
    assert_eq!(recipe.intro.char_delay, 0.15);
    assert!(!recipe.intro.typewriter);
    assert!(recipe.intro.font.is_none());
    assert!(recipe.engine.path.is_none());
    assert!(!recipe.policy.fallback_reencode);
    assert_eq!(recipe.policy.jobs, Parallelism::Auto);
}

#[test]
fn expand_inputs_resolves_globs() {
    let temp = tempdir().unwrap();
    fs::write(temp.path().join("a.mp4"), b"a").unwrap();
    fs::write(temp.path().join("b.mp4"), b"b").unwrap();
    fs::write(temp.path().join("notes.txt"), b"n").unwrap();

    let recipe = load_yaml(&format!(
        r#"
version: 1
inputs:
  - path: "{}/*.mp4"
output:
  directory: ./out
intro:
  text: "Hello"
"#,
        temp.path().display()
    ));

    let inputs = recipe.expand_inputs().unwrap();
    assert_eq!(inputs.len(), 2);
}

#[test]
fn unmatched_pattern_is_an_error() {
    let temp = tempdir().unwrap();
    let recipe = load_yaml(&format!(
        r#"
version: 1
inputs:
  - path: "{}/*.mp4"
output:
  directory: ./out
intro:
  text: "Hello"
"#,
        temp.path().display()
    ));

    assert!(recipe.expand_inputs().is_err());
}

#[test]
fn validation_rejects_bad_timing() {
    let recipe = load_yaml(
        r#"
version: 1
inputs:
  - path: "./videos/*.mp4"
output:
  directory: ./out
intro:
  text: "Hello"
  duration: 0.0
  char_delay: -0.1
"#,
    );

    let report = validate_recipe(&recipe);
    assert!(!report.is_ok());
    assert!(report.errors.iter().any(|e| e.contains("duration")));
    assert!(report.errors.iter().any(|e| e.contains("delay")));
}

#[test]
fn validation_rejects_empty_text_and_version() {
    let recipe = load_yaml(
        r#"
version: 2
inputs:
  - path: "./videos/*.mp4"
output:
  directory: ./out
intro:
  text: "   "
"#,
    );

    let report = validate_recipe(&recipe);
    assert!(report.errors.iter().any(|e| e.contains("version")));
    assert!(report.errors.iter().any(|e| e.contains("text")));
}

#[test]
fn validation_warns_about_degenerate_typewriter() {
    let recipe = load_yaml(
        r#"
version: 1
inputs:
  - path: "./videos/*.mp4"
output:
  directory: ./out
intro:
  text: "Hello"
  typewriter: true
  char_delay: 0.0
"#,
    );

    let report = validate_recipe(&recipe);
    assert!(report.is_ok());
    assert!(!report.warnings.is_empty());
}

#[test]
fn validation_warns_about_a_missing_font() {
    let recipe = load_yaml(
        r#"
version: 1
inputs:
  - path: "./videos/*.mp4"
output:
  directory: ./out
intro:
  text: "Hello"
  font: /nonexistent/brand.ttf
"#,
    );

    let report = validate_recipe(&recipe);
    assert!(report.is_ok());
    assert!(report.warnings.iter().any(|w| w.contains("brand.ttf")));
}

#[test]
fn every_preset_validates_cleanly() {
    let temp = tempdir().unwrap();
    for name in known_presets() {
        let destination = temp.path().join(format!("{name}.yaml"));
        generate_preset(name, &destination).unwrap();

        let recipe = Recipe::load(&destination).unwrap();
        let report = validate_recipe(&recipe);
        assert!(
            report.is_ok(),
            "preset '{name}' failed validation: {:?}",
            report.errors
        );
    }
}

#[test]
fn unknown_preset_is_rejected() {
    let temp = tempdir().unwrap();
    let destination = temp.path().join("nope.yaml");
    assert!(generate_preset("cinematic", &destination).is_err());
    assert!(!destination.exists());
}
