use serde::Serialize;

use crate::recipe::Recipe;
use crate::scheduler::Parallelism;

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

pub fn validate_recipe(recipe: &Recipe) -> ValidationReport {
    let mut report = ValidationReport::default();

    if recipe.version != 1 {
        report
            .errors
            .push(format!("Unsupported recipe version: {}", recipe.version));
    }

    if recipe.inputs.is_empty() {
        report
            .errors
            .push("At least one input pattern is required".into());
    }
    for (idx, input) in recipe.inputs.iter().enumerate() {
        if input.path.trim().is_empty() {
            report
                .errors
                .push("Input path patterns cannot be empty".into());
            continue;
        }
        if let Err(err) = glob::Pattern::new(&input.path) {
            report.errors.push(format!(
                "Input pattern {} ('{}') is not a valid glob: {}",
                idx + 1,
                input.path,
                err
            ));
        }
    }

    if recipe.output.directory.as_os_str().is_empty() {
        report.errors.push("Output directory cannot be empty".into());
    }

    report.merge(validate_intro(recipe));

    if let Parallelism::Fixed(0) = recipe.policy.jobs {
        report.errors.push("Worker count must be positive".into());
    }

    report
}

fn validate_intro(recipe: &Recipe) -> ValidationReport {
    let mut report = ValidationReport::default();
    let intro = &recipe.intro;

    if intro.text.trim().is_empty() {
        report.errors.push("Intro text cannot be empty".into());
    }

    if !intro.duration.is_finite() || intro.duration <= 0.0 {
        report.errors.push(format!(
            "Intro duration must be a positive number of seconds, got {}",
            intro.duration
        ));
    }

    if !intro.char_delay.is_finite() || intro.char_delay < 0.0 {
        report.errors.push(format!(
            "Per-character delay cannot be negative, got {}",
            intro.char_delay
        ));
    }

    if intro.typewriter && intro.char_delay == 0.0 {
        report
            .warnings
            .push("Typewriter mode with a zero delay reveals all text at once".into());
    }

    if let Some(font) = &intro.font
        && !font.exists()
    {
        report.warnings.push(format!(
            "Font '{}' does not exist; a bundled or system font will be substituted",
            font.display()
        ));
    }

    report
}
