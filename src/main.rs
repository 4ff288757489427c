use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser, Subcommand, ValueHint};
use clap_complete::{Shell, generate};
use introcat::engine::Engine;
use introcat::observability::{MetricsCollector, log_snapshot};
use introcat::pipeline::{BatchReport, JobOptions, JobResult, run_batch};
use introcat::presets::{generate_preset, known_presets};
use introcat::probe::{self, StreamSelector};
use introcat::recipe::Recipe;
use introcat::scheduler::Parallelism;
use introcat::security::{compute_sha256, write_output_digests, write_sha256};
use introcat::validation::validate_recipe;
use serde_json::to_writer_pretty;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, prelude::*};

#[cfg(feature = "otel")]
use opentelemetry::KeyValue;
#[cfg(feature = "otel")]
use opentelemetry_otlp::WithExportConfig;
#[cfg(feature = "otel")]
use opentelemetry_sdk::{resource::Resource, trace as sdktrace};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let Cli {
        command,
        inputs,
        quick,
    } = cli;

    if command.is_some() && !inputs.is_empty() {
        Cli::command()
            .error(
                ErrorKind::ArgumentConflict,
                "Quick-mode inputs cannot be combined with subcommands",
            )
            .exit();
    }

    let otlp_endpoint_for_tracing = command.as_ref().and_then(|command| match command {
        Commands::Run { otlp_endpoint, .. } => otlp_endpoint.clone(),
        _ => None,
    });

    configure_tracing(otlp_endpoint_for_tracing.as_deref())?;

    let command_result: Result<()> = if let Some(command) = command {
        match command {
            Commands::Run {
                recipe,
                dry_run,
                jobs,
                report,
                digests,
                print_metrics,
                metrics_json,
                metrics_prometheus,
                otlp_endpoint,
            } => {
                let _ = otlp_endpoint; // already handled in tracing configuration
                run_recipe(
                    recipe,
                    dry_run,
                    jobs,
                    report,
                    digests,
                    print_metrics,
                    metrics_json,
                    metrics_prometheus,
                )
            }
            Commands::Validate { recipe } => validate_recipe_cmd(recipe),
            Commands::Probe {
                input,
                engine_path,
                json,
            } => probe_cmd(input, engine_path, json),
            Commands::Check { engine_path } => check_cmd(engine_path),
            Commands::ListPresets => {
                println!("Available presets:");
                for name in known_presets() {
                    println!("- {name}");
                }
                Ok(())
            }
            Commands::Recipe { action } => recipe_command(action),
            Commands::Digest { path, output } => digest_cmd(path, output),
            Commands::Completions { shell } => {
                generate(shell, &mut Cli::command(), "introcat", &mut io::stdout());
                Ok(())
            }
        }
    } else if inputs.is_empty() {
        Cli::command().print_help()?;
        println!();
        Ok(())
    } else {
        run_quick(inputs, quick)
    };

    #[cfg(feature = "otel")]
    if otlp_endpoint_for_tracing.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }

    command_result
}

fn configure_tracing(otlp_endpoint: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(feature = "otel")]
    {
        if let Some(endpoint) = otlp_endpoint {
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_trace_config(
                    sdktrace::Config::default()
                        .with_resource(Resource::new(vec![KeyValue::new("service.name", "introcat")])),
                )
                .with_exporter(
                    opentelemetry_otlp::new_exporter()
                        .tonic()
                        .with_endpoint(endpoint),
                )
                .install_simple()?;

            tracing_subscriber::registry()
                .with(filter.clone())
                .with(tracing_subscriber::fmt::layer())
                .with(tracing_opentelemetry::layer().with_tracer(tracer))
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
        } else {
            tracing_subscriber::registry()
                .with(filter.clone())
                .with(tracing_subscriber::fmt::layer())
                .try_init()
                .map_err(|err| anyhow!(err.to_string()))?;
        }
    }

    #[cfg(not(feature = "otel"))]
    {
        if let Some(endpoint) = otlp_endpoint {
            eprintln!(
                "warning: --otlp-endpoint '{}' requested but OpenTelemetry support is not enabled. Rebuild with --features otel.",
                endpoint
            );
        }

        tracing_subscriber::registry()
            .with(filter.clone())
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|err| anyhow!(err.to_string()))?;
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_recipe(
    recipe_path: PathBuf,
    dry_run: bool,
    jobs_override: Option<Parallelism>,
    report_path: Option<PathBuf>,
    digests_path: Option<PathBuf>,
    print_metrics: bool,
    metrics_json: Option<PathBuf>,
    metrics_prometheus: Option<PathBuf>,
) -> Result<()> {
    let recipe = Recipe::load(&recipe_path)?;

    let validation = validate_recipe(&recipe);
    for warning in &validation.warnings {
        warn!(file = %recipe_path.display(), "{warning}");
    }
    if !validation.is_ok() {
        for error_msg in &validation.errors {
            error!(file = %recipe_path.display(), "{error_msg}");
        }
        bail!(
            "Recipe validation failed with {} error(s)",
            validation.errors.len()
        );
    }

    if dry_run {
        info!(
            "Loaded recipe with {} input pattern(s). Patterns: {:?}",
            recipe.inputs.len(),
            recipe.inputs.iter().map(|i| &i.path).collect::<Vec<_>>()
        );
        return Ok(());
    }

    let inputs = recipe.expand_inputs()?;
    if inputs.is_empty() {
        warn!("No inputs resolved for recipe. Nothing to process.");
        return Ok(());
    }

    let engine = Engine::locate(recipe.engine.path.as_deref())?;
    engine.check()?;

    let options = JobOptions::from_recipe(&recipe);
    let jobs = jobs_override.unwrap_or(recipe.policy.jobs);

    let metrics = MetricsCollector::new();
    let batch = run_batch(&engine, &inputs, &options, jobs, &metrics);

    finish_batch(
        &batch,
        &metrics,
        report_path.as_deref(),
        digests_path.as_deref(),
        print_metrics,
        metrics_json.as_deref(),
        metrics_prometheus.as_deref(),
    )
}

fn run_quick(inputs: Vec<PathBuf>, quick: QuickOptions) -> Result<()> {
    let Some(text) = quick.text.clone() else {
        bail!("Quick mode requires --text. Usage: introcat <inputs>... --text \"My Title\"");
    };

    if !(quick.duration.is_finite() && quick.duration > 0.0) {
        bail!("--duration must be a positive number of seconds");
    }
    if !(quick.typewriter_speed.is_finite() && quick.typewriter_speed >= 0.0) {
        bail!("--typewriter-speed cannot be negative");
    }

    let inputs = expand_quick_inputs(inputs)?;

    let engine = Engine::locate(quick.engine_path.as_deref())?;
    engine.check()?;

    let options = JobOptions {
        text,
        duration: quick.duration,
        typewriter: quick.typewriter,
        char_delay: quick.typewriter_speed,
        font: quick.font.clone(),
        output_dir: quick.output_dir.clone(),
        keep_temp: quick.keep_temp,
        fallback_reencode: quick.fallback_reencode,
        selector: StreamSelector::default(),
    };

    let metrics = MetricsCollector::new();
    let batch = run_batch(&engine, &inputs, &options, quick.jobs, &metrics);

    finish_batch(
        &batch,
        &metrics,
        quick.report.as_deref(),
        quick.digests.as_deref(),
        quick.print_metrics,
        None,
        None,
    )
}

/// A directory input stands for every video file directly inside it.
fn expand_quick_inputs(inputs: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    const VIDEO_EXTENSIONS: &[&str] = &[
        "mp4", "mkv", "avi", "mov", "ts", "m2ts", "flv", "webm", "wmv", "m4v", "mpg", "mpeg",
    ];

    let mut resolved = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(&input)
                .with_context(|| format!("Failed to read directory: {}", input.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .and_then(|ext| ext.to_str())
                            .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
                            .unwrap_or(false)
                })
                .collect();
            entries.sort();
            if entries.is_empty() {
                bail!("No video files found in directory: {}", input.display());
            }
            resolved.extend(entries);
        } else if input.is_file() {
            resolved.push(input);
        } else {
            bail!("Input file does not exist: {}", input.display());
        }
    }
    Ok(resolved)
}

fn finish_batch(
    batch: &BatchReport,
    metrics: &MetricsCollector,
    report_path: Option<&Path>,
    digests_path: Option<&Path>,
    print_metrics: bool,
    metrics_json: Option<&Path>,
    metrics_prometheus: Option<&Path>,
) -> Result<()> {
    print_report(batch);

    if let Some(path) = report_path {
        ensure_parent_dir(path)?;
        let file = File::create(path)
            .with_context(|| format!("Failed to create report file: {}", path.display()))?;
        to_writer_pretty(file, &batch)
            .with_context(|| format!("Failed to write report JSON: {}", path.display()))?;
        info!(report = %path.display(), "Batch report written");
    }

    if let Some(path) = digests_path {
        let outputs = batch.outputs();
        write_output_digests(&outputs, path)?;
        info!(digests = %path.display(), count = outputs.len(), "Output digests written");
    }

    if print_metrics || metrics_json.is_some() || metrics_prometheus.is_some() {
        let snapshot = metrics.snapshot();
        if print_metrics {
            log_snapshot(&snapshot);
        }
        if let Some(path) = metrics_json {
            ensure_parent_dir(path)?;
            let file = File::create(path)
                .with_context(|| format!("Failed to create metrics file: {}", path.display()))?;
            to_writer_pretty(file, &snapshot)
                .with_context(|| format!("Failed to write metrics JSON: {}", path.display()))?;
            info!(metrics = %path.display(), "Metrics JSON written");
        }
        if let Some(path) = metrics_prometheus {
            ensure_parent_dir(path)?;
            fs::write(path, snapshot.to_prometheus()).with_context(|| {
                format!("Failed to write Prometheus metrics: {}", path.display())
            })?;
            info!(metrics = %path.display(), "Prometheus metrics written");
        }
    }

    let failed = batch.failed_count();
    if failed > 0 {
        bail!("{failed} of {} job(s) failed", batch.outcomes.len());
    }
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

/// Every input, every verdict, every diagnostic — nothing is swallowed.
fn print_report(batch: &BatchReport) {
    println!();
    println!(
        "Batch report: {} done, {} failed",
        batch.done_count(),
        batch.failed_count()
    );
    for outcome in &batch.outcomes {
        match &outcome.result {
            JobResult::Done {
                output,
                font_fallback,
                degraded,
            } => {
                let mut notes = Vec::new();
                if *degraded {
                    notes.push("re-encoded fallback");
                }
                if *font_fallback {
                    notes.push("substitute font");
                }
                let suffix = if notes.is_empty() {
                    String::new()
                } else {
                    format!(" ({})", notes.join(", "))
                };
                println!(
                    "  done    {} -> {}{}",
                    outcome.input.display(),
                    output.display(),
                    suffix
                );
            }
            JobResult::Failed { kind, message } => {
                println!("  failed  {} [{kind}]", outcome.input.display());
                for line in message.lines() {
                    println!("          {line}");
                }
            }
        }
    }
}

fn validate_recipe_cmd(recipe_path: PathBuf) -> Result<()> {
    let recipe = Recipe::load(&recipe_path)?;
    let report = validate_recipe(&recipe);

    for warning in &report.warnings {
        warn!(file = %recipe_path.display(), "{warning}");
    }

    if report.is_ok() {
        info!(file = %recipe_path.display(), "Recipe validation passed");
        Ok(())
    } else {
        for error_msg in &report.errors {
            error!(file = %recipe_path.display(), "{error_msg}");
        }
        Err(anyhow!(
            "Recipe validation failed with {} error(s)",
            report.errors.len()
        ))
    }
}

fn probe_cmd(input: PathBuf, engine_path: Option<PathBuf>, json: bool) -> Result<()> {
    let engine = Engine::locate(engine_path.as_deref())?;
    let params = probe::probe(&engine, &input, StreamSelector::default())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&params)?);
        return Ok(());
    }

    println!("{}", input.display());
    println!("  container:    {}", params.container_ext);
    println!("  video codec:  {}", params.video_codec);
    println!("  resolution:   {}x{}", params.width, params.height);
    println!("  frame rate:   {}", params.frame_rate);
    println!("  pixel format: {}", params.pixel_format);
    match &params.audio {
        Some(audio) => println!(
            "  audio:        {} {} Hz {} ch",
            audio.codec, audio.sample_rate, audio.channels
        ),
        None => println!("  audio:        none"),
    }
    match params.duration {
        Some(duration) => println!("  duration:     {duration:.2} s"),
        None => println!("  duration:     unknown"),
    }
    Ok(())
}

fn check_cmd(engine_path: Option<PathBuf>) -> Result<()> {
    let engine = Engine::locate(engine_path.as_deref())?;
    engine.check()?;
    println!("ffmpeg:  {}", engine.ffmpeg.display());
    println!("ffprobe: {}", engine.ffprobe.display());
    info!("Engine available");
    Ok(())
}

fn recipe_command(command: RecipeCommands) -> Result<()> {
    match command {
        RecipeCommands::New { preset, output } => {
            let destination =
                output.unwrap_or_else(|| PathBuf::from(format!("recipes/{preset}.yaml")));
            let generated = generate_preset(&preset, &destination)?;
            info!(
                preset = %preset,
                path = %generated.display(),
                "Preset recipe generated"
            );
            Ok(())
        }
        RecipeCommands::Lint { recipes } => lint_recipes(&recipes),
    }
}

fn lint_recipes(recipes: &[PathBuf]) -> Result<()> {
    if recipes.is_empty() {
        bail!("No recipe files supplied for linting");
    }

    let mut failures = 0usize;

    for recipe_path in recipes {
        match Recipe::load(recipe_path) {
            Ok(recipe) => {
                let report = validate_recipe(&recipe);
                for warning in &report.warnings {
                    warn!(file = %recipe_path.display(), "{warning}");
                }
                if report.is_ok() {
                    info!(file = %recipe_path.display(), "Lint passed");
                } else {
                    failures += 1;
                    for error_msg in &report.errors {
                        error!(file = %recipe_path.display(), "{error_msg}");
                    }
                }
            }
            Err(err) => {
                failures += 1;
                error!(file = %recipe_path.display(), "Failed to load recipe: {err}");
            }
        }
    }

    if failures > 0 {
        bail!("Lint failed for {failures} recipe(s)");
    }

    info!("All recipe lint checks passed");
    Ok(())
}

fn digest_cmd(path: PathBuf, output: Option<PathBuf>) -> Result<()> {
    if let Some(out_path) = output {
        let digest = write_sha256(&path, &out_path)?;
        println!("{}  {}", digest, path.display());
        info!(
            file = %path.display(),
            digest_output = %out_path.display(),
            "SHA256 digest written"
        );
    } else {
        let digest = compute_sha256(&path)?;
        println!("{}  {}", digest, path.display());
        info!(file = %path.display(), "SHA256 computed");
    }
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "introcat",
    version,
    about = "Prepends a rendered title intro to video files without re-encoding them"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    #[arg(
        value_name = "INPUT",
        help = "Quick mode: video files or directories to process",
        value_hint = ValueHint::AnyPath,
        num_args = 0..
    )]
    inputs: Vec<PathBuf>,
    #[command(flatten)]
    quick: QuickOptions,
}

#[derive(clap::Args)]
struct QuickOptions {
    /// Intro text; newlines separate stacked lines
    #[arg(long)]
    text: Option<String>,
    /// Intro duration in seconds
    #[arg(long, default_value_t = 3.0)]
    duration: f64,
    /// Font file (TTF/OTF); falls back to a bundled or system font
    #[arg(long)]
    font: Option<PathBuf>,
    /// Reveal the text character by character
    #[arg(long)]
    typewriter: bool,
    /// Seconds per character in typewriter mode
    #[arg(long = "typewriter-speed", default_value_t = 0.15)]
    typewriter_speed: f64,
    /// Where outputs land; defaults to each input's directory
    #[arg(long = "output-dir")]
    output_dir: Option<PathBuf>,
    /// ffmpeg install directory when it is not on PATH
    #[arg(long = "engine-path")]
    engine_path: Option<PathBuf>,
    /// Keep per-job temporary artifacts
    #[arg(long = "keep-temp")]
    keep_temp: bool,
    /// Retry a failed lossless concat once with a full re-encode
    #[arg(long = "fallback-reencode")]
    fallback_reencode: bool,
    /// Concurrent jobs: 'auto' or a worker count
    #[arg(long, default_value = "auto")]
    jobs: Parallelism,
    /// Write the batch report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
    /// Write sha256sum-style digests of the produced outputs
    #[arg(long)]
    digests: Option<PathBuf>,
    #[arg(long = "print-metrics")]
    print_metrics: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a batch described by a recipe file
    Run {
        recipe: PathBuf,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        jobs: Option<Parallelism>,
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long)]
        digests: Option<PathBuf>,
        #[arg(long)]
        print_metrics: bool,
        #[arg(long = "metrics-json")]
        metrics_json: Option<PathBuf>,
        #[arg(long = "metrics-prometheus")]
        metrics_prometheus: Option<PathBuf>,
        #[arg(long = "otlp-endpoint")]
        otlp_endpoint: Option<String>,
    },
    /// Validate a recipe file without running it
    Validate {
        recipe: PathBuf,
    },
    /// Inspect a video file's stream parameters
    Probe {
        input: PathBuf,
        #[arg(long = "engine-path")]
        engine_path: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Verify the external engine is installed and responding
    Check {
        #[arg(long = "engine-path")]
        engine_path: Option<PathBuf>,
    },
    ListPresets,
    Recipe {
        #[command(subcommand)]
        action: RecipeCommands,
    },
    /// Compute the SHA256 digest of a file
    Digest {
        path: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Emit shell completions
    Completions {
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    New {
        #[arg(long)]
        preset: String,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    Lint {
        #[arg(required = true)]
        recipes: Vec<PathBuf>,
    },
}
