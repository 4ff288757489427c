//! Per-file pipeline orchestration.
//!
//! Drives one [`PipelineJob`] through probe → intro synthesis → lossless
//! concat → container restore, owns the job's state and temp artifacts,
//! and applies the degrade policy. Jobs in a batch are independent: one
//! file's failure never touches another's processing.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::concat::{self, ConcatError, RestoreError};
use crate::engine::Engine;
use crate::intro::{self, SynthesisError};
use crate::observability::MetricsCollector;
use crate::probe::{self, ProbeError, StreamParameters, StreamSelector};
use crate::recipe::Recipe;
use crate::scheduler::{self, Parallelism};
use crate::timeline::TextSpec;

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error(transparent)]
    Concat(#[from] ConcatError),
    #[error(transparent)]
    Restore(#[from] RestoreError),
    #[error("failed to prepare job workspace: {0}")]
    Workspace(#[source] io::Error),
    #[error("failed to move output into place at {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Probe(_) => "probe",
            JobError::Synthesis(_) => "synthesis",
            JobError::Concat(_) => "concat",
            JobError::Restore(_) => "restore",
            JobError::Workspace(_) => "workspace",
            JobError::Publish { .. } => "publish",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    Pending,
    Probed,
    IntroBuilt,
    Concatenated,
    Restored,
    Done,
    Failed,
}

/// One input file moving through the pipeline. Constructed and mutated
/// only by the orchestrator; steps receive its pieces read-only.
#[derive(Debug)]
pub struct PipelineJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub state: JobState,
    pub params: Option<StreamParameters>,
}

impl PipelineJob {
    fn new(input: &Path, output: PathBuf) -> Self {
        Self {
            input: input.to_path_buf(),
            output,
            state: JobState::Pending,
            params: None,
        }
    }

    fn advance(&mut self, next: JobState) {
        debug!(input = %self.input.display(), from = ?self.state, to = ?next, "Job transition");
        self.state = next;
    }
}

/// Per-run options, constructed once and shared read-only by every job.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Newline-separated intro lines.
    pub text: String,
    pub duration: f64,
    pub typewriter: bool,
    pub char_delay: f64,
    pub font: Option<PathBuf>,
    /// Defaults to each input's own directory.
    pub output_dir: Option<PathBuf>,
    pub keep_temp: bool,
    pub fallback_reencode: bool,
    pub selector: StreamSelector,
}

impl JobOptions {
    pub fn from_recipe(recipe: &Recipe) -> Self {
        Self {
            text: recipe.intro.text.clone(),
            duration: recipe.intro.duration,
            typewriter: recipe.intro.typewriter,
            char_delay: recipe.intro.char_delay,
            font: recipe.intro.font.clone(),
            output_dir: Some(recipe.output.directory.clone()),
            keep_temp: recipe.policy.keep_temp,
            fallback_reencode: recipe.policy.fallback_reencode,
            selector: StreamSelector {
                video_index: recipe.probe.video_stream,
                audio_index: recipe.probe.audio_stream,
            },
        }
    }

    fn text_spec(&self) -> TextSpec {
        TextSpec::from_text(&self.text, self.duration, self.char_delay, self.font.clone())
    }
}

/// Final word on one input file.
#[derive(Debug, Serialize)]
pub struct Outcome {
    pub input: PathBuf,
    #[serde(flatten)]
    pub result: JobResult,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum JobResult {
    Done {
        output: PathBuf,
        /// A requested font was missing and a substitute was used.
        font_fallback: bool,
        /// The lossless path failed and the re-encode fallback produced
        /// this output.
        degraded: bool,
    },
    Failed {
        kind: &'static str,
        message: String,
    },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self.result, JobResult::Done { .. })
    }

    pub fn output(&self) -> Option<&Path> {
        match &self.result {
            JobResult::Done { output, .. } => Some(output),
            JobResult::Failed { .. } => None,
        }
    }
}

struct JobSuccess {
    output: PathBuf,
    font_fallback: bool,
    degraded: bool,
}

/// Process a single input file to a final [`Outcome`]. Never panics on
/// engine failure; every error is attached to the outcome instead.
pub fn process_one(
    engine: &Engine,
    input: &Path,
    options: &JobOptions,
    metrics: &MetricsCollector,
) -> Outcome {
    let output = resolve_output_path(input, options.output_dir.as_deref());
    let mut job = PipelineJob::new(input, output);

    match run_job(engine, &mut job, options, metrics) {
        Ok(success) => {
            metrics.record_job_done();
            if success.degraded {
                metrics.record_job_degraded();
            }
            info!(
                input = %input.display(),
                output = %success.output.display(),
                degraded = success.degraded,
                "Job done"
            );
            Outcome {
                input: input.to_path_buf(),
                result: JobResult::Done {
                    output: success.output,
                    font_fallback: success.font_fallback,
                    degraded: success.degraded,
                },
            }
        }
        Err(err) => {
            job.advance(JobState::Failed);
            metrics.record_job_failed();
            warn!(input = %input.display(), kind = err.kind(), error = %err, "Job failed");
            Outcome {
                input: input.to_path_buf(),
                result: JobResult::Failed {
                    kind: err.kind(),
                    message: err.to_string(),
                },
            }
        }
    }
}

fn run_job(
    engine: &Engine,
    job: &mut PipelineJob,
    options: &JobOptions,
    metrics: &MetricsCollector,
) -> Result<JobSuccess, JobError> {
    let input = job.input.clone();
    let input = input.as_path();

    if let Some(dir) = &options.output_dir {
        fs::create_dir_all(dir).map_err(JobError::Workspace)?;
    }

    // Unique work dir per job; dropped (and deleted) on every exit path
    // unless keep_temp asks for it.
    let temp = tempfile::Builder::new()
        .prefix("introcat-")
        .tempdir()
        .map_err(JobError::Workspace)?;
    let work_dir = temp.path().to_path_buf();

    let params = {
        let _timer = metrics.start_step("probe");
        probe::probe(engine, input, options.selector)?
    };
    debug!(
        input = %input.display(),
        codec = %params.video_codec,
        width = params.width,
        height = params.height,
        frame_rate = %params.frame_rate,
        has_audio = params.has_audio(),
        "Probed source"
    );
    job.params = Some(params.clone());
    job.advance(JobState::Probed);

    let clip = {
        let _timer = metrics.start_step("intro");
        intro::synthesize(engine, &params, &options.text_spec(), options.typewriter, &work_dir)?
    };
    job.advance(JobState::IntroBuilt);

    // Restored output is staged inside the work dir and only moved into
    // place once the whole pipeline has succeeded.
    let staged = work_dir.join(format!("restored.{}", params.container_ext));
    let mut degraded = false;

    let joined = {
        let _timer = metrics.start_step("concat");
        concat::concat_lossless(engine, &clip.path, input, &work_dir)
    };
    match joined {
        Ok(joined) => {
            job.advance(JobState::Concatenated);
            {
                let _timer = metrics.start_step("restore");
                concat::restore_container(engine, &joined, &staged)?;
            }
            concat::validate_restored(engine, &staged, &clip.path, input)?;
        }
        Err(err) if options.fallback_reencode => {
            warn!(
                input = %input.display(),
                step = err.step,
                "Lossless concat failed, retrying once with a full re-encode"
            );
            let _timer = metrics.start_step("reencode");
            concat::concat_reencode(engine, &clip.path, input, &params, &staged)?;
            degraded = true;
            job.advance(JobState::Concatenated);
            if !staged.exists() {
                return Err(RestoreError::MissingOutput(staged).into());
            }
        }
        Err(err) => return Err(err.into()),
    }
    job.advance(JobState::Restored);

    publish(&staged, &job.output)?;
    job.advance(JobState::Done);

    if options.keep_temp {
        let kept = temp.keep();
        info!(dir = %kept.display(), "Keeping temporary artifacts");
    }

    Ok(JobSuccess {
        output: job.output.clone(),
        font_fallback: clip.font_fallback,
        degraded,
    })
}

/// Output lands next to the input (or in the output dir) under the same
/// stem and extension; existing files get an incrementing suffix instead
/// of being overwritten.
fn resolve_output_path(input: &Path, output_dir: Option<&Path>) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let extension = input
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned());
    let parent = output_dir
        .map(Path::to_path_buf)
        .or_else(|| input.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."));

    let file_name = |stem: &str| match &extension {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    };

    let mut candidate = parent.join(file_name(&stem));
    let mut counter = 1;
    while candidate.exists() {
        candidate = parent.join(file_name(&format!("{stem}_{counter}")));
        counter += 1;
    }
    candidate
}

/// Atomically move the staged file to its final path; falls back to
/// copy + delete when the rename crosses filesystems.
fn publish(staged: &Path, output: &Path) -> Result<(), JobError> {
    if fs::rename(staged, output).is_ok() {
        return Ok(());
    }
    fs::copy(staged, output)
        .and_then(|_| fs::remove_file(staged))
        .map_err(|source| JobError::Publish {
            path: output.to_path_buf(),
            source,
        })?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<Outcome>,
}

impl BatchReport {
    pub fn done_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_done()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.done_count()
    }

    pub fn outputs(&self) -> Vec<&Path> {
        self.outcomes.iter().filter_map(Outcome::output).collect()
    }
}

/// Run every input through [`process_one`] on a bounded worker pool.
/// Outcomes come back in input order regardless of completion order.
pub fn run_batch(
    engine: &Engine,
    inputs: &[PathBuf],
    options: &JobOptions,
    jobs: Parallelism,
    metrics: &MetricsCollector,
) -> BatchReport {
    metrics.reset();
    let started = Instant::now();
    let started_at = Utc::now();
    let workers = jobs.worker_count(inputs.len());
    info!(inputs = inputs.len(), workers, "Starting batch");

    let outcomes = scheduler::run_jobs(inputs, workers, |_, input| {
        let span = tracing::span!(tracing::Level::INFO, "job", input = %input.display());
        let _guard = span.enter();
        process_one(engine, input, options, metrics)
    });

    metrics.record_total_duration(started.elapsed());
    BatchReport {
        started_at,
        outcomes,
    }
}
