use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub steps: BTreeMap<String, StepMetrics>,
    pub total_duration_ms: f64,
    pub jobs_done: u64,
    pub jobs_failed: u64,
    pub jobs_degraded: u64,
}

#[derive(Debug, Default, Serialize, Clone)]
pub struct StepMetrics {
    pub calls: u64,
    pub total_duration_ms: f64,
    pub max_duration_ms: f64,
}

#[derive(Debug, Default, Clone)]
pub struct MetricsCollector {
    inner: Arc<Mutex<MetricsSnapshot>>,
}

impl MetricsCollector {
    pub fn global() -> &'static MetricsCollector {
        static INSTANCE: Lazy<MetricsCollector> = Lazy::new(|| MetricsCollector {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        });
        &INSTANCE
    }

    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsSnapshot::default())),
        }
    }

    pub fn start_step(&self, step_name: &str) -> StepTimer {
        StepTimer {
            step: step_name.to_string(),
            started_at: Instant::now(),
            collector: self.inner.clone(),
            recorded: false,
        }
    }

    pub fn record_total_duration(&self, duration: Duration) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.total_duration_ms = duration.as_secs_f64() * 1_000.0;
        }
    }

    pub fn record_job_done(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.jobs_done += 1;
        }
    }

    pub fn record_job_failed(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.jobs_failed += 1;
        }
    }

    pub fn record_job_degraded(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.jobs_degraded += 1;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            *guard = MetricsSnapshot::default();
        }
    }
}

pub struct StepTimer {
    step: String,
    started_at: Instant,
    collector: Arc<Mutex<MetricsSnapshot>>,
    recorded: bool,
}

impl StepTimer {
    fn record(&mut self) {
        if self.recorded {
            return;
        }
        let duration = self.started_at.elapsed();
        if let Ok(mut guard) = self.collector.lock() {
            let metrics = guard.steps.entry(self.step.clone()).or_default();
            metrics.calls += 1;
            let duration_ms = duration.as_secs_f64() * 1_000.0;
            metrics.total_duration_ms += duration_ms;
            if duration_ms > metrics.max_duration_ms {
                metrics.max_duration_ms = duration_ms;
            }
        }
        debug!(
            step = self.step.as_str(),
            duration_ms = duration.as_secs_f64() * 1_000.0,
            "Step duration recorded"
        );
        self.recorded = true;
    }
}

impl Drop for StepTimer {
    fn drop(&mut self) {
        self.record();
    }
}

pub fn log_snapshot(snapshot: &MetricsSnapshot) {
    info!(
        total_duration_ms = snapshot.total_duration_ms,
        step_count = snapshot.steps.len(),
        jobs_done = snapshot.jobs_done,
        jobs_failed = snapshot.jobs_failed,
        jobs_degraded = snapshot.jobs_degraded,
        "Batch metrics summary"
    );
    for (step, metrics) in &snapshot.steps {
        info!(
            step = step.as_str(),
            calls = metrics.calls,
            total_ms = metrics.total_duration_ms,
            max_ms = metrics.max_duration_ms,
            "Step metrics"
        );
    }
}

impl MetricsSnapshot {
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();
        output.push_str("# HELP introcat_jobs_done_total Jobs completed successfully\n");
        output.push_str("# TYPE introcat_jobs_done_total counter\n");
        output.push_str(&format!("introcat_jobs_done_total {}\n", self.jobs_done));
        output.push_str("# HELP introcat_jobs_failed_total Jobs that ended in failure\n");
        output.push_str("# TYPE introcat_jobs_failed_total counter\n");
        output.push_str(&format!("introcat_jobs_failed_total {}\n", self.jobs_failed));
        output.push_str(
            "# HELP introcat_jobs_degraded_total Jobs completed via the re-encode fallback\n",
        );
        output.push_str("# TYPE introcat_jobs_degraded_total counter\n");
        output.push_str(&format!(
            "introcat_jobs_degraded_total {}\n",
            self.jobs_degraded
        ));
        output.push_str("# HELP introcat_step_calls_total Step invocation count\n");
        output.push_str("# TYPE introcat_step_calls_total counter\n");
        output.push_str(
            "# HELP introcat_step_duration_seconds_total Accumulated step duration in seconds\n",
        );
        output.push_str("# TYPE introcat_step_duration_seconds_total counter\n");
        output
            .push_str("# HELP introcat_step_duration_seconds_max Maximum step duration in seconds\n");
        output.push_str("# TYPE introcat_step_duration_seconds_max gauge\n");
        for (step, metrics) in &self.steps {
            output.push_str(&format!(
                "introcat_step_calls_total{{step=\"{}\"}} {}\n",
                step, metrics.calls
            ));
            output.push_str(&format!(
                "introcat_step_duration_seconds_total{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.total_duration_ms / 1_000.0
            ));
            output.push_str(&format!(
                "introcat_step_duration_seconds_max{{step=\"{}\"}} {:.6}\n",
                step,
                metrics.max_duration_ms / 1_000.0
            ));
        }
        output.push_str("# HELP introcat_batch_duration_seconds Total batch duration\n");
        output.push_str("# TYPE introcat_batch_duration_seconds gauge\n");
        output.push_str(&format!(
            "introcat_batch_duration_seconds {:.6}\n",
            self.total_duration_ms / 1_000.0
        ));
        output
    }
}
