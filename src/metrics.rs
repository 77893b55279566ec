//! Per-phase execution accounting: tokens, cost, and duration.
//!
//! Samples are append-only, one per execution (a retried phase appends a
//! second sample). Cost is always derivable: either the transport supplied
//! it, or it is computed from token counts against an injectable price
//! table. The workflow summary includes an optimization rate comparing
//! recorded output tokens against a fixed per-phase baseline — a relative
//! savings metric, not a correctness measure.

use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub const METRICS_FILENAME: &str = "metrics.json";
pub const METRICS_CSV_FILENAME: &str = "metrics.csv";

/// Price per million tokens, by token class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_mtok: f64,
    pub output_per_mtok: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            input_per_mtok: 3.0,
            output_per_mtok: 15.0,
        }
    }
}

impl Pricing {
    pub fn cost(&self, input_tokens: Option<u64>, output_tokens: Option<u64>) -> f64 {
        let input = input_tokens.unwrap_or(0) as f64 * self.input_per_mtok / 1_000_000.0;
        let output = output_tokens.unwrap_or(0) as f64 * self.output_per_mtok / 1_000_000.0;
        input + output
    }
}

/// Expected output tokens per phase execution without any output-style
/// optimization, used as the denominator of the optimization rate.
#[derive(Debug, Clone)]
pub struct OutputBaseline {
    per_phase: BTreeMap<String, u64>,
    default_tokens: u64,
}

impl Default for OutputBaseline {
    fn default() -> Self {
        let per_phase = [
            ("plan", 2000),
            ("build", 5000),
            ("test", 3000),
            ("review", 4000),
            ("ship", 1000),
        ]
        .into_iter()
        .map(|(phase, tokens)| (phase.to_string(), tokens))
        .collect();
        Self {
            per_phase,
            default_tokens: 3000,
        }
    }
}

impl OutputBaseline {
    pub fn tokens_for(&self, phase: &str) -> u64 {
        self.per_phase
            .get(phase)
            .copied()
            .unwrap_or(self.default_tokens)
    }
}

/// One execution sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSample {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    pub cost_usd: f64,
}

/// Usage as reported for one execution, before cost derivation.
#[derive(Debug, Clone, Default)]
pub struct PhaseUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub output_style: Option<String>,
    pub duration_seconds: Option<f64>,
    pub cost_usd: Option<f64>,
}

/// Per-phase rollup inside the workflow summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseBreakdown {
    pub executions: usize,
    pub total_output_tokens: u64,
    pub avg_output_tokens: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_style: Option<String>,
}

/// Aggregated metrics for an entire workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub wid: String,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cost_usd: f64,
    pub phases: usize,
    pub phase_executions: usize,
    pub optimization_rate: f64,
    pub avg_duration_seconds: f64,
    pub phases_breakdown: BTreeMap<String, PhaseBreakdown>,
}

/// File-backed metrics record, one per workflow identifier.
#[derive(Debug, Clone)]
pub struct WorkflowMetrics {
    agents_dir: PathBuf,
    pricing: Pricing,
    baseline: OutputBaseline,
}

impl WorkflowMetrics {
    pub fn new(agents_dir: impl Into<PathBuf>) -> Self {
        Self {
            agents_dir: agents_dir.into(),
            pricing: Pricing::default(),
            baseline: OutputBaseline::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_baseline(mut self, baseline: OutputBaseline) -> Self {
        self.baseline = baseline;
        self
    }

    fn metrics_path(&self, wid: &str) -> PathBuf {
        self.agents_dir.join(wid).join(METRICS_FILENAME)
    }

    /// Append one execution sample for a phase. When `cost_usd` is absent
    /// it is computed from the token counts (missing counts count as zero).
    pub fn record_phase(
        &self,
        wid: &str,
        phase: &str,
        usage: PhaseUsage,
    ) -> Result<(), StoreError> {
        let sample = PhaseSample {
            timestamp: Utc::now(),
            cost_usd: usage
                .cost_usd
                .unwrap_or_else(|| self.pricing.cost(usage.input_tokens, usage.output_tokens)),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            output_style: usage.output_style,
            duration_seconds: usage.duration_seconds,
        };

        let mut metrics = self.load(wid);
        metrics.entry(phase.to_string()).or_default().push(sample);
        self.save(wid, &metrics)
    }

    /// Load the whole record: phase name → execution samples. Absent or
    /// corrupt files are empty with a warning.
    pub fn load(&self, wid: &str) -> BTreeMap<String, Vec<PhaseSample>> {
        let path = self.metrics_path(wid);
        if !path.exists() {
            return BTreeMap::new();
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(wid, error = %e, "unreadable metrics record, starting empty");
                return BTreeMap::new();
            }
        };

        match serde_json::from_str(&content) {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(wid, error = %e, "corrupt metrics record, starting empty");
                BTreeMap::new()
            }
        }
    }

    fn save(
        &self,
        wid: &str,
        metrics: &BTreeMap<String, Vec<PhaseSample>>,
    ) -> Result<(), StoreError> {
        let path = self.metrics_path(wid);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::DirCreateFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let json = serde_json::to_string_pretty(metrics).map_err(|source| {
            StoreError::SerializeFailed {
                record: "metrics",
                wid: wid.to_string(),
                source,
            }
        })?;
        fs::write(&path, json).map_err(|source| StoreError::WriteFailed {
            record: "metrics",
            wid: wid.to_string(),
            source,
        })
    }

    /// Aggregate all samples into a workflow-level summary.
    pub fn workflow_summary(&self, wid: &str) -> WorkflowSummary {
        let metrics = self.load(wid);

        let all_samples = || metrics.values().flatten();

        let total_input: u64 = all_samples().filter_map(|s| s.input_tokens).sum();
        let total_output: u64 = all_samples().filter_map(|s| s.output_tokens).sum();
        let total_cost: f64 = all_samples().map(|s| s.cost_usd).sum();
        let phase_executions = all_samples().count();

        let durations: Vec<f64> = all_samples().filter_map(|s| s.duration_seconds).collect();
        let avg_duration = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let phases_breakdown = metrics
            .iter()
            .map(|(phase, samples)| {
                let total: u64 = samples.iter().filter_map(|s| s.output_tokens).sum();
                let breakdown = PhaseBreakdown {
                    executions: samples.len(),
                    total_output_tokens: total,
                    avg_output_tokens: total as f64 / samples.len().max(1) as f64,
                    output_style: samples.last().and_then(|s| s.output_style.clone()),
                };
                (phase.clone(), breakdown)
            })
            .collect();

        WorkflowSummary {
            wid: wid.to_string(),
            total_input_tokens: total_input,
            total_output_tokens: total_output,
            total_cost_usd: total_cost,
            phases: metrics.len(),
            phase_executions,
            optimization_rate: self.optimization_rate(&metrics),
            avg_duration_seconds: avg_duration,
            phases_breakdown,
        }
    }

    /// Relative reduction of recorded output tokens against the baseline.
    /// Samples with no recorded output count are assumed to be at baseline.
    /// Returns 0.0 for an empty record (no division by zero).
    fn optimization_rate(&self, metrics: &BTreeMap<String, Vec<PhaseSample>>) -> f64 {
        let mut total_baseline = 0u64;
        let mut total_actual = 0u64;

        for (phase, samples) in metrics {
            let per_execution = self.baseline.tokens_for(phase);
            for sample in samples {
                total_baseline += per_execution;
                total_actual += sample.output_tokens.unwrap_or(per_execution);
            }
        }

        if total_baseline == 0 {
            return 0.0;
        }
        (total_baseline as f64 - total_actual as f64) / total_baseline as f64
    }

    /// Flatten all samples to one CSV row per execution, for external
    /// analysis. Returns the path of the written file.
    pub fn export_csv(&self, wid: &str) -> Result<PathBuf, StoreError> {
        let metrics = self.load(wid);
        let path = self.agents_dir.join(wid).join(METRICS_CSV_FILENAME);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::DirCreateFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let mut out = String::from(
            "phase,timestamp,input_tokens,output_tokens,output_style,duration_seconds,cost_usd\n",
        );
        for (phase, samples) in &metrics {
            for s in samples {
                let fmt_opt_num = |v: Option<u64>| v.map(|n| n.to_string()).unwrap_or_default();
                out.push_str(&format!(
                    "{},{},{},{},{},{},{}\n",
                    phase,
                    s.timestamp.to_rfc3339(),
                    fmt_opt_num(s.input_tokens),
                    fmt_opt_num(s.output_tokens),
                    s.output_style.as_deref().unwrap_or(""),
                    s.duration_seconds
                        .map(|d| d.to_string())
                        .unwrap_or_default(),
                    s.cost_usd,
                ));
            }
        }

        fs::write(&path, out).map_err(|source| StoreError::WriteFailed {
            record: "metrics",
            wid: wid.to_string(),
            source,
        })?;
        Ok(path)
    }
}
