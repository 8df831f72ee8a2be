//! The cost ledger: one JSON line per agent invocation.
//!
//! Records are appended to `.state/cost_history.jsonl` as they happen
//! (open, write, close per record) and mirrored in memory for the session
//! summary. Invocations that died without a result event get an estimated
//! record, flagged as such, priced from the largest token counts seen in
//! their log.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::task::TaskId;

/// Which component spent the money.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    Worker,
    WorkerCleanup,
    Supervisor,
    Orchestrator,
    Validator,
    TaskGeneration,
}

impl fmt::Display for CostSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CostSource::Worker => "worker",
            CostSource::WorkerCleanup => "worker_cleanup",
            CostSource::Supervisor => "supervisor",
            CostSource::Orchestrator => "orchestrator",
            CostSource::Validator => "validator",
            CostSource::TaskGeneration => "task_generation",
        };
        // pad() so "{:<16}" alignment in summaries works.
        f.pad(s)
    }
}

/// One attributed spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub source: CostSource,
    pub cost_usd: f64,
    pub task_id: Option<String>,
    pub timestamp: String,
    pub details: String,
    #[serde(default)]
    pub estimated: bool,
}

/// Session totals, split by source and by confidence.
#[derive(Debug, Clone, Default)]
pub struct CostSummary {
    pub total_usd: f64,
    pub estimated_usd: f64,
    pub by_source: BTreeMap<CostSource, f64>,
    pub record_count: usize,
}

/// Durable, append-only cost history plus the in-memory session view.
#[derive(Debug)]
pub struct CostLedger {
    path: PathBuf,
    records: Vec<CostRecord>,
}

impl CostLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[CostRecord] {
        &self.records
    }

    /// Record one spend. Zero and negative amounts are dropped.
    ///
    /// Persistence is best-effort: a failed append is logged, never fatal,
    /// because losing one ledger line must not stop the engine.
    pub fn add(
        &mut self,
        source: CostSource,
        cost_usd: f64,
        task_id: Option<&TaskId>,
        details: &str,
        estimated: bool,
    ) {
        if cost_usd <= 0.0 {
            return;
        }
        let record = CostRecord {
            source,
            cost_usd,
            task_id: task_id.map(|id| id.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
            details: details.to_string(),
            estimated,
        };
        if let Err(err) = self.append_to_disk(&record) {
            warn!(error = %err, "failed to persist cost record");
        }
        self.records.push(record);
    }

    fn append_to_disk(&self, record: &CostRecord) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        file.write_all(&line)?;
        Ok(())
    }

    pub fn session_total(&self) -> f64 {
        self.records.iter().map(|r| r.cost_usd).sum()
    }

    pub fn summary(&self) -> CostSummary {
        let mut summary = CostSummary {
            record_count: self.records.len(),
            ..CostSummary::default()
        };
        for record in &self.records {
            summary.total_usd += record.cost_usd;
            if record.estimated {
                summary.estimated_usd += record.cost_usd;
            }
            *summary.by_source.entry(record.source).or_insert(0.0) += record.cost_usd;
        }
        summary
    }

    /// Print the session cost breakdown to stdout.
    pub fn print_summary(&self) {
        let summary = self.summary();
        if summary.record_count == 0 {
            println!("\nNo cost recorded this session.");
            return;
        }

        println!("\nCost summary");
        println!("{}", "-".repeat(40));
        for (source, cost) in &summary.by_source {
            println!("  {source:<16} ${cost:.4}");
        }
        println!("{}", "-".repeat(40));
        if summary.estimated_usd > 0.0 {
            println!("  confirmed        ${:.4}", summary.total_usd - summary.estimated_usd);
            println!("  estimated        ${:.4}", summary.estimated_usd);
        }
        println!("  total            ${:.4}", summary.total_usd);
    }
}

/// Read back all records persisted to a ledger file.
///
/// Malformed lines are skipped with a warning, same policy as every other
/// reader of agent-adjacent files: a scribbled line must not hide the
/// rest of the history.
pub fn read_history(path: &Path) -> Vec<CostRecord> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    let mut records = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<CostRecord>(line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(error = %err, "skipping malformed ledger line"),
        }
    }
    records
}

/// Estimate the cost of an invocation whose log has no result event.
///
/// Strategy, in order of confidence:
/// 1. a `result` event with a positive cost is authoritative;
/// 2. otherwise, the largest `input_tokens` / `output_tokens` seen on any
///    assistant message, priced at the given USD-per-million-token rates.
///
/// Returns 0.0 when the log holds no usable signal at all.
pub fn estimate_cost_from_log(
    log_path: &Path,
    input_price_per_mtok: f64,
    output_price_per_mtok: f64,
) -> f64 {
    let Ok(content) = std::fs::read_to_string(log_path) else {
        return 0.0;
    };

    let mut input_tokens: u64 = 0;
    let mut output_tokens: u64 = 0;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        match event.get("type").and_then(Value::as_str) {
            Some("result") => {
                let cost = event
                    .get("total_cost_usd")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                if cost > 0.0 {
                    return cost;
                }
            }
            Some("assistant") => {
                if let Some(usage) = event.pointer("/message/usage") {
                    let input = usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0);
                    let output = usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0);
                    input_tokens = input_tokens.max(input);
                    output_tokens = output_tokens.max(output);
                }
            }
            _ => {}
        }
    }

    if input_tokens == 0 && output_tokens == 0 {
        return 0.0;
    }
    (input_tokens as f64 * input_price_per_mtok + output_tokens as f64 * output_price_per_mtok)
        / 1_000_000.0
}
