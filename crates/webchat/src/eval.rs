//! Tuning harness for the two helper stages.
//!
//! Replays labelled prompts through `decide_to_search` or `generate_query`
//! for several epochs and summarizes accuracy, latency and how stable the
//! outputs are from one epoch to the next.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use webchat_core::{stages, ChatBackend};

pub const CASES_KIND: &str = "webchat_eval_cases";
const DEFAULT_CATEGORY: &str = "uncategorized";

fn now_epoch_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(p) = path.parent() {
        fs::create_dir_all(p)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStage {
    /// The search/no-search classifier; cases need `expected`.
    Decide,
    /// The query synthesizer.
    Query,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EvalCase {
    pub prompt: String,
    #[serde(default = "default_category")]
    pub category: String,
    /// Whether a search is the right call. Only used by the decide stage.
    #[serde(default)]
    pub expected: Option<bool>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

#[derive(Debug, Deserialize)]
struct EvalCasesV1 {
    schema_version: u64,
    kind: String,
    cases: Vec<EvalCase>,
}

/// Load cases from a `.json` fixture, or one prompt per line from anything
/// else (blank lines and `#` comments skipped).
pub fn load_cases(path: &Path, stage: EvalStage) -> Result<Vec<EvalCase>> {
    let raw = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cases = if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let v: EvalCasesV1 =
            serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))?;
        if v.schema_version != 1 || v.kind != CASES_KIND {
            bail!("unexpected eval cases kind/schema_version");
        }
        v.cases
    } else {
        raw.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(|l| EvalCase {
                prompt: l.to_string(),
                category: default_category(),
                expected: None,
            })
            .collect()
    };

    if cases.is_empty() {
        bail!("eval cases: no cases in {}", path.display());
    }
    for (i, c) in cases.iter().enumerate() {
        if c.prompt.trim().is_empty() {
            bail!("eval cases: case {i} has an empty prompt");
        }
        if stage == EvalStage::Decide && c.expected.is_none() {
            bail!("eval cases: case {i} needs `expected` for the decide stage");
        }
    }
    Ok(cases)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    /// Sample standard deviation; 0 with fewer than two samples.
    pub std_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

pub fn latency_stats(samples_ms: &[f64]) -> Option<LatencyStats> {
    if samples_ms.is_empty() {
        return None;
    }
    let mut sorted = samples_ms.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };
    let std = if n < 2 {
        0.0
    } else {
        (sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    };
    Some(LatencyStats {
        count: n,
        mean_ms: mean,
        median_ms: median,
        std_ms: std,
        min_ms: sorted[0],
        max_ms: sorted[n - 1],
    })
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Tally {
    pub correct: usize,
    pub total: usize,
    pub rate: f64,
}

impl Tally {
    fn add(&mut self, ok: bool) {
        self.total += 1;
        self.correct += usize::from(ok);
        self.rate = self.correct as f64 / self.total as f64;
    }
}

/// Cases whose output was identical in every epoch. A failed call never
/// counts as consistent. `None` with fewer than two epochs.
pub fn consistency(outputs: &[Vec<Option<String>>]) -> Option<Tally> {
    let epochs = outputs.first().map(Vec::len)?;
    if epochs < 2 {
        return None;
    }
    let mut t = Tally::default();
    for per_case in outputs {
        let stable = per_case.first().and_then(Option::as_ref).is_some_and(|first| {
            per_case.iter().all(|o| o.as_ref() == Some(first))
        });
        t.add(stable);
    }
    Some(t)
}

#[derive(Debug, Clone)]
pub struct EvalSpec {
    pub stage: EvalStage,
    pub epochs: usize,
    pub model: String,
    pub instruction: String,
}

/// Run every case `epochs` times against `backend` and build the JSON summary.
///
/// Stage failures are counted and recorded as `null` outputs; they never
/// abort the run.
pub async fn run_eval(
    backend: &dyn ChatBackend,
    spec: &EvalSpec,
    cases: &[EvalCase],
) -> Result<serde_json::Value> {
    let epochs = spec.epochs.clamp(1, 100);
    let mut outputs: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(epochs); cases.len()];
    let mut all_ms = Vec::with_capacity(epochs * cases.len());
    let mut per_epoch = Vec::with_capacity(epochs);
    let mut overall = Tally::default();
    let mut by_category: BTreeMap<String, Tally> = BTreeMap::new();
    let mut errors = 0usize;

    for epoch in 0..epochs {
        let mut epoch_ms = Vec::with_capacity(cases.len());
        let mut epoch_tally = Tally::default();
        for (i, case) in cases.iter().enumerate() {
            let t0 = Instant::now();
            let out = match spec.stage {
                EvalStage::Decide => {
                    stages::decide_to_search(backend, &spec.instruction, &case.prompt)
                        .await
                        .map(|b| b.to_string())
                }
                EvalStage::Query => {
                    stages::generate_query(backend, &spec.instruction, &case.prompt).await
                }
            };
            epoch_ms.push(t0.elapsed().as_secs_f64() * 1000.0);

            let out = match out {
                Ok(o) => Some(o),
                Err(e) => {
                    errors += 1;
                    tracing::warn!(epoch, case = i, error = %e, "eval: stage call failed");
                    None
                }
            };
            if let Some(expected) = case.expected.filter(|_| spec.stage == EvalStage::Decide) {
                let ok = out.as_deref() == Some(if expected { "true" } else { "false" });
                epoch_tally.add(ok);
                overall.add(ok);
                by_category.entry(case.category.clone()).or_default().add(ok);
            }
            outputs[i].push(out);
        }
        tracing::info!(epoch, cases = cases.len(), "eval: epoch complete");
        per_epoch.push(serde_json::json!({
            "epoch": epoch,
            "latency_ms": latency_stats(&epoch_ms),
            "accuracy": (spec.stage == EvalStage::Decide).then(|| epoch_tally.clone()),
        }));
        all_ms.extend(epoch_ms);
    }

    let query_words = (spec.stage == EvalStage::Query).then(|| {
        let words: Vec<f64> = outputs
            .iter()
            .flatten()
            .flatten()
            .map(|q| q.split_whitespace().count() as f64)
            .collect();
        latency_stats(&words).map(|s| {
            serde_json::json!({ "mean": s.mean_ms, "median": s.median_ms, "std": s.std_ms })
        })
    });
    let accuracy = (spec.stage == EvalStage::Decide).then(|| {
        serde_json::json!({ "overall": overall, "by_category": by_category })
    });
    let per_case: Vec<_> = cases
        .iter()
        .zip(&outputs)
        .map(|(c, o)| {
            serde_json::json!({
                "prompt": c.prompt,
                "category": c.category,
                "expected": c.expected,
                "outputs": o,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "schema_version": 1,
        "kind": "webchat_eval",
        "stage": spec.stage,
        "generated_at_epoch_s": now_epoch_s(),
        "model": spec.model,
        "epochs": epochs,
        "case_count": cases.len(),
        "errors": errors,
        "latency_ms": latency_stats(&all_ms),
        "accuracy": accuracy,
        "query_words": query_words.flatten(),
        "consistency": consistency(&outputs),
        "per_epoch": per_epoch,
        "cases": per_case,
    }))
}

/// Evaluate the configured helper stage, using the same host, model and
/// instruction a chat session would.
pub async fn eval_stage(
    cfg: &crate::config::Config,
    client: &reqwest::Client,
    stage: EvalStage,
    cases: &[EvalCase],
    epochs: usize,
) -> Result<serde_json::Value> {
    let stage_cfg = match stage {
        EvalStage::Decide => cfg.decide_stage(),
        EvalStage::Query => cfg.query_stage(),
    };
    let backend = crate::stage_client(client, &stage_cfg, &cfg.chat);
    let spec = EvalSpec {
        stage,
        epochs,
        model: stage_cfg.model.clone().unwrap_or_else(|| cfg.chat.model.clone()),
        instruction: stage_cfg.system_message.clone().unwrap_or_default(),
    };
    run_eval(&backend, &spec, cases).await
}
