//! Result metrics, quality checks and bias assessment

use crate::models::{
    BiasAssessment, InvestmentIdea, InvestmentStrategy, Job, PhaseTiming, ProcessingMetrics,
    ProcessingPhase, QualityCheck, Scenario,
};
use crate::validation::PROBABILITY_SUM_TOLERANCE;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Score above which a result counts as one-sided
pub const BIAS_THRESHOLD: f64 = 0.5;

/// Metrics for a job finishing at `now`; every phase gets a timing entry
pub fn build_metrics(job: &Job, now: DateTime<Utc>) -> ProcessingMetrics {
    let artifacts = &job.artifacts;
    let phase_timings = ProcessingPhase::ALL
        .iter()
        .map(|phase| PhaseTiming {
            phase: *phase,
            duration_ms: artifacts
                .phase_durations
                .iter()
                .find(|t| t.phase == *phase)
                .map_or(0, |t| t.duration_ms),
        })
        .collect();

    let started = job.progress.started_at.unwrap_or(job.created_at);
    ProcessingMetrics {
        total_duration_ms: (now - started).num_milliseconds().max(0) as u64,
        phase_timings,
        token_usage: artifacts.token_usage,
        model_calls: artifacts.model_calls,
        step_retries: artifacts.step_retries,
        data_points_collected: artifacts.collected_data.len() as u32,
        ideas_generated: artifacts.drafts.len() as u32,
        ideas_rejected: artifacts.ideas_rejected,
    }
}

fn check(name: &str, passed: bool, details: String) -> QualityCheck {
    QualityCheck {
        name: name.to_string(),
        passed,
        details,
    }
}

pub fn quality_checks(ideas: &[InvestmentIdea], requested: usize) -> Vec<QualityCheck> {
    let non_compliant = ideas.iter().filter(|i| !i.compliance_status.compliant).count();
    let without_counter = ideas.iter().filter(|i| i.counter_arguments.is_empty()).count();
    let without_expected = ideas
        .iter()
        .filter(|i| !i.potential_outcomes.iter().any(|o| o.scenario == Scenario::Expected))
        .count();
    let unbalanced_outcomes = ideas
        .iter()
        .filter(|i| {
            let sum: f64 = i.potential_outcomes.iter().map(|o| o.probability).sum();
            !i.potential_outcomes.is_empty() && (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE
        })
        .count();

    vec![
        check(
            "idea-count",
            !ideas.is_empty(),
            format!("{} of {} requested ideas delivered", ideas.len(), requested),
        ),
        check(
            "compliance",
            non_compliant == 0,
            format!("{} idea(s) not marked compliant", non_compliant),
        ),
        check(
            "counter-arguments",
            without_counter == 0,
            format!("{} idea(s) without counter-arguments", without_counter),
        ),
        check(
            "expected-scenario",
            without_expected == 0,
            format!("{} idea(s) without an expected scenario", without_expected),
        ),
        check(
            "outcome-probabilities",
            unbalanced_outcomes == 0,
            format!("{} idea(s) with probabilities not summing to 1", unbalanced_outcomes),
        ),
    ]
}

fn direction(strategy: InvestmentStrategy) -> i8 {
    use InvestmentStrategy::*;
    match strategy {
        Buy | Long | Momentum | Growth | Value | Income => 1,
        Sell | Short => -1,
        Hold | Hedge | Arbitrage | PairsTrade | Complex => 0,
    }
}

/// Directional and diversification bias across a result set.
///
/// The score is the net directional tilt in [0, 1].
pub fn assess_bias(ideas: &[InvestmentIdea]) -> BiasAssessment {
    if ideas.is_empty() {
        return BiasAssessment {
            score: 0.0,
            balanced: true,
            flags: Vec::new(),
        };
    }

    let net: i32 = ideas.iter().map(|i| direction(i.strategy) as i32).sum();
    let score = (net.abs() as f64 / ideas.len() as f64).min(1.0);

    let mut flags = Vec::new();
    if score > BIAS_THRESHOLD {
        flags.push(if net > 0 { "long-bias" } else { "short-bias" }.to_string());
    }
    if ideas.iter().any(|i| i.counter_arguments.is_empty()) {
        flags.push("missing-counter-arguments".to_string());
    }
    let symbols: HashSet<&str> = ideas
        .iter()
        .flat_map(|i| i.investments.iter().map(|inv| inv.symbol.as_str()))
        .collect();
    if ideas.len() > 1 && symbols.len() < 2 {
        flags.push("single-instrument".to_string());
    }

    BiasAssessment {
        score,
        balanced: flags.is_empty(),
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::idea::fixtures::idea;
    use crate::models::{AccessControl, GenerationRequest};

    #[test]
    fn test_metrics_cover_every_phase() {
        let mut job = Job::new(
            "u1".to_string(),
            GenerationRequest::default(),
            AccessControl::user_only("u1"),
        );
        job.artifacts.record_phase_time(ProcessingPhase::Analysis, 12);
        job.artifacts.record_phase_time(ProcessingPhase::Analysis, 3);

        let metrics = build_metrics(&job, Utc::now());
        assert_eq!(metrics.phase_timings.len(), ProcessingPhase::ALL.len());
        let analysis = metrics
            .phase_timings
            .iter()
            .find(|t| t.phase == ProcessingPhase::Analysis)
            .unwrap();
        assert_eq!(analysis.duration_ms, 15);
    }

    #[test]
    fn test_quality_checks_flag_missing_counter_arguments() {
        let mut weak = idea();
        weak.counter_arguments.clear();
        let checks = quality_checks(&[idea(), weak], 2);
        let counter = checks.iter().find(|c| c.name == "counter-arguments").unwrap();
        assert!(!counter.passed);
        assert!(checks.iter().find(|c| c.name == "idea-count").unwrap().passed);
    }

    #[test]
    fn test_bias_assessment() {
        let mut short = idea();
        short.strategy = InvestmentStrategy::Short;
        let balanced = assess_bias(&[idea(), short]);
        assert_eq!(balanced.score, 0.0);
        assert!(balanced.balanced);

        let one_sided = assess_bias(&[idea(), idea()]);
        assert_eq!(one_sided.score, 1.0);
        assert!(one_sided.flags.contains(&"long-bias".to_string()));
        assert!(!one_sided.balanced);
    }
}
