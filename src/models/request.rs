//! Generation request and job models

use crate::error::{AppError, Result};
use crate::models::access::AccessControl;
use crate::models::alert::TriggeredAlert;
use crate::models::idea::{
    CreateInvestmentIdeaRequest, InvestmentIdea, InvestmentStrategy, RiskLevel, TargetAudience,
    TimeHorizon,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

string_enum! {
    /// Scheduling priority, ordered from lowest to highest
    pub enum Priority {
        Low => "low",
        Medium => "medium",
        High => "high",
        Urgent => "urgent",
    }
}

string_enum! {
    /// Lifecycle status of a job
    pub enum RequestStatus {
        Submitted => "submitted",
        Validated => "validated",
        Queued => "queued",
        Processing => "processing",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
        Expired => "expired",
    }
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Completed
                | RequestStatus::Failed
                | RequestStatus::Cancelled
                | RequestStatus::Expired
        )
    }

    /// Forward-only transition table
    pub fn can_transition_to(&self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        match (*self, next) {
            (Submitted, Validated) | (Validated, Queued) | (Queued, Processing) => true,
            (Processing, Completed) => true,
            (current, Failed | Cancelled | Expired) => !current.is_terminal(),
            _ => false,
        }
    }
}

string_enum! {
    /// Coarse processing stage
    pub enum ProcessingPhase {
        Validation => "validation",
        Planning => "planning",
        Research => "research",
        Analysis => "analysis",
        Compliance => "compliance",
        Synthesis => "synthesis",
        Finalization => "finalization",
    }
}

string_enum! {
    /// Fine-grained unit of work; declaration order is execution order
    pub enum ProcessingStep {
        ParameterValidation => "parameter-validation",
        UserAuthentication => "user-authentication",
        RequestQueuing => "request-queuing",
        ResearchPlanning => "research-planning",
        DataCollection => "data-collection",
        MarketAnalysis => "market-analysis",
        IdeaGeneration => "idea-generation",
        ComplianceCheck => "compliance-check",
        RiskAssessment => "risk-assessment",
        ResultSynthesis => "result-synthesis",
        OutputFormatting => "output-formatting",
        QualityAssurance => "quality-assurance",
    }
}

impl ProcessingStep {
    pub fn phase(&self) -> ProcessingPhase {
        use ProcessingStep::*;
        match self {
            ParameterValidation | UserAuthentication | RequestQueuing => {
                ProcessingPhase::Validation
            }
            ResearchPlanning => ProcessingPhase::Planning,
            DataCollection => ProcessingPhase::Research,
            MarketAnalysis | IdeaGeneration => ProcessingPhase::Analysis,
            ComplianceCheck | RiskAssessment => ProcessingPhase::Compliance,
            ResultSynthesis => ProcessingPhase::Synthesis,
            OutputFormatting | QualityAssurance => ProcessingPhase::Finalization,
        }
    }

    /// Step at a plan position
    pub fn at(index: usize) -> Option<ProcessingStep> {
        Self::ALL.get(index).copied()
    }

    /// Steps completed synchronously at submission
    pub const SUBMISSION_STEPS: usize = 3;
}

string_enum! {
    pub enum StepStatus {
        Started => "started",
        Completed => "completed",
        Failed => "failed",
        Retrying => "retrying",
        Skipped => "skipped",
    }
}

string_enum! {
    /// Presentation requested for the result
    pub enum OutputFormat {
        Detailed => "detailed",
        Summary => "summary",
        Structured => "structured",
    }
}

string_enum! {
    pub enum CallbackMethod {
        Post => "POST",
        Put => "PUT",
    }
}

string_enum! {
    pub enum CallbackAuthScheme {
        Bearer => "bearer",
        Basic => "basic",
        ApiKey => "api-key",
    }
}

/// Exponential backoff policy with a capped delay and bounded retry count
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based):
    /// `min(initial * multiplier^(retry-1), max)`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let raw = self.initial_backoff_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = raw.min(self.max_backoff_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackAuth {
    pub scheme: CallbackAuthScheme,
    /// Token, `user:password` pair or API key depending on the scheme
    pub credentials: String,
    #[serde(default)]
    pub header_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackConfig {
    pub url: String,
    #[serde(default = "default_callback_method")]
    pub method: CallbackMethod,
    #[serde(default)]
    pub auth: Option<CallbackAuth>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_callback_method() -> CallbackMethod {
    CallbackMethod::Post
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPreferences {
    #[serde(default)]
    pub preferred_model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// Generation parameters with enumerations in string form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParameters {
    #[serde(default)]
    pub risk_tolerance: Option<String>,
    #[serde(default)]
    pub time_horizon: Option<String>,
    /// Absent means the model picks the strategy
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub sectors: Vec<String>,
    #[serde(default)]
    pub excluded_investments: Vec<String>,
    #[serde(default)]
    pub idea_count: Option<u32>,
    #[serde(default)]
    pub investment_amount: Option<f64>,
    #[serde(default)]
    pub model_preferences: Option<ModelPreferences>,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub include_market_alerts: bool,
}

impl GenerationParameters {
    pub const DEFAULT_IDEA_COUNT: u32 = 3;
    pub const MAX_IDEA_COUNT: u32 = 10;

    pub fn risk_tolerance_level(&self) -> Option<RiskLevel> {
        self.risk_tolerance.as_deref().and_then(|v| v.parse().ok())
    }

    pub fn horizon(&self) -> Option<TimeHorizon> {
        self.time_horizon.as_deref().and_then(|v| v.parse().ok())
    }

    pub fn preferred_strategy(&self) -> Option<InvestmentStrategy> {
        self.strategy.as_deref().and_then(|v| v.parse().ok())
    }

    pub fn audience(&self) -> Option<TargetAudience> {
        self.target_audience.as_deref().and_then(|v| v.parse().ok())
    }

    pub fn format(&self) -> OutputFormat {
        self.output_format
            .as_deref()
            .and_then(|v| v.parse().ok())
            .unwrap_or(OutputFormat::Detailed)
    }

    pub fn requested_ideas(&self) -> usize {
        self.idea_count.unwrap_or(Self::DEFAULT_IDEA_COUNT) as usize
    }
}

/// Submitted generation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub parameters: GenerationParameters,
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub callback: Option<CallbackConfig>,
    #[serde(default)]
    pub access_control: Option<AccessControl>,
    #[serde(default)]
    pub confidential: bool,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl GenerationRequest {
    pub fn priority_level(&self) -> Priority {
        self.priority
            .as_deref()
            .and_then(|p| p.parse().ok())
            .unwrap_or(Priority::Medium)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub percentage: f64,
    pub current_phase: Option<ProcessingPhase>,
    pub current_step: Option<ProcessingStep>,
    pub completed_steps: u32,
    pub total_steps: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingHistoryEntry {
    pub step: ProcessingStep,
    pub phase: ProcessingPhase,
    pub status: StepStatus,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub agent_id: Option<String>,
    pub model_used: Option<String>,
    pub attempt: u32,
    #[serde(default)]
    pub message: Option<String>,
}

impl ProcessingHistoryEntry {
    pub fn new(step: ProcessingStep, status: StepStatus) -> Self {
        Self {
            step,
            phase: step.phase(),
            status,
            timestamp: Utc::now(),
            duration_ms: None,
            agent_id: None,
            model_used: None,
            attempt: 1,
            message: None,
        }
    }
}

/// Step-scoped failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestError {
    pub code: String,
    pub message: String,
    pub step: Option<ProcessingStep>,
    pub recoverable: bool,
    pub timestamp: DateTime<Utc>,
}

impl RequestError {
    pub fn recoverable(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            step: None,
            recoverable: true,
            timestamp: Utc::now(),
        }
    }

    pub fn fatal(code: &str, message: impl Into<String>) -> Self {
        Self {
            recoverable: false,
            ..Self::recoverable(code, message)
        }
    }

    pub fn at_step(mut self, step: ProcessingStep) -> Self {
        self.step = Some(step);
        self
    }
}

impl std::fmt::Display for RequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Non-blocking observation surfaced alongside results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestWarning {
    pub code: String,
    pub message: String,
    pub step: Option<ProcessingStep>,
    pub recommendation: String,
    pub timestamp: DateTime<Utc>,
}

impl RequestWarning {
    pub fn new(
        code: &str,
        message: impl Into<String>,
        recommendation: impl Into<String>,
    ) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            step: None,
            recommendation: recommendation.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn at_step(mut self, step: ProcessingStep) -> Self {
        self.step = Some(step);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseTiming {
    pub phase: ProcessingPhase,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingMetrics {
    pub total_duration_ms: u64,
    pub phase_timings: Vec<PhaseTiming>,
    pub token_usage: TokenUsage,
    pub model_calls: u32,
    pub step_retries: u32,
    pub data_points_collected: u32,
    pub ideas_generated: u32,
    pub ideas_rejected: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityCheck {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiasAssessment {
    /// 0.0 is fully balanced, 1.0 is entirely one-sided
    pub score: f64,
    pub balanced: bool,
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
    pub quality_checks: Vec<QualityCheck>,
    pub bias_assessment: BiasAssessment,
    pub models_used: Vec<String>,
    pub output_format: Option<OutputFormat>,
    pub jurisdiction: Option<String>,
}

/// Completed job output. Refers back to its job by copied id only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub request_id: String,
    pub ideas: Vec<InvestmentIdea>,
    pub metrics: ProcessingMetrics,
    pub metadata: ResultMetadata,
    pub warnings: Vec<RequestWarning>,
    pub generated_at: DateTime<Utc>,
}

/// Intermediate outputs carried between steps
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobArtifacts {
    pub research_plan: Option<String>,
    pub collected_data: Vec<String>,
    pub market_analysis: Option<String>,
    pub drafts: Vec<CreateInvestmentIdeaRequest>,
    pub ideas: Vec<InvestmentIdea>,
    pub triggered_alerts: Vec<TriggeredAlert>,
    pub token_usage: TokenUsage,
    pub model_calls: u32,
    pub models_used: Vec<String>,
    pub phase_durations: Vec<PhaseTiming>,
    pub step_retries: u32,
    pub ideas_rejected: u32,
}

impl JobArtifacts {
    pub fn record_phase_time(&mut self, phase: ProcessingPhase, duration_ms: u64) {
        match self.phase_durations.iter_mut().find(|t| t.phase == phase) {
            Some(timing) => timing.duration_ms += duration_ms,
            None => self.phase_durations.push(PhaseTiming { phase, duration_ms }),
        }
    }

    pub fn record_model(&mut self, model: &str, usage: TokenUsage) {
        self.model_calls += 1;
        self.token_usage.add(usage);
        if !self.models_used.iter().any(|m| m == model) {
            self.models_used.push(model.to_string());
        }
    }
}

/// Tracked unit of work for one generation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub user_id: String,
    pub organization_id: Option<String>,
    pub request: GenerationRequest,
    pub priority: Priority,
    pub status: RequestStatus,
    pub progress: Progress,
    pub processing_history: Vec<ProcessingHistoryEntry>,
    pub errors: Vec<RequestError>,
    pub warnings: Vec<RequestWarning>,
    pub access_control: AccessControl,
    pub result: Option<GenerationResult>,
    pub artifacts: JobArtifacts,
    /// Index into the step plan of the next step to run
    pub next_step: usize,
    /// Attempts already made for the next step
    pub step_attempts: u32,
    pub retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Optimistic concurrency token maintained by the store
    pub version: u64,
}

impl Job {
    pub fn new(
        user_id: String,
        request: GenerationRequest,
        access_control: AccessControl,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            organization_id: request.organization_id.clone(),
            priority: request.priority_level(),
            user_id,
            request,
            status: RequestStatus::Submitted,
            progress: Progress {
                total_steps: ProcessingStep::ALL.len() as u32,
                ..Progress::default()
            },
            processing_history: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            access_control,
            result: None,
            artifacts: JobArtifacts::default(),
            next_step: 0,
            step_attempts: 0,
            retry_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    /// Move to `next`, enforcing the forward-only transition table
    pub fn transition(&mut self, next: RequestStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }

        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
            self.retry_at = None;
        }
        Ok(())
    }

    /// Append a history entry; terminal jobs are immutable
    pub fn record(&mut self, entry: ProcessingHistoryEntry) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::InvalidTransition(format!(
                "job {} is {} and no longer records history",
                self.id, self.status
            )));
        }
        self.updated_at = entry.timestamp;
        self.processing_history.push(entry);
        Ok(())
    }

    /// Mark the current step done and move the cursor forward
    pub fn complete_step(&mut self, step: ProcessingStep) {
        self.next_step += 1;
        self.step_attempts = 0;
        self.retry_at = None;
        self.progress.completed_steps = self.next_step as u32;
        self.progress.percentage =
            (self.next_step as f64 / ProcessingStep::ALL.len() as f64 * 100.0).min(100.0);
        self.progress.current_step = ProcessingStep::at(self.next_step).or(Some(step));
        self.progress.current_phase = self.progress.current_step.map(|s| s.phase());
    }

    pub fn current_step(&self) -> Option<ProcessingStep> {
        ProcessingStep::at(self.next_step)
    }

    /// Whether a worker may advance this job at `now`
    pub fn is_runnable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, RequestStatus::Queued | RequestStatus::Processing)
            && self.retry_at.map_or(true, |at| at <= now)
    }

    pub fn age(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.created_at
    }
}
