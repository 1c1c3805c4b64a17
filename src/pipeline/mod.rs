//! Request pipeline
//!
//! Turns a generation request into a tracked [`Job`] and drives it through
//! the step plan one step per [`RequestPipeline::advance`] call:
//!
//! ```text
//! submitted -> validated -> queued -> processing -> completed
//!                 \___________\__________\-------> failed | cancelled | expired
//! ```
//!
//! The three submission steps run synchronously inside `submit`. Every
//! later step is a suspension point: the job is persisted before the model
//! is called and again afterwards, and both writes are conditional on the
//! version read. A job cancelled or expired while a step was running makes
//! the second write conflict, so the step's output is discarded.

pub mod executor;
pub mod metrics;
mod worker;

use crate::access;
use crate::alerts::MarketAlertEvaluator;
use crate::callback::{CallbackEvent, CallbackQueue};
use crate::compliance::ComplianceRegistry;
use crate::error::{AppError, Result};
use crate::models::{
    GenerationRequest, GenerationResult, InvestmentIdea, Job, OutputFormat, Priority,
    ProcessingHistoryEntry, ProcessingStep, Progress, RequestError, RequestStatus,
    RequestWarning, Requester, ResultMetadata, RetryPolicy, StepStatus,
    UpdateInvestmentIdeaRequest,
};
use crate::store::JobStore;
use crate::validation::{self, codes, ValidationError, ValidationWarning};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

pub use executor::{GenerationContext, ModelExecutor, ModelOutput, TemplateExecutor};
pub use worker::WorkerPool;

/// Identifies pipeline-produced history entries
pub const AGENT_ID: &str = "idea-pipeline";

const CANCEL_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Backoff for recoverable step failures
    pub step_retry: RetryPolicy,
    /// Non-terminal jobs older than this are expired by the sweep
    pub job_ttl: ChronoDuration,
    /// Triggered alerts attached to requests with `includeMarketAlerts`
    pub alert_context_limit: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            step_retry: RetryPolicy::default(),
            job_ttl: ChronoDuration::hours(1),
            alert_context_limit: 10,
        }
    }
}

/// Result of one `advance` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// A step ran and its outcome was persisted
    Progressed(RequestStatus),
    /// Job is backing off before a retry
    Waiting,
    /// Job is terminal; nothing to do
    Idle,
    /// Job changed underneath the step; its output was discarded
    Abandoned,
}

/// Read model returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub job_id: String,
    pub user_id: String,
    pub status: RequestStatus,
    pub priority: Priority,
    pub progress: Progress,
    pub errors: Vec<RequestError>,
    pub warnings: Vec<RequestWarning>,
    pub processing_history: Vec<ProcessingHistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            user_id: job.user_id.clone(),
            status: job.status,
            priority: job.priority,
            progress: job.progress.clone(),
            errors: job.errors.clone(),
            warnings: job.warnings.clone(),
            processing_history: job.processing_history.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
        }
    }
}

/// What a successful step reports for its history entry
#[derive(Debug, Default)]
struct StepReport {
    model: Option<String>,
    message: Option<String>,
}

type StepOutcome = std::result::Result<StepReport, RequestError>;

pub struct RequestPipeline {
    store: Arc<dyn JobStore>,
    executor: Arc<dyn ModelExecutor>,
    compliance: Arc<ComplianceRegistry>,
    alerts: Arc<MarketAlertEvaluator>,
    callbacks: Option<CallbackQueue>,
    settings: PipelineSettings,
    work: Notify,
}

fn history(job: &Job, step: ProcessingStep, status: StepStatus) -> ProcessingHistoryEntry {
    let mut entry = ProcessingHistoryEntry::new(step, status);
    entry.agent_id = Some(AGENT_ID.to_string());
    entry.attempt = job.step_attempts + 1;
    entry
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn not_found(job_id: &str) -> AppError {
    AppError::NotFound(format!("Job {} not found", job_id))
}

fn surface(warning: ValidationWarning, subject: &str, step: ProcessingStep) -> RequestWarning {
    RequestWarning::new(
        &warning.code,
        format!("{}{}: {}", subject, warning.field, warning.message),
        warning.recommendation,
    )
    .at_step(step)
}

fn first_sentence(text: &str) -> String {
    match text.find(". ") {
        Some(end) => text[..=end].to_string(),
        None => text.to_string(),
    }
}

fn context(job: &Job) -> GenerationContext<'_> {
    GenerationContext {
        params: &job.request.parameters,
        user_id: &job.user_id,
        research_plan: job.artifacts.research_plan.as_deref(),
        collected_data: &job.artifacts.collected_data,
        market_analysis: job.artifacts.market_analysis.as_deref(),
        triggered_alerts: &job.artifacts.triggered_alerts,
    }
}

impl RequestPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        executor: Arc<dyn ModelExecutor>,
        compliance: Arc<ComplianceRegistry>,
        alerts: Arc<MarketAlertEvaluator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            store,
            executor,
            compliance,
            alerts,
            callbacks: None,
            settings,
            work: Notify::new(),
        }
    }

    /// Route terminal-state notifications into `queue`
    pub fn with_callbacks(mut self, queue: CallbackQueue) -> Self {
        self.callbacks = Some(queue);
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Resolves when new work may be available
    pub async fn work_available(&self) {
        self.work.notified().await
    }

    // ========================================================================
    // Submission
    // ========================================================================

    /// Validate a request and persist it as a queued job.
    ///
    /// Validation errors are returned as `AppError::Validation` and nothing
    /// is stored. Warnings travel with the job.
    pub async fn submit(&self, mut request: GenerationRequest, requester: &Requester) -> Result<Job> {
        let started = Instant::now();

        if let Some(claimed) = request.user_id.as_deref().map(str::trim) {
            if !claimed.is_empty() && claimed != requester.user_id {
                return Err(AppError::AccessDenied(format!(
                    "{} may not submit requests for {}",
                    requester.user_id, claimed
                )));
            }
        }
        request.user_id = Some(requester.user_id.clone());
        if request.organization_id.is_none() {
            request.organization_id = requester.organization_id.clone();
        }

        let mut check = validation::validate_generation_request(&request);
        if let Some(jurisdiction) = request.parameters.jurisdiction.as_deref() {
            if !self.compliance.supports(jurisdiction) {
                check.is_valid = false;
                check.errors.push(ValidationError::new(
                    "parameters.jurisdiction",
                    &format!(
                        "Jurisdiction '{}' is not supported (supported: {})",
                        jurisdiction,
                        self.compliance.jurisdictions().join(", ")
                    ),
                    codes::UNSUPPORTED_JURISDICTION,
                ));
            }
        }
        if !check.is_valid {
            warn!(
                user = %requester.user_id,
                errors = check.errors.len(),
                "Rejected generation request"
            );
            return Err(AppError::Validation(check.errors));
        }

        let access_control = match request.access_control.clone() {
            Some(requested) => access::restrict(requested, requester),
            None => access::default_for(
                &requester.user_id,
                request.organization_id.as_deref(),
                request.confidential,
            ),
        };
        validation::validate_access_control(&access_control).into_result()?;

        let mut job = Job::new(requester.user_id.clone(), request, access_control);
        if job.request.parameters.include_market_alerts {
            job.artifacts.triggered_alerts = self
                .alerts
                .recent_for_user(&job.user_id, self.settings.alert_context_limit);
        }

        let warning_count = check.warnings.len();
        job.warnings.extend(
            check
                .warnings
                .into_iter()
                .map(|w| surface(w, "", ProcessingStep::ParameterValidation)),
        );

        let validation_ms = elapsed_ms(started);
        let mut entry = history(&job, ProcessingStep::ParameterValidation, StepStatus::Completed);
        entry.duration_ms = Some(validation_ms);
        entry.message = Some(format!("{} warning(s)", warning_count));
        job.record(entry)?;
        job.transition(RequestStatus::Validated)?;
        job.complete_step(ProcessingStep::ParameterValidation);

        let mut entry = history(&job, ProcessingStep::UserAuthentication, StepStatus::Completed);
        entry.duration_ms = Some(0);
        entry.message = Some(format!("identity asserted for {}", requester.user_id));
        job.record(entry)?;
        job.complete_step(ProcessingStep::UserAuthentication);

        job.transition(RequestStatus::Queued)?;
        let mut entry = history(&job, ProcessingStep::RequestQueuing, StepStatus::Completed);
        entry.duration_ms = Some(0);
        entry.message = Some(format!("queued with {} priority", job.priority));
        job.record(entry)?;
        job.complete_step(ProcessingStep::RequestQueuing);
        job.artifacts
            .record_phase_time(ProcessingStep::ParameterValidation.phase(), elapsed_ms(started));

        self.store.create(&mut job).await?;
        self.work.notify_one();

        info!(job_id = %job.id, user = %job.user_id, priority = %job.priority, "Job queued");
        Ok(job)
    }

    // ========================================================================
    // Processing
    // ========================================================================

    /// Non-terminal jobs a worker may advance now, highest priority first
    pub async fn runnable(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut jobs: Vec<Job> = self
            .store
            .list_active()
            .await?
            .into_iter()
            .filter(|j| j.is_runnable(now))
            .collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        Ok(jobs)
    }

    /// Run the next pending step of one job
    pub async fn advance(&self, job_id: &str) -> Result<Advance> {
        let mut job = self.store.get(job_id).await?.ok_or_else(|| not_found(job_id))?;
        let now = Utc::now();

        if job.status.is_terminal() {
            return Ok(Advance::Idle);
        }
        if !job.is_runnable(now) {
            return Ok(Advance::Waiting);
        }

        let Some(step) = job.current_step() else {
            let error = RequestError::fatal("NO_PENDING_STEP", "Step plan exhausted before completion");
            job.errors.push(error);
            job.transition(RequestStatus::Failed)?;
            return self.persist(job).await;
        };

        if job.status == RequestStatus::Queued {
            job.transition(RequestStatus::Processing)?;
            job.progress.started_at = Some(now);
        }
        job.record(history(&job, step, StepStatus::Started))?;

        // Checkpoint: a cancellation that landed since the read wins here
        if let Err(e) = self.store.update(&mut job).await {
            return match e {
                AppError::Conflict(_) => Ok(Advance::Abandoned),
                other => Err(other),
            };
        }

        let started = Instant::now();
        let outcome = self.run_step(step, &mut job).await;
        let duration_ms = elapsed_ms(started);
        job.artifacts.record_phase_time(step.phase(), duration_ms);

        match outcome {
            Ok(report) => {
                let mut entry = history(&job, step, StepStatus::Completed);
                entry.duration_ms = Some(duration_ms);
                entry.model_used = report.model;
                entry.message = report.message;
                job.record(entry)?;
                job.complete_step(step);
                debug!(job_id = %job.id, step = %step, duration_ms, "Step completed");

                if job.current_step().is_none() {
                    self.complete(&mut job)?;
                } else {
                    Self::estimate_completion(&mut job);
                }
            }
            Err(error) => self.fail_step(&mut job, step, error, duration_ms)?,
        }

        self.persist(job).await
    }

    async fn persist(&self, mut job: Job) -> Result<Advance> {
        match self.store.update(&mut job).await {
            Ok(()) => {
                if job.status.is_terminal() {
                    self.notify_terminal(&job);
                }
                Ok(Advance::Progressed(job.status))
            }
            Err(AppError::Conflict(_)) => {
                info!(job_id = %job.id, "Job changed while a step was running, discarding step output");
                Ok(Advance::Abandoned)
            }
            Err(e) => Err(e),
        }
    }

    fn estimate_completion(job: &mut Job) {
        let Some(started) = job.progress.started_at else { return };
        let done = job.next_step.saturating_sub(ProcessingStep::SUBMISSION_STEPS) as i32;
        let remaining = ProcessingStep::ALL.len().saturating_sub(job.next_step) as i32;
        if done > 0 {
            let now = Utc::now();
            let per_step = (now - started) / done;
            job.progress.estimated_completion = Some(now + per_step * remaining);
        }
    }

    fn fail_step(
        &self,
        job: &mut Job,
        step: ProcessingStep,
        error: RequestError,
        duration_ms: u64,
    ) -> Result<()> {
        let error = error.at_step(step);
        let policy = self.settings.step_retry;

        if error.recoverable && job.step_attempts < policy.max_retries {
            let mut entry = history(job, step, StepStatus::Retrying);
            entry.duration_ms = Some(duration_ms);
            entry.message = Some(error.to_string());
            job.record(entry)?;

            job.step_attempts += 1;
            let delay = policy.delay_for(job.step_attempts);
            job.retry_at = Some(Utc::now() + ChronoDuration::milliseconds(delay.as_millis() as i64));
            job.artifacts.step_retries += 1;
            warn!(
                job_id = %job.id,
                step = %step,
                retry = job.step_attempts,
                delay_ms = delay.as_millis() as u64,
                "Step failed, retrying: {}",
                error
            );
            job.errors.push(error);
            return Ok(());
        }

        let mut entry = history(job, step, StepStatus::Failed);
        entry.duration_ms = Some(duration_ms);
        entry.message = Some(error.to_string());
        job.record(entry)?;

        error!(job_id = %job.id, step = %step, attempts = job.step_attempts + 1, "Job failed: {}", error);
        job.errors.push(error);
        job.transition(RequestStatus::Failed)
    }

    async fn run_step(&self, step: ProcessingStep, job: &mut Job) -> StepOutcome {
        match step {
            ProcessingStep::ResearchPlanning => {
                let out = self.executor.plan_research(&context(job)).await?;
                job.artifacts.record_model(&out.model, out.usage);
                job.artifacts.research_plan = Some(out.value);
                Ok(StepReport {
                    model: Some(out.model),
                    message: None,
                })
            }
            ProcessingStep::DataCollection => {
                let out = self.executor.collect_data(&context(job)).await?;
                job.artifacts.record_model(&out.model, out.usage);
                let message = format!("{} data series collected", out.value.len());
                job.artifacts.collected_data = out.value;
                Ok(StepReport {
                    model: Some(out.model),
                    message: Some(message),
                })
            }
            ProcessingStep::MarketAnalysis => {
                let out = self.executor.analyze_market(&context(job)).await?;
                job.artifacts.record_model(&out.model, out.usage);
                job.artifacts.market_analysis = Some(out.value);
                Ok(StepReport {
                    model: Some(out.model),
                    message: None,
                })
            }
            ProcessingStep::IdeaGeneration => {
                let out = self.executor.generate_ideas(&context(job)).await?;
                job.artifacts.record_model(&out.model, out.usage);
                if out.value.is_empty() {
                    return Err(RequestError::recoverable(
                        "EMPTY_GENERATION",
                        "The model returned no ideas",
                    ));
                }
                let message = format!("{} draft(s) generated", out.value.len());
                job.artifacts.drafts = out.value;
                Ok(StepReport {
                    model: Some(out.model),
                    message: Some(message),
                })
            }
            ProcessingStep::ComplianceCheck => self.check_compliance(job),
            ProcessingStep::RiskAssessment => Self::assess_risk(job),
            ProcessingStep::ResultSynthesis => Ok(Self::synthesize(job)),
            ProcessingStep::OutputFormatting => Ok(Self::format_output(job)),
            ProcessingStep::QualityAssurance => Self::quality_assurance(job),
            ProcessingStep::ParameterValidation
            | ProcessingStep::UserAuthentication
            | ProcessingStep::RequestQueuing => Ok(StepReport::default()),
        }
    }

    /// Convert drafts into ideas and keep those without critical issues
    fn check_compliance(&self, job: &mut Job) -> StepOutcome {
        let step = ProcessingStep::ComplianceCheck;
        let jurisdiction = job.request.parameters.jurisdiction.clone();
        let evaluator = self.compliance.get(jurisdiction.as_deref()).ok_or_else(|| {
            RequestError::fatal(
                codes::UNSUPPORTED_JURISDICTION,
                format!("No compliance rules for {:?}", jurisdiction),
            )
        })?;

        let mut accepted = Vec::new();
        let mut rejected = 0u32;
        for draft in job.artifacts.drafts.clone() {
            let title = draft.title.clone().unwrap_or_default();
            match draft.into_idea() {
                Ok((mut idea, warnings)) => {
                    let subject = format!("'{}' ", idea.title);
                    job.warnings
                        .extend(warnings.into_iter().map(|w| surface(w, &subject, step)));

                    let status = evaluator.evaluate(&idea);
                    if status.has_critical() {
                        rejected += 1;
                        let issues: Vec<&str> =
                            status.issues.iter().map(|i| i.code.as_str()).collect();
                        job.warnings.push(
                            RequestWarning::new(
                                "IDEA_REJECTED_COMPLIANCE",
                                format!("'{}' rejected: {}", idea.title, issues.join(", ")),
                                "Adjust the request parameters if more ideas are needed",
                            )
                            .at_step(step),
                        );
                    } else {
                        idea.compliance_status = status;
                        accepted.push(idea);
                    }
                }
                Err(AppError::Validation(errors)) => {
                    rejected += 1;
                    let fields: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
                    job.warnings.push(
                        RequestWarning::new(
                            "IDEA_REJECTED_INVALID",
                            format!("'{}' failed validation: {}", title, fields.join(", ")),
                            "Review model output for missing or malformed fields",
                        )
                        .at_step(step),
                    );
                }
                Err(other) => {
                    return Err(RequestError::fatal("IDEA_CONVERSION_FAILED", other.to_string()))
                }
            }
        }

        job.artifacts.ideas_rejected = rejected;
        job.artifacts.ideas = accepted;
        if job.artifacts.ideas.is_empty() {
            return Err(RequestError::fatal(
                "ALL_IDEAS_REJECTED",
                format!("All {} draft(s) were rejected", rejected),
            ));
        }

        Ok(StepReport {
            model: None,
            message: Some(format!(
                "{} accepted, {} rejected under {}",
                job.artifacts.ideas.len(),
                rejected,
                evaluator.jurisdiction()
            )),
        })
    }

    /// Drop ideas touching excluded instruments and flag risk above tolerance
    fn assess_risk(job: &mut Job) -> StepOutcome {
        let step = ProcessingStep::RiskAssessment;
        let params = &job.request.parameters;
        let excluded: HashSet<String> = params
            .excluded_investments
            .iter()
            .map(|s| s.trim().to_uppercase())
            .collect();
        let tolerance = params.risk_tolerance_level();

        let mut warnings = Vec::new();
        let before = job.artifacts.ideas.len();
        job.artifacts.ideas.retain(|idea| {
            let hit = idea
                .investments
                .iter()
                .find(|i| excluded.contains(&i.symbol.trim().to_uppercase()));
            if let Some(hit) = hit {
                warnings.push(
                    RequestWarning::new(
                        "EXCLUDED_INVESTMENT",
                        format!("'{}' dropped: holds excluded {}", idea.title, hit.symbol),
                        "Exclusions are always enforced",
                    )
                    .at_step(step),
                );
            }
            hit.is_none()
        });
        let dropped = before - job.artifacts.ideas.len();

        if let Some(tolerance) = tolerance {
            for idea in job.artifacts.ideas.iter().filter(|i| i.risk_level > tolerance) {
                warnings.push(
                    RequestWarning::new(
                        "RISK_ABOVE_TOLERANCE",
                        format!(
                            "'{}' is {} risk, above the requested {}",
                            idea.title, idea.risk_level, tolerance
                        ),
                        "Size the position accordingly or discard the idea",
                    )
                    .at_step(step),
                );
            }
        }

        job.warnings.extend(warnings);
        job.artifacts.ideas_rejected += dropped as u32;
        if job.artifacts.ideas.is_empty() {
            return Err(RequestError::fatal(
                "NO_IDEAS_WITHIN_CONSTRAINTS",
                "No idea satisfies the request constraints",
            ));
        }

        Ok(StepReport {
            model: None,
            message: Some(format!("{} idea(s) dropped", dropped)),
        })
    }

    /// Rank by confidence, drop duplicate titles and cut to the requested count
    fn synthesize(job: &mut Job) -> StepReport {
        let requested = job.request.parameters.requested_ideas();
        let ideas = &mut job.artifacts.ideas;

        ideas.sort_by(|a, b| {
            b.confidence_score
                .partial_cmp(&a.confidence_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let mut seen = HashSet::new();
        ideas.retain(|idea| seen.insert(idea.title.to_lowercase()));
        ideas.truncate(requested);

        if ideas.len() < requested {
            job.warnings.push(
                RequestWarning::new(
                    "FEWER_IDEAS_THAN_REQUESTED",
                    format!("{} of {} requested ideas delivered", ideas.len(), requested),
                    "Broaden sectors or relax exclusions",
                )
                .at_step(ProcessingStep::ResultSynthesis),
            );
        }

        StepReport {
            model: None,
            message: Some(format!("{} idea(s) selected", job.artifacts.ideas.len())),
        }
    }

    fn format_output(job: &mut Job) -> StepReport {
        let format = job.request.parameters.format();
        for idea in &mut job.artifacts.ideas {
            idea.metadata
                .insert("outputFormat".to_string(), serde_json::json!(format.as_str()));
            match format {
                OutputFormat::Summary => {
                    idea.rationale = first_sentence(&idea.rationale);
                }
                OutputFormat::Structured => {
                    let positions: serde_json::Map<String, serde_json::Value> = idea
                        .investments
                        .iter()
                        .map(|i| (i.symbol.clone(), serde_json::json!(i.allocation_percentage)))
                        .collect();
                    idea.metadata
                        .insert("positions".to_string(), serde_json::Value::Object(positions));
                }
                OutputFormat::Detailed => {}
            }
        }

        StepReport {
            model: None,
            message: Some(format!("formatted as {}", format)),
        }
    }

    /// Re-validate every idea before it is released
    fn quality_assurance(job: &mut Job) -> StepOutcome {
        for idea in &job.artifacts.ideas {
            let result = validation::validate_idea(idea);
            if !result.is_valid {
                let codes: Vec<&str> = result.errors.iter().map(|e| e.code.as_str()).collect();
                return Err(RequestError::fatal(
                    "QUALITY_CHECK_FAILED",
                    format!("'{}' failed final validation: {}", idea.title, codes.join(", ")),
                ));
            }
        }

        Ok(StepReport {
            model: None,
            message: Some(format!("{} idea(s) passed", job.artifacts.ideas.len())),
        })
    }

    fn complete(&self, job: &mut Job) -> Result<()> {
        let now = Utc::now();
        let params = &job.request.parameters;
        let requested = params.requested_ideas();
        let format = params.format();
        let jurisdiction = params
            .jurisdiction
            .as_deref()
            .map(|j| j.trim().to_uppercase())
            .unwrap_or_else(|| self.compliance.default_jurisdiction().to_string());

        let metrics = metrics::build_metrics(job, now);
        let ideas: Vec<InvestmentIdea> = std::mem::take(&mut job.artifacts.ideas);
        job.artifacts.drafts.clear();

        let metadata = ResultMetadata {
            quality_checks: metrics::quality_checks(&ideas, requested),
            bias_assessment: metrics::assess_bias(&ideas),
            models_used: job.artifacts.models_used.clone(),
            output_format: Some(format),
            jurisdiction: Some(jurisdiction),
        };

        job.result = Some(GenerationResult {
            request_id: job.id.clone(),
            ideas,
            metrics,
            metadata,
            warnings: job.warnings.clone(),
            generated_at: now,
        });
        job.progress.percentage = 100.0;
        job.progress.estimated_completion = Some(now);
        job.transition(RequestStatus::Completed)?;

        info!(
            job_id = %job.id,
            ideas = job.result.as_ref().map_or(0, |r| r.ideas.len()),
            "Job completed"
        );
        Ok(())
    }

    fn notify_terminal(&self, job: &Job) {
        let Some(queue) = &self.callbacks else { return };
        match CallbackEvent::for_job(job) {
            Ok(Some(event)) => {
                queue.enqueue(event);
            }
            Ok(None) => {}
            Err(e) => warn!(job_id = %job.id, "Could not build callback payload: {}", e),
        }
    }

    // ========================================================================
    // Client operations
    // ========================================================================

    async fn load(&self, job_id: &str) -> Result<Job> {
        self.store.get(job_id).await?.ok_or_else(|| not_found(job_id))
    }

    fn authorize_read(job: &Job, requester: &Requester) -> Result<()> {
        if job.user_id == requester.user_id {
            return Ok(());
        }
        access::ensure_access(requester, &job.access_control, &format!("job {}", job.id))
    }

    fn authorize_owner(job: &Job, requester: &Requester) -> Result<()> {
        if job.user_id == requester.user_id {
            Ok(())
        } else {
            Err(AppError::AccessDenied(format!(
                "Only the owner may modify job {}",
                job.id
            )))
        }
    }

    /// Cancel a non-terminal job. Cancelling a cancelled job returns it unchanged.
    pub async fn cancel(&self, job_id: &str, requester: &Requester) -> Result<Job> {
        for _ in 0..CANCEL_ATTEMPTS {
            let mut job = self.load(job_id).await?;
            Self::authorize_owner(&job, requester)?;

            match job.status {
                RequestStatus::Cancelled => return Ok(job),
                status if status.is_terminal() => {
                    return Err(AppError::InvalidTransition(format!(
                        "Job {} is already {}",
                        job.id, status
                    )))
                }
                _ => {}
            }

            job.transition(RequestStatus::Cancelled)?;
            match self.store.update(&mut job).await {
                Ok(()) => {
                    info!(job_id = %job.id, user = %requester.user_id, "Job cancelled");
                    self.notify_terminal(&job);
                    return Ok(job);
                }
                Err(AppError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        Err(AppError::Conflict(format!(
            "Job {} kept changing while cancelling",
            job_id
        )))
    }

    pub async fn get_status(&self, job_id: &str, requester: &Requester) -> Result<JobStatusView> {
        let job = self.load(job_id).await?;
        Self::authorize_read(&job, requester)?;
        Ok(JobStatusView::from(&job))
    }

    pub async fn get_result(&self, job_id: &str, requester: &Requester) -> Result<GenerationResult> {
        let job = self.load(job_id).await?;
        Self::authorize_read(&job, requester)?;

        if job.status != RequestStatus::Completed {
            return Err(AppError::NotReady(format!(
                "Job {} is {}",
                job.id, job.status
            )));
        }
        job.result
            .ok_or_else(|| AppError::Internal(format!("Completed job {} has no result", job_id)))
    }

    /// Jobs owned by the requester, newest first
    pub async fn list_jobs(&self, requester: &Requester, limit: usize) -> Result<Vec<JobStatusView>> {
        Ok(self
            .store
            .list_by_user(&requester.user_id, limit)
            .await?
            .iter()
            .map(JobStatusView::from)
            .collect())
    }

    /// Apply a versioned update to one idea of a completed job.
    ///
    /// Allowed for the owner, and for readers from the job's organization.
    pub async fn update_idea(
        &self,
        job_id: &str,
        idea_id: &str,
        mut update: UpdateInvestmentIdeaRequest,
        requester: &Requester,
    ) -> Result<(InvestmentIdea, Vec<ValidationWarning>)> {
        let mut job = self.load(job_id).await?;
        let same_org = job.organization_id.is_some()
            && job.organization_id == requester.organization_id;
        if !(job.user_id == requester.user_id
            || (same_org && access::requester_has_access(requester, &job.access_control)))
        {
            return Err(AppError::AccessDenied(format!(
                "{} may not edit ideas of job {}",
                requester.user_id, job.id
            )));
        }
        if job.status != RequestStatus::Completed {
            return Err(AppError::NotReady(format!("Job {} is {}", job.id, job.status)));
        }

        update.id.get_or_insert_with(|| idea_id.to_string());
        update
            .updated_by
            .get_or_insert_with(|| requester.user_id.clone());

        let (updated, warnings) = {
            let result = job.result.as_mut().ok_or_else(|| {
                AppError::Internal(format!("Completed job {} has no result", job_id))
            })?;
            let idea = result
                .ideas
                .iter_mut()
                .find(|i| i.id == idea_id)
                .ok_or_else(|| AppError::NotFound(format!("Idea {} not found", idea_id)))?;
            let warnings = idea.apply_update(update)?;
            (idea.clone(), warnings)
        };

        self.store.update(&mut job).await?;
        info!(job_id = %job.id, idea_id, version = updated.version, "Idea updated");
        Ok((updated, warnings))
    }

    /// Expire every non-terminal job older than the TTL at `now`
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> Result<usize> {
        let ttl = self.settings.job_ttl;
        let mut expired = 0;

        for mut job in self.store.list_active().await? {
            if job.age(now) <= ttl {
                continue;
            }

            let warning = RequestWarning::new(
                "JOB_EXPIRED",
                format!(
                    "Job exceeded its {}s time-to-live after {} of {} steps",
                    ttl.num_seconds(),
                    job.progress.completed_steps,
                    job.progress.total_steps
                ),
                "Resubmit the request; partial progress is kept on the job",
            );
            job.warnings.push(match job.current_step() {
                Some(step) => warning.at_step(step),
                None => warning,
            });
            job.transition(RequestStatus::Expired)?;

            match self.store.update(&mut job).await {
                Ok(()) => {
                    info!(job_id = %job.id, "Job expired");
                    self.notify_terminal(&job);
                    expired += 1;
                }
                Err(AppError::Conflict(_)) => {
                    debug!(job_id = %job.id, "Job changed during expiry sweep, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AccessControl, CreateInvestmentIdeaRequest, GenerationParameters, Visibility,
    };
    use crate::pipeline::executor::ModelResult;
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request() -> GenerationRequest {
        GenerationRequest {
            parameters: GenerationParameters {
                risk_tolerance: Some("moderate".to_string()),
                time_horizon: Some("long".to_string()),
                idea_count: Some(3),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn requester() -> Requester {
        Requester::new("user-1").in_organization("acme")
    }

    fn fast_retries() -> PipelineSettings {
        PipelineSettings {
            step_retry: RetryPolicy {
                max_retries: 2,
                initial_backoff_ms: 0,
                backoff_multiplier: 2.0,
                max_backoff_ms: 0,
            },
            ..Default::default()
        }
    }

    fn pipeline_with(executor: Arc<dyn ModelExecutor>, settings: PipelineSettings) -> (RequestPipeline, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::new());
        let pipeline = RequestPipeline::new(
            store.clone(),
            executor,
            Arc::new(ComplianceRegistry::new()),
            Arc::new(MarketAlertEvaluator::new()),
            settings,
        );
        (pipeline, store)
    }

    fn pipeline() -> (RequestPipeline, Arc<MemoryJobStore>) {
        pipeline_with(Arc::new(TemplateExecutor::new()), fast_retries())
    }

    async fn drive(pipeline: &RequestPipeline, job_id: &str) -> Job {
        for _ in 0..100 {
            if pipeline.advance(job_id).await.unwrap() == Advance::Idle {
                break;
            }
        }
        pipeline.store.get(job_id).await.unwrap().unwrap()
    }

    /// Fails data collection a fixed number of times
    struct FlakyExecutor {
        inner: TemplateExecutor,
        failures: AtomicU32,
        recoverable: bool,
    }

    impl FlakyExecutor {
        fn new(failures: u32, recoverable: bool) -> Self {
            Self {
                inner: TemplateExecutor::new(),
                failures: AtomicU32::new(failures),
                recoverable,
            }
        }
    }

    #[async_trait]
    impl ModelExecutor for FlakyExecutor {
        async fn plan_research(&self, ctx: &GenerationContext<'_>) -> ModelResult<String> {
            self.inner.plan_research(ctx).await
        }

        async fn collect_data(&self, ctx: &GenerationContext<'_>) -> ModelResult<Vec<String>> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(if self.recoverable {
                    RequestError::recoverable("UPSTREAM_TIMEOUT", "data source timed out")
                } else {
                    RequestError::fatal("UPSTREAM_REJECTED", "data source refused the query")
                });
            }
            self.inner.collect_data(ctx).await
        }

        async fn analyze_market(&self, ctx: &GenerationContext<'_>) -> ModelResult<String> {
            self.inner.analyze_market(ctx).await
        }

        async fn generate_ideas(
            &self,
            ctx: &GenerationContext<'_>,
        ) -> ModelResult<Vec<CreateInvestmentIdeaRequest>> {
            self.inner.generate_ideas(ctx).await
        }
    }

    #[tokio::test]
    async fn test_model_chosen_strategy_completes_compliant() {
        let (pipeline, _) = pipeline();
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        assert_eq!(job.status, RequestStatus::Queued);
        assert_eq!(job.progress.completed_steps, 3);

        let job = drive(&pipeline, &job.id).await;
        assert_eq!(job.status, RequestStatus::Completed);

        let result = pipeline.get_result(&job.id, &requester()).await.unwrap();
        assert!(!result.ideas.is_empty());
        assert!(result.ideas.iter().all(|i| i.compliance_status.compliant));
        assert!(result.ideas.iter().all(|i| !i.compliance_status.has_critical()));
        assert_eq!(result.metrics.phase_timings.len(), 7);
        assert_eq!(result.metrics.model_calls, 4);
        assert!(result.metrics.token_usage.total() > 0);
        assert_eq!(result.request_id, job.id);

        let completed: Vec<ProcessingStep> = job
            .processing_history
            .iter()
            .filter(|e| e.status == StepStatus::Completed)
            .map(|e| e.step)
            .collect();
        assert_eq!(completed, ProcessingStep::ALL.to_vec());
        assert_eq!(job.progress.percentage, 100.0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_without_a_job() {
        let (pipeline, store) = pipeline();
        let mut bad = request();
        bad.parameters.risk_tolerance = None;
        bad.parameters.idea_count = Some(0);

        match pipeline.submit(bad, &requester()).await {
            Err(AppError::Validation(errors)) => {
                let codes: Vec<&str> = errors.iter().map(|e| e.code.as_str()).collect();
                assert!(codes.contains(&codes::RISK_TOLERANCE_REQUIRED));
                assert!(codes.contains(&codes::INVALID_IDEA_COUNT));
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_jurisdiction() {
        let (pipeline, _) = pipeline();
        let mut req = request();
        req.parameters.jurisdiction = Some("APAC".to_string());
        match pipeline.submit(req, &requester()).await {
            Err(AppError::Validation(errors)) => {
                assert_eq!(errors[0].code, codes::UNSUPPORTED_JURISDICTION)
            }
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_submitting_for_someone_else_is_denied() {
        let (pipeline, _) = pipeline();
        let mut req = request();
        req.user_id = Some("user-2".to_string());
        assert!(matches!(
            pipeline.submit(req, &requester()).await,
            Err(AppError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (pipeline, _) = pipeline();
        let job = pipeline.submit(request(), &requester()).await.unwrap();

        let first = pipeline.cancel(&job.id, &requester()).await.unwrap();
        let second = pipeline.cancel(&job.id, &requester()).await.unwrap();
        assert_eq!(first.status, RequestStatus::Cancelled);
        assert_eq!(second.status, RequestStatus::Cancelled);
        assert_eq!(first.version, second.version);
        assert_eq!(first.processing_history, second.processing_history);

        assert_eq!(pipeline.advance(&job.id).await.unwrap(), Advance::Idle);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_immutable() {
        let (pipeline, _) = pipeline();
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        let done = drive(&pipeline, &job.id).await;

        assert!(matches!(
            pipeline.cancel(&job.id, &requester()).await,
            Err(AppError::InvalidTransition(_))
        ));
        assert_eq!(pipeline.advance(&job.id).await.unwrap(), Advance::Idle);
        assert_eq!(pipeline.expire_stale(Utc::now() + ChronoDuration::days(30)).await.unwrap(), 0);

        let after = pipeline.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(after.status, RequestStatus::Completed);
        assert_eq!(after.processing_history, done.processing_history);
        assert_eq!(after.version, done.version);
    }

    #[tokio::test]
    async fn test_recoverable_failure_is_retried() {
        let (pipeline, _) = pipeline_with(Arc::new(FlakyExecutor::new(2, true)), fast_retries());
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        let job = drive(&pipeline, &job.id).await;

        assert_eq!(job.status, RequestStatus::Completed);
        let retries = job
            .processing_history
            .iter()
            .filter(|e| e.status == StepStatus::Retrying)
            .count();
        assert_eq!(retries, 2);
        assert_eq!(job.errors.len(), 2);
        assert!(job.errors.iter().all(|e| e.recoverable));
        assert_eq!(job.result.unwrap().metrics.step_retries, 2);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let (pipeline, _) = pipeline_with(Arc::new(FlakyExecutor::new(10, true)), fast_retries());
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        let job = drive(&pipeline, &job.id).await;

        assert_eq!(job.status, RequestStatus::Failed);
        assert_eq!(job.errors.len(), 3);
        assert_eq!(job.errors[2].step, Some(ProcessingStep::DataCollection));
        assert_eq!(
            job.processing_history.last().map(|e| e.status),
            Some(StepStatus::Failed)
        );
        assert!(job.result.is_none());
    }

    #[tokio::test]
    async fn test_fatal_failure_is_not_retried() {
        let (pipeline, _) = pipeline_with(Arc::new(FlakyExecutor::new(1, false)), fast_retries());
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        let job = drive(&pipeline, &job.id).await;

        assert_eq!(job.status, RequestStatus::Failed);
        assert_eq!(job.errors.len(), 1);
        assert!(!job.errors[0].recoverable);
        assert!(matches!(
            pipeline.get_result(&job.id, &requester()).await,
            Err(AppError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_backoff_delays_the_retry() {
        let settings = PipelineSettings {
            step_retry: RetryPolicy {
                max_retries: 1,
                initial_backoff_ms: 60_000,
                backoff_multiplier: 2.0,
                max_backoff_ms: 60_000,
            },
            ..Default::default()
        };
        let (pipeline, _) = pipeline_with(Arc::new(FlakyExecutor::new(1, true)), settings);
        let job = pipeline.submit(request(), &requester()).await.unwrap();

        assert!(matches!(pipeline.advance(&job.id).await.unwrap(), Advance::Progressed(_)));
        assert!(matches!(pipeline.advance(&job.id).await.unwrap(), Advance::Progressed(_)));
        assert_eq!(pipeline.advance(&job.id).await.unwrap(), Advance::Waiting);
        assert!(pipeline.runnable(Utc::now()).await.unwrap().is_empty());
        assert_eq!(
            pipeline
                .runnable(Utc::now() + ChronoDuration::minutes(2))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_result_access() {
        let (pipeline, _) = pipeline();
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        assert_eq!(job.access_control.visibility, Visibility::Organization);

        assert!(matches!(
            pipeline.get_result(&job.id, &requester()).await,
            Err(AppError::NotReady(_))
        ));
        drive(&pipeline, &job.id).await;

        let colleague = Requester::new("user-2").in_organization("acme");
        assert!(pipeline.get_result(&job.id, &colleague).await.is_ok());

        let outsider = Requester::new("user-3").in_organization("globex");
        assert!(matches!(
            pipeline.get_result(&job.id, &outsider).await,
            Err(AppError::AccessDenied(_))
        ));
        assert!(matches!(
            pipeline.get_status("missing", &outsider).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            pipeline.cancel(&job.id, &colleague).await,
            Err(AppError::AccessDenied(_))
        ));
    }

    #[tokio::test]
    async fn test_confidential_request_is_private() {
        let (pipeline, _) = pipeline();
        let mut req = request();
        req.confidential = true;
        let job = pipeline.submit(req, &requester()).await.unwrap();
        assert_eq!(job.access_control, AccessControl::user_only("user-1"));

        let colleague = Requester::new("user-2").in_organization("acme");
        assert!(pipeline.get_status(&job.id, &colleague).await.is_err());
    }

    #[tokio::test]
    async fn test_expire_stale_keeps_progress() {
        let (pipeline, _) = pipeline();
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        pipeline.advance(&job.id).await.unwrap();

        assert_eq!(pipeline.expire_stale(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + pipeline.settings().job_ttl + ChronoDuration::seconds(1);
        assert_eq!(pipeline.expire_stale(later).await.unwrap(), 1);

        let expired = pipeline.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(expired.status, RequestStatus::Expired);
        assert!(expired.errors.is_empty());
        assert!(expired.warnings.iter().any(|w| w.code == "JOB_EXPIRED"));
        assert!(expired.artifacts.research_plan.is_some());
    }

    #[tokio::test]
    async fn test_update_idea_is_versioned() {
        let (pipeline, _) = pipeline();
        let job = pipeline.submit(request(), &requester()).await.unwrap();
        drive(&pipeline, &job.id).await;
        let idea_id = pipeline.get_result(&job.id, &requester()).await.unwrap().ideas[0]
            .id
            .clone();

        let update = UpdateInvestmentIdeaRequest {
            expected_version: Some(1),
            title: Some("Revised thesis".to_string()),
            ..Default::default()
        };
        let (idea, _) = pipeline
            .update_idea(&job.id, &idea_id, update.clone(), &requester())
            .await
            .unwrap();
        assert_eq!(idea.version, 2);
        assert_eq!(idea.updated_by.as_deref(), Some("user-1"));

        assert!(matches!(
            pipeline.update_idea(&job.id, &idea_id, update, &requester()).await,
            Err(AppError::Conflict(_))
        ));
        let stored = pipeline.get_result(&job.id, &requester()).await.unwrap();
        assert_eq!(stored.ideas[0].title, "Revised thesis");
    }

    #[tokio::test]
    async fn test_terminal_states_enqueue_callbacks() {
        let (queue, mut rx) = CallbackQueue::bounded(4);
        let (pipeline, _) = pipeline();
        let pipeline = pipeline.with_callbacks(queue);

        let mut req = request();
        req.callback = Some(crate::models::CallbackConfig {
            url: "https://hooks.example.com/ideas".to_string(),
            method: crate::models::CallbackMethod::Post,
            auth: None,
            retry_policy: RetryPolicy::default(),
            headers: Default::default(),
        });
        let job = pipeline.submit(req.clone(), &requester()).await.unwrap();
        drive(&pipeline, &job.id).await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.source_id, job.id);
        assert_eq!(event.payload["status"], "completed");
        assert!(event.payload["result"]["ideas"].is_array());

        let job = pipeline.submit(req, &requester()).await.unwrap();
        pipeline.cancel(&job.id, &requester()).await.unwrap();
        pipeline.cancel(&job.id, &requester()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().payload["status"], "cancelled");
        assert!(rx.try_recv().is_err());
    }

    /// Parks inside research planning until released
    struct GatedExecutor {
        inner: TemplateExecutor,
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl ModelExecutor for GatedExecutor {
        async fn plan_research(&self, ctx: &GenerationContext<'_>) -> ModelResult<String> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.plan_research(ctx).await
        }

        async fn collect_data(&self, ctx: &GenerationContext<'_>) -> ModelResult<Vec<String>> {
            self.inner.collect_data(ctx).await
        }

        async fn analyze_market(&self, ctx: &GenerationContext<'_>) -> ModelResult<String> {
            self.inner.analyze_market(ctx).await
        }

        async fn generate_ideas(
            &self,
            ctx: &GenerationContext<'_>,
        ) -> ModelResult<Vec<CreateInvestmentIdeaRequest>> {
            self.inner.generate_ideas(ctx).await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_step_discards_its_output() {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let executor = GatedExecutor {
            inner: TemplateExecutor::new(),
            entered: entered.clone(),
            release: release.clone(),
        };
        let (pipeline, _) = pipeline_with(Arc::new(executor), fast_retries());
        let pipeline = Arc::new(pipeline);
        let job = pipeline.submit(request(), &requester()).await.unwrap();

        let worker = {
            let pipeline = pipeline.clone();
            let id = job.id.clone();
            tokio::spawn(async move { pipeline.advance(&id).await })
        };
        entered.notified().await;
        pipeline.cancel(&job.id, &requester()).await.unwrap();
        release.notify_one();

        assert_eq!(worker.await.unwrap().unwrap(), Advance::Abandoned);
        let job = pipeline.store.get(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, RequestStatus::Cancelled);
        assert!(job.artifacts.research_plan.is_none());
        assert!(job
            .processing_history
            .iter()
            .all(|e| e.step != ProcessingStep::ResearchPlanning || e.status == StepStatus::Started));
    }
}
