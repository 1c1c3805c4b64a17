//! Investment idea models

use crate::error::{AppError, Result};
use crate::validation::{self, ValidationWarning};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

string_enum! {
    /// Trading strategy an idea follows
    pub enum InvestmentStrategy {
        Buy => "buy",
        Sell => "sell",
        Hold => "hold",
        Short => "short",
        Long => "long",
        Hedge => "hedge",
        Arbitrage => "arbitrage",
        PairsTrade => "pairs-trade",
        Momentum => "momentum",
        Value => "value",
        Growth => "growth",
        Income => "income",
        Complex => "complex",
    }
}

string_enum! {
    /// Holding period of an idea
    pub enum TimeHorizon {
        Intraday => "intraday",
        Short => "short",
        Medium => "medium",
        Long => "long",
        VeryLong => "very-long",
    }
}

string_enum! {
    /// Asset class bucket
    pub enum IdeaCategory {
        Equity => "equity",
        FixedIncome => "fixed-income",
        Commodity => "commodity",
        Currency => "currency",
        RealEstate => "real-estate",
        Derivatives => "derivatives",
        Alternative => "alternative",
        MultiAsset => "multi-asset",
    }
}

string_enum! {
    /// Risk level, ordered from lowest to highest
    pub enum RiskLevel {
        VeryLow => "very-low",
        Low => "low",
        Moderate => "moderate",
        High => "high",
        VeryHigh => "very-high",
    }
}

string_enum! {
    /// Intended investor audience
    pub enum TargetAudience {
        Retail => "retail",
        Accredited => "accredited",
        Institutional => "institutional",
        Professional => "professional",
    }
}

string_enum! {
    /// Scenario tag of a potential outcome
    pub enum Scenario {
        BestCase => "best-case",
        Expected => "expected",
        WorstCase => "worst-case",
        Alternative => "alternative",
    }
}

string_enum! {
    /// Severity of a compliance issue
    pub enum IssueSeverity {
        Info => "info",
        Warning => "warning",
        Critical => "critical",
    }
}

/// A single position inside an idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Investment {
    pub symbol: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub asset_type: Option<String>,
    pub allocation_percentage: f64,
    #[serde(default)]
    pub entry_price: Option<f64>,
    #[serde(default)]
    pub target_price: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PotentialOutcome {
    pub scenario: Scenario,
    pub description: String,
    pub probability: f64,
    pub expected_return: f64,
    /// Days until the outcome is expected to play out
    pub time_to_realization: f64,
}

/// Loosely typed outcome as received on the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeInput {
    #[serde(default)]
    pub scenario: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub probability: f64,
    #[serde(default)]
    pub expected_return: Option<f64>,
    #[serde(default)]
    pub time_to_realization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterArgument {
    #[serde(default)]
    pub description: String,
    pub probability: f64,
    #[serde(default)]
    pub impact: Option<String>,
    #[serde(default)]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceIssue {
    pub code: String,
    pub severity: IssueSeverity,
    pub message: String,
    #[serde(default)]
    pub regulation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceStatus {
    pub compliant: bool,
    #[serde(default)]
    pub issues: Vec<ComplianceIssue>,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl ComplianceStatus {
    /// Status of an idea that has not been reviewed yet
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn has_critical(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Critical)
    }
}

/// The generated artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentIdea {
    pub id: String,
    pub title: String,
    pub description: String,
    pub rationale: String,
    pub investments: Vec<Investment>,
    pub strategy: InvestmentStrategy,
    pub time_horizon: TimeHorizon,
    pub category: Option<IdeaCategory>,
    pub risk_level: RiskLevel,
    pub target_audience: Option<TargetAudience>,
    pub confidence_score: f64,
    pub potential_outcomes: Vec<PotentialOutcome>,
    pub counter_arguments: Vec<CounterArgument>,
    pub compliance_status: ComplianceStatus,
    pub version: u32,
    pub created_by: String,
    pub generated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Create-idea payload with enumerations still in string form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvestmentIdeaRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub investments: Vec<Investment>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub time_horizon: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub potential_outcomes: Vec<OutcomeInput>,
    #[serde(default)]
    pub counter_arguments: Vec<CounterArgument>,
    #[serde(default)]
    pub compliance_status: Option<ComplianceStatus>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update; only supplied fields are validated and applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvestmentIdeaRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    #[serde(default)]
    pub expected_version: Option<u32>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub investments: Option<Vec<Investment>>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub time_horizon: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub target_audience: Option<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub potential_outcomes: Option<Vec<OutcomeInput>>,
    #[serde(default)]
    pub counter_arguments: Option<Vec<CounterArgument>>,
    #[serde(default)]
    pub compliance_status: Option<ComplianceStatus>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

fn parse_opt<E: FromStr>(value: Option<&str>) -> Option<E> {
    value.and_then(|v| v.parse().ok())
}

fn require<T>(value: Option<T>, field: &str) -> Result<T> {
    value.ok_or_else(|| AppError::Internal(format!("validated field '{}' missing", field)))
}

fn convert_outcomes(inputs: Vec<OutcomeInput>) -> Result<Vec<PotentialOutcome>> {
    inputs
        .into_iter()
        .map(|o| {
            Ok(PotentialOutcome {
                scenario: require(parse_opt(o.scenario.as_deref()), "scenario")?,
                description: o.description.unwrap_or_default(),
                probability: o.probability,
                expected_return: o.expected_return.unwrap_or(0.0),
                time_to_realization: o.time_to_realization,
            })
        })
        .collect()
}

impl CreateInvestmentIdeaRequest {
    /// Validate and convert into a version 1 idea.
    ///
    /// Warnings produced by validation are returned alongside the idea.
    pub fn into_idea(self) -> Result<(InvestmentIdea, Vec<ValidationWarning>)> {
        let result = validation::validate_create_request(&self);
        if !result.is_valid {
            return Err(AppError::Validation(result.errors));
        }

        let idea = InvestmentIdea {
            id: uuid::Uuid::new_v4().to_string(),
            title: require(self.title, "title")?.trim().to_string(),
            description: require(self.description, "description")?.trim().to_string(),
            rationale: require(self.rationale, "rationale")?.trim().to_string(),
            investments: self.investments,
            strategy: require(parse_opt(self.strategy.as_deref()), "strategy")?,
            time_horizon: require(parse_opt(self.time_horizon.as_deref()), "timeHorizon")?,
            category: parse_opt(self.category.as_deref()),
            risk_level: require(parse_opt(self.risk_level.as_deref()), "riskLevel")?,
            target_audience: parse_opt(self.target_audience.as_deref()),
            confidence_score: require(self.confidence_score, "confidenceScore")?,
            potential_outcomes: convert_outcomes(self.potential_outcomes)?,
            counter_arguments: self.counter_arguments,
            compliance_status: self.compliance_status.unwrap_or_else(ComplianceStatus::pending),
            version: 1,
            created_by: require(self.created_by, "createdBy")?.trim().to_string(),
            generated_at: self.generated_at.unwrap_or_else(Utc::now),
            expires_at: self.expires_at,
            updated_at: None,
            updated_by: None,
            tags: self.tags,
            metadata: HashMap::new(),
        };

        Ok((idea, result.warnings))
    }
}

impl InvestmentIdea {
    /// Apply a versioned partial update.
    ///
    /// The idea is left untouched unless the update validates, the expected
    /// version (when given) matches, and the resulting idea is itself valid.
    pub fn apply_update(
        &mut self,
        update: UpdateInvestmentIdeaRequest,
    ) -> Result<Vec<ValidationWarning>> {
        let check = validation::validate_update_request(&update);
        if !check.is_valid {
            return Err(AppError::Validation(check.errors));
        }

        if update.id.as_deref().map(str::trim) != Some(self.id.as_str()) {
            return Err(AppError::Validation(vec![validation::ValidationError::new(
                "id",
                "Update id does not match the idea",
                "ID_MISMATCH",
            )]));
        }

        if let Some(expected) = update.expected_version {
            if expected != self.version {
                return Err(AppError::Conflict(format!(
                    "Idea {} is at version {}, update expected {}",
                    self.id, self.version, expected
                )));
            }
        }

        let mut next = self.clone();
        if let Some(title) = update.title {
            next.title = title.trim().to_string();
        }
        if let Some(description) = update.description {
            next.description = description.trim().to_string();
        }
        if let Some(rationale) = update.rationale {
            next.rationale = rationale.trim().to_string();
        }
        if let Some(investments) = update.investments {
            next.investments = investments;
        }
        if let Some(strategy) = parse_opt(update.strategy.as_deref()) {
            next.strategy = strategy;
        }
        if let Some(horizon) = parse_opt(update.time_horizon.as_deref()) {
            next.time_horizon = horizon;
        }
        if update.category.is_some() {
            next.category = parse_opt(update.category.as_deref());
        }
        if let Some(risk) = parse_opt(update.risk_level.as_deref()) {
            next.risk_level = risk;
        }
        if update.target_audience.is_some() {
            next.target_audience = parse_opt(update.target_audience.as_deref());
        }
        if let Some(score) = update.confidence_score {
            next.confidence_score = score;
        }
        if let Some(outcomes) = update.potential_outcomes {
            next.potential_outcomes = convert_outcomes(outcomes)?;
        }
        if let Some(arguments) = update.counter_arguments {
            next.counter_arguments = arguments;
        }
        if let Some(status) = update.compliance_status {
            next.compliance_status = status;
        }
        if update.expires_at.is_some() {
            next.expires_at = update.expires_at;
        }
        if let Some(tags) = update.tags {
            next.tags = tags;
        }

        next.version += 1;
        next.updated_at = Some(Utc::now());
        next.updated_by = update.updated_by.map(|u| u.trim().to_string());

        let result = validation::validate_idea(&next);
        if !result.is_valid {
            if let Some(contradiction) = result
                .errors
                .iter()
                .find(|e| e.code == validation::codes::COMPLIANCE_CONTRADICTION)
            {
                return Err(AppError::ComplianceContradiction(contradiction.message.clone()));
            }
            return Err(AppError::Validation(result.errors));
        }

        *self = next;

        let mut warnings = check.warnings;
        warnings.extend(result.warnings);
        Ok(warnings)
    }

    /// Total allocation across all positions, in percent
    pub fn total_allocation(&self) -> f64 {
        self.investments.iter().map(|i| i.allocation_percentage).sum()
    }
}
