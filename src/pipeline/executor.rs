//! Model executor seam
//!
//! The pipeline calls the model through `ModelExecutor`, one call per
//! model-backed step. `TemplateExecutor` is a deterministic implementation
//! that builds ideas from a fixed instrument universe; it backs local
//! deployments and tests.

use crate::models::request::ModelPreferences;
use crate::models::{
    CounterArgument, CreateInvestmentIdeaRequest, GenerationParameters, Investment,
    InvestmentStrategy, OutcomeInput, RequestError, RiskLevel, TargetAudience, TimeHorizon,
    TokenUsage, TriggeredAlert,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};

/// Output of one model call
#[derive(Debug, Clone)]
pub struct ModelOutput<T> {
    pub value: T,
    pub model: String,
    pub usage: TokenUsage,
}

pub type ModelResult<T> = std::result::Result<ModelOutput<T>, RequestError>;

/// Everything a model call may look at
#[derive(Debug, Clone, Copy)]
pub struct GenerationContext<'a> {
    pub params: &'a GenerationParameters,
    pub user_id: &'a str,
    pub research_plan: Option<&'a str>,
    pub collected_data: &'a [String],
    pub market_analysis: Option<&'a str>,
    pub triggered_alerts: &'a [TriggeredAlert],
}

#[async_trait]
pub trait ModelExecutor: Send + Sync {
    async fn plan_research(&self, ctx: &GenerationContext<'_>) -> ModelResult<String>;

    async fn collect_data(&self, ctx: &GenerationContext<'_>) -> ModelResult<Vec<String>>;

    async fn analyze_market(&self, ctx: &GenerationContext<'_>) -> ModelResult<String>;

    /// Draft ideas; the pipeline validates and screens every draft
    async fn generate_ideas(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> ModelResult<Vec<CreateInvestmentIdeaRequest>>;
}

pub const TEMPLATE_MODEL: &str = "template-v1";

/// (sector, symbol, name)
const UNIVERSE: &[(&str, &str, &str)] = &[
    ("technology", "MSFT", "Microsoft"),
    ("technology", "AAPL", "Apple"),
    ("technology", "NVDA", "NVIDIA"),
    ("healthcare", "JNJ", "Johnson & Johnson"),
    ("healthcare", "UNH", "UnitedHealth"),
    ("healthcare", "ABT", "Abbott Laboratories"),
    ("financials", "JPM", "JPMorgan Chase"),
    ("financials", "V", "Visa"),
    ("financials", "CB", "Chubb"),
    ("energy", "XOM", "Exxon Mobil"),
    ("energy", "CVX", "Chevron"),
    ("consumer", "PG", "Procter & Gamble"),
    ("consumer", "KO", "Coca-Cola"),
    ("consumer", "COST", "Costco"),
    ("industrials", "HON", "Honeywell"),
    ("industrials", "CAT", "Caterpillar"),
    ("utilities", "NEE", "NextEra Energy"),
    ("utilities", "DUK", "Duke Energy"),
    ("real-estate", "PLD", "Prologis"),
    ("real-estate", "O", "Realty Income"),
];

/// Deterministic executor over a fixed instrument universe
#[derive(Debug, Clone, Default)]
pub struct TemplateExecutor;

impl TemplateExecutor {
    pub fn new() -> Self {
        Self
    }

    fn model_name(params: &GenerationParameters) -> String {
        params
            .model_preferences
            .as_ref()
            .and_then(|p: &ModelPreferences| p.preferred_model.clone())
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| TEMPLATE_MODEL.to_string())
    }

    fn output<T>(params: &GenerationParameters, prompt: &str, text_len: usize, value: T) -> ModelOutput<T> {
        ModelOutput {
            value,
            model: Self::model_name(params),
            usage: TokenUsage {
                prompt_tokens: 64 + prompt.len() as u64 / 4,
                completion_tokens: 16 + text_len as u64 / 4,
            },
        }
    }

    /// Sectors to draw from, in request order
    fn sectors(params: &GenerationParameters) -> Vec<&'static str> {
        let mut all: Vec<&'static str> = Vec::new();
        for (sector, _, _) in UNIVERSE {
            if !all.contains(sector) {
                all.push(sector);
            }
        }

        if params.sectors.is_empty() {
            return all;
        }

        params
            .sectors
            .iter()
            .filter_map(|wanted| {
                let wanted = wanted.trim().to_lowercase();
                all.iter().copied().find(|s| *s == wanted)
            })
            .collect()
    }

    fn eligible(params: &GenerationParameters, sector: &str) -> Vec<(&'static str, &'static str)> {
        UNIVERSE
            .iter()
            .filter(|(s, symbol, _)| {
                *s == sector
                    && !params
                        .excluded_investments
                        .iter()
                        .any(|e| e.trim().eq_ignore_ascii_case(symbol))
            })
            .map(|(_, symbol, name)| (*symbol, *name))
            .collect()
    }
}

/// Strategy the model picks when the request leaves it open
pub fn default_strategy(horizon: TimeHorizon, risk: RiskLevel) -> InvestmentStrategy {
    match horizon {
        TimeHorizon::Intraday | TimeHorizon::Short => InvestmentStrategy::Momentum,
        TimeHorizon::Medium => InvestmentStrategy::Growth,
        TimeHorizon::Long | TimeHorizon::VeryLong => match risk {
            RiskLevel::VeryLow | RiskLevel::Low => InvestmentStrategy::Income,
            RiskLevel::Moderate => InvestmentStrategy::Value,
            RiskLevel::High | RiskLevel::VeryHigh => InvestmentStrategy::Growth,
        },
    }
}

fn horizon_days(horizon: TimeHorizon) -> i64 {
    match horizon {
        TimeHorizon::Intraday => 1,
        TimeHorizon::Short => 30,
        TimeHorizon::Medium => 180,
        TimeHorizon::Long => 730,
        TimeHorizon::VeryLong => 1825,
    }
}

/// (expected return %, base confidence)
fn risk_profile(risk: RiskLevel) -> (f64, f64) {
    match risk {
        RiskLevel::VeryLow => (4.0, 0.75),
        RiskLevel::Low => (6.0, 0.7),
        RiskLevel::Moderate => (8.0, 0.65),
        RiskLevel::High => (12.0, 0.55),
        RiskLevel::VeryHigh => (18.0, 0.45),
    }
}

fn counter_argument(strategy: InvestmentStrategy) -> CounterArgument {
    let description = match strategy {
        InvestmentStrategy::Income => "Rising rates make bonds a competing source of yield",
        InvestmentStrategy::Value => "Cheap valuations can stay cheap without a catalyst",
        InvestmentStrategy::Growth => "Growth multiples compress quickly when rates rise",
        InvestmentStrategy::Momentum => "Momentum reverses sharply around earnings and macro news",
        _ => "Market conditions may move against the position before the thesis plays out",
    };
    CounterArgument {
        description: description.to_string(),
        probability: 0.3,
        impact: Some("medium".to_string()),
        mitigation: Some("Position sizing and a predefined exit level".to_string()),
    }
}

fn missing(field: &str) -> RequestError {
    RequestError::fatal("MISSING_PARAMETER", format!("{} is not set", field))
}

#[async_trait]
impl ModelExecutor for TemplateExecutor {
    async fn plan_research(&self, ctx: &GenerationContext<'_>) -> ModelResult<String> {
        let sectors = Self::sectors(ctx.params);
        let plan = format!(
            "Screen {} sector(s) [{}] for {} risk over a {} horizon; excluded: [{}]",
            sectors.len(),
            sectors.join(", "),
            ctx.params.risk_tolerance.as_deref().unwrap_or("unspecified"),
            ctx.params.time_horizon.as_deref().unwrap_or("unspecified"),
            ctx.params.excluded_investments.join(", "),
        );
        let len = plan.len();
        Ok(Self::output(ctx.params, "plan", len, plan))
    }

    async fn collect_data(&self, ctx: &GenerationContext<'_>) -> ModelResult<Vec<String>> {
        let mut data: Vec<String> = Self::sectors(ctx.params)
            .into_iter()
            .map(|sector| {
                let symbols: Vec<&str> = Self::eligible(ctx.params, sector)
                    .into_iter()
                    .map(|(symbol, _)| symbol)
                    .collect();
                format!("sector={} constituents={}", sector, symbols.join(","))
            })
            .collect();

        data.extend(ctx.triggered_alerts.iter().map(|alert| {
            format!(
                "alert={} symbol={} condition={} value={}",
                alert.alert_name, alert.symbol, alert.condition, alert.value
            )
        }));

        let len = data.iter().map(String::len).sum();
        Ok(Self::output(ctx.params, ctx.research_plan.unwrap_or_default(), len, data))
    }

    async fn analyze_market(&self, ctx: &GenerationContext<'_>) -> ModelResult<String> {
        let alerts = ctx.triggered_alerts.len();
        let mut analysis = format!(
            "Reviewed {} data series. Breadth is mixed; quality balance sheets are preferred.",
            ctx.collected_data.len()
        );
        if alerts > 0 {
            analysis.push_str(&format!(" {} recent market alert(s) were taken into account.", alerts));
        }
        let prompt = ctx.collected_data.join("\n");
        let len = analysis.len();
        Ok(Self::output(ctx.params, &prompt, len, analysis))
    }

    async fn generate_ideas(
        &self,
        ctx: &GenerationContext<'_>,
    ) -> ModelResult<Vec<CreateInvestmentIdeaRequest>> {
        let params = ctx.params;
        let risk = params.risk_tolerance_level().ok_or_else(|| missing("riskTolerance"))?;
        let horizon = params.horizon().ok_or_else(|| missing("timeHorizon"))?;
        let strategy = params
            .preferred_strategy()
            .unwrap_or_else(|| default_strategy(horizon, risk));
        let audience = params.audience().unwrap_or(TargetAudience::Retail);
        let (expected_return, base_confidence) = risk_profile(risk);
        let days = horizon_days(horizon);
        let model = Self::model_name(params);
        let now = Utc::now();

        let pools: Vec<(&str, Vec<(&str, &str)>)> = Self::sectors(params)
            .into_iter()
            .map(|s| (s, Self::eligible(params, s)))
            .filter(|(_, pool)| !pool.is_empty())
            .collect();

        if pools.is_empty() {
            return Err(RequestError::fatal(
                "NO_ELIGIBLE_INSTRUMENTS",
                "No instruments remain after applying sector filters and exclusions",
            ));
        }

        let mut drafts = Vec::new();
        for i in 0..params.requested_ideas() {
            let (sector, pool) = &pools[i % pools.len()];
            let round = i / pools.len();
            let picks: Vec<(&str, &str)> = (0..pool.len().min(2))
                .map(|k| pool[(round + k) % pool.len()])
                .collect();
            let allocation = 100.0 / picks.len() as f64;

            let alerted: Vec<&str> = ctx
                .triggered_alerts
                .iter()
                .filter(|a| picks.iter().any(|(symbol, _)| *symbol == a.symbol))
                .map(|a| a.alert_name.as_str())
                .collect();

            let names: Vec<&str> = picks.iter().map(|(_, name)| *name).collect();
            let symbols: Vec<&str> = picks.iter().map(|(symbol, _)| *symbol).collect();
            let mut rationale = format!(
                "{} {} in {} fit a {} mandate.",
                ctx.market_analysis.unwrap_or("No market analysis available."),
                names.join(" and "),
                sector,
                strategy
            );
            if !alerted.is_empty() {
                rationale.push_str(&format!(" Triggered alerts: {}.", alerted.join(", ")));
            }

            drafts.push(CreateInvestmentIdeaRequest {
                title: Some(format!(
                    "{} opportunity in {}: {}",
                    capitalize(strategy.as_str()),
                    sector,
                    symbols.join("/")
                )),
                description: Some(format!(
                    "{} positioned for {} {} exposure in {}.",
                    names.join(" and "),
                    horizon,
                    strategy,
                    sector
                )),
                rationale: Some(rationale),
                investments: picks
                    .iter()
                    .map(|(symbol, name)| Investment {
                        symbol: symbol.to_string(),
                        name: Some(name.to_string()),
                        asset_type: Some("stock".to_string()),
                        allocation_percentage: allocation,
                        entry_price: None,
                        target_price: None,
                        stop_loss: None,
                    })
                    .collect(),
                strategy: Some(strategy.as_str().to_string()),
                time_horizon: Some(horizon.as_str().to_string()),
                category: Some("equity".to_string()),
                risk_level: Some(risk.as_str().to_string()),
                target_audience: Some(audience.as_str().to_string()),
                confidence_score: Some((base_confidence - 0.02 * i as f64).max(0.35)),
                potential_outcomes: vec![
                    outcome("expected", "Thesis plays out as planned", 0.55, expected_return, days),
                    outcome("best-case", "Sector rerates upward", 0.25, expected_return * 2.0, days),
                    outcome("worst-case", "Thesis fails and the position is exited", 0.2, -expected_return, days / 2),
                ],
                counter_arguments: vec![counter_argument(strategy)],
                compliance_status: None,
                created_by: Some(model.clone()),
                generated_at: Some(now),
                expires_at: Some(now + Duration::days(days.max(1))),
                tags: vec![sector.to_string(), strategy.as_str().to_string()],
            });
        }

        let prompt = ctx.market_analysis.unwrap_or_default();
        let len = drafts.len() * 400;
        Ok(Self::output(params, prompt, len, drafts))
    }
}

fn outcome(scenario: &str, description: &str, probability: f64, ret: f64, days: i64) -> OutcomeInput {
    OutcomeInput {
        scenario: Some(scenario.to_string()),
        description: Some(description.to_string()),
        probability,
        expected_return: Some(ret),
        time_to_realization: days as f64,
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> GenerationParameters {
        GenerationParameters {
            risk_tolerance: Some("moderate".to_string()),
            time_horizon: Some("long".to_string()),
            idea_count: Some(3),
            ..Default::default()
        }
    }

    fn ctx(params: &GenerationParameters) -> GenerationContext<'_> {
        GenerationContext {
            params,
            user_id: "user-1",
            research_plan: None,
            collected_data: &[],
            market_analysis: Some("Analysis."),
            triggered_alerts: &[],
        }
    }

    #[test]
    fn test_default_strategy_avoids_mismatch() {
        for horizon in TimeHorizon::ALL {
            for risk in RiskLevel::ALL {
                let strategy = default_strategy(*horizon, *risk);
                assert!(!crate::validation::strategy_horizon_mismatch(strategy, *horizon));
            }
        }
    }

    #[tokio::test]
    async fn test_generates_requested_count_of_valid_drafts() {
        let params = params();
        let out = TemplateExecutor::new().generate_ideas(&ctx(&params)).await.unwrap();
        assert_eq!(out.value.len(), 3);
        assert_eq!(out.model, TEMPLATE_MODEL);
        for draft in out.value {
            assert_eq!(draft.strategy.as_deref(), Some("value"));
            let (_, warnings) = draft.into_idea().unwrap();
            assert!(warnings.is_empty(), "{:?}", warnings);
        }
    }

    #[tokio::test]
    async fn test_exclusions_and_sectors_are_respected() {
        let mut params = params();
        params.sectors = vec!["Energy".to_string()];
        params.excluded_investments = vec!["xom".to_string()];
        let out = TemplateExecutor::new().generate_ideas(&ctx(&params)).await.unwrap();
        for draft in &out.value {
            assert!(draft.investments.iter().all(|i| i.symbol == "CVX"));
        }

        params.excluded_investments.push("CVX".to_string());
        let err = TemplateExecutor::new().generate_ideas(&ctx(&params)).await.unwrap_err();
        assert_eq!(err.code, "NO_ELIGIBLE_INSTRUMENTS");
        assert!(!err.recoverable);
    }

    #[tokio::test]
    async fn test_preferred_model_is_reported() {
        let mut params = params();
        params.model_preferences = Some(ModelPreferences {
            preferred_model: Some("research-large".to_string()),
            ..Default::default()
        });
        let out = TemplateExecutor::new().plan_research(&ctx(&params)).await.unwrap();
        assert_eq!(out.model, "research-large");
        assert!(out.usage.total() > 0);
    }
}
