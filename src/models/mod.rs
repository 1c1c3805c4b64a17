//! Domain models
//!
//! Typed representations of ideas, generation jobs, market alerts and
//! access control. Wire payloads that arrive loosely typed (enum values as
//! plain strings) are kept separate from the typed models so validation can
//! report unknown values per field instead of failing deserialization.

/// Declares a closed string enumeration with serde names, `as_str`,
/// `FromStr` and the full list of members.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim() {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!(
                        "'{}' is not one of: {}",
                        other,
                        [$($text),+].join(", ")
                    )),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub mod access;
pub mod alert;
pub mod idea;
pub mod request;

pub use access::{AccessControl, Requester, Visibility};
pub use alert::{
    AlertCondition, ChannelType, ComparisonValue, CreateAlertRequest, DataInterval, DataType,
    MarketAlertConfig, MarketDataPoint, MarketDataPointInput, NotificationChannel,
    NotificationChannelInput, TriggeredAlert,
};
pub use idea::{
    ComplianceIssue, ComplianceStatus, CounterArgument, CreateInvestmentIdeaRequest,
    IdeaCategory, Investment, InvestmentIdea, InvestmentStrategy, IssueSeverity,
    OutcomeInput, PotentialOutcome, RiskLevel, Scenario, TargetAudience, TimeHorizon,
    UpdateInvestmentIdeaRequest,
};
pub use request::{
    BiasAssessment, CallbackAuth, CallbackAuthScheme, CallbackConfig, CallbackMethod,
    GenerationParameters, GenerationRequest, GenerationResult, Job, JobArtifacts, OutputFormat,
    PhaseTiming, Priority, ProcessingHistoryEntry, ProcessingMetrics, ProcessingPhase,
    ProcessingStep, Progress, QualityCheck, RequestError, RequestStatus, RequestWarning,
    ResultMetadata, RetryPolicy, StepStatus, TokenUsage,
};
