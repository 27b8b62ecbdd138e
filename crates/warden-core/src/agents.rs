//! Agent catalogue
//!
//! The six agent kinds are a closed set. Adding one is a code change so that
//! breaker and metrics tables stay exhaustive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the fixed AI operation kinds wrapped by the subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentType {
    Extractor,
    Refiner,
    Classifier,
    Expander,
    Validator,
    RiskDetector,
}

impl AgentType {
    /// Every agent kind, in display order.
    pub const ALL: [AgentType; 6] = [
        AgentType::Extractor,
        AgentType::Refiner,
        AgentType::Classifier,
        AgentType::Expander,
        AgentType::Validator,
        AgentType::RiskDetector,
    ];

    /// Stable wire name, e.g. `RISK_DETECTOR`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extractor => "EXTRACTOR",
            Self::Refiner => "REFINER",
            Self::Classifier => "CLASSIFIER",
            Self::Expander => "EXPANDER",
            Self::Validator => "VALIDATOR",
            Self::RiskDetector => "RISK_DETECTOR",
        }
    }

    /// Dense index into per-agent tables.
    pub fn index(&self) -> usize {
        match self {
            Self::Extractor => 0,
            Self::Refiner => 1,
            Self::Classifier => 2,
            Self::Expander => 3,
            Self::Validator => 4,
            Self::RiskDetector => 5,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Extractor => "Requirement Extractor",
            Self::Refiner => "Requirement Refiner",
            Self::Classifier => "Requirement Classifier",
            Self::Expander => "Requirement Expander",
            Self::Validator => "Requirement Validator",
            Self::RiskDetector => "Risk Detector",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Extractor => "Extracts candidate requirements from free-form source text",
            Self::Refiner => "Rewrites requirements into clear, testable statements",
            Self::Classifier => "Assigns requirements to taxonomy categories",
            Self::Expander => "Derives detailed sub-requirements from a parent requirement",
            Self::Validator => "Checks requirements for ambiguity, conflicts and completeness",
            Self::RiskDetector => "Flags delivery, compliance and technical risks",
        }
    }

    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            agent_type: *self,
            name: self.display_name(),
            description: self.description(),
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown agent name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent type: {0}")]
pub struct UnknownAgentType(pub String);

impl FromStr for AgentType {
    type Err = UnknownAgentType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        AgentType::ALL
            .into_iter()
            .find(|agent| agent.as_str() == normalized)
            .ok_or_else(|| UnknownAgentType(s.to_string()))
    }
}

/// Catalogue entry served to the admin UI.
#[derive(Debug, Clone, Serialize)]
pub struct AgentInfo {
    #[serde(rename = "type")]
    pub agent_type: AgentType,
    pub name: &'static str,
    pub description: &'static str,
}

/// The full catalogue.
pub fn catalogue() -> Vec<AgentInfo> {
    AgentType::ALL.iter().map(AgentType::info).collect()
}
