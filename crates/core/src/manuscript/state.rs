use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a manuscript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManuscriptState {
    Draft,
    Queued,
    Analyzing,
    Analyzed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal manuscript transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: ManuscriptState,
    pub to: ManuscriptState,
}

impl ManuscriptState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Queued => "queued",
            Self::Analyzing => "analyzing",
            Self::Analyzed => "analyzed",
            Self::Failed => "failed",
        }
    }

    /// The single gate for state changes. Staying put is always allowed.
    pub fn transition(self, to: ManuscriptState) -> Result<ManuscriptState, IllegalTransition> {
        use ManuscriptState::*;

        let allowed = self == to
            || matches!(
                (self, to),
                (Draft, Queued)
                    | (Draft, Failed)
                    | (Queued, Analyzing)
                    | (Queued, Draft)
                    | (Queued, Failed)
                    | (Analyzing, Analyzed)
                    | (Analyzing, Draft)
                    | (Analyzing, Queued)
                    | (Analyzed, Queued)
                    | (Failed, Queued)
            );

        if allowed {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }
}

impl fmt::Display for ManuscriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ManuscriptState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "queued" => Ok(Self::Queued),
            "analyzing" => Ok(Self::Analyzing),
            "analyzed" => Ok(Self::Analyzed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown manuscript state: {}", other)),
        }
    }
}
