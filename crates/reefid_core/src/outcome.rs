use std::fmt;

/// What the identification service knows about a matched species.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpeciesData {
    pub common_name: String,
    pub scientific_name: Option<String>,
    pub confidence: Option<f32>,
    pub description: Option<String>,
    pub habitat: Option<String>,
}

/// User-facing failure buckets. Every raw error ends up in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    NetworkUnavailable,
    RateLimited,
    NoMatch,
    Malformed,
}

impl FailureCategory {
    /// Stable identifier used when the category is persisted.
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::NetworkUnavailable => "network_unavailable",
            FailureCategory::RateLimited => "rate_limited",
            FailureCategory::NoMatch => "no_match",
            FailureCategory::Malformed => "malformed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "network_unavailable" => Some(FailureCategory::NetworkUnavailable),
            "rate_limited" => Some(FailureCategory::RateLimited),
            "no_match" => Some(FailureCategory::NoMatch),
            "malformed" => Some(FailureCategory::Malformed),
            _ => None,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one identification attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum IdentificationOutcome {
    Success(SpeciesData),
    Failure(FailureCategory),
}

impl IdentificationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IdentificationOutcome::Success(_))
    }
}
