use reefid_core::FailureCategory;

use crate::{FailureKind, IdentifyError};

const RATE_LIMIT_MARKERS: &[&str] = &["rate limit", "rate-limit", "ratelimit", "too many requests"];

/// Maps a raw identification error to the category the user sees.
///
/// Rules apply in priority order: rate limiting, then transport failures, then
/// everything else folds into `NoMatch`, including decode failures.
pub fn classify(error: &IdentifyError) -> FailureCategory {
    if is_rate_limited(error) {
        return FailureCategory::RateLimited;
    }
    match error.kind {
        FailureKind::InvalidUrl
        | FailureKind::Network
        | FailureKind::Timeout
        | FailureKind::EmptyResponse => FailureCategory::NetworkUnavailable,
        FailureKind::HttpStatus(code) if !(200..300).contains(&code) => {
            FailureCategory::NetworkUnavailable
        }
        FailureKind::NoMatch | FailureKind::Decode => FailureCategory::NoMatch,
        FailureKind::HttpStatus(_) | FailureKind::RateLimited | FailureKind::Other => {
            FailureCategory::NoMatch
        }
    }
}

fn is_rate_limited(error: &IdentifyError) -> bool {
    if matches!(
        error.kind,
        FailureKind::RateLimited | FailureKind::HttpStatus(429)
    ) {
        return true;
    }
    let message = error.message.to_ascii_lowercase();
    RATE_LIMIT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}
