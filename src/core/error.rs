use thiserror::Error;

/// Failure modes of a single CNR lookup.
///
/// The lookup loop retries everything [`HarvestError::is_retryable`] says yes
/// to and bails immediately on the rest. The portal can misbehave in ways
/// that look identical at the HTTP layer (a 200 with an error div), so the
/// classification lives here rather than on status codes.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("invalid CNR '{value}': {reason}")]
    InvalidCnr { value: String, reason: String },

    /// The portal rejected the submitted captcha text.
    #[error("portal rejected captcha solution")]
    CaptchaRejected,

    /// The captcha backend produced nothing usable.
    #[error("captcha solve failed: {0}")]
    CaptchaSolveFailed(String),

    /// The "Oops! Invalid Request" interstitial (stale or missing app token).
    #[error("portal returned the invalid-request interstitial")]
    InvalidRequest,

    /// The portal answered, but with "Invalid CNR Number" / no such case.
    #[error("no case found for this CNR")]
    RecordNotFound,

    /// Response parsed cleanly but carried no court name and no case type.
    /// Seen when the session goes stale mid-search; worth one more attempt.
    #[error("response contained no case data")]
    EmptyRecord,

    #[error("app token not found in portal landing page")]
    TokenMissing,

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup exhausted after {attempts} attempts (last: {last})")]
    Exhausted { attempts: u32, last: String },

    #[error("{0}")]
    Other(String),
}

impl HarvestError {
    /// Whether the lookup loop should spend another attempt on this failure.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::CaptchaRejected
            | HarvestError::CaptchaSolveFailed(_)
            | HarvestError::InvalidRequest
            | HarvestError::EmptyRecord
            | HarvestError::TokenMissing
            | HarvestError::Http(_) => true,
            HarvestError::InvalidCnr { .. }
            | HarvestError::RecordNotFound
            | HarvestError::Exhausted { .. }
            | HarvestError::Other(_) => false,
        }
    }

    /// Whether recovery requires a fresh app token before the next attempt.
    pub fn needs_token_refresh(&self) -> bool {
        matches!(
            self,
            HarvestError::InvalidRequest | HarvestError::TokenMissing
        )
    }
}
