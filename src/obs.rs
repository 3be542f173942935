//! Optional observability helpers for token verification.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit spans named `jwks_sentinel.verify` with a `stage` field, debug-level
//!   rejection reasons, and warning-level audit events for degraded acceptance.
//! - Enable `metrics` to increment the `jwks_sentinel_verify_total` counter (labeled by `outcome`
//!   and `reason`) and the `jwks_sentinel_key_cache_total` counter (labeled by `event`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Internal rejection taxonomy.
///
/// Reasons drive logs, metrics, and the abuse tracker; they are never returned to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Rejection {
	/// Token is empty, not three base64url segments, not JSON, or lacks a `kid`.
	MalformedToken,
	/// Token exceeds the configured maximum length.
	OversizedToken,
	/// Client exceeded its request ceiling.
	RateLimited,
	/// Client is blocked after repeated failures.
	Blocked,
	/// No published key matches the token's `kid`.
	UnknownKey,
	/// The key source could not be reached or timed out.
	SourceUnavailable,
	/// Signature, algorithm, issuer, or audience verification failed.
	CryptoVerificationFailed,
	/// `exp` is in the past or `nbf` in the future, beyond the allowed skew.
	Expired,
	/// The caller dropped the verification before it finished.
	Abandoned,
}
impl Rejection {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Rejection::MalformedToken => "malformed_token",
			Rejection::OversizedToken => "oversized_token",
			Rejection::RateLimited => "rate_limited",
			Rejection::Blocked => "blocked",
			Rejection::UnknownKey => "unknown_key",
			Rejection::SourceUnavailable => "source_unavailable",
			Rejection::CryptoVerificationFailed => "crypto_verification_failed",
			Rejection::Expired => "expired",
			Rejection::Abandoned => "abandoned",
		}
	}
}
impl Display for Rejection {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each verification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerifyOutcome {
	/// Fully verified token.
	Accepted,
	/// Token accepted under the issuer-drift exception.
	DegradedAccepted,
	/// Token rejected.
	Rejected,
}
impl VerifyOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			VerifyOutcome::Accepted => "accepted",
			VerifyOutcome::DegradedAccepted => "degraded_accepted",
			VerifyOutcome::Rejected => "rejected",
		}
	}
}
impl Display for VerifyOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Key cache events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheEvent {
	/// Fresh entry served from memory.
	Hit,
	/// Entry absent or expired.
	Miss,
	/// Key set fetched from the source.
	Fetch,
	/// Key source failed.
	FetchFailure,
	/// Entry removed by the periodic sweep.
	Evicted,
}
impl CacheEvent {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CacheEvent::Hit => "hit",
			CacheEvent::Miss => "miss",
			CacheEvent::Fetch => "fetch",
			CacheEvent::FetchFailure => "fetch_failure",
			CacheEvent::Evicted => "evicted",
		}
	}
}
impl Display for CacheEvent {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
