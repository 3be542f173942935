// self
use crate::obs::{CacheEvent, Rejection, VerifyOutcome};

/// Records a verification outcome via the global metrics recorder (when enabled).
pub fn record_verify_outcome(outcome: VerifyOutcome, reason: Option<Rejection>) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"jwks_sentinel_verify_total",
			"outcome" => outcome.as_str(),
			"reason" => reason.map(Rejection::as_str).unwrap_or("none")
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (outcome, reason);
	}
}

/// Records a key cache event via the global metrics recorder (when enabled).
pub fn record_cache_event(event: CacheEvent, count: u64) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("jwks_sentinel_key_cache_total", "event" => event.as_str())
			.increment(count);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (event, count);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recorders_noop_without_metrics() {
		record_verify_outcome(VerifyOutcome::Rejected, Some(Rejection::UnknownKey));
		record_cache_event(CacheEvent::Miss, 1);
	}
}
