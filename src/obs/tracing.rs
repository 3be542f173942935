// self
use crate::_prelude::*;

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedVerify<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedVerify<F> = F;

/// A span builder used around verification and maintenance work.
#[derive(Clone, Debug)]
pub struct VerifySpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl VerifySpan {
	/// Creates a new span tagged with the provided stage.
	pub fn new(stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("jwks_sentinel.verify", stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = stage;

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedVerify<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Logs the internal reason for a rejection at debug level.
pub fn log_rejection(reason: crate::obs::Rejection, client_id: &str) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(reason = reason.as_str(), client_id, "token rejected");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (reason, client_id);
	}
}

/// Emits the warning-level audit event for a degraded acceptance.
pub fn log_degraded_accept(client_id: &str, issuer: Option<&str>, token_fingerprint: &str) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(
			client_id,
			issuer = issuer.unwrap_or("<missing>"),
			token_fingerprint,
			"token accepted with degraded trust after issuer/audience mismatch"
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (client_id, issuer, token_fingerprint);
	}
}

/// Logs a key source failure; sustained spikes indicate provider outages.
pub fn log_source_failure(kid: &str, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(kid, error = %error, "signing key source failed");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kid, error);
	}
}

/// Logs a key that was published but could not be imported.
pub fn log_key_import_failure(kid: &str, error: &dyn StdError) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(kid, error = %error, "published signing key could not be imported");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kid, error);
	}
}

/// Logs a client crossing the failure threshold.
pub fn log_client_blocked(client_id: &str, failures: u32) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(client_id, failures, "client blocked after repeated verification failures");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (client_id, failures);
	}
}

/// Logs the result of a periodic sweep.
pub fn log_sweep(evicted_keys: usize, compacted_windows: usize, unblocked_clients: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(evicted_keys, compacted_windows, unblocked_clients, "state sweep finished");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (evicted_keys, compacted_windows, unblocked_clients);
	}
}
