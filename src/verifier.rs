//! Token verification orchestration.
//!
//! [`TokenVerifier::verify`] runs a fixed pipeline and stops at the first failure:
//!
//! 1. reject empty tokens and tokens longer than `max_token_len` before any parsing;
//! 2. admit the request through the per-client [`RateLimiter`];
//! 3. reject clients the [`AbuseTracker`] currently blocks;
//! 4. decode header and payload structurally and require a `kid`;
//! 5. resolve the `kid` through the [`KeyCache`];
//! 6. check the signature with the key's pinned algorithm, then `exp`/`nbf` with the configured
//!    skew, then issuer and audience;
//! 7. when issuer/audience is the only defect and the claimed issuer belongs to the deployment
//!    family, accept with degraded trust and emit an audit warning.
//!
//! Every rejection except the block check itself counts as a failure for the client, and so does
//! a verification the caller drops before it finishes. Callers only ever see claims or nothing;
//! the internal [`Rejection`] reason is logged, never returned.

pub mod claims;
pub mod trust;

pub use claims::{Audience, VerifiedClaims};
pub use trust::IssuerFamily;

// std
use std::sync::{
	Weak,
	atomic::{AtomicU64, Ordering},
};
// crates.io
use jsonwebtoken::Validation;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
// self
use crate::{
	_prelude::*,
	cache::{CacheMetricsSnapshot, KeyCache},
	clock::{Clock, SystemClock},
	config::VerifierConfig,
	guard::{AbuseTracker, RateLimiter},
	key::PinnedKey,
	obs::{self, Rejection, VerifyOutcome, VerifySpan},
	source::{self, KeySource},
};
#[cfg(feature = "reqwest")] use crate::source::ReqwestKeySource;

/// Result of one verification.
#[derive(Clone, Debug, PartialEq)]
pub enum Verdict {
	/// Signature, lifetime, issuer, and audience all verified.
	Accepted(VerifiedClaims),
	/// Signature and lifetime verified; issuer/audience drifted within the deployment family.
	DegradedAccepted(VerifiedClaims),
	/// Unauthenticated. No reason is attached.
	Rejected,
}
impl Verdict {
	/// Returns the claims of an accepted token.
	pub fn into_claims(self) -> Option<VerifiedClaims> {
		match self {
			Self::Accepted(claims) | Self::DegradedAccepted(claims) => Some(claims),
			Self::Rejected => None,
		}
	}

	/// Whether the token was accepted, fully or with degraded trust.
	pub fn is_accepted(&self) -> bool {
		!matches!(self, Self::Rejected)
	}

	/// Outcome label for this verdict.
	pub fn outcome(&self) -> VerifyOutcome {
		match self {
			Self::Accepted(_) => VerifyOutcome::Accepted,
			Self::DegradedAccepted(_) => VerifyOutcome::DegradedAccepted,
			Self::Rejected => VerifyOutcome::Rejected,
		}
	}
}

/// Thread-safe verification counters.
#[derive(Debug, Default)]
struct VerifierMetrics {
	accepted: AtomicU64,
	degraded_accepted: AtomicU64,
	rejected: AtomicU64,
}
impl VerifierMetrics {
	fn record(&self, outcome: VerifyOutcome, reason: Option<Rejection>) {
		let counter = match outcome {
			VerifyOutcome::Accepted => &self.accepted,
			VerifyOutcome::DegradedAccepted => &self.degraded_accepted,
			VerifyOutcome::Rejected => &self.rejected,
		};

		counter.fetch_add(1, Ordering::Relaxed);
		obs::record_verify_outcome(outcome, reason);
	}
}

/// Copy of the verifier counters at one instant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VerifierMetricsSnapshot {
	/// Fully verified tokens.
	pub accepted: u64,
	/// Tokens accepted with degraded trust.
	pub degraded_accepted: u64,
	/// Rejected tokens.
	pub rejected: u64,
	/// Key cache counters.
	pub cache: CacheMetricsSnapshot,
}

/// Counts reclaimed by one [`TokenVerifier::sweep`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
	/// Expired keys evicted from the cache.
	pub evicted_keys: usize,
	/// Idle clients whose rate window emptied.
	pub compacted_windows: usize,
	/// Clients whose block cool-down elapsed.
	pub unblocked_clients: usize,
}

/// Remote-key JWT verifier owning the key cache and per-client guards.
///
/// Construct one per process and share it behind an [`Arc`]; every method takes `&self`.
pub struct TokenVerifier {
	config: VerifierConfig,
	clock: Arc<dyn Clock>,
	keys: KeyCache,
	rate_limiter: RateLimiter,
	abuse: AbuseTracker,
	family: IssuerFamily,
	metrics: VerifierMetrics,
}
impl TokenVerifier {
	/// Creates a verifier that fetches keys from `config.jwks_url` over reqwest.
	#[cfg(feature = "reqwest")]
	pub fn from_config(config: VerifierConfig) -> Result<Self> {
		let source = ReqwestKeySource::from_config(&config)?;

		Ok(Self::new(config, Arc::new(source)))
	}

	/// Creates a verifier reading keys from `source` with the system clock.
	pub fn new(config: VerifierConfig, source: Arc<dyn KeySource>) -> Self {
		Self::with_clock(config, source, Arc::new(SystemClock))
	}

	/// Creates a verifier with an explicit clock.
	pub fn with_clock(
		config: VerifierConfig,
		source: Arc<dyn KeySource>,
		clock: Arc<dyn Clock>,
	) -> Self {
		let keys = KeyCache::new(source, clock.clone(), config.cache_ttl, config.fetch_timeout);
		let rate_limiter =
			RateLimiter::new(clock.clone(), config.rate_limit_window, config.rate_limit_max);
		let abuse =
			AbuseTracker::new(clock.clone(), config.max_failed_attempts, config.block_duration);
		let family =
			IssuerFamily::new(config.expected_issuer.clone(), config.trusted_issuer_suffixes.clone());

		Self { config, clock, keys, rate_limiter, abuse, family, metrics: Default::default() }
	}

	/// Validates a bearer token for `client_id`, returning its claims or `None`.
	///
	/// `None` must be treated as "unauthenticated" and answered uniformly.
	pub async fn validate_jwt(&self, token: &str, client_id: &str) -> Option<VerifiedClaims> {
		self.verify(token, client_id).await.into_claims()
	}

	/// Validates a bearer token and reports whether trust was degraded.
	///
	/// Dropping the returned future before it completes counts as a failed attempt for
	/// `client_id`.
	pub async fn verify(&self, token: &str, client_id: &str) -> Verdict {
		let mut attempt = PendingAttempt { verifier: self, client_id, settled: false };
		let span = VerifySpan::new("verify");
		let result = span.instrument(self.evaluate(token, client_id)).await;

		attempt.settled = true;

		match result {
			Ok(verdict) => {
				self.metrics.record(verdict.outcome(), None);

				verdict
			},
			Err(reason) => {
				self.reject(client_id, reason);

				Verdict::Rejected
			},
		}
	}

	/// Runs one maintenance pass over the key cache, rate windows, and failure records.
	pub fn sweep(&self) -> SweepReport {
		let report = SweepReport {
			evicted_keys: self.keys.sweep(),
			compacted_windows: self.rate_limiter.compact(),
			unblocked_clients: self.abuse.sweep(),
		};

		obs::log_sweep(report.evicted_keys, report.compacted_windows, report.unblocked_clients);

		report
	}

	/// Spawns the periodic [`sweep`](Self::sweep) on the current tokio runtime.
	///
	/// The task runs every `sweep_interval`, holds only a weak reference to the verifier, and
	/// stops when the returned handle or the last verifier reference is dropped.
	pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
		let verifier: Weak<Self> = Arc::downgrade(self);
		let period = source::std_duration(self.config.sweep_interval);
		let task = tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			// The first tick completes immediately.
			ticker.tick().await;

			loop {
				ticker.tick().await;

				let Some(verifier) = verifier.upgrade() else {
					break;
				};

				verifier.sweep();
			}
		});

		SweeperHandle { task: Some(task) }
	}

	/// Verification and cache counters.
	pub fn metrics(&self) -> VerifierMetricsSnapshot {
		VerifierMetricsSnapshot {
			accepted: self.metrics.accepted.load(Ordering::Relaxed),
			degraded_accepted: self.metrics.degraded_accepted.load(Ordering::Relaxed),
			rejected: self.metrics.rejected.load(Ordering::Relaxed),
			cache: self.keys.metrics(),
		}
	}

	/// Active configuration.
	pub fn config(&self) -> &VerifierConfig {
		&self.config
	}

	/// Key cache owned by this verifier.
	pub fn key_cache(&self) -> &KeyCache {
		&self.keys
	}

	/// Rate limiter owned by this verifier.
	pub fn rate_limiter(&self) -> &RateLimiter {
		&self.rate_limiter
	}

	/// Abuse tracker owned by this verifier.
	pub fn abuse_tracker(&self) -> &AbuseTracker {
		&self.abuse
	}

	fn reject(&self, client_id: &str, reason: Rejection) {
		if reason == Rejection::Blocked {
			obs::log_rejection(reason, client_id);
		} else {
			self.abuse.record_failure(client_id, reason);
		}

		self.metrics.record(VerifyOutcome::Rejected, Some(reason));
	}

	async fn evaluate(&self, token: &str, client_id: &str) -> Result<Verdict, Rejection> {
		if token.is_empty() {
			return Err(Rejection::MalformedToken);
		}
		if token.len() > self.config.max_token_len {
			return Err(Rejection::OversizedToken);
		}
		if !self.rate_limiter.allow(client_id) {
			return Err(Rejection::RateLimited);
		}
		if self.abuse.is_blocked(client_id) {
			return Err(Rejection::Blocked);
		}

		let unverified = claims::decode_unverified(token).ok_or(Rejection::MalformedToken)?;
		let entry = match self.keys.resolve_key(&unverified.kid).await {
			Ok(Some(entry)) => entry,
			Ok(None) => return Err(Rejection::UnknownKey),
			Err(_) => return Err(Rejection::SourceUnavailable),
		};
		let claims = self.verify_signature(token, &entry.key)?;

		self.check_lifetime(&claims)?;

		if self.issuer_and_audience_match(&claims) {
			return Ok(Verdict::Accepted(claims));
		}
		if self.config.degraded_issuer_fallback && self.family.contains(unverified.issuer()) {
			obs::log_degraded_accept(client_id, unverified.issuer(), &claims::fingerprint(token));

			return Ok(Verdict::DegradedAccepted(claims));
		}

		Err(Rejection::CryptoVerificationFailed)
	}

	fn verify_signature(&self, token: &str, key: &PinnedKey) -> Result<VerifiedClaims, Rejection> {
		// Only the signature and the presence of `exp` are checked here; lifetime runs against the
		// injected clock and issuer/audience feed the degraded-trust decision.
		let mut validation = Validation::new(key.algorithm());

		validation.leeway = 0;
		validation.validate_exp = false;
		validation.validate_nbf = false;
		validation.validate_aud = false;

		jsonwebtoken::decode::<VerifiedClaims>(token, key.decoding_key(), &validation)
			.map(|data| data.claims)
			.map_err(|_| Rejection::CryptoVerificationFailed)
	}

	fn check_lifetime(&self, claims: &VerifiedClaims) -> Result<(), Rejection> {
		let now = self.clock.now().unix_timestamp();
		let skew = self.config.clock_skew.whole_seconds();

		if now > claims.exp.saturating_add(skew) {
			return Err(Rejection::Expired);
		}
		if claims.nbf.is_some_and(|nbf| nbf > now.saturating_add(skew)) {
			return Err(Rejection::Expired);
		}

		Ok(())
	}

	fn issuer_and_audience_match(&self, claims: &VerifiedClaims) -> bool {
		if claims.iss.as_deref() != Some(self.config.expected_issuer.as_str()) {
			return false;
		}

		match self.config.expected_audience.as_deref() {
			Some(expected) => claims.aud.as_ref().is_some_and(|aud| aud.contains(expected)),
			None => true,
		}
	}
}
impl Debug for TokenVerifier {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenVerifier")
			.field("expected_issuer", &self.config.expected_issuer)
			.field("jwks_url", &self.config.jwks_url.as_str())
			.field("keys", &self.keys)
			.field("rate_limiter", &self.rate_limiter)
			.field("abuse", &self.abuse)
			.finish()
	}
}

/// In-flight verification; rejects the attempt as abandoned unless it settles.
struct PendingAttempt<'a> {
	verifier: &'a TokenVerifier,
	client_id: &'a str,
	settled: bool,
}
impl Drop for PendingAttempt<'_> {
	fn drop(&mut self) {
		if !self.settled {
			self.verifier.reject(self.client_id, Rejection::Abandoned);
		}
	}
}

/// Handle to the background sweep task; dropping it stops the task.
#[derive(Debug)]
pub struct SweeperHandle {
	task: Option<JoinHandle<()>>,
}
impl SweeperHandle {
	/// Stops the sweep task and waits for it to finish.
	pub async fn shutdown(mut self) {
		if let Some(task) = self.task.take() {
			task.abort();

			let _ = task.await;
		}
	}

	/// Whether the task has stopped.
	pub fn is_finished(&self) -> bool {
		self.task.as_ref().is_none_or(JoinHandle::is_finished)
	}
}
impl Drop for SweeperHandle {
	fn drop(&mut self) {
		if let Some(task) = self.task.as_ref() {
			task.abort();
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, clock::ManualClock, source::MemoryKeySource};

	const CLIENT: &str = "203.0.113.7";

	fn verifier_with(clock: &ManualClock) -> TokenVerifier {
		let config = VerifierConfig::builder(
			TEST_ISSUER,
			Url::parse("https://auth.example.com/api/auth/jwks").expect("Fixture URL should parse."),
		)
		.expected_audience("api")
		.trusted_issuer_suffixes(["example.com"])
		.build()
		.expect("Fixture configuration should be valid.");

		TokenVerifier::with_clock(
			config,
			Arc::new(MemoryKeySource::new(test_key_set())),
			Arc::new(clock.clone()),
		)
	}

	fn claims_at(clock: &ManualClock, issuer: &str) -> Value {
		let now = clock.now().unix_timestamp();

		serde_json::json!({
			"sub": "user-1",
			"iss": issuer,
			"aud": "api",
			"iat": now,
			"exp": now + 600,
		})
	}

	#[tokio::test]
	async fn lifetime_honors_the_skew_on_both_edges() {
		let clock = ManualClock::starting_now();
		let verifier = verifier_with(&clock);
		let now = clock.now().unix_timestamp();
		let mut claims: VerifiedClaims =
			serde_json::from_value(claims_at(&clock, TEST_ISSUER)).expect("Claims should parse.");

		claims.exp = now - 30;

		assert_eq!(verifier.check_lifetime(&claims), Ok(()));

		claims.exp = now - 31;

		assert_eq!(verifier.check_lifetime(&claims), Err(Rejection::Expired));

		claims.exp = now + 600;
		claims.nbf = Some(now + 30);

		assert_eq!(verifier.check_lifetime(&claims), Ok(()));

		claims.nbf = Some(now + 31);

		assert_eq!(verifier.check_lifetime(&claims), Err(Rejection::Expired));
	}

	#[tokio::test]
	async fn audience_mismatch_alone_degrades_for_the_expected_issuer() {
		let clock = ManualClock::starting_now();
		let verifier = verifier_with(&clock);
		let mut claims = claims_at(&clock, TEST_ISSUER);

		claims["aud"] = Value::from("another-app");

		let verdict = verifier.verify(&sign(PRIMARY_KID, &claims), CLIENT).await;

		assert!(matches!(verdict, Verdict::DegradedAccepted(_)));
		assert_eq!(verifier.abuse_tracker().failure_count(CLIENT), 0);
	}

	#[tokio::test]
	async fn disabled_fallback_rejects_issuer_drift() {
		let clock = ManualClock::starting_now();
		let mut config = verifier_with(&clock).config().clone();

		config.degraded_issuer_fallback = false;

		let verifier = TokenVerifier::with_clock(
			config,
			Arc::new(MemoryKeySource::new(test_key_set())),
			Arc::new(clock.clone()),
		);
		let token = sign(PRIMARY_KID, &claims_at(&clock, "https://preview.example.com"));

		assert_eq!(verifier.verify(&token, CLIENT).await, Verdict::Rejected);
		assert_eq!(verifier.abuse_tracker().failure_count(CLIENT), 1);
	}

	#[tokio::test]
	async fn blocked_checks_do_not_extend_the_block() {
		let clock = ManualClock::starting_now();
		let verifier = verifier_with(&clock);

		for _ in 0..verifier.config().max_failed_attempts {
			verifier.verify("not-a-jwt", CLIENT).await;
		}

		let token = sign(PRIMARY_KID, &claims_at(&clock, TEST_ISSUER));

		assert_eq!(verifier.verify(&token, CLIENT).await, Verdict::Rejected);
		assert_eq!(
			verifier.abuse_tracker().failure_count(CLIENT),
			verifier.config().max_failed_attempts
		);
	}

	#[tokio::test]
	async fn sweep_reports_reclaimed_state() {
		let clock = ManualClock::starting_now();
		let verifier = verifier_with(&clock);
		let token = sign(PRIMARY_KID, &claims_at(&clock, TEST_ISSUER));

		assert!(verifier.verify(&token, CLIENT).await.is_accepted());

		verifier.verify("garbage", "198.51.100.1").await;
		clock.advance(Duration::minutes(16));

		assert_eq!(
			verifier.sweep(),
			SweepReport { evicted_keys: 1, compacted_windows: 2, unblocked_clients: 1 }
		);
	}
}
