//! Verifier configuration, validation, and environment loading.
//!
//! Every option has a safe default except the expected issuer. [`VerifierConfig::from_env`]
//! recognizes the following variables (all optional unless noted):
//!
//! | Variable | Meaning | Default |
//! | --- | --- | --- |
//! | `JWT_EXPECTED_ISSUER` | Expected `iss` claim (required) | – |
//! | `JWT_JWKS_URL` | JWKS endpoint | `<JWT_ISSUER_BASE or issuer>/api/auth/jwks` |
//! | `JWT_ISSUER_BASE` | Base URL used to derive the JWKS endpoint | issuer |
//! | `JWT_EXPECTED_AUDIENCE` | Expected `aud` claim | unchecked |
//! | `JWT_BYPASS_SECRET` | Edge-protection bypass credential | none |
//! | `JWT_FETCH_TIMEOUT_SECS` | JWKS request timeout | 5 |
//! | `JWT_CACHE_TTL_SECS` | Key cache TTL | 300 |
//! | `JWT_SWEEP_INTERVAL_SECS` | Background sweep interval | 300 |
//! | `JWT_RATE_LIMIT_WINDOW_SECS` | Rate-limit window | 60 |
//! | `JWT_RATE_LIMIT_MAX` | Requests allowed per window | 300 |
//! | `JWT_MAX_FAILED_ATTEMPTS` | Failures before blocking | 10 |
//! | `JWT_BLOCK_DURATION_SECS` | Block cool-down | 900 |
//! | `JWT_MAX_TOKEN_LEN` | Maximum token length in bytes | 4096 |
//! | `JWT_CLOCK_SKEW_SECS` | Leeway for `exp`/`nbf` | 30 |
//! | `JWT_DEGRADED_ISSUER_FALLBACK` | Enable degraded acceptance | true |
//! | `JWT_TRUSTED_ISSUER_SUFFIXES` | Comma-separated deployment-family domains | empty |

// self
use crate::{_prelude::*, error::ConfigError};

/// Default header carrying the edge-protection bypass credential.
pub const DEFAULT_BYPASS_HEADER: &str = "x-vercel-protection-bypass";
/// Conventional JWKS path below the issuer base URL.
pub const JWKS_PATH: &str = "api/auth/jwks";

/// Immutable verifier settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerifierConfig {
	/// Issuer every accepted token must carry.
	pub expected_issuer: String,
	/// Audience every accepted token must carry, when set.
	pub expected_audience: Option<String>,
	/// JWKS endpoint.
	pub jwks_url: Url,
	/// Optional credential for identity providers behind edge protection.
	pub bypass_secret: Option<String>,
	/// Header name used for [`bypass_secret`](Self::bypass_secret).
	pub bypass_header: String,
	/// `user-agent` sent to the JWKS endpoint.
	pub user_agent: String,
	/// Hard timeout for a JWKS fetch.
	pub fetch_timeout: Duration,
	/// Reject plain-HTTP JWKS endpoints.
	pub require_https: bool,
	/// Lifetime of an imported key.
	pub cache_ttl: Duration,
	/// Interval of the background sweep.
	pub sweep_interval: Duration,
	/// Sliding rate-limit window.
	pub rate_limit_window: Duration,
	/// Requests allowed per client within [`rate_limit_window`](Self::rate_limit_window).
	pub rate_limit_max: usize,
	/// Consecutive failures after which a client is blocked.
	pub max_failed_attempts: u32,
	/// How long a blocked client stays blocked after its last failure.
	pub block_duration: Duration,
	/// Longest token accepted for decoding, in bytes.
	pub max_token_len: usize,
	/// Leeway applied to `exp` and `nbf`.
	pub clock_skew: Duration,
	/// Accept tokens whose only defect is an issuer/audience mismatch within the deployment
	/// family. Every such acceptance is logged at warning level.
	pub degraded_issuer_fallback: bool,
	/// Domain suffixes that identify the deployment family for degraded acceptance.
	pub trusted_issuer_suffixes: Vec<String>,
}
impl VerifierConfig {
	/// Default JWKS fetch timeout.
	pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::seconds(5);
	/// Default key cache TTL.
	pub const DEFAULT_CACHE_TTL: Duration = Duration::minutes(5);
	/// Default sweep interval.
	pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::minutes(5);
	/// Default rate-limit window.
	pub const DEFAULT_RATE_LIMIT_WINDOW: Duration = Duration::seconds(60);
	/// Default per-window request ceiling.
	pub const DEFAULT_RATE_LIMIT_MAX: usize = 300;
	/// Default failure threshold.
	pub const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 10;
	/// Default block cool-down.
	pub const DEFAULT_BLOCK_DURATION: Duration = Duration::minutes(15);
	/// Default maximum token length.
	pub const DEFAULT_MAX_TOKEN_LEN: usize = 4096;
	/// Default clock-skew tolerance.
	pub const DEFAULT_CLOCK_SKEW: Duration = Duration::seconds(30);

	/// Creates a builder for the provided issuer and JWKS endpoint.
	pub fn builder(expected_issuer: impl Into<String>, jwks_url: Url) -> VerifierConfigBuilder {
		VerifierConfigBuilder::new(expected_issuer, jwks_url)
	}

	/// Derives the conventional JWKS endpoint (`<base>/api/auth/jwks`) from an issuer base URL.
	pub fn jwks_url_for(issuer_base: &str) -> Result<Url, ConfigError> {
		let base = issuer_base.trim().trim_end_matches('/');

		Url::parse(&format!("{base}/{JWKS_PATH}"))
			.map_err(|e| ConfigError::invalid("JWT_ISSUER_BASE", e.to_string()))
	}

	/// Loads the configuration from process environment variables.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads the configuration from an arbitrary key/value lookup.
	///
	/// Empty values are treated as absent.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let get = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let issuer =
			get("JWT_EXPECTED_ISSUER").ok_or(ConfigError::Missing { option: "JWT_EXPECTED_ISSUER" })?;
		let jwks_url = match get("JWT_JWKS_URL") {
			Some(raw) =>
				Url::parse(&raw).map_err(|e| ConfigError::invalid("JWT_JWKS_URL", e.to_string()))?,
			None => Self::jwks_url_for(get("JWT_ISSUER_BASE").as_deref().unwrap_or(&issuer))?,
		};
		let mut builder = Self::builder(issuer, jwks_url);

		if let Some(audience) = get("JWT_EXPECTED_AUDIENCE") {
			builder = builder.expected_audience(audience);
		}
		if let Some(secret) = get("JWT_BYPASS_SECRET") {
			builder = builder.bypass_secret(secret);
		}
		if let Some(secs) = parse_secs(&get, "JWT_FETCH_TIMEOUT_SECS")? {
			builder = builder.fetch_timeout(secs);
		}
		if let Some(secs) = parse_secs(&get, "JWT_CACHE_TTL_SECS")? {
			builder = builder.cache_ttl(secs);
		}
		if let Some(secs) = parse_secs(&get, "JWT_SWEEP_INTERVAL_SECS")? {
			builder = builder.sweep_interval(secs);
		}
		if let Some(secs) = parse_secs(&get, "JWT_RATE_LIMIT_WINDOW_SECS")? {
			builder = builder.rate_limit_window(secs);
		}
		if let Some(max) = parse_value::<usize, _>(&get, "JWT_RATE_LIMIT_MAX")? {
			builder = builder.rate_limit_max(max);
		}
		if let Some(max) = parse_value::<u32, _>(&get, "JWT_MAX_FAILED_ATTEMPTS")? {
			builder = builder.max_failed_attempts(max);
		}
		if let Some(secs) = parse_secs(&get, "JWT_BLOCK_DURATION_SECS")? {
			builder = builder.block_duration(secs);
		}
		if let Some(len) = parse_value::<usize, _>(&get, "JWT_MAX_TOKEN_LEN")? {
			builder = builder.max_token_len(len);
		}
		if let Some(secs) = parse_secs(&get, "JWT_CLOCK_SKEW_SECS")? {
			builder = builder.clock_skew(secs);
		}
		if let Some(enabled) = parse_value::<bool, _>(&get, "JWT_DEGRADED_ISSUER_FALLBACK")? {
			builder = builder.degraded_issuer_fallback(enabled);
		}
		if let Some(raw) = get("JWT_TRUSTED_ISSUER_SUFFIXES") {
			builder = builder.trusted_issuer_suffixes(
				raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned),
			);
		}

		builder.build()
	}
}

fn parse_value<T, G>(get: &G, option: &'static str) -> Result<Option<T>, ConfigError>
where
	T: FromStr,
	T::Err: Display,
	G: Fn(&str) -> Option<String>,
{
	get(option)
		.map(|raw| raw.parse::<T>().map_err(|e| ConfigError::invalid(option, e.to_string())))
		.transpose()
}

fn parse_secs<G>(get: &G, option: &'static str) -> Result<Option<Duration>, ConfigError>
where
	G: Fn(&str) -> Option<String>,
{
	let Some(secs) = parse_value::<u32, _>(get, option)? else {
		return Ok(None);
	};

	Ok(Some(Duration::seconds(i64::from(secs))))
}

/// Builder for [`VerifierConfig`] values.
#[derive(Debug)]
pub struct VerifierConfigBuilder {
	config: VerifierConfig,
}
impl VerifierConfigBuilder {
	/// Creates a builder seeded with defaults.
	pub fn new(expected_issuer: impl Into<String>, jwks_url: Url) -> Self {
		Self {
			config: VerifierConfig {
				expected_issuer: expected_issuer.into(),
				expected_audience: None,
				jwks_url,
				bypass_secret: None,
				bypass_header: DEFAULT_BYPASS_HEADER.into(),
				user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).into(),
				fetch_timeout: VerifierConfig::DEFAULT_FETCH_TIMEOUT,
				require_https: true,
				cache_ttl: VerifierConfig::DEFAULT_CACHE_TTL,
				sweep_interval: VerifierConfig::DEFAULT_SWEEP_INTERVAL,
				rate_limit_window: VerifierConfig::DEFAULT_RATE_LIMIT_WINDOW,
				rate_limit_max: VerifierConfig::DEFAULT_RATE_LIMIT_MAX,
				max_failed_attempts: VerifierConfig::DEFAULT_MAX_FAILED_ATTEMPTS,
				block_duration: VerifierConfig::DEFAULT_BLOCK_DURATION,
				max_token_len: VerifierConfig::DEFAULT_MAX_TOKEN_LEN,
				clock_skew: VerifierConfig::DEFAULT_CLOCK_SKEW,
				degraded_issuer_fallback: true,
				trusted_issuer_suffixes: Vec::new(),
			},
		}
	}

	/// Requires the `aud` claim to contain `audience`.
	pub fn expected_audience(mut self, audience: impl Into<String>) -> Self {
		self.config.expected_audience = Some(audience.into());

		self
	}

	/// Sets the edge-protection bypass credential.
	pub fn bypass_secret(mut self, secret: impl Into<String>) -> Self {
		self.config.bypass_secret = Some(secret.into());

		self
	}

	/// Overrides the header name used for the bypass credential.
	pub fn bypass_header(mut self, header: impl Into<String>) -> Self {
		self.config.bypass_header = header.into();

		self
	}

	/// Overrides the `user-agent` sent to the JWKS endpoint.
	pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
		self.config.user_agent = user_agent.into();

		self
	}

	/// Overrides the JWKS fetch timeout.
	pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
		self.config.fetch_timeout = timeout;

		self
	}

	/// Allows plain-HTTP JWKS endpoints when `false`.
	pub fn require_https(mut self, require: bool) -> Self {
		self.config.require_https = require;

		self
	}

	/// Overrides the key cache TTL.
	pub fn cache_ttl(mut self, ttl: Duration) -> Self {
		self.config.cache_ttl = ttl;

		self
	}

	/// Overrides the background sweep interval.
	pub fn sweep_interval(mut self, interval: Duration) -> Self {
		self.config.sweep_interval = interval;

		self
	}

	/// Overrides the rate-limit window.
	pub fn rate_limit_window(mut self, window: Duration) -> Self {
		self.config.rate_limit_window = window;

		self
	}

	/// Overrides the per-window request ceiling.
	pub fn rate_limit_max(mut self, max: usize) -> Self {
		self.config.rate_limit_max = max;

		self
	}

	/// Overrides the failure threshold.
	pub fn max_failed_attempts(mut self, max: u32) -> Self {
		self.config.max_failed_attempts = max;

		self
	}

	/// Overrides the block cool-down.
	pub fn block_duration(mut self, duration: Duration) -> Self {
		self.config.block_duration = duration;

		self
	}

	/// Overrides the maximum token length.
	pub fn max_token_len(mut self, len: usize) -> Self {
		self.config.max_token_len = len;

		self
	}

	/// Overrides the `exp`/`nbf` leeway.
	pub fn clock_skew(mut self, skew: Duration) -> Self {
		self.config.clock_skew = skew;

		self
	}

	/// Enables or disables degraded acceptance.
	pub fn degraded_issuer_fallback(mut self, enabled: bool) -> Self {
		self.config.degraded_issuer_fallback = enabled;

		self
	}

	/// Replaces the trusted deployment-family suffixes.
	pub fn trusted_issuer_suffixes<I, S>(mut self, suffixes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.trusted_issuer_suffixes = suffixes
			.into_iter()
			.map(|s| s.into().trim().trim_start_matches('.').to_ascii_lowercase())
			.collect();

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<VerifierConfig, ConfigError> {
		let config = self.config;

		config.validate()?;

		Ok(config)
	}
}

impl VerifierConfig {
	fn validate(&self) -> Result<(), ConfigError> {
		if self.expected_issuer.trim().is_empty() {
			return Err(ConfigError::Missing { option: "expected_issuer" });
		}
		if self.require_https && self.jwks_url.scheme() != "https" {
			return Err(ConfigError::InsecureEndpoint { url: self.jwks_url.to_string() });
		}

		validate_positive("fetch_timeout", self.fetch_timeout)?;
		validate_positive("cache_ttl", self.cache_ttl)?;
		validate_positive("sweep_interval", self.sweep_interval)?;
		validate_positive("rate_limit_window", self.rate_limit_window)?;
		validate_positive("block_duration", self.block_duration)?;

		if self.clock_skew.is_negative() {
			return Err(ConfigError::invalid("clock_skew", "must not be negative"));
		}
		if self.rate_limit_max == 0 {
			return Err(ConfigError::invalid("rate_limit_max", "must be greater than zero"));
		}
		if self.max_failed_attempts == 0 {
			return Err(ConfigError::invalid("max_failed_attempts", "must be greater than zero"));
		}
		if self.max_token_len == 0 {
			return Err(ConfigError::invalid("max_token_len", "must be greater than zero"));
		}
		if self.bypass_header.is_empty() || !self.bypass_header.bytes().all(is_header_byte) {
			return Err(ConfigError::invalid("bypass_header", "must be a valid header name"));
		}

		for suffix in &self.trusted_issuer_suffixes {
			if suffix.is_empty() || suffix.chars().any(|c| c.is_control() || c.is_whitespace()) {
				return Err(ConfigError::invalid(
					"trusted_issuer_suffixes",
					format!("`{suffix}` is not a domain suffix"),
				));
			}
		}

		Ok(())
	}
}

fn validate_positive(option: &'static str, value: Duration) -> Result<(), ConfigError> {
	if value.is_positive() {
		Ok(())
	} else {
		Err(ConfigError::invalid(option, "must be positive"))
	}
}

fn is_header_byte(b: u8) -> bool {
	b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
		move |name| pairs.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
	}

	#[test]
	fn defaults_match_documented_values() {
		let config = VerifierConfig::from_lookup(lookup(&[(
			"JWT_EXPECTED_ISSUER",
			"https://auth.example.com",
		)]))
		.expect("Issuer-only configuration should build.");

		assert_eq!(config.jwks_url.as_str(), "https://auth.example.com/api/auth/jwks");
		assert_eq!(config.fetch_timeout, Duration::seconds(5));
		assert_eq!(config.cache_ttl, Duration::minutes(5));
		assert_eq!(config.rate_limit_window, Duration::seconds(60));
		assert_eq!(config.rate_limit_max, 300);
		assert_eq!(config.block_duration, Duration::minutes(15));
		assert_eq!(config.max_token_len, 4096);
		assert_eq!(config.clock_skew, Duration::seconds(30));
		assert!(config.degraded_issuer_fallback);
		assert!(config.expected_audience.is_none());
		assert!(config.bypass_secret.is_none());
	}

	#[test]
	fn environment_overrides_are_applied() {
		let config = VerifierConfig::from_lookup(lookup(&[
			("JWT_EXPECTED_ISSUER", "https://auth.example.com"),
			("JWT_ISSUER_BASE", "https://idp.example.com/"),
			("JWT_BYPASS_SECRET", "edge-secret"),
			("JWT_RATE_LIMIT_MAX", "50"),
			("JWT_BLOCK_DURATION_SECS", "60"),
			("JWT_DEGRADED_ISSUER_FALLBACK", "false"),
			("JWT_TRUSTED_ISSUER_SUFFIXES", ".example.com, example.dev ,"),
		]))
		.expect("Overridden configuration should build.");

		assert_eq!(config.jwks_url.as_str(), "https://idp.example.com/api/auth/jwks");
		assert_eq!(config.bypass_secret.as_deref(), Some("edge-secret"));
		assert_eq!(config.rate_limit_max, 50);
		assert_eq!(config.block_duration, Duration::seconds(60));
		assert!(!config.degraded_issuer_fallback);
		assert_eq!(config.trusted_issuer_suffixes, vec!["example.com", "example.dev"]);
	}

	#[test]
	fn missing_issuer_and_bad_numbers_are_rejected() {
		let err = VerifierConfig::from_lookup(lookup(&[]))
			.expect_err("Configuration without an issuer should fail.");

		assert_eq!(err, ConfigError::Missing { option: "JWT_EXPECTED_ISSUER" });

		let err = VerifierConfig::from_lookup(lookup(&[
			("JWT_EXPECTED_ISSUER", "https://auth.example.com"),
			("JWT_RATE_LIMIT_MAX", "lots"),
		]))
		.expect_err("Non-numeric ceilings should fail.");

		assert!(matches!(err, ConfigError::Invalid { option: "JWT_RATE_LIMIT_MAX", .. }));
	}

	#[test]
	fn builder_rejects_insecure_endpoints_and_zero_limits() {
		let url = Url::parse("http://auth.example.com/api/auth/jwks")
			.expect("Fixture URL should parse.");
		let err = VerifierConfig::builder("https://auth.example.com", url.clone())
			.build()
			.expect_err("Plain-HTTP endpoints should be rejected by default.");

		assert!(matches!(err, ConfigError::InsecureEndpoint { .. }));

		let err = VerifierConfig::builder("https://auth.example.com", url.clone())
			.require_https(false)
			.rate_limit_max(0)
			.build()
			.expect_err("A zero rate ceiling should be rejected.");

		assert!(matches!(err, ConfigError::Invalid { option: "rate_limit_max", .. }));

		VerifierConfig::builder("https://auth.example.com", url)
			.require_https(false)
			.build()
			.expect("Plain HTTP should be allowed once explicitly enabled.");
	}
}
