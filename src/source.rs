//! Signing-key sources.
//!
//! [`KeySource`] is the verifier's only dependency on the network. [`ReqwestKeySource`] performs
//! a single HTTPS GET against the JWKS endpoint with a hard timeout and no redirect following;
//! [`MemoryKeySource`] serves a fixed key set for offline deployments and tests. Sources never
//! retry; callers that need resilience against outages retry above the verifier.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use jsonwebtoken::jwk::{Jwk, JwkSet};
#[cfg(feature = "reqwest")]
use reqwest::{
	header::{ACCEPT, HeaderMap, HeaderName, HeaderValue, USER_AGENT},
	redirect::Policy,
};
// self
use crate::{_prelude::*, error::TransportError, obs};
#[cfg(feature = "reqwest")] use crate::{config::VerifierConfig, error::ConfigError};

/// Boxed future returned by [`KeySource::fetch_key_set`].
pub type KeySetFuture<'a> = Pin<Box<dyn Future<Output = Result<JwkSet, SourceError>> + 'a + Send>>;

/// Upper bound on a JWKS response body.
pub const MAX_KEY_SET_BYTES: usize = 1_048_576;

/// Remote (or local) publisher of the current signing-key set.
pub trait KeySource
where
	Self: Send + Sync,
{
	/// Fetches the full key set currently published by the identity provider.
	fn fetch_key_set(&self) -> KeySetFuture<'_>;
}

/// Failures raised by a [`KeySource`].
#[derive(Debug, ThisError)]
pub enum SourceError {
	/// Network failure, timeout, or non-success status.
	#[error("JWKS endpoint is unavailable: {reason}.")]
	Unavailable {
		/// Human-readable summary.
		reason: String,
	},
	/// Transport-level failure while talking to the endpoint.
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Response was not a well-formed, non-empty key set.
	#[error("JWKS endpoint returned an invalid key set: {reason}.")]
	InvalidKeySet {
		/// Human-readable summary.
		reason: String,
	},
}
impl SourceError {
	/// Whether the failure reflects provider/network availability rather than bad content.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::Unavailable { .. } | Self::Transport(_))
	}
}

#[derive(Deserialize)]
struct RawKeySet {
	keys: Vec<Value>,
}

/// Parses and validates a JWKS document.
///
/// The document must be a JSON object whose `keys` array is non-empty. Entries this crate cannot
/// represent (unsupported curves, unknown key types) are logged and skipped so that the rest of
/// the set stays usable; only the entries that parse are returned.
pub fn parse_key_set(body: &[u8]) -> Result<JwkSet, SourceError> {
	let mut de = serde_json::Deserializer::from_slice(body);
	let raw: RawKeySet = serde_path_to_error::deserialize(&mut de)
		.map_err(|e| SourceError::InvalidKeySet { reason: e.to_string() })?;

	if raw.keys.is_empty() {
		return Err(SourceError::InvalidKeySet { reason: "the key set contains no keys".into() });
	}

	let keys = raw
		.keys
		.into_iter()
		.filter_map(|entry| {
			let kid = entry.get("kid").and_then(Value::as_str).unwrap_or("<none>").to_owned();

			serde_json::from_value::<Jwk>(entry)
				.inspect_err(|e| obs::log_key_import_failure(&kid, e))
				.ok()
		})
		.collect();

	Ok(JwkSet { keys })
}

/// [`KeySource`] that serves an in-process key set.
#[derive(Debug, Default)]
pub struct MemoryKeySource {
	keys: RwLock<Option<JwkSet>>,
	fetches: AtomicU64,
}
impl MemoryKeySource {
	/// Creates a source that answers with `keys`.
	pub fn new(keys: JwkSet) -> Self {
		Self { keys: RwLock::new(Some(keys)), fetches: AtomicU64::new(0) }
	}

	/// Creates a source that reports [`SourceError::Unavailable`] until keys are published.
	pub fn offline() -> Self {
		Self::default()
	}

	/// Publishes a new key set (`None` takes the source offline).
	pub fn publish(&self, keys: Option<JwkSet>) {
		*self.keys.write() = keys;
	}

	/// Number of fetches served so far, successful or not.
	pub fn fetches(&self) -> u64 {
		self.fetches.load(Ordering::Relaxed)
	}
}
impl KeySource for MemoryKeySource {
	fn fetch_key_set(&self) -> KeySetFuture<'_> {
		self.fetches.fetch_add(1, Ordering::Relaxed);

		let keys = self.keys.read().clone();

		Box::pin(async move {
			let set =
				keys.ok_or_else(|| SourceError::Unavailable { reason: "no key set published".into() })?;

			if set.keys.is_empty() {
				return Err(SourceError::InvalidKeySet {
					reason: "the key set contains no keys".into(),
				});
			}

			Ok(set)
		})
	}
}

/// reqwest-backed [`KeySource`] for a remote JWKS endpoint.
///
/// The client never follows redirects: a JWKS endpoint that answers with a redirect is treated as
/// unavailable instead of silently trusting another origin.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestKeySource {
	client: ReqwestClient,
	url: Url,
	timeout: Duration,
}
#[cfg(feature = "reqwest")]
impl ReqwestKeySource {
	/// Builds a source with its own HTTP client configured from `config`.
	pub fn from_config(config: &VerifierConfig) -> Result<Self, ConfigError> {
		let client = Self::client_builder(config)?.build()?;

		Ok(Self::with_client(client, config.jwks_url.clone(), config.fetch_timeout))
	}

	/// Returns a client builder with the headers, timeout, and redirect policy for `config`.
	///
	/// Useful when callers need to layer extra TLS settings before building.
	pub fn client_builder(config: &VerifierConfig) -> Result<reqwest::ClientBuilder, ConfigError> {
		let mut headers = HeaderMap::new();

		headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
		headers.insert(
			USER_AGENT,
			HeaderValue::from_str(&config.user_agent)
				.map_err(|e| ConfigError::invalid("user_agent", e.to_string()))?,
		);

		if let Some(secret) = config.bypass_secret.as_deref() {
			let name = HeaderName::from_bytes(config.bypass_header.as_bytes())
				.map_err(|e| ConfigError::invalid("bypass_header", e.to_string()))?;
			let mut value = HeaderValue::from_str(secret)
				.map_err(|e| ConfigError::invalid("bypass_secret", e.to_string()))?;

			value.set_sensitive(true);
			headers.insert(name, value);
		}

		Ok(ReqwestClient::builder()
			.default_headers(headers)
			.redirect(Policy::none())
			.timeout(std_duration(config.fetch_timeout)))
	}

	/// Wraps an existing client; the client must not follow redirects.
	pub fn with_client(client: ReqwestClient, url: Url, timeout: Duration) -> Self {
		Self { client, url, timeout }
	}

	/// JWKS endpoint this source reads.
	pub fn url(&self) -> &Url {
		&self.url
	}

	async fn fetch(&self) -> Result<JwkSet, SourceError> {
		let response = self
			.client
			.get(self.url.clone())
			.timeout(std_duration(self.timeout))
			.send()
			.await
			.map_err(|e| self.map_reqwest_error(e))?;
		let status = response.status();

		if !status.is_success() {
			return Err(SourceError::Unavailable {
				reason: format!("HTTP {} from the JWKS endpoint", status.as_u16()),
			});
		}
		if response.content_length().is_some_and(|len| len > MAX_KEY_SET_BYTES as u64) {
			return Err(SourceError::InvalidKeySet { reason: "response body is too large".into() });
		}

		let body = response.bytes().await.map_err(|e| self.map_reqwest_error(e))?;

		if body.len() > MAX_KEY_SET_BYTES {
			return Err(SourceError::InvalidKeySet { reason: "response body is too large".into() });
		}

		parse_key_set(&body)
	}

	fn map_reqwest_error(&self, err: ReqwestError) -> SourceError {
		if err.is_timeout() {
			TransportError::Timeout { timeout: self.timeout }.into()
		} else {
			TransportError::from(err).into()
		}
	}
}
#[cfg(feature = "reqwest")]
impl KeySource for ReqwestKeySource {
	fn fetch_key_set(&self) -> KeySetFuture<'_> {
		Box::pin(self.fetch())
	}
}

/// Converts a non-negative [`Duration`] into a std duration, clamping negatives to zero.
pub(crate) fn std_duration(value: Duration) -> std::time::Duration {
	std::time::Duration::try_from(value).unwrap_or_default()
}
