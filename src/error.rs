//! Crate-level error types for configuration and the key source transport.
//!
//! [`Error`] only surfaces while a verifier is being constructed. None of these errors cross
//! [`TokenVerifier::validate_jwt`](crate::verifier::TokenVerifier::validate_jwt): verification
//! failures collapse into a bare rejection there, and transport errors only feed logs and metrics.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by constructors.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Configuration and validation failures raised while building a verifier.
#[derive(Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed: {message}.")]
	HttpClientBuild {
		/// Underlying transport builder failure, rendered.
		message: String,
	},
	/// A required option was not supplied.
	#[error("Missing required option `{option}`.")]
	Missing {
		/// Option name.
		option: &'static str,
	},
	/// An option was supplied but could not be parsed or failed validation.
	#[error("Option `{option}` is invalid: {reason}.")]
	Invalid {
		/// Option name.
		option: &'static str,
		/// Human-readable reason.
		reason: String,
	},
	/// The JWKS endpoint must use HTTPS.
	#[error("The JWKS endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Endpoint URL that failed validation.
		url: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { message: src.to_string() }
	}

	pub(crate) fn invalid(option: &'static str, reason: impl Into<String>) -> Self {
		Self::Invalid { option, reason: reason.into() }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO) raised while contacting the JWKS endpoint.
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the JWKS endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request did not complete within the configured timeout.
	#[error("JWKS request timed out after {timeout}.")]
	Timeout {
		/// Timeout that elapsed.
		timeout: Duration,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn config_error_converts_into_crate_error() {
		let err: Error = ConfigError::Missing { option: "JWT_EXPECTED_ISSUER" }.into();

		assert!(matches!(err, Error::Config(ConfigError::Missing { .. })));
		assert_eq!(err.to_string(), "Missing required option `JWT_EXPECTED_ISSUER`.");
	}

	#[test]
	fn constructor_errors_are_always_configuration_errors() {
		let err: Error = ConfigError::InsecureEndpoint { url: "http://auth.example.com/".into() }.into();
		let Error::Config(inner) = err;

		assert!(matches!(inner, ConfigError::InsecureEndpoint { .. }));
	}

	#[test]
	fn transport_timeout_renders_duration() {
		let err = TransportError::Timeout { timeout: Duration::seconds(5) };

		assert_eq!(err.to_string(), "JWKS request timed out after 5s.");
	}
}
