//! Deployment-family policy for degraded acceptance.

// self
use crate::_prelude::*;

/// Decides whether an issuer plausibly belongs to the same deployment family.
///
/// The expected issuer always qualifies. Any other issuer must be an `https` URL whose host is
/// one of the trusted suffixes or a subdomain of one.
#[derive(Clone, Debug)]
pub struct IssuerFamily {
	expected_issuer: String,
	trusted_suffixes: Vec<String>,
}
impl IssuerFamily {
	/// Creates a policy anchored at `expected_issuer`.
	pub fn new(expected_issuer: impl Into<String>, trusted_suffixes: Vec<String>) -> Self {
		Self { expected_issuer: expected_issuer.into(), trusted_suffixes }
	}

	/// Whether `issuer` belongs to the family; a missing issuer never does.
	pub fn contains(&self, issuer: Option<&str>) -> bool {
		let Some(issuer) = issuer else {
			return false;
		};

		if issuer == self.expected_issuer {
			return true;
		}

		let Ok(url) = Url::parse(issuer) else {
			return false;
		};

		if url.scheme() != "https" {
			return false;
		}

		let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
			return false;
		};

		self.trusted_suffixes.iter().any(|suffix| {
			host == *suffix
				|| host.strip_suffix(suffix.as_str()).is_some_and(|prefix| prefix.ends_with('.'))
		})
	}
}
