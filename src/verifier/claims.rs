//! Claim sets and the structural (unverified) token decoder.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::Header;
use serde_json::Map;
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// `aud` claim, which JWTs encode as either a string or a list of strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
	/// Single audience.
	One(String),
	/// Multiple audiences.
	Many(Vec<String>),
}
impl Audience {
	/// Whether `audience` is among the listed audiences.
	pub fn contains(&self, audience: &str) -> bool {
		match self {
			Self::One(value) => value == audience,
			Self::Many(values) => values.iter().any(|value| value == audience),
		}
	}
}

/// Claim set of an accepted token.
///
/// Registered claims are typed; every other claim the identity provider issued is preserved in
/// [`extra`](Self::extra), so serializing the struct reproduces the original payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerifiedClaims {
	/// Subject.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sub: Option<String>,
	/// Issuer.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	/// Audience.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aud: Option<Audience>,
	/// Expiry (seconds since the Unix epoch).
	pub exp: i64,
	/// Not-before (seconds since the Unix epoch).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub nbf: Option<i64>,
	/// Issued-at (seconds since the Unix epoch).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iat: Option<i64>,
	/// Provider-specific claims.
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}
impl VerifiedClaims {
	/// Looks up a provider-specific claim.
	pub fn claim(&self, name: &str) -> Option<&Value> {
		self.extra.get(name)
	}

	/// Re-encodes the claim set as a JSON object.
	pub fn to_value(&self) -> serde_json::Result<Value> {
		serde_json::to_value(self)
	}
}

/// Header and payload of a token whose signature has not been checked yet.
#[derive(Debug)]
pub(crate) struct UnverifiedToken {
	pub kid: String,
	pub payload: Map<String, Value>,
}
impl UnverifiedToken {
	/// Issuer as claimed by the unverified payload.
	pub fn issuer(&self) -> Option<&str> {
		self.payload.get("iss").and_then(Value::as_str)
	}
}

/// Decodes the three base64url segments without verifying anything cryptographic.
///
/// Fails when the token is not `header.payload.signature`, either JSON segment is malformed,
/// the payload is not an object, or the header carries no `kid`.
pub(crate) fn decode_unverified(token: &str) -> Option<UnverifiedToken> {
	let mut segments = token.split('.');
	let (Some(header), Some(payload), Some(signature), None) =
		(segments.next(), segments.next(), segments.next(), segments.next())
	else {
		return None;
	};

	if header.is_empty() || payload.is_empty() || signature.is_empty() {
		return None;
	}

	let header: Header = serde_json::from_slice(&URL_SAFE_NO_PAD.decode(header).ok()?).ok()?;
	let kid = header.kid.filter(|kid| !kid.is_empty())?;
	let payload: Map<String, Value> =
		serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).ok()?).ok()?;

	Some(UnverifiedToken { kid, payload })
}

/// Stable, non-reversible token identifier for audit logs.
pub(crate) fn fingerprint(token: &str) -> String {
	let mut hasher = Sha256::new();

	hasher.update(token.as_bytes());

	URL_SAFE_NO_PAD.encode(hasher.finalize())
}
