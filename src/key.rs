//! Algorithm-pinned verification keys imported from published JWKs.
//!
//! A [`PinnedKey`] variant fixes the one algorithm its key may verify. Verification derives the
//! accepted algorithm from the variant, never from the token header, so a key published for one
//! algorithm cannot be used to check a signature produced under another.

// crates.io
use jsonwebtoken::{
	Algorithm, DecodingKey,
	jwk::{AlgorithmParameters, EllipticCurve, Jwk, KeyAlgorithm, PublicKeyUse},
};
// self
use crate::_prelude::*;

/// Failures raised while importing a published JWK.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum KeyImportError {
	/// Symmetric or otherwise non-public key material.
	#[error("Key type `{kty}` is not supported for signature verification.")]
	UnsupportedKeyType {
		/// Key type label.
		kty: &'static str,
	},
	/// Curve not supported for the declared key type.
	#[error("Curve `{curve}` is not supported.")]
	UnsupportedCurve {
		/// Curve label.
		curve: String,
	},
	/// Declared `alg` does not match the key material.
	#[error("Algorithm `{alg}` cannot be used with a `{kty}` key.")]
	AlgorithmMismatch {
		/// Declared algorithm label.
		alg: String,
		/// Key type label.
		kty: &'static str,
	},
	/// The key is published for a use other than signatures.
	#[error("Key is not published for signature use.")]
	NotForSignatures,
	/// Key material could not be decoded.
	#[error("Key material is malformed: {reason}.")]
	Malformed {
		/// Rendered decoder error.
		reason: String,
	},
}

/// Verification key bound to exactly one signature algorithm.
#[derive(Clone)]
pub enum PinnedKey {
	/// ECDSA P-256 with SHA-256.
	Es256(DecodingKey),
	/// ECDSA P-384 with SHA-384.
	Es384(DecodingKey),
	/// RSASSA-PKCS1-v1_5 with SHA-256.
	Rs256(DecodingKey),
	/// RSASSA-PKCS1-v1_5 with SHA-384.
	Rs384(DecodingKey),
	/// RSASSA-PKCS1-v1_5 with SHA-512.
	Rs512(DecodingKey),
	/// RSASSA-PSS with SHA-256.
	Ps256(DecodingKey),
	/// RSASSA-PSS with SHA-384.
	Ps384(DecodingKey),
	/// RSASSA-PSS with SHA-512.
	Ps512(DecodingKey),
	/// Ed25519.
	EdDsa(DecodingKey),
}
impl PinnedKey {
	/// Imports a published JWK, pinning it to its declared (or implied) algorithm.
	pub fn import(jwk: &Jwk) -> Result<Self, KeyImportError> {
		if matches!(
			jwk.common.public_key_use,
			Some(PublicKeyUse::Encryption) | Some(PublicKeyUse::Other(_))
		) {
			return Err(KeyImportError::NotForSignatures);
		}

		let declared = jwk.common.key_algorithm;
		let pin: fn(DecodingKey) -> Self = match &jwk.algorithm {
			AlgorithmParameters::EllipticCurve(params) => match (&params.curve, declared) {
				(EllipticCurve::P256, None | Some(KeyAlgorithm::ES256)) => Self::Es256,
				(EllipticCurve::P384, None | Some(KeyAlgorithm::ES384)) => Self::Es384,
				(EllipticCurve::P256 | EllipticCurve::P384, Some(alg)) =>
					return Err(mismatch(alg, "EC")),
				(curve, _) =>
					return Err(KeyImportError::UnsupportedCurve { curve: format!("{curve:?}") }),
			},
			AlgorithmParameters::RSA(_) => match declared {
				None | Some(KeyAlgorithm::RS256) => Self::Rs256,
				Some(KeyAlgorithm::RS384) => Self::Rs384,
				Some(KeyAlgorithm::RS512) => Self::Rs512,
				Some(KeyAlgorithm::PS256) => Self::Ps256,
				Some(KeyAlgorithm::PS384) => Self::Ps384,
				Some(KeyAlgorithm::PS512) => Self::Ps512,
				Some(alg) => return Err(mismatch(alg, "RSA")),
			},
			AlgorithmParameters::OctetKeyPair(params) => match (&params.curve, declared) {
				(EllipticCurve::Ed25519, None | Some(KeyAlgorithm::EdDSA)) => Self::EdDsa,
				(EllipticCurve::Ed25519, Some(alg)) => return Err(mismatch(alg, "OKP")),
				(curve, _) =>
					return Err(KeyImportError::UnsupportedCurve { curve: format!("{curve:?}") }),
			},
			AlgorithmParameters::OctetKey(_) =>
				return Err(KeyImportError::UnsupportedKeyType { kty: "oct" }),
		};
		let key = DecodingKey::from_jwk(jwk)
			.map_err(|e| KeyImportError::Malformed { reason: e.to_string() })?;

		Ok(pin(key))
	}

	/// Returns the only algorithm this key verifies.
	pub const fn algorithm(&self) -> Algorithm {
		match self {
			Self::Es256(_) => Algorithm::ES256,
			Self::Es384(_) => Algorithm::ES384,
			Self::Rs256(_) => Algorithm::RS256,
			Self::Rs384(_) => Algorithm::RS384,
			Self::Rs512(_) => Algorithm::RS512,
			Self::Ps256(_) => Algorithm::PS256,
			Self::Ps384(_) => Algorithm::PS384,
			Self::Ps512(_) => Algorithm::PS512,
			Self::EdDsa(_) => Algorithm::EdDSA,
		}
	}

	/// Returns the key material.
	pub fn decoding_key(&self) -> &DecodingKey {
		match self {
			Self::Es256(key)
			| Self::Es384(key)
			| Self::Rs256(key)
			| Self::Rs384(key)
			| Self::Rs512(key)
			| Self::Ps256(key)
			| Self::Ps384(key)
			| Self::Ps512(key)
			| Self::EdDsa(key) => key,
		}
	}
}
impl Debug for PinnedKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "PinnedKey({:?})", self.algorithm())
	}
}

fn mismatch(alg: KeyAlgorithm, kty: &'static str) -> KeyImportError {
	KeyImportError::AlgorithmMismatch { alg: format!("{alg:?}"), kty }
}

/// One imported key held by the [`KeyCache`](crate::cache::KeyCache).
#[derive(Clone, Debug)]
pub struct CachedKeyEntry {
	/// Key identifier published by the identity provider.
	pub kid: String,
	/// Imported, algorithm-pinned key.
	pub key: Arc<PinnedKey>,
	/// Instant the key was fetched and imported.
	pub cached_at: OffsetDateTime,
}
impl CachedKeyEntry {
	/// Whether the entry may still be used at `now` for the given TTL.
	pub fn is_fresh(&self, now: OffsetDateTime, ttl: Duration) -> bool {
		now - self.cached_at < ttl
	}

	/// Returns the pinned algorithm.
	pub fn algorithm(&self) -> Algorithm {
		self.key.algorithm()
	}
}
