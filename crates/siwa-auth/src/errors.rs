//! Error taxonomy for client secret generation and identity token validation
//!
//! Every fallible operation in this crate returns one of the kinds below so
//! callers can branch on the failure without string matching. Display
//! strings are operator-facing diagnostics; they never contain key material,
//! token contents, or cache internals.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Authentication errors.
///
/// # Non-exhaustive
///
/// New variants may be added in future minor releases without a semver
/// break. Downstream match expressions must include a wildcard arm.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthError {
    /// Required configuration is missing or empty before generation.
    #[error("Invalid configuration: {reason}")]
    Configuration {
        /// What was missing or malformed.
        reason: String,
    },

    /// The private key source is unreachable, does not know the key id,
    /// or returned bytes that are not a valid P-256 private key.
    #[error("Private key resolution failed: {reason}")]
    KeyResolution {
        /// Why resolution failed.
        reason: String,
    },

    /// Key material was present but the signature could not be produced.
    #[error("Client secret signing failed: {reason}")]
    Signing {
        /// Why signing failed.
        reason: String,
    },

    /// Network or HTTP failure retrieving Apple's published key set.
    /// Callers may retry according to their own policy; the resolver
    /// performs no automatic retry.
    #[error("Key set fetch failed: {reason}")]
    KeySetFetch {
        /// Underlying transport or status failure.
        reason: String,
    },

    /// The key id is absent from the fetched key set, even after a refresh.
    #[error("Signing key not found in key set: {kid}")]
    KeyNotFound {
        /// Key ID that was not found.
        kid: String,
    },

    /// A key set record exists for the key id but cannot back ES256
    /// verification (foreign key type, missing coordinates, bad encoding).
    #[error("Invalid public key for {kid}: {reason}")]
    InvalidPublicKey {
        /// Key ID of the unusable record.
        kid: String,
        /// Why the record is unusable.
        reason: String,
    },

    /// Malformed compact token: not three non-empty segments, or the
    /// header/payload are not valid base64url-encoded JSON.
    #[error("Invalid token format: {reason}")]
    TokenFormat {
        /// What failed to parse.
        reason: String,
    },

    /// The token header names an algorithm other than ES256. The
    /// attacker-controlled `alg` field is never trusted.
    #[error("Unsupported token algorithm: {alg}")]
    UnsupportedAlgorithm {
        /// The algorithm named in the token header.
        alg: String,
    },

    /// Signature verification failed against the resolved public key.
    #[error("Invalid token signature")]
    SignatureInvalid,

    /// A claim failed validation (wrong issuer/audience, expired, not yet
    /// valid). Names the offending claim.
    #[error("Claim validation failed for '{claim}': {reason}")]
    ClaimValidation {
        /// The claim that failed (`iss`, `aud`, `exp`, `nbf`, `iat`, `sub`).
        claim: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The operation was cancelled via its [`CancellationToken`] before
    /// completing.
    ///
    /// [`CancellationToken`]: tokio_util::sync::CancellationToken
    #[error("Operation cancelled")]
    Cancelled,
}
