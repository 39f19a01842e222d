//! Identity token validation
//!
//! Apple returns the end user's identity as a signed JWT in the token
//! response's `id_token` field. [`IdTokenValidator`] authenticates it in
//! five stages - parse, resolve key, verify signature, validate claims,
//! extract identity - and fails with a specific [`AuthError`] kind at the
//! first stage that rejects. There is no retry within a call.
//!
//! The `alg` header is attacker-controlled and is checked against ES256
//! before any key material is used; this closes the classic JWT algorithm
//! confusion pitfall.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, errors::ErrorKind, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::config::{APPLE_ISSUER, DEFAULT_CLOCK_SKEW_LEEWAY};
use crate::errors::{AuthError, Result};
use crate::keys::PublicKeyResolver;

/// The validated identity extracted from an accepted token.
///
/// `subject` is the stable, opaque per-user identifier - the same string
/// for this user across every app of the development team, and the value a
/// relying party should treat as the primary key for the Apple account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityClaims {
    /// Token issuer (Apple's authorization server).
    pub issuer: String,
    /// Audience the token was minted for (the relying party's client id).
    pub audience: String,
    /// Stable per-user identifier.
    pub subject: String,
    /// Issued at (seconds since epoch).
    pub issued_at: u64,
    /// Not before, when present. Apple does not currently emit this claim.
    pub not_before: Option<u64>,
    /// Expiry (seconds since epoch).
    pub expires_at: u64,
}

/// Decoded token header. Only the fields the validator inspects.
#[derive(Debug, Deserialize)]
struct TokenHeader {
    alg: Option<String>,
    kid: Option<String>,
}

/// Decoded payload with every claim optional, so absence is reported as a
/// claim failure naming the claim rather than an opaque parse error.
#[derive(Debug, Deserialize)]
struct RawClaims {
    iss: Option<String>,
    aud: Option<String>,
    sub: Option<String>,
    iat: Option<u64>,
    nbf: Option<u64>,
    exp: Option<u64>,
}

/// Validates Apple identity tokens against the relying party's
/// configuration.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use siwa_auth::{IdTokenValidator, keys::JwksClient};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example(id_token: &str) -> siwa_auth::Result<()> {
/// let validator = IdTokenValidator::apple("com.example.service", Arc::new(JwksClient::apple()));
///
/// let identity = validator.validate(id_token, &CancellationToken::new()).await?;
/// println!("signed in: {}", identity.subject);
/// # Ok(())
/// # }
/// ```
pub struct IdTokenValidator {
    /// Expected `iss` claim.
    expected_issuer: String,
    /// Expected `aud` claim - the relying party's client id.
    expected_audience: String,
    /// Source of Apple's verification keys.
    public_keys: Arc<dyn PublicKeyResolver>,
    /// Clock skew tolerance applied to `exp`/`nbf`/`iat` checks.
    leeway: Duration,
}

impl std::fmt::Debug for IdTokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenValidator")
            .field("expected_issuer", &self.expected_issuer)
            .field("expected_audience", &self.expected_audience)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl IdTokenValidator {
    /// Creates a validator with explicit issuer and audience.
    pub fn new(
        expected_issuer: impl Into<String>,
        expected_audience: impl Into<String>,
        public_keys: Arc<dyn PublicKeyResolver>,
    ) -> Self {
        Self {
            expected_issuer: expected_issuer.into(),
            expected_audience: expected_audience.into(),
            public_keys,
            leeway: DEFAULT_CLOCK_SKEW_LEEWAY,
        }
    }

    /// Creates a validator pinned to Apple's issuer. `client_id` becomes
    /// the expected audience.
    pub fn apple(client_id: impl Into<String>, public_keys: Arc<dyn PublicKeyResolver>) -> Self {
        Self::new(APPLE_ISSUER, client_id, public_keys)
    }

    /// Sets a custom clock skew tolerance.
    ///
    /// The default is [`DEFAULT_CLOCK_SKEW_LEEWAY`] (30 seconds); keep it
    /// in the tens of seconds.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The issuer this validator requires.
    pub fn expected_issuer(&self) -> &str {
        &self.expected_issuer
    }

    /// The audience this validator requires.
    pub fn expected_audience(&self) -> &str {
        &self.expected_audience
    }

    /// Validates an identity token and extracts the trusted identity.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenFormat`] - not three non-empty segments, or
    ///   header/payload are not valid base64url JSON, or `kid` is missing
    /// - [`AuthError::UnsupportedAlgorithm`] - header names anything but
    ///   ES256
    /// - [`AuthError::KeySetFetch`] / [`AuthError::KeyNotFound`] /
    ///   [`AuthError::Cancelled`] - propagated from key resolution
    /// - [`AuthError::InvalidPublicKey`] - the key set record cannot back
    ///   ES256 verification
    /// - [`AuthError::SignatureInvalid`] - signature mismatch
    /// - [`AuthError::ClaimValidation`] - a claim failed, named in the
    ///   error
    #[tracing::instrument(skip(self, id_token, cancel))]
    pub async fn validate(
        &self,
        id_token: &str,
        cancel: &CancellationToken,
    ) -> Result<IdentityClaims> {
        // 1. Parse
        let (header, claims) = parse_token(id_token)?;

        let alg = header.alg.ok_or_else(|| AuthError::TokenFormat {
            reason: "header missing 'alg' field".into(),
        })?;
        if alg != "ES256" {
            tracing::warn!(alg = %alg, "rejecting token with non-ES256 algorithm");
            return Err(AuthError::UnsupportedAlgorithm { alg });
        }

        let kid = header.kid.ok_or_else(|| AuthError::TokenFormat {
            reason: "header missing 'kid' field".into(),
        })?;

        // 2. Resolve key
        let entry = self.public_keys.get_key(&kid, cancel).await?;
        let decoding_key = entry.verification_key()?;

        // 3. Verify signature
        verify_signature(id_token, &decoding_key)?;

        // 4. Validate claims
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::ClaimValidation {
                claim: "exp",
                reason: "system clock before Unix epoch".into(),
            })?
            .as_secs();
        let identity = self.check_claims(&claims, now)?;

        tracing::debug!(
            kid = %kid,
            issuer = %identity.issuer,
            "identity token validated"
        );

        // 5. Extract identity
        Ok(identity)
    }

    /// Applies the issuer/audience/time-window checks with leeway.
    fn check_claims(&self, claims: &RawClaims, now: u64) -> Result<IdentityClaims> {
        let leeway = self.leeway.as_secs();

        let issuer = claims.iss.as_deref().ok_or_else(|| AuthError::ClaimValidation {
            claim: "iss",
            reason: "claim is missing".into(),
        })?;
        if issuer != self.expected_issuer {
            return Err(AuthError::ClaimValidation {
                claim: "iss",
                reason: format!("expected '{}', got '{issuer}'", self.expected_issuer),
            });
        }

        let audience = claims.aud.as_deref().ok_or_else(|| AuthError::ClaimValidation {
            claim: "aud",
            reason: "claim is missing".into(),
        })?;
        if audience != self.expected_audience {
            return Err(AuthError::ClaimValidation {
                claim: "aud",
                reason: format!("expected '{}', got '{audience}'", self.expected_audience),
            });
        }

        let subject = claims.sub.as_deref().filter(|sub| !sub.is_empty()).ok_or_else(|| {
            AuthError::ClaimValidation {
                claim: "sub",
                reason: "claim is missing or empty".into(),
            }
        })?;

        let expires_at = claims.exp.ok_or_else(|| AuthError::ClaimValidation {
            claim: "exp",
            reason: "claim is missing".into(),
        })?;
        // Current time must be strictly before exp, modulo leeway
        if now >= expires_at.saturating_add(leeway) {
            return Err(AuthError::ClaimValidation {
                claim: "exp",
                reason: format!("token expired at {expires_at} (now {now})"),
            });
        }

        let issued_at = claims.iat.ok_or_else(|| AuthError::ClaimValidation {
            claim: "iat",
            reason: "claim is missing".into(),
        })?;
        if issued_at > now.saturating_add(leeway) {
            return Err(AuthError::ClaimValidation {
                claim: "iat",
                reason: format!("issued in the future at {issued_at} (now {now})"),
            });
        }

        if let Some(not_before) = claims.nbf {
            if not_before > now.saturating_add(leeway) {
                return Err(AuthError::ClaimValidation {
                    claim: "nbf",
                    reason: format!("token not valid before {not_before} (now {now})"),
                });
            }
        }

        Ok(IdentityClaims {
            issuer: issuer.to_owned(),
            audience: audience.to_owned(),
            subject: subject.to_owned(),
            issued_at,
            not_before: claims.nbf,
            expires_at,
        })
    }
}

/// Splits the compact token and decodes header and payload.
fn parse_token(token: &str) -> Result<(TokenHeader, RawClaims)> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|part| part.is_empty()) {
        return Err(AuthError::TokenFormat {
            reason: "token must have three non-empty dot-separated segments".into(),
        });
    }

    let header_bytes = URL_SAFE_NO_PAD.decode(parts[0]).map_err(|e| AuthError::TokenFormat {
        reason: format!("header is not valid base64url: {e}"),
    })?;
    let header: TokenHeader =
        serde_json::from_slice(&header_bytes).map_err(|e| AuthError::TokenFormat {
            reason: format!("header is not valid JSON: {e}"),
        })?;

    let payload_bytes = URL_SAFE_NO_PAD.decode(parts[1]).map_err(|e| AuthError::TokenFormat {
        reason: format!("payload is not valid base64url: {e}"),
    })?;
    let claims: RawClaims =
        serde_json::from_slice(&payload_bytes).map_err(|e| AuthError::TokenFormat {
            reason: format!("payload is not valid JSON: {e}"),
        })?;

    Ok((header, claims))
}

/// Recomputes the signature over header+payload with the resolved key.
///
/// Time and audience checks are done separately with an explicit leeway,
/// so they are disabled here - this call answers only "was this token
/// signed by this key".
fn verify_signature(token: &str, key: &DecodingKey) -> Result<()> {
    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<serde_json::Value>(token, key, &validation).map_err(|e| match e.kind() {
        ErrorKind::InvalidSignature => AuthError::SignatureInvalid,
        ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) | ErrorKind::InvalidToken => {
            AuthError::TokenFormat {
                reason: format!("token rejected by decoder: {e}"),
            }
        }
        _ => AuthError::SignatureInvalid,
    })?;

    Ok(())
}
