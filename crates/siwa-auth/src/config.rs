//! Configuration for the Sign in with Apple relying-party core
//!
//! [`SigningIdentity`] carries everything the client secret generator needs
//! for one generation call. It is supplied by the caller each time rather
//! than discovered through shared mutable options, so there is no hidden
//! global configuration state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{AuthError, Result};

/// Audience of the generated client secret assertion, and issuer of the
/// identity tokens Apple returns.
pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Apple's published key set endpoint.
pub const APPLE_JWKS_URL: &str = "https://appleid.apple.com/auth/keys";

/// Default lifetime of a generated client secret (5 minutes).
///
/// The assertion is used once per token-exchange call, so a short lifetime
/// is appropriate. Apple rejects lifetimes beyond roughly six months; the
/// generator does not clamp the caller-supplied value.
pub const DEFAULT_CLIENT_SECRET_LIFETIME: Duration = Duration::from_secs(300);

/// Default TTL for cached key set entries (10 minutes).
///
/// Shorter TTL = faster key rotation detection.
/// Longer TTL = fewer network requests to Apple.
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(600);

/// Default minimum interval between key set refreshes (rate limiting).
pub const DEFAULT_MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default clock skew tolerance for claim validation (30 seconds).
pub const DEFAULT_CLOCK_SKEW_LEEWAY: Duration = Duration::from_secs(30);

/// The relying party's identity for one client secret generation call.
///
/// All three identifiers come from the Apple Developer portal:
///
/// - `team_id` - the 10-character Team ID (becomes the `iss` claim)
/// - `client_id` - the Services ID / app bundle id (becomes `sub`)
/// - `key_id` - the Key ID of the registered Sign in with Apple key
///   (becomes the `kid` header and selects the private key)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningIdentity {
    /// Apple Developer Team ID.
    pub team_id: String,
    /// Services ID the secret is generated for.
    pub client_id: String,
    /// Key ID of the P-256 signing key.
    pub key_id: String,
    /// How long the generated assertion stays valid (`exp - iat`).
    ///
    /// Apple rejects lifetimes beyond roughly six months. This is not
    /// clamped here - callers are responsible for a compliant value.
    pub expires_after: Duration,
}

impl SigningIdentity {
    /// Creates a signing identity with the default secret lifetime
    /// ([`DEFAULT_CLIENT_SECRET_LIFETIME`]).
    pub fn new(
        team_id: impl Into<String>,
        client_id: impl Into<String>,
        key_id: impl Into<String>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            client_id: client_id.into(),
            key_id: key_id.into(),
            expires_after: DEFAULT_CLIENT_SECRET_LIFETIME,
        }
    }

    /// Sets a custom assertion lifetime.
    #[must_use]
    pub fn with_expires_after(mut self, expires_after: Duration) -> Self {
        self.expires_after = expires_after;
        self
    }

    /// Validates that all identifiers are present.
    ///
    /// Called by the generator before any key material is touched, so a
    /// misconfigured deployment fails with a configuration error rather
    /// than a confusing key lookup failure.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] naming the first empty field.
    pub fn validate(&self) -> Result<()> {
        if self.team_id.trim().is_empty() {
            return Err(AuthError::Configuration {
                reason: "team_id is empty".into(),
            });
        }
        if self.client_id.trim().is_empty() {
            return Err(AuthError::Configuration {
                reason: "client_id is empty".into(),
            });
        }
        if self.key_id.trim().is_empty() {
            return Err(AuthError::Configuration {
                reason: "key_id is empty".into(),
            });
        }
        Ok(())
    }
}
