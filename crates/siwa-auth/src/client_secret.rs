//! Client secret assertion generation
//!
//! Apple does not accept a static OAuth client secret. Instead the relying
//! party proves its identity at the token endpoint with a short-lived JWT
//! signed by its registered P-256 key. Apple's verifier is strict: the
//! header must carry exactly `alg`, `kid`, `typ` and the payload exactly
//! `iss`, `iat`, `nbf`, `exp`, `aud`, `sub` - extra fields are rejected.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{SigningIdentity, APPLE_ISSUER};
use crate::errors::{AuthError, Result};
use crate::keys::PrivateKeyResolver;

/// The six payload claims Apple requires - exactly these, no more.
///
/// Field order here is serialization order; the set is what matters.
#[derive(Debug, Serialize)]
struct ClientSecretClaims<'a> {
    /// Apple Developer Team ID.
    iss: &'a str,
    /// Issued at (seconds since epoch).
    iat: u64,
    /// Not before - same instant as `iat`.
    nbf: u64,
    /// Expiry: `iat + expires_after`.
    exp: u64,
    /// Always Apple's authorization server.
    aud: &'a str,
    /// The Services ID the secret is generated for.
    sub: &'a str,
}

/// Generates the signed client secret assertion for Apple's token endpoint.
///
/// The private key is re-resolved through the injected
/// [`PrivateKeyResolver`] on every call - never cached - so key rotation
/// takes effect immediately and secret bytes are dropped (and zeroized) as
/// soon as the signature is produced. Beyond that resolution the generator
/// is pure given its inputs and the current time.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use siwa_auth::{ClientSecretGenerator, SigningIdentity};
/// use siwa_auth::keys::FilePrivateKeyResolver;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> siwa_auth::Result<()> {
/// let generator =
///     ClientSecretGenerator::new(Arc::new(FilePrivateKeyResolver::new("/etc/apple-keys")));
/// let identity = SigningIdentity::new("TEAM123456", "com.example.service", "ABC123DEFG");
///
/// let client_secret = generator
///     .generate(&identity, &CancellationToken::new())
///     .await?;
/// // pass as `client_secret` in the token-exchange request
/// # Ok(())
/// # }
/// ```
pub struct ClientSecretGenerator {
    private_keys: Arc<dyn PrivateKeyResolver>,
}

impl ClientSecretGenerator {
    /// Creates a generator backed by the given private key resolver.
    pub fn new(private_keys: Arc<dyn PrivateKeyResolver>) -> Self {
        Self { private_keys }
    }

    /// Builds and signs the compact client secret assertion.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Configuration`] if the identity has empty fields
    /// - [`AuthError::KeyResolution`] propagated from the key resolver
    /// - [`AuthError::Signing`] if signature computation fails
    /// - [`AuthError::Cancelled`] if `cancel` fired during key resolution
    #[tracing::instrument(skip(self, cancel), fields(kid = %identity.key_id))]
    pub async fn generate(
        &self,
        identity: &SigningIdentity,
        cancel: &CancellationToken,
    ) -> Result<String> {
        identity.validate()?;

        let key = self.private_keys.resolve(&identity.key_id, cancel).await?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::Signing {
                reason: "system clock before Unix epoch".into(),
            })?
            .as_secs();

        let claims = ClientSecretClaims {
            iss: &identity.team_id,
            iat: now,
            nbf: now,
            exp: now + identity.expires_after.as_secs(),
            aud: APPLE_ISSUER,
            sub: &identity.client_id,
        };

        // Header::new sets typ "JWT"; kid selects the key on Apple's side.
        // jsonwebtoken omits unset header fields, leaving exactly alg/typ/kid.
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(identity.key_id.clone());
        header.typ = Some("JWT".to_string());

        let encoding_key = EncodingKey::from_ec_der(key.pkcs8_der());
        let assertion = encode(&header, &claims, &encoding_key).map_err(|e| AuthError::Signing {
            reason: format!("JWT signing failed: {e}"),
        })?;

        tracing::debug!(
            team_id = %identity.team_id,
            client_id = %identity.client_id,
            expires_in = identity.expires_after.as_secs(),
            "generated client secret assertion"
        );

        Ok(assertion)
    }
}

impl std::fmt::Debug for ClientSecretGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecretGenerator").finish_non_exhaustive()
    }
}
