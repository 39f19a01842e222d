//! Private key resolvers
//!
//! Three ways to satisfy [`PrivateKeyResolver`], mirroring how deployments
//! actually store the Apple signing key:
//!
//! - [`FilePrivateKeyResolver`] - reads `AuthKey_{kid}.p8` from a directory
//! - [`FnPrivateKeyResolver`] - wraps a caller-supplied async function
//!   (secret vault, database, anything that can produce PEM text)
//! - [`StaticPrivateKey`] - material supplied directly at construction
//!
//! None of these cache: every `resolve` call goes back to the source.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::errors::{AuthError, Result};

use super::{PrivateKeyMaterial, PrivateKeyResolver};

/// Rejects key ids that could escape the key directory or smuggle control
/// characters into paths. Apple key ids are short alphanumeric strings.
fn validate_kid(kid: &str) -> Result<()> {
    if kid.is_empty() || kid.len() > 64 {
        return Err(AuthError::KeyResolution {
            reason: format!("key id has invalid length {}", kid.len()),
        });
    }
    if !kid.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(AuthError::KeyResolution {
            reason: "key id contains characters outside [A-Za-z0-9_-]".into(),
        });
    }
    Ok(())
}

/// Resolves private keys from `.p8` files named by convention.
///
/// For key id `ABC123` the resolver reads `AuthKey_ABC123.p8` from the
/// configured directory - the filename Apple's developer portal uses when
/// the key is downloaded.
#[derive(Debug, Clone)]
pub struct FilePrivateKeyResolver {
    directory: PathBuf,
}

impl FilePrivateKeyResolver {
    /// Creates a resolver rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }
}

#[async_trait]
impl PrivateKeyResolver for FilePrivateKeyResolver {
    async fn resolve(
        &self,
        key_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PrivateKeyMaterial> {
        validate_kid(key_id)?;

        let file_name = format!("AuthKey_{key_id}.p8");
        let path = self.directory.join(&file_name);

        let pem = tokio::select! {
            () = cancel.cancelled() => return Err(AuthError::Cancelled),
            read = tokio::fs::read_to_string(&path) => read.map_err(|e| {
                AuthError::KeyResolution {
                    reason: format!("failed to read {file_name}: {e}"),
                }
            })?,
        };

        tracing::debug!(kid = key_id, file = %file_name, "resolved private key from file");
        PrivateKeyMaterial::from_pem(key_id, &pem)
    }
}

/// Future type produced by the provider function of [`FnPrivateKeyResolver`].
pub type PemFuture = BoxFuture<'static, Result<String>>;

/// Resolves private keys through a caller-supplied async function.
///
/// The function receives the key id and returns PKCS#8 PEM text. Use this
/// to back key resolution with a secret vault or any other remote store:
///
/// ```no_run
/// use siwa_auth::keys::FnPrivateKeyResolver;
///
/// let resolver = FnPrivateKeyResolver::new(|key_id| {
///     Box::pin(async move {
///         // e.g. vault lookup for secret "AuthKey-{key_id}"
///         fetch_secret(&format!("AuthKey-{key_id}")).await
///     })
/// });
/// # async fn fetch_secret(_name: &str) -> siwa_auth::Result<String> { unimplemented!() }
/// ```
#[derive(Clone)]
pub struct FnPrivateKeyResolver {
    provider: Arc<dyn Fn(String) -> PemFuture + Send + Sync>,
}

impl FnPrivateKeyResolver {
    /// Wraps `provider` as a resolver.
    pub fn new<F>(provider: F) -> Self
    where
        F: Fn(String) -> PemFuture + Send + Sync + 'static,
    {
        Self {
            provider: Arc::new(provider),
        }
    }
}

impl std::fmt::Debug for FnPrivateKeyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPrivateKeyResolver").finish_non_exhaustive()
    }
}

#[async_trait]
impl PrivateKeyResolver for FnPrivateKeyResolver {
    async fn resolve(
        &self,
        key_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PrivateKeyMaterial> {
        let pem = tokio::select! {
            () = cancel.cancelled() => return Err(AuthError::Cancelled),
            pem = (self.provider)(key_id.to_owned()) => pem?,
        };

        tracing::debug!(kid = key_id, "resolved private key from provider function");
        PrivateKeyMaterial::from_pem(key_id, &pem)
    }
}

/// A resolver holding one key directly.
///
/// Useful for tests and deployments where the key arrives through
/// configuration rather than a file or vault. Resolution fails for any
/// other key id, so a rotated `kid` is not silently signed with stale
/// material.
#[derive(Debug, Clone)]
pub struct StaticPrivateKey {
    material: PrivateKeyMaterial,
}

impl StaticPrivateKey {
    /// Builds the resolver from PKCS#8 PEM text.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyResolution`] if the PEM is malformed or not
    /// a P-256 key.
    pub fn from_pem(kid: impl Into<String>, pem: &str) -> Result<Self> {
        Ok(Self {
            material: PrivateKeyMaterial::from_pem(kid, pem)?,
        })
    }

    /// Builds the resolver from already-validated key material.
    pub fn new(material: PrivateKeyMaterial) -> Self {
        Self { material }
    }
}

#[async_trait]
impl PrivateKeyResolver for StaticPrivateKey {
    async fn resolve(
        &self,
        key_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<PrivateKeyMaterial> {
        if key_id != self.material.kid() {
            return Err(AuthError::KeyResolution {
                reason: format!(
                    "requested key id '{key_id}' does not match held key '{}'",
                    self.material.kid()
                ),
            });
        }
        Ok(self.material.clone())
    }
}
