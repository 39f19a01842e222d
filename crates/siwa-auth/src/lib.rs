//! # siwa-auth - Sign in with Apple relying-party core
//!
//! Everything a backend needs to participate in "Sign in with Apple"
//! without owning the OAuth dance itself:
//!
//! - **Client secret generation** - Apple has no static client secrets; the
//!   relying party proves its identity at the token endpoint with a
//!   short-lived ES256-signed JWT. [`ClientSecretGenerator`] builds it.
//! - **Identity token validation** - Apple returns the user's identity as a
//!   signed JWT. [`IdTokenValidator`] verifies the signature against
//!   Apple's published keys and checks every claim, yielding
//!   [`IdentityClaims`] or a typed [`AuthError`].
//! - **Key material** - [`keys`] supplies both sides: private key resolvers
//!   (file by convention, secret-store function, static bytes) that never
//!   cache, and a TTL-cached, single-flight [`JwksClient`](keys::JwksClient)
//!   for Apple's public key set.
//!
//! The OAuth2 authorization-code flow itself (redirects, state, the token
//! endpoint POST) is deliberately out of scope: an external OAuth client
//! calls [`ClientSecretGenerator::generate`] before each exchange and
//! [`IdTokenValidator::validate`] on the response's `id_token`.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────┐    client_secret    ┌──────────────────────┐
//! │ external OAuth     │◄────────────────────│ ClientSecretGenerator│
//! │ orchestrator       │                     └──────────┬───────────┘
//! │ (token exchange)   │                                │ resolve(kid)
//! │                    │    id_token         ┌──────────▼───────────┐
//! │                    │────────────────────►│  PrivateKeyResolver  │
//! └─────────┬──────────┘                     └──────────────────────┘
//!           │                                ┌──────────────────────┐
//!           └───────────────────────────────►│   IdTokenValidator   │
//!                         IdentityClaims     └──────────┬───────────┘
//!                                                       │ get_key(kid)
//!                                            ┌──────────▼───────────┐
//!                                            │      JwksClient      │
//!                                            │  (TTL cache, single- │
//!                                            │   flight refresh)    │
//!                                            └──────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//! use siwa_auth::{ClientSecretGenerator, IdTokenValidator, SigningIdentity};
//! use siwa_auth::keys::{FilePrivateKeyResolver, JwksClient};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(id_token: &str) -> siwa_auth::Result<()> {
//! let cancel = CancellationToken::new();
//!
//! // Before each token-exchange call:
//! let generator =
//!     ClientSecretGenerator::new(Arc::new(FilePrivateKeyResolver::new("/etc/apple-keys")));
//! let identity = SigningIdentity::new("TEAM123456", "com.example.service", "ABC123DEFG");
//! let client_secret = generator.generate(&identity, &cancel).await?;
//!
//! // After receiving Apple's token response:
//! let validator = IdTokenValidator::apple("com.example.service", Arc::new(JwksClient::apple()));
//! let user = validator.validate(id_token, &cancel).await?;
//! println!("authenticated Apple user {}", user.subject);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security notes
//!
//! - Only ES256 is accepted, for generation and validation alike. The
//!   attacker-controlled `alg` header is checked before any key use.
//! - Private keys are re-resolved per signing call and zeroized on drop;
//!   they are never cached or logged.
//! - Any validation failure rejects the sign-in. Operator diagnostics go
//!   through `tracing`; error displays carry no secret material.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Client secret assertion generation.
pub mod client_secret;
/// Signing identity and Apple endpoint defaults.
pub mod config;
/// Error taxonomy.
pub mod errors;
/// Private and public key material resolution.
pub mod keys;
/// Identity token validation.
pub mod validator;

pub use client_secret::ClientSecretGenerator;
pub use config::{
    SigningIdentity, APPLE_ISSUER, APPLE_JWKS_URL, DEFAULT_CLIENT_SECRET_LIFETIME,
    DEFAULT_CLOCK_SKEW_LEEWAY, DEFAULT_KEY_CACHE_TTL, DEFAULT_MIN_REFRESH_INTERVAL,
};
pub use errors::{AuthError, Result};
pub use keys::{JwksClient, PrivateKeyMaterial, PrivateKeyResolver, PublicKeyResolver,
    PublicKeySetEntry};
pub use validator::{IdTokenValidator, IdentityClaims};
