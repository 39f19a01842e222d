//! Common test utilities for integration tests
//!
//! Provides a wiremock stand-in for Apple's key set endpoint and P-256
//! test key helpers shared by the integration suites.

#![allow(dead_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::pkcs8::EncodePrivateKey;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Mock of Apple's key set endpoint.
pub struct MockAppleServer {
    pub server: MockServer,
    pub jwks_endpoint: String,
}

impl MockAppleServer {
    /// Starts a mock server; the key set lives at `/auth/keys` as on the
    /// real host.
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let jwks_endpoint = format!("{}/auth/keys", server.uri());
        Self {
            server,
            jwks_endpoint,
        }
    }

    /// Serves the given JWK records.
    pub async fn mock_jwks(&self, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .mount(&self.server)
            .await;
    }

    /// Serves the given JWK records and asserts the endpoint is hit
    /// exactly `expected_requests` times (verified when the server drops).
    pub async fn mock_jwks_expect(&self, keys: Vec<Value>, expected_requests: u64) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .expect(expected_requests)
            .mount(&self.server)
            .await;
    }

    /// Serves the given JWK records for the next `times` requests only;
    /// later mounts then take over.
    pub async fn mock_jwks_once(&self, keys: Vec<Value>) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "keys": keys })))
            .up_to_n_times(1)
            .mount(&self.server)
            .await;
    }

    /// Serves an error status from the key set endpoint.
    pub async fn mock_jwks_failure(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Serves the key set after a delay, to exercise cancellation.
    pub async fn mock_jwks_delayed(&self, keys: Vec<Value>, delay: Duration) {
        Mock::given(method("GET"))
            .and(path("/auth/keys"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "keys": keys }))
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }
}

/// A generated P-256 key pair with helpers for both sides of the trust
/// relationship: PEM/signing key for the private half, JWK/decoding key
/// for the public half.
pub struct TestKey {
    pub kid: String,
    secret: p256::SecretKey,
}

impl TestKey {
    /// Generates a fresh random key pair.
    pub fn generate(kid: &str) -> Self {
        Self {
            kid: kid.to_owned(),
            secret: p256::SecretKey::random(&mut OsRng),
        }
    }

    /// PKCS#8 PEM encoding of the private key, as found in a `.p8` file.
    pub fn pem(&self) -> String {
        self.secret
            .to_pkcs8_pem(p256::pkcs8::LineEnding::LF)
            .expect("PEM encoding")
            .to_string()
    }

    /// Signing key for token construction.
    pub fn encoding_key(&self) -> EncodingKey {
        let der = self.secret.to_pkcs8_der().expect("PKCS#8 encoding");
        EncodingKey::from_ec_der(der.as_bytes())
    }

    /// Verification key matching [`Self::encoding_key`].
    pub fn decoding_key(&self) -> DecodingKey {
        let (x, y) = self.coordinates();
        DecodingKey::from_ec_components(&x, &y).expect("decoding key")
    }

    /// The public key as a JWK record as Apple would publish it.
    pub fn jwk(&self) -> Value {
        let (x, y) = self.coordinates();
        json!({
            "kty": "EC",
            "kid": self.kid,
            "use": "sig",
            "alg": "ES256",
            "crv": "P-256",
            "x": x,
            "y": y,
        })
    }

    /// Signs an identity token with this key, `kid` in the header.
    pub fn sign_id_token(&self, claims: &Value) -> String {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.kid.clone());
        encode(&header, claims, &self.encoding_key()).expect("token encoding")
    }

    fn coordinates(&self) -> (String, String) {
        let point = self.secret.public_key().to_encoded_point(false);
        (
            URL_SAFE_NO_PAD.encode(point.x().expect("x coordinate")),
            URL_SAFE_NO_PAD.encode(point.y().expect("y coordinate")),
        )
    }
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs()
}

/// Standard identity token claims: issued now, expiring `expires_in`
/// seconds from now.
pub fn id_token_claims(iss: &str, aud: &str, sub: &str, expires_in: i64) -> Value {
    let now = now_secs() as i64;
    json!({
        "iss": iss,
        "aud": aud,
        "sub": sub,
        "iat": now,
        "exp": now + expires_in,
    })
}
