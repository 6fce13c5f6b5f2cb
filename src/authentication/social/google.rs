//! Google ID token validation against Google's published signing keys.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::Utc;
use reqwest::Client;
use rsa::pkcs1v15::VerifyingKey;
use rsa::{BigUint, RsaPublicKey};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use url::Url;

use super::{SocialIdentity, SocialValidator};
use crate::jwt;

pub const GOOGLE_PROVIDER: &str = "google";
pub const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
pub const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

#[derive(Debug, Deserialize)]
struct Jwks {
    keys: Vec<Jwk>,
}

#[derive(Debug, Deserialize)]
struct Jwk {
    kid: String,
    kty: String,
    n: String,
    e: String,
}

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: String,
    iss: String,
    aud: String,
    exp: i64,
    email: Option<String>,
}

/// Validates Google ID tokens issued for one OAuth client.
///
/// Signing keys are fetched on first use and again whenever a token names an
/// unknown `kid`, which is how Google key rotation shows up.
pub struct GoogleValidator {
    client_id: String,
    jwks_url: Url,
    http: Client,
    keys: RwLock<HashMap<String, Arc<VerifyingKey<Sha256>>>>,
}

impl GoogleValidator {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(client_id: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .build()?;
        Ok(Self {
            client_id: client_id.into(),
            jwks_url: Url::parse(GOOGLE_JWKS_URL)?,
            http,
            keys: RwLock::new(HashMap::new()),
        })
    }

    #[must_use]
    pub fn with_jwks_url(mut self, jwks_url: Url) -> Self {
        self.jwks_url = jwks_url;
        self
    }

    async fn key(&self, kid: &str) -> Result<Arc<VerifyingKey<Sha256>>> {
        if let Some(key) = self.keys.read().await.get(kid) {
            return Ok(Arc::clone(key));
        }
        self.refresh().await?;
        self.keys
            .read()
            .await
            .get(kid)
            .cloned()
            .ok_or_else(|| anyhow!("unknown google key id: {kid}"))
    }

    #[instrument(skip(self), fields(url = %self.jwks_url))]
    async fn refresh(&self) -> Result<()> {
        let response = self
            .http
            .get(self.jwks_url.as_str())
            .send()
            .await
            .context("failed to fetch google signing keys")?;
        if !response.status().is_success() {
            bail!("google signing keys request failed: {}", response.status());
        }
        let jwks: Jwks = response
            .json()
            .await
            .context("invalid google signing keys document")?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys.iter().filter(|jwk| jwk.kty == "RSA") {
            keys.insert(jwk.kid.clone(), Arc::new(verifying_key(jwk)?));
        }
        debug!(count = keys.len(), "google signing keys refreshed");
        *self.keys.write().await = keys;
        Ok(())
    }
}

#[async_trait]
impl SocialValidator for GoogleValidator {
    fn name(&self) -> &str {
        GOOGLE_PROVIDER
    }

    async fn validate(&self, assertion: &str) -> Result<SocialIdentity> {
        let parts = jwt::split(assertion)?;
        let kid = parts.header.kid.clone().ok_or(jwt::TokenError::MissingKid)?;
        let key = self.key(&kid).await?;
        parts.verify(&key)?;

        let claims: GoogleClaims = parts.claims()?;
        check_claims(&claims, &self.client_id, Utc::now().timestamp())?;

        Ok(SocialIdentity {
            provider: GOOGLE_PROVIDER.to_string(),
            provider_user_id: claims.sub,
            email: claims.email,
        })
    }
}

fn verifying_key(jwk: &Jwk) -> Result<VerifyingKey<Sha256>> {
    let n = Base64UrlUnpadded::decode_vec(&jwk.n).map_err(|_| anyhow!("invalid modulus"))?;
    let e = Base64UrlUnpadded::decode_vec(&jwk.e).map_err(|_| anyhow!("invalid exponent"))?;
    let public_key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
        .with_context(|| format!("invalid google key {}", jwk.kid))?;
    Ok(VerifyingKey::new(public_key))
}

fn check_claims(claims: &GoogleClaims, client_id: &str, now: i64) -> Result<()> {
    if !GOOGLE_ISSUERS.contains(&claims.iss.as_str()) {
        return Err(jwt::TokenError::InvalidIssuer.into());
    }
    if claims.aud != client_id {
        return Err(jwt::TokenError::InvalidAudience.into());
    }
    if now >= claims.exp {
        return Err(jwt::TokenError::Expired.into());
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::get};
    use rand::rngs::OsRng;
    use rsa::RsaPrivateKey;
    use rsa::traits::PublicKeyParts;
    use serde_json::{Value, json};

    struct Google {
        private_key: RsaPrivateKey,
        jwks: Value,
    }

    fn fake_google(kid: &str) -> Google {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let public_key = RsaPublicKey::from(&private_key);
        let jwks = json!({
            "keys": [{
                "kid": kid,
                "kty": "RSA",
                "alg": "RS256",
                "use": "sig",
                "n": Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be()),
                "e": Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be()),
            }]
        });
        Google { private_key, jwks }
    }

    async fn serve_jwks(jwks: Value) -> Url {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/certs", get(move || {
            let jwks = jwks.clone();
            async move { Json(jwks) }
        }));
        tokio::spawn(async move { axum::serve(listener, app).await });
        Url::parse(&format!("http://{addr}/certs")).unwrap()
    }

    fn id_token(google: &Google, kid: &str, claims: &Value) -> String {
        let header = jwt::Header {
            alg: jwt::RS256.to_string(),
            typ: Some("JWT".to_string()),
            kid: Some(kid.to_string()),
            token_use: None,
        };
        let key = rsa::pkcs1v15::SigningKey::<Sha256>::new(google.private_key.clone());
        jwt::sign(&header, claims, &key).unwrap()
    }

    fn claims(aud: &str, exp_offset: i64) -> Value {
        json!({
            "iss": "https://accounts.google.com",
            "aud": aud,
            "sub": "10769150350006150715113082367",
            "email": "jsmith@example.com",
            "email_verified": true,
            "iat": Utc::now().timestamp(),
            "exp": Utc::now().timestamp() + exp_offset,
        })
    }

    #[tokio::test]
    async fn valid_id_token_yields_identity() -> Result<()> {
        let google = fake_google("k1");
        let url = serve_jwks(google.jwks.clone()).await;
        let validator = GoogleValidator::new("client-1")?.with_jwks_url(url);

        let token = id_token(&google, "k1", &claims("client-1", 600));
        let identity = validator.validate(&token).await?;
        assert_eq!(identity.provider, "google");
        assert_eq!(identity.provider_user_id, "10769150350006150715113082367");
        assert_eq!(identity.email.as_deref(), Some("jsmith@example.com"));
        Ok(())
    }

    #[tokio::test]
    async fn wrong_audience_expiry_and_signer_are_rejected() -> Result<()> {
        let google = fake_google("k1");
        let url = serve_jwks(google.jwks.clone()).await;
        let validator = GoogleValidator::new("client-1")?.with_jwks_url(url);

        let other_client = id_token(&google, "k1", &claims("client-2", 600));
        assert!(validator.validate(&other_client).await.is_err());

        let expired = id_token(&google, "k1", &claims("client-1", -10));
        assert!(validator.validate(&expired).await.is_err());

        let impostor = fake_google("k1");
        let forged = id_token(&impostor, "k1", &claims("client-1", 600));
        assert!(validator.validate(&forged).await.is_err());

        let unknown_kid = id_token(&google, "k2", &claims("client-1", 600));
        assert!(validator.validate(&unknown_kid).await.is_err());
        Ok(())
    }

    #[test]
    fn issuer_must_be_google() {
        let claims = GoogleClaims {
            sub: "1".to_string(),
            iss: "https://evil.example".to_string(),
            aud: "client-1".to_string(),
            exp: 100,
            email: None,
        };
        assert!(check_claims(&claims, "client-1", 0).is_err());
        let claims = GoogleClaims {
            iss: "accounts.google.com".to_string(),
            ..claims
        };
        assert!(check_claims(&claims, "client-1", 0).is_ok());
        assert!(check_claims(&claims, "client-1", 100).is_err());
    }
}
