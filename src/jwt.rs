//! Compact RS256 JWT encoding shared by the tokenizer and social validators.

use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use thiserror::Error;

pub const RS256: &str = "RS256";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("token use mismatch: expected {expected}, got {actual}")]
    UseMismatch { expected: String, actual: String },
    #[error("token subject mismatch")]
    TokenSubjectMismatch,
    #[error("missing key id")]
    MissingKid,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid issuer")]
    InvalidIssuer,
    #[error("invalid audience")]
    InvalidAudience,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("token expired")]
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub token_use: Option<String>,
}

impl Header {
    #[must_use]
    pub fn rs256(kid: impl Into<String>, token_use: impl Into<String>) -> Self {
        Self {
            alg: RS256.to_string(),
            typ: Some("JWT".to_string()),
            kid: Some(kid.into()),
            token_use: Some(token_use.into()),
        }
    }
}

/// A token split into its segments. Nothing here is trusted until
/// [`Parts::verify`] succeeds.
#[derive(Debug)]
pub struct Parts<'a> {
    pub header: Header,
    signing_input: &'a str,
    payload: &'a str,
    signature: Vec<u8>,
}

impl Parts<'_> {
    /// Decode the payload without checking the signature.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not base64url encoded JSON of shape `T`.
    pub fn claims<T: DeserializeOwned>(&self) -> Result<T, TokenError> {
        b64d_json(self.payload)
    }

    /// Verify the RS256 signature over `header.payload`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSignature` if the signature does not match the key.
    pub fn verify(&self, key: &VerifyingKey<Sha256>) -> Result<(), TokenError> {
        let signature = Signature::try_from(self.signature.as_slice())
            .map_err(|_| TokenError::InvalidSignature)?;
        key.verify(self.signing_input.as_bytes(), &signature)
            .map_err(|_| TokenError::InvalidSignature)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Sign `claims` and return the compact serialization.
///
/// # Errors
///
/// Returns an error if the header or claims cannot be encoded as JSON.
pub fn sign<T: Serialize>(
    header: &Header,
    claims: &T,
    key: &SigningKey<Sha256>,
) -> Result<String, TokenError> {
    let header_b64 = b64e_json(header)?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature: Signature = key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Split a compact token and decode its header.
///
/// Only `RS256` is accepted; `none`, HMAC and every other algorithm are
/// rejected before any key is looked up.
///
/// # Errors
///
/// Returns an error if the token does not have exactly three segments, a
/// segment is not valid base64url, or the algorithm is not `RS256`.
pub fn split(token: &str) -> Result<Parts<'_>, TokenError> {
    let mut segments = token.split('.');
    let header_b64 = segments.next().ok_or(TokenError::TokenFormat)?;
    let payload = segments.next().ok_or(TokenError::TokenFormat)?;
    let signature_b64 = segments.next().ok_or(TokenError::TokenFormat)?;
    if segments.next().is_some() || header_b64.is_empty() || payload.is_empty() {
        return Err(TokenError::TokenFormat);
    }

    let header: Header = b64d_json(header_b64)?;
    if header.alg != RS256 {
        return Err(TokenError::UnsupportedAlg(header.alg));
    }

    let signature =
        Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| TokenError::Base64)?;
    let signing_input = &token[..header_b64.len() + 1 + payload.len()];

    Ok(Parts {
        header,
        signing_input,
        payload,
        signature,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use serde_json::json;

    fn keys() -> (SigningKey<Sha256>, VerifyingKey<Sha256>) {
        let private_key = RsaPrivateKey::new(&mut OsRng, 1024).unwrap();
        let verifying = VerifyingKey::<Sha256>::new(RsaPublicKey::from(&private_key));
        (SigningKey::<Sha256>::new(private_key), verifying)
    }

    #[test]
    fn signed_token_verifies() {
        let (signing, verifying) = keys();
        let token = sign(
            &Header::rs256("kid-1", "access"),
            &json!({"sub": "a@x.com"}),
            &signing,
        )
        .unwrap();

        let parts = split(&token).unwrap();
        assert_eq!(parts.header.kid.as_deref(), Some("kid-1"));
        assert_eq!(parts.header.token_use.as_deref(), Some("access"));
        parts.verify(&verifying).unwrap();
        let claims: serde_json::Value = parts.claims().unwrap();
        assert_eq!(claims["sub"], "a@x.com");
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let (signing, verifying) = keys();
        let token = sign(
            &Header::rs256("kid-1", "access"),
            &json!({"sub": "a@x.com"}),
            &signing,
        )
        .unwrap();
        let forged_payload = Base64UrlUnpadded::encode_string(br#"{"sub":"b@x.com"}"#);
        let segments: Vec<&str> = token.split('.').collect();
        let forged = format!("{}.{}.{}", segments[0], forged_payload, segments[2]);

        let parts = split(&forged).unwrap();
        assert!(matches!(
            parts.verify(&verifying),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn rejects_none_and_hmac_algorithms() {
        for alg in ["none", "HS256"] {
            let header = Base64UrlUnpadded::encode_string(
                format!(r#"{{"alg":"{alg}","kid":"k","use":"access"}}"#).as_bytes(),
            );
            let payload = Base64UrlUnpadded::encode_string(br#"{"sub":"a@x.com"}"#);
            let token = format!("{header}.{payload}.");
            assert!(matches!(
                split(&token),
                Err(TokenError::UnsupportedAlg(found)) if found == alg
            ));
        }
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(split("abc"), Err(TokenError::TokenFormat)));
        assert!(matches!(split("a.b.c.d"), Err(TokenError::TokenFormat)));
        assert!(matches!(split("!!.e30.sig"), Err(TokenError::Base64)));
    }
}
