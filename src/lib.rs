//! # Bulwark (credential issuance and verification)
//!
//! `bulwark` authenticates principals and issues short-lived RS256 bearer
//! tokens backed by a rotating RSA key set.
//!
//! ## Authentication methods
//!
//! - **Password:** checked against an Argon2id hash after the account health
//!   gate (deleted, then not verified, then disabled).
//! - **One-time code:** a six digit code mailed to the account, stored only as a
//!   hash, single use and time boxed.
//! - **Social:** a third-party ID token checked by a provider validator; first
//!   sight of an email provisions an unverified account.
//!
//! ## Tokens
//!
//! Access tokens carry roles, refresh tokens do not. The header names the
//! signing key (`kid`) and the token use (`access` or `refresh`). Every key ever
//! generated stays valid for verification; rotation only changes which key new
//! tokens are signed with.
//!
//! ## Sessions
//!
//! Acknowledged sessions are bookkeeping keyed by `(email, client_id)`. Revoking
//! a session does not invalidate the bearer tokens it recorded.

pub mod accounts;
pub mod api;
pub mod authentication;
pub mod cli;
pub mod email;
pub mod error;
pub mod jwt;
pub mod store;
pub mod tokens;

#[cfg(test)]
mod testing;

pub use error::AuthError;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
