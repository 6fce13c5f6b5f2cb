//! Signing keys and RS256 bearer tokens.

mod manager;
mod signing_key;
mod tokenizer;

pub use manager::SigningKeyManager;
pub use signing_key::{DEFAULT_KEY_BITS, KEY_FORMAT_PEM, SigningKey};
pub use tokenizer::{
    AccessClaims, DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_ISSUER, DEFAULT_REFRESH_TTL_SECONDS,
    RefreshClaims, TokenUse, Tokenizer, TokenizerConfig,
};
