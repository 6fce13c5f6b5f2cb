use crate::accounts::{AccountService, SecretHasher};
use crate::api;
use crate::authentication::social::{GoogleValidator, SocialBridge, SocialProviders};
use crate::authentication::{AuthenticationService, LogonCodeService};
use crate::email::{EmailLinks, LogEmailSender, Mailer};
use crate::store::{PgStore, Stores};
use crate::tokens::{SigningKeyManager, Tokenizer, TokenizerConfig};
use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: SecretString,
    pub domain: String,
    pub issuer: String,
    pub access_ttl_seconds: i64,
    pub refresh_ttl_seconds: i64,
    pub logon_code_ttl_minutes: i64,
    pub key_bits: usize,
    pub verification_url: String,
    pub forgot_password_url: String,
    pub magic_url: String,
    pub google_client_id: Option<String>,
    pub allowed_origins: Vec<String>,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable, the first signing key cannot be
/// created, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(args.dsn.expose_secret())
        .await
        .context("Failed to connect to database")?;

    let backend = Arc::new(PgStore::new(pool));
    backend.apply_schema().await?;
    let stores = Stores::from_backend(backend);

    let keys = Arc::new(SigningKeyManager::new(stores.signing_keys.clone()).with_key_bits(args.key_bits));
    keys.initialize()
        .await
        .context("Failed to initialize signing keys")?;

    let tokenizer = Arc::new(Tokenizer::new(
        TokenizerConfig::new(args.domain)
            .with_issuer(args.issuer)
            .with_access_ttl_seconds(args.access_ttl_seconds)
            .with_refresh_ttl_seconds(args.refresh_ttl_seconds),
        keys,
    ));

    let links = EmailLinks::parse(&args.verification_url, &args.forgot_password_url, &args.magic_url)?;
    let mailer = Arc::new(Mailer::new(links, Arc::new(LogEmailSender)));
    let hasher = SecretHasher::default();

    let accounts = Arc::new(AccountService::new(
        &stores,
        tokenizer.clone(),
        mailer.clone(),
        hasher.clone(),
    ));
    let authentication = Arc::new(AuthenticationService::new(
        &stores,
        tokenizer.clone(),
        hasher.clone(),
    ));
    let logon_codes = Arc::new(
        LogonCodeService::new(&stores, tokenizer.clone(), mailer, hasher)
            .with_ttl_minutes(args.logon_code_ttl_minutes),
    );

    let mut providers = SocialProviders::builder();
    if let Some(client_id) = args.google_client_id {
        providers = providers.register(Arc::new(GoogleValidator::new(client_id)?));
    }
    let social = Arc::new(SocialBridge::new(
        providers.build(),
        &stores,
        accounts.clone(),
        tokenizer,
    ));
    info!("social providers: {:?}", social.providers().names());

    let services = api::Services {
        accounts,
        authentication,
        logon_codes,
        social,
        health: stores.health.clone(),
    };

    let cors = api::cors_layer(&args.allowed_origins)?;
    debug!("CORS enabled: {}", cors.is_some());

    api::serve(args.port, api::app(&services, cors)).await
}
