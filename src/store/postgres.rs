//! PostgreSQL backend. Schema lives in `sql/schema.sql`.

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{Connection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use tracing::{Instrument, Span};

use super::{
    AccountRecord, AccountStore, ForgotStore, ForgotToken, HealthCheck, LogonCode, LogonCodeStore,
    NewAccount, ResetTransaction, Session, SessionStore, SigningKeyStore, SocialProvider, StoreError,
    TransactionManager,
};
use crate::tokens::SigningKey;

/// Advisory lock id serializing first-key bootstrap across processes.
const KEY_BOOTSTRAP_LOCK: i64 = 0x0062_756c_7761_726b;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply `sql/schema.sql`. Every statement is idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first statement that fails.
    pub async fn apply_schema(&self) -> anyhow::Result<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire connection for schema setup")?;

        for (index, statement) in split_sql_statements(SCHEMA_SQL).iter().enumerate() {
            sqlx::query(statement)
                .execute(&mut *conn)
                .await
                .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
        }
        Ok(())
    }
}

/// Split on `;`, dropping comments and empty statements.
fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        current.push_str(line);
        current.push('\n');
        if trimmed.ends_with(';') {
            let statement = current.trim().trim_end_matches(';').trim().to_string();
            if !statement.is_empty() {
                statements.push(statement);
            }
            current.clear();
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

fn db_span(operation: &'static str, statement: &'static str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

fn signing_key_from_row(row: &PgRow) -> SigningKey {
    SigningKey {
        key_id: row.get("key_id"),
        algorithm: row.get("algorithm"),
        private_pem: row.get("private_key"),
        public_pem: row.get("public_key"),
        format: row.get("format"),
        created_at: row.get("created_at"),
    }
}

const INSERT_SIGNING_KEY: &str = r"
    INSERT INTO signing_keys
        (key_id, algorithm, private_key, public_key, format, created_at)
    VALUES ($1, $2, $3, $4, $5, $6)
";

fn insert_signing_key_query(
    key: &SigningKey,
) -> sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments> {
    sqlx::query(INSERT_SIGNING_KEY)
        .bind(&key.key_id)
        .bind(&key.algorithm)
        .bind(&key.private_pem)
        .bind(&key.public_pem)
        .bind(&key.format)
        .bind(key.created_at)
}

async fn update_password_with<'e, E>(
    executor: E,
    email: &str,
    password_hash: &str,
) -> Result<bool, StoreError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = r"
        UPDATE accounts
        SET password_hash = $2,
            modified_at = NOW()
        WHERE email = $1
    ";
    let result = sqlx::query(query)
        .bind(email)
        .bind(password_hash)
        .execute(executor)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to update password")?;
    Ok(result.rows_affected() > 0)
}

#[async_trait]
impl AccountStore for PgStore {
    async fn create(&self, account: NewAccount) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO accounts
                (email, password_hash, verification_token_hash)
            VALUES ($1, $2, $3)
        ";
        let result = sqlx::query(query)
            .bind(&account.email)
            .bind(&account.password_hash)
            .bind(&account.verification_token_hash)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Duplicate(format!("account {}", account.email)))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert account")
                .into()),
        }
    }

    async fn read(&self, email: &str) -> Result<Option<AccountRecord>, StoreError> {
        let query = r"
            SELECT email, password_hash, is_verified, is_enabled, is_deleted,
                   verification_token_hash, roles, created_at, modified_at
            FROM accounts
            WHERE email = $1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read account")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let query = "SELECT name, social_id FROM account_social_providers WHERE email = $1 ORDER BY linked_at";
        let providers = sqlx::query(query)
            .bind(email)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read social providers")?;

        Ok(Some(AccountRecord {
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            is_verified: row.get("is_verified"),
            is_enabled: row.get("is_enabled"),
            is_deleted: row.get("is_deleted"),
            verification_token_hash: row.get("verification_token_hash"),
            roles: row.get("roles"),
            social_providers: providers
                .iter()
                .map(|p| SocialProvider {
                    name: p.get("name"),
                    social_id: p.get("social_id"),
                })
                .collect(),
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
        }))
    }

    async fn verify(&self, email: &str, token_hash: &[u8]) -> Result<bool, StoreError> {
        // Consume the token and activate the account in one statement.
        let query = r"
            UPDATE accounts
            SET is_verified = TRUE,
                is_enabled = TRUE,
                verification_token_hash = NULL,
                modified_at = NOW()
            WHERE email = $1
              AND verification_token_hash = $2
              AND NOT is_deleted
        ";
        let result = sqlx::query(query)
            .bind(email)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to verify account")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_verification_token(
        &self,
        email: &str,
        token_hash: &[u8],
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE accounts
            SET verification_token_hash = $2,
                modified_at = NOW()
            WHERE email = $1
        ";
        let result = sqlx::query(query)
            .bind(email)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to set verification token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_password(
        &self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        update_password_with(&self.pool, email, password_hash).await
    }

    async fn update_email(
        &self,
        email: &str,
        new_email: &str,
        token_hash: &[u8],
    ) -> Result<bool, StoreError> {
        let query = r"
            UPDATE accounts
            SET email = $2,
                is_verified = FALSE,
                verification_token_hash = $3,
                modified_at = NOW()
            WHERE email = $1
        ";
        let result = sqlx::query(query)
            .bind(email)
            .bind(new_email)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await;

        match result {
            Ok(result) => Ok(result.rows_affected() > 0),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Duplicate(format!("account {new_email}")))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to update email")
                .into()),
        }
    }

    async fn delete(&self, email: &str) -> Result<bool, StoreError> {
        let query = r"
            UPDATE accounts
            SET is_deleted = TRUE,
                modified_at = NOW()
            WHERE email = $1
        ";
        let result = sqlx::query(query)
            .bind(email)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to delete account")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_enabled(&self, email: &str, enabled: bool) -> Result<bool, StoreError> {
        let query = "UPDATE accounts SET is_enabled = $2, modified_at = NOW() WHERE email = $1";
        let result = sqlx::query(query)
            .bind(email)
            .bind(enabled)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update account status")?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_roles(&self, email: &str, roles: &[String]) -> Result<bool, StoreError> {
        let query = "UPDATE accounts SET roles = $2, modified_at = NOW() WHERE email = $1";
        let result = sqlx::query(query)
            .bind(email)
            .bind(roles)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to update roles")?;
        Ok(result.rows_affected() > 0)
    }

    async fn link_social(
        &self,
        email: &str,
        provider: &SocialProvider,
    ) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO account_social_providers (email, name, social_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (email, name, social_id) DO NOTHING
        ";
        sqlx::query(query)
            .bind(email)
            .bind(&provider.name)
            .bind(&provider.social_id)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to link social provider")?;
        Ok(())
    }
}

#[async_trait]
impl SigningKeyStore for PgStore {
    async fn insert(&self, key: &SigningKey) -> Result<(), StoreError> {
        let result = insert_signing_key_query(key)
            .execute(&self.pool)
            .instrument(db_span("INSERT", INSERT_SIGNING_KEY))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => {
                Err(StoreError::Duplicate(format!("signing key {}", key.key_id)))
            }
            Err(err) => Err(anyhow::Error::new(err)
                .context("failed to insert signing key")
                .into()),
        }
    }

    async fn insert_first(&self, key: &SigningKey) -> Result<bool, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("begin key bootstrap transaction")?;

        let query = "SELECT pg_advisory_xact_lock($1)";
        sqlx::query(query)
            .bind(KEY_BOOTSTRAP_LOCK)
            .execute(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to take key bootstrap lock")?;

        let query = "SELECT COUNT(*) FROM signing_keys";
        let existing: i64 = sqlx::query_scalar(query)
            .fetch_one(&mut *tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to count signing keys")?;

        if existing > 0 {
            let _ = tx.rollback().await;
            return Ok(false);
        }

        insert_signing_key_query(key)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", INSERT_SIGNING_KEY))
            .await
            .context("failed to insert first signing key")?;

        tx.commit()
            .await
            .context("commit key bootstrap transaction")?;
        Ok(true)
    }

    async fn latest(&self) -> Result<Option<SigningKey>, StoreError> {
        let query = r"
            SELECT key_id, algorithm, private_key, public_key, format, created_at
            FROM signing_keys
            ORDER BY created_at DESC, seq DESC
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read latest signing key")?;
        Ok(row.as_ref().map(signing_key_from_row))
    }

    async fn get(&self, key_id: &str) -> Result<Option<SigningKey>, StoreError> {
        let query = r"
            SELECT key_id, algorithm, private_key, public_key, format, created_at
            FROM signing_keys
            WHERE key_id = $1
        ";
        let row = sqlx::query(query)
            .bind(key_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read signing key")?;
        Ok(row.as_ref().map(signing_key_from_row))
    }

    async fn all(&self) -> Result<Vec<SigningKey>, StoreError> {
        let query = r"
            SELECT key_id, algorithm, private_key, public_key, format, created_at
            FROM signing_keys
            ORDER BY seq
        ";
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read signing keys")?;
        Ok(rows.iter().map(signing_key_from_row).collect())
    }
}

#[async_trait]
impl LogonCodeStore for PgStore {
    async fn upsert(&self, code: &LogonCode) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO logon_codes (email, code_hash, expires_at, created_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET code_hash = EXCLUDED.code_hash,
                expires_at = EXCLUDED.expires_at,
                created_at = EXCLUDED.created_at
        ";
        sqlx::query(query)
            .bind(&code.email)
            .bind(&code.code_hash)
            .bind(code.expires_at)
            .bind(code.created_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert logon code")?;
        Ok(())
    }

    async fn read(&self, email: &str) -> Result<Option<LogonCode>, StoreError> {
        let query = "SELECT email, code_hash, expires_at, created_at FROM logon_codes WHERE email = $1";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read logon code")?;
        Ok(row.map(|row| LogonCode {
            email: row.get("email"),
            code_hash: row.get("code_hash"),
            expires_at: row.get("expires_at"),
            created_at: row.get("created_at"),
        }))
    }

    async fn delete(&self, email: &str, code_hash: &str) -> Result<bool, StoreError> {
        let query = "DELETE FROM logon_codes WHERE email = $1 AND code_hash = $2";
        let result = sqlx::query(query)
            .bind(email)
            .bind(code_hash)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete logon code")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn upsert(&self, session: &Session) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO sessions
                (email, client_id, access_token, refresh_token, created_at, modified_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (email, client_id) DO UPDATE
            SET access_token = EXCLUDED.access_token,
                refresh_token = EXCLUDED.refresh_token,
                modified_at = EXCLUDED.modified_at
        ";
        sqlx::query(query)
            .bind(&session.email)
            .bind(&session.client_id)
            .bind(&session.access_token)
            .bind(&session.refresh_token)
            .bind(session.created_at)
            .bind(session.modified_at)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert session")?;
        Ok(())
    }

    async fn read(&self, email: &str, client_id: &str) -> Result<Option<Session>, StoreError> {
        let query = r"
            SELECT email, client_id, access_token, refresh_token, created_at, modified_at
            FROM sessions
            WHERE email = $1 AND client_id = $2
        ";
        let row = sqlx::query(query)
            .bind(email)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read session")?;
        Ok(row.map(|row| Session {
            email: row.get("email"),
            client_id: row.get("client_id"),
            access_token: row.get("access_token"),
            refresh_token: row.get("refresh_token"),
            created_at: row.get("created_at"),
            modified_at: row.get("modified_at"),
        }))
    }

    async fn delete(&self, email: &str, client_id: &str) -> Result<bool, StoreError> {
        let query = "DELETE FROM sessions WHERE email = $1 AND client_id = $2";
        let result = sqlx::query(query)
            .bind(email)
            .bind(client_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete session")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self, email: &str) -> Result<u64, StoreError> {
        let query = "DELETE FROM sessions WHERE email = $1";
        let result = sqlx::query(query)
            .bind(email)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete sessions")?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl ForgotStore for PgStore {
    async fn upsert(&self, email: &str, token_hash: &[u8]) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO forgot_tokens (email, token_hash, created_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (email) DO UPDATE
            SET token_hash = EXCLUDED.token_hash,
                created_at = EXCLUDED.created_at
        ";
        sqlx::query(query)
            .bind(email)
            .bind(token_hash)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to upsert forgot token")?;
        Ok(())
    }
}

struct PgResetTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl HealthCheck for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let acquire_span = tracing::info_span!(
            "db.acquire",
            db.system = "postgresql",
            db.operation = "ACQUIRE"
        );
        let mut conn = self
            .pool
            .acquire()
            .instrument(acquire_span)
            .await
            .context("failed to acquire database connection")?;
        let ping_span = tracing::info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        conn.ping()
            .instrument(ping_span)
            .await
            .context("failed to ping database")?;
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for PgStore {
    async fn begin(&self) -> Result<Box<dyn ResetTransaction>, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .context("begin password reset transaction")?;
        Ok(Box::new(PgResetTransaction { tx }))
    }
}

#[async_trait]
impl ResetTransaction for PgResetTransaction {
    async fn read_forgot(&mut self, email: &str) -> Result<Option<ForgotToken>, StoreError> {
        let query = r"
            SELECT email, token_hash, created_at
            FROM forgot_tokens
            WHERE email = $1
            FOR UPDATE
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&mut *self.tx)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to read forgot token")?;
        Ok(row.map(|row| ForgotToken {
            email: row.get("email"),
            token_hash: row.get("token_hash"),
            created_at: row.get("created_at"),
        }))
    }

    async fn update_password(
        &mut self,
        email: &str,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        update_password_with(&mut *self.tx, email, password_hash).await
    }

    async fn delete_forgot(&mut self, email: &str) -> Result<bool, StoreError> {
        let query = "DELETE FROM forgot_tokens WHERE email = $1";
        let result = sqlx::query(query)
            .bind(email)
            .execute(&mut *self.tx)
            .instrument(db_span("DELETE", query))
            .await
            .context("failed to delete forgot token")?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .context("commit password reset transaction")?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .context("rollback password reset transaction")?;
        Ok(())
    }
}
