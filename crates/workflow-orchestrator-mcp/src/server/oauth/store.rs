//! SQLite-backed OAuth store.
//!
//! Owns every mutation of persistent OAuth state: clients, users,
//! authorization codes and issued token pairs. Expiry is checked lazily by
//! callers; nothing here sweeps rows in the background.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, Transaction};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::token_hash::hash_token;
use super::types::{
    AuthorizationCode, NewAuthorizationCode, NewClient, NewTokenPair, OAuthClient, TokenRecord, User,
};
use crate::config::oauth::CLIENT_ID_PREFIX;
use crate::error::{StoreError, StoreResult};

/// Wait this long for a competing writer before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        subject TEXT NOT NULL UNIQUE,
        email TEXT,
        name TEXT,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS oauth_clients (
        client_id TEXT PRIMARY KEY,
        client_name TEXT,
        client_uri TEXT,
        redirect_uris TEXT NOT NULL,
        grant_types TEXT NOT NULL,
        response_types TEXT NOT NULL,
        scope TEXT NOT NULL,
        token_endpoint_auth_method TEXT NOT NULL DEFAULT 'none',
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS oauth_authorization_codes (
        code TEXT PRIMARY KEY,
        client_id TEXT NOT NULL REFERENCES oauth_clients(client_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        redirect_uri TEXT NOT NULL,
        scope TEXT NOT NULL,
        code_challenge TEXT NOT NULL,
        code_challenge_method TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        used BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_oauth_codes_expires_at ON oauth_authorization_codes(expires_at)",
    "CREATE TABLE IF NOT EXISTS oauth_tokens (
        id TEXT PRIMARY KEY,
        access_token TEXT NOT NULL,
        refresh_token TEXT,
        access_token_hash TEXT NOT NULL UNIQUE,
        refresh_token_hash TEXT UNIQUE,
        token_type TEXT NOT NULL DEFAULT 'Bearer',
        client_id TEXT NOT NULL REFERENCES oauth_clients(client_id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        scope TEXT NOT NULL,
        access_token_expires_at TEXT NOT NULL,
        refresh_token_expires_at TEXT,
        revoked BOOLEAN NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_oauth_tokens_access_expires ON oauth_tokens(access_token_expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_oauth_tokens_refresh_expires ON oauth_tokens(refresh_token_expires_at)",
];

const TOKEN_COLUMNS: &str = "id, access_token, refresh_token, access_token_hash, refresh_token_hash, \
     token_type, client_id, user_id, scope, access_token_expires_at, refresh_token_expires_at, \
     revoked, created_at";

const CODE_COLUMNS: &str = "code, client_id, user_id, redirect_uri, scope, code_challenge, \
     code_challenge_method, expires_at, used, created_at";

/// Persistent OAuth state.
#[derive(Clone)]
pub struct AuthStore {
    pool: SqlitePool,
    /// Serializes code exchanges within this process.
    exchange_lock: Arc<Mutex<()>>,
}

impl AuthStore {
    /// Open (creating if missing) the database at `database_url` and apply the schema.
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);

        let mut pool_options = SqlitePoolOptions::new();
        if is_in_memory(database_url) {
            // Every connection to `:memory:` is a separate database; keep exactly one alive.
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool, exchange_lock: Arc::new(Mutex::new(())) };
        store.migrate().await?;

        tracing::info!(database_url = %database_url, "Authorization store ready");
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ─── Clients ─────────────────────────────────────────────────────────────

    /// Register a client under a fresh `client_…` identifier.
    pub async fn create_client(&self, new: NewClient) -> StoreResult<OAuthClient> {
        let client = OAuthClient {
            client_id: format!("{CLIENT_ID_PREFIX}{}", generate_token(16)),
            client_name: new.client_name,
            client_uri: new.client_uri,
            redirect_uris: new.redirect_uris,
            grant_types: new.grant_types,
            response_types: new.response_types,
            scope: new.scope,
            token_endpoint_auth_method: "none".to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO oauth_clients (client_id, client_name, client_uri, redirect_uris, \
             grant_types, response_types, scope, token_endpoint_auth_method, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&client.client_id)
        .bind(&client.client_name)
        .bind(&client.client_uri)
        .bind(encode_list(&client.redirect_uris)?)
        .bind(encode_list(&client.grant_types)?)
        .bind(encode_list(&client.response_types)?)
        .bind(&client.scope)
        .bind(&client.token_endpoint_auth_method)
        .bind(client.created_at)
        .execute(&self.pool)
        .await?;

        Ok(client)
    }

    pub async fn find_client_by_id(&self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        let row = sqlx::query(
            "SELECT client_id, client_name, client_uri, redirect_uris, grant_types, \
             response_types, scope, token_endpoint_auth_method, created_at \
             FROM oauth_clients WHERE client_id = ?",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(client_from_row).transpose()
    }

    /// Remove a client together with its codes and tokens.
    pub async fn delete_client(&self, client_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM oauth_clients WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ─── Users ───────────────────────────────────────────────────────────────

    /// Resolve a user by external subject, provisioning one on first sight.
    pub async fn find_or_create_user_by_subject(&self, subject: &str) -> StoreResult<User> {
        let inserted = sqlx::query(
            "INSERT INTO users (id, subject, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(subject) DO NOTHING",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(subject)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() > 0 {
            tracing::info!(subject = %subject, "Provisioned user");
        }

        let row = sqlx::query("SELECT id, subject, email, name, created_at FROM users WHERE subject = ?")
            .bind(subject)
            .fetch_one(&self.pool)
            .await?;

        Ok(User {
            id: parse_uuid("users", row.try_get("id")?)?,
            subject: row.try_get("subject")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }

    // ─── Authorization codes ─────────────────────────────────────────────────

    /// Persist a new code with a random 256-bit value.
    pub async fn create_authorization_code(
        &self,
        new: NewAuthorizationCode,
    ) -> StoreResult<AuthorizationCode> {
        let code = AuthorizationCode {
            code: generate_token(32),
            client_id: new.client_id,
            user_id: new.user_id,
            redirect_uri: new.redirect_uri,
            scope: new.scope,
            code_challenge: new.code_challenge,
            code_challenge_method: new.code_challenge_method,
            expires_at: new.expires_at,
            used: false,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO oauth_authorization_codes (code, client_id, user_id, redirect_uri, scope, \
             code_challenge, code_challenge_method, expires_at, used, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(code.user_id.to_string())
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.as_str())
        .bind(code.expires_at)
        .bind(code.used)
        .bind(code.created_at)
        .execute(&self.pool)
        .await?;

        Ok(code)
    }

    pub async fn find_authorization_code_by_value(
        &self,
        code: &str,
    ) -> StoreResult<Option<AuthorizationCode>> {
        let mut conn = self.pool.acquire().await?;
        select_code(&mut *conn, code).await
    }

    /// Flip `used` from false to true. Returns false if it was already used or absent.
    pub async fn mark_authorization_code_used(&self, code: &str) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        claim_code(&mut *conn, code).await
    }

    /// Open an exchange for `code`.
    ///
    /// The code is claimed (`used` 0 → 1) as the first statement of a
    /// transaction. The caller inspects the loaded row and then either
    /// [`CodeExchange::complete`]s with a token pair or [`CodeExchange::abandon`]s,
    /// which leaves the code unused. Concurrent exchanges of the same code
    /// are serialized; only one can observe [`CodeExchange::claimed`].
    ///
    /// The exchange holds a pooled connection until finished, so callers
    /// must not query the store while one is open.
    pub async fn begin_code_exchange(&self, code: &str) -> StoreResult<CodeExchange> {
        let guard = Arc::clone(&self.exchange_lock).lock_owned().await;
        let mut tx = self.pool.begin().await?;

        let claimed = claim_code(&mut *tx, code).await?;
        let record = select_code(&mut *tx, code).await?;

        Ok(CodeExchange { tx, code: record, claimed, _guard: guard })
    }

    // ─── Tokens ──────────────────────────────────────────────────────────────

    pub async fn create_token_pair(&self, pair: &NewTokenPair) -> StoreResult<TokenRecord> {
        let mut conn = self.pool.acquire().await?;
        insert_token_pair(&mut *conn, pair).await
    }

    pub async fn find_token_by_access_hash(&self, hash: &str) -> StoreResult<Option<TokenRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM oauth_tokens WHERE access_token_hash = ?"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(token_from_row).transpose()
    }

    pub async fn find_token_by_refresh_hash(&self, hash: &str) -> StoreResult<Option<TokenRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM oauth_tokens WHERE refresh_token_hash = ?"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(token_from_row).transpose()
    }

    /// Match `hash` against either half of a pair.
    pub async fn find_token_by_either_hash(&self, hash: &str) -> StoreResult<Option<TokenRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM oauth_tokens \
             WHERE access_token_hash = ?1 OR refresh_token_hash = ?1 LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(token_from_row).transpose()
    }

    /// Replace the access half of a pair in place. The refresh half is untouched.
    pub async fn rotate_access_token(
        &self,
        id: Uuid,
        access_token: &str,
        access_token_hash: &str,
        expires_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE oauth_tokens SET access_token = ?, access_token_hash = ?, \
             access_token_expires_at = ? WHERE id = ? AND revoked = 0",
        )
        .bind(access_token)
        .bind(access_token_hash)
        .bind(expires_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Mark a pair revoked. Revocation is permanent.
    pub async fn revoke_token(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE oauth_tokens SET revoked = 1 WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStore").field("connections", &self.pool.size()).finish()
    }
}

/// An in-flight authorization code exchange.
///
/// Dropping it without calling [`complete`](Self::complete) rolls the claim back.
pub struct CodeExchange {
    tx: Transaction<'static, Sqlite>,
    code: Option<AuthorizationCode>,
    claimed: bool,
    _guard: OwnedMutexGuard<()>,
}

impl CodeExchange {
    /// The code row, if the value exists.
    #[must_use]
    pub const fn code(&self) -> Option<&AuthorizationCode> {
        self.code.as_ref()
    }

    /// Whether this exchange moved the code from unused to used.
    #[must_use]
    pub const fn claimed(&self) -> bool {
        self.claimed
    }

    /// Persist the issued pair and commit the claim atomically.
    pub async fn complete(mut self, pair: &NewTokenPair) -> StoreResult<TokenRecord> {
        let record = insert_token_pair(&mut *self.tx, pair).await?;
        self.tx.commit().await?;
        Ok(record)
    }

    /// Roll back, leaving the code as it was.
    pub async fn abandon(self) -> StoreResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl std::fmt::Debug for CodeExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeExchange")
            .field("found", &self.code.is_some())
            .field("claimed", &self.claimed)
            .finish()
    }
}

/// Generate a URL-safe random token from `bytes` bytes of entropy.
fn generate_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

async fn claim_code(conn: &mut SqliteConnection, code: &str) -> StoreResult<bool> {
    let result =
        sqlx::query("UPDATE oauth_authorization_codes SET used = 1 WHERE code = ? AND used = 0")
            .bind(code)
            .execute(conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

async fn select_code(conn: &mut SqliteConnection, code: &str) -> StoreResult<Option<AuthorizationCode>> {
    let row = sqlx::query(&format!(
        "SELECT {CODE_COLUMNS} FROM oauth_authorization_codes WHERE code = ?"
    ))
    .bind(code)
    .fetch_optional(conn)
    .await?;

    row.as_ref().map(code_from_row).transpose()
}

async fn insert_token_pair(conn: &mut SqliteConnection, pair: &NewTokenPair) -> StoreResult<TokenRecord> {
    let record = TokenRecord {
        id: Uuid::new_v4(),
        access_token: pair.access.token.clone(),
        refresh_token: Some(pair.refresh.token.clone()),
        access_token_hash: hash_token(&pair.access.token),
        refresh_token_hash: Some(hash_token(&pair.refresh.token)),
        token_type: "Bearer".to_string(),
        client_id: pair.client_id.clone(),
        user_id: pair.user_id,
        scope: pair.scope.clone(),
        access_token_expires_at: pair.access.expires_at,
        refresh_token_expires_at: Some(pair.refresh.expires_at),
        revoked: false,
        created_at: Utc::now(),
    };

    sqlx::query(&format!(
        "INSERT INTO oauth_tokens ({TOKEN_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(record.id.to_string())
    .bind(&record.access_token)
    .bind(&record.refresh_token)
    .bind(&record.access_token_hash)
    .bind(&record.refresh_token_hash)
    .bind(&record.token_type)
    .bind(&record.client_id)
    .bind(record.user_id.to_string())
    .bind(&record.scope)
    .bind(record.access_token_expires_at)
    .bind(record.refresh_token_expires_at)
    .bind(record.revoked)
    .bind(record.created_at)
    .execute(conn)
    .await?;

    Ok(record)
}

fn encode_list(values: &[String]) -> StoreResult<String> {
    serde_json::to_string(values).map_err(|e| StoreError::corrupt("oauth_clients", e.to_string()))
}

fn decode_list(raw: &str) -> StoreResult<Vec<String>> {
    serde_json::from_str(raw).map_err(|e| StoreError::corrupt("oauth_clients", e.to_string()))
}

fn parse_uuid(table: &'static str, raw: String) -> StoreResult<Uuid> {
    Uuid::parse_str(&raw).map_err(|e| StoreError::corrupt(table, format!("bad id {raw}: {e}")))
}

fn client_from_row(row: &SqliteRow) -> StoreResult<OAuthClient> {
    Ok(OAuthClient {
        client_id: row.try_get("client_id")?,
        client_name: row.try_get("client_name")?,
        client_uri: row.try_get("client_uri")?,
        redirect_uris: decode_list(row.try_get("redirect_uris")?)?,
        grant_types: decode_list(row.try_get("grant_types")?)?,
        response_types: decode_list(row.try_get("response_types")?)?,
        scope: row.try_get("scope")?,
        token_endpoint_auth_method: row.try_get("token_endpoint_auth_method")?,
        created_at: row.try_get("created_at")?,
    })
}

fn code_from_row(row: &SqliteRow) -> StoreResult<AuthorizationCode> {
    let method: String = row.try_get("code_challenge_method")?;
    Ok(AuthorizationCode {
        code: row.try_get("code")?,
        client_id: row.try_get("client_id")?,
        user_id: parse_uuid("oauth_authorization_codes", row.try_get("user_id")?)?,
        redirect_uri: row.try_get("redirect_uri")?,
        scope: row.try_get("scope")?,
        code_challenge: row.try_get("code_challenge")?,
        code_challenge_method: method
            .parse()
            .map_err(|e| StoreError::corrupt("oauth_authorization_codes", format!("{e}")))?,
        expires_at: row.try_get("expires_at")?,
        used: row.try_get("used")?,
        created_at: row.try_get("created_at")?,
    })
}

fn token_from_row(row: &SqliteRow) -> StoreResult<TokenRecord> {
    Ok(TokenRecord {
        id: parse_uuid("oauth_tokens", row.try_get("id")?)?,
        access_token: row.try_get("access_token")?,
        refresh_token: row.try_get("refresh_token")?,
        access_token_hash: row.try_get("access_token_hash")?,
        refresh_token_hash: row.try_get("refresh_token_hash")?,
        token_type: row.try_get("token_type")?,
        client_id: row.try_get("client_id")?,
        user_id: parse_uuid("oauth_tokens", row.try_get("user_id")?)?,
        scope: row.try_get("scope")?,
        access_token_expires_at: row.try_get("access_token_expires_at")?,
        refresh_token_expires_at: row.try_get("refresh_token_expires_at")?,
        revoked: row.try_get("revoked")?,
        created_at: row.try_get("created_at")?,
    })
}
