//! PostgreSQL database service.
//!
//! All queries are tenant-filtered where a tenant boundary applies, and
//! every mutation with a correctness requirement under concurrency is a
//! single atomic statement.

use service_core::error::AppError;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use crate::models::{
    ApiKey, BackupCode, MfaCredential, RefreshSession, Tenant, User, UserIdentity,
};

/// PostgreSQL database wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database wrapper from a connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Health check - ping the database.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::InternalError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }

    // ==================== Tenant Operations ====================

    /// Find tenant by ID.
    pub async fn find_tenant_by_id(&self, tenant_id: Uuid) -> Result<Option<Tenant>, AppError> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Insert a new tenant.
    pub async fn insert_tenant(&self, tenant: &Tenant) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, tenant_slug, tenant_label, tenant_state_code, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.tenant_slug)
        .bind(&tenant.tenant_label)
        .bind(&tenant.tenant_state_code)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== User Operations ====================

    /// Find user by ID.
    pub async fn find_user_by_id(&self, user_id: Uuid) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Find user by email within a tenant.
    pub async fn find_user_by_email_in_tenant(
        &self,
        tenant_id: Uuid,
        email: &str,
    ) -> Result<Option<User>, AppError> {
        sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE tenant_id = $1 AND LOWER(email) = LOWER($2)",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Insert a new user.
    pub async fn insert_user(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users
                (user_id, tenant_id, email, password_hash, display_name, role_codes,
                 email_verified, user_state_code, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(user.user_id)
        .bind(user.tenant_id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.display_name)
        .bind(&user.role_codes)
        .bind(user.email_verified)
        .bind(&user.user_state_code)
        .bind(user.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Update a user's password hash (rehash-on-verify and resets).
    pub async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE user_id = $2")
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Mark a user's email as verified.
    pub async fn mark_email_verified(&self, user_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE users SET email_verified = TRUE WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== External Identity Operations ====================

    /// Find an external identity by provider subject, scoped to a tenant.
    pub async fn find_identity_by_subject(
        &self,
        tenant_id: Uuid,
        provider_code: &str,
        subject: &str,
    ) -> Result<Option<UserIdentity>, AppError> {
        sqlx::query_as::<_, UserIdentity>(
            r#"
            SELECT ui.* FROM user_identities ui
            JOIN users u ON u.user_id = ui.user_id
            WHERE u.tenant_id = $1 AND ui.provider_code = $2 AND ui.subject_text = $3
            "#,
        )
        .bind(tenant_id)
        .bind(provider_code)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Insert an external identity link.
    pub async fn insert_user_identity(&self, identity: &UserIdentity) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO user_identities (identity_id, user_id, provider_code, subject_text, created_utc)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(identity.identity_id)
        .bind(identity.user_id)
        .bind(&identity.provider_code)
        .bind(&identity.subject_text)
        .bind(identity.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Refresh Session Operations ====================

    /// Insert a new refresh session.
    pub async fn insert_refresh_session(
        &self,
        session: &RefreshSession,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions
                (session_id, tenant_id, user_id, token_hash_text, expiry_utc,
                 last_used_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.session_id)
        .bind(session.tenant_id)
        .bind(session.user_id)
        .bind(&session.token_hash_text)
        .bind(session.expiry_utc)
        .bind(session.last_used_utc)
        .bind(session.revoked_utc)
        .bind(session.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Rotate a refresh session: revoke the row matching `old_hash` and
    /// insert its replacement in one atomic statement. Of two
    /// concurrent rotations on the same hash, exactly one sees the old
    /// row as active; the loser gets None, which callers must treat as
    /// a reuse signal.
    pub async fn rotate_refresh_session(
        &self,
        old_hash: &str,
        new_session_id: Uuid,
        new_hash: &str,
        expiry_days: i64,
    ) -> Result<Option<RefreshSession>, AppError> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            WITH revoked AS (
                UPDATE refresh_sessions
                SET revoked_utc = NOW(), last_used_utc = NOW()
                WHERE token_hash_text = $1
                  AND revoked_utc IS NULL
                  AND expiry_utc > NOW()
                RETURNING tenant_id, user_id
            )
            INSERT INTO refresh_sessions
                (session_id, tenant_id, user_id, token_hash_text, expiry_utc, created_utc)
            SELECT $2, tenant_id, user_id, $3, NOW() + make_interval(days => $4::int), NOW()
            FROM revoked
            RETURNING *
            "#,
        )
        .bind(old_hash)
        .bind(new_session_id)
        .bind(new_hash)
        .bind(expiry_days)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Find an active session by token hash.
    pub async fn find_session_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        sqlx::query_as::<_, RefreshSession>(
            r#"
            SELECT * FROM refresh_sessions
            WHERE token_hash_text = $1 AND revoked_utc IS NULL AND expiry_utc > NOW()
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Find a session by token hash regardless of state. Used by reuse
    /// detection to learn whose token was replayed.
    pub async fn find_session_by_hash_any(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshSession>, AppError> {
        sqlx::query_as::<_, RefreshSession>(
            "SELECT * FROM refresh_sessions WHERE token_hash_text = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Revoke the active session matching a token hash. Returns whether
    /// a session was revoked.
    pub async fn revoke_session_by_hash(&self, token_hash: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_utc = NOW()
            WHERE token_hash_text = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(token_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every active session for a user. Returns how many were
    /// revoked.
    pub async fn revoke_all_sessions_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_sessions
            SET revoked_utc = NOW()
            WHERE user_id = $1 AND revoked_utc IS NULL
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected())
    }

    /// Count active sessions for a user.
    pub async fn count_active_sessions_for_user(&self, user_id: Uuid) -> Result<i64, AppError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM refresh_sessions
            WHERE user_id = $1 AND revoked_utc IS NULL AND expiry_utc > NOW()
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(count)
    }

    // ==================== MFA Credential Operations ====================

    /// Find a user's TOTP credential, confirmed or pending.
    pub async fn find_mfa_credential(
        &self,
        user_id: Uuid,
    ) -> Result<Option<MfaCredential>, AppError> {
        sqlx::query_as::<_, MfaCredential>("SELECT * FROM mfa_credentials WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Find a user's confirmed TOTP credential.
    pub async fn find_confirmed_mfa_credential(
        &self,
        user_id: Uuid,
    ) -> Result<Option<MfaCredential>, AppError> {
        sqlx::query_as::<_, MfaCredential>(
            "SELECT * FROM mfa_credentials WHERE user_id = $1 AND confirmed_utc IS NOT NULL",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Store a pending enrollment, replacing any previous unconfirmed
    /// one. Refuses to touch a confirmed credential.
    pub async fn upsert_pending_mfa_credential(
        &self,
        credential: &MfaCredential,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO mfa_credentials
                (credential_id, user_id, secret_base32, confirmed_utc, last_used_utc, created_utc)
            VALUES ($1, $2, $3, NULL, NULL, $4)
            ON CONFLICT (user_id) DO UPDATE
                SET credential_id = EXCLUDED.credential_id,
                    secret_base32 = EXCLUDED.secret_base32,
                    created_utc = EXCLUDED.created_utc
                WHERE mfa_credentials.confirmed_utc IS NULL
            "#,
        )
        .bind(credential.credential_id)
        .bind(credential.user_id)
        .bind(&credential.secret_base32)
        .bind(credential.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        if result.rows_affected() == 0 {
            return Err(AppError::AlreadyExists(anyhow::anyhow!(
                "TOTP is already enrolled"
            )));
        }
        Ok(())
    }

    /// Confirm a pending credential. Returns whether the row moved from
    /// pending to confirmed.
    pub async fn confirm_mfa_credential(&self, credential_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE mfa_credentials
            SET confirmed_utc = NOW(), last_used_utc = NOW()
            WHERE credential_id = $1 AND confirmed_utc IS NULL
            "#,
        )
        .bind(credential_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    /// Record a successful TOTP verification.
    pub async fn touch_mfa_credential(&self, credential_id: Uuid) -> Result<(), AppError> {
        sqlx::query("UPDATE mfa_credentials SET last_used_utc = NOW() WHERE credential_id = $1")
            .bind(credential_id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Remove a user's TOTP credential and backup codes (MFA disable).
    pub async fn delete_mfa_for_user(&self, user_id: Uuid) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        sqlx::query("DELETE FROM mfa_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        tx.commit()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    // ==================== Backup Code Operations ====================

    /// Replace a user's backup-code set with a fresh batch, atomically.
    pub async fn replace_backup_codes(
        &self,
        user_id: Uuid,
        codes: &[BackupCode],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        sqlx::query("DELETE FROM backup_codes WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;

        for code in codes {
            sqlx::query(
                r#"
                INSERT INTO backup_codes (code_id, user_id, code_hash_text, consumed_utc, created_utc)
                VALUES ($1, $2, $3, NULL, $4)
                "#,
            )
            .bind(code.code_id)
            .bind(code.user_id)
            .bind(&code.code_hash_text)
            .bind(code.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Fetch a user's unconsumed backup codes.
    pub async fn find_unconsumed_backup_codes(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<BackupCode>, AppError> {
        sqlx::query_as::<_, BackupCode>(
            "SELECT * FROM backup_codes WHERE user_id = $1 AND consumed_utc IS NULL",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Consume a backup code. The conditional update is the atomic
    /// check-and-mark: a second spend of the same code affects no rows.
    pub async fn consume_backup_code(&self, code_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE backup_codes
            SET consumed_utc = NOW()
            WHERE code_id = $1 AND consumed_utc IS NULL
            "#,
        )
        .bind(code_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(result.rows_affected() > 0)
    }

    // ==================== API Key Operations ====================

    /// Insert a new API key.
    pub async fn insert_api_key(&self, key: &ApiKey) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys
                (key_id, tenant_id, user_id, key_name, key_hash_text, scope_codes,
                 expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(key.key_id)
        .bind(key.tenant_id)
        .bind(key.user_id)
        .bind(&key.key_name)
        .bind(&key.key_hash_text)
        .bind(&key.scope_codes)
        .bind(key.expiry_utc)
        .bind(key.revoked_utc)
        .bind(key.created_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }

    /// Find an API key by secret hash.
    pub async fn find_api_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<ApiKey>, AppError> {
        sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE key_hash_text = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Find an API key by ID. Unscoped on purpose: the caller decides
    /// between PermissionDenied (foreign tenant) and NotFound.
    pub async fn find_api_key_by_id(&self, key_id: Uuid) -> Result<Option<ApiKey>, AppError> {
        sqlx::query_as::<_, ApiKey>("SELECT * FROM api_keys WHERE key_id = $1")
            .bind(key_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))
    }

    /// Set a key's revocation timestamp if not already set. Idempotent:
    /// revoking twice affects no rows and is still success.
    pub async fn revoke_api_key(&self, key_id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE api_keys SET revoked_utc = NOW() WHERE key_id = $1 AND revoked_utc IS NULL",
        )
        .bind(key_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e)))?;
        Ok(())
    }
}
