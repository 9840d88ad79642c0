//! User Aggregate
//!
//! The only aggregate kind shipped with the crate. Fields change only
//! through `Created` and `Destroyed`; deletion is a flag, never a row delete.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::ValidationError;
use crate::event_store::{AggregateRows, PgUnitOfWork, StoreError};

use super::{Aggregate, AggregateId};

/// Unique index on `users.email`
const EMAIL_KEY: &str = "users_email_key";

/// User Aggregate
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Assigned by storage on first save
    id: Option<AggregateId>,

    name: String,

    /// Unique across users, enforced by storage
    email: String,

    /// Empty until a password is set
    password_digest: String,

    /// Soft-delete flag
    deleted: bool,
}

impl User {
    pub(crate) fn register(&mut self, name: &str, email: &str, password: &str) {
        self.name = name.to_string();
        self.email = email.to_string();
        self.password_digest = if password.is_empty() {
            String::new()
        } else {
            digest(email, password)
        };
        self.deleted = false;
    }

    pub(crate) fn soft_delete(&mut self) {
        self.deleted = true;
    }

    /// Compare a candidate password with the stored digest
    pub fn authenticate(&self, password: &str) -> bool {
        !self.password_digest.is_empty() && digest(&self.email, password) == self.password_digest
    }

    // =========================================================================
    // Getters
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

fn digest(email: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

impl Aggregate for User {
    fn aggregate_type() -> &'static str {
        "User"
    }

    fn table_name() -> &'static str {
        "users"
    }

    fn events_table() -> &'static str {
        "user_events"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn assign_id(&mut self, id: AggregateId) {
        self.id = Some(id);
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::blank("name"));
        }

        if self.email.trim().is_empty() {
            return Err(ValidationError::blank("email"));
        }
        match self.email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(ValidationError::invalid("email", "must look like name@host")),
        }

        if self.password_digest.is_empty() {
            return Err(ValidationError::blank("password"));
        }

        Ok(())
    }

    fn unique_keys(&self) -> Vec<(&'static str, String)> {
        vec![(EMAIL_KEY, self.email.clone())]
    }
}

// =========================================================================
// PostgreSQL row mapping
// =========================================================================

type UserRow = (AggregateId, String, String, String, bool);

impl From<UserRow> for User {
    fn from((id, name, email, password_digest, deleted): UserRow) -> Self {
        Self {
            id: Some(id),
            name,
            email,
            password_digest,
            deleted,
        }
    }
}

#[async_trait]
impl AggregateRows<User> for PgUnitOfWork {
    async fn find(&mut self, id: AggregateId) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, name, email, password_digest, deleted
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(self.connection())
        .await?;

        Ok(row.map(User::from))
    }

    async fn find_for_update(&mut self, id: AggregateId) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, name, email, password_digest, deleted
            FROM users
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(self.connection())
        .await?;

        Ok(row.map(User::from))
    }

    async fn insert(&mut self, user: &User) -> Result<AggregateId, StoreError> {
        let id: AggregateId = sqlx::query_scalar(
            r#"
            INSERT INTO users (name, email, password_digest, deleted)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_digest)
        .bind(user.deleted)
        .fetch_one(self.connection())
        .await?;

        Ok(id)
    }

    async fn update(&mut self, user: &User) -> Result<(), StoreError> {
        let id = user.id.ok_or(StoreError::Unpersisted(User::aggregate_type()))?;

        let rows_affected = sqlx::query(
            r#"
            UPDATE users
            SET name = $2, email = $3, password_digest = $4, deleted = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_digest)
        .bind(user.deleted)
        .execute(self.connection())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::RowMissing {
                table: User::table_name(),
                id,
            });
        }

        Ok(())
    }
}
