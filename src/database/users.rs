//! User Repository - balances, roles, trust scores and ban flags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, Row};
use tracing::debug;
use uuid::Uuid;

use super::pool::{Backend, MemoryTables};
use crate::error::{MarketError, MarketResult};

/// Ceiling for credits granted manually by admins
pub const MAX_MANUAL_CREDITS: i32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> MarketResult<Self> {
        match value {
            "user" => Ok(Role::User),
            "moderator" => Ok(Role::Moderator),
            "admin" => Ok(Role::Admin),
            other => Err(MarketError::Internal(format!("Unknown role: {}", other))),
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Moderator | Role::Admin)
    }

    pub fn promoted(&self) -> Role {
        match self {
            Role::User => Role::Moderator,
            Role::Moderator | Role::Admin => Role::Admin,
        }
    }

    pub fn demoted(&self) -> Role {
        match self {
            Role::Admin => Role::Moderator,
            Role::Moderator | Role::User => Role::User,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub credits: i64,
    pub manual_credits: i32,
    pub trust_score: i32,
    pub role: Role,
    pub is_banned: bool,
    pub ban_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: impl Into<String>, role: Role) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email: email.into(),
            credits: 0,
            manual_credits: 0,
            trust_score: crate::moderation::MAX_TRUST_SCORE,
            role,
            is_banned: false,
            ban_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn from_row(row: &PgRow) -> MarketResult<Self> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            credits: row.try_get("credits")?,
            manual_credits: row.try_get("manual_credits")?,
            trust_score: row.try_get("trust_score")?,
            role: Role::parse(&role)?,
            is_banned: row.try_get("is_banned")?,
            ban_reason: row.try_get("ban_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Balance snapshot after a ledger mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Balance {
    pub credits: i64,
    pub manual_credits: i32,
}

const USER_COLUMNS: &str = "id, email, credits, manual_credits, trust_score, role, \
                            is_banned, ban_reason, created_at, updated_at";

/// Single credit increment statement. Runs on the pool or inside a
/// caller's transaction (payment settlement).
pub(crate) async fn add_credits<'e, E>(
    executor: E,
    id: Uuid,
    amount: i64,
) -> MarketResult<Option<Balance>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        UPDATE market.users
        SET credits = credits + $2, updated_at = NOW()
        WHERE id = $1
        RETURNING credits, manual_credits
        "#,
    )
    .bind(id)
    .bind(amount)
    .fetch_optional(executor)
    .await?;

    row.map(|row| -> MarketResult<Balance> {
        Ok(Balance {
            credits: row.try_get("credits")?,
            manual_credits: row.try_get("manual_credits")?,
        })
    })
    .transpose()
}

impl MemoryTables {
    /// In-memory counterpart of [`add_credits`]; callers hold the write lock.
    pub(crate) fn add_credits(&mut self, id: Uuid, amount: i64) -> Option<Balance> {
        self.users.get_mut(&id).map(|user| {
            user.credits += amount;
            user.updated_at = Utc::now();
            Balance {
                credits: user.credits,
                manual_credits: user.manual_credits,
            }
        })
    }
}

pub struct UserRepository {
    backend: Backend,
}

impl UserRepository {
    pub(crate) fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub async fn insert_user(&self, user: &User) -> MarketResult<()> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO market.users
                    (id, email, credits, manual_credits, trust_score, role,
                     is_banned, ban_reason, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                    "#,
                )
                .bind(user.id)
                .bind(&user.email)
                .bind(user.credits)
                .bind(user.manual_credits)
                .bind(user.trust_score)
                .bind(user.role.as_str())
                .bind(user.is_banned)
                .bind(&user.ban_reason)
                .bind(user.created_at)
                .bind(user.updated_at)
                .execute(pool)
                .await?;
            }
            Backend::InMemory(tables) => {
                let mut tables = tables.write().await;
                if tables.users.values().any(|u| u.email == user.email) {
                    return Err(MarketError::validation("Email already registered"));
                }
                tables.users.insert(user.id, user.clone());
            }
        }

        debug!(user_id = %user.id, role = user.role.as_str(), "User inserted");
        Ok(())
    }

    pub async fn get_user(&self, id: Uuid) -> MarketResult<Option<User>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(&format!(
                    "SELECT {} FROM market.users WHERE id = $1",
                    USER_COLUMNS
                ))
                .bind(id)
                .fetch_optional(pool)
                .await?;

                row.as_ref().map(User::from_row).transpose()
            }
            Backend::InMemory(tables) => Ok(tables.read().await.users.get(&id).cloned()),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> MarketResult<Option<User>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(&format!(
                    "SELECT {} FROM market.users WHERE email = $1",
                    USER_COLUMNS
                ))
                .bind(email)
                .fetch_optional(pool)
                .await?;

                row.as_ref().map(User::from_row).transpose()
            }
            Backend::InMemory(tables) => Ok(tables
                .read()
                .await
                .users
                .values()
                .find(|u| u.email == email)
                .cloned()),
        }
    }

    /// Atomically add `amount` to the user's credits.
    /// Returns the new balance, or None if the user does not exist.
    pub async fn increment_credits(&self, id: Uuid, amount: i64) -> MarketResult<Option<Balance>> {
        match &self.backend {
            Backend::Postgres(pool) => add_credits(pool, id, amount).await,
            Backend::InMemory(tables) => Ok(tables.write().await.add_credits(id, amount)),
        }
    }

    /// Add a manual grant to both `credits` and `manual_credits`, refusing
    /// grants that would push `manual_credits` past its ceiling.
    pub async fn grant_manual_credits(&self, id: Uuid, amount: i32) -> MarketResult<Balance> {
        let exceeded = || {
            MarketError::validation(format!(
                "Manual credits cannot exceed {}",
                MAX_MANUAL_CREDITS
            ))
        };

        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(
                    r#"
                    UPDATE market.users
                    SET credits = credits + $2,
                        manual_credits = manual_credits + $2,
                        updated_at = NOW()
                    WHERE id = $1 AND manual_credits + $2 <= $3
                    RETURNING credits, manual_credits
                    "#,
                )
                .bind(id)
                .bind(amount)
                .bind(MAX_MANUAL_CREDITS)
                .fetch_optional(pool)
                .await?;

                match row {
                    Some(row) => Ok(Balance {
                        credits: row.try_get("credits")?,
                        manual_credits: row.try_get("manual_credits")?,
                    }),
                    None => match self.get_user(id).await? {
                        Some(_) => Err(exceeded()),
                        None => Err(MarketError::not_found("User not found")),
                    },
                }
            }
            Backend::InMemory(tables) => {
                let mut tables = tables.write().await;
                let user = tables
                    .users
                    .get_mut(&id)
                    .ok_or_else(|| MarketError::not_found("User not found"))?;

                if user.manual_credits + amount > MAX_MANUAL_CREDITS {
                    return Err(exceeded());
                }

                user.credits += amount as i64;
                user.manual_credits += amount;
                user.updated_at = Utc::now();
                Ok(Balance {
                    credits: user.credits,
                    manual_credits: user.manual_credits,
                })
            }
        }
    }

    /// Set or clear the ban flag. `Some(reason)` bans, `None` unbans.
    pub async fn set_ban(&self, id: Uuid, reason: Option<&str>) -> MarketResult<Option<User>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(&format!(
                    r#"
                    UPDATE market.users
                    SET is_banned = $2, ban_reason = $3, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    USER_COLUMNS
                ))
                .bind(id)
                .bind(reason.is_some())
                .bind(reason)
                .fetch_optional(pool)
                .await?;

                row.as_ref().map(User::from_row).transpose()
            }
            Backend::InMemory(tables) => {
                let mut tables = tables.write().await;
                Ok(tables.users.get_mut(&id).map(|user| {
                    user.is_banned = reason.is_some();
                    user.ban_reason = reason.map(str::to_string);
                    user.updated_at = Utc::now();
                    user.clone()
                }))
            }
        }
    }

    pub async fn set_role(&self, id: Uuid, role: Role) -> MarketResult<Option<User>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(&format!(
                    r#"
                    UPDATE market.users
                    SET role = $2, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    USER_COLUMNS
                ))
                .bind(id)
                .bind(role.as_str())
                .fetch_optional(pool)
                .await?;

                row.as_ref().map(User::from_row).transpose()
            }
            Backend::InMemory(tables) => {
                let mut tables = tables.write().await;
                Ok(tables.users.get_mut(&id).map(|user| {
                    user.role = role;
                    user.updated_at = Utc::now();
                    user.clone()
                }))
            }
        }
    }

    pub async fn set_trust_score(&self, id: Uuid, trust_score: i32) -> MarketResult<Option<User>> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let row = sqlx::query(&format!(
                    r#"
                    UPDATE market.users
                    SET trust_score = $2, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {}
                    "#,
                    USER_COLUMNS
                ))
                .bind(id)
                .bind(trust_score)
                .fetch_optional(pool)
                .await?;

                row.as_ref().map(User::from_row).transpose()
            }
            Backend::InMemory(tables) => {
                let mut tables = tables.write().await;
                Ok(tables.users.get_mut(&id).map(|user| {
                    user.trust_score = trust_score;
                    user.updated_at = Utc::now();
                    user.clone()
                }))
            }
        }
    }
}
