use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::user::{NewUser, User, UserActivity};
use crate::utils::validation::normalize_email;

/// Read-only lookup the onboarding check runs against.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_activity(&self, email: &str) -> Result<Option<UserActivity>>;
}

#[derive(Clone)]
pub struct UserService {
    pool: PgPool,
}

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, full_name, email, password, university_id, university_card,
                   last_activity_date, created_at
            FROM users
            WHERE email = $1
            LIMIT 1
            "#,
        )
        .bind(normalize_email(email))
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    pub async fn exists(&self, email: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(normalize_email(email))
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    pub async fn create(&self, new_user: NewUser) -> Result<User> {
        let result = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (full_name, email, password, university_id, university_card, last_activity_date)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id, full_name, email, password, university_id, university_card,
                      last_activity_date, created_at
            "#,
        )
        .bind(&new_user.full_name)
        .bind(normalize_email(&new_user.email))
        .bind(&new_user.password_hash)
        .bind(new_user.university_id)
        .bind(&new_user.university_card)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(Error::Conflict("User already exists".to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn touch_activity(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE users SET last_activity_date = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl UserDirectory for UserService {
    async fn find_activity(&self, email: &str) -> Result<Option<UserActivity>> {
        let activity = sqlx::query_as::<_, UserActivity>(
            "SELECT last_activity_date FROM users WHERE lower(email) = lower($1) LIMIT 1",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await?;
        Ok(activity)
    }
}
