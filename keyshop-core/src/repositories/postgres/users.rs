// File: keyshop-core/src/repositories/postgres/users.rs
//
// The points ledger. Debit is the canonical conditional decrement: the
// balance guard lives in the WHERE clause, so the balance can never go
// negative no matter how many debits race.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Postgres, Row};

use keyshop_common::error::Error;
use keyshop_common::models::user::ShopUser;
use keyshop_common::traits::repository_traits::UserRepository;

pub struct PostgresUserRepository {
    pub pool: Pool<Postgres>,
}

impl PostgresUserRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn get(&self, user_id: &str) -> Result<Option<ShopUser>, Error> {
        let row = sqlx::query_as::<_, ShopUser>(
            r#"
            SELECT user_id, username, email, points, is_blocked,
                   last_checkin_at, consecutive_days, created_at
            FROM shop_users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn points(&self, user_id: &str) -> Result<i64, Error> {
        let row = sqlx::query(r#"SELECT points FROM shop_users WHERE user_id = $1"#)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(r.try_get("points")?),
            None => Ok(0),
        }
    }

    async fn debit_points(&self, user_id: &str, amount: i64) -> Result<Option<i64>, Error> {
        let row = sqlx::query(
            r#"
            UPDATE shop_users
            SET points = points - $2
            WHERE user_id = $1 AND points >= $2
            RETURNING points
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_get("points")?)),
            None => Ok(None),
        }
    }

    async fn credit_points(&self, user_id: &str, amount: i64) -> Result<(), Error> {
        sqlx::query(r#"UPDATE shop_users SET points = points + $2 WHERE user_id = $1"#)
            .bind(user_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn check_in(
        &self,
        user_id: &str,
        reward: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<i32>, Error> {
        let today_start = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        let yesterday_start = today_start - Duration::days(1);

        // "Not yet checked in today" is enforced by the WHERE clause, so
        // two concurrent check-ins award the reward exactly once.
        let row = sqlx::query(
            r#"
            UPDATE shop_users
            SET points = points + $2,
                last_checkin_at = $3,
                consecutive_days = CASE
                    WHEN last_checkin_at IS NOT NULL
                         AND last_checkin_at >= $4
                         AND last_checkin_at < $5
                    THEN consecutive_days + 1
                    ELSE 1
                END
            WHERE user_id = $1
              AND (last_checkin_at IS NULL OR last_checkin_at < $5)
            RETURNING consecutive_days
            "#,
        )
        .bind(user_id)
        .bind(reward)
        .bind(now)
        .bind(yesterday_start)
        .bind(today_start)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(r.try_get("consecutive_days")?)),
            None => Ok(None),
        }
    }
}
