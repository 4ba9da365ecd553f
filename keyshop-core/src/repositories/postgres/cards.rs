// File: keyshop-core/src/repositories/postgres/cards.rs
//
// Every mutation here is one conditional statement. The store gives us no
// multi-statement transactions, so the WHERE clauses repeat the guards the
// candidate row was selected under; an affected-row count of zero means a
// concurrent caller won the row and the caller must retry or give up.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use keyshop_common::error::Error;
use keyshop_common::models::card::{Card, ReservedCard};
use keyshop_common::traits::repository_traits::CardRepository;

pub struct PostgresCardRepository {
    pub pool: Pool<Postgres>,
}

impl PostgresCardRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_reserved(r: &sqlx::postgres::PgRow) -> Result<ReservedCard, Error> {
    Ok(ReservedCard {
        id: r.try_get("id")?,
        key: r.try_get("card_key")?,
    })
}

fn row_to_card(r: &sqlx::postgres::PgRow) -> Result<Card, Error> {
    Ok(Card {
        id: r.try_get("id")?,
        product_id: r.try_get("product_id")?,
        card_key: r.try_get("card_key")?,
        is_used: r.try_get("is_used")?,
        used_at: r.try_get("used_at")?,
        reserved_order_id: r.try_get("reserved_order_id")?,
        reserved_at: r.try_get("reserved_at")?,
        expires_at: r.try_get("expires_at")?,
        created_at: r.try_get("created_at")?,
    })
}

#[async_trait]
impl CardRepository for PostgresCardRepository {
    async fn claim_free_card(
        &self,
        product_id: &str,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error> {
        // The outer WHERE re-checks the free-card guards: if another caller
        // claimed the candidate row between subselect and update, zero rows
        // are affected and the caller retries against a fresh search.
        let row = sqlx::query(
            r#"
            UPDATE cards
            SET reserved_order_id = $1, reserved_at = $2
            WHERE id = (
                SELECT id FROM cards
                WHERE product_id = $3
                  AND is_used = FALSE
                  AND reserved_at IS NULL
                  AND (expires_at IS NULL OR expires_at > $2)
                ORDER BY id
                LIMIT 1
            )
              AND is_used = FALSE
              AND reserved_at IS NULL
            RETURNING id, card_key
            "#,
        )
        .bind(order_id)
        .bind(now)
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_reserved).transpose()
    }

    async fn find_stale_reservation(
        &self,
        product_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Option<Card>, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, product_id, card_key, is_used, used_at,
                   reserved_order_id, reserved_at, expires_at, created_at
            FROM cards
            WHERE product_id = $1
              AND is_used = FALSE
              AND reserved_at < $2
              AND (expires_at IS NULL OR expires_at > $3)
            ORDER BY reserved_at
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .bind(cutoff)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_card).transpose()
    }

    async fn steal_reservation(
        &self,
        card_id: i64,
        previous_order_id: Option<&str>,
        cutoff: DateTime<Utc>,
        new_order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error> {
        // Guarded on the row being exactly as read: still unused, still
        // stale, still held by the same order. IS NOT DISTINCT FROM makes
        // the NULL case a plain equality.
        let row = sqlx::query(
            r#"
            UPDATE cards
            SET reserved_order_id = $1, reserved_at = $2
            WHERE id = $3
              AND is_used = FALSE
              AND reserved_at < $4
              AND reserved_order_id IS NOT DISTINCT FROM $5
            RETURNING id, card_key
            "#,
        )
        .bind(new_order_id)
        .bind(now)
        .bind(card_id)
        .bind(cutoff)
        .bind(previous_order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_reserved).transpose()
    }

    async fn pick_shared_card(
        &self,
        product_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<ReservedCard>, Error> {
        let row = sqlx::query(
            r#"
            SELECT id, card_key FROM cards
            WHERE product_id = $1
              AND is_used = FALSE
              AND (expires_at IS NULL OR expires_at > $2)
            ORDER BY RANDOM()
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_reserved).transpose()
    }

    async fn consume_card(&self, card_id: i64, now: DateTime<Utc>) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET is_used = TRUE, used_at = $2,
                reserved_order_id = NULL, reserved_at = NULL
            WHERE id = $1 AND is_used = FALSE
            "#,
        )
        .bind(card_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn consume_reserved(
        &self,
        order_id: &str,
        limit: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservedCard>, Error> {
        let rows = sqlx::query(
            r#"
            UPDATE cards
            SET is_used = TRUE, used_at = $3,
                reserved_order_id = NULL, reserved_at = NULL
            WHERE id IN (
                SELECT id FROM cards
                WHERE reserved_order_id = $1 AND is_used = FALSE
                ORDER BY id
                LIMIT $2
            )
              AND is_used = FALSE
            RETURNING id, card_key
            "#,
        )
        .bind(order_id)
        .bind(limit)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_reserved).collect()
    }

    async fn consume_available(
        &self,
        product_id: &str,
        limit: i64,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservedCard>, Error> {
        let rows = sqlx::query(
            r#"
            UPDATE cards
            SET is_used = TRUE, used_at = $4,
                reserved_order_id = NULL, reserved_at = NULL
            WHERE id IN (
                SELECT id FROM cards
                WHERE product_id = $1
                  AND is_used = FALSE
                  AND (reserved_at IS NULL OR reserved_at < $2)
                  AND (expires_at IS NULL OR expires_at > $4)
                ORDER BY id
                LIMIT $3
            )
              AND is_used = FALSE
            RETURNING id, card_key
            "#,
        )
        .bind(product_id)
        .bind(cutoff)
        .bind(limit)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_reserved).collect()
    }

    async fn release_for_order(&self, order_id: &str) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET reserved_order_id = NULL, reserved_at = NULL
            WHERE reserved_order_id = $1 AND is_used = FALSE
            "#,
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn restock_by_ids(&self, card_ids: &[i64]) -> Result<u64, Error> {
        if card_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET is_used = FALSE, used_at = NULL,
                reserved_order_id = NULL, reserved_at = NULL
            WHERE id = ANY($1)
            "#,
        )
        .bind(card_ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn restock_by_keys(&self, product_id: &str, keys: &[String]) -> Result<u64, Error> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            UPDATE cards
            SET is_used = FALSE, used_at = NULL,
                reserved_order_id = NULL, reserved_at = NULL
            WHERE product_id = $1 AND card_key = ANY($2)
            "#,
        )
        .bind(product_id)
        .bind(keys)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count_free(
        &self,
        product_id: &str,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS free FROM cards
            WHERE product_id = $1
              AND is_used = FALSE
              AND (reserved_at IS NULL OR reserved_at < $2)
              AND (expires_at IS NULL OR expires_at > $3)
            "#,
        )
        .bind(product_id)
        .bind(cutoff)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("free")?)
    }

    async fn count_unused(&self, product_id: &str) -> Result<i64, Error> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS unused FROM cards WHERE product_id = $1 AND is_used = FALSE"#,
        )
        .bind(product_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("unused")?)
    }

    async fn purge_expired(
        &self,
        product_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM cards
            WHERE is_used = FALSE
              AND expires_at IS NOT NULL
              AND expires_at <= $1
              AND ($2::text IS NULL OR product_id = $2)
            "#,
        )
        .bind(now)
        .bind(product_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn add_cards(
        &self,
        product_id: &str,
        keys: &[String],
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<u64, Error> {
        if keys.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            r#"
            INSERT INTO cards (product_id, card_key, expires_at)
            SELECT $1, unnest($2::text[]), $3
            "#,
        )
        .bind(product_id)
        .bind(keys)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
