// File: keyshop-core/src/repositories/postgres/orders.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};

use keyshop_common::error::Error;
use keyshop_common::models::order::{Order, OrderStatus};
use keyshop_common::traits::repository_traits::OrderRepository;

pub struct PostgresOrderRepository {
    pub pool: Pool<Postgres>,
}

impl PostgresOrderRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const ORDER_COLUMNS: &str = r#"
    order_id, product_id, product_name, status, amount, quantity,
    points_used, current_payment_id, card_key, card_ids, trade_no,
    email, user_id, username, payee, created_at, paid_at, delivered_at
"#;

fn row_to_order(r: &sqlx::postgres::PgRow) -> Result<Order, Error> {
    let status: String = r.try_get("status")?;
    Ok(Order {
        order_id: r.try_get("order_id")?,
        product_id: r.try_get("product_id")?,
        product_name: r.try_get("product_name")?,
        status: OrderStatus::from_str(&status)?,
        amount: r.try_get("amount")?,
        quantity: r.try_get("quantity")?,
        points_used: r.try_get("points_used")?,
        current_payment_id: r.try_get("current_payment_id")?,
        card_key: r.try_get("card_key")?,
        card_ids: r.try_get("card_ids")?,
        trade_no: r.try_get("trade_no")?,
        email: r.try_get("email")?,
        user_id: r.try_get("user_id")?,
        username: r.try_get("username")?,
        payee: r.try_get("payee")?,
        created_at: r.try_get("created_at")?,
        paid_at: r.try_get("paid_at")?,
        delivered_at: r.try_get("delivered_at")?,
    })
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                order_id, product_id, product_name, status, amount, quantity,
                points_used, current_payment_id, card_key, card_ids, trade_no,
                email, user_id, username, payee, created_at, paid_at, delivered_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18)
            "#,
        )
        .bind(&order.order_id)
        .bind(&order.product_id)
        .bind(&order.product_name)
        .bind(order.status.as_str())
        .bind(order.amount)
        .bind(order.quantity)
        .bind(order.points_used)
        .bind(&order.current_payment_id)
        .bind(&order.card_key)
        .bind(&order.card_ids)
        .bind(&order.trade_no)
        .bind(&order.email)
        .bind(&order.user_id)
        .bind(&order.username)
        .bind(&order.payee)
        .bind(order.created_at)
        .bind(order.paid_at)
        .bind(order.delivered_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, order_id: &str) -> Result<Option<Order>, Error> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn mark_paid(
        &self,
        order_id: &str,
        trade_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid', paid_at = $2,
                trade_no = COALESCE($3, trade_no)
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(now)
        .bind(trade_no)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn promote_pending_to_paid(
        &self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = 'paid', paid_at = $2
            WHERE order_id = $1 AND status = 'pending'
            "#,
        )
        .bind(order_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivered(
        &self,
        order_id: &str,
        card_key: &str,
        card_ids: Option<&str>,
        trade_no: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE orders
            SET status = 'delivered',
                paid_at = COALESCE(paid_at, $2),
                delivered_at = $2,
                card_key = $3,
                card_ids = $4,
                trade_no = COALESCE($5, trade_no),
                current_payment_id = NULL
            WHERE order_id = $1
            "#,
        )
        .bind(order_id)
        .bind(now)
        .bind(card_key)
        .bind(card_ids)
        .bind(trade_no)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_cards(
        &self,
        order_id: &str,
        card_key: &str,
        card_ids: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"UPDATE orders SET card_key = $2, card_ids = $3 WHERE order_id = $1"#,
        )
        .bind(order_id)
        .bind(card_key)
        .bind(card_ids)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cancel_if_pending(&self, order_id: &str) -> Result<bool, Error> {
        let result = sqlx::query(
            r#"UPDATE orders SET status = 'cancelled' WHERE order_id = $1 AND status = 'pending'"#,
        )
        .bind(order_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status_if_not(&self, order_id: &str, status: OrderStatus) -> Result<bool, Error> {
        let result =
            sqlx::query(r#"UPDATE orders SET status = $2 WHERE order_id = $1 AND status <> $2"#)
                .bind(order_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_current_payment_id(
        &self,
        order_id: &str,
        payment_id: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query(r#"UPDATE orders SET current_payment_id = $2 WHERE order_id = $1"#)
            .bind(order_id)
            .bind(payment_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn delete(&self, order_id: &str) -> Result<(), Error> {
        sqlx::query(r#"DELETE FROM orders WHERE order_id = $1"#)
            .bind(order_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn purchased_quantity(
        &self,
        product_id: &str,
        user_id: Option<&str>,
        email: Option<&str>,
    ) -> Result<i64, Error> {
        if user_id.is_none() && email.is_none() {
            return Ok(0);
        }
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(quantity), 0)::bigint AS total
            FROM orders
            WHERE product_id = $1
              AND status IN ('paid', 'delivered')
              AND (($2::text IS NOT NULL AND user_id = $2)
                OR ($3::text IS NOT NULL AND email = $3))
            "#,
        )
        .bind(product_id)
        .bind(user_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("total")?)
    }

    async fn find_stale_pending(
        &self,
        cutoff: DateTime<Utc>,
        product_id: Option<&str>,
    ) -> Result<Vec<Order>, Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {ORDER_COLUMNS} FROM orders
            WHERE status = 'pending'
              AND created_at < $1
              AND ($2::text IS NULL OR product_id = $2)
            ORDER BY created_at
            "#
        ))
        .bind(cutoff)
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        let mut list = Vec::new();
        for r in rows {
            list.push(row_to_order(&r)?);
        }
        Ok(list)
    }
}
