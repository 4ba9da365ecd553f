// File: keyshop-core/src/repositories/postgres/products.rs

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use keyshop_common::error::Error;
use keyshop_common::models::product::Product;
use keyshop_common::traits::repository_traits::ProductRepository;

pub struct PostgresProductRepository {
    pub pool: Pool<Postgres>,
}

impl PostgresProductRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PostgresProductRepository {
    async fn get(&self, product_id: &str) -> Result<Option<Product>, Error> {
        let row = sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, price, purchase_limit, is_shared,
                   sold_count, stock_cached, created_at
            FROM products
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn refresh_aggregates(&self, product_id: &str) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE products
            SET sold_count = (
                    SELECT COALESCE(SUM(o.quantity), 0)
                    FROM orders o
                    WHERE o.product_id = products.id
                      AND o.status IN ('paid', 'delivered')
                ),
                stock_cached = (
                    SELECT COUNT(*)
                    FROM cards c
                    WHERE c.product_id = products.id AND c.is_used = FALSE
                )
            WHERE id = $1
            "#,
        )
        .bind(product_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
