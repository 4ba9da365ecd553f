use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct ShopUser {
    pub user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    /// Point balance. Never negative: debits are conditional decrements
    /// guarded by `points >= amount`.
    pub points: i64,
    pub is_blocked: bool,
    pub last_checkin_at: Option<DateTime<Utc>>,
    pub consecutive_days: i32,
    pub created_at: DateTime<Utc>,
}
