// File: keyshop-core/src/services/points_service.rs

use std::sync::Arc;

use chrono::Utc;

use keyshop_common::error::Error;
use keyshop_common::traits::repository_traits::UserRepository;
use keyshop_common::ShopConfig;

#[derive(Debug, Clone, Copy)]
pub struct CheckInResult {
    pub reward: i64,
    pub consecutive_days: i32,
}

pub struct PointsService {
    users: Arc<dyn UserRepository>,
    config: ShopConfig,
}

impl PointsService {
    pub fn new(users: Arc<dyn UserRepository>, config: ShopConfig) -> Self {
        Self { users, config }
    }

    /// Daily check-in. The once-per-day guard is atomic in the store, so
    /// concurrent calls award the reward exactly once.
    pub async fn check_in(&self, user_id: &str) -> Result<CheckInResult, Error> {
        if !self.config.checkin_enabled {
            return Err(Error::InvalidState("check-in is currently disabled".into()));
        }

        match self
            .users
            .check_in(user_id, self.config.checkin_reward, Utc::now())
            .await?
        {
            Some(consecutive_days) => Ok(CheckInResult {
                reward: self.config.checkin_reward,
                consecutive_days,
            }),
            None => Err(Error::InvalidState("already checked in today".into())),
        }
    }

    pub async fn balance(&self, user_id: &str) -> Result<i64, Error> {
        self.users.points(user_id).await
    }
}
