// tests/points_tests.rs

mod common;

use chrono::{Duration, Utc};

use common::TestShop;
use keyshop_common::error::Error;
use keyshop_common::traits::repository_traits::UserRepository;
use keyshop_core::services::PointsService;
use keyshop_core::test_utils::test_config;

#[tokio::test]
async fn check_in_awards_points_once_per_day() {
    let shop = TestShop::new();
    shop.users.add_user("alice", 0);

    let service = PointsService::new(shop.users.clone(), shop.config.clone());

    let result = service.check_in("alice").await.unwrap();
    assert_eq!(result.reward, 10);
    assert_eq!(result.consecutive_days, 1);
    assert_eq!(shop.users.points("alice").await.unwrap(), 10);

    // Same day again: the atomic guard refuses.
    let again = service.check_in("alice").await;
    assert!(matches!(again, Err(Error::InvalidState(_))));
    assert_eq!(shop.users.points("alice").await.unwrap(), 10);
}

#[tokio::test]
async fn check_in_respects_the_config_switch() {
    let mut config = test_config();
    config.checkin_enabled = false;
    let shop = TestShop::with_config(config);
    shop.users.add_user("alice", 0);

    let service = PointsService::new(shop.users.clone(), shop.config.clone());
    let result = service.check_in("alice").await;
    assert!(matches!(result, Err(Error::InvalidState(_))));
}

#[tokio::test]
async fn consecutive_days_track_the_streak() {
    let shop = TestShop::new();
    shop.users.add_user("alice", 0);

    let today = Utc::now();
    let yesterday = today - Duration::days(1);
    let two_days_ago = today - Duration::days(2);

    // Repo-level calls with explicit clocks to walk across days.
    assert_eq!(
        shop.users.check_in("alice", 10, two_days_ago).await.unwrap(),
        Some(1)
    );
    assert_eq!(
        shop.users.check_in("alice", 10, yesterday).await.unwrap(),
        Some(2)
    );
    assert_eq!(shop.users.check_in("alice", 10, today).await.unwrap(), Some(3));

    // A second call on the same day is refused.
    assert_eq!(shop.users.check_in("alice", 10, today).await.unwrap(), None);
    assert_eq!(shop.users.points("alice").await.unwrap(), 30);
}
