//! keyshop-server/src/context.rs
//!
//! Builds the global server context: database, repositories, gateway
//! client, services, background tasks and the notify HTTP endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::info;

use keyshop_common::traits::gateway_traits::PaymentGateway;
use keyshop_common::traits::repository_traits::{
    CardRepository, OrderRepository, ProductRepository, UserRepository,
};
use keyshop_common::ShopConfig;

use keyshop_core::db::Database;
use keyshop_core::eventbus::EventBus;
use keyshop_core::gateway::EpayClient;
use keyshop_core::http::notify::{notify_router, start_http_server, NotifyState};
use keyshop_core::http::status::{status_router, StatusState};
use keyshop_core::repositories::postgres::{
    PostgresCardRepository, PostgresOrderRepository, PostgresProductRepository,
    PostgresUserRepository,
};
use keyshop_core::services::{
    AdminOrderService, CheckoutService, FulfillmentService, OrderService, PointsService,
    ReservationManager,
};
use keyshop_core::tasks::expiry_sweep::spawn_expiry_sweep_task;
use keyshop_core::Error;

use crate::Args;

pub struct ServerContext {
    pub db: Database,
    pub config: ShopConfig,
    pub event_bus: EventBus,

    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub fulfillment: Arc<FulfillmentService>,
    pub admin: Arc<AdminOrderService>,
    pub points: Arc<PointsService>,

    sweep_handle: JoinHandle<()>,
    notify_shutdown: oneshot::Sender<()>,
}

impl ServerContext {
    pub async fn new(args: &Args) -> Result<Self, Error> {
        let config = ShopConfig::from_env()?;

        info!("Connecting to Postgres at {}", args.db_url);
        let db = Database::new(&args.db_url).await?;
        db.migrate().await?;

        let products: Arc<dyn ProductRepository> =
            Arc::new(PostgresProductRepository::new(db.pool().clone()));
        let cards: Arc<dyn CardRepository> =
            Arc::new(PostgresCardRepository::new(db.pool().clone()));
        let orders_repo: Arc<dyn OrderRepository> =
            Arc::new(PostgresOrderRepository::new(db.pool().clone()));
        let users: Arc<dyn UserRepository> =
            Arc::new(PostgresUserRepository::new(db.pool().clone()));
        let gateway: Arc<dyn PaymentGateway> = Arc::new(EpayClient::new(&config));

        let event_bus = EventBus::new();

        let reservations = ReservationManager::new(
            cards.clone(),
            orders_repo.clone(),
            gateway.clone(),
            config.reservation_ttl,
        );

        let fulfillment = Arc::new(FulfillmentService::new(
            products.clone(),
            cards.clone(),
            orders_repo.clone(),
            event_bus.clone(),
            config.reservation_ttl,
        ));

        let checkout = Arc::new(CheckoutService::new(
            products.clone(),
            cards.clone(),
            orders_repo.clone(),
            users.clone(),
            reservations,
            event_bus.clone(),
            config.clone(),
        ));

        let orders = Arc::new(OrderService::new(
            orders_repo.clone(),
            cards.clone(),
            users.clone(),
            gateway.clone(),
            fulfillment.clone(),
        ));

        let admin = Arc::new(AdminOrderService::new(
            products.clone(),
            cards.clone(),
            orders_repo.clone(),
            users.clone(),
            gateway.clone(),
            config.clone(),
        ));

        let points = Arc::new(PointsService::new(users.clone(), config.clone()));

        let sweep_handle = spawn_expiry_sweep_task(
            cards.clone(),
            orders_repo.clone(),
            users.clone(),
            config.reservation_ttl,
            Duration::from_secs(args.sweep_interval_secs),
        );

        let notify_state = Arc::new(NotifyState {
            merchant_key: config.merchant_key.clone(),
            fulfillment: fulfillment.clone(),
        });
        let status_state = Arc::new(StatusState {
            orders: orders.clone(),
        });
        let app = notify_router(notify_state).merge(status_router(status_state));
        let notify_shutdown = start_http_server(args.notify_port, app).await?;

        Ok(Self {
            db,
            config,
            event_bus,
            checkout,
            orders,
            fulfillment,
            admin,
            points,
            sweep_handle,
            notify_shutdown,
        })
    }

    pub async fn shutdown(self) {
        let _ = self.notify_shutdown.send(());
        self.sweep_handle.abort();
        info!("Server context shut down.");
    }
}
