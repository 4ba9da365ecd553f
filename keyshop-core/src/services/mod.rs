// File: src/services/mod.rs

pub mod admin_service;
pub mod checkout_service;
pub mod compensation;
pub mod fulfillment_service;
pub mod order_service;
pub mod points_service;
pub mod reservation;

pub use admin_service::AdminOrderService;
pub use checkout_service::{CheckoutOutcome, CheckoutRequest, CheckoutService};
pub use fulfillment_service::{FulfillmentOutcome, FulfillmentService};
pub use order_service::{OrderAccess, OrderService};
pub use points_service::PointsService;
pub use reservation::ReservationManager;
