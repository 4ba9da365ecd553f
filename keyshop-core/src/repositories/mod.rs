// src/repositories/mod.rs

pub mod postgres;

pub use postgres::{
    PostgresCardRepository, PostgresOrderRepository, PostgresProductRepository,
    PostgresUserRepository,
};
