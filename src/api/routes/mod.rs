//! API route handlers

pub mod events;
pub mod health;
pub mod integration;
pub mod metrics;
