//! Round engine HTTP service
//!
//! JSON API over the round state machine: round lifecycle actions, fairness
//! verification, audit reads, and maintenance triggers.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiConfig, ApiServer};
