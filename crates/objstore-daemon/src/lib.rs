//! HTTP front end for the objstore database: axum routes, request/response
//! DTOs, environment configuration and telemetry bootstrap.

pub mod config;
pub mod models;
pub mod server;
pub mod telemetry;
