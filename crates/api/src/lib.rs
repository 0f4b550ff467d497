//! HTTP API: routing, the access gate layer and report export endpoints.

pub mod app;
pub mod config;
pub mod context;
pub mod middleware;
