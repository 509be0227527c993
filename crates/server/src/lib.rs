//! Compute API server: HTTP gateway, bearer-token auth, configuration

pub mod api;
pub mod auth;
pub mod config;
