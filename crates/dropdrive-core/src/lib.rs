//! Core dropdrive library (settings, secret store, OAuth flow, loopback authorizer).

pub mod auth;
pub mod config;
pub mod oauth;
pub mod secrets;
