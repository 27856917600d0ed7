//! HTTP middleware stack: CORS, per-request trace ids and bearer auth.

pub mod auth;
pub mod cors;
pub mod trace;
