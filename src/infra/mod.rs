//! Infrastructure adapters and runtime bootstrap.

pub mod db;
pub mod error;
pub mod http;
pub mod origin_client;
pub mod origins;
pub mod redis;
pub mod telemetry;
