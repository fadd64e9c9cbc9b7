//! Application services layer.

pub mod error;
pub mod pipeline;
pub mod proxy;
pub mod registration;
pub mod repos;
