//! The platform's HTTP API and gateway.

pub mod gateway;
pub mod rest;

pub use rest::RestClient;
