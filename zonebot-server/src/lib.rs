pub mod config;
pub mod db;
pub mod discord;
pub mod errors;
pub mod handlers;
pub mod services;
pub mod sweep;
