//! Model, payloads and platform seam shared by the zonebot server and its
//! command line tools.

pub mod commands;
pub mod interaction;
pub mod message;
pub mod model;
pub mod platform;
pub mod pseudonym;
pub mod signature;
pub mod snowflake;

pub use snowflake::Snowflake;
