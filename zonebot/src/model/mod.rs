//! The zonebot data model.
//!
//! - [`Zone`]: a category, its channels and two roles, admitting members
//!   according to a [`Policy`]
//! - [`Request`]: a zone, announcement, event or join request moving
//!   through the approval workflow described in [`request`]
//! - [`TempGroup`]: a channel with a time to live
//!
//! Free text coming from users is bounded by the types in [`stringmax`].

mod policy;
pub mod request;
pub mod stringmax;
mod temp_group;
mod zone;

pub use policy::*;
pub use request::*;
pub use stringmax::*;
pub use temp_group::*;
pub use zone::*;
