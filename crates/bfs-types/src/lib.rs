//! Core value types shared by every bfs crate: strongly-typed identifiers,
//! the status-code taxonomy, and the `Status`/`Result` error pair.

#[allow(non_snake_case)]
pub mod status_code;

pub mod status;
pub mod result;

#[macro_use]
pub mod strong_type;

pub mod ids;
pub mod time;

pub use ids::*;
pub use result::{make_error, make_error_msg, Result, Void};
pub use status::Status;
pub use status_code::*;
pub use time::UtcTime;
