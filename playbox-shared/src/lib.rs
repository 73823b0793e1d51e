//! Types shared between the playbox library and its frontends.

pub mod errors;

pub use errors::{PlayboxError, PlayboxResult};
