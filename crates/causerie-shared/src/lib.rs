//! # causerie-shared
//!
//! Types shared by every Causerie crate: identifiers, domain records, the
//! permission model, engine events and the error taxonomy.

pub mod constants;
pub mod error;
pub mod models;
pub mod permissions;
pub mod protocol;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use models::*;
pub use types::*;
