//! trialscope-common — Shared error type, sandboxed HTTP client and the
//! text and field-lookup helpers used by every TrialScope crate.

pub mod error;
pub mod lookup;
pub mod sandbox;
pub mod text;

pub use error::TrialScopeError;
pub use lookup::{FieldLookup, NOT_AVAILABLE};
