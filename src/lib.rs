#![allow(clippy::multiple_crate_versions)]

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod runtime;
pub mod session;

pub use error::{EdgeError, Result};
pub use runtime::{RuntimeFetcher, RuntimeStatus};
pub use session::{InferenceSession, SessionState, TokenStream};
