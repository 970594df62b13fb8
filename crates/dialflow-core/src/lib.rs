pub mod callsheet;
pub mod collab;
pub mod config;
pub mod error;
pub mod io;
pub mod paths;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod session;
pub mod signals;
pub mod store;
pub mod types;

pub use error::{EngineError, Result};
