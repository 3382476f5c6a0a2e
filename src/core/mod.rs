pub mod config;
pub mod context;
pub mod db;
pub mod error;

pub use config::*;
pub use context::*;
pub use error::*;
