pub mod core;
pub mod public;

pub use core::*;
pub use public::*;
