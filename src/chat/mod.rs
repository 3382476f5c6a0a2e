pub mod assembler;
pub mod db;
pub mod models;
pub mod session;
pub mod tokens;
pub mod transcript;

pub use assembler::*;
pub use models::*;
pub use session::*;
pub use transcript::*;
