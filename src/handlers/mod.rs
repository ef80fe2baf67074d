pub mod config;
pub mod diagnostics;
pub mod models;

pub use config::*;
pub use diagnostics::*;
pub use models::*;
