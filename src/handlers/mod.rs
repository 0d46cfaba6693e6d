pub mod config;
pub mod sessions;
pub mod tools;

pub use self::config::*;
pub use self::tools::*;
