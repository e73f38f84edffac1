pub mod config;
pub mod error;
pub mod text;
pub mod types;

pub use config::Config;
pub use error::TargetWatchError;
pub use text::*;
pub use types::*;
