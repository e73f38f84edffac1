pub use ai_client::retry;
pub mod util;
