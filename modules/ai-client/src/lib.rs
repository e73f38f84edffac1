pub mod claude;
pub mod error;
pub mod retry;
pub mod schema;
pub mod tool;
pub mod util;

pub use claude::{AgentTranscript, Claude};
pub use error::AiError;
pub use retry::RetryPolicy;
pub use schema::StructuredOutput;
pub use tool::{DynTool, Tool, ToolDefinition, ToolWrapper};
pub use util::truncate_to_char_boundary;
