pub mod relevance;
pub mod summary;

pub use relevance::{filter_relevant, ClaudeClassifier, RelevanceClassifier};
pub use summary::{enrich_summaries, ClaudeSummarizer, Summarizer};
