pub mod ingest;
pub mod mission;
pub mod orchestrator;
