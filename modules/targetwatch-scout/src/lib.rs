pub mod digest;
pub mod enrichment;
pub mod infra;
pub mod pipeline;
pub mod scheduling;
pub mod sources;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;

pub use digest::{DigestOutcome, DigestSynthesizer};
pub use pipeline::orchestrator::{ScanDeps, ScanOrchestrator, ScanOutcome, ScanRequest};
pub use scheduling::scheduler::{ScanTrigger, ScheduleChecker, TickReport};
pub use sources::{CandidateItem, SourceAdapter, SourceContext, SourceOutput, SourceRegistry};
pub use traits::ScanStore;
