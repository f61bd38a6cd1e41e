pub mod registry;
pub mod runner;
pub mod synthesizer;
pub mod orchestrator;
pub mod session;

pub use registry::{AgentRegistry, CleanupSummary};
pub use runner::{AnalysisRunner, RetryPolicy};
pub use synthesizer::ReportSynthesizer;
pub use orchestrator::{run_until_shutdown, AprOrchestrator, RunEnd};
pub use session::{classify_input, AnalysisTrigger, ChatSession, InputIntent, ReviewService};
