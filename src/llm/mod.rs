pub mod providers;
pub mod prompts;
pub mod interfaces;

pub use providers::AzureAgentsClient;
pub use prompts::{PromptTemplate, AgentPrompts};
pub use interfaces::{AgentsBackend, BackendError};
