pub mod agents;
pub mod config;
pub mod llm;
pub mod reports;
pub mod tools;
pub mod types;
