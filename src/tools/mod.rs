pub mod catalog;
pub mod dispatch;

pub use catalog::{ToolDefinition, ToolFunction};
pub use dispatch::{HttpToolHandler, ToolHandler, UnconfiguredToolHandler};
