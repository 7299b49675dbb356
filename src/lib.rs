pub mod assistant;
pub mod config;
pub mod confirm;
pub mod context;
pub mod history;
pub mod logging;
pub mod message;
pub mod provider;
pub mod tool_registry;
pub mod tools;

pub use assistant::Assistant;
pub use config::Config;
pub use tool_registry::ToolRegistry;
