pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use directory::AgentCatalog;
pub use error::{Result, WeftError};
pub use event::EventBus;
pub use types::*;
