//! Configuration system — schema, loading, and env var overrides.
//!
//! # Usage
//! ```no_run
//! use memoh_core::config;
//!
//! let cfg = config::load_config();
//! println!("Model: {}", cfg.runtime.default_chat_model);
//! ```

pub mod loader;
pub mod schema;

// Re-export key types
pub use loader::{get_config_path, load_config, save_config};
pub use schema::Config;
