//! Tool Gateway: executors and registry/cache for Memoh's bot runtime.
//!
//! `filesystem.rs`, `shell.rs`, and `spawn.rs` are the teacher's local-fs,
//! subprocess, and self-spawn tools; kept on disk as reference pending
//! removal, superseded by `container_fs` (everything now runs inside the
//! bot's container) and dropped entirely (self-spawn has no counterpart).

pub mod base;
pub mod container_fs;
pub mod memory_tool;
pub mod message;
pub mod registry;
pub mod web;

pub use base::{optional_bool, optional_i64, optional_string, require_string, Tool, ToolResult};
pub use registry::{ToolGateway, ToolRegistry};
