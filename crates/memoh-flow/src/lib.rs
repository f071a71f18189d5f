//! Flow side of the Bot Execution Runtime: inbound processing, the step
//! loop that resolves one turn, loop guards, and the memory bridge.
//!
//! This crate contains:
//! - **inbound**: Inbound Processor — binding lookup, access policy, dedup, handoff
//! - **resolver**: Flow Resolver — the per-turn step loop
//! - **stream**: outbound stream event schema and per-session publisher
//! - **guards**: n-gram and tool-fingerprint loop guards
//! - **memory**: three-scope memory bridge consulted before each step
//! - **context**: system prompt and message list construction
//! - **skills**: workspace/builtin skill loading

pub mod context;
pub mod guards;
pub mod inbound;
pub mod memory;
pub mod resolver;
pub mod skills;
pub mod stream;

pub use context::ContextBuilder;
pub use guards::LoopGuards;
pub use inbound::{DropReason, FlowResolver, InboundOutcome, InboundProcessor};
pub use memory::{InMemoryMemoryBridge, MemoryBridge};
pub use resolver::StepLoopResolver;
pub use skills::SkillsLoader;
pub use stream::{StreamEvent, StreamPublisher};
