//! Inline loop guards the resolver consults between steps. Both watch for a
//! model stuck making no real progress; neither interrupts a tool call
//! already in flight.

pub mod fingerprint;
pub mod ngram;

pub use fingerprint::{FingerprintGuard, FingerprintVerdict};
pub use ngram::NgramGuard;

/// Bundles both guards so the resolver's step loop only has to own one
/// value. Distinct thresholds and counters per guard, but one abort signal.
#[derive(Default)]
pub struct LoopGuards {
    pub ngram: NgramGuard,
    pub fingerprint: FingerprintGuard,
}

impl LoopGuards {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text delta through the n-gram guard.
    pub fn observe_text(&mut self, chunk: &str) -> bool {
        self.ngram.feed(chunk)
    }

    /// Feed a tool call through the fingerprint guard.
    pub fn observe_tool_call(&mut self, tool_name: &str, arguments: &serde_json::Value) -> FingerprintVerdict {
        self.fingerprint.observe(tool_name, arguments)
    }
}
