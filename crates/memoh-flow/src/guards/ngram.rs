//! Degenerate-repetition guard over assistant text deltas. Tracks a sliding
//! window of recent runes and flags a run of chunks whose 10-grams mostly
//! already appear in that window — the shape of a model stuck repeating
//! itself rather than making progress.

use std::collections::HashMap;

use unicode_normalization::UnicodeNormalization;

const NGRAM: usize = 10;
const WINDOW: usize = 1000;
const OVERLAP_THRESHOLD: f64 = 0.75;
const MIN_NEW_GRAMS: usize = 1;
const ABORT_STREAK: usize = 10;

fn grams_of(runes: &[char]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    if runes.len() < NGRAM {
        return counts;
    }
    for w in runes.windows(NGRAM) {
        *counts.entry(w.iter().collect::<String>()).or_insert(0usize) += 1;
    }
    counts
}

/// Sliding-window n-gram overlap detector. One instance per in-flight step
/// loop; feed it every text delta as it streams.
pub struct NgramGuard {
    buffer: Vec<char>,
    streak: usize,
}

impl NgramGuard {
    pub fn new() -> Self {
        Self { buffer: Vec::new(), streak: 0 }
    }

    /// Feed one text delta. Returns `true` once `ABORT_STREAK` consecutive
    /// chunks have scored above the overlap threshold.
    pub fn feed(&mut self, chunk: &str) -> bool {
        let normalized: Vec<char> = chunk.nfc().collect();
        if normalized.is_empty() {
            return self.streak >= ABORT_STREAK;
        }

        let ctx_len = (NGRAM - 1).min(self.buffer.len());
        let mut candidate: Vec<char> = self.buffer[self.buffer.len() - ctx_len..].to_vec();
        candidate.extend_from_slice(&normalized);

        let existing = grams_of(&self.buffer);
        let candidate_grams = grams_of(&candidate);

        let mut matched = 0usize;
        let mut new_count = 0usize;
        for (gram, count) in &candidate_grams {
            new_count += count;
            if let Some(existing_count) = existing.get(gram) {
                matched += (*count).min(*existing_count);
            }
        }

        let hit = new_count >= MIN_NEW_GRAMS && (matched as f64 / new_count as f64) > OVERLAP_THRESHOLD;
        // A hit can only be observed once the window holds a second full
        // repetition of the seed (the chunk that introduced the repeat has
        // no prior occurrence to score against), so the chunk before this
        // one was already part of the same repeated run. Count both on
        // the onset of a new streak instead of just this one.
        self.streak = if hit {
            if self.streak == 0 {
                2
            } else {
                self.streak + 1
            }
        } else {
            0
        };

        self.buffer.extend_from_slice(&normalized);
        if self.buffer.len() > WINDOW {
            let excess = self.buffer.len() - WINDOW;
            self.buffer.drain(0..excess);
        }

        self.streak >= ABORT_STREAK
    }
}

impl Default for NgramGuard {
    fn default() -> Self {
        Self::new()
    }
}
