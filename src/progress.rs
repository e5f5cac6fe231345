//! Progress callbacks for generation runs.
//!
//! The library never prints. Callers that want a progress bar, a log line or
//! a web-socket event implement [`GenerationProgressCallback`] and attach it
//! to [`crate::config::GenerationConfig`].
//!
//! # Example
//!
//! ```rust
//! use flashdeck::{GenerationConfig, GenerationProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CardCounter {
//!     cards: Arc<AtomicUsize>,
//! }
//!
//! impl GenerationProgressCallback for CardCounter {
//!     fn on_unit_complete(&self, _unit: &str, card_count: usize, _partial: bool) {
//!         self.cards.fetch_add(card_count, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Arc::new(CardCounter { cards: Arc::new(AtomicUsize::new(0)) });
//! let config = GenerationConfig::builder()
//!     .progress_callback(counter as Arc<dyn GenerationProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the generation pipeline as units move through it.
///
/// With `concurrency > 1` the per-unit methods may be called concurrently;
/// guard shared state accordingly. All methods default to no-ops.
pub trait GenerationProgressCallback: Send + Sync {
    /// Called once before a batch starts.
    fn on_batch_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called just before the provider request for a unit.
    ///
    /// `prompt_tokens` is the estimated size of the compiled prompt.
    fn on_unit_start(&self, unit: &str, target_cards: usize, prompt_tokens: usize) {
        let _ = (unit, target_cards, prompt_tokens);
    }

    /// Called for every streamed chunk.
    ///
    /// `card_lines` is the running count of completed card rows.
    fn on_chunk(&self, unit: &str, chunk: &str, card_lines: usize) {
        let _ = (unit, chunk, card_lines);
    }

    /// Called when a unit's deck has been written.
    ///
    /// `partial` is true when the generation was interrupted.
    fn on_unit_complete(&self, unit: &str, card_count: usize, partial: bool) {
        let _ = (unit, card_count, partial);
    }

    /// Called when a unit fails.
    fn on_unit_error(&self, unit: &str, error: &str) {
        let _ = (unit, error);
    }

    /// Called once after every unit was attempted.
    fn on_batch_complete(&self, total_units: usize, success_count: usize) {
        let _ = (total_units, success_count);
    }
}

/// A no-op implementation, used when no callback is configured.
pub struct NoopProgressCallback;

impl GenerationProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::GenerationConfig`].
pub type ProgressCallback = Arc<dyn GenerationProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Tracker {
        chunks: AtomicUsize,
        completes: AtomicUsize,
        errors: AtomicUsize,
        last_card_lines: AtomicUsize,
    }

    impl GenerationProgressCallback for Tracker {
        fn on_chunk(&self, _unit: &str, _chunk: &str, card_lines: usize) {
            self.chunks.fetch_add(1, Ordering::SeqCst);
            self.last_card_lines.store(card_lines, Ordering::SeqCst);
        }

        fn on_unit_complete(&self, _unit: &str, _card_count: usize, _partial: bool) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_unit_error(&self, _unit: &str, _error: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_batch_start(2);
        cb.on_unit_start("unit_1", 60, 4000);
        cb.on_chunk("unit_1", "a\tb\tc\n", 1);
        cb.on_unit_complete("unit_1", 60, false);
        cb.on_unit_error("unit_2", "provider down");
        cb.on_batch_complete(2, 1);
    }

    #[test]
    fn tracker_receives_events_through_arc_dyn() {
        let tracker = Arc::new(Tracker::default());
        let cb: ProgressCallback = tracker.clone();

        cb.on_chunk("u", "x", 1);
        cb.on_chunk("u", "y", 2);
        cb.on_unit_complete("u", 2, true);
        cb.on_unit_error("v", "boom");

        assert_eq!(tracker.chunks.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.last_card_lines.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.errors.load(Ordering::SeqCst), 1);
    }
}
