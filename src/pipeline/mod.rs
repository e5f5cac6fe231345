//! Core generation pipeline stages.
//!
//! Each submodule implements one step. Everything except [`controller`] is a
//! pure function over strings and plain values, so the stages can be tested
//! without a provider, a filesystem or logging wiring.
//!
//! ## Data Flow
//!
//! ```text
//! markdown ──▶ budget ──▶ truncate ──▶ prompt ──▶ controller ──▶ normalize ──▶ validate
//!              (tokens)   (fit)        (contract)  (stream)       (cap N)       (check/repair)
//! ```
//!
//! 1. [`budget`]: approximate token counts and the room left for content
//! 2. [`truncate`]: cut over-budget markdown at a heading boundary
//! 3. [`prompt`]: assemble the full generation request
//! 4. [`controller`]: drive the provider with retry, early stop, and
//!    interruption; the only stage with network I/O
//! 5. [`normalize`]: keep the header block and the first N card rows
//! 6. [`validate`]: enforce the deck contract; repair and tag fixes

pub mod budget;
pub mod controller;
pub mod normalize;
pub mod prompt;
pub mod truncate;
pub mod validate;
