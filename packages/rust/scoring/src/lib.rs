//! Change-scoring engine for PageWatch.
//!
//! This crate provides:
//! - [`similarity`] — edit-distance and Jaccard primitives with bounded
//!   cost on large documents
//! - [`ScoringPolicy`] — the single authoritative weighted formula and
//!   label threshold table (policy v1)
//! - [`compare`] — word/link delta reporting for arbitrary version pairs
//!
//! Everything here is pure: no I/O, no clocks, no storage.

pub mod compare;
pub mod policy;
pub mod similarity;

pub use compare::{Comparison, ModifiedLink, compare};
pub use policy::{ScoreResult, ScoringPolicy};
pub use similarity::{SamplingParams, character_similarity, jaccard, tokenize, word_similarity};
