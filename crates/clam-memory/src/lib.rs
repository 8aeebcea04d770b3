//! `clam-memory` – The three memory tiers.
//!
//! Each store carries its own lock and its own error type; nothing here spans
//! two stores in one operation.
//!
//! # Modules
//!
//! - [`scratch`] – [`ScratchBuffer`][scratch::ScratchBuffer]: the volatile,
//!   in-memory buffer of scored candidate facts.
//! - [`vector`] – [`VectorStore`][vector::VectorStore]: the durable semantic and
//!   episodic collections, backed by a pluggable
//!   [`SimilarityIndex`][vector::SimilarityIndex].
//! - [`triples`] – [`TripleStore`][triples::TripleStore]: durable
//!   subject–predicate–object assertions in SQLite.

pub mod scratch;
pub mod triples;
pub mod vector;
