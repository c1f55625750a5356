//! # OrcaPod Transforms - Operators and Pods
//!
//! This crate provides the invocable units that run inside OrcaPod
//! pipelines: structural stream operators and function pods. Both
//! implement the [`orcapod_core::Kernel`] trait, register nodes when a
//! pipeline scope is active, and return lazy, memoized output streams.
//!
//! ## Available Units
//!
//! - **Join**: inner join of two streams on their shared tag columns,
//!   schema-checked at construction and lazy at evaluation
//! - **FunctionPod**: a pure typed function lifted record-wise over a
//!   stream, with a stable identity hash and store-backed memoization

/// Inner join operator
pub mod join;

/// Function pods and their signatures
pub mod pod;

pub use join::Join;
pub use pod::{FunctionPod, PodFn, PodSignature};
