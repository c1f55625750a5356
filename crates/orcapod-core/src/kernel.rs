//! The kernel trait: the seam between the pipeline and the operator and
//! pod implementations.
//!
//! A kernel is one invocable unit (a structural operator such as a join,
//! or a pod lifted over a stream). Implementations live in downstream
//! crates; the pipeline and the lazy stream machinery only see this
//! trait.

use std::sync::Arc;

use crate::error::Result;
use crate::hash::{self, Digest};
use crate::store::Store;
use crate::stream::{Record, Stream};
use crate::types::TypeSpec;

/// Evaluation context handed to a kernel when its output stream is
/// materialized. Outside a pipeline run there is no store and pods
/// compute unconditionally.
pub struct EvalContext<'a> {
    /// Store consulted for per-record memoization, when present.
    pub store: Option<&'a dyn Store>,
    /// Fingerprint of this invocation.
    pub invocation: Digest,
    /// Node label (or kernel name for standalone streams), used for
    /// error attribution.
    pub label: String,
}

/// One invocable unit of computation over streams.
pub trait Kernel: Send + Sync {
    /// The kernel's base name; also the stem of default node labels.
    fn name(&self) -> &str;

    /// Stable identity hash covering the kernel's declared signature,
    /// bound parameters, and (for pods) the implementation version.
    fn identity_hash(&self) -> Digest;

    /// Declared output keys, contributing to the invocation fingerprint.
    /// Structural operators with no declared outputs return nothing.
    fn output_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Compute the output tag and packet typespecs for the given inputs,
    /// performing every construction-time validation. No data access.
    fn output_schemas(&self, inputs: &[Arc<dyn Stream>]) -> Result<(TypeSpec, TypeSpec)>;

    /// Produce the output records for the given inputs. Deterministic in
    /// the inputs; scheduling and store state never change the result.
    fn evaluate(&self, inputs: &[Arc<dyn Stream>], ctx: &EvalContext<'_>) -> Result<Vec<Record>>;
}

/// Fingerprint of one invocation of `kernel` over `inputs`: the kernel
/// identity, the ordered upstream stream fingerprints, and the declared
/// output keys.
pub fn invocation_fingerprint(kernel: &dyn Kernel, inputs: &[Arc<dyn Stream>]) -> Result<Digest> {
    let mut upstream = Vec::with_capacity(inputs.len());
    for input in inputs {
        upstream.push(input.fingerprint()?);
    }
    let keys = kernel.output_keys();
    Ok(hash::hash_invocation(
        &kernel.identity_hash(),
        &upstream,
        keys.iter().map(String::as_str),
    ))
}
