//! Inner join on shared tag columns.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use orcapod_core::hash::{self, Digest};
use orcapod_core::kernel::{EvalContext, Kernel};
use orcapod_core::record::{DataContext, Packet, Tag};
use orcapod_core::stream::{Record, Stream};
use orcapod_core::types::TypeSpec;
use orcapod_core::{register_invocation, Error, Result, Value};

/// The join operator.
///
/// `Join::new().apply(&left, &right)` returns a lazy stream whose
/// records are the inner join of the two inputs on their shared tag
/// columns. All schema checks run at construction, before any data is
/// read; evaluation is memoized per output stream.
pub struct Join {
    label: Option<String>,
}

impl Join {
    pub fn new() -> Self {
        Join { label: None }
    }

    /// Use an explicit node label when registered inside a pipeline.
    pub fn with_label(label: impl Into<String>) -> Self {
        Join {
            label: Some(label.into()),
        }
    }

    pub fn apply(
        &self,
        left: &Arc<dyn Stream>,
        right: &Arc<dyn Stream>,
    ) -> Result<Arc<dyn Stream>> {
        let kernel = Arc::new(JoinKernel::plan(left.as_ref(), right.as_ref()));
        register_invocation(kernel, vec![left.clone(), right.clone()], self.label.clone())
    }
}

impl Default for Join {
    fn default() -> Self {
        Join::new()
    }
}

struct JoinKernel {
    /// Shared tag columns, in left-side declaration order.
    shared: Vec<String>,
    identity: Digest,
}

impl JoinKernel {
    fn plan(left: &dyn Stream, right: &dyn Stream) -> JoinKernel {
        let shared: Vec<String> = left
            .tag_schema()
            .names()
            .filter(|name| right.tag_schema().contains(name))
            .map(str::to_string)
            .collect();
        let identity = hash::hash_operator_identity(
            "join",
            shared.iter().map(|name| ("on", name.as_str())),
        );
        JoinKernel { shared, identity }
    }
}

impl Kernel for JoinKernel {
    fn name(&self) -> &str {
        "join"
    }

    fn identity_hash(&self) -> Digest {
        self.identity
    }

    fn output_schemas(&self, inputs: &[Arc<dyn Stream>]) -> Result<(TypeSpec, TypeSpec)> {
        if inputs.len() != 2 {
            return Err(Error::PipelineState(format!(
                "join expects two input streams, got {}",
                inputs.len()
            )));
        }
        let (left, right) = (&inputs[0], &inputs[1]);

        // shared tag columns must exist on both sides with equal types
        let tag_schema = left.tag_schema().reconcile(right.tag_schema(), &self.shared)?;

        // non-tag columns of the two sides must be disjoint
        for name in left.packet_schema().names() {
            if right.packet_schema().contains(name) {
                return Err(Error::NameCollision(format!(
                    "packet field `{name}` exists on both join sides"
                )));
            }
        }
        let packet_schema = left.packet_schema().union(right.packet_schema())?;

        // the joined record must keep tag and packet keys disjoint
        tag_schema.union(&packet_schema)?;

        Ok((tag_schema, packet_schema))
    }

    fn evaluate(&self, inputs: &[Arc<dyn Stream>], ctx: &EvalContext<'_>) -> Result<Vec<Record>> {
        let (left, right) = (&inputs[0], &inputs[1]);

        // group the right side by its shared tag-value tuple
        let mut groups: HashMap<Vec<Value>, Vec<Record>> = HashMap::new();
        for (tag, packet) in right.iter()? {
            let key = tag.key_tuple(&self.shared)?;
            groups.entry(key).or_default().push((tag, packet));
        }

        // iterate the left side in order, emitting every match in
        // right-side iteration order
        let mut out = Vec::new();
        for (left_tag, left_packet) in left.iter()? {
            let key = left_tag.key_tuple(&self.shared)?;
            let Some(matches) = groups.get(&key) else {
                continue;
            };
            for (right_tag, right_packet) in matches {
                let mut tag_values: IndexMap<String, Value> = left_tag.as_map();
                for (name, value) in right_tag.iter() {
                    if !tag_values.contains_key(name) {
                        tag_values.insert(name.to_string(), value.clone());
                    }
                }
                let tag = Tag::from_pairs(tag_values)?;

                let mut packet_values = left_packet.as_map();
                for (name, value) in right_packet.iter() {
                    packet_values.insert(name.to_string(), value.clone());
                }
                let mut source = left_packet.source_info().clone();
                for (name, info) in right_packet.source_info() {
                    source.insert(name.clone(), info.clone());
                }
                let types = left_packet.types().union(right_packet.types())?;
                let packet =
                    Packet::try_new(packet_values, types, source, DataContext::current())?;
                out.push((tag, packet));
            }
        }
        debug!(node = %ctx.label, rows = out.len(), "join materialized");
        Ok(out)
    }
}
