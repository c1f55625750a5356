//! Pods: pure typed functions lifted to operate over streams
//! record-wise.
//!
//! A [`FunctionPod`] wraps a pure function together with an explicit
//! signature (ordered input fields and output keys with logical types)
//! and an engineer-supplied implementation version. The three together
//! determine the pod's stable identity hash; editing the function body
//! without bumping `impl_version` would silently hit stale caches, so
//! the version string is required.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use orcapod_core::hash::{self, Digest};
use orcapod_core::kernel::{EvalContext, Kernel};
use orcapod_core::record::{DataContext, Packet, SourceInfo, Tag};
use orcapod_core::stream::{build_table, records_from_table, Record, Stream, TableOptions};
use orcapod_core::types::{LogicalType, TypeSpec, Value};
use orcapod_core::{register_invocation, Error, Result};

/// The user function: receives the input packet, returns one value per
/// declared output key, in declaration order.
pub type PodFn = Arc<dyn Fn(&Packet) -> anyhow::Result<Vec<Value>> + Send + Sync>;

/// Ordered input and output declarations of a pod.
#[derive(Debug, Clone, Default)]
pub struct PodSignature {
    inputs: Vec<(String, LogicalType)>,
    outputs: Vec<(String, LogicalType)>,
}

impl PodSignature {
    pub fn new() -> Self {
        PodSignature::default()
    }

    /// Declare a required input packet field.
    pub fn input(mut self, name: impl Into<String>, ty: LogicalType) -> Self {
        self.inputs.push((name.into(), ty));
        self
    }

    /// Declare an output key of the result packet.
    pub fn output(mut self, key: impl Into<String>, ty: LogicalType) -> Self {
        self.outputs.push((key.into(), ty));
        self
    }

    pub fn inputs(&self) -> &[(String, LogicalType)] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[(String, LogicalType)] {
        &self.outputs
    }
}

/// A pure function over a typed tuple, applied per record.
///
/// Tags propagate unchanged from input to output; input packet fields
/// not named in the signature are dropped from the output packet. Each
/// record's execution is memoized in the store under the invocation
/// fingerprint combined with the input packet's content hash.
#[derive(Clone)]
pub struct FunctionPod {
    name: String,
    signature: PodSignature,
    impl_version: String,
    identity: Digest,
    func: PodFn,
}

impl FunctionPod {
    pub fn try_new(
        name: impl Into<String>,
        signature: PodSignature,
        impl_version: impl Into<String>,
        func: impl Fn(&Packet) -> anyhow::Result<Vec<Value>> + Send + Sync + 'static,
    ) -> Result<Self> {
        let name = name.into();
        let impl_version = impl_version.into();
        if signature.outputs.is_empty() {
            return Err(Error::SchemaMismatch(format!(
                "pod `{name}` declares no output keys"
            )));
        }
        if impl_version.is_empty() {
            return Err(Error::PipelineState(format!(
                "pod `{name}` requires a non-empty impl_version"
            )));
        }
        for (i, (field, _)) in signature.inputs.iter().enumerate() {
            if signature.inputs[..i].iter().any(|(other, _)| other == field) {
                return Err(Error::NameCollision(format!(
                    "pod `{name}` declares input `{field}` twice"
                )));
            }
        }
        for (i, (key, _)) in signature.outputs.iter().enumerate() {
            if signature.outputs[..i].iter().any(|(other, _)| other == key) {
                return Err(Error::NameCollision(format!(
                    "pod `{name}` declares output `{key}` twice"
                )));
            }
        }
        let identity = hash::hash_pod_identity(
            &name,
            &signature.inputs,
            &signature.outputs,
            &impl_version,
        );
        Ok(FunctionPod {
            name,
            signature,
            impl_version,
            identity,
            func: Arc::new(func),
        })
    }

    pub fn pod_name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &PodSignature {
        &self.signature
    }

    pub fn impl_version(&self) -> &str {
        &self.impl_version
    }

    pub fn identity(&self) -> Digest {
        self.identity
    }

    /// Apply the pod to a stream. Inside a pipeline scope this registers
    /// a pod node; outside it returns a standalone lazy stream. Input
    /// schema validation runs here, before any data is read.
    pub fn call(&self, input: &Arc<dyn Stream>) -> Result<Arc<dyn Stream>> {
        register_invocation(Arc::new(self.clone()), vec![input.clone()], None)
    }

    /// Like [`FunctionPod::call`] with an explicit node label.
    pub fn call_labeled(
        &self,
        input: &Arc<dyn Stream>,
        label: impl Into<String>,
    ) -> Result<Arc<dyn Stream>> {
        register_invocation(
            Arc::new(self.clone()),
            vec![input.clone()],
            Some(label.into()),
        )
    }

    fn output_spec(&self) -> TypeSpec {
        self.signature
            .outputs
            .iter()
            .map(|(key, ty)| (key.clone(), *ty))
            .collect()
    }
}

impl Kernel for FunctionPod {
    fn name(&self) -> &str {
        &self.name
    }

    fn identity_hash(&self) -> Digest {
        self.identity
    }

    fn output_keys(&self) -> Vec<String> {
        self.signature
            .outputs
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    fn output_schemas(&self, inputs: &[Arc<dyn Stream>]) -> Result<(TypeSpec, TypeSpec)> {
        if inputs.len() != 1 {
            return Err(Error::PipelineState(format!(
                "pod `{}` expects one input stream, got {}",
                self.name,
                inputs.len()
            )));
        }
        let input = &inputs[0];

        // the input packet schema must cover every declared input field
        for (field, declared) in &self.signature.inputs {
            match input.packet_schema().get(field) {
                Some(actual) if actual == *declared => {}
                Some(actual) => {
                    return Err(Error::SchemaMismatch(format!(
                        "pod `{}` input `{field}` declared as {declared} but stream carries {actual}",
                        self.name
                    )));
                }
                None => {
                    return Err(Error::MissingField(format!(
                        "pod `{}` input `{field}` not in stream packet schema",
                        self.name
                    )));
                }
            }
        }

        // tags propagate unchanged and must stay disjoint from outputs
        let tag_schema = input.tag_schema().clone();
        let packet_schema = self.output_spec();
        tag_schema.union(&packet_schema)?;
        Ok((tag_schema, packet_schema))
    }

    fn evaluate(&self, inputs: &[Arc<dyn Stream>], ctx: &EvalContext<'_>) -> Result<Vec<Record>> {
        let output_spec = self.output_spec();
        let mut out = Vec::new();
        let mut hits = 0usize;

        for (tag, packet) in inputs[0].iter()? {
            let record_key = match ctx.store {
                Some(_) => Some(hash::hash_record_invocation(
                    &ctx.invocation,
                    &packet.content_hash()?,
                )),
                None => None,
            };

            if let (Some(store), Some(key)) = (ctx.store, record_key.as_ref()) {
                if let Some(table) = store.get_table(key)? {
                    let (_, _, mut rows) = records_from_table(&table, &[])?;
                    if rows.len() == 1 {
                        let (_, cached) = rows.remove(0);
                        hits += 1;
                        out.push((tag, cached));
                        continue;
                    }
                }
            }

            let values = (self.func)(&packet).map_err(|e| Error::PodRuntime {
                label: ctx.label.clone(),
                tag: tag.render(),
                source: e,
            })?;
            if values.len() != self.signature.outputs.len() {
                return Err(Error::PodRuntime {
                    label: ctx.label.clone(),
                    tag: tag.render(),
                    source: anyhow::anyhow!(
                        "pod `{}` returned {} values for {} declared outputs",
                        self.name,
                        values.len(),
                        self.signature.outputs.len()
                    ),
                });
            }

            let mut out_values = IndexMap::new();
            let mut source = IndexMap::new();
            for ((key, declared), value) in self.signature.outputs.iter().zip(values) {
                let actual = value.logical_type();
                if actual != *declared {
                    return Err(Error::PodRuntime {
                        label: ctx.label.clone(),
                        tag: tag.render(),
                        source: anyhow::anyhow!(
                            "pod `{}` output `{key}` declared as {declared} but returned {actual}",
                            self.name
                        ),
                    });
                }
                out_values.insert(key.clone(), value);
                source.insert(
                    key.clone(),
                    SourceInfo::Invocation {
                        invocation: ctx.invocation,
                        field: key.clone(),
                    },
                );
            }
            let out_packet =
                Packet::try_new(out_values, output_spec.clone(), source, DataContext::current())?;

            if let (Some(store), Some(key)) = (ctx.store, record_key.as_ref()) {
                let table = build_table(
                    &TypeSpec::new(),
                    &output_spec,
                    &[(Tag::empty(), out_packet.clone())],
                    &TableOptions::full(),
                )?;
                store.put_table(key, &table)?;
            }
            out.push((tag, out_packet));
        }

        debug!(node = %ctx.label, rows = out.len(), cached = hits, "pod materialized");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};

    use orcapod_core::stream::TableStream;

    fn add_numbers() -> FunctionPod {
        FunctionPod::try_new(
            "add_numbers",
            PodSignature::new()
                .input("a", LogicalType::Int64)
                .input("b", LogicalType::Int64)
                .output("sum", LogicalType::Int64),
            "v1",
            |packet| {
                let a = packet
                    .get("a")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("missing a"))?;
                let b = packet
                    .get("b")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| anyhow::anyhow!("missing b"))?;
                Ok(vec![Value::Int64(a + b)])
            },
        )
        .unwrap()
    }

    fn numbers_stream() -> Arc<dyn Stream> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 1, 2, 3, 4])),
                Arc::new(Int64Array::from(vec![1, 2, 3, 4, 5])),
                Arc::new(Int64Array::from(vec![10, 20, 30, 40, 50])),
            ],
        )
        .unwrap();
        Arc::new(TableStream::try_new(batch, &["id"]).unwrap())
    }

    #[test]
    fn pod_maps_records_and_propagates_tags() {
        let output = add_numbers().call(&numbers_stream()).unwrap();
        let rows = output.flow().unwrap();
        assert_eq!(rows.len(), 5);
        let sums: Vec<i64> = rows
            .iter()
            .map(|(_, p)| p.get("sum").and_then(Value::as_i64).unwrap())
            .collect();
        assert_eq!(sums, vec![11, 22, 33, 44, 55]);
        for (i, (tag, packet)) in rows.iter().enumerate() {
            assert_eq!(tag.get("id"), Some(&Value::Int64(i as i64)));
            // undeclared input fields are dropped from the output packet
            assert!(packet.get("a").is_none());
            assert_eq!(packet.keys().collect::<Vec<_>>(), vec!["sum"]);
        }
    }

    #[test]
    fn output_source_info_names_the_invocation() {
        let output = add_numbers().call(&numbers_stream()).unwrap();
        let invocation = output.fingerprint().unwrap();
        let rows = output.flow().unwrap();
        for (_, packet) in rows {
            match packet.source_of("sum") {
                Some(SourceInfo::Invocation { invocation: fp, field }) => {
                    assert_eq!(*fp, invocation);
                    assert_eq!(field, "sum");
                }
                other => panic!("expected invocation source, got {other:?}"),
            }
        }
    }

    #[test]
    fn missing_input_field_is_rejected_at_call_time() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("a", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0])),
                Arc::new(Int64Array::from(vec![1])),
            ],
        )
        .unwrap();
        let stream: Arc<dyn Stream> = Arc::new(TableStream::try_new(batch, &["id"]).unwrap());
        let err = add_numbers().call(&stream).unwrap_err();
        assert!(matches!(err, Error::MissingField(_)));
    }

    #[test]
    fn identity_tracks_impl_version() {
        let v1 = add_numbers();
        let v2 = FunctionPod::try_new(
            "add_numbers",
            PodSignature::new()
                .input("a", LogicalType::Int64)
                .input("b", LogicalType::Int64)
                .output("sum", LogicalType::Int64),
            "v2",
            |_| Ok(vec![Value::Int64(0)]),
        )
        .unwrap();
        assert_ne!(v1.identity(), v2.identity());

        let same = add_numbers();
        assert_eq!(v1.identity(), same.identity());
    }

    #[test]
    fn user_errors_carry_the_record_tag() {
        let failing = FunctionPod::try_new(
            "explode",
            PodSignature::new()
                .input("a", LogicalType::Int64)
                .output("out", LogicalType::Int64),
            "v1",
            |_| Err(anyhow::anyhow!("boom")),
        )
        .unwrap();
        let err = failing
            .call(&numbers_stream())
            .unwrap()
            .flow()
            .unwrap_err();
        match err {
            Error::PodRuntime { label, tag, .. } => {
                assert_eq!(label, "explode");
                assert!(tag.contains("id=0"));
            }
            other => panic!("expected PodRuntime, got {other}"),
        }
    }

    #[test]
    fn empty_impl_version_is_rejected() {
        let result = FunctionPod::try_new(
            "p",
            PodSignature::new()
                .input("a", LogicalType::Int64)
                .output("out", LogicalType::Int64),
            "",
            |_| Ok(vec![Value::Int64(0)]),
        );
        assert!(result.is_err());
    }
}
