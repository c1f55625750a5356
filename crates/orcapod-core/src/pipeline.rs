//! Pipelines: a scoped registry that captures invocations into a DAG
//! and orchestrates memoized execution.
//!
//! A process-wide (per-thread) stack of current pipelines is maintained.
//! While a pipeline scope is active, every operator and pod call
//! registers a node; edges derive from the lazy streams passed between
//! invocations, so re-using a stream across nodes creates shared
//! upstream edges rather than copies. The DAG is acyclic by
//! construction: a stream can only reference already-constructed
//! upstreams.
//!
//! `run` executes nodes in registration order (a topological order by
//! construction), consulting the store under each node's invocation
//! fingerprint before evaluating its kernel.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use arrow_array::RecordBatch;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::hash::{self, Digest};
use crate::kernel::Kernel;
use crate::store::Store;
use crate::stream::{build_table, records_from_table, LazyStream, Stream, TableOptions};

thread_local! {
    static PIPELINE_STACK: RefCell<Vec<Pipeline>> = RefCell::new(Vec::new());
}

struct NodeData {
    label: String,
    output: Arc<LazyStream>,
    fingerprint: Digest,
    upstream: Vec<usize>,
    result: OnceLock<RecordBatch>,
}

struct PipelineInner {
    name: String,
    store: Arc<dyn Store>,
    graph: DiGraph<NodeData, ()>,
    labels: HashMap<String, NodeIndex>,
    name_counts: HashMap<String, usize>,
}

/// A named pipeline: a scoped registry of invocations and their DAG.
///
/// Cloning a `Pipeline` clones a handle to the same registry.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Mutex<PipelineInner>>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>) -> Self {
        Pipeline {
            inner: Arc::new(Mutex::new(PipelineInner {
                name: name.into(),
                store,
                graph: DiGraph::new(),
                labels: HashMap::new(),
                name_counts: HashMap::new(),
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, PipelineInner>> {
        self.inner
            .lock()
            .map_err(|_| Error::PipelineState("pipeline registry poisoned".to_string()))
    }

    pub fn name(&self) -> Result<String> {
        Ok(self.lock()?.name.clone())
    }

    pub fn store(&self) -> Result<Arc<dyn Store>> {
        Ok(self.lock()?.store.clone())
    }

    /// The pipeline at the top of this thread's scope stack, if any.
    pub fn current() -> Option<Pipeline> {
        PIPELINE_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Run `f` with this pipeline as the current registration target.
    /// Scopes nest; the innermost pipeline captures invocations. Entry
    /// and exit happen on the calling thread.
    pub fn scope<R>(&self, f: impl FnOnce() -> R) -> R {
        let _guard = ScopeGuard::enter(self.clone());
        f()
    }

    /// Register one invocation as a node. Called through
    /// [`register_invocation`] by operator and pod implementations.
    fn register(&self, output: Arc<LazyStream>, label: Option<String>) -> Result<String> {
        let mut inner = self.lock()?;

        let label = match label {
            Some(explicit) => {
                if inner.labels.contains_key(&explicit) {
                    return Err(Error::PipelineState(format!(
                        "node label `{explicit}` already registered"
                    )));
                }
                explicit
            }
            None => {
                let stem = output.kernel().name().to_string();
                loop {
                    let n = inner.name_counts.entry(stem.clone()).or_insert(0);
                    let candidate = format!("{stem}_{n}");
                    *n += 1;
                    if !inner.labels.contains_key(&candidate) {
                        break candidate;
                    }
                }
            }
        };

        // upstream edges derive from input streams that are outputs of
        // already-registered nodes; table sources contribute none
        let mut upstream = Vec::new();
        for input in output.inputs() {
            let input_ptr = Arc::as_ptr(input) as *const ();
            for idx in inner.graph.node_indices() {
                let node = &inner.graph[idx];
                if Arc::as_ptr(&node.output) as *const () == input_ptr {
                    upstream.push(idx.index());
                    break;
                }
            }
        }

        let fingerprint = output.fingerprint()?;
        let node = NodeData {
            label: label.clone(),
            output,
            fingerprint,
            upstream: upstream.clone(),
            result: OnceLock::new(),
        };
        let idx = inner.graph.add_node(node);
        for u in &upstream {
            inner.graph.add_edge(NodeIndex::new(*u), idx, ());
        }
        inner.labels.insert(label.clone(), idx);
        debug!(pipeline = %inner.name, node = %label, fingerprint = %fingerprint, "registered node");
        Ok(label)
    }

    /// Deterministic fingerprint of the pipeline structure: the
    /// registration-ordered sequence of node fingerprints and upstream
    /// node indices.
    pub fn fingerprint(&self) -> Result<Digest> {
        let inner = self.lock()?;
        let nodes: Vec<(Digest, Vec<usize>)> = inner
            .graph
            .node_indices()
            .map(|idx| {
                let node = &inner.graph[idx];
                (node.fingerprint, node.upstream.clone())
            })
            .collect();
        Ok(hash::hash_pipeline(&nodes))
    }

    /// Node labels in registration order.
    pub fn node_labels(&self) -> Result<Vec<String>> {
        let inner = self.lock()?;
        Ok(inner
            .graph
            .node_indices()
            .map(|idx| inner.graph[idx].label.clone())
            .collect())
    }

    /// Handle to a registered node by label.
    pub fn node(&self, label: &str) -> Result<NodeHandle> {
        let inner = self.lock()?;
        if !inner.labels.contains_key(label) {
            return Err(Error::PipelineState(format!(
                "pipeline `{}` has no node `{label}`",
                inner.name
            )));
        }
        Ok(NodeHandle {
            pipeline: self.clone(),
            label: label.to_string(),
        })
    }

    /// Execute the pipeline: nodes in topological (registration) order,
    /// consulting the store under each node's fingerprint before
    /// evaluating. The first error aborts the run, attributed to the
    /// failing node.
    pub fn run(&self) -> Result<()> {
        let inner = self.lock()?;
        if petgraph::algo::toposort(&inner.graph, None).is_err() {
            return Err(Error::PipelineState(
                "pipeline graph contains a cycle".to_string(),
            ));
        }
        let store = inner.store.clone();
        let pipeline_fp = {
            let nodes: Vec<(Digest, Vec<usize>)> = inner
                .graph
                .node_indices()
                .map(|idx| {
                    let node = &inner.graph[idx];
                    (node.fingerprint, node.upstream.clone())
                })
                .collect();
            hash::hash_pipeline(&nodes)
        };
        info!(pipeline = %inner.name, nodes = inner.graph.node_count(), "running pipeline");

        for idx in inner.graph.node_indices() {
            let node = &inner.graph[idx];
            if node.result.get().is_none() {
                match store.get_table(&node.fingerprint)? {
                    Some(table) => {
                        debug!(node = %node.label, fingerprint = %node.fingerprint, "store hit");
                        let tag_columns: Vec<String> = node
                            .output
                            .tag_schema()
                            .names()
                            .map(str::to_string)
                            .collect();
                        let (_, _, rows) = records_from_table(&table, &tag_columns)
                            .map_err(|e| attribute(e, &node.label))?;
                        node.output.seed(rows);
                        let _ = node.result.set(table);
                    }
                    None => {
                        debug!(node = %node.label, fingerprint = %node.fingerprint, "store miss, evaluating");
                        let rows = node
                            .output
                            .materialize(Some(store.as_ref()), &node.label)
                            .map_err(|e| attribute(e, &node.label))?;
                        let table = build_table(
                            node.output.tag_schema(),
                            node.output.packet_schema(),
                            rows,
                            &TableOptions::full(),
                        )
                        .map_err(|e| attribute(e, &node.label))?;
                        store.put_table(&node.fingerprint, &table)?;
                        let _ = node.result.set(table);
                    }
                }
            }
            if let Some(table) = node.result.get() {
                store.put_result(&pipeline_fp, &node.label, table)?;
            }
        }
        info!(pipeline = %inner.name, "pipeline complete");
        Ok(())
    }
}

fn attribute(err: Error, label: &str) -> Error {
    match err {
        e @ Error::PodRuntime { .. } => e,
        e => Error::Other(anyhow::Error::new(e).context(format!("node `{label}` failed"))),
    }
}

struct ScopeGuard;

impl ScopeGuard {
    fn enter(pipeline: Pipeline) -> Self {
        PIPELINE_STACK.with(|stack| stack.borrow_mut().push(pipeline));
        ScopeGuard
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        PIPELINE_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Register an invocation: build its lazy output stream and, when a
/// pipeline scope is active on this thread, append a node to the
/// current pipeline. Outside any scope the stream is standalone.
pub fn register_invocation(
    kernel: Arc<dyn Kernel>,
    inputs: Vec<Arc<dyn Stream>>,
    label: Option<String>,
) -> Result<Arc<dyn Stream>> {
    let lazy = Arc::new(LazyStream::try_new(kernel, inputs)?);
    if let Some(pipeline) = Pipeline::current() {
        pipeline.register(lazy.clone(), label)?;
    }
    Ok(lazy)
}

/// Handle to one registered node.
pub struct NodeHandle {
    pipeline: Pipeline,
    label: String,
}

impl NodeHandle {
    pub fn label(&self) -> &str {
        &self.label
    }

    fn with_node<R>(&self, f: impl FnOnce(&PipelineInner, &NodeData) -> Result<R>) -> Result<R> {
        let inner = self.pipeline.lock()?;
        let idx = *inner.labels.get(&self.label).ok_or_else(|| {
            Error::PipelineState(format!("node `{}` disappeared", self.label))
        })?;
        let node = &inner.graph[idx];
        f(&inner, node)
    }

    /// This node's invocation fingerprint.
    pub fn fingerprint(&self) -> Result<Digest> {
        self.with_node(|_, node| Ok(node.fingerprint))
    }

    /// Labels of this node's upstream nodes, in input order.
    pub fn upstream(&self) -> Result<Vec<String>> {
        self.with_node(|inner, node| {
            Ok(node
                .upstream
                .iter()
                .map(|u| inner.graph[NodeIndex::new(*u)].label.clone())
                .collect())
        })
    }

    /// This node's lazy output stream.
    pub fn output(&self) -> Result<Arc<dyn Stream>> {
        self.with_node(|_, node| Ok(node.output.clone() as Arc<dyn Stream>))
    }

    /// The node's result table. After `run` this is the materialized
    /// output; before `run` it is the stored table when the store
    /// already holds this fingerprint, else an empty table with the
    /// correct schema.
    pub fn df(&self) -> Result<RecordBatch> {
        self.with_node(|inner, node| {
            if let Some(table) = node.result.get() {
                return Ok(table.clone());
            }
            if let Some(table) = inner.store.get_table(&node.fingerprint)? {
                return Ok(table);
            }
            build_table(
                node.output.tag_schema(),
                node.output.packet_schema(),
                &[],
                &TableOptions::full(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use arrow_array::{Int64Array, StringArray};
    use arrow_schema::{DataType, Field, Schema};

    use crate::kernel::EvalContext;
    use crate::stream::{Record, TableStream};
    use crate::types::TypeSpec;

    /// Minimal in-memory store for pipeline tests. The production
    /// backends live in `orcapod-io`.
    #[derive(Default)]
    struct TestStore {
        tables: Mutex<StdHashMap<Digest, RecordBatch>>,
    }

    impl Store for TestStore {
        fn has(&self, fingerprint: &Digest) -> Result<bool> {
            Ok(self.tables.lock().unwrap().contains_key(fingerprint))
        }

        fn get_table(&self, fingerprint: &Digest) -> Result<Option<RecordBatch>> {
            Ok(self.tables.lock().unwrap().get(fingerprint).cloned())
        }

        fn put_table(&self, fingerprint: &Digest, table: &RecordBatch) -> Result<()> {
            let mut tables = self.tables.lock().unwrap();
            if let Some(existing) = tables.get(fingerprint) {
                if existing != table {
                    return Err(Error::FingerprintCollision {
                        fingerprint: fingerprint.to_hex(),
                    });
                }
                return Ok(());
            }
            tables.insert(*fingerprint, table.clone());
            Ok(())
        }
    }

    /// Identity kernel that counts its evaluations.
    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    impl Kernel for Counting {
        fn name(&self) -> &str {
            "repeat"
        }

        fn identity_hash(&self) -> Digest {
            hash::hash_operator_identity("repeat", Vec::<(&str, &str)>::new())
        }

        fn output_schemas(&self, inputs: &[Arc<dyn Stream>]) -> Result<(TypeSpec, TypeSpec)> {
            Ok((
                inputs[0].tag_schema().clone(),
                inputs[0].packet_schema().clone(),
            ))
        }

        fn evaluate(
            &self,
            inputs: &[Arc<dyn Stream>],
            _ctx: &EvalContext<'_>,
        ) -> Result<Vec<Record>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            inputs[0].flow()
        }
    }

    fn source() -> Arc<dyn Stream> {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("v", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 1])),
                Arc::new(StringArray::from(vec!["a", "b"])),
            ],
        )
        .unwrap();
        Arc::new(TableStream::try_new(batch, &["id"]).unwrap())
    }

    fn counting_kernel() -> (Arc<dyn Kernel>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let kernel: Arc<dyn Kernel> = Arc::new(Counting {
            calls: calls.clone(),
        });
        (kernel, calls)
    }

    #[test]
    fn default_labels_disambiguate() {
        let pipeline = Pipeline::new("p", Arc::new(TestStore::default()));
        let input = source();
        pipeline.scope(|| {
            let (kernel, _) = counting_kernel();
            let mid = register_invocation(kernel.clone(), vec![input.clone()], None).unwrap();
            register_invocation(kernel, vec![mid], None).unwrap();
        });
        assert_eq!(
            pipeline.node_labels().unwrap(),
            vec!["repeat_0".to_string(), "repeat_1".to_string()]
        );
        assert_eq!(
            pipeline.node("repeat_1").unwrap().upstream().unwrap(),
            vec!["repeat_0".to_string()]
        );
    }

    #[test]
    fn duplicate_explicit_label_is_rejected() {
        let pipeline = Pipeline::new("p", Arc::new(TestStore::default()));
        let input = source();
        pipeline.scope(|| {
            let (kernel, _) = counting_kernel();
            register_invocation(kernel.clone(), vec![input.clone()], Some("x".into())).unwrap();
            let err =
                register_invocation(kernel, vec![input.clone()], Some("x".into())).unwrap_err();
            assert!(matches!(err, Error::PipelineState(_)));
        });
    }

    #[test]
    fn outside_scope_streams_are_standalone() {
        let pipeline = Pipeline::new("p", Arc::new(TestStore::default()));
        let (kernel, calls) = counting_kernel();
        let stream = register_invocation(kernel, vec![source()], None).unwrap();
        assert!(pipeline.node_labels().unwrap().is_empty());
        assert_eq!(stream.flow().unwrap().len(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_memoizes_in_the_store() {
        let store = Arc::new(TestStore::default());
        let input = source();

        let p1 = Pipeline::new("p1", store.clone());
        let (k1, calls1) = counting_kernel();
        p1.scope(|| {
            register_invocation(k1, vec![input.clone()], None).unwrap();
        });
        p1.run().unwrap();
        assert_eq!(calls1.load(Ordering::SeqCst), 1);
        p1.run().unwrap();
        assert_eq!(calls1.load(Ordering::SeqCst), 1);

        // an identical pipeline over the same store never evaluates
        let p2 = Pipeline::new("p2", store);
        let (k2, calls2) = counting_kernel();
        p2.scope(|| {
            register_invocation(k2, vec![input.clone()], None).unwrap();
        });
        assert_eq!(p1.fingerprint().unwrap(), p2.fingerprint().unwrap());

        let before = p2.node("repeat_0").unwrap().df().unwrap();
        assert_eq!(before, p1.node("repeat_0").unwrap().df().unwrap());

        p2.run().unwrap();
        assert_eq!(calls2.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn df_is_empty_with_correct_schema_before_run() {
        let pipeline = Pipeline::new("p", Arc::new(TestStore::default()));
        let (kernel, _) = counting_kernel();
        pipeline.scope(|| {
            register_invocation(kernel, vec![source()], None).unwrap();
        });
        let table = pipeline.node("repeat_0").unwrap().df().unwrap();
        assert_eq!(table.num_rows(), 0);
        let schema = table.schema();
        let names: Vec<&str> = schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect();
        assert_eq!(
            names,
            vec!["id", "v", "_source_v", "_content_hash", "_context_key"]
        );
    }
}
