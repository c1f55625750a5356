//! End-to-end pipeline tests over the store backends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arrow_array::{Array, Int64Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};

use orcapod_core::stream::TableStream;
use orcapod_core::types::LogicalType;
use orcapod_core::{Pipeline, Result, Stream, Value};
use orcapod_io::{MemoryStore, ParquetStore};
use orcapod_tx::{FunctionPod, Join, PodSignature};

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

fn add_pod(calls: Arc<AtomicUsize>, impl_version: &str) -> FunctionPod {
    FunctionPod::try_new(
        "add_numbers",
        PodSignature::new()
            .input("a", LogicalType::Int64)
            .input("b", LogicalType::Int64)
            .output("sum", LogicalType::Int64),
        impl_version,
        move |packet| {
            calls.fetch_add(1, Ordering::SeqCst);
            let a = packet.get("a").and_then(Value::as_i64).unwrap_or(0);
            let b = packet.get("b").and_then(Value::as_i64).unwrap_or(0);
            Ok(vec![Value::Int64(a + b)])
        },
    )
    .unwrap()
}

fn multiply_pod(calls: Arc<AtomicUsize>, impl_version: &str) -> FunctionPod {
    FunctionPod::try_new(
        "multiply_numbers",
        PodSignature::new()
            .input("sum", LogicalType::Int64)
            .output("product", LogicalType::Int64),
        impl_version,
        move |packet| {
            calls.fetch_add(1, Ordering::SeqCst);
            let sum = packet.get("sum").and_then(Value::as_i64).unwrap_or(0);
            Ok(vec![Value::Int64(sum * 2)])
        },
    )
    .unwrap()
}

fn combine_pod(calls: Arc<AtomicUsize>, impl_version: &str) -> FunctionPod {
    FunctionPod::try_new(
        "combine_results",
        PodSignature::new()
            .input("product", LogicalType::Int64)
            .output("summary", LogicalType::String),
        impl_version,
        move |packet| {
            calls.fetch_add(1, Ordering::SeqCst);
            let product = packet.get("product").and_then(Value::as_i64).unwrap_or(0);
            Ok(vec![Value::String(format!("total_{product}"))])
        },
    )
    .unwrap()
}

struct Counters {
    add: Arc<AtomicUsize>,
    multiply: Arc<AtomicUsize>,
    combine: Arc<AtomicUsize>,
}

impl Counters {
    fn new() -> Self {
        Counters {
            add: Arc::new(AtomicUsize::new(0)),
            multiply: Arc::new(AtomicUsize::new(0)),
            combine: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn snapshot(&self) -> (usize, usize, usize) {
        (
            self.add.load(Ordering::SeqCst),
            self.multiply.load(Ordering::SeqCst),
            self.combine.load(Ordering::SeqCst),
        )
    }
}

/// Build the three-pod chain inside a pipeline scope.
fn build_chain(
    pipeline: &Pipeline,
    input: &Arc<dyn Stream>,
    counters: &Counters,
    multiply_version: &str,
) -> Result<()> {
    let add = add_pod(counters.add.clone(), "v1");
    let multiply = multiply_pod(counters.multiply.clone(), multiply_version);
    let combine = combine_pod(counters.combine.clone(), "v1");
    pipeline.scope(|| -> Result<()> {
        let sums = add.call_labeled(input, "add")?;
        let products = multiply.call_labeled(&sums, "multiply")?;
        combine.call_labeled(&products, "combine")?;
        Ok(())
    })
}

#[test]
fn chained_pipeline_computes_and_memoizes() {
    let store = Arc::new(MemoryStore::new());
    let input = numbers_stream();

    let counters = Counters::new();
    let p1 = Pipeline::new("p1", store.clone());
    build_chain(&p1, &input, &counters, "v1").unwrap();
    p1.run().unwrap();
    assert_eq!(counters.snapshot(), (5, 5, 5));

    let summary = p1.node("combine").unwrap().df().unwrap();
    assert_eq!(summary.num_rows(), 5);
    let summaries = summary
        .column(summary.schema().index_of("summary").unwrap())
        .as_any()
        .downcast_ref::<StringArray>()
        .unwrap()
        .iter()
        .map(|v| v.unwrap().to_string())
        .collect::<Vec<_>>();
    assert_eq!(
        summaries,
        vec!["total_22", "total_44", "total_66", "total_88", "total_110"]
    );

    // a second run never re-enters user code
    p1.run().unwrap();
    assert_eq!(counters.snapshot(), (5, 5, 5));
}

#[test]
fn identical_pipeline_hits_the_cache_before_and_during_run() {
    let store = Arc::new(MemoryStore::new());
    let input = numbers_stream();

    let first = Counters::new();
    let p1 = Pipeline::new("p1", store.clone());
    build_chain(&p1, &input, &first, "v1").unwrap();
    p1.run().unwrap();

    let second = Counters::new();
    let p2 = Pipeline::new("p2", store.clone());
    build_chain(&p2, &input, &second, "v1").unwrap();

    assert_eq!(p1.fingerprint().unwrap(), p2.fingerprint().unwrap());

    // results are visible through the store before p2 ever runs
    for label in ["add", "multiply", "combine"] {
        let before = p2.node(label).unwrap().df().unwrap();
        let reference = p1.node(label).unwrap().df().unwrap();
        assert_eq!(before, reference, "node `{label}` differs before run");
    }

    p2.run().unwrap();
    assert_eq!(second.snapshot(), (0, 0, 0));
}

#[test]
fn impl_version_change_invalidates_the_node_and_downstream() {
    let store = Arc::new(MemoryStore::new());
    let input = numbers_stream();

    let first = Counters::new();
    let p1 = Pipeline::new("p1", store.clone());
    build_chain(&p1, &input, &first, "v1").unwrap();
    p1.run().unwrap();

    // bump only the middle pod's implementation version
    let second = Counters::new();
    let p2 = Pipeline::new("p2", store.clone());
    build_chain(&p2, &input, &second, "v2").unwrap();
    assert_ne!(p1.fingerprint().unwrap(), p2.fingerprint().unwrap());

    p2.run().unwrap();
    // upstream is untouched, the changed node and its downstream recompute
    assert_eq!(second.snapshot(), (0, 5, 5));
}

#[test]
fn packet_field_order_does_not_change_fingerprints() {
    let forward = {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 1])),
                Arc::new(Int64Array::from(vec![1, 2])),
                Arc::new(Int64Array::from(vec![10, 20])),
            ],
        )
        .unwrap();
        Arc::new(TableStream::try_new(batch, &["id"]).unwrap()) as Arc<dyn Stream>
    };
    let reordered = {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("b", DataType::Int64, false),
            Field::new("a", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 1])),
                Arc::new(Int64Array::from(vec![10, 20])),
                Arc::new(Int64Array::from(vec![1, 2])),
            ],
        )
        .unwrap();
        Arc::new(TableStream::try_new(batch, &["id"]).unwrap()) as Arc<dyn Stream>
    };

    assert_eq!(
        forward.fingerprint().unwrap(),
        reordered.fingerprint().unwrap()
    );

    let fingerprint_of = |input: &Arc<dyn Stream>| {
        let pipeline = Pipeline::new("p", Arc::new(MemoryStore::new()));
        let pod = add_pod(Arc::new(AtomicUsize::new(0)), "v1");
        pipeline
            .scope(|| -> Result<()> {
                pod.call_labeled(input, "add")?;
                Ok(())
            })
            .unwrap();
        pipeline.fingerprint().unwrap()
    };
    assert_eq!(fingerprint_of(&forward), fingerprint_of(&reordered));
}

#[test]
fn join_results_are_cached_between_pipelines() {
    let store = Arc::new(MemoryStore::new());

    let left = {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("a", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 1, 4])),
                Arc::new(Int64Array::from(vec![1, 2, 3])),
            ],
        )
        .unwrap();
        Arc::new(TableStream::try_new(batch, &["id"]).unwrap()) as Arc<dyn Stream>
    };
    let right = {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("c", DataType::Int64, false),
        ]));
        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(vec![0, 1, 2])),
                Arc::new(Int64Array::from(vec![7, 8, 9])),
            ],
        )
        .unwrap();
        Arc::new(TableStream::try_new(batch, &["id"]).unwrap()) as Arc<dyn Stream>
    };

    let p1 = Pipeline::new("p1", store.clone());
    p1.scope(|| -> Result<()> {
        Join::with_label("join").apply(&left, &right)?;
        Ok(())
    })
    .unwrap();
    p1.run().unwrap();
    let joined = p1.node("join").unwrap().df().unwrap();
    assert_eq!(joined.num_rows(), 2);

    let p2 = Pipeline::new("p2", store);
    p2.scope(|| -> Result<()> {
        Join::with_label("join").apply(&left, &right)?;
        Ok(())
    })
    .unwrap();
    assert_eq!(p2.node("join").unwrap().df().unwrap(), joined);
}

#[test]
fn parquet_store_memoizes_across_store_instances() {
    let dir = tempfile::tempdir().unwrap();
    let input = numbers_stream();

    let first = Counters::new();
    let p1 = Pipeline::new("p1", Arc::new(ParquetStore::open(dir.path()).unwrap()));
    build_chain(&p1, &input, &first, "v1").unwrap();
    p1.run().unwrap();
    assert_eq!(first.snapshot(), (5, 5, 5));

    // a fresh store over the same directory behaves like a new process
    let second = Counters::new();
    let p2 = Pipeline::new("p2", Arc::new(ParquetStore::open(dir.path()).unwrap()));
    build_chain(&p2, &input, &second, "v1").unwrap();
    p2.run().unwrap();
    assert_eq!(second.snapshot(), (0, 0, 0));

    let summary = p2.node("combine").unwrap().df().unwrap();
    assert_eq!(summary.num_rows(), 5);
}
