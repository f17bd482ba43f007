// benches/benchmarks.rs - Performance benchmarks (criterion)
//
// Hot paths per run:
//   1. Selection: ranking and ordering a lane's DAG under a budget
//   2. Validation: checking task payloads against output contracts
//   3. Accounting: ledger updates and quarantine inserts

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;

use tollgate::contract::{FieldSchema, FieldType, OutputContract, SchemaValidator, ValidationError, ViolationKind};
use tollgate::core::budget::{BudgetController, BudgetLimits, ResourceUsage};
use tollgate::core::selector::{SelectionRequest, TaskSelector};
use tollgate::library::{Criticality, DegradationAction, ExecutorKind, TaskDefinition, TaskLibrary};
use tollgate::store::{QuarantineRecord, QuarantineStore};

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Layered DAG: each task depends on up to two tasks of the previous layer.
fn layered_library(n: usize, width: usize) -> Arc<TaskLibrary> {
    let tasks = (0..n)
        .map(|i| {
            let kind = if i % 3 == 0 {
                ExecutorKind::LocalFunction
            } else {
                ExecutorKind::RemoteCall
            };
            let mut t = TaskDefinition::new(format!("task_{i:04}"), "bench", kind)
                .with_budget(100 + (i as u64 % 7) * 50, 0.001 * (1 + i % 11) as f64);
            t.expected_value = 0.1 + (i % 9) as f64 / 10.0;
            t.priority = (i % 4) as u32;
            if i % 25 == 0 {
                t.criticality = Criticality::Blocker;
            }
            if i >= width {
                let layer_start = (i / width - 1) * width;
                t.dependencies.push(format!("task_{:04}", layer_start + i % width));
                if i % 2 == 0 {
                    t.dependencies.push(format!("task_{:04}", layer_start + (i + 1) % width));
                }
                t.dependencies.dedup();
            }
            t
        })
        .collect();
    Arc::new(TaskLibrary::from_definitions(tasks, vec![]).expect("valid bench library"))
}

fn scored_contract() -> OutputContract {
    OutputContract::new(
        "bench.v1",
        FieldSchema::object()
            .with_property(
                "score",
                FieldSchema::of(FieldType::Number).with_range(Some(0.0), Some(100.0)),
                true,
            )
            .with_property(
                "tags",
                FieldSchema::of(FieldType::Array).with_items(FieldSchema::of(FieldType::String)),
                true,
            )
            .with_property(
                "grade",
                FieldSchema::of(FieldType::String).with_enum(vec![json!("a"), json!("b"), json!("c")]),
                false,
            ),
    )
}

// ─── Benchmark: Selection ───────────────────────────────────────────────────

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");
    for n in [50usize, 200, 1000] {
        let selector = TaskSelector::new(layered_library(n, 10));
        let ledger = BudgetController::new();
        let state = ledger
            .init_run("bench", BudgetLimits::new(0, n as f64 * 0.002, 0))
            .expect("init ledger");
        let request = SelectionRequest::lane("bench").with_budget(state);

        group.bench_with_input(BenchmarkId::from_parameter(n), &request, |b, req| {
            b.iter(|| selector.select(black_box(req)))
        });
    }
    group.finish();
}

// ─── Benchmark: Validation ──────────────────────────────────────────────────

fn bench_validation(c: &mut Criterion) {
    let validator = SchemaValidator::new();
    let contract = scored_contract();
    let valid = json!({"score": 42.5, "tags": ["x", "y", "z"], "grade": "b"});
    let invalid = json!({"score": 420, "tags": ["x", 1, null], "grade": "q"});

    let mut group = c.benchmark_group("validation");
    group.bench_function("valid_payload", |b| {
        b.iter(|| validator.validate(black_box(&contract), black_box(&valid)))
    });
    group.bench_function("invalid_payload", |b| {
        b.iter(|| validator.validate(black_box(&contract), black_box(&invalid)))
    });
    group.bench_function("raw_text_payload", |b| {
        let raw = valid.to_string();
        b.iter(|| validator.validate_raw(black_box(&contract), black_box(&raw)))
    });
    group.finish();
}

// ─── Benchmark: Accounting ──────────────────────────────────────────────────

fn bench_accounting(c: &mut Criterion) {
    c.bench_function("budget_record_usage", |b| {
        let ledger = BudgetController::new();
        ledger
            .init_run("bench", BudgetLimits::unbounded())
            .expect("init ledger");
        let usage = ResourceUsage::new(120, 40, 0.0004);
        b.iter(|| ledger.record_usage("bench", black_box(&usage)))
    });

    c.bench_function("quarantine_add_at_capacity", |b| {
        let store = QuarantineStore::new(1000);
        let record = QuarantineRecord {
            id: "q".into(),
            task_id: "task_0001".into(),
            task_version: 1,
            run_id: "bench".into(),
            pipeline_id: None,
            entity_id: None,
            contract_id: "bench.v1".into(),
            raw_output: json!({"score": 420}),
            validation_errors: vec![ValidationError::new(
                "$.score",
                ViolationKind::OutOfRange,
                "420 is above maximum 100",
            )],
            degradation: DegradationAction::Quarantine,
            created_at: chrono::Utc::now(),
        };
        b.iter(|| store.add(black_box(record.clone())))
    });
}

criterion_group!(benches, bench_selection, bench_validation, bench_accounting);
criterion_main!(benches);
