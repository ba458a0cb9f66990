// Benchmark 测试：参数转换、合并、管道生成与内存存储执行
//
// 运行方式：
// cargo bench --bench pipeline_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use iotsrv_query::query::{VALUES, VALUES_COUNT, VALUES_PER_DEVICE};
use iotsrv_query::storage::memory::apply_stage;
use iotsrv_query::utils::config::QueryConfig;
use iotsrv_query::{coerce, merge, QueryRegistry};
use mongodb::bson::{doc, Document};

const NOW: i64 = 1_717_200_000_000;

fn overrides() -> Vec<(String, String)> {
    vec![
        ("validAtStart".to_string(), "2024-05-01T00:00:00Z".to_string()),
        ("validAtEnd".to_string(), "1717200000000".to_string()),
        ("deviceId".to_string(), "sensor-17".to_string()),
    ]
}

fn readings(count: i64) -> Vec<Document> {
    (0..count)
        .map(|i| {
            doc! {
                "validAt": NOW - (i / 4) * 60_000,
                "receivedAt": NOW - (i / 4) * 60_000 + 25,
                "deviceId": format!("sensor-{}", i % 8),
                "valueType": ["temp", "hum", "co2", "pm25"][(i % 4) as usize],
                "value": i as f64 * 0.5,
            }
        })
        .collect()
}

/// Benchmark: 原始字符串 → 参数值
fn bench_coerce(c: &mut Criterion) {
    let mut group = c.benchmark_group("coerce");
    for raw in ["1717200000000", "2024-05-01T00:00:00Z", "2024-05-01", "sensor-17"] {
        group.bench_with_input(BenchmarkId::from_parameter(raw), raw, |b, raw| {
            b.iter(|| black_box(coerce(raw)));
        });
    }
    group.finish();
}

/// Benchmark: 合并 + 管道生成
fn bench_build_pipeline(c: &mut Criterion) {
    let registry = QueryRegistry::builtin(NOW, &QueryConfig::default());
    let mut group = c.benchmark_group("build_pipeline");

    for name in [VALUES, VALUES_COUNT, VALUES_PER_DEVICE] {
        let definition = match registry.lookup(name) {
            Ok(definition) => definition,
            Err(_) => continue,
        };
        group.bench_function(name, |b| {
            b.iter(|| {
                let params = merge(&definition.default_parameters, overrides());
                black_box(definition.build_pipeline(&params))
            });
        });
    }
    group.finish();
}

/// Benchmark: 内存存储上执行透视管道
fn bench_memory_pivot(c: &mut Criterion) {
    let registry = QueryRegistry::builtin(NOW, &QueryConfig::default());
    let Ok(definition) = registry.lookup(VALUES_PER_DEVICE) else {
        return;
    };
    let params = merge(&definition.default_parameters, Vec::<(String, String)>::new());
    let pipeline = definition.build_pipeline(&params);

    let mut group = c.benchmark_group("memory_pivot");
    for count in [1_000_i64, 10_000] {
        let docs = readings(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &docs, |b, docs| {
            b.iter(|| {
                let mut rows = docs.clone();
                for stage in &pipeline {
                    rows = apply_stage(stage, rows).unwrap();
                }
                black_box(rows)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_coerce, bench_build_pipeline, bench_memory_pivot);

criterion_main!(benches);
