//! Pipeline hot-path benchmarks
//!
//! Distance computation and row validation run once per row; file ingestion
//! measures the whole per-row path including the metadata cache.

#![allow(clippy::unwrap_used)] // Benchmarks are allowed to use unwrap for simplicity
#![allow(clippy::expect_used)] // Benchmarks are allowed to use expect for simplicity

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::StreamExt;
use std::sync::Arc;
use tokio::runtime::Runtime;

use fleet_telemetry::{
    geo::{distance_km, Coordinates},
    pipeline::{RawRow, RecordValidator},
    CacheConfig, MemoryCache, MetadataCache, StreamIngestor,
};

fn bench_distance(c: &mut Criterion) {
    let depot = Coordinates::new(12.9716, 77.5946);
    let position = Coordinates::new(12.97, 77.59);

    c.bench_function("distance_km", |b| {
        b.iter(|| black_box(distance_km(black_box(position), black_box(depot)).unwrap()));
    });
}

fn bench_validation(c: &mut Criterion) {
    let validator = RecordValidator::new();
    let row = RawRow {
        vehicle_id: Some("VH_001".to_string()),
        timestamp: Some("2024-03-01T10:15:00".to_string()),
        lat: Some("12.97".to_string()),
        lon: Some("77.59".to_string()),
        speed_kmh: Some("40".to_string()),
        engine_status: Some("moving".to_string()),
        fuel_level: Some("80".to_string()),
    };

    c.bench_function("validate_row", |b| {
        b.iter(|| black_box(validator.validate(black_box(&row)).unwrap()));
    });
}

fn bench_ingestion(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let metadata = MetadataCache::new(
        Arc::new(MemoryCache::with_capacity(1024).unwrap()),
        &CacheConfig::default(),
    );
    let ingestor = StreamIngestor::new(Arc::new(metadata));

    let mut group = c.benchmark_group("ingestion");
    for rows in [100_usize, 1_000] {
        let csv = create_csv(rows);
        group.throughput(Throughput::Elements(rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &csv, |b, csv| {
            b.iter(|| {
                rt.block_on(async {
                    let mut stream = ingestor.ingest(csv.as_bytes()).unwrap();
                    let mut enriched = 0_usize;
                    while let Some(outcome) = stream.next().await {
                        if outcome.unwrap().is_enriched() {
                            enriched += 1;
                        }
                    }
                    black_box(enriched)
                })
            });
        });
    }
    group.finish();
}

fn create_csv(rows: usize) -> String {
    let mut csv = String::from("vehicle_id,timestamp,lat,lon,speed_kmh,engine_status,fuel_level\n");
    for i in 0..rows {
        let status = if i % 3 == 0 { "idle" } else { "moving" };
        csv.push_str(&format!(
            "VH_{:03},2024-03-01T10:{:02}:00,12.97,77.59,{},{},{}\n",
            i % 50,
            i % 60,
            i % 130,
            status,
            i % 101
        ));
    }
    csv
}

criterion_group!(benches, bench_distance, bench_validation, bench_ingestion);
criterion_main!(benches);
