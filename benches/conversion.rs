use std::fmt::Write;
use std::hint::black_box;
use std::io::Cursor;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use rust_data_ingestion::ingestion::{ConversionHints, ConverterRegistry};

fn csv_input(rows: usize) -> Vec<u8> {
    let mut s = String::from("id,name,score,active\n");
    for i in 0..rows {
        let _ = writeln!(s, "{i},name-{i},{}.5,{}", i % 100, i % 2 == 0);
    }
    s.into_bytes()
}

fn xml_input(items: usize) -> Vec<u8> {
    let mut s = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><catalog>"#);
    for i in 0..items {
        let _ = write!(s, "<item><id>{i}</id><name>item {i}</name><tags><tag>a</tag><tag>b</tag></tags></item>");
    }
    s.push_str("</catalog>");
    s.into_bytes()
}

fn json_input(records: usize) -> Vec<u8> {
    let rows: Vec<serde_json::Value> = (0..records)
        .map(|i| serde_json::json!({"id": i, "name": format!("name-{i}"), "nested": {"ok": true}}))
        .collect();
    serde_json::to_vec(&rows).unwrap()
}

/// Convert with a known format, per input size.
fn bench_convert(c: &mut Criterion) {
    let registry = ConverterRegistry::builtin();
    let hints = ConversionHints::default();
    let inputs: [(&str, fn(usize) -> Vec<u8>); 3] = [("csv", csv_input), ("xml", xml_input), ("json", json_input)];

    for (tag, make) in inputs {
        let converter = registry.resolve(tag).unwrap();
        let mut group = c.benchmark_group(format!("convert_{tag}"));
        for size in [100, 10_000] {
            let input = make(size);
            group.throughput(Throughput::Bytes(input.len() as u64));
            group.bench_function(format!("records_{size}"), |b| {
                b.iter(|| {
                    let out = converter
                        .convert(&mut Cursor::new(black_box(input.as_slice())), &hints)
                        .expect("conversion should succeed");
                    black_box(out)
                });
            });
        }
        group.finish();
    }
}

/// Detection walks converters in priority order, so CSV pays for failed JSON and XML probes.
fn bench_detect(c: &mut Criterion) {
    let registry = ConverterRegistry::builtin();
    let mut group = c.benchmark_group("detect");
    for (name, input) in [("csv", csv_input(1_000)), ("xml", xml_input(1_000)), ("json", json_input(1_000))] {
        group.throughput(Throughput::Bytes(input.len() as u64));
        group.bench_function(name, |b| {
            b.iter(|| {
                let converter = registry
                    .detect(&mut Cursor::new(black_box(input.as_slice())))
                    .expect("format should be detected");
                black_box(converter.format())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_convert, bench_detect);
criterion_main!(benches);
