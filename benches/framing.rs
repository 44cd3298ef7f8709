use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use hrpc::wire::{self, Compression, OptionsRecord};

const TAGS: [&str; 3] = ["short", "medium", "tag-with-quite-a-few-more-bytes-in-it"];

fn benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("options_record_round_trip");
    for tag in TAGS {
        group.bench_with_input(BenchmarkId::new("tag", tag), black_box(tag), |b, tag| {
            let record = OptionsRecord {
                tx_compression: Compression::Gzip,
                rx_compression: Compression::None,
                profile_requested: true,
                tag: Some(tag.to_string()),
            };
            b.iter(|| encode_then_decode(black_box(&record)))
        });
    }
    group.finish();

    c.bench_function("call_id_round_trip", |b| {
        b.iter(|| encode_then_decode_call_id(black_box(12_345)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);

#[inline(never)]
fn encode_then_decode(record: &OptionsRecord) -> OptionsRecord {
    let mut buf = Vec::new();
    record.encode(&mut buf).unwrap();
    OptionsRecord::decode(&mut &buf[..]).unwrap()
}

#[inline(never)]
fn encode_then_decode_call_id(id: i32) -> i32 {
    let mut buf = Vec::new();
    wire::write_call_id(&mut buf, id).unwrap();
    wire::read_call_id(&mut &buf[..]).unwrap()
}
