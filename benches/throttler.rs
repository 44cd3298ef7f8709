use criterion::{black_box, criterion_group, criterion_main, Criterion};

use hrpc::Throttler;

fn benchmark(c: &mut Criterion) {
    c.bench_function("throttler_increase_decrease_uncontended", |b| {
        let throttler = Throttler::new(1024 * 1024);
        b.iter(|| cycle(&throttler, black_box(256)))
    });
}

criterion_group!(benches, benchmark);
criterion_main!(benches);

#[inline(never)]
fn cycle(throttler: &Throttler, bytes: u64) {
    throttler.increase(bytes);
    throttler.decrease(bytes);
}
