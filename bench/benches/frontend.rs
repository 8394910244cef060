use criterion::{criterion_group, criterion_main, Criterion};
use lc::{codegen::Target, compile};
use std::hint::black_box;

static INPUT: &str = include_str!("../../demos/shapes/main.l");

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("check", |b| {
        b.iter(|| {
            let checked = compile::check(black_box(INPUT)).unwrap();
            black_box(checked.program);
        })
    });

    c.bench_function("llvm", |b| {
        b.iter(|| {
            let modules = compile::llvm(black_box(INPUT), Target::x86_64_linux).unwrap();
            black_box(modules.usercode);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
