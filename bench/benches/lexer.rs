use criterion::{criterion_group, criterion_main, Criterion};
use lc::{lexer, lexer::SUGGESTED_TOKENS_CAPACITY};
use std::hint::black_box;

static INPUT: &str = include_str!("../../demos/shapes/main.l");

fn lexer(input: &str, tokens: &mut Vec<lc::token::Token>) {
    lexer::lex(input, tokens);
    let significant = tokens.iter().filter(|t| !t.kind.is_trivia()).count();
    black_box(significant);
}

fn criterion_benchmark(c: &mut Criterion) {
    let mut tokens = Vec::with_capacity(SUGGESTED_TOKENS_CAPACITY);

    c.bench_function("lexer", |b| {
        b.iter(|| {
            tokens.clear();
            black_box(lexer(black_box(INPUT), &mut tokens));
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
