// mos65gen - A 6502/65C02 code generator emitting 64tass assembly
// Copyright (C) 2026  Marcel Joachim Kloubert <marcel@kloubert.dev>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Performance benchmarks for the mos65gen code generator.
//!
//! Run with: cargo bench
//!
//! Results are saved to target/criterion/ with HTML reports.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mos65gen::codegen::generate;
use mos65gen::config::CompilationOptions;
use mos65gen::reader::{parse, read_program, tokenize};
use mos65gen::Diagnostics;
use std::fs;

const SIZES: [&str; 3] = ["small", "medium", "large"];

// ============================================================================
// Benchmark Inputs
// ============================================================================

fn load_input(name: &str) -> String {
    let path = format!("benches/inputs/{}.p8t", name);
    fs::read_to_string(&path).unwrap_or_else(|_| panic!("Failed to load benchmark input: {}", path))
}

// ============================================================================
// Reader Benchmarks
// ============================================================================

fn bench_tokenize(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenize");
    for size in SIZES {
        let source = load_input(size);
        group.throughput(Throughput::Bytes(source.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, src| {
            b.iter(|| tokenize(black_box(src)))
        });
    }
    group.finish();
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for size in SIZES {
        let source = load_input(size);
        group.throughput(Throughput::Elements(source.lines().count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, src| {
            b.iter(|| parse("bench", black_box(src)))
        });
    }
    group.finish();
}

fn bench_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_program");
    for size in SIZES {
        let source = load_input(size);
        group.throughput(Throughput::Elements(source.lines().count() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &source, |b, src| {
            b.iter(|| read_program("bench", black_box(src)))
        });
    }
    group.finish();
}

// ============================================================================
// Code Generation Benchmarks
// ============================================================================

fn bench_codegen(c: &mut Criterion) {
    let mut group = c.benchmark_group("codegen");
    for size in SIZES {
        let program = read_program("bench", &load_input(size)).unwrap();
        group.bench_with_input(BenchmarkId::new("optimized", size), &program, |b, program| {
            b.iter(|| {
                let mut diagnostics = Diagnostics::new();
                generate(black_box(program), CompilationOptions::default(), &mut diagnostics)
            })
        });
        group.bench_with_input(BenchmarkId::new("unoptimized", size), &program, |b, program| {
            b.iter(|| {
                let mut diagnostics = Diagnostics::new();
                let options = CompilationOptions::new().with_optimize(false);
                generate(black_box(program), options, &mut diagnostics)
            })
        });
    }
    group.finish();
}

// ============================================================================
// End-to-End Benchmarks
// ============================================================================

fn bench_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile");
    for size in SIZES {
        let source = load_input(size);
        group.throughput(Throughput::Elements(source.lines().count() as u64));
        group.bench_with_input(BenchmarkId::new("full", size), &source, |b, src| {
            b.iter(|| mos65gen::compile("bench", black_box(src), CompilationOptions::default()))
        });
    }
    group.finish();
}

fn bench_assemble(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble");
    for size in ["small", "medium"] {
        let assembly = mos65gen::compile("bench", &load_input(size), CompilationOptions::default()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &assembly, |b, assembly| {
            b.iter(|| mos65gen::assemble(black_box(assembly)))
        });
    }
    group.finish();
}

// ============================================================================
// Micro-Benchmarks
// ============================================================================

fn bench_micro(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro");

    let minimal = "main {\n  sub start() {\n  }\n}\n";
    group.bench_function("minimal_program", |b| {
        b.iter(|| mos65gen::compile("micro", black_box(minimal), CompilationOptions::default()))
    });

    let arithmetic = "main {\n  uword w\n  sub start() {\n    w = (w + 3) * 7 / (w - 1)\n  }\n}\n";
    group.bench_function("word_arithmetic", |b| {
        b.iter(|| mos65gen::compile("micro", black_box(arithmetic), CompilationOptions::default()))
    });

    let floats = "main {\n  float f\n  sub start() {\n    f = f * 1.5 + 0.25\n  }\n}\n";
    group.bench_function("float_arithmetic", |b| {
        b.iter(|| mos65gen::compile("micro", black_box(floats), CompilationOptions::new().with_floats(true)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_tokenize,
    bench_parse,
    bench_read,
    bench_codegen,
    bench_compile,
    bench_assemble,
    bench_micro
);
criterion_main!(benches);
