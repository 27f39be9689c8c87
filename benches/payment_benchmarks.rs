use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use duitku_shop_api::payments::{
    compute_totals,
    signature::{callback_signature, invoice_signature, verify_callback_signature},
    InvoiceLine,
};

const MERCHANT_CODE: &str = "D0001";
const API_KEY: &str = "bench-api-key-0123456789abcdef";

fn signature_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("signatures");

    group.bench_function("invoice_sha256", |b| {
        b.iter(|| {
            invoice_signature(
                black_box(MERCHANT_CODE),
                black_box("1700000000000"),
                black_box(API_KEY),
            )
        })
    });

    let order_id = "6f9c1a52-3b7e-4d8e-9a41-2c5b8f0e7d13";
    group.bench_function("callback_md5", |b| {
        b.iter(|| {
            callback_signature(
                black_box(MERCHANT_CODE),
                black_box(25_000),
                black_box(order_id),
                black_box(API_KEY),
            )
        })
    });

    let provided = callback_signature(MERCHANT_CODE, 25_000, order_id, API_KEY);
    group.bench_function("callback_verify", |b| {
        b.iter(|| {
            verify_callback_signature(
                black_box(MERCHANT_CODE),
                black_box(25_000),
                black_box(order_id),
                black_box(API_KEY),
                black_box(&provided),
            )
        })
    });

    group.finish();
}

fn totals_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_totals");

    for size in [1usize, 10, 100, 1000] {
        let lines: Vec<InvoiceLine> = (0..size)
            .map(|i| InvoiceLine {
                name: format!("Produk {}", i),
                price: 1_000 + i as i64,
                quantity: (i % 5) as i32 + 1,
            })
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &lines, |b, lines| {
            b.iter(|| compute_totals(black_box(lines)))
        });
    }

    group.finish();
}

criterion_group!(benches, signature_benchmark, totals_benchmark);
criterion_main!(benches);
