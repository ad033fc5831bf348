use criterion::{black_box, criterion_group, criterion_main, Criterion};
use odbc_runtime::codec;

fn bench_codec(c: &mut Criterion) {
    let ascii = "SELECT customer_id, order_total FROM orders WHERE region = 'EMEA'".repeat(16);
    let mixed = "caf\u{e9} \u{4e2d}\u{6587} \u{1F600} na\u{ef}ve ".repeat(64);
    let wide_ascii = codec::wide_nts(&ascii);
    let wide_mixed = codec::wide_nts(&mixed);

    c.bench_function("encode_wide_ascii", |b| {
        b.iter(|| codec::wide_nts(black_box(&ascii)))
    });
    c.bench_function("encode_wide_mixed", |b| {
        b.iter(|| codec::wide_nts(black_box(&mixed)))
    });
    c.bench_function("decode_wide_ascii", |b| {
        b.iter(|| codec::string_from_wide_nts(black_box(&wide_ascii)))
    });
    c.bench_function("decode_wide_mixed", |b| {
        b.iter(|| codec::string_from_wide_nts(black_box(&wide_mixed)))
    });
}

criterion_group!(benches, bench_codec);
criterion_main!(benches);
