use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use padtrace::utils;
use rand::{Rng, SeedableRng};

fn generate_document(length: u64) -> String {
    // generate inputs from fixed seeds
    let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(length); /* define specific algorithm to ensure reproducibility */
    let mut input = String::new();
    for _ in 0..length {
        input.push(rng.gen());
    }

    // sprinkle paragraph breaks the way a real pad has them
    for _ in 0..(length / 20) {
        let mut pos = rng.gen_range(0..input.len());
        while !input.is_char_boundary(pos) {
            pos = rng.gen_range(0..input.len());
        }
        input.insert(pos, '\n');
    }

    input
}

fn generate_payloads(length: u64) -> Vec<String> {
    let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(length.wrapping_mul(31));
    (0..64)
        .map(|_| {
            let payload_len = rng.gen_range(1..12);
            (0..payload_len).map(|_| rng.gen::<char>()).collect()
        })
        .collect()
}

fn bench_splice_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("splice_insert");
    for length in [500u64, 1000u64, 5000u64, 10000u64].into_iter() {
        let document = generate_document(length);
        let payloads = generate_payloads(length);
        let char_len = utils::char_len(&document);

        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(length);
        let positions: Vec<usize> = (0..payloads.len())
            .map(|_| rng.gen_range(0..=char_len))
            .collect();

        group.bench_with_input(
            BenchmarkId::new("Naive", length),
            &(&document, &payloads, &positions),
            |b, (document, payloads, positions)| {
                b.iter(|| {
                    let mut text = (*document).clone();
                    for (payload, &pos) in payloads.iter().zip(positions.iter()) {
                        utils::splice_insert_naive(&mut text, pos, payload);
                    }
                    text
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("Optimized", length),
            &(&document, &payloads, &positions),
            |b, (document, payloads, positions)| {
                b.iter(|| {
                    let mut text = (*document).clone();
                    for (payload, &pos) in payloads.iter().zip(positions.iter()) {
                        utils::splice_insert_optimized(&mut text, pos, payload);
                    }
                    text
                });
            },
        );
    }
}

fn bench_splice_delete(c: &mut Criterion) {
    let mut group = c.benchmark_group("splice_delete");
    for length in [500u64, 1000u64, 5000u64, 10000u64].into_iter() {
        let document = generate_document(length);
        let char_len = utils::char_len(&document);

        // deletions shrink the text, so precompute spans that stay valid as
        // long as they are replayed in order
        let mut rng = rand_xoshiro::Xoshiro256PlusPlus::seed_from_u64(length.wrapping_mul(17));
        let mut remaining = char_len;
        let mut spans: Vec<(usize, usize)> = Vec::new();
        for _ in 0..64 {
            if remaining < 2 {
                break;
            }
            let pos = rng.gen_range(0..remaining - 1);
            let count = rng.gen_range(1..=(remaining - pos).min(8));
            spans.push((pos, count));
            remaining -= count;
        }

        group.bench_with_input(
            BenchmarkId::new("Naive", length),
            &(&document, &spans),
            |b, (document, spans)| {
                b.iter(|| {
                    let mut text = (*document).clone();
                    for &(pos, count) in spans.iter() {
                        utils::splice_delete_naive(&mut text, pos, count);
                    }
                    text
                });
            },
        );
        group.bench_with_input(
            BenchmarkId::new("Optimized", length),
            &(&document, &spans),
            |b, (document, spans)| {
                b.iter(|| {
                    let mut text = (*document).clone();
                    for &(pos, count) in spans.iter() {
                        utils::splice_delete_optimized(&mut text, pos, count);
                    }
                    text
                });
            },
        );
    }
}

criterion_group!(benches, bench_splice_insert, bench_splice_delete);
criterion_main!(benches);
