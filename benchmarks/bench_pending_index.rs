use std::hint::black_box;
use std::thread;

use criterion::{criterion_group, criterion_main, Criterion};

use pairlog::decoder::{JsonDecoder, LineDecoder};
use pairlog::parallel::PendingIndex;
use pairlog::record::Record;

const IDS: usize = 10_000;

fn records(suffix_ts: i64) -> Vec<Record> {
    (0..IDS)
        .map(|i| Record::new(format!("id-{}", i), "req", "h1", suffix_ts + i as i64))
        .collect()
}

fn bench_pair_single_thread(c: &mut Criterion) {
    let starts = records(0);
    let ends = records(5);
    c.bench_function("pending_index_pair_10k", |b| {
        b.iter(|| {
            let index = PendingIndex::new();
            for record in starts.iter().cloned() {
                black_box(index.check_and_insert_or_remove(record));
            }
            for record in ends.iter().cloned() {
                black_box(index.check_and_insert_or_remove(record));
            }
            assert!(index.is_empty());
        });
    });
}

fn bench_pair_four_threads(c: &mut Criterion) {
    let starts = records(0);
    let ends = records(5);
    c.bench_function("pending_index_pair_10k_4_threads", |b| {
        b.iter(|| {
            let index = PendingIndex::new();
            thread::scope(|scope| {
                for chunk in 0..4 {
                    let index = &index;
                    let starts = &starts;
                    let ends = &ends;
                    scope.spawn(move || {
                        // Alternate halves so threads collide on the same ids
                        let (first, second) = if chunk % 2 == 0 {
                            (starts, ends)
                        } else {
                            (ends, starts)
                        };
                        let range = (chunk / 2) * IDS / 2..(chunk / 2 + 1) * IDS / 2;
                        for i in range {
                            let record = if i % 2 == 0 { &first[i] } else { &second[i] };
                            black_box(index.check_and_insert_or_remove(record.clone()));
                        }
                    });
                }
            });
            assert!(index.is_empty());
        });
    });
}

fn bench_decode_line(c: &mut Criterion) {
    let decoder = JsonDecoder::new();
    let line = r#"{"id":"scsmbstgra","type":"APPLICATION_LOG","host":"12345","timestamp":1491377495212}"#;
    c.bench_function("json_decode_line", |b| {
        b.iter(|| {
            black_box(decoder.decode(black_box(line)).ok());
        });
    });
}

criterion_group!(
    pending_index_benches,
    bench_pair_single_thread,
    bench_pair_four_threads,
    bench_decode_line
);
criterion_main!(pending_index_benches);
