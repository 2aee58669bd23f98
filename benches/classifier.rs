use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use session_engine::StreamClassifier;

fn reasoning_stream(chunks: usize) -> Vec<String> {
    let mut stream = Vec::with_capacity(chunks * 4);
    for i in 0..chunks {
        stream.push(format!("visible text {} ", i));
        stream.push("<thi".to_string());
        stream.push(format!("nk>step {} of the plan", i));
        stream.push("</think> ".to_string());
    }
    stream
}

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");
    for chunks in [16usize, 256, 4096] {
        let stream = reasoning_stream(chunks);
        group.bench_with_input(BenchmarkId::from_parameter(chunks), &stream, |b, stream| {
            b.iter(|| {
                let mut classifier = StreamClassifier::default();
                for chunk in stream {
                    classifier.handle(black_box(chunk));
                }
                black_box(classifier.result())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_classifier);
criterion_main!(benches);
