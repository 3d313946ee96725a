use criterion::{black_box, criterion_group, criterion_main, Criterion};
use mentorgate::guards::PayloadSanitizer;
use mentorgate::orchestrator::trim_history;
use mentorgate::safety::heuristic::HeuristicScanner;
use mentorgate::safety::SafetyScanner;
use serde_json::json;
use tokio::runtime::Runtime;

fn bench_sanitizer(c: &mut Criterion) {
    let sanitizer = PayloadSanitizer::new(10_000);
    let clean = serde_json::to_vec(&json!({
        "name": "Sam",
        "notes": "Looking for a mentor in distributed systems. ".repeat(40),
    }))
    .unwrap();
    let hostile = serde_json::to_vec(&json!({"q": "1' OR '1'='1; DROP TABLE users --"})).unwrap();
    let oversized = vec![b'x'; 20_000];

    c.bench_function("sanitize_clean_2k", |b| {
        b.iter(|| black_box(sanitizer.inspect(black_box(&clean))))
    });
    c.bench_function("sanitize_hostile", |b| {
        b.iter(|| black_box(sanitizer.inspect(black_box(&hostile))))
    });
    c.bench_function("sanitize_oversized", |b| {
        b.iter(|| black_box(sanitizer.inspect(black_box(&oversized))))
    });
}

fn bench_trim(c: &mut Criterion) {
    let mut history = String::new();
    for i in 0..3 {
        history.push_str(&format!("User: question {} {}\n", i, "detail ".repeat(120)));
        history.push_str(&format!("Assistant: answer {} {}\n", i, "more ".repeat(150)));
    }
    c.bench_function("trim_history_over_budget", |b| {
        b.iter(|| black_box(trim_history(black_box(&history), 2000)))
    });
    c.bench_function("trim_history_within_budget", |b| {
        b.iter(|| black_box(trim_history(black_box("User: hi\nAssistant: hello\n"), 2000)))
    });
}

fn bench_heuristic_scan(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let topics: Vec<String> = ["politics", "crypto", "nsfw", "gambling"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let scanner = HeuristicScanner::new(&topics);
    let text = "How should I prepare for a mentoring session about career growth? ".repeat(20);
    c.bench_function("heuristic_scan_injection", |b| {
        b.iter(|| rt.block_on(scanner.scan_injection(black_box(&text))))
    });
    c.bench_function("heuristic_scan_topics", |b| {
        b.iter(|| rt.block_on(scanner.scan_topics(black_box(&text))))
    });
}

criterion_group!(benches, bench_sanitizer, bench_trim, bench_heuristic_scan);
criterion_main!(benches);
