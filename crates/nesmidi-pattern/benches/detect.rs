use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nesmidi_core::{Channel, ChannelTimeline, DiagnosticSink, FrameCell, PatternDetectorConfig};
use nesmidi_pattern::PatternDetector;

fn synthetic_timeline(frames: usize) -> ChannelTimeline {
    (0..frames)
        .map(|i| FrameCell {
            note: Some(60 + (i % 12) as u8),
            volume: 10,
            timer: (100 + i % 200) as u16,
            control_byte: 0xB0,
            retrigger: i % 16 == 0,
        })
        .collect()
}

fn bench_candidate_enumeration(c: &mut Criterion) {
    let detector = PatternDetector::new(PatternDetectorConfig::default());
    let timeline = synthetic_timeline(20_000);

    c.bench_function("detect_long_timeline", |b| {
        b.iter(|| {
            let mut diagnostics = DiagnosticSink::new();
            let mut timelines: [ChannelTimeline; 5] = Default::default();
            timelines[Channel::Pulse1.index()] = timeline.clone();
            let result = detector.detect_all(black_box(&timelines), &mut diagnostics);
            black_box(result)
        })
    });
}

criterion_group!(benches, bench_candidate_enumeration);
criterion_main!(benches);
