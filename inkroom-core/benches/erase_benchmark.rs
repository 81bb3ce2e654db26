use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use inkroom_core::codec::{decode_stroke, encode_stroke};
use inkroom_core::{
    EraseMatcher, ErasePolicy, Geometry, Layer, Point, StrokeOp, StrokeStyle, WireFormat,
};

/// A wavy stroke of `n` points starting at `origin`.
fn wavy(origin: f64, n: usize) -> Geometry {
    Geometry::polyline((0..n).map(|i| {
        let t = i as f64;
        Point::new(origin + t * 2.0, origin + (t * 0.3).sin() * 10.0)
    }))
}

fn busy_layer(strokes: usize, points: usize) -> Layer {
    let mut layer = Layer::new("bench");
    for s in 0..strokes {
        layer.push(StrokeOp::new(
            0,
            wavy(s as f64 * 7.0, points),
            StrokeStyle {
                width: 4.0,
                ..StrokeStyle::default()
            },
        ));
    }
    layer
}

fn bench_erase_proximity(c: &mut Criterion) {
    let layer = busy_layer(200, 64);
    let eraser = wavy(300.0, 32);
    let matcher = EraseMatcher::new(ErasePolicy::Proximity);

    c.bench_function("erase_proximity_200x64", |b| {
        b.iter(|| black_box(matcher.select(black_box(&eraser), 10.0, &layer)))
    });
}

fn bench_erase_outline(c: &mut Criterion) {
    let layer = busy_layer(200, 64);
    let eraser = wavy(300.0, 32);
    let matcher = EraseMatcher::new(ErasePolicy::Outline);

    c.bench_function("erase_outline_200x64", |b| {
        b.iter(|| black_box(matcher.select(black_box(&eraser), 10.0, &layer)))
    });
}

fn bench_stroke_codec(c: &mut Criterion) {
    let op = StrokeOp::new(0, wavy(0.0, 128), StrokeStyle::default());
    let binary = encode_stroke(&op, WireFormat::Binary).unwrap();
    let json = encode_stroke(&op, WireFormat::Json).unwrap();

    c.bench_function("stroke_decode_binary_128pt", |b| {
        b.iter(|| black_box(decode_stroke(black_box(&binary), WireFormat::Binary).unwrap()))
    });
    c.bench_function("stroke_decode_json_128pt", |b| {
        b.iter(|| black_box(decode_stroke(black_box(&json), WireFormat::Json).unwrap()))
    });
}

fn bench_geometry_key(c: &mut Criterion) {
    let geometry = wavy(0.0, 128);
    c.bench_function("geometry_key_128pt", |b| {
        b.iter(|| black_box(black_box(&geometry).key()))
    });
}

criterion_group!(
    benches,
    bench_erase_proximity,
    bench_erase_outline,
    bench_stroke_codec,
    bench_geometry_key,
);
criterion_main!(benches);
