use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;
use rigvo_geometry::essential::essential_8point;
use rigvo_geometry::pose::vector_to_rotation;
use rigvo_geometry::{RigPose, TrifocalTensor};

/// Project a deterministic point cloud into three views.
fn generate_triplets(n: usize) -> [Vec<DVec3>; 3] {
    let ab = RigPose::from_rotation_translation(
        vector_to_rotation(DVec3::new(0.01, 0.06, 0.0)),
        DVec3::new(-0.5, 0.0, 0.1),
    );
    let ac = RigPose::from_rotation_translation(
        vector_to_rotation(DVec3::new(0.02, 0.12, 0.0)),
        DVec3::new(-1.0, 0.05, 0.2),
    );
    let mut out: [Vec<DVec3>; 3] = Default::default();
    for i in 0..n {
        let fi = i as f64;
        let p = DVec3::new((fi * 0.61).sin() * 3.0, (fi * 1.7).cos() * 2.0, 6.0 + (fi * 0.3).sin() * 2.0);
        for (view, pose) in [RigPose::IDENTITY, ab, ac].iter().enumerate() {
            let q = pose.transform_point(p);
            out[view].push(q / q.z);
        }
    }
    out
}

fn bench_trifocal_from_points(c: &mut Criterion) {
    let mut group = c.benchmark_group("trifocal_from_points");
    for &n in &[10, 50, 200] {
        let x = generate_triplets(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = std::hint::black_box(TrifocalTensor::from_points(&x[0], &x[1], &x[2]));
            });
        });
    }
    group.finish();
}

fn bench_trifocal_extract_poses(c: &mut Criterion) {
    let mut group = c.benchmark_group("trifocal_extract_poses");
    for &n in &[10, 50, 200] {
        let x = generate_triplets(n);
        let Ok(tensor) = TrifocalTensor::from_points(&x[0], &x[1], &x[2]) else {
            continue;
        };
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = std::hint::black_box(tensor.extract_poses());
            });
        });
    }
    group.finish();
}

fn bench_essential_8point(c: &mut Criterion) {
    let mut group = c.benchmark_group("essential_8point");
    for &n in &[8, 24, 200] {
        let x = generate_triplets(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let _ = std::hint::black_box(essential_8point(&x[0], &x[1]));
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_trifocal_from_points,
    bench_trifocal_extract_poses,
    bench_essential_8point
);
criterion_main!(benches);
