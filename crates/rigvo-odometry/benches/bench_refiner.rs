use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;
use rigvo_geometry::pose::vector_to_rotation;
use rigvo_geometry::{RigGeometry, RigPose};
use rigvo_odometry::{PoseRefiner, RefineRequest, RefinerParams, SeededRandom};

/// Normalized correspondences of a deterministic cloud seen before and after `pose`.
fn generate_pairs(n: usize, pose: &RigPose) -> (Vec<DVec3>, Vec<DVec3>) {
    (0..n)
        .map(|i| {
            let fi = i as f64;
            let p = DVec3::new((fi * 0.83).sin() * 3.0, (fi * 0.29).cos() * 2.0, 5.0 + (fi * 1.1).sin() * 2.0);
            let q = pose.transform_point(p);
            // sub-pixel jitter keeps the optimizer from stopping on the first generation
            let jitter = DVec3::new((fi * 7.1).sin() * 1e-3, (fi * 3.7).cos() * 1e-3, 0.0);
            (p / p.z, q / q.z + jitter)
        })
        .unzip()
}

fn bench_refine(c: &mut Criterion) {
    let pose = RigPose::from_rotation_translation(
        vector_to_rotation(DVec3::new(0.01, 0.05, 0.0)),
        DVec3::new(-1.0, 0.0, 0.1),
    );
    let refiner = PoseRefiner::new(RigGeometry::default(), RefinerParams::default());

    let mut group = c.benchmark_group("pose_refiner");
    group.sample_size(10);
    for &n in &[20, 60, 200] {
        let (x1, x2) = generate_pairs(n, &pose);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            let mut rng = SeededRandom::from_seed(0);
            b.iter(|| {
                let request = RefineRequest::new(0, &x1, &x2);
                let _ = std::hint::black_box(refiner.refine(&mut rng, &request));
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_refine);
criterion_main!(benches);
