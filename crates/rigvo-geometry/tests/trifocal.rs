use glam::DVec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rigvo_geometry::pose::vector_to_rotation;
use rigvo_geometry::{GeometryError, RigPose, TrifocalTensor};

fn angle_between(a: DVec3, b: DVec3) -> f64 {
    a.normalize().dot(b.normalize()).clamp(-1.0, 1.0).acos().to_degrees()
}

fn rotation_error_deg(a: &RigPose, b: &RigPose) -> f64 {
    let r = a.rotation().transpose() * b.rotation();
    let cos = ((r.x_axis.x + r.y_axis.y + r.z_axis.z - 1.0) / 2.0).clamp(-1.0, 1.0);
    cos.acos().to_degrees()
}

fn project_scene(
    rng: &mut StdRng,
    n: usize,
    poses: &[RigPose; 3],
    noise: f64,
) -> [Vec<DVec3>; 3] {
    let mut out: [Vec<DVec3>; 3] = Default::default();
    for _ in 0..n {
        let p = DVec3::new(
            rng.random_range(-3.0..3.0),
            rng.random_range(-2.0..2.0),
            rng.random_range(4.0..9.0),
        );
        for (view, pose) in poses.iter().enumerate() {
            let q = pose.transform_point(p);
            let jitter = DVec3::new(
                rng.random_range(-noise..=noise),
                rng.random_range(-noise..=noise),
                0.0,
            );
            out[view].push(q / q.z + jitter);
        }
    }
    out
}

#[test]
fn recovers_three_view_poses_without_noise() -> Result<(), GeometryError> {
    let mut rng = StdRng::seed_from_u64(7);
    let ab = RigPose::from_rotation_translation(
        vector_to_rotation(DVec3::new(0.01, 0.08, -0.02)),
        DVec3::new(-0.7, 0.05, 0.2),
    );
    let ac = RigPose::from_rotation_translation(
        vector_to_rotation(DVec3::new(0.02, 0.17, -0.03)),
        DVec3::new(-1.5, 0.1, 0.35),
    );
    let x = project_scene(&mut rng, 25, &[RigPose::IDENTITY, ab, ac], 0.0);

    let tensor = TrifocalTensor::from_points(&x[0], &x[1], &x[2])?;
    let poses = tensor.extract_poses()?;

    assert!(rotation_error_deg(&poses.ab, &ab) < 1.0);
    assert!(rotation_error_deg(&poses.ac, &ac) < 1.0);
    assert!(angle_between(poses.ab.translation(), ab.translation()) < 1.0);
    assert!(angle_between(poses.ac.translation(), ac.translation()) < 1.0);
    assert_eq!(poses.inliers, 25);

    // the second baseline is expressed in units of the first one
    let ratio = poses.ac.translation().length() / poses.ab.translation().length();
    let expected = ac.translation().length() / ab.translation().length();
    assert!((ratio - expected).abs() / expected < 1e-3);
    Ok(())
}

#[test]
fn tolerates_small_noise() -> Result<(), GeometryError> {
    let mut rng = StdRng::seed_from_u64(11);
    let ab = RigPose::from_rotation_translation(
        vector_to_rotation(DVec3::new(0.0, 0.05, 0.0)),
        DVec3::new(-1.0, 0.0, 0.1),
    );
    let ac = RigPose::from_rotation_translation(
        vector_to_rotation(DVec3::new(0.0, 0.1, 0.0)),
        DVec3::new(-2.0, 0.0, 0.2),
    );
    // roughly a tenth of a pixel at a 400px focal length
    let x = project_scene(&mut rng, 60, &[RigPose::IDENTITY, ab, ac], 2.5e-4);

    let poses = TrifocalTensor::from_points(&x[0], &x[1], &x[2])?.extract_poses()?;
    assert!(rotation_error_deg(&poses.ab, &ab) < 2.0);
    assert!(angle_between(poses.ab.translation(), ab.translation()) < 10.0);
    Ok(())
}

#[test]
fn rejects_too_few_points() {
    let x = vec![DVec3::Z; 6];
    assert!(matches!(
        TrifocalTensor::from_points(&x, &x, &x),
        Err(GeometryError::InsufficientCorrespondences { required: 7, actual: 6 })
    ));
}
