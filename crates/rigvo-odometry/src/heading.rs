use std::f64::consts::{PI, TAU};

/// Number of cameras on the horizontal ring of the rig.
pub const RING_CAMERAS: usize = 5;

/// Heading of the rig when camera `camera` faces the direction of travel.
///
/// Ring cameras are spaced evenly and numbered clockwise from heading zero. The upward camera
/// has no meaningful heading and returns `None`.
pub fn expected_heading(camera: usize) -> Option<f64> {
    (camera < RING_CAMERAS)
        .then(|| (TAU - (TAU / RING_CAMERAS as f64) * camera as f64).rem_euclid(TAU))
}

/// Absolute difference of two angles, wrapped into `[0, pi]`.
pub fn angular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    if d > PI {
        TAU - d
    } else {
        d
    }
}

/// Whether `heading` lies inside the arc of half width `half_arc` centred on `expected`.
pub fn heading_within(heading: f64, expected: f64, half_arc: f64) -> bool {
    angular_distance(heading, expected) < half_arc
}

/// Circular mean of two headings, in `[0, 2pi)`.
pub fn mean_bearing(a: f64, b: f64) -> f64 {
    let (s, c) = (a.sin() + b.sin(), a.cos() + b.cos());
    if s.abs() < 1e-15 && c.abs() < 1e-15 {
        // opposite headings have no mean, fall back to the first one
        return a.rem_euclid(TAU);
    }
    s.atan2(c).rem_euclid(TAU)
}
