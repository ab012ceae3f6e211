//! Canonical output directions for the ODF.
//!
//! Points follow a generalized spiral: heights are spaced evenly in `z`
//! from the south to the north pole, and the azimuth advances by a step
//! inversely proportional to the radius of the current latitude circle.
//! The set is deterministic for a given count.

use std::f64::consts::PI;

use nalgebra::Vector3;

/// Distribute `count` unit vectors over the sphere.
pub fn distribute_point_shell(count: usize) -> Vec<Vector3<f64>> {
    match count {
        0 => return Vec::new(),
        1 => return vec![Vector3::z()],
        _ => {}
    }

    let step = (4.0 * PI).sqrt();
    let last = (count - 1) as f64;
    let mut phi = 0.0;

    (0..count)
        .map(|i| {
            let h = -1.0 + 2.0 * i as f64 / last;
            if i > 0 && i < count - 1 {
                phi += step / (count as f64 * (1.0 - h * h)).sqrt();
            } else {
                phi = 0.0;
            }
            let ring = (1.0 - h * h).max(0.0).sqrt();
            Vector3::new(ring * phi.cos(), ring * phi.sin(), h)
        })
        .collect()
}
