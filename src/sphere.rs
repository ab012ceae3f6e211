//! Spherical coordinates and the real, antipodally symmetric spherical
//! harmonic basis used by the Q-ball reconstruction.
//!
//! Only even degrees `k` are ever evaluated, so every basis function is
//! invariant under `v -> -v`. Coefficients are laid out with
//! [`coefficient_index`], i.e. degree by degree with `m` running from `-k`
//! to `k`.

use std::f64::consts::PI;

use nalgebra::Vector3;

const RADIUS_EPS: f64 = 1e-12;

/// A point on the sphere in the physics convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spherical {
    /// Azimuth in `(-pi, pi]`.
    pub phi: f64,
    /// Polar angle measured from +z, in `[0, pi]`.
    pub theta: f64,
    pub radius: f64,
}

impl Spherical {
    /// Convert a Cartesian vector. Degenerate (near-zero) vectors map to the
    /// equator at `phi = pi/2`.
    pub fn from_cartesian(v: &Vector3<f64>) -> Self {
        let radius = v.norm();
        if radius < RADIUS_EPS {
            return Self {
                phi: PI / 2.0,
                theta: PI / 2.0,
                radius,
            };
        }
        Self {
            phi: v.y.atan2(v.x),
            theta: (v.z / radius).clamp(-1.0, 1.0).acos(),
            radius,
        }
    }
}

/// Number of coefficients of an even-degree basis truncated at `order`.
pub const fn coefficient_count(order: usize) -> usize {
    (order + 1) * (order + 2) / 2
}

/// Position of the `(k, m)` basis function in a coefficient vector.
pub fn coefficient_index(k: usize, m: i64) -> usize {
    let k = k as i64;
    ((k * k + k + 2) / 2 + m - 1) as usize
}

/// `P_l(0)`, the Legendre polynomial of degree `l` evaluated at zero.
///
/// Zero for odd degrees, `(-1)^(l/2) (l-1)!! / l!!` otherwise.
pub fn legendre0(l: usize) -> f64 {
    if l % 2 != 0 {
        return 0.0;
    }
    let odd: f64 = (1..l).step_by(2).map(|i| i as f64).product();
    let even: f64 = (2..=l).step_by(2).map(|i| i as f64).product();
    let sign = if (l / 2) % 2 == 0 { 1.0 } else { -1.0 };
    sign * odd / even
}

/// Associated Legendre function `P_l^m(x)` with the Condon-Shortley phase,
/// for `0 <= m <= l` and `|x| <= 1`.
pub fn associated_legendre(l: usize, m: usize, x: f64) -> f64 {
    debug_assert!(m <= l);
    let mut pmm = 1.0;
    if m > 0 {
        let somx2 = ((1.0 - x) * (1.0 + x)).max(0.0).sqrt();
        let mut fact = 1.0;
        for _ in 0..m {
            pmm *= -fact * somx2;
            fact += 2.0;
        }
    }
    if l == m {
        return pmm;
    }
    let mut pmmp1 = x * (2 * m + 1) as f64 * pmm;
    if l == m + 1 {
        return pmmp1;
    }
    let mut pll = 0.0;
    for ll in (m + 2)..=l {
        pll = (x * (2 * ll - 1) as f64 * pmmp1 - (ll + m - 1) as f64 * pmm) / (ll - m) as f64;
        pmm = pmmp1;
        pmmp1 = pll;
    }
    pll
}

fn normalization(l: usize, m: usize) -> f64 {
    // (l - m)! / (l + m)!
    let ratio: f64 = ((l - m + 1)..=(l + m)).map(|i| 1.0 / i as f64).product();
    ((2 * l + 1) as f64 / (4.0 * PI) * ratio).sqrt()
}

/// Real spherical harmonic `Y_j` for degree `k` and order `m` in `[-k, k]`.
///
/// Negative orders carry the cosine part, positive orders the sine part,
/// both scaled by `sqrt(2)` so that the basis is orthonormal.
pub fn real_harmonic(m: i64, k: usize, theta: f64, phi: f64) -> f64 {
    let abs_m = m.unsigned_abs() as usize;
    if abs_m > k {
        return 0.0;
    }
    let plm = normalization(k, abs_m) * associated_legendre(k, abs_m, theta.cos());
    match m {
        0 => plm,
        m if m < 0 => std::f64::consts::SQRT_2 * plm * (abs_m as f64 * phi).cos(),
        _ => std::f64::consts::SQRT_2 * plm * (abs_m as f64 * phi).sin(),
    }
}

/// Iterate `(j, k, m)` over every coefficient of an even basis up to `order`.
pub fn coefficients(order: usize) -> impl Iterator<Item = (usize, usize, i64)> {
    (0..=order).step_by(2).flat_map(|k| {
        let k_i = k as i64;
        (-k_i..=k_i).map(move |m| (coefficient_index(k, m), k, m))
    })
}
