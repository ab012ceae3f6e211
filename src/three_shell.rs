//! Analytical reconstruction from three shells at b-values `b, 2b, 3b`.
//!
//! The attenuations `E1, E2, E3` of every sampling direction are modelled as
//! a two-compartment mixture `E_n = lambda alpha^n + (1 - lambda) beta^n`.
//! The measured triple is first projected onto the region where such a
//! model exists ([`project_attenuation`]), the compartment parameters are
//! solved from the three moments ([`estimate_compartments`]), projected once
//! more onto their admissible region ([`project_compartments`]) and then
//! blended into one double-log signal that goes through the same harmonic
//! fit as the single-shell path.

use std::f64::consts::PI;

use nalgebra::DVector;

use crate::filter::VoxelReconstructor;
use crate::gradients::ShellSampling;
use crate::matrices::ReconstructionMatrices;
use crate::signal::{
    baseline_average, double_logarithm, normalize_by_baseline, normalize_odf,
    passes_baseline_gate, threshold, threshold_value,
};

/// Width of the smooth clamp applied to attenuations.
pub const THRESHOLD_SIGMA: f64 = 0.01;

/// Margin kept from the boundary of the feasible regions.
pub const PROJECTION_DELTA: f64 = 0.01;

/// Distance assigned to inadmissible candidates.
const INADMISSIBLE_DISTANCE: f64 = 1e20;

/// Starting value of the candidate search; only admissible candidates can
/// beat it.
const SEARCH_START: f64 = 999.0;

/// Below this `E2 - E1^2` the signal is treated as mono-exponential.
const MONO_EXPONENTIAL_EPS: f64 = 1e-12;

/// Region of the decay-fraction plane a measured triple falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttenuationRegion {
    BEdge,
    ACorner,
    LowerEdge,
    UpperCorner,
    UpperEdge,
    LowerCorner,
    Interior,
}

/// Decay fractions `a0, b0` of a log-attenuation triple and the derived
/// coordinates the regions are defined on.
struct DecayFractions {
    a0: f64,
    b0: f64,
    ta: f64,
    tb: f64,
    e: f64,
    m: f64,
}

impl DecayFractions {
    fn new(a0: f64, b0: f64) -> Self {
        let ta = 3.0 * a0;
        let tb = 3.0 * b0;
        Self {
            a0,
            b0,
            ta,
            tb,
            e: tb - 2.0 * ta,
            m: 2.0 * tb + ta,
        }
    }

    fn region(&self, delta: f64) -> AttenuationRegion {
        let sf = 5.0_f64.sqrt();
        let Self { ta, tb, e, m, .. } = *self;
        let regions = [
            (
                AttenuationRegion::BEdge,
                tb < 1.0 + 3.0 * delta
                    && 0.5 + 1.5 * (sf + 1.0) * delta < ta
                    && ta < 1.0 - 3.0 * (sf + 2.0) * delta,
            ),
            (
                AttenuationRegion::ACorner,
                e <= -1.0 + 3.0 * (2.0 * sf + 5.0) * delta
                    && ta >= 1.0 - 3.0 * (sf + 2.0) * delta,
            ),
            (
                AttenuationRegion::LowerEdge,
                m > 3.0 - 3.0 * sf * delta
                    && -1.0 + 3.0 * (2.0 * sf + 5.0) * delta < e
                    && e < -3.0 * sf * delta,
            ),
            (
                AttenuationRegion::UpperCorner,
                m >= 3.0 - 3.0 * sf * delta && e >= -3.0 * sf * delta,
            ),
            (
                AttenuationRegion::UpperEdge,
                2.5 + 1.5 * (5.0 + sf) * delta < m
                    && m < 3.0 - 3.0 * sf * delta
                    && e > -3.0 * sf * delta,
            ),
            (
                AttenuationRegion::LowerCorner,
                ta <= 0.5 + 1.5 * (sf + 1.0) * delta && m <= 2.5 + 1.5 * (5.0 + sf) * delta,
            ),
        ];
        regions
            .into_iter()
            .find_map(|(region, inside)| inside.then_some(region))
            .unwrap_or(AttenuationRegion::Interior)
    }

    /// Projected fractions `(a, b)` for `region`.
    fn project(&self, region: AttenuationRegion, delta: f64) -> (f64, f64) {
        let sf = 5.0_f64.sqrt();
        let (a0, b0) = (self.a0, self.b0);
        match region {
            AttenuationRegion::BEdge => (a0, 1.0 / 3.0 + delta),
            AttenuationRegion::ACorner => (1.0 / 3.0 - (sf + 2.0) * delta, 1.0 / 3.0 + delta),
            AttenuationRegion::LowerEdge => (
                0.2 + 0.8 * a0 - 0.4 * b0 - delta / sf,
                0.4 - 0.4 * a0 + 0.2 * b0 - 2.0 * delta / sf,
            ),
            AttenuationRegion::UpperCorner => (0.2 + delta / sf, 0.4 - 3.0 * delta / sf),
            AttenuationRegion::UpperEdge => (
                0.2 * a0 + 0.4 * b0 + 2.0 * delta / sf,
                0.4 * a0 + 0.8 * b0 - delta / sf,
            ),
            AttenuationRegion::LowerCorner => {
                (1.0 / 6.0 + 0.5 * (sf + 1.0) * delta, 1.0 / 3.0 + delta)
            }
            AttenuationRegion::Interior => (a0, b0),
        }
    }
}

/// Project one attenuation triple onto the region consistent with a
/// two-compartment model. Inputs must lie in `(0, 1)`.
pub fn project_attenuation(e: [f64; 3], delta: f64) -> ([f64; 3], AttenuationRegion) {
    let t = e.map(|x| -x.ln());
    let s0 = t[0] + t[1] + t[2];
    let fractions = DecayFractions::new(t[0] / s0, t[1] / s0);
    let region = fractions.region(delta);
    let (a, b) = fractions.project(region, delta);
    (
        [
            (-a * s0).exp(),
            (-b * s0).exp(),
            (-(1.0 - a - b) * s0).exp(),
        ],
        region,
    )
}

/// Parameters of `E_n = lambda alpha^n + (1 - lambda) beta^n`, with `p`
/// the square root of the variance term `E2 - E1^2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compartments {
    pub p: f64,
    pub alpha: f64,
    pub beta: f64,
    pub lambda: f64,
}

fn moment_residual(lambda: f64, alpha: f64, beta: f64, e: [f64; 3]) -> f64 {
    (1..=3)
        .map(|n| {
            let (an, bn) = (alpha.powi(n), beta.powi(n));
            (lambda * (an - bn) + (bn - e[n as usize - 1])).abs()
        })
        .sum()
}

/// Solve the compartment parameters from the first three moments.
///
/// The weight is ambiguous between `lambda` and `1 - lambda`; the one with
/// the smaller moment residual wins, ties go to `1 - lambda`.
pub fn estimate_compartments(e: [f64; 3]) -> Compartments {
    let [e1, e2, e3] = e;
    let p2 = e2 - e1 * e1;
    if p2.abs() < MONO_EXPONENTIAL_EPS {
        return Compartments {
            p: 0.0,
            alpha: e1,
            beta: e1,
            lambda: 0.5,
        };
    }

    let a = (e3 - e1 * e2) / (2.0 * p2);
    let b2 = a * a - (e1 * e3 - e2 * e2) / p2;
    let b = if b2 > 0.0 { b2.sqrt() } else { 0.0 };
    let p = if p2 > 0.0 { p2.sqrt() } else { 0.0 };
    let alpha = a + b;
    let beta = a - b;

    let spread = alpha - beta;
    let radicand = if spread != 0.0 {
        1.0 - (2.0 * p / spread).powi(2)
    } else {
        0.0
    };
    let radicand = if radicand.is_finite() { radicand.max(0.0) } else { 0.0 };
    let lambda = 0.5 + 0.5 * radicand.sqrt();

    let er1 = moment_residual(lambda, alpha, beta, e);
    let er2 = moment_residual(1.0 - lambda, alpha, beta, e);
    Compartments {
        p,
        alpha,
        beta,
        lambda: if er1 < er2 { lambda } else { 1.0 - lambda },
    }
}

/// Project `(p, alpha, beta)` onto the admissible compartment region.
///
/// Fifteen closed-form candidates (the unconstrained point, projections
/// onto faces, edges and vertices) are checked for admissibility; the
/// admissible one closest to the input wins, the first on ties. When none is
/// admissible the input is returned unchanged.
pub fn project_compartments(p: f64, alpha: f64, beta: f64, delta: f64) -> (f64, f64, f64) {
    let s6 = 6.0_f64.sqrt();
    let s15 = s6 / 2.0;
    let (a, b, d) = (alpha, beta, delta);

    let candidates: [(f64, f64, f64); 15] = [
        (p, a, b),
        (p, a, d),
        (p, 1.0 - d, b),
        (d, a, b),
        (
            (p + a - b - d * s6) / 3.0,
            (2.0 * p + 5.0 * a + b + s6 * d) / 6.0,
            (-2.0 * p + a + 5.0 * b - s6 * d) / 6.0,
        ),
        (d, a, d),
        (d, 1.0 - d, b),
        (
            d,
            0.5 * (a + b) + (1.0 + s15) * d,
            0.5 * (a + b) - (1.0 + s15) * d,
        ),
        (p, 1.0 - d, d),
        (
            0.2 * (2.0 * a + p - 2.0 * (s6 + 1.0) * d),
            0.2 * (4.0 * a + 2.0 * p + (s6 + 1.0) * d),
            d,
        ),
        (
            0.2 * (-2.0 * b + p + 2.0 - 2.0 * (s6 + 1.0) * d),
            1.0 - d,
            0.2 * (4.0 * b - 2.0 * p + 1.0 - (s6 + 1.0) * d),
        ),
        (d, (s6 + 3.0) * d, d),
        (d, 1.0 - d, d),
        (d, 1.0 - d, 1.0 - (s6 + 3.0) * d),
        (0.5 - (1.0 + s15) * d, 1.0 - d, d),
    ];

    let margin = 0.99 * delta;
    let admissible = |&(cp, ca, cb): &(f64, f64, f64)| {
        margin < cp && 2.0 * (cp + margin * s15) < ca - cb && cb > margin && ca < 1.0 - margin
    };

    let (best, _) = candidates.iter().enumerate().fold(
        (0usize, SEARCH_START),
        |(best, best_distance), (index, candidate)| {
            let distance = if admissible(candidate) {
                (candidate.0 - p).powi(2) + (candidate.1 - a).powi(2) + (candidate.2 - b).powi(2)
            } else {
                INADMISSIBLE_DISTANCE
            };
            if distance < best_distance {
                (index, distance)
            } else {
                (best, best_distance)
            }
        },
    );
    candidates[best]
}

pub struct ThreeShellReconstructor<'a> {
    matrices: &'a ReconstructionMatrices,
    baseline: &'a [usize],
    shells: [&'a ShellSampling; 3],
    threshold: f64,
}

pub struct ThreeShellWorkspace {
    raw: [DVector<f64>; 3],
    attenuation: [DVector<f64>; 3],
    signal: DVector<f64>,
    coeffs: DVector<f64>,
    odf: DVector<f64>,
}

impl<'a> ThreeShellReconstructor<'a> {
    /// `matrices` must carry resampling matrices for the second and third
    /// shell (see [`ReconstructionMatrices::with_resampled_shells`]).
    pub fn new(
        matrices: &'a ReconstructionMatrices,
        baseline: &'a [usize],
        shells: [&'a ShellSampling; 3],
        threshold: f64,
    ) -> Self {
        debug_assert_eq!(shells[0].len(), matrices.sampling_count());
        Self {
            matrices,
            baseline,
            shells,
            threshold,
        }
    }

    fn gather(&self, voxel: &[f32], ws: &mut ThreeShellWorkspace) {
        for (raw, shell) in ws.raw.iter_mut().zip(self.shells) {
            for (s, &channel) in raw.iter_mut().zip(&shell.channels) {
                *s = f64::from(voxel[channel]);
            }
        }
        ws.attenuation[0].copy_from(&ws.raw[0]);
        for shell in 1..3 {
            match self.matrices.shell_resampling(shell - 1) {
                Some(resampling) => {
                    ws.attenuation[shell].gemv(1.0, resampling, &ws.raw[shell], 0.0)
                }
                None => ws.attenuation[shell].copy_from(&ws.raw[shell]),
            }
        }
    }
}

impl VoxelReconstructor for ThreeShellReconstructor<'_> {
    type Workspace = ThreeShellWorkspace;

    fn workspace(&self) -> Self::Workspace {
        let n = self.shells[0].len();
        ThreeShellWorkspace {
            raw: self.shells.map(|s| DVector::zeros(s.len())),
            attenuation: [DVector::zeros(n), DVector::zeros(n), DVector::zeros(n)],
            signal: DVector::zeros(n),
            coeffs: DVector::zeros(self.matrices.coefficient_count()),
            odf: DVector::zeros(self.matrices.odf_len()),
        }
    }

    fn reconstruct(&self, voxel: &[f32], ws: &mut Self::Workspace, odf: &mut [f32]) -> f64 {
        let b0 = baseline_average(voxel, self.baseline);
        if !passes_baseline_gate(b0, self.threshold) {
            odf.fill(0.0);
            return b0;
        }

        self.gather(voxel, ws);
        for column in ws.attenuation.iter_mut() {
            normalize_by_baseline(column.as_mut_slice(), b0);
            threshold(column.as_mut_slice(), THRESHOLD_SIGMA);
        }

        let n = ws.signal.len();
        for i in 0..n {
            let measured = [ws.attenuation[0][i], ws.attenuation[1][i], ws.attenuation[2][i]];
            let (projected, _) = project_attenuation(measured, PROJECTION_DELTA);
            let c = estimate_compartments(projected);
            let (_, alpha, beta) = project_compartments(c.p, c.alpha, c.beta, PROJECTION_DELTA);

            let mut decays = [alpha, beta];
            for v in decays.iter_mut() {
                *v = threshold_value(*v, THRESHOLD_SIGMA);
            }
            double_logarithm(&mut decays);
            ws.signal[i] = c.lambda * (decays[0] - decays[1]) + decays[1];
        }

        self.matrices.fit_odf(&ws.signal, &mut ws.coeffs, &mut ws.odf);
        ws.odf *= 4.0 * PI / ws.odf.len() as f64;
        normalize_odf(ws.odf.as_mut_slice());
        for (out, &v) in odf.iter_mut().zip(ws.odf.iter()) {
            *out = v as f32;
        }
        b0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn interior_triple_passes_through() {
        // log-attenuation shares a0 = 0.25, b0 = 0.36
        let e = [(-0.25f64).exp(), (-0.36f64).exp(), (-0.39f64).exp()];
        let (projected, region) = project_attenuation(e, PROJECTION_DELTA);
        assert_eq!(region, AttenuationRegion::Interior);
        for (a, b) in projected.iter().zip(e.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn projection_preserves_total_log_attenuation() {
        let e = [0.9, 0.5, 0.05];
        let (projected, region) = project_attenuation(e, PROJECTION_DELTA);
        assert_ne!(region, AttenuationRegion::Interior);
        let before: f64 = e.iter().map(|x| -x.ln()).sum();
        let after: f64 = projected.iter().map(|x| -x.ln()).sum();
        assert_abs_diff_eq!(before, after, epsilon = 1e-10);
    }

    #[test]
    fn exact_two_compartment_moments_are_recovered() {
        let (lambda, alpha, beta): (f64, f64, f64) = (0.7, 0.8, 0.3);
        let moment = |n: i32| lambda * alpha.powi(n) + (1.0 - lambda) * beta.powi(n);
        let c = estimate_compartments([moment(1), moment(2), moment(3)]);
        assert_abs_diff_eq!(c.alpha, alpha, epsilon = 1e-9);
        assert_abs_diff_eq!(c.beta, beta, epsilon = 1e-9);
        assert_abs_diff_eq!(c.lambda, lambda, epsilon = 1e-9);
    }

    #[test]
    fn mono_exponential_signal_is_well_defined() {
        let c = estimate_compartments([0.5, 0.25, 0.125]);
        assert_abs_diff_eq!(c.alpha, 0.5);
        assert_abs_diff_eq!(c.beta, 0.5);
        assert!(c.lambda.is_finite());
    }

    #[test]
    fn admissible_point_is_kept() {
        let (p, a, b) = project_compartments(0.1, 0.8, 0.3, PROJECTION_DELTA);
        assert_eq!((p, a, b), (0.1, 0.8, 0.3));
    }

    #[test]
    fn beta_below_margin_is_lifted() {
        let (p, a, b) = project_compartments(0.1, 0.8, 0.0, PROJECTION_DELTA);
        assert_abs_diff_eq!(p, 0.1);
        assert_abs_diff_eq!(a, 0.8);
        assert_abs_diff_eq!(b, PROJECTION_DELTA);
    }

    #[test]
    fn far_outside_keeps_input() {
        // every admissible candidate is further away than the search start
        let out = project_compartments(100.0, 0.5, 0.5, PROJECTION_DELTA);
        assert_eq!(out, (100.0, 0.5, 0.5));
    }

    #[test]
    fn region_selection_on_mono_exponential_decay() {
        // T = (t, 2t, 3t): a0 = 1/6, b0 = 1/3
        let e = [0.8, 0.64, 0.512];
        let (_, region) = project_attenuation(e, PROJECTION_DELTA);
        assert_eq!(region, AttenuationRegion::LowerCorner);
    }

    #[test]
    fn every_attenuation_region_projects_to_its_closed_form() {
        use AttenuationRegion::*;
        // (a0, b0) -> region, projected (a, b)
        let table = [
            ((0.25, 0.30), BEdge, (0.250000, 0.343333)),
            ((0.32, 0.10), ACorner, (0.290973, 0.343333)),
            ((0.30, 0.45), LowerEdge, (0.255528, 0.361056)),
            ((0.20, 0.50), UpperCorner, (0.204472, 0.386584)),
            ((0.15, 0.40), UpperEdge, (0.198944, 0.375528)),
            ((1.0 / 6.0, 1.0 / 3.0), LowerCorner, (0.182847, 0.343333)),
            ((0.25, 0.36), Interior, (0.250000, 0.360000)),
        ];
        let s0: f64 = 1.2;
        for ((a0, b0), expected_region, (a, b)) in table {
            let t = [a0 * s0, b0 * s0, (1.0 - a0 - b0) * s0];
            let (projected, region) = project_attenuation(t.map(|x| (-x).exp()), PROJECTION_DELTA);
            assert_eq!(region, expected_region, "(a0, b0) = ({a0}, {b0})");
            let fractions = projected.map(|e| -e.ln() / s0);
            assert_abs_diff_eq!(fractions[0], a, epsilon = 1e-6);
            assert_abs_diff_eq!(fractions[1], b, epsilon = 1e-6);
            assert_abs_diff_eq!(fractions.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn every_compartment_candidate_can_win() {
        // input (p, alpha, beta) -> triple of the winning candidate, in
        // candidate order
        let table = [
            ((0.05, 0.2, 0.05), (0.05, 0.2, 0.05)),
            ((0.05, 0.15, -0.5), (0.05, 0.15, 0.01)),
            ((0.05, 1.0, 0.05), (0.05, 0.99, 0.05)),
            ((-0.5, 0.1, 0.05), (0.01, 0.1, 0.05)),
            ((0.05, 0.1, 0.05), (0.025168367524056084, 0.11241581623797196, 0.03758418376202804)),
            ((-0.5, 0.1, -0.5), (0.01, 0.1, 0.01)),
            ((-0.5, 1.0, 0.05), (0.01, 0.99, 0.05)),
            ((-0.5, -0.5, 0.6), (0.01, 0.07224744871391588, 0.027752551286084098)),
            ((0.05, 1.0, -0.5), (0.05, 0.99, 0.01)),
            ((0.05, 0.05, -0.5), (0.016202041028867294, 0.06689897948556638, 0.01)),
            ((0.05, 1.0, 0.9), (0.03620204102886729, 0.99, 0.8931010205144336)),
            ((-0.5, -0.5, -0.5), (0.01, 0.05449489742783178, 0.01)),
            ((-0.5, 1.0, -0.5), (0.01, 0.99, 0.01)),
            ((-0.5, 0.45, 1.5), (0.01, 0.99, 0.9455051025721682)),
            ((0.5, 1.0, -0.5), (0.4777525512860841, 0.99, 0.01)),
        ];
        for ((p, a, b), (ep, ea, eb)) in table {
            let (cp, ca, cb) = project_compartments(p, a, b, PROJECTION_DELTA);
            assert_abs_diff_eq!(cp, ep, epsilon = 1e-12);
            assert_abs_diff_eq!(ca, ea, epsilon = 1e-12);
            assert_abs_diff_eq!(cb, eb, epsilon = 1e-12);
        }
    }
}
