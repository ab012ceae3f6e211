//! Per-voxel signal transforms shared by the reconstructors.

/// Amount subtracted from values at or above B0 before normalization.
const SIGNAL_CEILING_OFFSET: f64 = 0.001;

/// B0 used for normalization when the averaged baseline is exactly zero.
const ZERO_BASELINE_SUBSTITUTE: f64 = 0.01;

/// Mean of the baseline channels of one voxel.
pub fn baseline_average(voxel: &[f32], baseline: &[usize]) -> f64 {
    if baseline.is_empty() {
        return 0.0;
    }
    let sum: f64 = baseline.iter().map(|&i| f64::from(voxel[i])).sum();
    sum / baseline.len() as f64
}

/// Whether a voxel with averaged baseline `b0` is reconstructed at all.
pub fn passes_baseline_gate(b0: f64, threshold: f64) -> bool {
    b0 != 0.0 && b0 >= threshold
}

/// Divide by B0, keeping every ratio strictly inside `(0, 1)`.
pub fn normalize_by_baseline(values: &mut [f64], b0: f64) {
    let b0 = if b0 == 0.0 { ZERO_BASELINE_SUBSTITUTE } else { b0 };
    for v in values.iter_mut() {
        if *v >= b0 {
            *v = b0 - SIGNAL_CEILING_OFFSET;
        }
        *v = (*v / b0).clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON);
    }
}

/// `ln(-ln(x))` for attenuation ratios in `(0, 1)`.
pub fn double_logarithm(values: &mut [f64]) {
    for v in values.iter_mut() {
        *v = (-v.ln()).ln();
    }
}

/// Smoothly clamp `x` into `[sigma/2, 1 - sigma/2]`.
///
/// Identity on `[sigma, 1 - sigma)`, quadratic blends of width `sigma`
/// towards both bounds, constant outside `[0, 1)`.
pub fn threshold_value(x: f64, sigma: f64) -> f64 {
    if x < 0.0 {
        sigma / 2.0
    } else if x < sigma {
        sigma / 2.0 + (x * x) / (2.0 * sigma)
    } else if x < 1.0 - sigma {
        x
    } else if x < 1.0 {
        1.0 - sigma / 2.0 - ((1.0 - x) * (1.0 - x)) / (2.0 * sigma)
    } else {
        1.0 - sigma / 2.0
    }
}

pub fn threshold(values: &mut [f64], sigma: f64) {
    for v in values.iter_mut() {
        *v = threshold_value(*v, sigma);
    }
}

/// Zero negative amplitudes and scale the rest to sum to one.
/// All-zero input stays zero.
pub fn normalize_odf(odf: &mut [f64]) {
    for v in odf.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
        }
    }
    let sum: f64 = odf.iter().sum();
    if sum > 0.0 {
        for v in odf.iter_mut() {
            *v /= sum;
        }
    }
}
