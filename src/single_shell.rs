//! Linear Q-ball reconstruction from a single shell.

use nalgebra::DVector;

use crate::filter::VoxelReconstructor;
use crate::gradients::ShellSampling;
use crate::matrices::ReconstructionMatrices;
use crate::signal::{baseline_average, double_logarithm, normalize_by_baseline, passes_baseline_gate};

pub struct SingleShellReconstructor<'a> {
    matrices: &'a ReconstructionMatrices,
    baseline: &'a [usize],
    shell: &'a ShellSampling,
    threshold: f64,
}

pub struct SingleShellWorkspace {
    signal: DVector<f64>,
    coeffs: DVector<f64>,
    odf: DVector<f64>,
}

impl<'a> SingleShellReconstructor<'a> {
    pub fn new(
        matrices: &'a ReconstructionMatrices,
        baseline: &'a [usize],
        shell: &'a ShellSampling,
        threshold: f64,
    ) -> Self {
        debug_assert_eq!(shell.len(), matrices.sampling_count());
        Self {
            matrices,
            baseline,
            shell,
            threshold,
        }
    }
}

impl VoxelReconstructor for SingleShellReconstructor<'_> {
    type Workspace = SingleShellWorkspace;

    fn workspace(&self) -> Self::Workspace {
        SingleShellWorkspace {
            signal: DVector::zeros(self.shell.len()),
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

        for (s, &channel) in ws.signal.iter_mut().zip(&self.shell.channels) {
            *s = f64::from(voxel[channel]);
        }
        normalize_by_baseline(ws.signal.as_mut_slice(), b0);
        double_logarithm(ws.signal.as_mut_slice());

        self.matrices.fit_odf(&ws.signal, &mut ws.coeffs, &mut ws.odf);
        for (out, &v) in odf.iter_mut().zip(ws.odf.iter()) {
            *out = v as f32;
        }
        b0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradients::{GradientDirection, GradientTable, classify};
    use crate::matrices::MatrixParams;
    use crate::point_shell::distribute_point_shell;
    use approx::assert_abs_diff_eq;
    use nalgebra::Vector3;

    fn setup(directions: Vec<Vector3<f64>>) -> (GradientTable, ShellSampling, ReconstructionMatrices) {
        let table = GradientTable::new(
            std::iter::once(GradientDirection::baseline())
                .chain(directions.into_iter().map(|v| GradientDirection::new(v, 1000.0))),
        );
        let c = classify(&table, None, 4, table.len()).unwrap();
        let shell = c.samplings(&table).remove(0);
        let matrices = ReconstructionMatrices::build(
            &shell.directions,
            MatrixParams {
                order: 4,
                odf_directions: 150,
                lambda: 0.006,
            },
        )
        .unwrap();
        (table, shell, matrices)
    }

    #[test]
    fn zero_baseline_gives_zero_odf() {
        let (table, shell, matrices) = setup(distribute_point_shell(40));
        let rec = SingleShellReconstructor::new(&matrices, &[0], &shell, f64::MIN);
        let mut ws = rec.workspace();
        let mut voxel = vec![0.0f32; table.len()];
        voxel[5] = 300.0;
        let mut odf = vec![1.0f32; 150];
        let b0 = rec.reconstruct(&voxel, &mut ws, &mut odf);
        assert_eq!(b0, 0.0);
        assert!(odf.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn below_threshold_is_masked() {
        let (table, shell, matrices) = setup(distribute_point_shell(40));
        let rec = SingleShellReconstructor::new(&matrices, &[0], &shell, 50.0);
        let mut ws = rec.workspace();
        let voxel = vec![20.0f32; table.len()];
        let mut odf = vec![1.0f32; 150];
        assert_abs_diff_eq!(rec.reconstruct(&voxel, &mut ws, &mut odf), 20.0);
        assert!(odf.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn isotropic_signal_reconstructs_uniform_odf() {
        let (table, shell, matrices) = setup(distribute_point_shell(60));
        let rec = SingleShellReconstructor::new(&matrices, &[0], &shell, f64::MIN);
        let mut ws = rec.workspace();
        let mut voxel = vec![400.0f32; table.len()];
        voxel[0] = 1000.0;
        let mut odf = vec![0.0f32; 150];
        let b0 = rec.reconstruct(&voxel, &mut ws, &mut odf);
        assert_abs_diff_eq!(b0, 1000.0);
        let expected = 1.0 / (4.0 * std::f32::consts::PI);
        for v in &odf {
            assert_abs_diff_eq!(*v, expected, epsilon = 1e-5);
        }
    }

    #[test]
    fn anisotropic_signal_peaks_along_fiber() {
        let (table, shell, matrices) = setup(distribute_point_shell(90));
        let rec = SingleShellReconstructor::new(&matrices, &[0], &shell, f64::MIN);
        let mut ws = rec.workspace();
        let fiber = Vector3::z();
        // zeppelin: fast diffusion along z, slow across
        let b = 1.0;
        let voxel: Vec<f32> = table
            .iter()
            .map(|d| {
                if d.is_baseline() {
                    1.0
                } else {
                    let c = d.vector.dot(&fiber);
                    (-b * (1.7 * c * c + 0.3 * (1.0 - c * c))).exp() as f32
                }
            })
            .collect();
        let mut odf = vec![0.0f32; 150];
        rec.reconstruct(&voxel, &mut ws, &mut odf);

        let directions = matrices.odf_directions();
        let (peak, _) = odf
            .iter()
            .enumerate()
            .fold((0, f32::MIN), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
        assert!(directions[peak].z.abs() > 0.9, "peak at {:?}", directions[peak]);
    }
}
