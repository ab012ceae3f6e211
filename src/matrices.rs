//! Reconstruction matrices shared by every voxel of a run.
//!
//! Built once during setup from the sampling directions of the first
//! diffusion-weighted shell and then handed to region workers behind an
//! `Arc`. Nothing in here is mutated after [`ReconstructionMatrices::build`]
//! returns.

use std::f64::consts::PI;

use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector, Vector3};

use crate::error::ReconstructionError;
use crate::point_shell::distribute_point_shell;
use crate::sphere::{Spherical, coefficient_count, coefficients, legendre0, real_harmonic};

/// Lowest number of sampling directions accepted for any order.
const MIN_DIRECTIONS: usize = 6;

/// Isotropic term `1/(2 sqrt(pi))` lost by the double logarithm.
pub const DC_OFFSET: f64 = 0.282_094_791_773_878_14;

/// Order, output-direction count and Laplace-Beltrami weight of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatrixParams {
    pub order: usize,
    pub odf_directions: usize,
    pub lambda: f64,
}

/// Least-squares harmonic fit on one direction set.
struct HarmonicFit {
    basis: DMatrix<f64>,
    /// `(B^T B + lambda L)^-1 B^T`
    signal_reconstruction: DMatrix<f64>,
    degrees: Vec<usize>,
}

impl HarmonicFit {
    fn new(directions: &[Vector3<f64>], order: usize, lambda: f64) -> Result<Self, ReconstructionError> {
        let required = coefficient_count(order).max(MIN_DIRECTIONS);
        if directions.len() < required {
            return Err(ReconstructionError::InsufficientDirections {
                order,
                required,
                available: directions.len(),
            });
        }

        let basis = harmonic_basis(directions, order);
        let n_coeffs = basis.ncols();
        let mut degrees = vec![0usize; n_coeffs];
        let mut laplace_beltrami = DMatrix::<f64>::zeros(n_coeffs, n_coeffs);
        for (j, k, _) in coefficients(order) {
            degrees[j] = k;
            laplace_beltrami[(j, j)] = (k * k * (k + 1) * (k + 1)) as f64;
        }

        let system = basis.transpose() * &basis + laplace_beltrami * lambda;
        let cholesky = Cholesky::new(system).ok_or(ReconstructionError::SingularSystem)?;
        let signal_reconstruction = cholesky.solve(&basis.transpose());

        Ok(Self {
            basis,
            signal_reconstruction,
            degrees,
        })
    }
}

fn harmonic_basis(directions: &[Vector3<f64>], order: usize) -> DMatrix<f64> {
    let mut basis = DMatrix::<f64>::zeros(directions.len(), coefficient_count(order));
    for (i, v) in directions.iter().enumerate() {
        let s = Spherical::from_cartesian(v);
        for (j, k, m) in coefficients(order) {
            basis[(i, j)] = real_harmonic(m, k, s.theta, s.phi);
        }
    }
    basis
}

#[derive(Debug, Clone)]
pub struct ReconstructionMatrices {
    params: MatrixParams,
    sh_basis: DMatrix<f64>,
    signal_reconstruction: DMatrix<f64>,
    coeff_reconstruction: DMatrix<f64>,
    odf_basis: DMatrix<f64>,
    odf_reconstruction: DMatrix<f64>,
    odf_directions: Vec<Vector3<f64>>,
    shell_resampling: Vec<DMatrix<f64>>,
}

impl ReconstructionMatrices {
    /// Build the bundle for sampling `directions` (already extended with
    /// antipodes for hemispherical schemes).
    ///
    /// # Errors
    ///
    /// `InsufficientDirections` when `directions` cannot determine the
    /// basis, `SingularSystem` when the regularized normal matrix is not
    /// positive definite.
    pub fn build(directions: &[Vector3<f64>], params: MatrixParams) -> Result<Self, ReconstructionError> {
        if params.order == 0 || params.order % 2 != 0 {
            return Err(ReconstructionError::InvalidOrder(params.order));
        }
        if params.odf_directions == 0 {
            return Err(ReconstructionError::InvalidOutputDirections);
        }

        let fit = HarmonicFit::new(directions, params.order, params.lambda)?;

        // FRT * eigenvalues * 1/(16 pi^2), both diagonal
        let factor = 1.0 / (16.0 * PI * PI);
        let mut coeff_reconstruction = fit.signal_reconstruction.clone();
        for (j, mut row) in coeff_reconstruction.row_iter_mut().enumerate() {
            let k = fit.degrees[j];
            let funk_radon = 2.0 * PI * legendre0(k);
            let eigenvalue = -((k * (k + 1)) as f64);
            row *= factor * funk_radon * eigenvalue;
        }

        let odf_directions = distribute_point_shell(params.odf_directions);
        let odf_basis = harmonic_basis(&odf_directions, params.order);
        let odf_reconstruction = &odf_basis * &coeff_reconstruction;

        debug!(
            "reconstruction matrices: {} directions, {} coefficients, {} odf directions",
            directions.len(),
            fit.basis.ncols(),
            params.odf_directions
        );

        Ok(Self {
            params,
            sh_basis: fit.basis,
            signal_reconstruction: fit.signal_reconstruction,
            coeff_reconstruction,
            odf_basis,
            odf_reconstruction,
            odf_directions,
            shell_resampling: Vec::new(),
        })
    }

    /// Add one resampling matrix per extra shell. Each fits the shell on its
    /// own directions and evaluates the fit on the primary directions.
    pub fn with_resampled_shells(
        mut self,
        shells: &[&[Vector3<f64>]],
    ) -> Result<Self, ReconstructionError> {
        self.shell_resampling = shells
            .iter()
            .map(|directions| {
                let fit = HarmonicFit::new(directions, self.params.order, self.params.lambda)?;
                Ok(&self.sh_basis * fit.signal_reconstruction)
            })
            .collect::<Result<_, ReconstructionError>>()?;
        Ok(self)
    }

    pub fn params(&self) -> MatrixParams {
        self.params
    }

    pub fn coefficient_count(&self) -> usize {
        self.sh_basis.ncols()
    }

    pub fn sampling_count(&self) -> usize {
        self.sh_basis.nrows()
    }

    pub fn odf_len(&self) -> usize {
        self.odf_basis.nrows()
    }

    pub fn sh_basis(&self) -> &DMatrix<f64> {
        &self.sh_basis
    }

    pub fn signal_reconstruction(&self) -> &DMatrix<f64> {
        &self.signal_reconstruction
    }

    pub fn coeff_reconstruction(&self) -> &DMatrix<f64> {
        &self.coeff_reconstruction
    }

    pub fn odf_basis(&self) -> &DMatrix<f64> {
        &self.odf_basis
    }

    /// Direct mapping from a double-log signal (without the DC term) to ODF
    /// amplitudes.
    pub fn odf_reconstruction(&self) -> &DMatrix<f64> {
        &self.odf_reconstruction
    }

    pub fn odf_directions(&self) -> &[Vector3<f64>] {
        &self.odf_directions
    }

    pub fn shell_resampling(&self, shell: usize) -> Option<&DMatrix<f64>> {
        self.shell_resampling.get(shell)
    }

    /// Harmonic coefficients and ODF amplitudes of a double-log signal.
    /// `coeffs` and `odf` are overwritten.
    pub fn fit_odf(&self, signal: &DVector<f64>, coeffs: &mut DVector<f64>, odf: &mut DVector<f64>) {
        coeffs.gemv(1.0, &self.coeff_reconstruction, signal, 0.0);
        coeffs[0] += DC_OFFSET;
        odf.gemv(1.0, &self.odf_basis, coeffs, 0.0);
    }
}
