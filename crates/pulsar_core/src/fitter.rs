use crate::model::TimingModel;
use crate::params::ParamId;
use crate::precision::Dd;
use crate::residuals::Residuals;
use crate::toas::Toas;
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use nalgebra::linalg::SVD;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FitSettings {
    pub max_iterations: usize,
    /// Singular values below `svd_threshold * s_max` are discarded.
    pub svd_threshold: f64,
    pub subtract_mean: bool,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            max_iterations: 1,
            svd_threshold: 1e-12,
            subtract_mean: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamUpdate {
    pub param: ParamId,
    pub prefit: Dd,
    pub postfit: Dd,
    pub uncertainty: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub iterations: usize,
    pub chi2: f64,
    pub reduced_chi2: f64,
    pub dof: usize,
    pub updates: Vec<ParamUpdate>,
    /// Parameter covariance from the last iteration, rows and columns ordered
    /// as `updates`, in the parameters' own units.
    pub covariance: Vec<Vec<f64>>,
}

impl FitSummary {
    /// Correlation matrix `C_ij / sqrt(C_ii C_jj)`. Entries involving a
    /// parameter with zero variance are reported as zero.
    pub fn correlation(&self) -> Vec<Vec<f64>> {
        let sigma: Vec<f64> = (0..self.covariance.len())
            .map(|i| self.covariance[i][i].sqrt())
            .collect();
        self.covariance
            .iter()
            .enumerate()
            .map(|(i, row)| {
                row.iter()
                    .enumerate()
                    .map(|(j, c)| {
                        let scale = sigma[i] * sigma[j];
                        if scale > 0.0 {
                            c / scale
                        } else {
                            0.0
                        }
                    })
                    .collect()
            })
            .collect()
    }
}

/// Least-squares step for one linearisation of the model.
struct WlsStep {
    /// Parameter corrections, without the phase offset.
    deltas: Vec<f64>,
    sigmas: Vec<f64>,
    covariance: Vec<Vec<f64>>,
}

/// Weighted least-squares fitter over the free parameters of a [`TimingModel`].
///
/// Each iteration linearises phase about the current parameters, whitens rows by
/// the TOA uncertainty expressed in cycles, and solves the normalised system with
/// a truncated SVD. A constant phase offset is always fitted alongside the model
/// parameters and discarded afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct WlsFitter {
    pub settings: FitSettings,
}

impl WlsFitter {
    pub fn new(settings: FitSettings) -> Self {
        Self { settings }
    }

    pub fn fit(&self, model: &mut TimingModel, toas: &Toas) -> Result<FitSummary> {
        let settings = self.settings;
        if settings.max_iterations == 0 {
            bail!("max_iterations must be greater than zero.");
        }
        if settings.svd_threshold < 0.0 {
            bail!("svd_threshold must be non-negative.");
        }
        let free = model.free_params();
        if free.is_empty() {
            bail!("No free parameters to fit.");
        }
        let ncols = free.len() + 1;
        if toas.len() < ncols {
            bail!(
                "Not enough TOAs to fit {} parameters and an offset: got {}.",
                free.len(),
                toas.len()
            );
        }
        if let Some(toa) = toas.iter().find(|toa| toa.error_us <= 0.0) {
            bail!("TOA {} has a non-positive uncertainty ({} us).", toa.index, toa.error_us);
        }

        let prefit: Vec<Dd> = free
            .iter()
            .map(|&p| {
                model
                    .param_value(p)
                    .ok_or_else(|| anyhow!("Free parameter {} has no value.", p))
            })
            .collect::<Result<_>>()?;

        let mut sigmas = vec![0.0; free.len()];
        let mut covariance = Vec::new();
        for iteration in 0..settings.max_iterations {
            let step = self
                .step(model, toas, &free)
                .with_context(|| format!("Fit iteration {} failed.", iteration + 1))?;
            for ((&param, delta), sigma) in free.iter().zip(&step.deltas).zip(&step.sigmas) {
                let current = model
                    .param_value(param)
                    .ok_or_else(|| anyhow!("Free parameter {} has no value.", param))?;
                model.set_param_value(param, current + *delta)?;
                model.set_uncertainty(param, *sigma)?;
            }
            debug!("fit iteration {}: deltas {:?}", iteration + 1, step.deltas);
            sigmas = step.sigmas;
            covariance = step.covariance;
        }

        let resids = Residuals::compute(model, toas, settings.subtract_mean)
            .context("Failed to compute post-fit residuals.")?;
        let chi2 = resids.chi2();
        let dof = toas.len() - ncols;
        let reduced_chi2 = chi2 / dof.max(1) as f64;
        info!(
            "Fitted {} parameters to {} TOAs: chi2 = {:.4}, reduced chi2 = {:.4}",
            free.len(),
            toas.len(),
            chi2,
            reduced_chi2
        );

        let updates = free
            .iter()
            .zip(prefit)
            .zip(sigmas)
            .map(|((&param, prefit), uncertainty)| ParamUpdate {
                param,
                prefit,
                postfit: model.param_value(param).unwrap_or(prefit),
                uncertainty,
            })
            .collect();

        Ok(FitSummary {
            iterations: settings.max_iterations,
            chi2,
            reduced_chi2,
            dof,
            updates,
            covariance,
        })
    }

    fn step(&self, model: &TimingModel, toas: &Toas, free: &[ParamId]) -> Result<WlsStep> {
        let nrows = toas.len();
        let ncols = free.len() + 1;
        let resids = Residuals::compute(model, toas, self.settings.subtract_mean)?;
        let freq = model.spin_frequency(toas)?;

        // Row weights: inverse TOA uncertainty in cycles.
        let weights: Vec<f64> = toas
            .iter()
            .zip(&freq)
            .map(|(toa, f)| 1.0 / (toa.error_us * 1e-6 * f.to_f64()))
            .collect();

        let mut design = DMatrix::<f64>::zeros(nrows, ncols);
        for (row, w) in weights.iter().enumerate() {
            design[(row, 0)] = *w;
        }
        for (col, &param) in free.iter().enumerate() {
            let derivative = model.d_phase_d_param(toas, param)?;
            for (row, value) in derivative.values.iter().enumerate() {
                design[(row, col + 1)] = value.to_f64() * weights[row];
            }
        }
        let rhs = DVector::from_iterator(
            nrows,
            resids
                .phase_resids()
                .iter()
                .zip(&weights)
                .map(|(r, w)| -r * w),
        );

        let norms: Vec<f64> = (0..ncols)
            .map(|col| {
                let norm = design.column(col).norm();
                if norm > 0.0 {
                    norm
                } else {
                    1.0
                }
            })
            .collect();
        for (col, norm) in norms.iter().enumerate() {
            design.column_mut(col).scale_mut(1.0 / norm);
        }

        let svd = SVD::new(design, true, true);
        let u = svd
            .u
            .ok_or_else(|| anyhow!("SVD did not return left singular vectors."))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| anyhow!("SVD did not return right singular vectors."))?;
        let singular = svd.singular_values;
        let s_max = singular.iter().cloned().fold(0.0, f64::max);
        let cutoff = self.settings.svd_threshold * s_max;
        let kept: Vec<usize> = (0..singular.len())
            .filter(|&k| singular[k] > cutoff && singular[k] > 0.0)
            .collect();
        if kept.len() < singular.len() {
            debug!(
                "Dropped {} of {} singular values below {:e}",
                singular.len() - kept.len(),
                singular.len(),
                cutoff
            );
        }
        if kept.is_empty() {
            bail!("Design matrix is singular.");
        }

        let mut solution = DVector::<f64>::zeros(ncols);
        let mut covariance = DMatrix::<f64>::zeros(ncols, ncols);
        for &k in &kept {
            let s = singular[k];
            let coefficient = u.column(k).dot(&rhs) / s;
            let v_k = v_t.row(k).transpose();
            solution += &v_k * coefficient;
            covariance += &v_k * v_k.transpose() / (s * s);
        }

        let deltas = (1..ncols).map(|col| solution[col] / norms[col]).collect();
        let sigmas = (1..ncols)
            .map(|col| covariance[(col, col)].sqrt() / norms[col])
            .collect();
        let covariance: Vec<Vec<f64>> = (1..ncols)
            .map(|i| {
                (1..ncols)
                    .map(|j| covariance[(i, j)] / (norms[i] * norms[j]))
                    .collect()
            })
            .collect();
        Ok(WlsStep {
            deltas,
            sigmas,
            covariance,
        })
    }
}
