use ndarray::{Array1, Array2, ArrayView1};
use tracing::{debug, trace};

use crate::{
    data::SurvivalData,
    error::{KmError, Result},
};

/// How tied event times enter the partial likelihood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TieMethod {
    #[default]
    Efron,
    Breslow,
}

/// Configuration for Cox model optimization
#[derive(Debug, Clone)]
pub struct OptimizationConfig {
    pub l2_penalty: f64,
    pub max_iterations: usize,
    pub tolerance: f64,
    pub max_step_halvings: usize,
    pub ties: TieMethod,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            l2_penalty: 0.0,
            max_iterations: 100,
            tolerance: 1e-9,
            max_step_halvings: 20,
            ties: TieMethod::Efron,
        }
    }
}

/// What the optimizer hands back to the model
#[derive(Debug, Clone)]
pub struct FitOutcome {
    pub beta: Array1<f64>,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub information: Array2<f64>, // observed information at beta (negative Hessian)
    pub iterations: usize,
}

/// Newton-Raphson fitter for the Cox partial likelihood
pub struct CoxOptimizer {
    config: OptimizationConfig,
}

impl CoxOptimizer {
    pub fn new(config: OptimizationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OptimizationConfig {
        &self.config
    }

    pub fn optimize(&self, data: &SurvivalData) -> Result<FitOutcome> {
        if data.n_events() == 0 {
            return Err(KmError::numerical_error(
                "no events observed - partial likelihood is flat",
            ));
        }
        if data.n_features() == 0 {
            return Err(KmError::invalid_dimensions("need at least one covariate"));
        }

        self.newton_raphson_optimize(data)
    }

    /// Newton-Raphson with step halving whenever the likelihood drops
    fn newton_raphson_optimize(&self, data: &SurvivalData) -> Result<FitOutcome> {
        let mut beta = Array1::zeros(data.n_features());
        let (mut loglik, mut gradient, mut hessian) = self.penalized_derivatives(data, &beta)?;
        let null_log_likelihood = loglik;

        for iteration in 0..self.config.max_iterations {
            let information = hessian.mapv(|h| -h);
            let step = solve_linear_system(&information, &gradient).map_err(|_| {
                KmError::numerical_error("information matrix is singular during newton step")
            })?;

            let mut scale = 1.0;
            let mut halvings = 0;
            let (candidate, c_loglik, c_gradient, c_hessian) = loop {
                let candidate = &beta + &(scale * &step);
                let (ll, g, h) = self.penalized_derivatives(data, &candidate)?;
                if ll >= loglik - 1e-12 || halvings >= self.config.max_step_halvings {
                    break (candidate, ll, g, h);
                }
                scale *= 0.5;
                halvings += 1;
            };

            let change = (c_loglik - loglik).abs();
            let step_norm = scale * step.dot(&step).sqrt();
            trace!(iteration, loglik = c_loglik, change, step_norm, "newton step");

            beta = candidate;
            loglik = c_loglik;
            gradient = c_gradient;
            hessian = c_hessian;

            if change < self.config.tolerance || step_norm < self.config.tolerance {
                debug!(iterations = iteration + 1, loglik, "cox fit converged");
                return Ok(FitOutcome {
                    beta,
                    log_likelihood: loglik,
                    null_log_likelihood,
                    information: hessian.mapv(|h| -h),
                    iterations: iteration + 1,
                });
            }
        }

        Err(KmError::optimization_failed(format!(
            "newton-raphson failed to converge in {} iterations",
            self.config.max_iterations
        )))
    }

    /// log partial likelihood, gradient and Hessian with the ridge term applied
    fn penalized_derivatives(
        &self,
        data: &SurvivalData,
        beta: &Array1<f64>,
    ) -> Result<(f64, Array1<f64>, Array2<f64>)> {
        let (mut loglik, mut gradient, mut hessian) =
            self.compute_likelihood_derivatives(data, beta)?;

        if self.config.l2_penalty > 0.0 {
            loglik -= 0.5 * self.config.l2_penalty * beta.dot(beta);
            gradient = &gradient - &(self.config.l2_penalty * beta);
            for i in 0..beta.len() {
                hessian[[i, i]] -= self.config.l2_penalty;
            }
        }

        Ok((loglik, gradient, hessian))
    }

    /// Compute log partial likelihood and its derivatives
    pub(crate) fn compute_likelihood_derivatives(
        &self,
        data: &SurvivalData,
        beta: &Array1<f64>,
    ) -> Result<(f64, Array1<f64>, Array2<f64>)> {
        let n_features = data.n_features();
        let covariates = data.covariates();
        let weights = exp_linear_predictor(covariates.rows().into_iter(), beta)?;

        let mut loglik = 0.0;
        let mut gradient = Array1::zeros(n_features);
        let mut hessian = Array2::zeros((n_features, n_features));

        for risk_set in data.risk_sets() {
            let d = risk_set.events.len();
            if d == 0 {
                continue;
            }

            let (s0, s1, s2) = weighted_moments(data, &weights, &risk_set.members);
            let (e0, e1, e2) = weighted_moments(data, &weights, &risk_set.events);

            for &i in &risk_set.events {
                let row = covariates.row(i);
                loglik += row.dot(beta);
                gradient += &row;
            }

            for l in 0..d {
                let fraction = match self.config.ties {
                    TieMethod::Efron => l as f64 / d as f64,
                    TieMethod::Breslow => 0.0,
                };

                let phi = s0 - fraction * e0;
                if phi <= 0.0 || !phi.is_finite() {
                    return Err(KmError::numerical_error("risk set sum is non-positive"));
                }

                let mean = (&s1 - &(fraction * &e1)) / phi;
                let second = (&s2 - &(fraction * &e2)) / phi;

                loglik -= phi.ln();
                gradient -= &mean;
                for j in 0..n_features {
                    for k in 0..n_features {
                        hessian[[j, k]] -= second[[j, k]] - mean[j] * mean[k];
                    }
                }
            }
        }

        Ok((loglik, gradient, hessian))
    }

    /// log partial likelihood only
    pub fn compute_log_likelihood(&self, data: &SurvivalData, beta: &Array1<f64>) -> Result<f64> {
        self.compute_likelihood_derivatives(data, beta)
            .map(|(loglik, _, _)| loglik)
    }
}

fn exp_linear_predictor<'a>(
    rows: impl Iterator<Item = ArrayView1<'a, f64>>,
    beta: &Array1<f64>,
) -> Result<Vec<f64>> {
    rows.map(|row| {
        let w = row.dot(beta).exp();
        if !w.is_finite() || w <= 0.0 {
            return Err(KmError::numerical_error(format!(
                "Invalid exponential prediction: {}",
                w
            )));
        }
        Ok(w)
    })
    .collect()
}

/// sum of w, w*x and w*x*x^T over `indices`
fn weighted_moments(
    data: &SurvivalData,
    weights: &[f64],
    indices: &[usize],
) -> (f64, Array1<f64>, Array2<f64>) {
    let n_features = data.n_features();
    let mut s0 = 0.0;
    let mut s1 = Array1::zeros(n_features);
    let mut s2 = Array2::zeros((n_features, n_features));
    let covariates = data.covariates();

    for &i in indices {
        let w = weights[i];
        let x = covariates.row(i);
        s0 += w;
        s1.scaled_add(w, &x);
        for j in 0..n_features {
            for k in 0..n_features {
                s2[[j, k]] += w * x[j] * x[k];
            }
        }
    }

    (s0, s1, s2)
}

/// Solve linear system Ax = b (partial-pivot Gaussian elimination)
pub fn solve_linear_system(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return Err(KmError::invalid_dimensions("Matrix dimensions mismatch"));
    }

    let mut a_copy = a.clone();
    let mut b_copy = b.clone();

    // Forward elimination
    for i in 0..n {
        let mut max_row = i;
        for k in i + 1..n {
            if a_copy[[k, i]].abs() > a_copy[[max_row, i]].abs() {
                max_row = k;
            }
        }

        if a_copy[[max_row, i]].abs() < 1e-12 {
            return Err(KmError::numerical_error("Matrix is singular"));
        }

        if max_row != i {
            for j in 0..n {
                a_copy.swap([i, j], [max_row, j]);
            }
            b_copy.swap(i, max_row);
        }

        for k in i + 1..n {
            let factor = a_copy[[k, i]] / a_copy[[i, i]];
            for j in i..n {
                a_copy[[k, j]] -= factor * a_copy[[i, j]];
            }
            b_copy[k] -= factor * b_copy[i];
        }
    }

    // Back substitution
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        x[i] = b_copy[i];
        for j in i + 1..n {
            x[i] -= a_copy[[i, j]] * x[j];
        }
        x[i] /= a_copy[[i, i]];
    }

    Ok(x)
}

/// inverse via one solve per unit vector
pub fn invert_matrix(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    let mut inverse = Array2::zeros((n, n));
    for j in 0..n {
        let mut unit = Array1::zeros(n);
        unit[j] = 1.0;
        let column = solve_linear_system(a, &unit)?;
        inverse.column_mut(j).assign(&column);
    }
    Ok(inverse)
}
