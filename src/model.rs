use ndarray::{Array1, Array2, ArrayView1};
use serde::Serialize;
use tracing::warn;

use crate::{
    data::SurvivalData,
    error::{KmError, Result},
    optimization::{invert_matrix, CoxOptimizer, OptimizationConfig, TieMethod},
    stats::{two_sided_p, z_for_level},
};

/// cox proportional hazards model fitted by newton-raphson
#[derive(Debug, Clone)]
pub struct CoxModel {
    config: OptimizationConfig,
    confidence_level: f64,
    feature_names: Option<Vec<String>>,
    fit: Option<FittedCox>,
}

#[derive(Debug, Clone)]
struct FittedCox {
    coefficients: Array1<f64>,
    covariance: Array2<f64>, // inverse observed information
    log_likelihood: f64,
    null_log_likelihood: f64,
    iterations: usize,
    n_samples: usize,
    n_events: usize,
}

impl Default for CoxModel {
    fn default() -> Self {
        Self {
            config: OptimizationConfig::default(),
            confidence_level: 0.95,
            feature_names: None,
            fit: None,
        }
    }
}

impl CoxModel {
    /// new cox model w/ defaults (efron ties, no penalty, 95% intervals)
    pub fn new() -> Self {
        Self::default()
    }

    /// add ridge penalty (L2) - shrinks coefficients
    pub fn with_l2_penalty(mut self, penalty: f64) -> Self {
        self.config.l2_penalty = penalty.max(0.0);
        self
    }

    /// max newton iterations before giving up
    pub fn with_max_iterations(mut self, max_iter: usize) -> Self {
        self.config.max_iterations = max_iter;
        self
    }

    /// how close is close enough for convergence
    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.config.tolerance = tol;
        self
    }

    pub fn with_ties(mut self, ties: TieMethod) -> Self {
        self.config.ties = ties;
        self
    }

    /// coverage of the reported hazard ratio intervals
    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    /// give names to your features for nicer output
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = Some(names);
        self
    }

    /// fit the model to data - this does the actual work
    pub fn fit(&mut self, data: &SurvivalData) -> Result<&mut Self> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(KmError::invalid_parameter(
                "confidence_level",
                self.confidence_level,
            ));
        }
        if self.config.max_iterations == 0 {
            return Err(KmError::invalid_parameter("max_iterations", 0));
        }
        if let Some(names) = &self.feature_names {
            if names.len() != data.n_features() {
                return Err(KmError::invalid_dimensions(format!(
                    "feature names ({}) != features ({})",
                    names.len(),
                    data.n_features()
                )));
            }
        }

        let optimizer = CoxOptimizer::new(self.config.clone());
        let outcome = optimizer.optimize(data)?;
        let covariance = invert_matrix(&outcome.information).map_err(|_| {
            KmError::numerical_error("information matrix is singular - hazard ratio not estimable")
        })?;

        self.fit = Some(FittedCox {
            coefficients: outcome.beta,
            covariance,
            log_likelihood: outcome.log_likelihood,
            null_log_likelihood: outcome.null_log_likelihood,
            iterations: outcome.iterations,
            n_samples: data.n_samples(),
            n_events: data.n_events(),
        });

        Ok(self)
    }

    fn fitted(&self) -> Result<&FittedCox> {
        self.fit.as_ref().ok_or(KmError::ModelNotFitted)
    }

    /// get the fitted coefficients (betas)
    pub fn coefficients(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.fitted()?.coefficients.view())
    }

    /// sqrt of the covariance diagonal
    pub fn standard_errors(&self) -> Result<Array1<f64>> {
        Ok(self.fitted()?.covariance.diag().mapv(f64::sqrt))
    }

    /// exp(beta)
    pub fn hazard_ratios(&self) -> Result<Array1<f64>> {
        Ok(self.coefficients()?.mapv(f64::exp))
    }

    /// has this model been fit to data yet?
    pub fn is_fitted(&self) -> bool {
        self.fit.is_some()
    }

    /// get a nice summary of the fitted model
    pub fn summary(&self) -> Result<CoxModelSummary> {
        let fit = self.fitted()?;
        let z = z_for_level(self.confidence_level);

        let rows = fit
            .coefficients
            .iter()
            .zip(fit.covariance.diag())
            .enumerate()
            .map(|(i, (&coefficient, &variance))| {
                let standard_error = variance.sqrt();
                let name = self
                    .feature_names
                    .as_ref()
                    .and_then(|names| names.get(i).cloned())
                    .unwrap_or_else(|| format!("x{}", i));

                let row = CoxCoefficient {
                    name,
                    coefficient,
                    standard_error,
                    hazard_ratio: coefficient.exp(),
                    ci_lower: (coefficient - z * standard_error).exp(),
                    ci_upper: (coefficient + z * standard_error).exp(),
                    z: coefficient / standard_error,
                    p_value: two_sided_p(coefficient / standard_error),
                };

                if !(row.ci_lower.is_finite() && row.ci_upper.is_finite() && row.ci_lower > 0.0) {
                    warn!(
                        covariate = %row.name,
                        coefficient,
                        standard_error,
                        "hazard ratio interval is degenerate - likely monotone likelihood"
                    );
                }
                row
            })
            .collect();

        Ok(CoxModelSummary {
            coefficients: rows,
            confidence_level: self.confidence_level,
            log_likelihood: fit.log_likelihood,
            null_log_likelihood: fit.null_log_likelihood,
            iterations: fit.iterations,
            n_samples: fit.n_samples,
            n_events: fit.n_events,
            l2_penalty: self.config.l2_penalty,
        })
    }
}

/// one covariate's row in the summary table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoxCoefficient {
    pub name: String,
    pub coefficient: f64,
    pub standard_error: f64,
    pub hazard_ratio: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub z: f64,
    pub p_value: f64, // wald
}

/// nice summary of what the model learned
#[derive(Debug, Clone, Serialize)]
pub struct CoxModelSummary {
    pub coefficients: Vec<CoxCoefficient>,
    pub confidence_level: f64,
    pub log_likelihood: f64,
    pub null_log_likelihood: f64,
    pub iterations: usize,
    pub n_samples: usize,
    pub n_events: usize,
    pub l2_penalty: f64,
}

impl CoxModelSummary {
    /// render the coefficient table as text
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        out.push_str("cox proportional hazards model summary\n");
        out.push_str("=====================================\n");
        out.push_str(&format!(
            "n = {}, events = {}, log-likelihood = {:.4}\n\n",
            self.n_samples, self.n_events, self.log_likelihood
        ));
        out.push_str(&format!(
            "{:<16} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8}\n",
            "covariate", "coef", "se", "exp(coef)", "lower", "upper", "p"
        ));
        out.push_str(&format!("{:-<80}\n", ""));

        for row in &self.coefficients {
            out.push_str(&format!(
                "{:<16} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>10.4} {:>8.4}\n",
                row.name,
                row.coefficient,
                row.standard_error,
                row.hazard_ratio,
                row.ci_lower,
                row.ci_upper,
                row.p_value
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn create_test_data() -> SurvivalData {
        let times = vec![1.0, 2.0, 2.0, 3.0, 4.0, 5.0, 2.0, 4.0, 6.0, 7.0, 8.0, 9.0];
        let events = vec![
            true, true, false, true, false, true, false, true, true, false, true, true,
        ];
        let codes = vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let covariates = Array2::from_shape_vec((12, 1), codes).unwrap();

        SurvivalData::new(times, events, covariates).unwrap()
    }

    #[test]
    fn test_model_creation() {
        let model = CoxModel::new()
            .with_l2_penalty(0.05)
            .with_max_iterations(500)
            .with_tolerance(1e-6);

        assert_eq!(model.config.l2_penalty, 0.05);
        assert_eq!(model.config.max_iterations, 500);
        assert_eq!(model.config.tolerance, 1e-6);
        assert!(!model.is_fitted());
    }

    #[test]
    fn test_negative_penalty_clamped() {
        let model = CoxModel::new().with_l2_penalty(-1.0);
        assert_eq!(model.config.l2_penalty, 0.0);
    }

    #[test]
    fn test_model_not_fitted_error() {
        let model = CoxModel::new();
        assert!(matches!(model.coefficients(), Err(KmError::ModelNotFitted)));
        assert!(model.summary().is_err());
        assert!(model.standard_errors().is_err());
    }

    #[test]
    fn test_hazard_ratio_and_interval() {
        let data = create_test_data();
        let mut model = CoxModel::new().with_feature_names(vec!["group".to_string()]);
        model.fit(&data).unwrap();

        let summary = model.summary().unwrap();
        let row = &summary.coefficients[0];

        assert_eq!(row.name, "group");
        assert_relative_eq!(row.hazard_ratio, 0.127_418_281_599_133_3, epsilon = 1e-6);
        assert_relative_eq!(row.standard_error, 1.142_120_465_667_319_4, epsilon = 1e-5);
        assert_relative_eq!(row.ci_lower, 0.013_584_918_611_004_923, epsilon = 1e-5);
        assert_relative_eq!(row.ci_upper, 1.195_106_054_777_831_4, epsilon = 1e-4);
        assert_relative_eq!(row.p_value, 0.071_245_757_618_260_88, epsilon = 1e-5);
        assert_eq!(summary.n_events, 8);
    }

    #[test]
    fn test_hazard_ratios_are_exp_coefficients() {
        let data = create_test_data();
        let mut model = CoxModel::new();
        model.fit(&data).unwrap();

        let coefficients = model.coefficients().unwrap().to_owned();
        let ratios = model.hazard_ratios().unwrap();
        for (&coef, &hr) in coefficients.iter().zip(ratios.iter()) {
            assert_relative_eq!(hr, coef.exp(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_feature_name_mismatch() {
        let data = create_test_data();
        let mut model = CoxModel::new().with_feature_names(vec!["a".into(), "b".into()]);
        assert!(model.fit(&data).is_err());
    }

    #[test]
    fn test_summary_table_mentions_covariate() {
        let data = create_test_data();
        let mut model = CoxModel::new().with_feature_names(vec!["group".to_string()]);
        model.fit(&data).unwrap();

        let table = model.summary().unwrap().to_table();
        assert!(table.contains("group"));
        assert!(table.contains("exp(coef)"));
    }
}
