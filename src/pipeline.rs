//! the whole analysis as one pure function: config + dataset in, result out

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    data::Dataset,
    error::{KmError, Result},
    kaplan_meier::{KaplanMeier, Median},
    logrank::{logrank_test, LogRankResult},
    model::{CoxCoefficient, CoxModel},
    preprocess::{preprocess, CutoffStats, TimeUnit},
};

/// endpoint being analysed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisType {
    /// overall survival
    #[default]
    Os,
    /// progression-free survival
    Pfs,
}

impl AnalysisType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisType::Os => "OS",
            AnalysisType::Pfs => "PFS",
        }
    }

    /// y axis label for the chart
    pub fn survival_label(&self) -> &'static str {
        match self {
            AnalysisType::Os => "Overall survival (OS)",
            AnalysisType::Pfs => "Progression-free survival (PFS)",
        }
    }
}

impl fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisType {
    type Err = KmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OS" => Ok(AnalysisType::Os),
            "PFS" => Ok(AnalysisType::Pfs),
            other => Err(KmError::invalid_parameter("analysis type", other)),
        }
    }
}

/// knobs for the cox fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoxSettings {
    pub max_iterations: usize,
    pub tolerance: f64,
    pub l2_penalty: f64,
}

impl Default for CoxSettings {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            l2_penalty: 0.0,
        }
    }
}

/// everything one run needs besides the data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub analysis_type: AnalysisType,
    pub day_unit: TimeUnit,
    pub cutoff_month: f64,
    pub confidence_level: f64,
    pub cox: CoxSettings,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            analysis_type: AnalysisType::Os,
            day_unit: TimeUnit::Months,
            cutoff_month: 24.0,
            confidence_level: 0.95,
            cox: CoxSettings::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.cutoff_month.is_finite() || self.cutoff_month < 1.0 {
            return Err(KmError::invalid_parameter("cutoff_month", self.cutoff_month));
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(KmError::invalid_parameter(
                "confidence_level",
                self.confidence_level,
            ));
        }
        if self.cox.max_iterations == 0 {
            return Err(KmError::invalid_parameter("cox.max_iterations", 0));
        }
        if !(self.cox.tolerance > 0.0) {
            return Err(KmError::invalid_parameter("cox.tolerance", self.cox.tolerance));
        }
        Ok(())
    }
}

/// per-arm curve and median
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub label: String,
    pub n_subjects: usize,
    pub n_events: usize,
    pub median: Median,
    pub curve: KaplanMeier,
}

/// hazard of the second group relative to the first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HazardRatio {
    pub coefficient: f64,
    pub standard_error: f64,
    pub hazard_ratio: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub p_value: f64, // wald
}

impl From<&CoxCoefficient> for HazardRatio {
    fn from(row: &CoxCoefficient) -> Self {
        Self {
            coefficient: row.coefficient,
            standard_error: row.standard_error,
            hazard_ratio: row.hazard_ratio,
            ci_lower: row.ci_lower,
            ci_upper: row.ci_upper,
            p_value: row.p_value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub analysis_type: AnalysisType,
    pub cutoff_month: f64,
    pub confidence_level: f64,
    pub groups: [GroupSummary; 2],
    /// None when no event leaves the comparison undefined
    pub hazard_ratio: Option<HazardRatio>,
    pub log_rank: Option<LogRankResult>,
    pub cutoff_stats: CutoffStats,
    #[serde(skip)]
    pub export_rows: Dataset,
}

impl AnalysisResult {
    pub fn medians(&self) -> [Median; 2] {
        [self.groups[0].median, self.groups[1].median]
    }

    /// the log-rank p-value shown to the user
    pub fn p_value(&self) -> Option<f64> {
        self.log_rank.as_ref().map(|r| r.p_value)
    }
}

/// exactly two labels, in first-appearance order
pub fn validate_two_groups(dataset: &Dataset) -> Result<[String; 2]> {
    let groups = dataset.groups();
    match <[String; 2]>::try_from(groups) {
        Ok(pair) => Ok(pair),
        Err(groups) => Err(KmError::group_count(&groups)),
    }
}

/// run the full analysis on one uploaded dataset
pub fn run(config: &AnalysisConfig, dataset: Dataset) -> Result<AnalysisResult> {
    config.validate()?;

    let (dataset, cutoff_stats) = preprocess(dataset, config.day_unit, config.cutoff_month)?;
    let labels = validate_two_groups(&dataset)?;

    let mut arms = Vec::with_capacity(2);
    let mut summaries = Vec::with_capacity(2);
    for label in &labels {
        let (times, events) = dataset.group_arms(label);
        let curve = KaplanMeier::fit_with_level(label.as_str(), &times, &events, config.confidence_level)?;
        summaries.push(GroupSummary {
            label: label.clone(),
            n_subjects: times.len(),
            n_events: curve.n_events(),
            median: curve.median_with_cutoff(config.cutoff_month),
            curve,
        });
        arms.push((times, events));
    }

    let log_rank = undefined_as_none(
        logrank_test(&arms[0].0, &arms[0].1, &arms[1].0, &arms[1].1),
        "log-rank test",
    )?;
    let hazard_ratio = undefined_as_none(fit_hazard_ratio(config, &dataset, &labels), "cox model")?;

    let groups: [GroupSummary; 2] = summaries
        .try_into()
        .map_err(|_| KmError::invalid_dimensions("expected two group summaries"))?;

    info!(
        analysis = %config.analysis_type,
        rows = dataset.len(),
        median_1 = %groups[0].median,
        median_2 = %groups[1].median,
        hazard_ratio = ?hazard_ratio.as_ref().map(|hr| hr.hazard_ratio),
        p_value = ?log_rank.as_ref().map(|r| r.p_value),
        "analysis complete"
    );

    Ok(AnalysisResult {
        analysis_type: config.analysis_type,
        cutoff_month: config.cutoff_month,
        confidence_level: config.confidence_level,
        groups,
        hazard_ratio,
        log_rank,
        cutoff_stats,
        export_rows: dataset,
    })
}

/// second group vs first, coded 0/1 in first-appearance order
fn fit_hazard_ratio(config: &AnalysisConfig, dataset: &Dataset, labels: &[String; 2]) -> Result<HazardRatio> {
    let survival_data = dataset.encode_groups(labels)?;
    let mut model = CoxModel::new()
        .with_max_iterations(config.cox.max_iterations)
        .with_tolerance(config.cox.tolerance)
        .with_l2_penalty(config.cox.l2_penalty)
        .with_confidence_level(config.confidence_level)
        .with_feature_names(vec![format!("{} vs {}", labels[1], labels[0])]);
    model.fit(&survival_data)?;

    model
        .summary()?
        .coefficients
        .first()
        .map(HazardRatio::from)
        .ok_or(KmError::ModelNotFitted)
}

/// degenerate comparisons (no informative events after the cutoff) are reported as NA
fn undefined_as_none<T>(outcome: Result<T>, stage: &str) -> Result<Option<T>> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(KmError::NumericalError { message }) => {
            warn!(stage, reason = %message, "comparison not estimable");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Observation;
    use approx::assert_relative_eq;

    fn two_arm_dataset() -> Dataset {
        let a = [(1.0, true), (2.0, true), (2.0, false), (3.0, true), (4.0, false), (5.0, true)];
        let b = [(2.0, false), (4.0, true), (6.0, true), (7.0, false), (8.0, true), (9.0, true)];
        let rows = a
            .iter()
            .map(|&(t, e)| Observation::new("A", t, e))
            .chain(b.iter().map(|&(t, e)| Observation::new("B", t, e)))
            .collect();
        Dataset::new(rows).unwrap()
    }

    #[test]
    fn test_run_two_arms() {
        let result = run(&AnalysisConfig::default(), two_arm_dataset()).unwrap();

        assert_eq!(result.groups[0].label, "A");
        assert_eq!(result.groups[1].label, "B");
        assert_eq!(result.medians(), [Median::Reached(3.0), Median::Reached(8.0)]);
        assert_relative_eq!(result.p_value().unwrap(), 0.036_933_882_329_348_29, epsilon = 1e-9);
        assert_relative_eq!(
            result.hazard_ratio.unwrap().hazard_ratio,
            0.127_418_281_599_133_3,
            epsilon = 1e-6
        );
        assert_eq!(result.export_rows.len(), 12);
    }

    #[test]
    fn test_every_row_past_cutoff() {
        let dataset = Dataset::new(vec![
            Observation::new("A", 30.0, true),
            Observation::new("A", 40.0, true),
            Observation::new("B", 25.0, true),
            Observation::new("B", 50.0, false),
        ])
        .unwrap();

        let result = run(&AnalysisConfig::default(), dataset).unwrap();
        assert_eq!(result.medians(), [Median::NotReached, Median::NotReached]);
        assert!(result.log_rank.is_none());
        assert!(result.hazard_ratio.is_none());
        assert_eq!(result.p_value(), None);
        assert_eq!(result.cutoff_stats.recensored, 3);
        assert!(result.export_rows.iter().all(|o| o.time == 24.0 && !o.event));
    }

    #[test]
    fn test_undefined_as_none_only_swallows_numerical_errors() {
        let ok: Result<u8> = Ok(1);
        assert_eq!(undefined_as_none(ok, "x").unwrap(), Some(1));

        let flat: Result<u8> = Err(KmError::numerical_error("flat"));
        assert_eq!(undefined_as_none(flat, "x").unwrap(), None);

        let bad: Result<u8> = Err(KmError::optimization_failed("diverged"));
        assert!(undefined_as_none(bad, "x").is_err());
    }

    #[test]
    fn test_three_groups_rejected() {
        let dataset = Dataset::new(vec![
            Observation::new("A", 1.0, true),
            Observation::new("B", 2.0, true),
            Observation::new("C", 3.0, true),
        ])
        .unwrap();

        let err = run(&AnalysisConfig::default(), dataset).unwrap_err();
        assert!(matches!(err, KmError::GroupCount { found: 3, .. }));
    }

    #[test]
    fn test_single_group_rejected() {
        let dataset = Dataset::new(vec![
            Observation::new("A", 1.0, true),
            Observation::new("A", 2.0, false),
        ])
        .unwrap();
        assert!(matches!(validate_two_groups(&dataset), Err(KmError::GroupCount { found: 1, .. })));
    }

    #[test]
    fn test_config_validation() {
        let config = AnalysisConfig {
            cutoff_month: 0.5,
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisConfig {
            confidence_level: 1.0,
            ..AnalysisConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn test_analysis_type_parsing() {
        assert_eq!("os".parse::<AnalysisType>().unwrap(), AnalysisType::Os);
        assert_eq!("PFS".parse::<AnalysisType>().unwrap(), AnalysisType::Pfs);
        assert!("DFS".parse::<AnalysisType>().is_err());
        assert_eq!(AnalysisType::Pfs.to_string(), "PFS");
    }
}
