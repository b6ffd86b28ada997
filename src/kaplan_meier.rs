//! product-limit (Kaplan-Meier) estimator with log-log confidence bands

use std::fmt;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::error::{KmError, Result};
use crate::stats::z_for_level;

/// survival probability at which the median is read off
const MEDIAN_LEVEL: f64 = 0.5;

/// one step of the survival curve
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurvePoint {
    pub time: f64,
    pub at_risk: usize,
    pub events: usize,
    pub censored: usize,
    pub survival: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
}

/// median survival as reported to the user
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Median {
    Reached(f64),
    NotReached,
}

impl Median {
    pub fn value(&self) -> Option<f64> {
        match self {
            Median::Reached(v) => Some(*v),
            Median::NotReached => None,
        }
    }
}

impl fmt::Display for Median {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Median::Reached(v) => write!(f, "{:.2}", v),
            Median::NotReached => f.write_str("Not reached"),
        }
    }
}

impl Serialize for Median {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Median::Reached(v) => serializer.serialize_f64(*v),
            Median::NotReached => serializer.serialize_str("Not reached"),
        }
    }
}

/// fitted survival curve for one group
#[derive(Debug, Clone, Serialize)]
pub struct KaplanMeier {
    label: String,
    confidence_level: f64,
    points: Vec<CurvePoint>,
}

impl KaplanMeier {
    /// fit w/ a 95% band
    pub fn fit(label: impl Into<String>, times: &[f64], events: &[bool]) -> Result<Self> {
        Self::fit_with_level(label, times, events, 0.95)
    }

    pub fn fit_with_level(
        label: impl Into<String>,
        times: &[f64],
        events: &[bool],
        confidence_level: f64,
    ) -> Result<Self> {
        let label = label.into();

        if times.len() != events.len() {
            return Err(KmError::invalid_dimensions(format!(
                "times len ({}) != events len ({})",
                times.len(),
                events.len()
            )));
        }
        if times.is_empty() {
            return Err(KmError::EmptyDataset);
        }
        if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(KmError::numerical_error(
                "survival times must be non-negative & finite",
            ));
        }
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(KmError::invalid_parameter("confidence_level", confidence_level));
        }

        let z = z_for_level(confidence_level);

        let mut distinct: Vec<f64> = times.to_vec();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();

        let mut points = Vec::with_capacity(distinct.len() + 1);
        if distinct[0] > 0.0 {
            points.push(CurvePoint {
                time: 0.0,
                at_risk: times.len(),
                events: 0,
                censored: 0,
                survival: 1.0,
                ci_lower: 1.0,
                ci_upper: 1.0,
            });
        }

        let mut survival = 1.0;
        let mut greenwood = 0.0; // running sum of d / (n (n - d))

        for &t in &distinct {
            let at_risk = times.iter().filter(|&&x| x >= t).count();
            let (deaths, censored) = times.iter().zip(events).filter(|&(&x, _)| x == t).fold(
                (0usize, 0usize),
                |(d, c), (_, &e)| if e { (d + 1, c) } else { (d, c + 1) },
            );

            if deaths > 0 {
                survival *= 1.0 - deaths as f64 / at_risk as f64;
                if at_risk > deaths {
                    greenwood += deaths as f64 / (at_risk as f64 * (at_risk - deaths) as f64);
                }
            }

            let (ci_lower, ci_upper) = log_log_bounds(survival, greenwood, z);
            points.push(CurvePoint {
                time: t,
                at_risk,
                events: deaths,
                censored,
                survival,
                ci_lower,
                ci_upper,
            });
        }

        debug!(
            group = %label,
            subjects = times.len(),
            steps = points.len(),
            "fitted kaplan-meier curve"
        );

        Ok(Self {
            label,
            confidence_level,
            points,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn confidence_level(&self) -> f64 {
        self.confidence_level
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    pub fn n_subjects(&self) -> usize {
        self.points.first().map_or(0, |p| p.at_risk)
    }

    pub fn n_events(&self) -> usize {
        self.points.iter().map(|p| p.events).sum()
    }

    /// S(t) read off the step function
    pub fn survival_at(&self, t: f64) -> f64 {
        self.points
            .iter()
            .take_while(|p| p.time <= t)
            .last()
            .map_or(1.0, |p| p.survival)
    }

    /// first time the curve drops to <= 0.5, None if it never does
    pub fn median(&self) -> Option<f64> {
        self.points
            .iter()
            .find(|p| p.survival <= MEDIAN_LEVEL + 1e-12)
            .map(|p| p.time)
    }

    /// median rounded to 2 decimals, or NotReached when undefined or past the cutoff
    pub fn median_with_cutoff(&self, cutoff: f64) -> Median {
        match self.median() {
            Some(m) if m <= cutoff => Median::Reached((m * 100.0).round() / 100.0),
            _ => Median::NotReached,
        }
    }

    /// (time, survival) at each censoring time, for tick marks on the plot
    pub fn censor_marks(&self) -> Vec<(f64, f64)> {
        self.points
            .iter()
            .filter(|p| p.censored > 0)
            .map(|p| (p.time, p.survival))
            .collect()
    }
}

/// exponential Greenwood interval; degenerate at S = 0 and S = 1
fn log_log_bounds(survival: f64, greenwood: f64, z: f64) -> (f64, f64) {
    if survival <= 0.0 {
        return (0.0, 0.0);
    }
    if survival >= 1.0 {
        return (1.0, 1.0);
    }

    let log_s = survival.ln();
    let spread = z * greenwood.sqrt() / log_s.abs();
    let centre = (-log_s).ln();

    let lower = (-(centre + spread).exp()).exp();
    let upper = (-(centre - spread).exp()).exp();
    (lower, upper)
}
