//! unit normalization and administrative censoring

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::data::Dataset;
use crate::error::{KmError, Result};

/// mean days per month (365.25 / 12)
pub const DAYS_PER_MONTH: f64 = 30.4375;

/// unit of the uploaded Time column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TimeUnit {
    #[serde(rename = "d", alias = "days")]
    Days,
    #[default]
    #[serde(rename = "m", alias = "months")]
    Months,
}

impl fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeUnit::Days => f.write_str("d"),
            TimeUnit::Months => f.write_str("m"),
        }
    }
}

impl FromStr for TimeUnit {
    type Err = KmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "d" | "day" | "days" => Ok(TimeUnit::Days),
            "m" | "month" | "months" => Ok(TimeUnit::Months),
            other => Err(KmError::invalid_parameter("time unit", other)),
        }
    }
}

/// counts of what the cutoff touched, for logging & reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CutoffStats {
    pub clipped: usize,    // rows with time > cutoff
    pub recensored: usize, // events turned into censorings at the cutoff
}

/// convert day-based times to months; month input passes through untouched
pub fn normalize_units(dataset: &mut Dataset, unit: TimeUnit) {
    if unit == TimeUnit::Days {
        for obs in dataset.observations_mut() {
            obs.time /= DAYS_PER_MONTH;
        }
    }
}

/// clip follow-up at `cutoff` months; events exactly at the cutoff become censored
pub fn apply_cutoff(dataset: &mut Dataset, cutoff: f64) -> Result<CutoffStats> {
    if !cutoff.is_finite() || cutoff <= 0.0 {
        return Err(KmError::invalid_parameter("cutoff_month", cutoff));
    }

    let mut stats = CutoffStats::default();
    for obs in dataset.observations_mut() {
        if obs.time > cutoff {
            obs.time = cutoff;
            stats.clipped += 1;
        }
        if obs.time == cutoff && obs.event {
            obs.event = false;
            stats.recensored += 1;
        }
    }

    Ok(stats)
}

/// normalize units then apply the cutoff
pub fn preprocess(mut dataset: Dataset, unit: TimeUnit, cutoff: f64) -> Result<(Dataset, CutoffStats)> {
    normalize_units(&mut dataset, unit);
    let stats = apply_cutoff(&mut dataset, cutoff)?;

    debug!(
        rows = dataset.len(),
        unit = %unit,
        cutoff,
        clipped = stats.clipped,
        recensored = stats.recensored,
        "preprocessed dataset"
    );

    Ok((dataset, stats))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Observation;
    use approx::assert_relative_eq;

    fn scenario() -> Dataset {
        Dataset::new(vec![
            Observation::new("A", 10.0, false),
            Observation::new("A", 20.0, true),
            Observation::new("A", 30.0, true),
            Observation::new("B", 15.0, false),
            Observation::new("B", 25.0, true),
            Observation::new("B", 40.0, true),
        ])
        .unwrap()
    }

    #[test]
    fn test_day_conversion() {
        let mut dataset = Dataset::new(vec![Observation::new("A", 304.375, true)]).unwrap();
        normalize_units(&mut dataset, TimeUnit::Days);
        assert_eq!(dataset.observations()[0].time, 10.0);
    }

    #[test]
    fn test_month_input_untouched() {
        let mut dataset = scenario();
        normalize_units(&mut dataset, TimeUnit::Months);
        assert_eq!(dataset, scenario());
    }

    #[test]
    fn test_cutoff_clips_and_recensors() {
        let mut dataset = scenario();
        let stats = apply_cutoff(&mut dataset, 24.0).unwrap();

        let rows: Vec<(f64, bool)> = dataset.iter().map(|o| (o.time, o.event)).collect();
        assert_eq!(
            rows,
            vec![
                (10.0, false),
                (20.0, true),
                (24.0, false),
                (15.0, false),
                (24.0, false),
                (24.0, false),
            ]
        );
        assert_eq!(stats, CutoffStats { clipped: 3, recensored: 3 });
    }

    #[test]
    fn test_event_exactly_at_cutoff_is_censored() {
        let mut dataset = Dataset::new(vec![
            Observation::new("A", 12.0, true),
            Observation::new("A", 11.0, true),
        ])
        .unwrap();
        let stats = apply_cutoff(&mut dataset, 12.0).unwrap();

        assert!(!dataset.observations()[0].event);
        assert!(dataset.observations()[1].event);
        assert_eq!(stats, CutoffStats { clipped: 0, recensored: 1 });
    }

    #[test]
    fn test_invalid_cutoff() {
        let mut dataset = scenario();
        assert!(apply_cutoff(&mut dataset, 0.0).is_err());
        assert!(apply_cutoff(&mut dataset, f64::NAN).is_err());
    }

    #[test]
    fn test_preprocess_days_then_cutoff() {
        let dataset = Dataset::new(vec![
            Observation::new("A", 365.25, true),
            Observation::new("B", 1000.0, true),
        ])
        .unwrap();
        let (out, stats) = preprocess(dataset, TimeUnit::Days, 24.0).unwrap();

        assert_relative_eq!(out.observations()[0].time, 12.0, epsilon = 1e-12);
        assert!(out.observations()[0].event);
        assert_eq!(out.observations()[1].time, 24.0);
        assert!(!out.observations()[1].event);
        assert_eq!(stats.clipped, 1);
    }

    #[test]
    fn test_time_unit_parsing() {
        assert_eq!("d".parse::<TimeUnit>().unwrap(), TimeUnit::Days);
        assert_eq!("Months".parse::<TimeUnit>().unwrap(), TimeUnit::Months);
        assert!("weeks".parse::<TimeUnit>().is_err());
    }
}
