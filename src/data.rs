use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::Serialize;

use crate::error::{KmError, Result};

/// one row of the upload: treatment label, follow-up time, event flag
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub group: String,
    pub time: f64,    // months once preprocessed
    pub event: bool,  // true = event observed, false = censored
}

impl Observation {
    pub fn new(group: impl Into<String>, time: f64, event: bool) -> Self {
        Self {
            group: group.into(),
            time,
            event,
        }
    }
}

/// ordered collection of observations, partitioned by group label
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    /// validate rows and wrap them - times must be finite & non-negative
    pub fn new(observations: Vec<Observation>) -> Result<Self> {
        if observations.is_empty() {
            return Err(KmError::EmptyDataset);
        }

        for (i, obs) in observations.iter().enumerate() {
            if !obs.time.is_finite() || obs.time < 0.0 {
                return Err(KmError::invalid_value(
                    i + 1,
                    "Time",
                    format!("time must be finite and >= 0, got {}", obs.time),
                ));
            }
        }

        Ok(Self { observations })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub(crate) fn observations_mut(&mut self) -> &mut [Observation] {
        &mut self.observations
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    /// distinct group labels in order of first appearance
    pub fn groups(&self) -> Vec<String> {
        let mut seen: Vec<String> = Vec::new();
        for obs in &self.observations {
            if !seen.iter().any(|g| g == &obs.group) {
                seen.push(obs.group.clone());
            }
        }
        seen
    }

    /// (times, events) for one group, in dataset order
    pub fn group_arms(&self, group: &str) -> (Vec<f64>, Vec<bool>) {
        self.observations
            .iter()
            .filter(|obs| obs.group == group)
            .map(|obs| (obs.time, obs.event))
            .unzip()
    }

    /// one covariate column: index of each row's group in `groups`
    pub fn encode_groups(&self, groups: &[String]) -> Result<SurvivalData> {
        let mut times = Vec::with_capacity(self.len());
        let mut events = Vec::with_capacity(self.len());
        let mut codes = Vec::with_capacity(self.len());

        for (i, obs) in self.observations.iter().enumerate() {
            let code = groups.iter().position(|g| g == &obs.group).ok_or_else(|| {
                KmError::invalid_value(i + 1, "Group", format!("unknown group '{}'", obs.group))
            })?;
            times.push(obs.time);
            events.push(obs.event);
            codes.push(code as f64);
        }

        let covariates = Array2::from_shape_vec((codes.len(), 1), codes)
            .map_err(|e| KmError::invalid_dimensions(e.to_string()))?;
        SurvivalData::new(times, events, covariates)
    }
}

/// everyone still at risk at one distinct event time
#[derive(Debug, Clone, PartialEq)]
pub struct RiskSet {
    pub time: f64,
    pub events: Vec<usize>,   // rows with an event exactly at `time`
    pub members: Vec<usize>,  // rows with time >= `time`
}

/// survival data for regression - times, events, and covariates
#[derive(Debug, Clone)]
pub struct SurvivalData {
    times: Array1<f64>,         // time to event/censoring
    events: Vec<bool>,          // true = event, false = censored
    covariates: Array2<f64>,    // n_samples x n_features
    risk_sets: Vec<RiskSet>,    // precomputed, ascending by time
}

impl SurvivalData {
    /// make new survival data from raw vecs/arrays
    pub fn new(times: Vec<f64>, events: Vec<bool>, covariates: Array2<f64>) -> Result<Self> {
        let n_samples = times.len();

        if events.len() != n_samples {
            return Err(KmError::invalid_dimensions(format!(
                "times len ({}) != events len ({})",
                n_samples,
                events.len()
            )));
        }

        if covariates.nrows() != n_samples {
            return Err(KmError::invalid_dimensions(format!(
                "covariates rows ({}) != n_samples ({})",
                covariates.nrows(),
                n_samples
            )));
        }

        if times.iter().any(|&t| t < 0.0 || !t.is_finite()) {
            return Err(KmError::numerical_error(
                "survival times must be non-negative & finite",
            ));
        }

        let times = Array1::from(times);
        let risk_sets = compute_risk_sets(times.view(), &events);

        Ok(Self {
            times,
            events,
            covariates,
            risk_sets,
        })
    }

    /// how many subjects
    pub fn n_samples(&self) -> usize {
        self.times.len()
    }

    /// how many covariates per subject
    pub fn n_features(&self) -> usize {
        self.covariates.ncols()
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.times.view()
    }

    pub fn events(&self) -> &[bool] {
        &self.events
    }

    pub fn covariates(&self) -> ArrayView2<'_, f64> {
        self.covariates.view()
    }

    /// precomputed risk sets for optimization
    pub fn risk_sets(&self) -> &[RiskSet] {
        &self.risk_sets
    }

    pub fn n_events(&self) -> usize {
        self.events.iter().filter(|&&e| e).count()
    }

    /// unique event times in order
    pub fn event_times(&self) -> Vec<f64> {
        self.risk_sets.iter().map(|rs| rs.time).collect()
    }
}

fn compute_risk_sets(times: ArrayView1<f64>, events: &[bool]) -> Vec<RiskSet> {
    let mut event_times: Vec<f64> = times
        .iter()
        .zip(events)
        .filter_map(|(&t, &e)| if e { Some(t) } else { None })
        .collect();
    event_times.sort_by(f64::total_cmp);
    event_times.dedup();

    event_times
        .into_iter()
        .map(|time| {
            let events_at = (0..times.len())
                .filter(|&i| events[i] && times[i] == time)
                .collect();
            // everyone who hasn't had the event or been censored before this time
            let members = (0..times.len()).filter(|&i| times[i] >= time).collect();
            RiskSet {
                time,
                events: events_at,
                members,
            }
        })
        .collect()
}
