//! two-sample log-rank (Mantel-Haenszel) test

use serde::Serialize;
use tracing::debug;

use crate::error::{KmError, Result};
use crate::stats::chi2_sf_1df;

/// log-rank comparison of two arms
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRankResult {
    pub test_statistic: f64, // chi-square, 1 df
    pub p_value: f64,
    pub observed: [f64; 2],
    pub expected: [f64; 2],
    pub variance: f64,
}

/// compare arm A against arm B under H0: equal survival
pub fn logrank_test(
    times_a: &[f64],
    events_a: &[bool],
    times_b: &[f64],
    events_b: &[bool],
) -> Result<LogRankResult> {
    if times_a.len() != events_a.len() || times_b.len() != events_b.len() {
        return Err(KmError::invalid_dimensions(
            "times and events must have same length in each arm",
        ));
    }
    if times_a.is_empty() || times_b.is_empty() {
        return Err(KmError::invalid_dimensions("both arms need at least one subject"));
    }

    let mut event_times: Vec<f64> = times_a
        .iter()
        .zip(events_a)
        .chain(times_b.iter().zip(events_b))
        .filter_map(|(&t, &e)| if e { Some(t) } else { None })
        .collect();
    event_times.sort_by(f64::total_cmp);
    event_times.dedup();

    let mut observed_a = 0.0;
    let mut expected_a = 0.0;
    let mut total_events = 0.0;
    let mut variance = 0.0;

    for &t in &event_times {
        let n_a = at_risk(times_a, t);
        let n_b = at_risk(times_b, t);
        let d_a = events_at(times_a, events_a, t);
        let d_b = events_at(times_b, events_b, t);

        let n = n_a + n_b;
        let d = d_a + d_b;

        observed_a += d_a;
        expected_a += d * n_a / n;
        total_events += d;

        // hypergeometric variance, zero when only one subject remains
        if n > 1.0 {
            variance += n_a * n_b * d * (n - d) / (n * n * (n - 1.0));
        }
    }

    if variance <= 0.0 {
        return Err(KmError::numerical_error(
            "log-rank variance is zero - no informative events in either arm",
        ));
    }

    let test_statistic = (observed_a - expected_a).powi(2) / variance;
    let p_value = chi2_sf_1df(test_statistic);

    debug!(
        statistic = test_statistic,
        p_value,
        events = total_events,
        "log-rank test"
    );

    Ok(LogRankResult {
        test_statistic,
        p_value,
        observed: [observed_a, total_events - observed_a],
        expected: [expected_a, total_events - expected_a],
        variance,
    })
}

fn at_risk(times: &[f64], t: f64) -> f64 {
    times.iter().filter(|&&x| x >= t).count() as f64
}

fn events_at(times: &[f64], events: &[bool], t: f64) -> f64 {
    times
        .iter()
        .zip(events)
        .filter(|&(&x, &e)| e && x == t)
        .count() as f64
}
