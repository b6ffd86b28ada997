//! # km survival
//!
//! two-arm survival analysis: kaplan-meier curves, log-rank test and a cox hazard ratio
//!
//! ## what you get
//!
//! - xlsx / csv loading of a Group / Event / Time table
//! - day -> month conversion and administrative cutoff
//! - product-limit curves w/ log-log confidence bands and medians
//! - log-rank p-value, cox hazard ratio w/ confidence interval
//! - text / json summary, svg chart, spreadsheet export for SPSS
//!
//! ## quick start
//!
//! ```rust
//! use km_survival::{pipeline, report, Dataset, Observation};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dataset = Dataset::new(vec![
//!     Observation::new("A", 1.0, true),
//!     Observation::new("A", 2.0, true),
//!     Observation::new("A", 4.0, false),
//!     Observation::new("B", 3.0, true),
//!     Observation::new("B", 6.0, false),
//!     Observation::new("B", 9.0, true),
//! ])?;
//!
//! let result = pipeline::run(&pipeline::AnalysisConfig::default(), dataset)?;
//! println!("{}", report::summary_text(&result));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod kaplan_meier;
pub mod loader;
pub mod logrank;
pub mod model;
pub mod optimization;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod stats;
pub mod telemetry;

pub use data::{Dataset, Observation, SurvivalData};
pub use error::{KmError, Result};
pub use kaplan_meier::{KaplanMeier, Median};
pub use model::CoxModel;
pub use pipeline::{run, AnalysisConfig, AnalysisResult, AnalysisType};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_arm_smoke_run() {
        let dataset = Dataset::new(vec![
            Observation::new("A", 1.0, true),
            Observation::new("A", 2.0, true),
            Observation::new("A", 4.0, false),
            Observation::new("B", 3.0, true),
            Observation::new("B", 6.0, false),
            Observation::new("B", 9.0, true),
        ])
        .unwrap();

        let result = run(&AnalysisConfig::default(), dataset).unwrap();
        assert_eq!(result.medians(), [Median::Reached(2.0), Median::Reached(9.0)]);
        assert!(result.hazard_ratio.is_some());
        assert_eq!(report::summary_text(&result).lines().count(), 4);
    }
}
