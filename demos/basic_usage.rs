use km_survival::export::{export_filename, ExportCache};
use km_survival::pipeline::{run, AnalysisConfig, AnalysisType};
use km_survival::preprocess::TimeUnit;
use km_survival::{report, CoxModel, Dataset, Observation};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Kaplan-Meier Survival Analysis - Basic Usage Example");
    println!("====================================================\n");

    // follow-up in days, two arms of ten patients
    let control = [
        (120.0, true), (185.0, true), (240.0, false), (301.0, true), (365.0, true),
        (410.0, false), (480.0, true), (560.0, true), (690.0, false), (800.0, true),
    ];
    let treatment = [
        (150.0, false), (260.0, true), (330.0, false), (420.0, true), (500.0, false),
        (610.0, true), (700.0, false), (760.0, true), (820.0, false), (900.0, false),
    ];

    let rows = control
        .iter()
        .map(|&(t, e)| Observation::new("Control", t, e))
        .chain(treatment.iter().map(|&(t, e)| Observation::new("Treatment", t, e)))
        .collect();
    let dataset = Dataset::new(rows)?;

    println!("Dataset: {} patients, groups {:?}\n", dataset.len(), dataset.groups());

    let config = AnalysisConfig {
        analysis_type: AnalysisType::Os,
        day_unit: TimeUnit::Days,
        cutoff_month: 24.0,
        ..AnalysisConfig::default()
    };
    let result = run(&config, dataset)?;

    println!("Results");
    println!("-------");
    println!("{}\n", report::summary_text(&result));

    println!(
        "Cutoff at {} months: {} rows clipped, {} events censored",
        result.cutoff_month, result.cutoff_stats.clipped, result.cutoff_stats.recensored
    );
    if let Some(log_rank) = &result.log_rank {
        println!(
            "Log-rank chi2 = {:.3} (observed {:?}, expected [{:.2}, {:.2}])\n",
            log_rank.test_statistic, log_rank.observed, log_rank.expected[0], log_rank.expected[1]
        );
    }

    for group in &result.groups {
        println!("{} curve:", group.label);
        for point in group.curve.points().iter().filter(|p| p.events > 0) {
            println!(
                "  t = {:6.2}  at risk = {:2}  S = {:.3}  ({:.3} - {:.3})",
                point.time, point.at_risk, point.survival, point.ci_lower, point.ci_upper
            );
        }
    }

    // the same fit by hand, with Breslow ties for comparison
    let survival_data = result
        .export_rows
        .encode_groups(&[result.groups[0].label.clone(), result.groups[1].label.clone()])?;
    let mut model = CoxModel::new()
        .with_ties(km_survival::optimization::TieMethod::Breslow)
        .with_feature_names(vec!["Treatment vs Control".to_string()]);
    model.fit(&survival_data)?;
    println!("\nCox model (Breslow ties)");
    println!("{}", model.summary()?.to_table());

    let mut cache = ExportCache::new();
    let bytes = cache.get_or_render(&result.export_rows)?;
    println!(
        "Export {} would be {} bytes",
        export_filename(result.analysis_type),
        bytes.len()
    );

    let svg = report::render_svg(&result);
    println!("Chart is {} bytes of SVG", svg.len());

    Ok(())
}
