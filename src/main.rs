use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing::info;

use km_survival::config::FileConfig;
use km_survival::export::{export_filename, to_xlsx_bytes};
use km_survival::pipeline::{self, AnalysisConfig, AnalysisType};
use km_survival::preprocess::TimeUnit;
use km_survival::{loader, report, telemetry};

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum AnalysisArg {
    /// Overall survival
    Os,
    /// Progression-free survival
    Pfs,
}

impl From<AnalysisArg> for AnalysisType {
    fn from(arg: AnalysisArg) -> Self {
        match arg {
            AnalysisArg::Os => AnalysisType::Os,
            AnalysisArg::Pfs => AnalysisType::Pfs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum UnitArg {
    /// Time column is in days
    D,
    /// Time column is already in months
    M,
}

impl From<UnitArg> for TimeUnit {
    fn from(arg: UnitArg) -> Self {
        match arg {
            UnitArg::D => TimeUnit::Days,
            UnitArg::M => TimeUnit::Months,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser)]
#[command(name = "km-survival")]
#[command(about = "Two-arm Kaplan-Meier survival analysis with log-rank test and Cox hazard ratio", version)]
struct Cli {
    /// Input table (.xlsx or .csv) with Group, Event and Time columns
    input: PathBuf,

    /// Endpoint: overall or progression-free survival
    #[arg(short, long, value_enum)]
    analysis: Option<AnalysisArg>,

    /// Unit of the Time column
    #[arg(short, long, value_enum)]
    unit: Option<UnitArg>,

    /// Administrative cutoff in months
    #[arg(long, value_name = "MONTHS")]
    cutoff: Option<f64>,

    /// Directory for the chart and the spreadsheet export
    #[arg(short, long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Config file (defaults to ./km-survival.toml when present)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Skip writing the SVG chart
    #[arg(long)]
    no_chart: bool,

    /// Skip writing the spreadsheet export
    #[arg(long)]
    no_export: bool,

    /// Print the cutoff-adjusted Time/Event/Group rows that get exported
    #[arg(long)]
    show_rows: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    /// CLI flags take precedence over the config file
    fn analysis_config(&self, file: &FileConfig) -> AnalysisConfig {
        let mut config = file.apply(AnalysisConfig::default());
        if let Some(analysis) = self.analysis {
            config.analysis_type = analysis.into();
        }
        if let Some(unit) = self.unit {
            config.day_unit = unit.into();
        }
        if let Some(cutoff) = self.cutoff {
            config.cutoff_month = cutoff;
        }
        config
    }

    fn out_dir(&self, file: &FileConfig) -> PathBuf {
        self.out_dir
            .clone()
            .or_else(|| file.out_dir.clone())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init_tracing(
        cli.log_format == LogFormat::Json,
        telemetry::level_for_verbosity(cli.verbose),
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let file = FileConfig::load(cli.config.as_deref()).context("failed to load config")?;
    let config = cli.analysis_config(&file);
    let out_dir = cli.out_dir(&file);

    let dataset = loader::load_path(&cli.input)
        .with_context(|| format!("failed to read {}", cli.input.display()))?;
    let result = pipeline::run(&config, dataset).context("analysis failed")?;

    // render everything before touching the filesystem
    let chart = (!cli.no_chart).then(|| report::render_svg(&result));
    let spreadsheet = if cli.no_export {
        None
    } else {
        Some(to_xlsx_bytes(&result.export_rows)?)
    };

    if chart.is_some() || spreadsheet.is_some() {
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;
    }
    if let Some(svg) = chart {
        let path = out_dir.join(format!("km_{}.svg", result.analysis_type.as_str().to_ascii_lowercase()));
        fs::write(&path, svg).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote chart");
    }
    if let Some(bytes) = spreadsheet {
        let path = out_dir.join(export_filename(result.analysis_type));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote export");
    }

    if cli.json {
        println!("{}", report::to_json(&result)?);
    } else {
        if cli.show_rows {
            println!("{}", report::rows_table(&result.export_rows));
        }
        println!("{}", report::summary_text(&result));
    }
    Ok(())
}
