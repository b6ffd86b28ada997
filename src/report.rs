//! text summary, JSON summary and the SVG survival chart

use serde::Serialize;

use crate::data::Dataset;
use crate::error::Result;
use crate::export::EXPORT_HEADERS;
use crate::kaplan_meier::{CurvePoint, KaplanMeier, Median};
use crate::pipeline::AnalysisResult;

const WIDTH: f64 = 820.0;
const HEIGHT: f64 = 600.0;
const PLOT_LEFT: f64 = 80.0;
const PLOT_TOP: f64 = 50.0;
const PLOT_WIDTH: f64 = 540.0;
const PLOT_HEIGHT: f64 = 360.0;
const CAPTION_TOP: f64 = 475.0;
const COLORS: [&str; 2] = ["#1f77b4", "#ff7f0e"];

/// shown when no event makes the comparison estimable
const NOT_AVAILABLE: &str = "NA";

/// the four result lines: two medians, hazard ratio w/ CI, p-value
pub fn summary_lines(result: &AnalysisResult) -> Vec<String> {
    let mut lines: Vec<String> = result
        .groups
        .iter()
        .map(|g| format!("{} Median {}: {} months", g.label, result.analysis_type, g.median))
        .collect();

    let level = result.confidence_level * 100.0;
    lines.push(match &result.hazard_ratio {
        Some(hr) => format!(
            "HR = {:.2} ({:.0}% CI: {:.2}–{:.2})",
            hr.hazard_ratio, level, hr.ci_lower, hr.ci_upper
        ),
        None => format!("HR = {} ({:.0}% CI: {}–{})", NOT_AVAILABLE, level, NOT_AVAILABLE, NOT_AVAILABLE),
    });
    lines.push(match result.p_value() {
        Some(p) => format!("P = {:.3}", p),
        None => format!("P = {}", NOT_AVAILABLE),
    });
    lines
}

/// the summary lines joined, as printed under the chart
pub fn summary_text(result: &AnalysisResult) -> String {
    summary_lines(result).join("\n")
}

/// the adjusted rows as a plain table, same columns as the export
pub fn rows_table(rows: &Dataset) -> String {
    let mut table = format!("{:>10}  {:>5}  {}\n", EXPORT_HEADERS[0], EXPORT_HEADERS[1], EXPORT_HEADERS[2]);
    for obs in rows.iter() {
        table.push_str(&format!("{:>10.2}  {:>5}  {}\n", obs.time, u8::from(obs.event), obs.group));
    }
    table
}

#[derive(Serialize)]
struct JsonSummary<'a> {
    analysis_type: String,
    cutoff_month: f64,
    groups: Vec<JsonGroup<'a>>,
    hazard_ratio: Option<f64>,
    ci_lower: Option<f64>,
    ci_upper: Option<f64>,
    p_value: Option<f64>,
    log_rank_statistic: Option<f64>,
    rows_clipped: usize,
    events_recensored: usize,
    lines: Vec<String>,
}

#[derive(Serialize)]
struct JsonGroup<'a> {
    label: &'a str,
    subjects: usize,
    events: usize,
    median: Median,
}

/// machine-readable summary (curves omitted)
pub fn to_json(result: &AnalysisResult) -> Result<String> {
    let summary = JsonSummary {
        analysis_type: result.analysis_type.to_string(),
        cutoff_month: result.cutoff_month,
        groups: result
            .groups
            .iter()
            .map(|g| JsonGroup {
                label: &g.label,
                subjects: g.n_subjects,
                events: g.n_events,
                median: g.median,
            })
            .collect(),
        hazard_ratio: result.hazard_ratio.as_ref().map(|hr| hr.hazard_ratio),
        ci_lower: result.hazard_ratio.as_ref().map(|hr| hr.ci_lower),
        ci_upper: result.hazard_ratio.as_ref().map(|hr| hr.ci_upper),
        p_value: result.p_value(),
        log_rank_statistic: result.log_rank.as_ref().map(|r| r.test_statistic),
        rows_clipped: result.cutoff_stats.clipped,
        events_recensored: result.cutoff_stats.recensored,
        lines: summary_lines(result),
    };
    Ok(serde_json::to_string_pretty(&summary)?)
}

/// maps data coordinates onto the plot rectangle
struct Frame {
    x_max: f64,
}

impl Frame {
    fn x(&self, t: f64) -> f64 {
        PLOT_LEFT + t / self.x_max * PLOT_WIDTH
    }

    fn y(&self, s: f64) -> f64 {
        PLOT_TOP + (1.0 - s) * PLOT_HEIGHT
    }
}

/// standalone SVG document: curves, bands, 50% line, legend, caption box
pub fn render_svg(result: &AnalysisResult) -> String {
    let last_time = result
        .groups
        .iter()
        .filter_map(|g| g.curve.points().last().map(|p| p.time))
        .fold(0.0_f64, f64::max);
    let frame = Frame {
        x_max: if last_time > 0.0 { last_time } else { result.cutoff_month },
    };

    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="12">"#,
        w = WIDTH,
        h = HEIGHT
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r#"<rect width="{}" height="{}" fill="white"/>"#,
        WIDTH, HEIGHT
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r#"<text x="{}" y="30" text-anchor="middle" font-size="16">Kaplan-Meier ({})</text>"#,
        PLOT_LEFT + PLOT_WIDTH / 2.0,
        result.analysis_type
    ));
    svg.push('\n');

    push_axes(&mut svg, &frame, result);

    for (group, color) in result.groups.iter().zip(COLORS) {
        push_curve(&mut svg, &frame, &group.curve, color);
    }

    // 50% reference
    svg.push_str(&format!(
        r#"<line x1="{:.2}" y1="{y:.2}" x2="{:.2}" y2="{y:.2}" stroke="gray" stroke-dasharray="6,4"/>"#,
        frame.x(0.0),
        frame.x(frame.x_max),
        y = frame.y(0.5)
    ));
    svg.push('\n');

    push_legend(&mut svg, result);
    push_caption(&mut svg, result);

    svg.push_str("</svg>\n");
    svg
}

fn push_axes(svg: &mut String, frame: &Frame, result: &AnalysisResult) {
    let bottom = PLOT_TOP + PLOT_HEIGHT;
    svg.push_str(&format!(
        r#"<rect x="{}" y="{}" width="{}" height="{}" fill="none" stroke="black"/>"#,
        PLOT_LEFT, PLOT_TOP, PLOT_WIDTH, PLOT_HEIGHT
    ));
    svg.push('\n');

    let step = nice_step(frame.x_max / 6.0);
    let mut t = 0.0;
    while t <= frame.x_max + 1e-9 {
        let x = frame.x(t);
        svg.push_str(&format!(
            r#"<line x1="{x:.2}" y1="{b}" x2="{x:.2}" y2="{b2}" stroke="black"/><text x="{x:.2}" y="{ty}" text-anchor="middle">{label}</text>"#,
            x = x,
            b = bottom,
            b2 = bottom + 5.0,
            ty = bottom + 20.0,
            label = format_tick(t)
        ));
        svg.push('\n');
        t += step;
    }

    for i in 0..=5 {
        let s = i as f64 / 5.0;
        let y = frame.y(s);
        svg.push_str(&format!(
            r#"<line x1="{l2}" y1="{y:.2}" x2="{l}" y2="{y:.2}" stroke="black"/><text x="{tx}" y="{ty:.2}" text-anchor="end">{pct}</text>"#,
            l = PLOT_LEFT,
            l2 = PLOT_LEFT - 5.0,
            tx = PLOT_LEFT - 8.0,
            ty = y + 4.0,
            pct = i * 20
        ));
        svg.push('\n');
    }

    svg.push_str(&format!(
        r#"<text x="{}" y="{}" text-anchor="middle">Time (months)</text>"#,
        PLOT_LEFT + PLOT_WIDTH / 2.0,
        bottom + 42.0
    ));
    svg.push('\n');
    svg.push_str(&format!(
        r#"<text transform="translate(24,{}) rotate(-90)" text-anchor="middle">{} (%)</text>"#,
        PLOT_TOP + PLOT_HEIGHT / 2.0,
        result.analysis_type.survival_label()
    ));
    svg.push('\n');
}

fn push_curve(svg: &mut String, frame: &Frame, curve: &KaplanMeier, color: &str) {
    let points = curve.points();
    if points.is_empty() {
        return;
    }

    let upper = step_points(points, |p| p.ci_upper);
    let lower = step_points(points, |p| p.ci_lower);
    let band: Vec<String> = upper
        .iter()
        .chain(lower.iter().rev())
        .map(|&(t, s)| format!("{:.2},{:.2}", frame.x(t), frame.y(s)))
        .collect();
    svg.push_str(&format!(
        r#"<polygon points="{}" fill="{}" fill-opacity="0.2" stroke="none"/>"#,
        band.join(" "),
        color
    ));
    svg.push('\n');

    let path: Vec<String> = step_points(points, |p| p.survival)
        .iter()
        .enumerate()
        .map(|(i, &(t, s))| {
            let cmd = if i == 0 { 'M' } else { 'L' };
            format!("{}{:.2},{:.2}", cmd, frame.x(t), frame.y(s))
        })
        .collect();
    svg.push_str(&format!(
        r#"<path d="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
        path.join(" "),
        color
    ));
    svg.push('\n');

    for (t, s) in curve.censor_marks() {
        let x = frame.x(t);
        let y = frame.y(s);
        svg.push_str(&format!(
            r#"<line x1="{x:.2}" y1="{:.2}" x2="{x:.2}" y2="{:.2}" stroke="{c}"/>"#,
            y - 5.0,
            y + 5.0,
            x = x,
            c = color
        ));
        svg.push('\n');
    }
}

/// corners of the step function: each value holds until the next time
fn step_points(points: &[CurvePoint], value: impl Fn(&CurvePoint) -> f64) -> Vec<(f64, f64)> {
    let mut out = Vec::with_capacity(points.len() * 2);
    for (i, p) in points.iter().enumerate() {
        out.push((p.time, value(p)));
        if let Some(next) = points.get(i + 1) {
            out.push((next.time, value(p)));
        }
    }
    out
}

fn push_legend(svg: &mut String, result: &AnalysisResult) {
    let x = PLOT_LEFT + PLOT_WIDTH + 20.0;
    svg.push_str(&format!(
        r#"<text x="{}" y="{}" font-weight="bold">Treatment group</text>"#,
        x,
        PLOT_TOP + 10.0
    ));
    svg.push('\n');

    for (i, (group, color)) in result.groups.iter().zip(COLORS).enumerate() {
        let y = PLOT_TOP + 32.0 + i as f64 * 20.0;
        svg.push_str(&format!(
            r#"<line x1="{x}" y1="{y}" x2="{x2}" y2="{y}" stroke="{c}" stroke-width="2"/><text x="{tx}" y="{ty}">{label}</text>"#,
            x = x,
            x2 = x + 24.0,
            y = y,
            c = color,
            tx = x + 30.0,
            ty = y + 4.0,
            label = escape_xml(&group.label)
        ));
        svg.push('\n');
    }
}

fn push_caption(svg: &mut String, result: &AnalysisResult) {
    let lines = summary_lines(result);
    let height = 16.0 + lines.len() as f64 * 18.0;
    svg.push_str(&format!(
        r#"<rect x="{}" y="{}" width="{}" height="{}" rx="6" fill="white" stroke="black"/>"#,
        PLOT_LEFT,
        CAPTION_TOP,
        PLOT_WIDTH,
        height
    ));
    svg.push('\n');

    for (i, line) in lines.iter().enumerate() {
        svg.push_str(&format!(
            r#"<text x="{}" y="{}">{}</text>"#,
            PLOT_LEFT + 12.0,
            CAPTION_TOP + 22.0 + i as f64 * 18.0,
            escape_xml(line)
        ));
        svg.push('\n');
    }
}

/// 1, 2 or 5 times a power of ten, at least `raw`
fn nice_step(raw: f64) -> f64 {
    if !(raw > 0.0) {
        return 1.0;
    }
    let magnitude = 10f64.powf(raw.log10().floor());
    [1.0, 2.0, 5.0, 10.0]
        .iter()
        .map(|m| m * magnitude)
        .find(|&step| step >= raw)
        .unwrap_or(10.0 * magnitude)
}

fn format_tick(t: f64) -> String {
    if (t - t.round()).abs() < 1e-9 {
        format!("{}", t.round() as i64)
    } else {
        format!("{:.1}", t)
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Observation};
    use crate::pipeline::{run, AnalysisConfig, AnalysisType};

    fn result() -> AnalysisResult {
        let a = [(1.0, true), (2.0, true), (2.0, false), (3.0, true), (4.0, false), (5.0, true)];
        let b = [(2.0, false), (4.0, true), (6.0, true), (7.0, false), (8.0, true), (9.0, true)];
        let rows = a
            .iter()
            .map(|&(t, e)| Observation::new("Arm <A>", t, e))
            .chain(b.iter().map(|&(t, e)| Observation::new("Arm B", t, e)))
            .collect();
        let config = AnalysisConfig {
            analysis_type: AnalysisType::Pfs,
            ..AnalysisConfig::default()
        };
        run(&config, Dataset::new(rows).unwrap()).unwrap()
    }

    #[test]
    fn test_summary_lines() {
        let lines = summary_lines(&result());
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "Arm <A> Median PFS: 3.00 months");
        assert_eq!(lines[1], "Arm B Median PFS: 8.00 months");
        assert_eq!(lines[2], "HR = 0.13 (95% CI: 0.01–1.20)");
        assert_eq!(lines[3], "P = 0.037");
    }

    #[test]
    fn test_not_reached_median() {
        let mut result = result();
        result.groups[1].median = Median::NotReached;
        assert_eq!(summary_lines(&result)[1], "Arm B Median PFS: Not reached months");
        assert_eq!(summary_text(&result).lines().count(), 4);
    }

    #[test]
    fn test_undefined_comparison_prints_na() {
        let mut result = result();
        result.hazard_ratio = None;
        result.log_rank = None;

        let lines = summary_lines(&result);
        assert_eq!(lines[2], "HR = NA (95% CI: NA–NA)");
        assert_eq!(lines[3], "P = NA");

        let value: serde_json::Value = serde_json::from_str(&to_json(&result).unwrap()).unwrap();
        assert!(value["hazard_ratio"].is_null());
        assert!(value["p_value"].is_null());
        assert!(render_svg(&result).contains("P = NA"));
    }

    #[test]
    fn test_svg_contents() {
        let svg = render_svg(&result());

        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert!(svg.contains("Kaplan-Meier (PFS)"));
        assert!(svg.contains("Progression-free survival (PFS) (%)"));
        assert!(svg.contains("Arm &lt;A&gt;"));
        assert!(!svg.contains("Arm <A>"));
        assert!(svg.contains("stroke-dasharray"));
        assert_eq!(svg.matches("<path").count(), 2);
        assert_eq!(svg.matches("<polygon").count(), 2);
    }

    #[test]
    fn test_json_summary() {
        let json = to_json(&result()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["analysis_type"], "PFS");
        assert_eq!(value["groups"][0]["median"], 3.0);
        assert_eq!(value["lines"][3], "P = 0.037");
    }

    #[test]
    fn test_rows_table_lists_adjusted_rows() {
        let result = result();
        let table = rows_table(&result.export_rows);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 13);
        assert_eq!(lines[0], "      Time  Event  Group");
        assert_eq!(lines[1], "      1.00      1  Arm <A>");
        assert_eq!(lines[3], "      2.00      0  Arm <A>");
    }

    #[test]
    fn test_step_points() {
        let km = KaplanMeier::fit("A", &[1.0, 2.0], &[true, true]).unwrap();
        let corners = step_points(km.points(), |p| p.survival);
        assert_eq!(
            corners,
            vec![(0.0, 1.0), (1.0, 1.0), (1.0, 0.5), (2.0, 0.5), (2.0, 0.0)]
        );
    }

    #[test]
    fn test_nice_step() {
        assert_eq!(nice_step(4.0), 5.0);
        assert_eq!(nice_step(1.5), 2.0);
        assert_eq!(nice_step(0.3), 0.5);
        assert_eq!(nice_step(0.0), 1.0);
    }
}
