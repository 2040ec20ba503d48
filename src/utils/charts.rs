//! SVG charts for training history and dataset balance.
//!
//! Produces standalone SVG files with no rendering dependency.

use std::fmt::Write as _;
use std::path::Path;

use crate::utils::error::Result;

const PANEL_WIDTH: f64 = 600.0;
const PANEL_HEIGHT: f64 = 450.0;
const MARGIN_TOP: f64 = 50.0;
const MARGIN_RIGHT: f64 = 30.0;
const MARGIN_BOTTOM: f64 = 60.0;
const MARGIN_LEFT: f64 = 70.0;

pub const COLOR_TRAIN: &str = "#3498db";
pub const COLOR_VALIDATION: &str = "#e67e22";
const COLOR_BAR: &str = "#2ecc71";
const COLOR_GRID: &str = "#ecf0f1";
const COLOR_AXIS: &str = "#2c3e50";
const COLOR_TEXT: &str = "#2c3e50";

const FONT: &str = "Arial, sans-serif";

/// One line on a panel; x is the 1-based epoch
#[derive(Debug, Clone)]
pub struct DataSeries {
    pub name: String,
    pub values: Vec<f64>,
    pub color: String,
}

impl DataSeries {
    pub fn new(name: &str, values: Vec<f64>, color: &str) -> Self {
        Self {
            name: name.to_string(),
            values,
            color: color.to_string(),
        }
    }
}

/// A titled set of series drawn on shared axes
#[derive(Debug, Clone)]
pub struct Panel {
    pub title: String,
    pub y_label: String,
    pub series: Vec<DataSeries>,
}

/// Draw panels side by side into one SVG file
pub fn write_line_panels(panels: &[Panel], x_label: &str, output_path: &Path) -> Result<()> {
    let width = PANEL_WIDTH * panels.len().max(1) as f64;
    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}">"#,
        w = width,
        h = PANEL_HEIGHT
    );
    let _ = write!(svg, r#"<rect width="{}" height="{}" fill="white"/>"#, width, PANEL_HEIGHT);

    for (i, panel) in panels.iter().enumerate() {
        render_panel(&mut svg, panel, x_label, i as f64 * PANEL_WIDTH);
    }

    svg.push_str("</svg>");
    std::fs::write(output_path, svg)?;
    Ok(())
}

fn render_panel(svg: &mut String, panel: &Panel, x_label: &str, offset_x: f64) {
    let plot_width = PANEL_WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_height = PANEL_HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let left = offset_x + MARGIN_LEFT;
    let bottom = MARGIN_TOP + plot_height;

    let n_points = panel.series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let (y_min, y_max) = value_range(&panel.series);

    let x_pos = |idx: usize| {
        if n_points <= 1 {
            left + plot_width / 2.0
        } else {
            left + idx as f64 / (n_points - 1) as f64 * plot_width
        }
    };
    let y_pos = |v: f64| bottom - (v - y_min) / (y_max - y_min) * plot_height;

    let _ = write!(
        svg,
        r#"<text x="{}" y="30" text-anchor="middle" font-family="{}" font-size="16" font-weight="bold" fill="{}">{}</text>"#,
        left + plot_width / 2.0,
        FONT,
        COLOR_TEXT,
        escape_xml(&panel.title)
    );

    for i in 0..=5 {
        let value = y_min + i as f64 / 5.0 * (y_max - y_min);
        let y = y_pos(value);
        let _ = write!(
            svg,
            r#"<line x1="{}" y1="{}" x2="{}" y2="{}" stroke="{}" stroke-width="1"/>"#,
            left,
            y,
            left + plot_width,
            y,
            COLOR_GRID
        );
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="11" fill="{}">{:.2}</text>"#,
            left - 8.0,
            y + 4.0,
            FONT,
            COLOR_TEXT,
            value
        );
    }

    let _ = write!(
        svg,
        r#"<line x1="{l}" y1="{b}" x2="{r}" y2="{b}" stroke="{c}" stroke-width="2"/><line x1="{l}" y1="{t}" x2="{l}" y2="{b}" stroke="{c}" stroke-width="2"/>"#,
        l = left,
        r = left + plot_width,
        t = MARGIN_TOP,
        b = bottom,
        c = COLOR_AXIS
    );

    let tick_every = (n_points / 10).max(1);
    for idx in (0..n_points).step_by(tick_every) {
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="11" fill="{}">{}</text>"#,
            x_pos(idx),
            bottom + 18.0,
            FONT,
            COLOR_TEXT,
            idx + 1
        );
    }

    let _ = write!(
        svg,
        r#"<text x="{}" y="{}" text-anchor="middle" font-family="{}" font-size="13" fill="{}">{}</text>"#,
        left + plot_width / 2.0,
        PANEL_HEIGHT - 15.0,
        FONT,
        COLOR_TEXT,
        escape_xml(x_label)
    );
    let label_x = offset_x + 18.0;
    let label_y = PANEL_HEIGHT / 2.0;
    let _ = write!(
        svg,
        r#"<text x="{x}" y="{y}" text-anchor="middle" font-family="{}" font-size="13" fill="{}" transform="rotate(-90 {x} {y})">{}</text>"#,
        FONT,
        COLOR_TEXT,
        escape_xml(&panel.y_label),
        x = label_x,
        y = label_y
    );

    for series in &panel.series {
        if series.values.is_empty() {
            continue;
        }
        let path: Vec<String> = series
            .values
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                let cmd = if i == 0 { "M" } else { "L" };
                format!("{} {:.2} {:.2}", cmd, x_pos(i), y_pos(v))
            })
            .collect();
        let _ = write!(
            svg,
            r#"<path d="{}" fill="none" stroke="{}" stroke-width="2.5"/>"#,
            path.join(" "),
            series.color
        );
    }

    let mut legend_y = MARGIN_TOP + 8.0;
    for series in &panel.series {
        let lx = left + plot_width - 130.0;
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="14" height="14" fill="{}"/><text x="{}" y="{}" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            lx,
            legend_y,
            series.color,
            lx + 20.0,
            legend_y + 11.0,
            FONT,
            COLOR_TEXT,
            escape_xml(&series.name)
        );
        legend_y += 22.0;
    }
}

/// Horizontal bar chart of labelled counts
pub fn write_bar_chart(title: &str, bars: &[(String, usize)], output_path: &Path) -> Result<()> {
    let row_height = 32.0;
    let label_width = 120.0;
    let bar_area = PANEL_WIDTH - label_width - MARGIN_RIGHT - 60.0;
    let height = MARGIN_TOP + row_height * bars.len() as f64 + 20.0;
    let max = bars.iter().map(|(_, v)| *v).max().unwrap_or(0).max(1) as f64;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {w} {h}" width="{w}" height="{h}"><rect width="{w}" height="{h}" fill="white"/>"#,
        w = PANEL_WIDTH,
        h = height
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="30" text-anchor="middle" font-family="{}" font-size="16" font-weight="bold" fill="{}">{}</text>"#,
        PANEL_WIDTH / 2.0,
        FONT,
        COLOR_TEXT,
        escape_xml(title)
    );

    for (i, (label, value)) in bars.iter().enumerate() {
        let y = MARGIN_TOP + i as f64 * row_height;
        let w = *value as f64 / max * bar_area;
        let _ = write!(
            svg,
            r#"<text x="{}" y="{}" text-anchor="end" font-family="{}" font-size="12" fill="{}">{}</text>"#,
            label_width - 8.0,
            y + 17.0,
            FONT,
            COLOR_TEXT,
            escape_xml(label)
        );
        let _ = write!(
            svg,
            r#"<rect x="{}" y="{}" width="{:.2}" height="{}" fill="{}"/><text x="{}" y="{}" font-family="{}" font-size="11" fill="{}">{}</text>"#,
            label_width,
            y + 4.0,
            w,
            row_height - 8.0,
            COLOR_BAR,
            label_width + w + 6.0,
            y + 17.0,
            FONT,
            COLOR_TEXT,
            value
        );
    }

    svg.push_str("</svg>");
    std::fs::write(output_path, svg)?;
    Ok(())
}

/// Y range over all finite values with 5% padding; never degenerate
fn value_range(series: &[DataSeries]) -> (f64, f64) {
    let finite = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .filter(|v| v.is_finite());

    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });

    if !min.is_finite() {
        return (0.0, 1.0);
    }
    let span = (max - min).max(1e-6);
    let pad = span * 0.05;
    ((min - pad).max(0.0).min(min), max + pad)
}

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_range_pads_and_handles_empty() {
        assert_eq!(value_range(&[]), (0.0, 1.0));

        let series = vec![DataSeries::new("loss", vec![1.0, 2.0], COLOR_TRAIN)];
        let (lo, hi) = value_range(&series);
        assert!(lo <= 1.0 && lo >= 0.9);
        assert!(hi > 2.0);
    }

    #[test]
    fn test_value_range_flat_series() {
        let series = vec![DataSeries::new("acc", vec![0.5, 0.5], COLOR_TRAIN)];
        let (lo, hi) = value_range(&series);
        assert!(hi > lo);
    }

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & \"c\">"), "a&lt;b &amp; &quot;c&quot;&gt;");
    }

    #[test]
    fn test_write_line_panels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.svg");
        let panels = vec![
            Panel {
                title: "Model Accuracy".into(),
                y_label: "Accuracy".into(),
                series: vec![
                    DataSeries::new("Train", vec![0.3, 0.4, 0.5], COLOR_TRAIN),
                    DataSeries::new("Validation", vec![0.25, 0.35, 0.45], COLOR_VALIDATION),
                ],
            },
            Panel {
                title: "Model Loss".into(),
                y_label: "Loss".into(),
                series: vec![DataSeries::new("Train", vec![1.8, 1.5, 1.2], COLOR_TRAIN)],
            },
        ];

        write_line_panels(&panels, "Epoch", &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("Model Loss"));
        assert_eq!(svg.matches("<path").count(), 3);
    }

    #[test]
    fn test_write_bar_chart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.svg");
        let bars = vec![("happy".to_string(), 10), ("sad".to_string(), 4)];
        write_bar_chart("Class balance", &bars, &path).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains(">happy<"));
    }
}
