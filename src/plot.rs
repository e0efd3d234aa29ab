// Charts written as PNG: feature importances / coefficients and the model comparison.
use plotters::coord::Shift;
use plotters::prelude::*;
use std::error::Error;
use std::ops::Range;
use std::path::Path;

use crate::compare::Comparison;

pub type PlotResult = std::result::Result<(), Box<dyn Error + Send + Sync>>;

/// Draws one horizontal bar per (name, value) pair into `area`
/// input: drawing area, caption, x-axis label, names with their values, bar colour
/// output: none (draws into `area`)
/// logic: compute an X range that always contains zero; label each Y tick with its name;
/// draw one bar from zero to each value
fn draw_bars<DB: DrawingBackend>(
    area: &DrawingArea<DB, Shift>,
    caption: &str,
    x_desc: &str,
    results: &[(String, f64)],
    color: &RGBColor,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>> {
    let names: Vec<&str> = results.iter().map(|(n, _)| n.as_str()).collect();
    let values: Vec<f64> = results.iter().map(|(_, v)| *v).collect();
    let count = results.len();

    let x_range = value_range(&values);

    let mut chart = ChartBuilder::on(area)
        .caption(caption, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(160)
        .build_cartesian_2d(x_range, 0..count)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(count)
        .y_label_formatter(&|idx| {
            let i = *idx;
            if i < count {
                names[i].to_string()
            } else {
                String::new()
            }
        })
        .x_desc(x_desc)
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, &v)| {
        let start = 0.0_f64.min(v);
        let end = 0.0_f64.max(v);
        Rectangle::new([(start, i), (end, i + 1)], color.mix(0.6).filled())
    }))?;
    Ok(())
}

/// Padded axis range covering every value and zero.
fn value_range(values: &[f64]) -> Range<f64> {
    let min_x = values.iter().cloned().fold(0.0_f64, f64::min);
    let max_x = values.iter().cloned().fold(0.0_f64, f64::max);
    let pad = if max_x > min_x { (max_x - min_x) * 0.1 } else { 1.0 };
    (min_x - pad)..(max_x + pad)
}

/// Horizontal bar chart of feature importances or coefficients saved to `path`.
pub fn plot_importances(path: &Path, caption: &str, results: &[(String, f64)]) -> PlotResult {
    let root = BitMapBackend::new(path, (1000, 600)).into_drawing_area();
    root.fill(&WHITE)?;
    draw_bars(&root, caption, "Importance", results, &BLUE)?;
    root.present()?;
    Ok(())
}

/// Side-by-side R² and RMSE bars of the latest metrics of each model.
pub fn plot_comparison(path: &Path, comparison: &Comparison) -> PlotResult {
    let root = BitMapBackend::new(path, (1200, 500)).into_drawing_area();
    root.fill(&WHITE)?;
    let panels = root.split_evenly((1, 2));

    let pairs = |values: &[f64]| -> Vec<(String, f64)> {
        comparison
            .models
            .iter()
            .cloned()
            .zip(values.iter().copied())
            .collect()
    };
    draw_bars(&panels[0], "R² Score (higher is better)", "R²", &pairs(&comparison.r2), &GREEN)?;
    draw_bars(&panels[1], "RMSE (lower is better)", "RMSE", &pairs(&comparison.rmse), &RED)?;
    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_always_contains_zero() {
        let r = value_range(&[0.2, 0.5, 0.3]);
        assert!(r.start < 0.0 && r.end > 0.5);
        let r = value_range(&[-4.0, -1.0]);
        assert!(r.start < -4.0 && r.end > 0.0);
    }

    #[test]
    fn flat_values_still_get_width() {
        let r = value_range(&[0.0, 0.0]);
        assert_eq!(r, -1.0..1.0);
        assert_eq!(value_range(&[]), -1.0..1.0);
    }
}
