//! Markers taking the largest share of each cell's total intensity

use crate::orion_common::*;
use matrix_util::utils::quantile_sorted;
use rayon::prelude::*;

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerShare {
    pub name: Box<str>,
    /// mean percent of the cell total
    pub mean: f32,
    pub q25: f32,
    pub median: f32,
    pub q75: f32,
}

/// Rank markers by their mean percent of per-cell totals; the top
/// `n_top` are returned in decreasing order
pub fn highest_expressed(raw: &Mat, var_names: &[Box<str>], n_top: usize) -> Vec<MarkerShare> {
    let totals: Vec<f32> = raw.row_iter().map(|r| r.sum()).collect();

    let mut shares: Vec<MarkerShare> = (0..raw.ncols())
        .into_par_iter()
        .map(|j| {
            let mut pct: Vec<f32> = raw
                .column(j)
                .iter()
                .zip(totals.iter())
                .map(|(&v, &t)| if t > 0.0 { 100.0 * v / t } else { 0.0 })
                .collect();
            let mean = pct.iter().sum::<f32>() / pct.len().max(1) as f32;
            pct.sort_by(|a, b| a.total_cmp(b));
            MarkerShare {
                name: var_names[j].clone(),
                mean,
                q25: quantile_sorted(&pct, 0.25),
                median: quantile_sorted(&pct, 0.5),
                q75: quantile_sorted(&pct, 0.75),
            }
        })
        .collect();

    shares.sort_by(|a, b| b.mean.total_cmp(&a.mean));
    shares.truncate(n_top);
    shares
}

pub fn shares_to_lines(shares: &[MarkerShare]) -> Vec<Box<str>> {
    let mut lines: Vec<Box<str>> = vec!["marker\tmean_pct\tq25\tmedian\tq75".into()];
    lines.extend(shares.iter().map(|s| {
        format!(
            "{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
            s.name, s.mean, s.q25, s.median, s.q75
        )
        .into_boxed_str()
    }));
    lines
}

/// Horizontal bars scaled to the largest mean
pub fn shares_ascii(shares: &[MarkerShare], max_width: usize) -> String {
    let max_mean = shares.first().map(|s| s.mean).unwrap_or(0.0).max(f32::EPSILON);
    let name_width = shares.iter().map(|s| s.name.len()).max().unwrap_or(0);

    let mut lines = vec!["Highest expressed markers (% of cell total):".to_string()];
    for s in shares.iter() {
        let bar_len = ((s.mean / max_mean) * max_width as f32) as usize;
        lines.push(format!(
            "  {:>width$}  {:>6.2}%  {}",
            s.name,
            s.mean,
            "█".repeat(bar_len.max(1)),
            width = name_width
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_cell_total() {
        // three cells, markers A, B, C
        let raw = Mat::from_row_slice(3, 3, &[2., 1., 1., 3., 1., 0., 0., 0., 0.]);
        let names: Vec<Box<str>> = vec!["A".into(), "B".into(), "C".into()];
        let top = highest_expressed(&raw, &names, 2);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].name.as_ref(), "A");
        // (50 + 75 + 0) / 3
        approx::assert_abs_diff_eq!(top[0].mean, 125.0 / 3.0, epsilon = 1e-4);
        approx::assert_abs_diff_eq!(top[0].median, 50.0, epsilon = 1e-4);
        assert_eq!(top[1].name.as_ref(), "B");

        let lines = shares_to_lines(&top);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("A\t41.6667"));
        assert!(shares_ascii(&top, 20).contains("█"));
    }
}
