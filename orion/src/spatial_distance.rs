//! Distance from every cell to the nearest cell of each label

use crate::anndata::{AnnData, SPATIAL_KEY};
use crate::cell_table::IMAGE_ID_COLUMN;
use crate::orion_common::*;
use fnv::FnvHashMap;
use rayon::prelude::*;
use std::collections::BTreeMap;

pub struct SpatialDistance {
    /// distinct labels, columns of `distances`
    pub labels: Vec<Box<str>>,
    /// cells × labels, NaN where the label is absent from the cell's image
    pub distances: Mat,
}

impl SpatialDistance {
    /// Label × label mean distance: entry (p, q) averages, over cells
    /// labelled `p`, the distance to the nearest `q` (NaN skipped)
    pub fn mean_by_label(&self, cell_labels: &[Option<Box<str>>]) -> Mat {
        let nl = self.labels.len();
        let index: BTreeMap<&str, usize> = self
            .labels
            .iter()
            .enumerate()
            .map(|(k, l)| (l.as_ref(), k))
            .collect();

        let mut sums = Mat::zeros(nl, nl);
        let mut counts = Mat::zeros(nl, nl);

        for (i, label) in cell_labels.iter().enumerate() {
            let Some(&p) = label.as_deref().and_then(|l| index.get(l)) else {
                continue;
            };
            for q in 0..nl {
                let d = self.distances[(i, q)];
                if d.is_finite() {
                    sums[(p, q)] += d;
                    counts[(p, q)] += 1.0;
                }
            }
        }

        sums.zip_map(&counts, |s, c| if c > 0.0 { s / c } else { f32::NAN })
    }
}

/// Labels in a stable order: numerically when every label is an
/// integer, lexicographically otherwise
pub fn sorted_labels(cell_labels: &[Option<Box<str>>]) -> Vec<Box<str>> {
    let mut labels: Vec<Box<str>> = cell_labels
        .iter()
        .flatten()
        .cloned()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    if labels.iter().all(|l| l.parse::<i64>().is_ok()) {
        labels.sort_by_key(|l| l.parse::<i64>().unwrap_or_default());
    }
    labels
}

/// Exact nearest-point lookup over one label's centroids, bucketed
/// on a square grid of about one point per bucket
struct PointGrid {
    side: f32,
    origin: (f32, f32),
    /// bucket index range covered by the points, `(x0, y0, x1, y1)`
    bounds: (i64, i64, i64, i64),
    buckets: FnvHashMap<(i64, i64), Vec<(f32, f32)>>,
}

impl PointGrid {
    fn new(points: &[(f32, f32)]) -> Self {
        let (mut xmin, mut ymin) = (f32::INFINITY, f32::INFINITY);
        let (mut xmax, mut ymax) = (f32::NEG_INFINITY, f32::NEG_INFINITY);
        for &(x, y) in points {
            xmin = xmin.min(x);
            ymin = ymin.min(y);
            xmax = xmax.max(x);
            ymax = ymax.max(y);
        }

        let span = (xmax - xmin).max(ymax - ymin);
        let per_axis = (points.len() as f32).sqrt().ceil().max(1.0);
        let side = if span.is_finite() && span > 0.0 {
            span / per_axis
        } else {
            1.0
        };

        let mut grid = Self {
            side,
            origin: (xmin, ymin),
            bounds: (i64::MAX, i64::MAX, i64::MIN, i64::MIN),
            buckets: FnvHashMap::default(),
        };

        for &(x, y) in points {
            let (bx, by) = grid.bucket(x, y);
            let (x0, y0, x1, y1) = grid.bounds;
            grid.bounds = (x0.min(bx), y0.min(by), x1.max(bx), y1.max(by));
            grid.buckets.entry((bx, by)).or_default().push((x, y));
        }
        grid
    }

    fn bucket(&self, x: f32, y: f32) -> (i64, i64) {
        (
            ((x - self.origin.0) / self.side).floor() as i64,
            ((y - self.origin.1) / self.side).floor() as i64,
        )
    }

    /// Buckets at Chebyshev distance `r` from `(bx, by)` that can hold points
    fn ring(&self, bx: i64, by: i64, r: i64) -> Vec<(i64, i64)> {
        let (x0, y0, x1, y1) = self.bounds;
        let mut keys = vec![];

        let rows = if r == 0 { vec![by] } else { vec![by - r, by + r] };
        for iy in rows.into_iter().filter(|iy| (y0..=y1).contains(iy)) {
            for ix in (bx - r).max(x0)..=(bx + r).min(x1) {
                keys.push((ix, iy));
            }
        }

        if r > 0 {
            for ix in [bx - r, bx + r].into_iter().filter(|ix| (x0..=x1).contains(ix)) {
                for iy in (by - r + 1).max(y0)..=(by + r - 1).min(y1) {
                    keys.push((ix, iy));
                }
            }
        }
        keys
    }

    /// Euclidean distance to the nearest point
    fn nearest(&self, x: f32, y: f32) -> f32 {
        if self.buckets.is_empty() || !(x.is_finite() && y.is_finite()) {
            return f32::NAN;
        }

        let (bx, by) = self.bucket(x, y);
        let (x0, y0, x1, y1) = self.bounds;
        let gap = |b: i64, lo: i64, hi: i64| (lo - b).max(b - hi).max(0);
        let r_min = gap(bx, x0, x1).max(gap(by, y0, y1));
        let r_max = (bx - x0)
            .abs()
            .max((bx - x1).abs())
            .max((by - y0).abs())
            .max((by - y1).abs());

        let mut best = f32::INFINITY;
        for r in r_min..=r_max {
            // ring r is at least (r - 1) sides away; one more ring of slack
            // covers rounding at bucket edges
            if best <= (r - 2).max(0) as f32 * self.side {
                break;
            }
            for key in self.ring(bx, by, r) {
                let Some(points) = self.buckets.get(&key) else {
                    continue;
                };
                for &(px, py) in points {
                    let d = ((px - x) * (px - x) + (py - y) * (py - y)).sqrt();
                    best = best.min(d);
                }
            }
        }
        best
    }
}

/// Nearest-label distances, computed separately within each image
///
/// * `coords` - cells × 2 centroids
/// * `cell_labels` - label per cell (`None` for unlabelled cells)
/// * `image_ids` - image per cell; all cells share one image if `None`
pub fn spatial_distance(
    coords: &Mat,
    cell_labels: &[Option<Box<str>>],
    image_ids: Option<&[Option<Box<str>>]>,
) -> anyhow::Result<SpatialDistance> {
    let n = coords.nrows();
    if cell_labels.len() != n {
        anyhow::bail!("{} labels for {} cells", cell_labels.len(), n);
    }
    if coords.ncols() < 2 {
        anyhow::bail!("spatial coordinates need 2 columns, got {}", coords.ncols());
    }

    let labels = sorted_labels(cell_labels);
    if labels.is_empty() {
        anyhow::bail!("no labelled cells");
    }

    let mut images: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
    for i in 0..n {
        let image = image_ids
            .and_then(|ids| ids.get(i))
            .and_then(|id| id.as_deref())
            .unwrap_or("");
        images.entry(image).or_default().push(i);
    }

    info!(
        "spatial distance: {} cells, {} labels, {} image(s)",
        n,
        labels.len(),
        images.len()
    );

    let mut distances = Mat::from_element(n, labels.len(), f32::NAN);

    for (image, cells) in images.iter() {
        for (q, label) in labels.iter().enumerate() {
            let members: Vec<usize> = cells
                .iter()
                .copied()
                .filter(|&i| cell_labels[i].as_deref() == Some(label.as_ref()))
                .collect();

            if members.is_empty() {
                log::debug!("image '{}' has no '{}' cells", image, label);
                continue;
            }

            let grid = PointGrid::new(
                &members
                    .iter()
                    .map(|&i| (coords[(i, 0)], coords[(i, 1)]))
                    .collect::<Vec<_>>(),
            );

            let nearest: Vec<(usize, f32)> = cells
                .par_iter()
                .map(|&i| (i, grid.nearest(coords[(i, 0)], coords[(i, 1)])))
                .collect();

            for (i, d) in nearest {
                distances[(i, q)] = d;
            }
        }
    }

    Ok(SpatialDistance { labels, distances })
}

/// Run on the container, reading image ids from `obs` when present
pub fn spatial_distance_of(
    adata: &AnnData,
    cell_labels: &[Option<Box<str>>],
) -> anyhow::Result<SpatialDistance> {
    let image_ids = adata.obs_categorical(IMAGE_ID_COLUMN).ok();
    spatial_distance(adata.obsm(SPATIAL_KEY)?, cell_labels, image_ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(xs: &[Option<&str>]) -> Vec<Option<Box<str>>> {
        xs.iter().map(|l| l.map(Box::from)).collect()
    }

    #[test]
    fn nearest_label_distance_counts_the_cell_itself() {
        let coords = Mat::from_row_slice(4, 2, &[0., 0., 3., 4., 10., 0., 0., 1.]);
        let cell_labels = labels(&[Some("A"), Some("B"), Some("A"), None]);

        let sd = spatial_distance(&coords, &cell_labels, None).unwrap();
        let expected: Vec<Box<str>> = vec!["A".into(), "B".into()];
        assert_eq!(sd.labels, expected);

        // own label
        assert_eq!(sd.distances[(0, 0)], 0.0);
        assert_eq!(sd.distances[(1, 1)], 0.0);
        // cell 0 to B at (3,4)
        approx::assert_abs_diff_eq!(sd.distances[(0, 1)], 5.0, epsilon = 1e-5);
        // unlabelled cell still gets distances
        approx::assert_abs_diff_eq!(sd.distances[(3, 0)], 1.0, epsilon = 1e-5);

        let summary = sd.mean_by_label(&cell_labels);
        assert_eq!(summary[(0, 0)], 0.0);
        // A cells: 5 and |(10,0)-(3,4)| = sqrt(65)
        approx::assert_abs_diff_eq!(
            summary[(0, 1)],
            (5.0 + 65f32.sqrt()) / 2.0,
            epsilon = 1e-4
        );
    }

    #[test]
    fn labels_missing_in_an_image_give_nan() {
        let coords = Mat::from_row_slice(4, 2, &[0., 0., 1., 0., 0., 0., 2., 0.]);
        let cell_labels = labels(&[Some("A"), Some("B"), Some("A"), Some("A")]);
        let images = labels(&[Some("img1"), Some("img1"), Some("img2"), Some("img2")]);

        let sd = spatial_distance(&coords, &cell_labels, Some(&images)).unwrap();
        approx::assert_abs_diff_eq!(sd.distances[(0, 1)], 1.0, epsilon = 1e-5);
        assert!(sd.distances[(2, 1)].is_nan());
        assert!(sd.distances[(3, 1)].is_nan());
        approx::assert_abs_diff_eq!(sd.distances[(3, 0)], 0.0, epsilon = 1e-5);

        // image 2 cells are skipped in the A→B mean
        let summary = sd.mean_by_label(&cell_labels);
        approx::assert_abs_diff_eq!(summary[(0, 1)], 1.0, epsilon = 1e-5);
    }

    #[test]
    fn grid_search_matches_brute_force() {
        use rand::rngs::SmallRng;
        use rand::{Rng, SeedableRng};

        let mut rng = SmallRng::seed_from_u64(17);
        let n = 2000;
        let coords = Mat::from_fn(n, 2, |_, _| rng.random_range(0.0..5000.0f32));
        let label_index: Vec<usize> = (0..n).map(|_| rng.random_range(0..8)).collect();
        let cell_labels: Vec<Option<Box<str>>> = label_index
            .iter()
            .map(|k| Some(k.to_string().into_boxed_str()))
            .collect();

        let sd = spatial_distance(&coords, &cell_labels, None).unwrap();
        assert_eq!(sd.labels.len(), 8);

        for q in 0..8 {
            let members: Vec<usize> = (0..n).filter(|&j| label_index[j] == q).collect();
            for i in 0..n {
                let expected = members
                    .iter()
                    .map(|&j| {
                        let dx = coords[(i, 0)] - coords[(j, 0)];
                        let dy = coords[(i, 1)] - coords[(j, 1)];
                        (dx * dx + dy * dy).sqrt()
                    })
                    .fold(f32::INFINITY, f32::min);
                assert_eq!(sd.distances[(i, q)], expected, "cell {} label {}", i, q);
            }
        }
    }

    #[test]
    fn grid_handles_coincident_and_far_points() {
        let grid = PointGrid::new(&[(5.0, 5.0), (5.0, 5.0)]);
        assert_eq!(grid.nearest(5.0, 5.0), 0.0);
        approx::assert_abs_diff_eq!(grid.nearest(-995.0, 5.0), 1000.0, epsilon = 1e-3);

        let grid = PointGrid::new(&[(0.0, 0.0), (100.0, 0.0), (0.0, 100.0)]);
        approx::assert_abs_diff_eq!(grid.nearest(60.0, 1.0), 1601f32.sqrt(), epsilon = 1e-4);
        let far = ((1e6f32 - 100.0).powi(2) + 1e12f32).sqrt();
        approx::assert_abs_diff_eq!(grid.nearest(1e6, 1e6), far, epsilon = 1.0);
        assert!(grid.nearest(f32::NAN, 0.0).is_nan());
    }

    #[test]
    fn integer_labels_sort_numerically() {
        let cell_labels = labels(&[Some("10"), Some("2"), None, Some("1")]);
        let sorted = sorted_labels(&cell_labels);
        let sorted: Vec<&str> = sorted.iter().map(|l| l.as_ref()).collect();
        assert_eq!(sorted, vec!["1", "2", "10"]);
    }

    #[test]
    fn unlabelled_input_is_an_error() {
        let coords = Mat::zeros(2, 2);
        assert!(spatial_distance(&coords, &labels(&[None, None]), None).is_err());
    }
}
