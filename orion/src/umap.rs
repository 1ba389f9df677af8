//! Uniform manifold approximation and projection of the neighbour graph

use crate::anndata::AnnData;
use crate::neighbors::Neighbors;
use crate::orion_common::*;
use crate::pca::PCA_KEY;
use indicatif::{ProgressBar, ProgressDrawTarget};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub const UMAP_KEY: &str = "X_umap";

const NEGATIVE_SAMPLE_RATE: usize = 5;
const GRADIENT_CLIP: f32 = 4.0;
const REPULSION_STRENGTH: f32 = 1.0;
const INITIAL_ALPHA: f32 = 1.0;
const INIT_SCALE: f32 = 10.0;

/// UMAP layout parameters
#[derive(Debug, Clone)]
pub struct Umap {
    min_dist: f32,
    spread: f32,
    n_epochs: Option<usize>,
    seed: u64,
}

impl Default for Umap {
    fn default() -> Self {
        Self {
            min_dist: 0.5,
            spread: 1.0,
            n_epochs: None,
            seed: DEFAULT_SEED,
        }
    }
}

impl Umap {
    pub fn min_dist(mut self, d: f32) -> Self {
        self.min_dist = d;
        self
    }

    pub fn spread(mut self, s: f32) -> Self {
        self.spread = s;
        self
    }

    pub fn n_epochs(mut self, n: Option<usize>) -> Self {
        self.n_epochs = n;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// 500 epochs up to 10k cells, 200 above
    pub fn resolve_epochs(&self, n_cells: usize) -> usize {
        self.n_epochs
            .unwrap_or(if n_cells <= 10_000 { 500 } else { 200 })
            .max(1)
    }

    /// Lay out `n` points given undirected weighted edges.
    ///
    /// * `edges` - pairs `(i, j)`, each undirected edge listed once
    /// * `weights` - fuzzy membership strengths parallel to `edges`
    /// * `init` - optional n × 2 starting coordinates
    ///
    /// Returns an n × 2 embedding
    pub fn fit(
        &self,
        n: usize,
        edges: &[(usize, usize)],
        weights: &[f32],
        init: Option<&Mat>,
    ) -> anyhow::Result<Mat> {
        if edges.len() != weights.len() {
            anyhow::bail!("{} weights for {} edges", weights.len(), edges.len());
        }
        if self.min_dist < 0.0 || self.spread <= 0.0 || self.min_dist > self.spread {
            anyhow::bail!(
                "invalid curve parameters: min_dist={} spread={}",
                self.min_dist,
                self.spread
            );
        }

        let (a, b) = find_ab_params(self.spread, self.min_dist);
        let n_epochs = self.resolve_epochs(n);
        info!(
            "UMAP: {} cells, {} edges, a={:.4} b={:.4}, {} epochs",
            n,
            edges.len(),
            a,
            b,
            n_epochs
        );

        let mut rng = SmallRng::seed_from_u64(self.seed);

        let mut embedding: Vec<[f32; 2]> = match init {
            Some(coords) if coords.nrows() == n && coords.ncols() >= 2 => rescale_init(coords),
            Some(coords) => {
                anyhow::bail!(
                    "initial coordinates are {} x {}, expected {} x 2",
                    coords.nrows(),
                    coords.ncols(),
                    n
                );
            }
            None => (0..n)
                .map(|_| {
                    [
                        rng.random_range(-INIT_SCALE..INIT_SCALE),
                        rng.random_range(-INIT_SCALE..INIT_SCALE),
                    ]
                })
                .collect(),
        };

        // each undirected edge is sampled in both directions
        let mut heads = Vec::with_capacity(2 * edges.len());
        let mut tails = Vec::with_capacity(2 * edges.len());
        let mut directed_weights = Vec::with_capacity(2 * edges.len());
        for (&(i, j), &w) in edges.iter().zip(weights.iter()) {
            if i >= n || j >= n {
                anyhow::bail!("edge ({}, {}) out of range for {} cells", i, j, n);
            }
            heads.extend([i, j]);
            tails.extend([j, i]);
            directed_weights.extend([w, w]);
        }

        let epochs_per_sample = make_epochs_per_sample(&directed_weights, n_epochs);

        optimize_layout(
            &mut embedding,
            &heads,
            &tails,
            &epochs_per_sample,
            n_epochs,
            (a, b),
            &mut rng,
        );

        let mut ret = Mat::zeros(n, 2);
        for (i, p) in embedding.iter().enumerate() {
            ret[(i, 0)] = p[0];
            ret[(i, 1)] = p[1];
        }
        Ok(ret)
    }
}

/// Fit `1 / (1 + a x^{2b})` to the target membership curve:
/// 1 below `min_dist`, `exp(-(x - min_dist) / spread)` above,
/// on 300 points in `[0, 3 spread]` by Levenberg-Marquardt
pub fn find_ab_params(spread: f32, min_dist: f32) -> (f32, f32) {
    const N_POINTS: usize = 300;
    const MAX_ITER: usize = 200;

    let spread = spread as f64;
    let min_dist = min_dist as f64;

    let xs: Vec<f64> = (0..N_POINTS)
        .map(|i| 3.0 * spread * i as f64 / (N_POINTS - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let curve = |x: f64, a: f64, b: f64| 1.0 / (1.0 + a * x.powf(2.0 * b));

    let cost = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(ys.iter())
            .map(|(&x, &y)| (curve(x, a, b) - y).powi(2))
            .sum()
    };

    let (mut a, mut b) = (1.0f64, 1.0f64);
    let mut lambda = 1e-3;
    let mut current = cost(a, b);

    for _ in 0..MAX_ITER {
        // normal equations J'J and J'r
        let (mut jaa, mut jab, mut jbb, mut ga, mut gb) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&x, &y) in xs.iter().zip(ys.iter()) {
            if x <= 0.0 {
                continue;
            }
            let u = x.powf(2.0 * b);
            let denom = (1.0 + a * u).powi(2);
            let da = -u / denom;
            let db = -2.0 * a * u * x.ln() / denom;
            let r = curve(x, a, b) - y;
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let mut improved = false;
        while lambda < 1e12 {
            let (maa, mbb) = (jaa * (1.0 + lambda), jbb * (1.0 + lambda));
            let det = maa * mbb - jab * jab;
            if det.abs() < f64::MIN_POSITIVE {
                lambda *= 10.0;
                continue;
            }
            let step_a = -(mbb * ga - jab * gb) / det;
            let step_b = -(maa * gb - jab * ga) / det;
            let (na, nb) = (a + step_a, b + step_b);
            if na > 0.0 && nb > 0.0 {
                let next = cost(na, nb);
                if next < current {
                    let rel = (current - next) / current.max(f64::MIN_POSITIVE);
                    a = na;
                    b = nb;
                    current = next;
                    lambda = (lambda / 10.0).max(1e-12);
                    improved = rel > 1e-12;
                    break;
                }
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    (a as f32, b as f32)
}

/// Epochs between successive samples of each edge: `max(w) / w`;
/// edges too weak to be sampled once in `n_epochs` get `-1`
pub fn make_epochs_per_sample(weights: &[f32], n_epochs: usize) -> Vec<f32> {
    let max_w = weights.iter().cloned().fold(0.0f32, f32::max);
    if max_w <= 0.0 {
        return vec![-1.0; weights.len()];
    }
    weights
        .iter()
        .map(|&w| {
            let n_samples = n_epochs as f32 * w / max_w;
            if n_samples >= 1.0 {
                n_epochs as f32 / n_samples
            } else {
                -1.0
            }
        })
        .collect()
}

/// Min-max rescale the first two columns into `[0, 10]`
fn rescale_init(coords: &Mat) -> Vec<[f32; 2]> {
    let mut ret = vec![[0.0f32; 2]; coords.nrows()];
    for d in 0..2 {
        let col = coords.column(d);
        let lo = col.min();
        let hi = col.max();
        let range = if hi > lo { hi - lo } else { 1.0 };
        for (i, &v) in col.iter().enumerate() {
            ret[i][d] = INIT_SCALE * (v - lo) / range;
        }
    }
    ret
}

#[inline]
fn clip(v: f32) -> f32 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

#[inline]
fn dist_sq(p: &[f32; 2], q: &[f32; 2]) -> f32 {
    (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2)
}

/// Stochastic gradient descent on the cross entropy between the graph
/// and the low-dimensional memberships
fn optimize_layout(
    embedding: &mut [[f32; 2]],
    heads: &[usize],
    tails: &[usize],
    epochs_per_sample: &[f32],
    n_epochs: usize,
    (a, b): (f32, f32),
    rng: &mut SmallRng,
) {
    let n = embedding.len();
    if n == 0 {
        return;
    }

    let epochs_per_negative: Vec<f32> = epochs_per_sample
        .iter()
        .map(|&e| e / NEGATIVE_SAMPLE_RATE as f32)
        .collect();
    let mut next_sample: Vec<f32> = epochs_per_sample.to_vec();
    let mut next_negative: Vec<f32> = epochs_per_negative.clone();

    let pb = ProgressBar::new(n_epochs as u64);
    if log::log_enabled!(log::Level::Info) {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    for epoch in 0..n_epochs {
        let alpha = INITIAL_ALPHA * (1.0 - epoch as f32 / n_epochs as f32);
        let now = epoch as f32;

        for e in 0..heads.len() {
            if epochs_per_sample[e] <= 0.0 || next_sample[e] > now {
                continue;
            }

            let j = heads[e];
            let k = tails[e];
            let mut current = embedding[j];
            let mut other = embedding[k];

            let d2 = dist_sq(&current, &other);
            let attract = if d2 > 0.0 {
                -2.0 * a * b * d2.powf(b - 1.0) / (a * d2.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..2 {
                let grad = clip(attract * (current[d] - other[d]));
                current[d] += grad * alpha;
                other[d] -= grad * alpha;
            }
            embedding[j] = current;
            embedding[k] = other;

            next_sample[e] += epochs_per_sample[e];

            let n_neg = ((now - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..n_neg {
                let k = rng.random_range(0..n);
                if k == j {
                    continue;
                }
                let other = embedding[k];
                let d2 = dist_sq(&current, &other);
                let repel = if d2 > 0.0 {
                    2.0 * REPULSION_STRENGTH * b / ((0.001 + d2) * (a * d2.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..2 {
                    let grad = if repel > 0.0 {
                        clip(repel * (current[d] - other[d]))
                    } else {
                        GRADIENT_CLIP
                    };
                    current[d] += grad * alpha;
                }
            }
            embedding[j] = current;
            next_negative[e] += n_neg as f32 * epochs_per_negative[e];
        }
        pb.inc(1);
    }
    pb.finish_and_clear();
}

/// Lay out the neighbour graph and store `obsm["X_umap"]`; starts from
/// PCA when available
pub fn umap_into(adata: &mut AnnData, nn: &Neighbors, umap: &Umap) -> anyhow::Result<Mat> {
    let init = adata.obsm(PCA_KEY).ok().filter(|pcs| pcs.ncols() >= 2);
    if init.is_none() {
        info!("UMAP: no 2-d PCA available, random initialization");
    }
    let coords = umap.fit(
        adata.n_obs(),
        &nn.graph.edges,
        &nn.connectivities,
        init,
    )?;

    adata.insert_obsm(UMAP_KEY, coords.clone())?;
    adata.insert_uns(
        &["umap", "params"],
        serde_json::json!({
            "min_dist": umap.min_dist,
            "spread": umap.spread,
            "n_epochs": umap.resolve_epochs(adata.n_obs()),
            "seed": umap.seed,
        }),
    )?;
    Ok(coords)
}
