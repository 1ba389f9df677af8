use crate::knn_match::ColumnDict;
use crate::utils::generate_minibatch_intervals;

use dashmap::DashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

const DEFAULT_BLOCK_SIZE: usize = 1000;

/// Undirected graph over points with one distance per edge
pub struct KnnGraph {
    /// Symmetric CSC adjacency matrix (n_nodes x n_nodes) holding distances
    pub adjacency: CscMatrix<f32>,
    /// Sorted edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Edge distances, parallel to `edges`
    pub distances: Vec<f32>,
    /// Number of nodes
    pub n_nodes: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
    /// If true, keep only reciprocal edges (i→j AND j→i).
    /// If false, keep union edges (i→j OR j→i), using min distance.
    pub reciprocal: bool,
}

impl Default for KnnGraphArgs {
    fn default() -> Self {
        Self {
            knn: 15,
            block_size: DEFAULT_BLOCK_SIZE,
            reciprocal: false,
        }
    }
}

impl KnnGraph {
    /// Build a KNN graph from column vectors.
    ///
    /// * `points` - transposed coordinate matrix (d x n), where each column is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_columns(points: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = points.ncols();
        if nn < 2 {
            anyhow::bail!("need at least 2 points for a kNN graph, got {}", nn);
        }
        let points_vec = points.column_iter().collect::<Vec<_>>();
        let names = (0..nn).collect::<Vec<_>>();

        let dict = ColumnDict::from_dvector_views(points_vec, names);
        Self::build_from_dict(dict, nn, &args)
    }

    /// Build a KNN graph from row vectors (cells × features).
    ///
    /// * `data` - matrix (n x d), where each row is a point
    /// * `args` - KNN graph construction parameters
    pub fn from_rows(data: &DMatrix<f32>, args: KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let transposed = data.transpose();
        Self::from_columns(&transposed, args)
    }

    /// Build a graph from an arbitrary list of weighted pairs.
    /// Self loops are dropped; duplicated pairs keep the smaller distance.
    pub fn from_edges(n_nodes: usize, pairs: Vec<((usize, usize), f32)>) -> anyhow::Result<Self> {
        let mut edges: Vec<((usize, usize), f32)> = pairs
            .into_iter()
            .filter(|&((i, j), _)| i != j)
            .map(|((i, j), d)| ((i.min(j), i.max(j)), d))
            .collect();

        if let Some(&((_, j), _)) = edges.iter().find(|&&((_, j), _)| j >= n_nodes) {
            anyhow::bail!("edge index {} out of range for {} nodes", j, n_nodes);
        }

        edges.par_sort_by(|a, b| a.0.cmp(&b.0).then(a.1.total_cmp(&b.1)));
        edges.dedup_by_key(|&mut (ij, _)| ij);

        Ok(Self::from_canonical_edges(n_nodes, edges))
    }

    fn from_canonical_edges(nn: usize, edges: Vec<((usize, usize), f32)>) -> Self {
        let mut coo = CooMatrix::new(nn, nn);
        for &((i, j), v) in edges.iter() {
            coo.push(i, j, v);
            coo.push(j, i, v);
        }

        let adjacency = CscMatrix::from(&coo);
        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        KnnGraph {
            adjacency,
            edges: edge_pairs,
            distances,
            n_nodes: nn,
        }
    }

    fn build_from_dict(
        dict: ColumnDict<usize>,
        nn: usize,
        args: &KnnGraphArgs,
    ) -> anyhow::Result<KnnGraph> {
        let nquery = args.knn.min(nn - 1).max(1);

        let block_size = if args.block_size == 0 {
            DEFAULT_BLOCK_SIZE
        } else {
            args.block_size
        };
        let jobs = generate_minibatch_intervals(nn, block_size);
        let njobs = jobs.len() as u64;

        /////////////////////////////////////
        // step 1: nearest neighbour search //
        /////////////////////////////////////

        let triplets: DashMap<(usize, usize), f32> = DashMap::new();

        jobs.into_par_iter().progress_count(njobs).try_for_each(
            |(lb, ub)| -> anyhow::Result<()> {
                for i in lb..ub {
                    let (indices, distances) = dict.search_others(&i, nquery)?;
                    for (j, d_ij) in indices.into_iter().zip(distances) {
                        triplets.insert((i, j), d_ij);
                    }
                }
                Ok(())
            },
        )?;

        info!("{} triplets by kNN matching", triplets.len());

        if triplets.is_empty() {
            return Err(anyhow::anyhow!("empty triplets"));
        }

        ///////////////////////////////////////////////////
        // step 2: edge filtering (reciprocal or union) //
        ///////////////////////////////////////////////////

        let mut edges: Vec<((usize, usize), f32)> = if args.reciprocal {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j && triplets.contains_key(&(j, i)) {
                        Some(((i, j), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        } else {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j {
                        let d_ij = *entry.value();
                        let d_ji = triplets.get(&(j, i)).map(|e| *e).unwrap_or(d_ij);
                        Some(((i, j), d_ij.min(d_ji)))
                    } else if i > j && !triplets.contains_key(&(j, i)) {
                        Some(((j, i), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        edges.par_sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        info!(
            "{} edges after {} matching",
            edges.len(),
            if args.reciprocal {
                "reciprocal"
            } else {
                "union"
            }
        );

        Ok(Self::from_canonical_edges(nn, edges))
    }

    /// Get neighbors of a node from the CSC adjacency matrix
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[node];
        let end = offsets[node + 1];
        &self.adjacency.row_indices()[start..end]
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// number of neighbours per node
    pub fn degrees(&self) -> Vec<usize> {
        self.adjacency
            .col_offsets()
            .windows(2)
            .map(|w| w[1] - w[0])
            .collect()
    }

    /// Symmetric sparse matrix carrying `values` (parallel to `edges`)
    pub fn to_csc(&self, values: &[f32]) -> anyhow::Result<CscMatrix<f32>> {
        let triplets = self.to_symmetric_triplets(values)?;
        let mut coo = CooMatrix::new(self.n_nodes, self.n_nodes);
        for (i, j, v) in triplets {
            coo.push(i as usize, j as usize, v);
        }
        Ok(CscMatrix::from(&coo))
    }

    /// Both directions of every edge, ordered by column then row
    pub fn to_symmetric_triplets(&self, values: &[f32]) -> anyhow::Result<Vec<(u64, u64, f32)>> {
        if values.len() != self.edges.len() {
            anyhow::bail!(
                "{} values given for {} edges",
                values.len(),
                self.edges.len()
            );
        }
        let mut triplets: Vec<(u64, u64, f32)> = self
            .edges
            .iter()
            .zip(values)
            .flat_map(|(&(i, j), &v)| [(i as u64, j as u64, v), (j as u64, i as u64, v)])
            .collect();
        triplets.par_sort_by_key(|&(i, j, _)| (j, i));
        Ok(triplets)
    }

    /// Adaptive-bandwidth kernel weights with local connectivity
    /// (McInnes et al. 2018).
    ///
    /// 1. rho_i = distance to nearest neighbor
    /// 2. sigma_i by binary search: sum_j exp(-(d_ij - rho_i)/sigma_i) = log2(k)
    /// 3. directed weight: w(i→j) = exp(-(d_ij - rho_i) / sigma_i)
    /// 4. fuzzy union: w = w(i→j) + w(j→i) - w(i→j) * w(j→i)
    ///
    /// Returns weights parallel to `self.edges`, all in (0, 1].
    pub fn fuzzy_kernel_weights(&self) -> Vec<f32> {
        if self.distances.is_empty() {
            return Vec::new();
        }

        let offsets = self.adjacency.col_offsets();
        let values = self.adjacency.values();

        let (rho, sigma): (Vec<f32>, Vec<f32>) = (0..self.n_nodes)
            .into_par_iter()
            .map(|i| {
                let dists = &values[offsets[i]..offsets[i + 1]];
                if dists.is_empty() {
                    return (0.0, 1.0);
                }
                let rho_i = dists.iter().cloned().fold(f32::INFINITY, f32::min);
                let target = (dists.len() as f32).log2();
                (rho_i, smooth_knn_sigma(dists, rho_i, target))
            })
            .unzip();

        self.edges
            .iter()
            .zip(self.distances.iter())
            .map(|(&(i, j), &d)| {
                let w_ij = directed_umap_weight(d, rho[i], sigma[i]);
                let w_ji = directed_umap_weight(d, rho[j], sigma[j]);
                w_ij + w_ji - w_ij * w_ji
            })
            .collect()
    }
}

/// Binary search for per-point sigma
///
/// Finds sigma such that: sum_j exp(-max(0, d_j - rho) / sigma) = target
fn smooth_knn_sigma(dists: &[f32], rho: f32, target: f32) -> f32 {
    const TOLERANCE: f32 = 1e-5;
    const MAX_ITER: usize = 64;

    let mean_dist: f32 = dists.iter().sum::<f32>() / dists.len().max(1) as f32;
    let min_sigma = 1e-3 * mean_dist;

    let mut lo = 0.0f32;
    let mut hi = f32::INFINITY;
    let mut mid = 1.0f32;

    for _ in 0..MAX_ITER {
        let psum: f32 = dists
            .iter()
            .map(|&d| {
                let gap = d - rho;
                if gap > 0.0 {
                    (-gap / mid).exp()
                } else {
                    1.0
                }
            })
            .sum();

        if (psum - target).abs() < TOLERANCE {
            break;
        }

        if psum > target {
            hi = mid;
            mid = (lo + hi) / 2.0;
        } else {
            lo = mid;
            if hi.is_infinite() {
                mid *= 2.0;
            } else {
                mid = (lo + hi) / 2.0;
            }
        }
    }

    mid.max(min_sigma)
}

fn directed_umap_weight(d: f32, rho: f32, sigma: f32) -> f32 {
    if d.is_infinite() || sigma <= 0.0 {
        return 0.0;
    }
    let gap = d - rho;
    if gap <= 0.0 {
        1.0
    } else {
        (-gap / sigma).exp()
    }
}
