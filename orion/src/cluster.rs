//! Leiden clustering of the neighbour graph and per-cluster summaries

use crate::leiden::{Leiden, Network};
use crate::orion_common::*;
use matrix_util::knn_graph::KnnGraph;

pub const LEIDEN_RANDOMNESS: f64 = 0.01;
pub const LEIDEN_MAX_ITER: usize = 10;

/// Clustering result
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// Cluster assignment for each cell (cell index -> cluster id)
    pub labels: Vec<usize>,
    /// Number of clusters
    pub n_clusters: usize,
}

impl ClusterResult {
    /// Get cluster size distribution
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_clusters];
        for &label in &self.labels {
            if label < self.n_clusters {
                counts[label] += 1;
            }
        }
        counts
    }

    /// Relabel so that 0 is the largest cluster; ties keep the
    /// order of first appearance
    pub fn sort_by_size(&mut self) {
        let sizes = self.cluster_sizes();
        let mut order: Vec<usize> = (0..self.n_clusters).collect();
        order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));

        let mut new_label = vec![0; self.n_clusters];
        for (new, &old) in order.iter().enumerate() {
            new_label[old] = new;
        }
        for label in self.labels.iter_mut() {
            if *label < self.n_clusters {
                *label = new_label[*label];
            }
        }
    }

    /// Remove clusters smaller than `min_size`.
    ///
    /// Cells in removed clusters get label `usize::MAX` (written as NaN in output).
    /// Remaining clusters are renumbered contiguously.
    pub fn remove_small_clusters(&mut self, min_size: usize) {
        let sizes = self.cluster_sizes();

        let mut new_label = vec![usize::MAX; self.n_clusters];
        let mut next = 0;
        for (old, &sz) in sizes.iter().enumerate() {
            if sz >= min_size {
                new_label[old] = next;
                next += 1;
            }
        }

        let n_removed = self.n_clusters - next;
        if n_removed > 0 {
            let n_cells_removed: usize = sizes.iter().filter(|&&s| s < min_size).sum();
            for label in self.labels.iter_mut() {
                if *label < self.n_clusters {
                    *label = new_label[*label];
                }
            }
            info!(
                "Removed {} cluster(s) with < {} cells ({} cells unassigned)",
                n_removed, min_size, n_cells_removed
            );
            self.n_clusters = next;
        }
    }

    /// Label strings, `None` for unassigned cells
    pub fn label_names(&self) -> Vec<Option<Box<str>>> {
        self.labels
            .iter()
            .map(|&l| (l < self.n_clusters).then(|| l.to_string().into_boxed_str()))
            .collect()
    }

    /// Get cluster assignment histogram as ASCII, showing up to
    /// `max_show` largest clusters sorted by size (descending).
    pub fn histogram_ascii(&self, max_width: usize, max_show: usize) -> String {
        let sizes = self.cluster_sizes();

        let mut ranked: Vec<(usize, usize)> = sizes
            .iter()
            .enumerate()
            .filter(|(_, &s)| s > 0)
            .map(|(id, &s)| (id, s))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));

        let n_total = ranked.len();
        let n_show = max_show.min(n_total);
        let max_size = ranked.first().map(|&(_, s)| s).unwrap_or(1);

        let mut lines = Vec::new();
        lines.push(format!(
            "Cluster assignments ({} cells, {} clusters):",
            self.labels.len(),
            n_total
        ));
        lines.push(String::new());

        for &(cluster_id, size) in ranked.iter().take(n_show) {
            let pct = 100.0 * size as f64 / self.labels.len() as f64;
            let bar_len = ((size as f64 / max_size as f64) * max_width as f64) as usize;
            let bar = "█".repeat(bar_len.max(1));

            lines.push(format!(
                "  Cluster {:3}  {:>6} cells ({:>5.1}%)  {}",
                cluster_id, size, pct, bar
            ));
        }

        if n_total > n_show {
            let hidden_cells: usize = ranked[n_show..].iter().map(|&(_, s)| s).sum();
            let hidden_pct = 100.0 * hidden_cells as f64 / self.labels.len() as f64;
            lines.push(format!(
                "  ... and {} more clusters ({} cells, {:.1}%)",
                n_total - n_show,
                hidden_cells,
                hidden_pct
            ));
        }

        lines.join("\n")
    }
}

/// Run Leiden community detection on a weighted neighbour graph
///
/// * `weights` - edge weights parallel to `graph.edges`
/// * `resolution` - modularity resolution (higher = more clusters)
/// * `target_clusters` - if Some, binary-search resolution to approximate this count
pub fn leiden_clustering(
    graph: &KnnGraph,
    weights: &[f32],
    resolution: f64,
    target_clusters: Option<usize>,
    seed: u64,
) -> anyhow::Result<ClusterResult> {
    let n = graph.num_nodes();
    if n < 2 {
        anyhow::bail!("Need at least 2 cells for Leiden clustering");
    }
    if weights.len() != graph.num_edges() {
        anyhow::bail!(
            "{} weights for {} edges",
            weights.len(),
            graph.num_edges()
        );
    }

    let n_components = count_components(graph);
    info!("neighbour graph has {} connected component(s)", n_components);

    // Modularity quality increment: Δ = w_jl - γ · k_j · K_l / (2m).
    // In CPM form, Δ = w_jl - node_w · cluster_w · res, so
    // node weights = degree and res = γ/(2m) give modularity.
    let mut node_degree = vec![0.0f64; n];
    let mut total_edge_weight = 0.0f64;
    let mut edges = Vec::with_capacity(graph.num_edges());
    for (&(i, j), &w) in graph.edges.iter().zip(weights.iter()) {
        node_degree[i] += w as f64;
        node_degree[j] += w as f64;
        total_edge_weight += w as f64;
        edges.push((i, j, w as f64));
    }
    if total_edge_weight <= 0.0 {
        anyhow::bail!("neighbour graph has no positive edge weights");
    }

    let network = Network::new(node_degree, &edges)?;

    let resolution_scaled = resolution / (2.0 * total_edge_weight);
    info!(
        "Modularity resolution={:.4} → scaled={:.6e}",
        resolution, resolution_scaled
    );

    let mut result = if let Some(target_k) = target_clusters {
        info!("Auto-tuning resolution to target ~{} clusters ...", target_k);
        tune_leiden_resolution(&network, target_k, resolution_scaled, seed)?
    } else {
        run_leiden(&network, resolution_scaled, seed)?
    };

    result.sort_by_size();

    let sizes = result.cluster_sizes();
    info!(
        "Leiden done: {} clusters, cluster sizes min={} max={}",
        result.n_clusters,
        sizes.iter().copied().min().unwrap_or(0),
        sizes.iter().copied().max().unwrap_or(0),
    );

    Ok(result)
}

/// Run Leiden at a fixed resolution and return the result.
fn run_leiden(network: &Network, resolution: f64, seed: u64) -> anyhow::Result<ClusterResult> {
    let n = network.num_nodes();
    let mut leiden = Leiden::new(resolution, LEIDEN_RANDOMNESS, seed);
    let mut clustering: Vec<usize> = (0..n).collect();

    for iter in 0..LEIDEN_MAX_ITER {
        let updated = leiden.iterate(network, &mut clustering)?;
        let n_clusters = clustering.iter().max().map(|&c| c + 1).unwrap_or(0);
        info!(
            "  iteration {}: {} clusters{}",
            iter + 1,
            n_clusters,
            if !updated { " (converged)" } else { "" }
        );
        if !updated {
            break;
        }
    }

    let n_clusters = clustering.iter().max().map(|&c| c + 1).unwrap_or(0);
    Ok(ClusterResult {
        labels: clustering,
        n_clusters,
    })
}

/// Binary search on resolution to get close to `target_k` clusters.
///
/// Lower resolution → fewer clusters; higher → more clusters.
fn tune_leiden_resolution(
    network: &Network,
    target_k: usize,
    initial_resolution: f64,
    seed: u64,
) -> anyhow::Result<ClusterResult> {
    const MAX_SEARCH: usize = 20;

    let mut lo = 1e-6_f64 * initial_resolution;
    let mut hi = 10.0_f64 * initial_resolution;
    let mut best = run_leiden(network, initial_resolution, seed)?;
    let mut best_res = initial_resolution;

    info!(
        "  resolution={:.6e} → {} clusters (target {})",
        initial_resolution, best.n_clusters, target_k
    );

    if best.n_clusters == target_k {
        return Ok(best);
    }

    if best.n_clusters > target_k {
        hi = initial_resolution;
    } else {
        lo = initial_resolution;
    }

    for step in 0..MAX_SEARCH {
        let mid = (lo + hi) / 2.0;
        let result = run_leiden(network, mid, seed)?;

        info!(
            "  step {}: resolution={:.6e} → {} clusters",
            step + 1,
            mid,
            result.n_clusters
        );

        if result.n_clusters > target_k {
            hi = mid;
        } else {
            lo = mid;
        }

        let cur_diff = result.n_clusters.abs_diff(target_k);
        let best_diff = best.n_clusters.abs_diff(target_k);
        if cur_diff < best_diff {
            best = result;
            best_res = mid;
        }

        if best.n_clusters == target_k || (hi - lo) / hi.max(f64::MIN_POSITIVE) < 1e-4 {
            break;
        }
    }

    info!(
        "  best resolution={:.6e} → {} clusters (target {})",
        best_res, best.n_clusters, target_k
    );

    Ok(best)
}

/// Count connected components in the graph using DFS.
pub fn count_components(graph: &KnnGraph) -> usize {
    let n = graph.num_nodes();
    let mut visited = vec![false; n];
    let mut n_components = 0;

    for start in 0..n {
        if visited[start] {
            continue;
        }
        n_components += 1;
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            for &neighbor in graph.neighbors(node) {
                if !visited[neighbor] {
                    stack.push(neighbor);
                }
            }
        }
    }

    n_components
}

/// Mean of each marker within each cluster (clusters × markers);
/// unassigned cells are skipped
pub fn cluster_marker_means(x: &Mat, result: &ClusterResult) -> Mat {
    let mut sums = Mat::zeros(result.n_clusters, x.ncols());
    let sizes = result.cluster_sizes();
    for (i, &k) in result.labels.iter().enumerate() {
        if k < result.n_clusters {
            let mut row = sums.row_mut(k);
            row += x.row(i);
        }
    }
    for (k, &size) in sizes.iter().enumerate() {
        if size > 0 {
            sums.row_mut(k).scale_mut(1.0 / size as f32);
        }
    }
    sums
}

/// Write cluster assignments to parquet (cells × 1, NaN for unassigned)
pub fn write_cluster_assignments(
    result: &ClusterResult,
    cell_names: &[Box<str>],
    output_path: &str,
) -> anyhow::Result<()> {
    let data = Mat::from_fn(cell_names.len(), 1, |i, _| match result.labels[i] {
        k if k < result.n_clusters => k as f32,
        _ => f32::NAN,
    });
    let col_names = vec!["cluster".into()];
    data.to_parquet(Some(cell_names), Some(&col_names), output_path)?;
    Ok(())
}

/// Read cluster labels back from a `{out}.clusters.parquet` file,
/// aligned to `cell_names`; missing cells and NaN become `None`
pub fn read_cluster_labels(
    file: &str,
    cell_names: &[Box<str>],
) -> anyhow::Result<Vec<Option<Box<str>>>> {
    let MatWithNames { rows, cols, mat } = Mat::from_parquet(file)?;
    let col = cols
        .iter()
        .position(|c| c.as_ref() == "cluster")
        .unwrap_or(0);
    if mat.ncols() == 0 {
        anyhow::bail!("{} has no columns", file);
    }

    let index: fnv::FnvHashMap<&str, usize> =
        rows.iter().enumerate().map(|(i, r)| (r.as_ref(), i)).collect();

    let labels: Vec<Option<Box<str>>> = cell_names
        .iter()
        .map(|name| {
            index.get(name.as_ref()).and_then(|&i| {
                let v = mat[(i, col)];
                v.is_finite().then(|| format!("{}", v as i64).into_boxed_str())
            })
        })
        .collect();

    let found = labels.iter().filter(|l| l.is_some()).count();
    if found == 0 {
        anyhow::bail!("{}: no labels for any of the {} cells", file, cell_names.len());
    }
    info!("{}: labels for {} of {} cells", file, found, cell_names.len());
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::knn_graph::KnnGraphArgs;
    use matrix_util::traits::MatOps;

    const TEST_N_PER_CLUSTER: usize = 50;
    const TEST_N_GROUPS: usize = 3;
    const TEST_N: usize = TEST_N_GROUPS * TEST_N_PER_CLUSTER;
    const TEST_KNN: usize = 15;

    /// 3 well-separated clusters of 50 points each in 3D
    fn three_cluster_latent() -> Mat {
        use rand::rngs::SmallRng;
        use rand::SeedableRng;
        use rand_distr::{Distribution, Normal};

        let mut rng = SmallRng::seed_from_u64(42);
        let noise = Normal::new(0.0f32, 0.05).unwrap();

        let centers: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [10.0, 0.0, 0.0], [0.0, 10.0, 0.0]];

        let mut data = Mat::zeros(TEST_N, 3);
        for (c, center) in centers.iter().enumerate() {
            for i in 0..TEST_N_PER_CLUSTER {
                let row = c * TEST_N_PER_CLUSTER + i;
                for (d, &val) in center.iter().enumerate() {
                    data[(row, d)] = val + noise.sample(&mut rng);
                }
            }
        }
        data
    }

    fn graph_and_weights() -> (KnnGraph, Vec<f32>) {
        let latent = three_cluster_latent().scale_columns();
        let graph = KnnGraph::from_rows(
            &latent,
            KnnGraphArgs {
                knn: TEST_KNN,
                ..Default::default()
            },
        )
        .unwrap();
        let weights = graph.fuzzy_kernel_weights();
        (graph, weights)
    }

    #[test]
    fn test_leiden_no_cross_cluster_labels() {
        let (graph, weights) = graph_and_weights();
        let result = leiden_clustering(&graph, &weights, 1.0, None, 0).unwrap();

        assert_eq!(result.labels.len(), TEST_N);
        for &label in &result.labels {
            assert!(label < result.n_clusters);
        }

        let mut group_labels: Vec<std::collections::HashSet<usize>> = Vec::new();
        for c in 0..TEST_N_GROUPS {
            let start = c * TEST_N_PER_CLUSTER;
            let end = start + TEST_N_PER_CLUSTER;
            group_labels.push(result.labels[start..end].iter().copied().collect());
        }
        for i in 0..TEST_N_GROUPS {
            for j in (i + 1)..TEST_N_GROUPS {
                assert!(group_labels[i].is_disjoint(&group_labels[j]));
            }
        }
    }

    #[test]
    fn test_leiden_labels_sorted_by_size() {
        let (graph, weights) = graph_and_weights();
        let result = leiden_clustering(&graph, &weights, 2.0, None, 1).unwrap();
        let sizes = result.cluster_sizes();
        for k in 1..sizes.len() {
            assert!(sizes[k - 1] >= sizes[k]);
        }
        assert_eq!(sizes.iter().sum::<usize>(), TEST_N);
    }

    #[test]
    fn test_leiden_same_seed_same_labels() {
        let (graph, weights) = graph_and_weights();
        let r1 = leiden_clustering(&graph, &weights, 1.0, None, 7).unwrap();
        let r2 = leiden_clustering(&graph, &weights, 1.0, None, 7).unwrap();
        assert_eq!(r1.labels, r2.labels);
    }

    #[test]
    fn test_leiden_resolution_tuning() {
        let (graph, weights) = graph_and_weights();
        let result = leiden_clustering(&graph, &weights, 0.1, Some(TEST_N_GROUPS), 42).unwrap();
        assert_eq!(result.n_clusters, TEST_N_GROUPS);
    }

    #[test]
    fn test_leiden_too_few_cells() {
        let graph = KnnGraph::from_edges(1, vec![]).unwrap();
        assert!(leiden_clustering(&graph, &[], 1.0, None, 0).is_err());
    }

    #[test]
    fn test_small_clusters_and_histogram() {
        let mut result = ClusterResult {
            labels: vec![1, 1, 1, 0, 0, 2],
            n_clusters: 3,
        };
        result.sort_by_size();
        assert_eq!(result.labels, vec![0, 0, 0, 1, 1, 2]);

        let hist = result.histogram_ascii(20, 100);
        assert!(hist.contains("6 cells"));
        assert!(hist.contains("3 clusters"));

        result.remove_small_clusters(2);
        assert_eq!(result.n_clusters, 2);
        assert_eq!(result.labels[5], usize::MAX);
        assert_eq!(result.label_names()[5], None);
        assert_eq!(result.label_names()[0].as_deref(), Some("0"));
    }

    #[test]
    fn test_cluster_marker_means() {
        let x = Mat::from_row_slice(3, 2, &[1.0, 2.0, 3.0, 4.0, 10.0, 10.0]);
        let result = ClusterResult {
            labels: vec![0, 0, 1],
            n_clusters: 2,
        };
        let means = cluster_marker_means(&x, &result);
        assert_eq!(means, Mat::from_row_slice(2, 2, &[2.0, 3.0, 10.0, 10.0]));
    }
}
