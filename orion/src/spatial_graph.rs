//! Neighbour graphs over cell centroids

use crate::anndata::{AnnData, SPATIAL_KEY};
use crate::orion_common::*;
use fnv::FnvHashMap;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use rayon::prelude::*;

pub const SPATIAL_CONNECTIVITIES_KEY: &str = "spatial_connectivities";
pub const SPATIAL_DISTANCES_KEY: &str = "spatial_distances";

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum SpatialMode {
    Knn,
    Radius,
    Delaunay,
}

impl std::fmt::Display for SpatialMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SpatialMode::Knn => "knn",
            SpatialMode::Radius => "radius",
            SpatialMode::Delaunay => "delaunay",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct SpatialGraphArgs {
    pub mode: SpatialMode,
    pub n_neighs: usize,
    pub radius: f32,
    /// keep edges with `min <= d <= max`
    pub prune: Option<(f32, f32)>,
}

impl Default for SpatialGraphArgs {
    fn default() -> Self {
        Self {
            mode: SpatialMode::Knn,
            n_neighs: 6,
            radius: 100.0,
            prune: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DegreeSummary {
    pub min: usize,
    pub max: usize,
    pub mean: f32,
    pub isolated: usize,
}

impl std::fmt::Display for DegreeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "degree min={} max={} mean={:.2}, {} isolated cell(s)",
            self.min, self.max, self.mean, self.isolated
        )
    }
}

pub fn degree_summary(graph: &KnnGraph) -> DegreeSummary {
    let degrees = graph.degrees();
    let n = degrees.len().max(1);
    DegreeSummary {
        min: degrees.iter().copied().min().unwrap_or(0),
        max: degrees.iter().copied().max().unwrap_or(0),
        mean: degrees.iter().sum::<usize>() as f32 / n as f32,
        isolated: degrees.iter().filter(|&&d| d == 0).count(),
    }
}

#[inline]
fn euclidean(coords: &Mat, i: usize, j: usize) -> f32 {
    ((coords[(i, 0)] - coords[(j, 0)]).powi(2) + (coords[(i, 1)] - coords[(j, 1)]).powi(2)).sqrt()
}

/// Build a spatial graph on the first two columns of `coords` (cells × 2)
pub fn build_spatial_graph(coords: &Mat, args: &SpatialGraphArgs) -> anyhow::Result<KnnGraph> {
    let n = coords.nrows();
    if coords.ncols() < 2 {
        anyhow::bail!("spatial coordinates need 2 columns, got {}", coords.ncols());
    }

    let pairs = if n < 2 {
        vec![]
    } else {
        match args.mode {
            SpatialMode::Knn => knn_pairs(coords, args.n_neighs)?,
            SpatialMode::Radius => radius_pairs(coords, args.radius)?,
            SpatialMode::Delaunay => delaunay_pairs(coords),
        }
    };

    let pairs: Vec<((usize, usize), f32)> = match args.prune {
        Some((lo, hi)) => {
            let before = pairs.len();
            let kept: Vec<_> = pairs
                .into_iter()
                .filter(|&(_, d)| d >= lo && d <= hi)
                .collect();
            info!(
                "pruned {} of {} edges outside [{}, {}]",
                before - kept.len(),
                before,
                lo,
                hi
            );
            kept
        }
        None => pairs,
    };

    KnnGraph::from_edges(n, pairs)
}

fn knn_pairs(coords: &Mat, n_neighs: usize) -> anyhow::Result<Vec<((usize, usize), f32)>> {
    if n_neighs == 0 {
        anyhow::bail!("n_neighs must be positive");
    }
    let xy = coords.columns(0, 2).into_owned();
    let graph = KnnGraph::from_rows(
        &xy,
        KnnGraphArgs {
            knn: n_neighs,
            reciprocal: false,
            ..Default::default()
        },
    )?;
    // recompute exact distances from the coordinates
    Ok(graph
        .edges
        .iter()
        .map(|&(i, j)| ((i, j), euclidean(coords, i, j)))
        .collect())
}

/// All pairs within `radius`, bucketed on a grid of side `radius`
fn radius_pairs(coords: &Mat, radius: f32) -> anyhow::Result<Vec<((usize, usize), f32)>> {
    if radius.is_nan() || radius <= 0.0 {
        anyhow::bail!("radius must be positive, got {}", radius);
    }

    let bucket = |i: usize| -> (i64, i64) {
        (
            (coords[(i, 0)] / radius).floor() as i64,
            (coords[(i, 1)] / radius).floor() as i64,
        )
    };

    let mut grid: FnvHashMap<(i64, i64), Vec<usize>> = FnvHashMap::default();
    for i in 0..coords.nrows() {
        grid.entry(bucket(i)).or_default().push(i);
    }

    let pairs = (0..coords.nrows())
        .into_par_iter()
        .flat_map_iter(|i| {
            let (bx, by) = bucket(i);
            let mut found = vec![];
            for dx in -1..=1 {
                for dy in -1..=1 {
                    let Some(members) = grid.get(&(bx + dx, by + dy)) else {
                        continue;
                    };
                    for &j in members.iter().filter(|&&j| j > i) {
                        let d = euclidean(coords, i, j);
                        if d <= radius {
                            found.push(((i, j), d));
                        }
                    }
                }
            }
            found
        })
        .collect();

    Ok(pairs)
}

/// Edges of the Delaunay triangulation; empty when all points are collinear
fn delaunay_pairs(coords: &Mat) -> Vec<((usize, usize), f32)> {
    let points: Vec<delaunator::Point> = (0..coords.nrows())
        .map(|i| delaunator::Point {
            x: coords[(i, 0)] as f64,
            y: coords[(i, 1)] as f64,
        })
        .collect();

    let triangulation = delaunator::triangulate(&points);
    if triangulation.triangles.is_empty() {
        warn!("Delaunay triangulation is empty (fewer than 3 non-collinear points)");
        return vec![];
    }

    triangulation
        .triangles
        .chunks_exact(3)
        .flat_map(|t| [(t[0], t[1]), (t[1], t[2]), (t[2], t[0])])
        .map(|(i, j)| ((i, j), euclidean(coords, i, j)))
        .collect()
}

/// Build the graph on `obsm["spatial"]` and store binary connectivities
/// and distances in `obsp`
pub fn spatial_neighbors_into(
    adata: &mut AnnData,
    args: &SpatialGraphArgs,
) -> anyhow::Result<KnnGraph> {
    let graph = build_spatial_graph(adata.obsm(SPATIAL_KEY)?, args)?;

    let ones = vec![1.0f32; graph.num_edges()];
    adata.insert_obsp(SPATIAL_CONNECTIVITIES_KEY, graph.to_csc(&ones)?)?;
    adata.insert_obsp(SPATIAL_DISTANCES_KEY, graph.to_csc(&graph.distances)?)?;

    let summary = degree_summary(&graph);
    info!(
        "spatial graph ({}): {} edges, {}",
        args.mode,
        graph.num_edges(),
        summary
    );

    let prune = args.prune.map(|(lo, hi)| vec![lo, hi]);
    adata.insert_uns(
        &["spatial_neighbors", "params"],
        serde_json::json!({
            "coord_type": "generic",
            "mode": args.mode.to_string(),
            "n_neighs": args.n_neighs,
            "radius": args.radius,
            "prune": prune,
        }),
    )?;

    Ok(graph)
}
