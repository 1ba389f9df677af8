//! Position-based commands: spatial-neighbors, spatial-distance and render

use crate::anndata::{AnnData, SPATIAL_KEY};
use crate::orion_common::*;
use crate::orion_input::*;
use crate::pca::PCA_KEY;
use crate::render::*;
use crate::run_analysis::write_graph_mtx;
use crate::spatial_distance::*;
use crate::spatial_graph::*;
use crate::umap::UMAP_KEY;
use fnv::FnvHashMap as HashMap;
use matrix_util::knn_graph::KnnGraph;
use matrix_util::mtx_io::read_mtx_triplets;

#[derive(Args, Debug)]
pub struct SpatialNeighborsArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub spatial: SpatialParams,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.spatial_connectivities.mtx.gz: binary adjacency\n\
		     - {out}.spatial_distances.mtx.gz: Euclidean edge lengths"
    )]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct SpatialDistanceArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub labels: LabelArgs,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.spatial_distance.parquet: cells x labels nearest distance\n\
		     - {out}.spatial_distance_summary.parquet: label x label mean\n\
		     - {out}.spatial_distance.png: heatmap of the summary"
    )]
    pub out: Box<str>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum Basis {
    Spatial,
    Umap,
    Pca,
}

impl Basis {
    fn name(&self) -> &'static str {
        match self {
            Basis::Spatial => "spatial",
            Basis::Umap => "umap",
            Basis::Pca => "pca",
        }
    }
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub labels: LabelArgs,

    #[command(flatten)]
    pub render: RenderParams,

    #[arg(
        long,
        value_enum,
        value_delimiter(','),
        default_values_t = vec![Basis::Spatial],
        help = "Coordinates to plot (spatial, umap, pca)"
    )]
    pub basis: Vec<Basis>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Markers to colour by (comma separated)",
        long_help = "Markers to colour by, one figure each, on a\n\
		     blue-white-red scale between the 1st and 99th percentiles.\n\
		     Without markers, cells are coloured by --clusters or --label."
    )]
    pub color: Vec<Box<str>>,

    #[arg(long, help = "UMAP coordinates (.umap.parquet)")]
    pub umap: Option<Box<str>>,

    #[arg(long, help = "PCA scores (.pca.parquet)")]
    pub pca: Option<Box<str>>,

    #[arg(
        long,
        help = "Spatial graph to draw under the cells (.spatial_connectivities.mtx.gz)"
    )]
    pub edges: Option<Box<str>>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Crop to X_MIN,X_MAX,Y_MIN,Y_MAX (inclusive)"
    )]
    pub crop: Option<Vec<f32>>,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates {out}.{spatial,umap,pca}.png, or\n\
		     {out}.{basis}.{marker}.png with several --color markers."
    )]
    pub out: Box<str>,
}

////////////
// stages //
////////////

pub fn stage_spatial_neighbors(
    adata: &mut AnnData,
    params: &SpatialParams,
    out: &str,
) -> anyhow::Result<KnnGraph> {
    let graph = spatial_neighbors_into(adata, &params.to_graph_args()?)?;
    let ones = vec![1.0f32; graph.num_edges()];
    write_graph_mtx(
        &graph,
        &ones,
        &format!("{}.spatial_connectivities.mtx.gz", out),
    )?;
    write_graph_mtx(
        &graph,
        &graph.distances,
        &format!("{}.spatial_distances.mtx.gz", out),
    )?;
    Ok(graph)
}

pub fn stage_spatial_distance(
    adata: &AnnData,
    cell_labels: &[Option<Box<str>>],
    out: &str,
) -> anyhow::Result<SpatialDistance> {
    let sd = spatial_distance_of(adata, cell_labels)?;

    sd.distances.to_parquet(
        Some(&adata.obs_names),
        Some(&sd.labels),
        &format!("{}.spatial_distance.parquet", out),
    )?;

    let summary = sd.mean_by_label(cell_labels);
    summary.to_parquet(
        Some(&sd.labels),
        Some(&sd.labels),
        &format!("{}.spatial_distance_summary.parquet", out),
    )?;
    heatmap_png(&summary, &format!("{}.spatial_distance.png", out))?;
    Ok(sd)
}

/// Rows of a parquet matrix reordered to `cell_names`
fn read_aligned_matrix(file: &str, cell_names: &[Box<str>]) -> anyhow::Result<Mat> {
    let MatWithNames { rows, cols: _, mat } = Mat::from_parquet(file)?;
    let index: HashMap<&str, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, r)| (r.as_ref(), i))
        .collect();

    let order = cell_names
        .iter()
        .map(|name| {
            index
                .get(name.as_ref())
                .copied()
                .ok_or_else(|| anyhow::anyhow!("{}: no row for cell {}", file, name))
        })
        .collect::<anyhow::Result<Vec<usize>>>()?;

    Ok(select_rows(&mat, &order))
}

/// Edges (i < j) of a square MatrixMarket graph over `n` cells
fn read_graph_edges(file: &str, n: usize) -> anyhow::Result<Vec<(usize, usize)>> {
    let (triplets, (nrow, ncol, _)) = read_mtx_triplets(file)?;
    if nrow != n || ncol != n {
        anyhow::bail!("{} is {} x {}, expected {} x {}", file, nrow, ncol, n, n);
    }
    Ok(triplets
        .into_iter()
        .filter(|&(i, j, _)| i < j)
        .map(|(i, j, _)| (i as usize, j as usize))
        .collect())
}

/// Edges restricted to the kept cells, renumbered
fn subset_edges(edges: &[(usize, usize)], kept: &[usize], n: usize) -> Vec<(usize, usize)> {
    let mut new_index = vec![usize::MAX; n];
    for (k, &i) in kept.iter().enumerate() {
        new_index[i] = k;
    }
    edges
        .iter()
        .filter_map(|&(i, j)| {
            let (a, b) = (new_index[i], new_index[j]);
            (a != usize::MAX && b != usize::MAX).then_some((a, b))
        })
        .collect()
}

struct Figure {
    suffix: Box<str>,
    colors: Vec<image::Rgb<u8>>,
}

/// One figure per marker, or one labelled figure
fn figures(
    adata: &AnnData,
    labels: Option<&[Option<Box<str>>]>,
    markers: &[Box<str>],
) -> anyhow::Result<Vec<Figure>> {
    if markers.is_empty() {
        let colors = match labels {
            Some(labels) => {
                let (colors, legend) = categorical_colors(labels, &sorted_labels(labels));
                for (name, c) in legend.iter() {
                    info!("  {}\t{}", name, hex(c));
                }
                colors
            }
            None => vec![NA_COLOR; adata.n_obs()],
        };
        return Ok(vec![Figure {
            suffix: "".into(),
            colors,
        }]);
    }

    let many = markers.len() > 1;
    markers
        .iter()
        .map(|m| {
            let j = adata.var_index(m)?;
            let values: Vec<f32> = adata.x.column(j).iter().copied().collect();
            Ok(Figure {
                suffix: if many {
                    format!(".{}", m).into_boxed_str()
                } else {
                    "".into()
                },
                colors: diverging_colors(&values),
            })
        })
        .collect()
}

pub fn stage_render(
    adata: &AnnData,
    bases: &[Basis],
    labels: Option<&[Option<Box<str>>]>,
    markers: &[Box<str>],
    edges: Option<&[(usize, usize)]>,
    render: &RenderParams,
    out: &str,
) -> anyhow::Result<()> {
    let figures = figures(adata, labels, markers)?;

    for basis in bases {
        let (coords, y_down) = match basis {
            Basis::Spatial => (adata.obsm(SPATIAL_KEY)?, true),
            Basis::Umap => (adata.obsm(UMAP_KEY)?, false),
            Basis::Pca => (adata.obsm(PCA_KEY)?, false),
        };
        let args = ScatterArgs {
            size: render.size,
            point_size: render.point_size,
            y_down,
        };
        let basis_edges = match basis {
            Basis::Spatial => edges,
            _ => None,
        };
        for fig in figures.iter() {
            let file = format!("{}.{}{}.png", out, basis.name(), fig.suffix);
            scatter_png(coords, &fig.colors, basis_edges, &args, &file)?;
        }
    }
    Ok(())
}

//////////////
// commands //
//////////////

pub fn run_spatial_neighbors(args: &SpatialNeighborsArgs) -> anyhow::Result<()> {
    let mut adata = args.table.load()?;
    let graph = stage_spatial_neighbors(&mut adata, &args.spatial, &args.out)?;

    let summary = degree_summary(&graph);
    eprintln!("{} cells, {} edges, {}", adata.n_obs(), graph.num_edges(), summary);

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "spatial-neighbors",
            "table": args.table.table,
            "mode": args.spatial.mode.to_string(),
            "n_neighs": args.spatial.n_neighs,
            "radius": args.spatial.radius,
            "prune": (!args.spatial.no_prune).then_some(&args.spatial.prune),
        }),
    )
}

pub fn run_spatial_distance(args: &SpatialDistanceArgs) -> anyhow::Result<()> {
    let adata = args.table.load()?;
    let (name, cell_labels) = args.labels.resolve(&adata)?;
    info!("spatial distance by {}", name);

    stage_spatial_distance(&adata, &cell_labels, &args.out)?;

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "spatial-distance",
            "table": args.table.table,
            "labels": name,
            "clusters": args.labels.clusters,
        }),
    )
}

pub fn run_render(args: &RenderArgs) -> anyhow::Result<()> {
    let mut adata = args.table.load()?;

    if let Some(file) = args.umap.as_deref() {
        let coords = read_aligned_matrix(file, &adata.obs_names)?;
        adata.insert_obsm(UMAP_KEY, coords)?;
    }
    if let Some(file) = args.pca.as_deref() {
        let coords = read_aligned_matrix(file, &adata.obs_names)?;
        adata.insert_obsm(PCA_KEY, coords)?;
    }
    for basis in args.basis.iter() {
        match basis {
            Basis::Umap if !adata.has_obsm(UMAP_KEY) => {
                anyhow::bail!("--basis umap needs --umap")
            }
            Basis::Pca if !adata.has_obsm(PCA_KEY) => anyhow::bail!("--basis pca needs --pca"),
            _ => {}
        }
    }

    let n = adata.n_obs();
    let mut edges = args
        .edges
        .as_deref()
        .map(|file| read_graph_edges(file, n))
        .transpose()?;

    let mut labels = if args.labels.is_set() {
        Some(args.labels.resolve(&adata)?.1)
    } else {
        None
    };

    if let Some(crop) = args.crop.as_ref() {
        let [x_min, x_max, y_min, y_max] = crop.as_slice() else {
            anyhow::bail!("--crop takes X_MIN,X_MAX,Y_MIN,Y_MAX");
        };
        let (sub, kept) = adata.filter_rect(*x_min, *x_max, *y_min, *y_max)?;
        edges = edges.map(|e| subset_edges(&e, &kept, n));
        labels = labels.map(|l| kept.iter().map(|&i| l[i].clone()).collect());
        adata = sub;
    }

    stage_render(
        &adata,
        &args.basis,
        labels.as_deref(),
        &args.color,
        edges.as_deref(),
        &args.render,
        &args.out,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edges_follow_the_kept_cells() {
        let edges = vec![(0, 1), (1, 3), (2, 3)];
        let kept = vec![1, 3];
        assert_eq!(subset_edges(&edges, &kept, 4), vec![(0, 1)]);
    }

    #[test]
    fn embeddings_are_aligned_by_cell_name() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("umap.parquet");
        let file = file.to_str().unwrap();

        let rows: Vec<Box<str>> = vec!["c2".into(), "c1".into()];
        let cols: Vec<Box<str>> = vec!["UMAP1".into(), "UMAP2".into()];
        let mat = Mat::from_row_slice(2, 2, &[2.0, 20.0, 1.0, 10.0]);
        mat.to_parquet(Some(&rows), Some(&cols), file).unwrap();

        let cells: Vec<Box<str>> = vec!["c1".into(), "c2".into()];
        let aligned = read_aligned_matrix(file, &cells).unwrap();
        assert_eq!(aligned, Mat::from_row_slice(2, 2, &[1.0, 10.0, 2.0, 20.0]));

        let missing: Vec<Box<str>> = vec!["c3".into()];
        assert!(read_aligned_matrix(file, &missing).is_err());
    }
}
