//! Marker-space analysis commands: inspect, highest-expr, pca,
//! neighbors, leiden and umap

use crate::anndata::{AnnData, ObsColumn};
use crate::cell_table::RAW_LAYER;
use crate::cluster::*;
use crate::highest_expr::*;
use crate::neighbors::*;
use crate::orion_common::*;
use crate::orion_input::*;
use crate::pca::*;
use crate::render::*;
use crate::umap::*;
use matrix_util::knn_graph::KnnGraph;
use matrix_util::mtx_io::write_mtx_triplets;

pub const LEIDEN_KEY: &str = "leiden";

#[derive(Args, Debug)]
pub struct InspectArgs {
    #[command(flatten)]
    pub table: TableArgs,
}

#[derive(Args, Debug)]
pub struct HighestExprArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[arg(long, default_value_t = 20, help = "Number of markers to report")]
    pub n_top: usize,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.highest_expr.tsv: mean and quartiles of percent of cell total"
    )]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct PcaArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub pca: PcaParams,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.pca.parquet: cells x components\n\
		     - {out}.pca_loadings.parquet: markers x components\n\
		     - {out}.pca_variance.tsv: explained variance per component"
    )]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct NeighborsArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub pca: PcaParams,

    #[command(flatten)]
    pub neighbors: NeighborParams,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.connectivities.mtx.gz: fuzzy neighbour weights\n\
		     - {out}.distances.mtx.gz: neighbour distances"
    )]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct LeidenArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub pca: PcaParams,

    #[command(flatten)]
    pub neighbors: NeighborParams,

    #[command(flatten)]
    pub leiden: LeidenParams,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.clusters.parquet: cluster per cell\n\
		     - {out}.cluster_markers.parquet: mean marker value per cluster\n\
		     - {out}.cluster_markers.png: the same as a heatmap"
    )]
    pub out: Box<str>,
}

#[derive(Args, Debug)]
pub struct UmapArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[command(flatten)]
    pub pca: PcaParams,

    #[command(flatten)]
    pub neighbors: NeighborParams,

    #[command(flatten)]
    pub umap: UmapParams,

    #[command(flatten)]
    pub render: RenderParams,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix.\n\n\
		     Generates:\n\
		     - {out}.umap.parquet: cells x 2\n\
		     - {out}.umap.png: scatter plot"
    )]
    pub out: Box<str>,
}

////////////
// stages //
////////////

pub fn stage_highest_expr(adata: &AnnData, n_top: usize, out: &str) -> anyhow::Result<()> {
    let raw = adata.layer_or_x(RAW_LAYER);
    let shares = highest_expressed(raw, &adata.var_names, n_top);
    eprintln!("{}", shares_ascii(&shares, 50));

    let file = format!("{}.highest_expr.tsv", out);
    write_lines(&shares_to_lines(&shares), &file)?;
    info!("Wrote {}", file);
    Ok(())
}

pub fn stage_pca(
    adata: &mut AnnData,
    params: &PcaParams,
    seed: u64,
    out: &str,
) -> anyhow::Result<PcaResult> {
    let pca = pca_into(adata, params.n_comps, seed)?;
    let pcs = pca.component_names();

    pca.scores
        .to_parquet(Some(&adata.obs_names), Some(&pcs), &format!("{}.pca.parquet", out))?;
    pca.loadings.to_parquet(
        Some(&adata.var_names),
        Some(&pcs),
        &format!("{}.pca_loadings.parquet", out),
    )?;

    let mut lines: Vec<Box<str>> = vec!["component\tvariance\tvariance_ratio".into()];
    lines.extend(
        pcs.iter()
            .zip(pca.variance.iter().zip(pca.variance_ratio.iter()))
            .map(|(pc, (v, r))| format!("{}\t{:.6}\t{:.6}", pc, v, r).into_boxed_str()),
    );
    write_lines(&lines, &format!("{}.pca_variance.tsv", out))?;

    info!(
        "PCA: {} components, first explains {:.2}% of the variance",
        pca.num_components(),
        100.0 * pca.variance_ratio.first().copied().unwrap_or(0.0)
    );
    Ok(pca)
}

/// Write a graph as a symmetric MatrixMarket file
pub fn write_graph_mtx(graph: &KnnGraph, values: &[f32], file: &str) -> anyhow::Result<()> {
    let triplets = graph.to_symmetric_triplets(values)?;
    write_mtx_triplets(&triplets, graph.num_nodes(), graph.num_nodes(), file)?;
    info!("Wrote {}", file);
    Ok(())
}

pub fn stage_neighbors(
    adata: &mut AnnData,
    params: &NeighborParams,
    out: &str,
) -> anyhow::Result<Neighbors> {
    let nn = compute_neighbors(adata, params.n_neighbors, params.n_pcs)?;
    write_graph_mtx(
        &nn.graph,
        &nn.connectivities,
        &format!("{}.connectivities.mtx.gz", out),
    )?;
    write_graph_mtx(
        &nn.graph,
        &nn.graph.distances,
        &format!("{}.distances.mtx.gz", out),
    )?;
    Ok(nn)
}

pub fn stage_leiden(
    adata: &mut AnnData,
    nn: &Neighbors,
    params: &LeidenParams,
    seed: u64,
    out: &str,
) -> anyhow::Result<ClusterResult> {
    let mut result = leiden_clustering(
        &nn.graph,
        &nn.connectivities,
        params.resolution,
        params.target_clusters,
        seed,
    )?;

    if params.min_cluster_size > 1 {
        result.remove_small_clusters(params.min_cluster_size);
    }

    eprintln!("{}", result.histogram_ascii(50, 30));

    adata.insert_obs(LEIDEN_KEY, ObsColumn::Categorical(result.label_names()))?;
    adata.insert_uns(
        &[LEIDEN_KEY, "params"],
        serde_json::json!({
            "resolution": params.resolution,
            "target_clusters": params.target_clusters,
            "n_clusters": result.n_clusters,
            "seed": seed,
        }),
    )?;

    write_cluster_assignments(&result, &adata.obs_names, &format!("{}.clusters.parquet", out))?;

    let means = cluster_marker_means(&adata.x, &result);
    let cluster_names: Vec<Box<str>> = (0..result.n_clusters)
        .map(|k| k.to_string().into_boxed_str())
        .collect();
    means.to_parquet(
        Some(&cluster_names),
        Some(&adata.var_names),
        &format!("{}.cluster_markers.parquet", out),
    )?;
    if result.n_clusters > 0 {
        heatmap_png(&means, &format!("{}.cluster_markers.png", out))?;
    }

    Ok(result)
}

/// Colours for embedding plots: Leiden clusters when available
pub fn default_colors(adata: &AnnData) -> Vec<image::Rgb<u8>> {
    match adata.obs_categorical(LEIDEN_KEY) {
        Ok(labels) => {
            let names = crate::spatial_distance::sorted_labels(labels);
            categorical_colors(labels, &names).0
        }
        Err(_) => vec![NA_COLOR; adata.n_obs()],
    }
}

pub fn stage_umap(
    adata: &mut AnnData,
    nn: &Neighbors,
    params: &UmapParams,
    render: &RenderParams,
    seed: u64,
    out: &str,
) -> anyhow::Result<Mat> {
    let umap = Umap::default()
        .min_dist(params.min_dist)
        .spread(params.spread)
        .n_epochs(params.n_epochs)
        .seed(seed);

    let coords = umap_into(adata, nn, &umap)?;
    let cols: Vec<Box<str>> = vec!["UMAP1".into(), "UMAP2".into()];
    coords.to_parquet(Some(&adata.obs_names), Some(&cols), &format!("{}.umap.parquet", out))?;

    let args = ScatterArgs {
        size: render.size,
        point_size: render.point_size,
        y_down: false,
    };
    scatter_png(
        &coords,
        &default_colors(adata),
        None,
        &args,
        &format!("{}.umap.png", out),
    )?;
    Ok(coords)
}

//////////////
// commands //
//////////////

pub fn run_inspect(args: &InspectArgs) -> anyhow::Result<()> {
    let adata = args.table.load()?;
    println!("{} cells x {} markers", adata.n_obs(), adata.n_vars());
    for line in adata.print_keys() {
        println!("{}", line);
    }
    Ok(())
}

pub fn run_highest_expr(args: &HighestExprArgs) -> anyhow::Result<()> {
    let adata = args.table.load()?;
    stage_highest_expr(&adata, args.n_top, &args.out)?;

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "highest-expr",
            "table": args.table.table,
            "n_top": args.n_top,
        }),
    )
}

pub fn run_pca(args: &PcaArgs) -> anyhow::Result<()> {
    let mut adata = args.table.load()?;
    stage_pca(&mut adata, &args.pca, args.seed, &args.out)?;

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "pca",
            "table": args.table.table,
            "n_comps": args.pca.n_comps,
            "seed": args.seed,
        }),
    )
}

pub fn run_neighbors(args: &NeighborsArgs) -> anyhow::Result<()> {
    let mut adata = args.table.load()?;
    if args.neighbors.n_pcs > 0 {
        pca_into(&mut adata, args.pca.n_comps, args.seed)?;
    }
    stage_neighbors(&mut adata, &args.neighbors, &args.out)?;

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "neighbors",
            "table": args.table.table,
            "n_comps": args.pca.n_comps,
            "n_neighbors": args.neighbors.n_neighbors,
            "n_pcs": args.neighbors.n_pcs,
            "seed": args.seed,
        }),
    )
}

pub fn run_leiden(args: &LeidenArgs) -> anyhow::Result<()> {
    let mut adata = args.table.load()?;
    if args.neighbors.n_pcs > 0 {
        pca_into(&mut adata, args.pca.n_comps, args.seed)?;
    }
    let nn = compute_neighbors(&mut adata, args.neighbors.n_neighbors, args.neighbors.n_pcs)?;
    let result = stage_leiden(&mut adata, &nn, &args.leiden, args.seed, &args.out)?;

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "leiden",
            "table": args.table.table,
            "n_comps": args.pca.n_comps,
            "n_neighbors": args.neighbors.n_neighbors,
            "n_pcs": args.neighbors.n_pcs,
            "resolution": args.leiden.resolution,
            "target_clusters": args.leiden.target_clusters,
            "min_cluster_size": args.leiden.min_cluster_size,
            "n_clusters": result.n_clusters,
            "seed": args.seed,
        }),
    )
}

pub fn run_umap(args: &UmapArgs) -> anyhow::Result<()> {
    let mut adata = args.table.load()?;
    pca_into(&mut adata, args.pca.n_comps, args.seed)?;
    let nn = compute_neighbors(&mut adata, args.neighbors.n_neighbors, args.neighbors.n_pcs)?;
    stage_umap(&mut adata, &nn, &args.umap, &args.render, args.seed, &args.out)?;

    write_parameters(
        &format!("{}.params.json", args.out),
        &serde_json::json!({
            "command": "umap",
            "table": args.table.table,
            "n_comps": args.pca.n_comps,
            "n_neighbors": args.neighbors.n_neighbors,
            "n_pcs": args.neighbors.n_pcs,
            "min_dist": args.umap.min_dist,
            "spread": args.umap.spread,
            "n_epochs": args.umap.n_epochs,
            "seed": args.seed,
        }),
    )
}
