mod anndata;
mod cell_table;
mod cluster;
mod highest_expr;
mod leiden;
mod neighbors;
mod orion_common;
mod orion_input;
mod pca;
mod render;
mod run_analysis;
mod run_pipeline;
mod run_spatial;
mod run_tiff;
mod spatial_distance;
mod spatial_graph;
mod umap;

use orion_common::*;
use run_analysis::*;
use run_pipeline::*;
use run_spatial::*;
use run_tiff::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "ORION",
    long_about = "Exploratory analysis of multiplexed tissue imaging.\n\
		  Cell quantification tables (.csv or .csv.gz, one row per cell)\n\
		  go through PCA, a neighbour graph, Leiden clustering and UMAP in\n\
		  marker space, and neighbour graphs and distances in tissue space.\n\
		  The tiff-* commands inspect and transform the images themselves."
)]
struct Cli {
    #[arg(short = 'v', long, global = true, help = "Log progress to stderr")]
    verbose: bool,

    #[arg(
        long,
        global = true,
        help = "Maximum number of threads (default: all cores)"
    )]
    max_threads: Option<usize>,

    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a quantification table and list what the container holds
    Inspect(InspectArgs),

    /// Markers with the largest share of each cell's total intensity
    HighestExpr(HighestExprArgs),

    #[command(
        about = "Principal components of the marker matrix",
        long_about = "Centre the (log1p) marker matrix and take the leading\n\
		      principal components by randomized SVD.\n\
		      Each component is oriented so that its largest loading is positive.\n"
    )]
    Pca(PcaArgs),

    #[command(
        about = "Neighbour graph in marker space",
        long_about = "Build a kNN graph on the leading principal components\n\
		      and weight its edges by fuzzy (UMAP) connectivities.\n"
    )]
    Neighbors(NeighborsArgs),

    #[command(
        about = "Leiden clustering of the neighbour graph",
        long_about = "Cluster the neighbour graph by the Leiden algorithm\n\
		      (modularity with a resolution parameter).\n\
		      Clusters are numbered by decreasing size.\n"
    )]
    Leiden(LeidenArgs),

    /// Two-dimensional UMAP embedding of the neighbour graph
    Umap(UmapArgs),

    #[command(
        about = "Neighbour graph in tissue space",
        long_about = "Link cells by position: k nearest, within a radius,\n\
		      or along the Delaunay triangulation of the centroids.\n"
    )]
    SpatialNeighbors(SpatialNeighborsArgs),

    /// Distance from each cell to the nearest cell of each label
    SpatialDistance(SpatialDistanceArgs),

    /// Scatter plots of cells in tissue, UMAP or PCA coordinates
    Render(RenderArgs),

    #[command(
        about = "Run every step under one output prefix",
        long_about = "highest-expr, pca, neighbors, leiden, umap,\n\
		      spatial-neighbors, spatial-distance and the figures,\n\
		      all on one table with one output prefix.\n"
    )]
    Pipeline(PipelineArgs),

    /// Print the TIFF header
    TiffHeader(TiffFileArgs),

    /// Print the header and a summary of every image directory
    TiffInfo(TiffFileArgs),

    /// Mean intensity of every image directory
    TiffMean(TiffMeanArgs),

    /// Merge three 8-bit gray planes into one RGB TIFF
    #[command(name = "gray2rgb")]
    Gray2Rgb(Gray2RgbArgs),

    /// Blend selected channels with a colour palette into one RGB TIFF
    Colorize(ColorizeArgs),

    /// Mask tiles that are dark and flat
    TileMask(TileMaskCmdArgs),

    /// Draw cell outlines on a canvas the size of a reference image
    DrawCells(DrawCellsArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();

    set_num_threads(cli.max_threads)?;

    match &cli.commands {
        Commands::Inspect(args) => {
            run_inspect(args)?;
        }
        Commands::HighestExpr(args) => {
            run_highest_expr(args)?;
        }
        Commands::Pca(args) => {
            run_pca(args)?;
        }
        Commands::Neighbors(args) => {
            run_neighbors(args)?;
        }
        Commands::Leiden(args) => {
            run_leiden(args)?;
        }
        Commands::Umap(args) => {
            run_umap(args)?;
        }
        Commands::SpatialNeighbors(args) => {
            run_spatial_neighbors(args)?;
        }
        Commands::SpatialDistance(args) => {
            run_spatial_distance(args)?;
        }
        Commands::Render(args) => {
            run_render(args)?;
        }
        Commands::Pipeline(args) => {
            run_pipeline(args)?;
        }
        Commands::TiffHeader(args) => {
            run_tiff_header(args)?;
        }
        Commands::TiffInfo(args) => {
            run_tiff_info(args)?;
        }
        Commands::TiffMean(args) => {
            run_tiff_mean(args)?;
        }
        Commands::Gray2Rgb(args) => {
            run_gray2rgb(args)?;
        }
        Commands::Colorize(args) => {
            run_colorize(args)?;
        }
        Commands::TileMask(args) => {
            run_tile_mask(args)?;
        }
        Commands::DrawCells(args) => {
            run_draw_cells(args)?;
        }
    }

    info!("Done");
    Ok(())
}
