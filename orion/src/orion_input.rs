//! Command-line argument groups shared by the analysis commands

use crate::anndata::AnnData;
use crate::cell_table::*;
use crate::cluster::read_cluster_labels;
use crate::orion_common::*;
use crate::render::{DEFAULT_CANVAS_SIZE, DEFAULT_POINT_SIZE};
use crate::spatial_graph::{SpatialGraphArgs, SpatialMode};

/////////////////////////////
// quantification table in //
/////////////////////////////

#[derive(Args, Debug, Clone)]
pub struct TableArgs {
    #[arg(
        required = true,
        help = "Quantification table (.csv or .csv.gz)",
        long_help = "Single-cell quantification table, one row per cell.\n\
		     Expected layout: CellID, marker intensities, X_centroid,\n\
		     Y_centroid, then morphology columns (Area, Eccentricity, ...)."
    )]
    pub table: Box<str>,

    #[arg(
        long,
        help = "Column specification JSON",
        long_help = "JSON file naming the coordinate and marker columns, e.g.\n\
		     {\"X\": \"X_centroid\", \"Y\": \"Y_centroid\", \"MARKERS\": [\"CD3D\", \"CD20\"]}.\n\
		     Without MARKERS every column between CellID and X is a marker."
    )]
    pub columns: Option<Box<str>>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Markers to leave out (comma separated)"
    )]
    pub drop_markers: Vec<Box<str>>,

    #[arg(long, default_value_t = false, help = "Leave out markers starting with DNA")]
    pub remove_dna: bool,

    #[arg(
        long,
        default_value_t = false,
        help = "Keep raw intensities in X (no log1p)"
    )]
    pub no_log1p: bool,

    #[arg(long, default_value_t = 0, help = "Skip the first N cells")]
    pub skip_cells: usize,

    #[arg(long, help = "Keep at most N cells (after --skip-cells)")]
    pub max_cells: Option<usize>,

    #[arg(long, help = "Image id used in cell names (default: file stem)")]
    pub image_id: Option<Box<str>>,

    #[arg(
        long,
        help = "Text column kept as a categorical label (e.g. phenotype)"
    )]
    pub phenotype: Option<Box<str>>,
}

impl TableArgs {
    pub fn to_options(&self) -> anyhow::Result<CellTableOptions> {
        let columns = match self.columns.as_deref() {
            Some(file) => ColumnSpec::from_json_file(file)?,
            None => ColumnSpec::default(),
        };
        Ok(CellTableOptions {
            columns,
            drop_markers: self.drop_markers.clone(),
            remove_dna: self.remove_dna,
            log1p: !self.no_log1p,
            image_id: self.image_id.clone(),
            phenotype: self.phenotype.clone(),
        })
    }

    pub fn load(&self) -> anyhow::Result<AnnData> {
        let mut adata = read_cell_table(&self.table, &self.to_options()?)?;

        if self.skip_cells > 0 || self.max_cells.is_some() {
            let n = adata.n_obs();
            let lb = self.skip_cells.min(n);
            let ub = self.max_cells.map_or(n, |m| (lb + m).min(n));
            if lb == ub {
                anyhow::bail!("no cells left after skipping {} of {}", self.skip_cells, n);
            }
            adata = adata.subset_rows(lb..ub)?;
        }

        info!(
            "Loaded {}: {} cells x {} markers",
            self.table,
            adata.n_obs(),
            adata.n_vars()
        );
        Ok(adata)
    }
}

//////////////////////
// parameter groups //
//////////////////////

#[derive(Args, Debug, Clone)]
pub struct PcaParams {
    #[arg(
        long,
        default_value_t = 50,
        help = "Number of principal components",
        long_help = "Number of principal components.\n\
		     Capped at min(markers - 1, cells - 1)."
    )]
    pub n_comps: usize,
}

#[derive(Args, Debug, Clone)]
pub struct NeighborParams {
    #[arg(
        long,
        default_value_t = 30,
        help = "Neighbourhood size, counting the cell itself"
    )]
    pub n_neighbors: usize,

    #[arg(
        long,
        default_value_t = 10,
        help = "Principal components used for the graph (0 = use X)"
    )]
    pub n_pcs: usize,
}

#[derive(Args, Debug, Clone)]
pub struct LeidenParams {
    #[arg(
        long,
        default_value_t = 1.0,
        help = "Resolution parameter for Leiden (higher = more clusters)"
    )]
    pub resolution: f64,

    #[arg(
        long,
        help = "Target number of clusters",
        long_help = "Binary-search the resolution to get close to this many clusters.\n\
		     Overrides --resolution as the starting point of the search."
    )]
    pub target_clusters: Option<usize>,

    #[arg(
        long,
        default_value_t = 0,
        help = "Unassign clusters smaller than this (0 = keep all)"
    )]
    pub min_cluster_size: usize,
}

#[derive(Args, Debug, Clone)]
pub struct UmapParams {
    #[arg(long, default_value_t = 0.5, help = "Minimum distance between embedded points")]
    pub min_dist: f32,

    #[arg(long, default_value_t = 1.0, help = "Scale of the embedded points")]
    pub spread: f32,

    #[arg(
        long,
        help = "Optimization epochs (default: 500 up to 10k cells, else 200)"
    )]
    pub n_epochs: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct SpatialParams {
    #[arg(
        long,
        value_enum,
        default_value = "knn",
        help = "Spatial graph construction",
        long_help = "How cells are linked by position:\n\n\
		     - knn: each cell to its --n-neighs nearest cells\n\
		     - radius: all pairs closer than --radius\n\
		     - delaunay: edges of the Delaunay triangulation"
    )]
    pub mode: SpatialMode,

    #[arg(long, default_value_t = 6, help = "Neighbours per cell in knn mode")]
    pub n_neighs: usize,

    #[arg(long, default_value_t = 100.0, help = "Radius in radius mode")]
    pub radius: f32,

    #[arg(
        long,
        value_delimiter(','),
        default_values_t = vec![0.0, 500.0],
        help = "Keep edges with MIN <= distance <= MAX",
        long_help = "Distance interval MIN,MAX of the edges to keep.\n\
		     Edges outside are removed after construction."
    )]
    pub prune: Vec<f32>,

    #[arg(long, default_value_t = false, help = "Do not prune edges by distance")]
    pub no_prune: bool,
}

impl SpatialParams {
    pub fn to_graph_args(&self) -> anyhow::Result<SpatialGraphArgs> {
        let prune = if self.no_prune {
            None
        } else {
            match self.prune.as_slice() {
                [lo, hi] if lo <= hi => Some((*lo, *hi)),
                _ => anyhow::bail!("--prune takes MIN,MAX with MIN <= MAX"),
            }
        };
        Ok(SpatialGraphArgs {
            mode: self.mode,
            n_neighs: self.n_neighs,
            radius: self.radius,
            prune,
        })
    }
}

#[derive(Args, Debug, Clone)]
pub struct RenderParams {
    #[arg(
        long,
        default_value_t = DEFAULT_CANVAS_SIZE,
        help = "Longest side of each figure in pixels"
    )]
    pub size: u32,

    #[arg(
        long,
        default_value_t = DEFAULT_POINT_SIZE,
        help = "Point radius in pixels"
    )]
    pub point_size: f32,
}

#[derive(Args, Debug, Clone)]
pub struct LabelArgs {
    #[arg(
        long,
        help = "Cluster assignments (.clusters.parquet)",
        long_help = "Cluster assignments written by `orion leiden`\n\
		     (cells x 1 parquet, column `cluster`)."
    )]
    pub clusters: Option<Box<str>>,

    #[arg(
        long,
        help = "Categorical annotation used as labels (e.g. phenotype)"
    )]
    pub label: Option<Box<str>>,
}

impl LabelArgs {
    pub fn is_set(&self) -> bool {
        self.clusters.is_some() || self.label.is_some()
    }

    /// Per-cell labels with a display name
    pub fn resolve(&self, adata: &AnnData) -> anyhow::Result<(Box<str>, Vec<Option<Box<str>>>)> {
        match (self.clusters.as_deref(), self.label.as_deref()) {
            (Some(file), _) => Ok(("cluster".into(), read_cluster_labels(file, &adata.obs_names)?)),
            (None, Some(column)) => Ok((column.into(), adata.obs_categorical(column)?.to_vec())),
            (None, None) => anyhow::bail!("either --clusters or --label is required"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::common_io::create_temp_dir_file;

    fn gz_table(ncells: usize) -> Box<str> {
        let mut lines: Vec<Box<str>> = vec!["CellID,CD3D,CD20,X_centroid,Y_centroid".into()];
        for i in 1..=ncells {
            lines.push(format!("{},{},{},{},{}", i, i, 2 * i, 10 * i, 5 * i).into());
        }
        let file = create_temp_dir_file(".csv.gz").unwrap();
        let file = file.to_str().unwrap();
        write_lines(&lines, file).unwrap();
        file.into()
    }

    fn table_args(table: &str, skip_cells: usize, max_cells: Option<usize>) -> TableArgs {
        TableArgs {
            table: table.into(),
            columns: None,
            drop_markers: vec![],
            remove_dna: false,
            no_log1p: false,
            skip_cells,
            max_cells,
            image_id: Some("s".into()),
            phenotype: None,
        }
    }

    fn kept(table: &str, skip_cells: usize, max_cells: Option<usize>) -> Vec<String> {
        let adata = table_args(table, skip_cells, max_cells).load().unwrap();
        assert_eq!(adata.obsm("spatial").unwrap().nrows(), adata.n_obs());
        adata.obs_names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn skip_and_max_cells_keep_a_window() {
        let table = gz_table(5);

        assert_eq!(kept(&table, 0, None).len(), 5);
        assert_eq!(kept(&table, 3, None), vec!["s_4", "s_5"]);
        assert_eq!(kept(&table, 0, Some(2)), vec!["s_1", "s_2"]);
        assert_eq!(kept(&table, 1, Some(2)), vec!["s_2", "s_3"]);
        // clamped at the end of the table
        assert_eq!(kept(&table, 3, Some(10)), vec!["s_4", "s_5"]);
        assert_eq!(kept(&table, 0, Some(99)).len(), 5);
    }

    #[test]
    fn nothing_left_is_an_error() {
        let table = gz_table(5);
        assert!(table_args(&table, 5, None).load().is_err());
        assert!(table_args(&table, 12, Some(1)).load().is_err());
        assert!(table_args(&table, 0, Some(0)).load().is_err());
    }

    #[derive(Parser, Debug)]
    struct SpatialCli {
        #[command(flatten)]
        spatial: SpatialParams,
    }

    #[test]
    fn prune_defaults_and_validation() {
        let cli = SpatialCli::try_parse_from(["orion"]).unwrap();
        let args = cli.spatial.to_graph_args().unwrap();
        assert_eq!(args.mode, SpatialMode::Knn);
        assert_eq!(args.n_neighs, 6);
        assert_eq!(args.prune, Some((0.0, 500.0)));

        let cli = SpatialCli::try_parse_from(["orion", "--no-prune"]).unwrap();
        assert_eq!(cli.spatial.to_graph_args().unwrap().prune, None);

        let cli = SpatialCli::try_parse_from(["orion", "--prune", "10,50", "--mode", "radius"]).unwrap();
        let args = cli.spatial.to_graph_args().unwrap();
        assert_eq!(args.prune, Some((10.0, 50.0)));
        assert_eq!(args.mode, SpatialMode::Radius);

        for bad in ["50,10", "10", "1,2,3"] {
            let cli = SpatialCli::try_parse_from(["orion", "--prune", bad]).unwrap();
            assert!(cli.spatial.to_graph_args().is_err(), "{}", bad);
        }
    }
}
