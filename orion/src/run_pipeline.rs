//! The whole analysis under one output prefix

use crate::orion_common::*;
use crate::orion_input::*;
use crate::run_analysis::*;
use crate::run_spatial::*;

#[derive(Args, Debug)]
pub struct PipelineArgs {
    #[command(flatten)]
    pub table: TableArgs,

    #[arg(long, default_value_t = 20, help = "Markers in the highest-expression summary")]
    pub n_top: usize,

    #[command(flatten)]
    pub pca: PcaParams,

    #[command(flatten)]
    pub neighbors: NeighborParams,

    #[command(flatten)]
    pub leiden: LeidenParams,

    #[command(flatten)]
    pub umap: UmapParams,

    #[command(flatten)]
    pub spatial: SpatialParams,

    #[command(flatten)]
    pub render: RenderParams,

    #[arg(
        long,
        value_delimiter(','),
        help = "Markers to colour embeddings by (comma separated)",
        long_help = "Markers shown on a blue-white-red scale, one figure\n\
		     per marker and embedding, e.g. CD3D,CD20,CD163."
    )]
    pub color: Vec<Box<str>>,

    #[arg(
        long,
        default_value_t = false,
        help = "Use the --phenotype column instead of Leiden clusters for spatial distance"
    )]
    pub distance_by_phenotype: bool,

    #[arg(long, default_value_t = DEFAULT_SEED, help = "Random seed")]
    pub seed: u64,

    #[arg(
        long,
        short = 'o',
        required = true,
        help = "Output file prefix",
        long_help = "Output file prefix; every artefact of the individual\n\
		     commands is written under it, plus {out}.keys.txt listing\n\
		     the final contents of the annotated container."
    )]
    pub out: Box<str>,
}

pub fn run_pipeline(args: &PipelineArgs) -> anyhow::Result<()> {
    let out = args.out.as_ref();
    if args.distance_by_phenotype && args.table.phenotype.is_none() {
        anyhow::bail!("--distance-by-phenotype needs --phenotype");
    }
    mkdir(out)?;

    let mut adata = args.table.load()?;

    ///////////////////////
    // marker-space part //
    ///////////////////////

    stage_highest_expr(&adata, args.n_top, out)?;
    stage_pca(&mut adata, &args.pca, args.seed, out)?;
    let nn = stage_neighbors(&mut adata, &args.neighbors, out)?;
    let clusters = stage_leiden(&mut adata, &nn, &args.leiden, args.seed, out)?;
    stage_umap(&mut adata, &nn, &args.umap, &args.render, args.seed, out)?;

    //////////////////
    // spatial part //
    //////////////////

    let graph = stage_spatial_neighbors(&mut adata, &args.spatial, out)?;

    let phenotype = args
        .table
        .phenotype
        .as_deref()
        .filter(|_| args.distance_by_phenotype);
    let cell_labels = match phenotype {
        Some(column) => adata.obs_categorical(column)?.to_vec(),
        None => clusters.label_names(),
    };
    stage_spatial_distance(&adata, &cell_labels, out)?;

    /////////////
    // figures //
    /////////////

    // the UMAP figure was written with the embedding
    let leiden = adata.obs_categorical(LEIDEN_KEY)?.to_vec();
    stage_render(
        &adata,
        &[Basis::Spatial, Basis::Pca],
        Some(&leiden),
        &[],
        Some(&graph.edges),
        &args.render,
        out,
    )?;

    if !args.color.is_empty() {
        let prefix = format!("{}.markers", out);
        stage_render(
            &adata,
            &[Basis::Spatial, Basis::Umap, Basis::Pca],
            None,
            &args.color,
            None,
            &args.render,
            &prefix,
        )?;
    }

    write_lines(&adata.print_keys(), &format!("{}.keys.txt", out))?;

    write_parameters(
        &format!("{}.params.json", out),
        &serde_json::json!({
            "command": "pipeline",
            "table": args.table.table,
            "n_top": args.n_top,
            "n_comps": args.pca.n_comps,
            "n_neighbors": args.neighbors.n_neighbors,
            "n_pcs": args.neighbors.n_pcs,
            "resolution": args.leiden.resolution,
            "target_clusters": args.leiden.target_clusters,
            "n_clusters": clusters.n_clusters,
            "min_dist": args.umap.min_dist,
            "spread": args.umap.spread,
            "spatial_mode": args.spatial.mode.to_string(),
            "n_neighs": args.spatial.n_neighs,
            "prune": (!args.spatial.no_prune).then_some(&args.spatial.prune),
            "seed": args.seed,
            "uns": adata.uns(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    #[derive(Parser, Debug)]
    struct PipelineCli {
        #[command(flatten)]
        args: PipelineArgs,
    }

    /// 60 cells in three marker-space groups, each sitting in its own
    /// patch of tissue
    fn three_group_table(file: &str) {
        let mut rng = SmallRng::seed_from_u64(5);
        let noise = Normal::new(0.0f32, 20.0).unwrap();
        let jitter = Normal::new(0.0f32, 30.0).unwrap();

        let profiles = [
            [900.0f32, 50.0, 50.0, 400.0],
            [50.0, 900.0, 50.0, 400.0],
            [50.0, 50.0, 900.0, 400.0],
        ];
        let patches = [(200.0f32, 200.0f32), (600.0, 200.0), (400.0, 600.0)];

        let mut lines: Vec<Box<str>> =
            vec!["CellID,CD3D,CD20,CD163,DNA_1,X_centroid,Y_centroid,Area".into()];
        for i in 0..60 {
            let g = i % 3;
            let m: Vec<String> = profiles[g]
                .iter()
                .map(|&v| format!("{:.2}", (v + noise.sample(&mut rng)).max(0.0)))
                .collect();
            let (px, py) = patches[g];
            lines.push(
                format!(
                    "{},{},{:.2},{:.2},{}",
                    i + 1,
                    m.join(","),
                    px + jitter.sample(&mut rng),
                    py + jitter.sample(&mut rng),
                    40 + i
                )
                .into(),
            );
        }
        write_lines(&lines, file).unwrap();
    }

    #[test]
    fn pipeline_writes_every_artefact() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("tissue.csv.gz");
        let table = table.to_str().unwrap();
        three_group_table(table);

        let out = dir.path().join("run").join("tissue");
        let out = out.to_str().unwrap();

        let cli = PipelineCli::try_parse_from([
            "orion",
            table,
            "--n-comps",
            "3",
            "--n-neighbors",
            "10",
            "--n-pcs",
            "3",
            "--n-epochs",
            "50",
            "--size",
            "200",
            "--color",
            "CD3D,CD20",
            "-o",
            out,
        ])
        .unwrap();
        run_pipeline(&cli.args).unwrap();

        for suffix in [
            "highest_expr.tsv",
            "pca.parquet",
            "pca_loadings.parquet",
            "pca_variance.tsv",
            "connectivities.mtx.gz",
            "distances.mtx.gz",
            "clusters.parquet",
            "cluster_markers.parquet",
            "cluster_markers.png",
            "umap.parquet",
            "umap.png",
            "spatial_connectivities.mtx.gz",
            "spatial_distances.mtx.gz",
            "spatial_distance.parquet",
            "spatial_distance_summary.parquet",
            "spatial_distance.png",
            "spatial.png",
            "pca.png",
            "markers.spatial.CD3D.png",
            "markers.umap.CD20.png",
            "markers.pca.CD3D.png",
            "keys.txt",
            "params.json",
        ] {
            let file = format!("{}.{}", out, suffix);
            assert!(std::path::Path::new(&file).exists(), "missing {}", file);
        }

        let keys = matrix_util::common_io::read_lines(&format!("{}.keys.txt", out)).unwrap();
        let keys: Vec<&str> = keys.iter().map(|k| k.as_ref()).collect();
        assert_eq!(keys[0], "X: 60 x 4");
        for expected in [
            "layers",
            "  raw: 60 x 4",
            "obs",
            "  leiden (categorical)",
            "  image_id (categorical)",
            "obsm",
            "  spatial: 60 x 2",
            "  X_pca: 60 x 3",
            "  X_umap: 60 x 2",
            "obsp",
            "uns",
            "  table",
            "  pca",
            "  neighbors",
            "  leiden",
            "  umap",
            "  spatial_neighbors",
        ] {
            assert!(keys.contains(&expected), "{} not in {:?}", expected, keys);
        }
        for graph in [
            "  connectivities: 60 x 60",
            "  distances: 60 x 60",
            "  spatial_connectivities: 60 x 60",
            "  spatial_distances: 60 x 60",
        ] {
            assert!(keys.iter().any(|k| k.starts_with(graph)), "{} not listed", graph);
        }

        let params: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(format!("{}.params.json", out)).unwrap())
                .unwrap();
        assert_eq!(params["command"], "pipeline");
        assert_eq!(params["prune"], serde_json::json!([0.0, 500.0]));
        assert!(params["n_clusters"].as_u64().unwrap() >= 2);
    }

    #[test]
    fn distance_by_phenotype_needs_the_column() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("tissue.csv");
        let table = table.to_str().unwrap();
        three_group_table(table);
        let out = dir.path().join("tissue");

        let cli = PipelineCli::try_parse_from([
            "orion",
            table,
            "--n-comps",
            "3",
            "--n-neighbors",
            "10",
            "--n-pcs",
            "3",
            "--n-epochs",
            "10",
            "--distance-by-phenotype",
            "-o",
            out.to_str().unwrap(),
        ])
        .unwrap();
        let err = run_pipeline(&cli.args).unwrap_err();
        assert!(err.to_string().contains("--phenotype"));
        // rejected before any output
        assert!(!dir.path().join("tissue.highest_expr.tsv").exists());
    }
}
