use crate::anndata::AnnData;
use crate::orion_common::*;
use crate::pca::PCA_KEY;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};

pub const CONNECTIVITIES_KEY: &str = "connectivities";
pub const DISTANCES_KEY: &str = "distances";

/// A kNN graph in marker space with its fuzzy connectivities
pub struct Neighbors {
    pub graph: KnnGraph,
    /// UMAP fuzzy weights, parallel to `graph.edges`
    pub connectivities: Vec<f32>,
}

/// The representation the graph is built on: the first `n_pcs`
/// principal components, or X itself when `n_pcs` is 0 or PCA is missing
pub fn neighbor_representation(adata: &AnnData, n_pcs: usize) -> Mat {
    match adata.obsm(PCA_KEY) {
        Ok(pcs) if n_pcs > 0 => {
            let k = n_pcs.min(pcs.ncols());
            if k < n_pcs {
                warn!("only {} principal components available", k);
            }
            pcs.columns(0, k).into_owned()
        }
        _ => {
            info!("building neighbours on X ({} markers)", adata.n_vars());
            adata.x.clone()
        }
    }
}

/// Build the neighbour graph; `n_neighbors` counts the cell itself
pub fn compute_neighbors(
    adata: &mut AnnData,
    n_neighbors: usize,
    n_pcs: usize,
) -> anyhow::Result<Neighbors> {
    let rep = neighbor_representation(adata, n_pcs);
    let knn = n_neighbors.saturating_sub(1).max(1);

    info!(
        "neighbours: {} cells x {} dims, {} nearest neighbours",
        rep.nrows(),
        rep.ncols(),
        knn
    );

    let graph = KnnGraph::from_rows(
        &rep,
        KnnGraphArgs {
            knn,
            reciprocal: false,
            ..Default::default()
        },
    )?;

    let connectivities = graph.fuzzy_kernel_weights();

    adata.insert_obsp(CONNECTIVITIES_KEY, graph.to_csc(&connectivities)?)?;
    adata.insert_obsp(DISTANCES_KEY, graph.to_csc(&graph.distances)?)?;
    adata.insert_uns(
        &["neighbors", "params"],
        serde_json::json!({
            "n_neighbors": n_neighbors,
            "n_pcs": n_pcs,
            "method": "umap",
            "metric": "euclidean",
        }),
    )?;

    info!(
        "neighbour graph: {} nodes, {} edges",
        graph.num_nodes(),
        graph.num_edges()
    );

    Ok(Neighbors {
        graph,
        connectivities,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_blobs() -> AnnData {
        let n = 40;
        let x = Mat::from_fn(n, 3, |i, j| {
            let centre = if i < n / 2 { 0.0 } else { 50.0 };
            centre + ((i * 7 + j * 3) % 11) as f32 * 0.1
        });
        let names = (0..n).map(|i| i.to_string().into_boxed_str()).collect();
        let vars = vec!["a".into(), "b".into(), "c".into()];
        AnnData::new(x, names, vars).unwrap()
    }

    #[test]
    fn graph_is_symmetric_with_unit_weights() {
        let mut adata = two_blobs();
        let nn = compute_neighbors(&mut adata, 6, 0).unwrap();

        assert!(nn.connectivities.iter().all(|&w| w > 0.0 && w <= 1.0));
        let conn = adata.obsp(CONNECTIVITIES_KEY).unwrap();
        assert_eq!(conn.nnz(), 2 * nn.graph.num_edges());

        let dense = nalgebra::DMatrix::from(conn);
        approx::assert_abs_diff_eq!(dense.clone(), dense.transpose());

        // no edge crosses the blobs
        for &(i, j) in nn.graph.edges.iter() {
            assert_eq!(i < 20, j < 20);
        }
        assert!(adata.uns().contains_key("neighbors"));
    }
}
