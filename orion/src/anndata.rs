//! Annotated data: a cells × markers matrix with per-cell annotations,
//! embeddings, pairwise graphs and free-form metadata.

use crate::orion_common::*;
use nalgebra_sparse::CooMatrix;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ops::Range;

/// `obsm` key of the cell centroids (cells × 2)
pub const SPATIAL_KEY: &str = "spatial";

/// One per-cell annotation column
#[derive(Debug, Clone, PartialEq)]
pub enum ObsColumn {
    Numeric(Vec<f32>),
    Categorical(Vec<Option<Box<str>>>),
}

impl ObsColumn {
    pub fn len(&self) -> usize {
        match self {
            ObsColumn::Numeric(x) => x.len(),
            ObsColumn::Categorical(x) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn kind(&self) -> &'static str {
        match self {
            ObsColumn::Numeric(_) => "numeric",
            ObsColumn::Categorical(_) => "categorical",
        }
    }

    fn select(&self, rows: &[usize]) -> Self {
        match self {
            ObsColumn::Numeric(x) => ObsColumn::Numeric(rows.iter().map(|&i| x[i]).collect()),
            ObsColumn::Categorical(x) => {
                ObsColumn::Categorical(rows.iter().map(|&i| x[i].clone()).collect())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnnData {
    /// cells × markers, possibly log1p transformed
    pub x: Mat,
    pub obs_names: Vec<Box<str>>,
    pub var_names: Vec<Box<str>>,
    layers: BTreeMap<Box<str>, Mat>,
    obs: BTreeMap<Box<str>, ObsColumn>,
    obsm: BTreeMap<Box<str>, Mat>,
    obsp: BTreeMap<Box<str>, CscMat>,
    uns: Map<String, Value>,
}

impl AnnData {
    pub fn new(x: Mat, obs_names: Vec<Box<str>>, var_names: Vec<Box<str>>) -> anyhow::Result<Self> {
        if x.nrows() != obs_names.len() || x.ncols() != var_names.len() {
            anyhow::bail!(
                "X is {} x {} but {} cell names and {} marker names were given",
                x.nrows(),
                x.ncols(),
                obs_names.len(),
                var_names.len()
            );
        }
        Ok(Self {
            x,
            obs_names,
            var_names,
            layers: BTreeMap::new(),
            obs: BTreeMap::new(),
            obsm: BTreeMap::new(),
            obsp: BTreeMap::new(),
            uns: Map::new(),
        })
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.x.ncols()
    }

    pub fn var_index(&self, name: &str) -> anyhow::Result<usize> {
        self.var_names
            .iter()
            .position(|v| v.as_ref() == name)
            .ok_or_else(|| anyhow::anyhow!("marker '{}' not found", name))
    }

    ////////////
    // layers //
    ////////////

    pub fn insert_layer(&mut self, name: &str, mat: Mat) -> anyhow::Result<()> {
        if mat.shape() != self.x.shape() {
            anyhow::bail!(
                "layer '{}' is {} x {}, X is {} x {}",
                name,
                mat.nrows(),
                mat.ncols(),
                self.n_obs(),
                self.n_vars()
            );
        }
        self.layers.insert(name.into(), mat);
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&Mat> {
        self.layers.get(name)
    }

    /// the named layer, or X itself when the layer is absent
    pub fn layer_or_x(&self, name: &str) -> &Mat {
        self.layers.get(name).unwrap_or(&self.x)
    }

    /////////
    // obs //
    /////////

    pub fn insert_obs(&mut self, name: &str, column: ObsColumn) -> anyhow::Result<()> {
        if column.len() != self.n_obs() {
            anyhow::bail!(
                "obs column '{}' has {} values for {} cells",
                name,
                column.len(),
                self.n_obs()
            );
        }
        self.obs.insert(name.into(), column);
        Ok(())
    }

    pub fn obs(&self, name: &str) -> Option<&ObsColumn> {
        self.obs.get(name)
    }

    pub fn obs_numeric(&self, name: &str) -> anyhow::Result<&[f32]> {
        match self.obs.get(name) {
            Some(ObsColumn::Numeric(x)) => Ok(x),
            Some(_) => anyhow::bail!("obs column '{}' is not numeric", name),
            None => anyhow::bail!("obs column '{}' not found", name),
        }
    }

    pub fn obs_categorical(&self, name: &str) -> anyhow::Result<&[Option<Box<str>>]> {
        match self.obs.get(name) {
            Some(ObsColumn::Categorical(x)) => Ok(x),
            Some(_) => anyhow::bail!("obs column '{}' is not categorical", name),
            None => anyhow::bail!("obs column '{}' not found", name),
        }
    }

    //////////
    // obsm //
    //////////

    pub fn insert_obsm(&mut self, name: &str, mat: Mat) -> anyhow::Result<()> {
        if mat.nrows() != self.n_obs() {
            anyhow::bail!(
                "obsm '{}' has {} rows for {} cells",
                name,
                mat.nrows(),
                self.n_obs()
            );
        }
        self.obsm.insert(name.into(), mat);
        Ok(())
    }

    pub fn obsm(&self, name: &str) -> anyhow::Result<&Mat> {
        self.obsm
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("obsm '{}' not found", name))
    }

    pub fn has_obsm(&self, name: &str) -> bool {
        self.obsm.contains_key(name)
    }

    //////////
    // obsp //
    //////////

    pub fn insert_obsp(&mut self, name: &str, mat: CscMat) -> anyhow::Result<()> {
        if mat.nrows() != self.n_obs() || mat.ncols() != self.n_obs() {
            anyhow::bail!(
                "obsp '{}' is {} x {} for {} cells",
                name,
                mat.nrows(),
                mat.ncols(),
                self.n_obs()
            );
        }
        self.obsp.insert(name.into(), mat);
        Ok(())
    }

    pub fn obsp(&self, name: &str) -> anyhow::Result<&CscMat> {
        self.obsp
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("obsp '{}' not found", name))
    }

    /////////
    // uns //
    /////////

    /// Set `uns[path[0]][path[1]]...` creating intermediate objects
    pub fn insert_uns(&mut self, path: &[&str], value: Value) -> anyhow::Result<()> {
        let Some((last, parents)) = path.split_last() else {
            anyhow::bail!("empty uns path");
        };
        let mut node = &mut self.uns;
        for key in parents {
            let entry = node
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            node = match entry {
                Value::Object(m) => m,
                _ => anyhow::bail!("uns entry '{}' is not a mapping", key),
            };
        }
        node.insert(last.to_string(), value);
        Ok(())
    }

    pub fn uns(&self) -> &Map<String, Value> {
        &self.uns
    }

    ////////////
    // subset //
    ////////////

    /// Keep the cells in `rows` (in that order); each row at most once
    pub fn select_rows(&self, rows: &[usize]) -> anyhow::Result<Self> {
        if let Some(&bad) = rows.iter().find(|&&i| i >= self.n_obs()) {
            anyhow::bail!("row {} out of range for {} cells", bad, self.n_obs());
        }

        let mut new_index = vec![None; self.n_obs()];
        for (new, &old) in rows.iter().enumerate() {
            if new_index[old].replace(new).is_some() {
                anyhow::bail!("row {} selected more than once", old);
            }
        }

        let subset_graph = |g: &CscMat| -> CscMat {
            let mut coo = CooMatrix::new(rows.len(), rows.len());
            for (i, j, &v) in g.triplet_iter() {
                if let (Some(ii), Some(jj)) = (new_index[i], new_index[j]) {
                    coo.push(ii, jj, v);
                }
            }
            CscMat::from(&coo)
        };

        Ok(Self {
            x: select_rows(&self.x, rows),
            obs_names: rows.iter().map(|&i| self.obs_names[i].clone()).collect(),
            var_names: self.var_names.clone(),
            layers: self
                .layers
                .iter()
                .map(|(k, m)| (k.clone(), select_rows(m, rows)))
                .collect(),
            obs: self
                .obs
                .iter()
                .map(|(k, c)| (k.clone(), c.select(rows)))
                .collect(),
            obsm: self
                .obsm
                .iter()
                .map(|(k, m)| (k.clone(), select_rows(m, rows)))
                .collect(),
            obsp: self
                .obsp
                .iter()
                .map(|(k, g)| (k.clone(), subset_graph(g)))
                .collect(),
            uns: self.uns.clone(),
        })
    }

    pub fn subset_rows(&self, range: Range<usize>) -> anyhow::Result<Self> {
        let rows: Vec<usize> = range.collect();
        self.select_rows(&rows)
    }

    /// Keep cells whose `spatial` coordinates fall in the rectangle
    /// (bounds inclusive); returns the kept indices too
    pub fn filter_rect(
        &self,
        x_min: f32,
        x_max: f32,
        y_min: f32,
        y_max: f32,
    ) -> anyhow::Result<(Self, Vec<usize>)> {
        let coords = self.obsm(SPATIAL_KEY)?;
        let kept: Vec<usize> = (0..self.n_obs())
            .filter(|&i| {
                let (x, y) = (coords[(i, 0)], coords[(i, 1)]);
                x >= x_min && x <= x_max && y >= y_min && y <= y_max
            })
            .collect();
        info!(
            "{} of {} cells in [{}, {}] x [{}, {}]",
            kept.len(),
            self.n_obs(),
            x_min,
            x_max,
            y_min,
            y_max
        );
        Ok((self.select_rows(&kept)?, kept))
    }

    /////////////
    // display //
    /////////////

    /// Indented listing of everything the container holds
    pub fn print_keys(&self) -> Vec<Box<str>> {
        let mut lines: Vec<Box<str>> = vec![];
        let shape = |m: &Mat| format!("{} x {}", m.nrows(), m.ncols());

        lines.push(format!("X: {}", shape(&self.x)).into());

        lines.push("layers".into());
        for (k, m) in self.layers.iter() {
            lines.push(format!("  {}: {}", k, shape(m)).into());
        }

        lines.push("obs".into());
        for (k, c) in self.obs.iter() {
            lines.push(format!("  {} ({})", k, c.kind()).into());
        }

        lines.push("obsm".into());
        for (k, m) in self.obsm.iter() {
            lines.push(format!("  {}: {}", k, shape(m)).into());
        }

        lines.push("obsp".into());
        for (k, g) in self.obsp.iter() {
            lines.push(format!("  {}: {} x {}, nnz {}", k, g.nrows(), g.ncols(), g.nnz()).into());
        }

        lines.push("uns".into());
        print_nested_keys(&self.uns, 1, &mut lines);
        lines
    }
}

fn print_nested_keys(map: &Map<String, Value>, depth: usize, lines: &mut Vec<Box<str>>) {
    let indent = "  ".repeat(depth);
    for (k, v) in map.iter() {
        lines.push(format!("{}{}", indent, k).into());
        if let Value::Object(inner) = v {
            print_nested_keys(inner, depth + 1, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra_sparse::CooMatrix;

    fn toy() -> AnnData {
        let x = Mat::from_row_slice(4, 2, &[1., 2., 3., 4., 5., 6., 7., 8.]);
        let names = (0..4).map(|i| format!("img_{}", i).into()).collect();
        let mut adata = AnnData::new(x, names, vec!["CD3D".into(), "CD20".into()]).unwrap();
        let spatial = Mat::from_row_slice(4, 2, &[0., 0., 10., 0., 0., 10., 10., 10.]);
        adata.insert_obsm("spatial", spatial).unwrap();
        adata
            .insert_obs(
                "phenotype",
                ObsColumn::Categorical(vec![Some("T".into()), None, Some("B".into()), Some("T".into())]),
            )
            .unwrap();
        let mut coo = CooMatrix::new(4, 4);
        coo.push(0, 3, 1.0);
        coo.push(3, 0, 1.0);
        coo.push(1, 2, 1.0);
        coo.push(2, 1, 1.0);
        adata.insert_obsp("spatial_connectivities", CscMat::from(&coo)).unwrap();
        adata
    }

    #[test]
    fn shape_checks() {
        let mut adata = toy();
        assert!(adata.insert_obsm("X_pca", Mat::zeros(3, 2)).is_err());
        assert!(adata.insert_obs("area", ObsColumn::Numeric(vec![1.0; 5])).is_err());
        assert!(adata.insert_layer("raw", Mat::zeros(4, 3)).is_err());
        assert!(adata.insert_layer("raw", Mat::zeros(4, 2)).is_ok());
        assert!(AnnData::new(Mat::zeros(2, 2), vec!["a".into()], vec![]).is_err());
    }

    #[test]
    fn filter_rect_is_inclusive_and_keeps_graph() {
        let adata = toy();
        let (sub, kept) = adata.filter_rect(0.0, 10.0, 0.0, 0.0).unwrap();
        assert_eq!(kept, vec![0, 1]);
        assert_eq!(sub.n_obs(), 2);
        assert_eq!(sub.x[(1, 0)], 3.0);
        assert_eq!(sub.obs_categorical("phenotype").unwrap()[1], None);
        // the only edges crossed the cut
        assert_eq!(sub.obsp("spatial_connectivities").unwrap().nnz(), 0);

        let (sub, kept) = adata.filter_rect(0.0, 10.0, 0.0, 10.0).unwrap();
        assert_eq!(kept.len(), 4);
        assert_eq!(sub.obsp("spatial_connectivities").unwrap().nnz(), 4);
    }

    #[test]
    fn subset_first_rows() {
        let adata = toy();
        let sub = adata.subset_rows(0..3).unwrap();
        assert_eq!(sub.n_obs(), 3);
        assert_eq!(sub.obsm("spatial").unwrap().nrows(), 3);
        assert_eq!(sub.obsp("spatial_connectivities").unwrap().nnz(), 2);
        assert!(adata.subset_rows(2..5).is_err());
    }

    #[test]
    fn select_rows_reorders_and_rejects_repeats() {
        let adata = toy();
        let sub = adata.select_rows(&[3, 0]).unwrap();
        assert_eq!(sub.obs_names[0].as_ref(), "img_3");
        assert_eq!(sub.x[(1, 1)], 2.0);
        // the 0 - 3 edge follows both cells
        let g = sub.obsp("spatial_connectivities").unwrap();
        assert_eq!(g.nnz(), 2);
        assert!(g.triplet_iter().all(|(i, j, _)| i != j));

        let err = adata.select_rows(&[0, 3, 0]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn keys_are_nested() {
        let mut adata = toy();
        adata
            .insert_uns(&["pca", "variance_ratio"], serde_json::json!([0.5, 0.2]))
            .unwrap();
        adata
            .insert_uns(&["pca", "params", "n_comps"], serde_json::json!(2))
            .unwrap();
        let lines = adata.print_keys();
        let text = lines.join("\n");
        assert!(text.starts_with("X: 4 x 2"));
        assert!(text.contains("\n  spatial: 4 x 2"));
        assert!(text.contains("\n  phenotype (categorical)"));
        assert!(text.contains("uns\n  pca\n    params\n      n_comps\n    variance_ratio"));
    }
}
