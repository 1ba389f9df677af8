use instant_distance::{Builder, Search};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fmt::{Debug, Display};

const HNSW_SEED: u64 = 20240917;

/// A dictionary (HnswMap wrapper) for fast column look-up
///
pub struct ColumnDict<T> {
    pub dict: instant_distance::HnswMap<VecPoint, T>,
    pub data_vec: Vec<VecPoint>,
    pub name2index: HashMap<T, usize>,
}

impl<T> ColumnDict<T>
where
    T: Clone + Eq + std::hash::Hash + Debug + Display + Send + Sync,
{
    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    pub fn from_dvector_views(data: Vec<nalgebra::DVectorView<f32>>, names: Vec<T>) -> Self {
        <ColumnDict<T> as ColumnDictOps<T, nalgebra::DVectorView<f32>>>::from_column_views(
            data, names,
        )
    }

    /// k-nearest neighbours of a named column among the others in
    /// the same dictionary; the query itself is excluded
    ///
    /// * `query_name` - the name of the column to match
    /// * `knn` - the number of nearest neighbours to return
    ///
    /// Returns names and Euclidean distances in ascending order
    pub fn search_others(
        &self,
        query_name: &T,
        knn: usize,
    ) -> anyhow::Result<(Vec<T>, Vec<f32>)> {
        let self_idx = self
            .name2index
            .get(query_name)
            .ok_or_else(|| anyhow::anyhow!("name {} not found", query_name))?;

        let query = &self.data_vec[*self_idx];
        let nquery = (knn + 1).min(self.len());

        let mut search = Search::default();
        let mut names = Vec::with_capacity(knn);
        let mut distances = Vec::with_capacity(knn);

        for item in self.dict.search(query, &mut search).take(nquery) {
            if item.value == query_name || names.len() >= knn {
                continue;
            }
            names.push(item.value.clone());
            distances.push(item.distance);
        }
        Ok((names, distances))
    }
}

pub trait ColumnDictOps<T, V> {
    fn from_column_views(data: Vec<V>, names: Vec<T>) -> Self;
}

impl<T, V> ColumnDictOps<T, V> for ColumnDict<T>
where
    T: Clone + Eq + std::hash::Hash + Debug + Display + Send + Sync,
    V: Sync + MakeVecPoint,
{
    fn from_column_views(data: Vec<V>, names: Vec<T>) -> Self {
        debug_assert!(
            data.len() == names.len(),
            "Data and names must have the same length"
        );

        let data_vec: Vec<VecPoint> = data.par_iter().map(|x| x.to_vp()).collect();

        let name2index: HashMap<T, usize> = names
            .iter()
            .enumerate()
            .map(|(j, x)| (x.clone(), j))
            .collect();

        let dict = Builder::default()
            .seed(HNSW_SEED)
            .build(data_vec.clone(), names);

        ColumnDict {
            dict,
            data_vec,
            name2index,
        }
    }
}

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

pub trait MakeVecPoint {
    fn to_vp(&self) -> VecPoint;
}

impl MakeVecPoint for Vec<f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint { data: self.clone() }
    }
}

impl MakeVecPoint for nalgebra::DVectorView<'_, f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.iter().cloned().collect(),
        }
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.data
            .iter()
            .zip(other.data.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }
}
