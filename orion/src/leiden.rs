//! Leiden community detection (Traag, Waltman & van Eck 2019) for the
//! constant Potts model. Modularity is obtained by setting node weights
//! to weighted degrees and the resolution to `gamma / (2m)`.

use fnv::FnvHashMap as HashMap;
use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Weighted undirected graph in compressed adjacency form
#[derive(Debug, Clone)]
pub struct Network {
    node_weights: Vec<f64>,
    offsets: Vec<usize>,
    targets: Vec<usize>,
    weights: Vec<f64>,
}

impl Network {
    /// `edges` lists each undirected edge once; self loops are ignored
    pub fn new(node_weights: Vec<f64>, edges: &[(usize, usize, f64)]) -> anyhow::Result<Self> {
        let n = node_weights.len();
        let mut degree = vec![0usize; n];
        for &(i, j, _) in edges.iter() {
            if i >= n || j >= n {
                anyhow::bail!("edge ({}, {}) out of range for {} nodes", i, j, n);
            }
            if i != j {
                degree[i] += 1;
                degree[j] += 1;
            }
        }

        let mut offsets = vec![0usize; n + 1];
        for i in 0..n {
            offsets[i + 1] = offsets[i] + degree[i];
        }

        let mut fill = offsets.clone();
        let mut targets = vec![0usize; offsets[n]];
        let mut weights = vec![0f64; offsets[n]];
        for &(i, j, w) in edges.iter().filter(|&&(i, j, _)| i != j) {
            targets[fill[i]] = j;
            weights[fill[i]] = w;
            fill[i] += 1;
            targets[fill[j]] = i;
            weights[fill[j]] = w;
            fill[j] += 1;
        }

        Ok(Self {
            node_weights,
            offsets,
            targets,
            weights,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.node_weights.len()
    }

    pub fn node_weight(&self, i: usize) -> f64 {
        self.node_weights[i]
    }

    /// (neighbour, edge weight) pairs of node `i`
    pub fn neighbors(&self, i: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (lb, ub) = (self.offsets[i], self.offsets[i + 1]);
        self.targets[lb..ub]
            .iter()
            .copied()
            .zip(self.weights[lb..ub].iter().copied())
    }

    /// Collapse each cluster into one node; edges between clusters are
    /// summed and edges inside a cluster dropped
    pub fn aggregate(&self, clustering: &[usize], num_clusters: usize) -> anyhow::Result<Self> {
        let mut node_weights = vec![0f64; num_clusters];
        for (i, &c) in clustering.iter().enumerate() {
            node_weights[c] += self.node_weights[i];
        }

        let mut between: HashMap<(usize, usize), f64> = HashMap::default();
        for i in 0..self.num_nodes() {
            for (j, w) in self.neighbors(i) {
                let (ci, cj) = (clustering[i], clustering[j]);
                if i < j && ci != cj {
                    *between.entry((ci.min(cj), ci.max(cj))).or_insert(0.0) += w;
                }
            }
        }

        let mut edges: Vec<(usize, usize, f64)> =
            between.into_iter().map(|((a, b), w)| (a, b, w)).collect();
        edges.sort_by_key(|&(a, b, _)| (a, b));
        Self::new(node_weights, &edges)
    }
}

/// Relabel clusters to `0..k` in order of first appearance
pub fn renumber(clustering: &mut [usize]) -> usize {
    let mut map: HashMap<usize, usize> = HashMap::default();
    for c in clustering.iter_mut() {
        let next = map.len();
        *c = *map.entry(*c).or_insert(next);
    }
    map.len()
}

pub struct Leiden {
    resolution: f64,
    randomness: f64,
    rng: SmallRng,
}

impl Leiden {
    pub fn new(resolution: f64, randomness: f64, seed: u64) -> Self {
        Self {
            resolution,
            randomness,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// One Leiden iteration starting from `clustering`; returns whether
    /// any node changed cluster
    pub fn iterate(&mut self, network: &Network, clustering: &mut Vec<usize>) -> anyhow::Result<bool> {
        let n = network.num_nodes();
        if clustering.len() != n {
            anyhow::bail!("{} labels for {} nodes", clustering.len(), n);
        }
        renumber(clustering);

        let mut update = self.move_nodes_fast(network, clustering);
        let num_clusters = renumber(clustering);

        if num_clusters < n {
            let (mut refined, num_refined) = self.refine(network, clustering);

            // aggregate on the refined partition unless refinement
            // left every node alone
            let (reduced, mut reduced_clustering) = if num_refined < n {
                let mut reduced_clustering = vec![0; num_refined];
                for (i, &r) in refined.iter().enumerate() {
                    reduced_clustering[r] = clustering[i];
                }
                (network.aggregate(&refined, num_refined)?, reduced_clustering)
            } else {
                refined.clone_from(clustering);
                (
                    network.aggregate(clustering, num_clusters)?,
                    (0..num_clusters).collect(),
                )
            };

            update |= self.iterate(&reduced, &mut reduced_clustering)?;

            for (c, &r) in clustering.iter_mut().zip(refined.iter()) {
                *c = reduced_clustering[r];
            }
            renumber(clustering);
        }

        Ok(update)
    }

    /// Queue-based local moving: every node is visited in random order;
    /// when a node moves, its unstable neighbours outside the new cluster
    /// are queued again
    fn move_nodes_fast(&mut self, network: &Network, clustering: &mut [usize]) -> bool {
        let n = network.num_nodes();
        let mut cluster_weights = vec![0f64; n];
        let mut cluster_sizes = vec![0usize; n];
        for i in 0..n {
            cluster_weights[clustering[i]] += network.node_weight(i);
            cluster_sizes[clustering[i]] += 1;
        }

        let mut unused: Vec<usize> = (0..n).filter(|&c| cluster_sizes[c] == 0).collect();

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);
        let mut queue: VecDeque<usize> = order.into_iter().collect();
        let mut stable = vec![false; n];

        let mut edge_weight_per_cluster = vec![0f64; n];
        let mut visited = vec![false; n];
        let mut neighboring: Vec<usize> = Vec::with_capacity(n);
        let mut update = false;

        while let Some(j) = queue.pop_front() {
            let current = clustering[j];
            let wj = network.node_weight(j);

            cluster_weights[current] -= wj;
            cluster_sizes[current] -= 1;
            if cluster_sizes[current] == 0 {
                unused.push(current);
            }

            // an empty cluster is always a candidate
            neighboring.clear();
            if let Some(&empty) = unused.last() {
                neighboring.push(empty);
                visited[empty] = true;
            }
            for (k, w) in network.neighbors(j) {
                let c = clustering[k];
                if !visited[c] {
                    visited[c] = true;
                    neighboring.push(c);
                }
                edge_weight_per_cluster[c] += w;
            }

            let mut best = current;
            let mut best_gain =
                edge_weight_per_cluster[current] - wj * cluster_weights[current] * self.resolution;
            for &c in neighboring.iter() {
                let gain = edge_weight_per_cluster[c] - wj * cluster_weights[c] * self.resolution;
                if gain > best_gain {
                    best = c;
                    best_gain = gain;
                }
                edge_weight_per_cluster[c] = 0.0;
                visited[c] = false;
            }
            edge_weight_per_cluster[current] = 0.0;

            cluster_weights[best] += wj;
            cluster_sizes[best] += 1;
            if unused.last() == Some(&best) {
                unused.pop();
            }

            stable[j] = true;
            if best != current {
                clustering[j] = best;
                update = true;
                for (k, _) in network.neighbors(j) {
                    if stable[k] && clustering[k] != best {
                        stable[k] = false;
                        queue.push_back(k);
                    }
                }
            }
        }
        update
    }

    /// Merge singletons within each cluster of `clustering`. Only
    /// well-connected nodes move, only into well-connected refined
    /// clusters, chosen at random with probability `exp(gain / randomness)`
    fn refine(&mut self, network: &Network, clustering: &[usize]) -> (Vec<usize>, usize) {
        let n = network.num_nodes();
        let mut refined: Vec<usize> = (0..n).collect();

        let mut total_weight: HashMap<usize, f64> = HashMap::default();
        for i in 0..n {
            *total_weight.entry(clustering[i]).or_insert(0.0) += network.node_weight(i);
        }

        let mut cluster_weights: Vec<f64> = (0..n).map(|i| network.node_weight(i)).collect();
        let mut external: Vec<f64> = (0..n)
            .map(|i| {
                network
                    .neighbors(i)
                    .filter(|&(k, _)| clustering[k] == clustering[i])
                    .map(|(_, w)| w)
                    .sum()
            })
            .collect();
        let mut non_singleton = vec![false; n];

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut self.rng);

        let mut edge_weight_per_cluster = vec![0f64; n];
        let mut visited = vec![false; n];
        let mut neighboring: Vec<usize> = Vec::with_capacity(n);
        let mut candidates: Vec<(usize, f64)> = Vec::with_capacity(n);
        let resolution = self.resolution;

        for j in order {
            let total = total_weight[&clustering[j]];
            let wj = network.node_weight(j);
            let well_connected = |ext: f64, cw: f64| ext >= cw * (total - cw) * resolution;

            if non_singleton[j] || !well_connected(external[j], cluster_weights[j]) {
                continue;
            }

            let current = refined[j];
            cluster_weights[current] = 0.0;
            external[current] = 0.0;

            neighboring.clear();
            neighboring.push(current);
            visited[current] = true;
            for (k, w) in network.neighbors(j) {
                if clustering[k] != clustering[j] {
                    continue;
                }
                let c = refined[k];
                if !visited[c] {
                    visited[c] = true;
                    neighboring.push(c);
                }
                edge_weight_per_cluster[c] += w;
            }

            let mut best = current;
            let mut best_gain = 0.0;
            candidates.clear();
            for &c in neighboring.iter() {
                if well_connected(external[c], cluster_weights[c]) {
                    let gain = edge_weight_per_cluster[c] - wj * cluster_weights[c] * resolution;
                    if gain > best_gain {
                        best = c;
                        best_gain = gain;
                    }
                    if gain >= 0.0 {
                        candidates.push((c, gain));
                    }
                }
                edge_weight_per_cluster[c] = 0.0;
                visited[c] = false;
            }

            let chosen = self.sample_candidate(&candidates, best_gain).unwrap_or(best);

            cluster_weights[chosen] += wj;
            for (k, w) in network.neighbors(j) {
                if clustering[k] != clustering[j] {
                    continue;
                }
                if refined[k] == chosen {
                    external[chosen] -= w;
                } else {
                    external[chosen] += w;
                }
            }

            if chosen != current {
                refined[j] = chosen;
                non_singleton[chosen] = true;
            }
        }

        let num_refined = renumber(&mut refined);
        (refined, num_refined)
    }

    /// Draw a candidate with probability proportional to
    /// `exp((gain - max_gain) / randomness)`
    fn sample_candidate(&mut self, candidates: &[(usize, f64)], max_gain: f64) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let cumulative: Vec<f64> = candidates
            .iter()
            .scan(0.0, |acc, &(_, gain)| {
                *acc += ((gain - max_gain) / self.randomness).exp();
                Some(*acc)
            })
            .collect();
        let total = *cumulative.last()?;
        if !total.is_finite() || total <= 0.0 {
            return None;
        }
        let r = self.rng.random::<f64>() * total;
        let pos = cumulative.partition_point(|&c| c < r);
        candidates.get(pos.min(candidates.len() - 1)).map(|&(c, _)| c)
    }
}
