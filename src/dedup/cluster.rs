// src/dedup/cluster.rs
//! Duplicate clustering as connected components.
//!
//! Two events are linked when their weighted similarity clears the
//! threshold; clusters are the transitive closure of that relation. This
//! deliberately favors aggressive merging: an event only needs one
//! above-threshold neighbor to join a cluster, so a low threshold can
//! chain unrelated events together. Cluster size is not bounded and
//! all-pairs similarity is not re-validated after growth.

use crate::config::DedupConfig;
use crate::dedup::similarity;
use crate::model::RawEvent;

/// Plain union-find over event indices.
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            let root = self.find(self.parent[x]);
            self.parent[x] = root;
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Group event indices into duplicate clusters. O(n²) pairwise scoring is
/// fine at newsletter scale (tens to low hundreds of events per run).
/// Members keep arrival order; clusters are ordered by their earliest
/// member.
pub(crate) fn cluster_indices(events: &[RawEvent], cfg: &DedupConfig) -> Vec<Vec<usize>> {
    let n = events.len();
    let mut uf = UnionFind::new(n);

    for i in 0..n {
        for j in (i + 1)..n {
            if similarity::score(&events[i], &events[j], cfg).total >= cfg.threshold {
                uf.union(i, j);
            }
        }
    }

    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut root_to_cluster: std::collections::HashMap<usize, usize> =
        std::collections::HashMap::new();
    for i in 0..n {
        let root = uf.find(i);
        match root_to_cluster.get(&root) {
            Some(&c) => clusters[c].push(i),
            None => {
                root_to_cluster.insert(root, clusters.len());
                clusters.push(vec![i]);
            }
        }
    }
    clusters
}
