//! Hybrid cluster engine: density clustering over the union of new-article
//! vectors and past-synthesis vectors. The index partition is remembered so
//! members can be split back into articles vs past syntheses; clusters with
//! no articles are dropped (pure history brings no news).

use newsloom_common::config::ClusterConfig;
use newsloom_store::cosine_similarity;
use tracing::{debug, info};

pub const NOISE: i64 = -1;

/// Cluster members as indices into the two input slices.
#[derive(Debug, Clone, Default)]
pub struct RawCluster {
    pub label: i64,
    pub article_indices: Vec<usize>,
    pub synthesis_indices: Vec<usize>,
}

/// Cluster `article_vecs ⊕ synthesis_vecs` and return only clusters holding
/// at least one article.
pub fn cluster_hybrid(
    article_vecs: &[Vec<f32>],
    synthesis_vecs: &[Vec<f32>],
    config: &ClusterConfig,
) -> Vec<RawCluster> {
    let n_articles = article_vecs.len();
    let combined: Vec<&[f32]> = article_vecs
        .iter()
        .chain(synthesis_vecs.iter())
        .map(|v| v.as_slice())
        .collect();

    let labels = if config.use_density {
        density_labels(&combined, config)
    } else {
        greedy_labels(&combined, config)
    };

    let max_label = labels.iter().copied().max().unwrap_or(NOISE);
    let mut clusters: Vec<RawCluster> = (0..=max_label.max(NOISE))
        .filter(|l| *l >= 0)
        .map(|label| RawCluster {
            label,
            ..Default::default()
        })
        .collect();

    for (index, &label) in labels.iter().enumerate() {
        if label == NOISE {
            continue;
        }
        let cluster = &mut clusters[label as usize];
        if index < n_articles {
            cluster.article_indices.push(index);
        } else {
            cluster.synthesis_indices.push(index - n_articles);
        }
    }

    let before = clusters.len();
    clusters.retain(|c| !c.article_indices.is_empty());
    if clusters.len() < before {
        debug!(
            dropped = before - clusters.len(),
            "Dropped pure-history clusters"
        );
    }
    info!(
        clusters = clusters.len(),
        articles = n_articles,
        past_syntheses = synthesis_vecs.len(),
        "Hybrid clustering complete"
    );
    clusters
}

/// Density clustering over cosine distance with mutual-reachability
/// smoothing: pairs whose mutual reachability distance is within epsilon are
/// linked; components smaller than `min_cluster_size` become noise.
fn density_labels(vectors: &[&[f32]], config: &ClusterConfig) -> Vec<i64> {
    let n = vectors.len();
    if n < config.min_cluster_size {
        return vec![NOISE; n];
    }

    // Pairwise cosine distance.
    let mut dist = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = 1.0 - cosine_similarity(vectors[i], vectors[j]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    // Core distance: distance to the min_samples-th nearest neighbour.
    let k = config.min_samples.max(1);
    let mut core = vec![0.0f32; n];
    for i in 0..n {
        let mut neighbours: Vec<f32> = (0..n).filter(|&j| j != i).map(|j| dist[i][j]).collect();
        neighbours.sort_by(|a, b| a.total_cmp(b));
        core[i] = neighbours.get(k - 1).copied().unwrap_or(f32::MAX);
    }

    // Link pairs whose mutual reachability is within epsilon.
    let mut uf = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            let mreach = dist[i][j].max(core[i]).max(core[j]);
            if mreach <= config.epsilon {
                uf.union(i, j);
            }
        }
    }

    components_to_labels(&mut uf, n, config.min_cluster_size)
}

/// Greedy fallback: an item joins a cluster only when at least two other
/// unassigned items sit above the similarity threshold.
fn greedy_labels(vectors: &[&[f32]], config: &ClusterConfig) -> Vec<i64> {
    let n = vectors.len();
    let mut labels = vec![NOISE; n];
    let mut next_label = 0i64;
    for i in 0..n {
        if labels[i] != NOISE {
            continue;
        }
        let neighbours: Vec<usize> = (0..n)
            .filter(|&j| {
                j != i
                    && labels[j] == NOISE
                    && cosine_similarity(vectors[i], vectors[j]) >= config.fallback_similarity
            })
            .collect();
        if neighbours.len() >= 2 {
            labels[i] = next_label;
            for j in neighbours {
                labels[j] = next_label;
            }
            next_label += 1;
        }
    }
    labels
}

fn components_to_labels(uf: &mut UnionFind, n: usize, min_cluster_size: usize) -> Vec<i64> {
    let mut sizes = std::collections::HashMap::new();
    for i in 0..n {
        *sizes.entry(uf.find(i)).or_insert(0usize) += 1;
    }
    let mut label_of_root = std::collections::HashMap::new();
    let mut next_label = 0i64;
    let mut labels = vec![NOISE; n];
    for i in 0..n {
        let root = uf.find(i);
        if sizes[&root] < min_cluster_size {
            continue;
        }
        let label = *label_of_root.entry(root).or_insert_with(|| {
            let l = next_label;
            next_label += 1;
            l
        });
        labels[i] = label;
    }
    labels
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, i: usize) -> usize {
        if self.parent[i] != i {
            let root = self.find(self.parent[i]);
            self.parent[i] = root;
        }
        self.parent[i]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}
