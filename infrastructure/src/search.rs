use std::cmp::Ordering;

use domain::models::{DistanceMetric, Embedding};
use rayon::prelude::*;

/// Above this many vectors the distance pass runs on the rayon pool.
const PARALLEL_THRESHOLD: usize = 4096;

pub struct SearchEngine;

impl SearchEngine {
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot_product / (norm_a * norm_b)
    }

    pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f32>()
            .sqrt()
    }

    pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
        match metric {
            DistanceMetric::Cosine => 1.0 - Self::cosine_similarity(a, b),
            DistanceMetric::L2 => Self::l2_distance(a, b),
        }
    }

    /// Positions and distances of the `top_k` entries nearest to `query`,
    /// nearest first. Equal distances keep insertion order; NaN sorts last.
    pub fn nearest(
        metric: DistanceMetric,
        query: &[f32],
        embeddings: &[Embedding],
        top_k: usize,
    ) -> Vec<(usize, f32)> {
        let distance_at =
            |(pos, emb): (usize, &Embedding)| (pos, Self::distance(metric, query, &emb.vector));
        let mut scored: Vec<(usize, f32)> = if embeddings.len() >= PARALLEL_THRESHOLD {
            embeddings.par_iter().enumerate().map(distance_at).collect()
        } else {
            embeddings.iter().enumerate().map(distance_at).collect()
        };

        scored.sort_by(|a, b| compare_distance(a.1, b.1).then(a.0.cmp(&b.0)));
        scored.truncate(top_k);
        scored
    }
}

fn compare_distance(a: f32, b: f32) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (false, false) => a.total_cmp(&b),
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
    }
}
