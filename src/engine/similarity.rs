/// Best centroid match for a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestCentroid {
    pub id: String,
    pub similarity: f64,
}

/// Normalized dot product, accumulated in f64.
///
/// Returns 0 when either side has zero magnitude. Panics when the dimensions
/// differ: that means two embedding models are mixed in one index.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    assert_eq!(
        a.len(),
        b.len(),
        "embedding dimension mismatch: {} vs {}",
        a.len(),
        b.len()
    );
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Linear scan for the most similar centroid. Ties keep the first candidate
/// in iteration order; an empty candidate set yields `None`.
pub fn find_nearest_centroid<'a, I>(vector: &[f32], centroids: I) -> Option<NearestCentroid>
where
    I: IntoIterator<Item = (&'a str, &'a [f32])>,
{
    let mut best: Option<NearestCentroid> = None;
    for (id, centroid) in centroids {
        let similarity = cosine_similarity(vector, centroid);
        let better = match &best {
            Some(b) => similarity > b.similarity,
            None => true,
        };
        if better {
            best = Some(NearestCentroid {
                id: id.to_string(),
                similarity,
            });
        }
    }
    best
}

/// Element-wise mean. Empty input gives an empty vector.
pub fn calculate_centroid<V: AsRef<[f32]>>(vectors: &[V]) -> Vec<f32> {
    let Some(first) = vectors.first() else {
        return Vec::new();
    };
    let dim = first.as_ref().len();
    let mut sum = vec![0.0f64; dim];
    for v in vectors {
        let v = v.as_ref();
        assert_eq!(v.len(), dim, "embedding dimension mismatch in centroid");
        for (s, x) in sum.iter_mut().zip(v.iter()) {
            *s += *x as f64;
        }
    }
    let n = vectors.len() as f64;
    sum.into_iter().map(|s| (s / n) as f32).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_are_fully_similar() {
        let v = [0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn orthogonal_and_opposite() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn zero_magnitude_is_zero_not_nan() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
    }

    #[test]
    #[should_panic(expected = "dimension mismatch")]
    fn mismatched_dimensions_fail_fast() {
        cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn nearest_picks_best_and_keeps_first_on_tie() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0];
        let c = vec![0.0, 1.0];
        let candidates = vec![("c", c.as_slice()), ("a", a.as_slice()), ("b", b.as_slice())];
        let best = find_nearest_centroid(&[1.0, 0.1], candidates).unwrap();
        assert_eq!(best.id, "a");
    }

    #[test]
    fn nearest_of_nothing_is_none() {
        let empty: Vec<(&str, &[f32])> = Vec::new();
        assert!(find_nearest_centroid(&[1.0], empty).is_none());
    }

    #[test]
    fn centroid_is_mean() {
        let c = calculate_centroid(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![2.0, 2.0]]);
        assert_eq!(c, vec![1.0, 1.0]);
        let empty: Vec<Vec<f32>> = Vec::new();
        assert!(calculate_centroid(&empty).is_empty());
    }
}
