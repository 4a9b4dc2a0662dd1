/// Cosine similarity in [-1, 1]
///
/// Degenerate inputs (empty, different lengths, zero norm) have no defined
/// similarity and yield 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Cosine similarity against an optional reference, absent references contribute 0
pub fn similarity_to(vector: &[f32], reference: Option<&[f32]>) -> f32 {
    reference.map_or(0.0, |r| cosine_similarity(vector, r))
}

/// Weighted mean of the given vectors
///
/// Entries with a non-positive weight or an empty vector are ignored, as are
/// vectors whose length differs from the first accepted one. Returns `None`
/// when nothing contributed.
pub fn weighted_average<'a, I>(vectors: I) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = (&'a [f32], f32)>,
{
    let mut acc: Option<Vec<f32>> = None;
    let mut total_weight = 0.0f32;

    for (vector, weight) in vectors {
        if vector.is_empty() || weight <= 0.0 {
            continue;
        }
        let sums = acc.get_or_insert_with(|| vec![0.0; vector.len()]);
        if sums.len() != vector.len() {
            tracing::warn!(
                expected = sums.len(),
                actual = vector.len(),
                "Skipping vector with mismatched dimensions"
            );
            continue;
        }
        for (sum, x) in sums.iter_mut().zip(vector) {
            *sum += x * weight;
        }
        total_weight += weight;
    }

    if total_weight <= 0.0 {
        return None;
    }

    acc.map(|sums| sums.into_iter().map(|x| x / total_weight).collect())
}
