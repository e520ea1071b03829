//! Maximal-Marginal-Relevance selection.
//!
//! Re-ranks a candidate pool so results stay relevant to the query while
//! penalizing redundancy among the selected set. Exact greedy selection
//! over the full pool; candidate pools are small (tens of vectors), so the
//! O(k * n) scan is cheap.

/// Greedily select up to `k` candidate indices.
///
/// `lambda` trades relevance against diversity: 1.0 is pure relevance,
/// 0.0 is pure diversity. All similarities are inner products, so inputs
/// must be unit-norm. The first pick is the most relevant candidate; each
/// subsequent pick maximizes
/// `lambda * relevance - (1 - lambda) * max_similarity_to_selected`.
/// Ties keep the first-encountered candidate. Returns `min(k, pool)`
/// distinct indices in selection order.
pub fn select(
    query: &[f32],
    candidates: &[&[f32]],
    k: usize,
    lambda: f32,
) -> Vec<usize> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let relevance: Vec<f32> = candidates
        .iter()
        .map(|c| crate::embedding::dot(query, c))
        .collect();

    let mut selected: Vec<usize> = Vec::with_capacity(k.min(candidates.len()));
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();

    while selected.len() < k && !remaining.is_empty() {
        let mut best_slot = 0;
        let mut best_score = f32::NEG_INFINITY;

        for (slot, &candidate) in remaining.iter().enumerate() {
            let score = if selected.is_empty() {
                relevance[candidate]
            } else {
                let max_sim = selected
                    .iter()
                    .map(|&s| {
                        crate::embedding::dot(
                            candidates[candidate],
                            candidates[s],
                        )
                    })
                    .fold(f32::NEG_INFINITY, f32::max);
                lambda * relevance[candidate] - (1.0 - lambda) * max_sim
            };

            // Strict comparison keeps the first-encountered index on ties.
            if score > best_score {
                best_score = score;
                best_slot = slot;
            }
        }

        // Order-preserving removal keeps `remaining` in ascending candidate
        // order, so ties in later rounds still resolve to the lowest index.
        selected.push(remaining.remove(best_slot));
    }

    selected
}
