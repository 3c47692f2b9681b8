//! Weighted reciprocal rank fusion.
//!
//! An item at 1-based rank `r` in a source list contributes
//! `weight / (rank_offset_constant + r)`; contributions from both lists are
//! summed and an item missing from a list contributes nothing. Only ranks
//! matter, so BM25 scores and similarities never need a common scale.

use std::collections::{HashMap, HashSet};

use stash_core::types::{FusionConfig, RetrievalHit, ScoreKind};

/// Contribution of one hit at 1-based `rank`.
pub fn rrf_contribution(weight: f32, rank_offset_constant: f32, rank: usize) -> f32 {
    weight / (rank_offset_constant + rank as f32)
}

/// Fuse two ranked lists into at most `config.top_k` hits, best first.
///
/// The keyword list is scanned before the vector list, so on equal totals
/// the item seen first there stays ahead. Within one list only the first
/// occurrence of an id counts. Either list may be empty.
pub fn fuse(keyword: &[RetrievalHit], vector: &[RetrievalHit], config: &FusionConfig) -> Vec<RetrievalHit> {
    let mut slot_by_id: HashMap<&str, usize> = HashMap::new();
    let mut totals: Vec<(&str, f32)> = Vec::new();

    for (hits, weight) in [(keyword, config.weight_keyword), (vector, config.weight_vector)] {
        let mut seen_in_list: HashSet<&str> = HashSet::new();
        let mut rank = 0usize;
        for hit in hits {
            if !seen_in_list.insert(hit.item_id.as_str()) {
                continue;
            }
            rank += 1;
            let contribution = rrf_contribution(weight, config.rank_offset_constant, rank);
            match slot_by_id.get(hit.item_id.as_str()) {
                Some(&slot) => totals[slot].1 += contribution,
                None => {
                    slot_by_id.insert(hit.item_id.as_str(), totals.len());
                    totals.push((hit.item_id.as_str(), contribution));
                }
            }
        }
    }

    // sort_by is stable: equal totals keep first-seen order
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals.truncate(config.top_k);
    totals
        .into_iter()
        .map(|(id, score)| RetrievalHit::new(id, score, ScoreKind::Fused))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hits(ids: &[&str], kind: ScoreKind) -> Vec<RetrievalHit> {
        ids.iter().enumerate().map(|(i, id)| RetrievalHit::new(*id, 1.0 / (i as f32 + 1.0), kind)).collect()
    }

    fn ids(hits: &[RetrievalHit]) -> Vec<&str> {
        hits.iter().map(|h| h.item_id.as_str()).collect()
    }

    fn config(weight_keyword: f32, weight_vector: f32, c: f32, top_k: usize) -> FusionConfig {
        FusionConfig { top_k, per_source_fetch_k: top_k.max(30), weight_keyword, weight_vector, rank_offset_constant: c }
    }

    #[test]
    fn overlapping_lists_reward_items_in_both() {
        let kw = hits(&["A", "B"], ScoreKind::Keyword);
        let vec = hits(&["B", "C"], ScoreKind::Similarity);
        let fused = fuse(&kw, &vec, &config(0.3, 0.7, 15.0, 10));
        assert_eq!(ids(&fused), vec!["B", "C", "A"]);
        assert!((fused[0].score - (0.3 / 17.0 + 0.7 / 16.0)).abs() < 1e-6);
        assert!((fused[1].score - 0.7 / 17.0).abs() < 1e-6);
        assert!((fused[2].score - 0.3 / 16.0).abs() < 1e-6);
        assert!(fused.iter().all(|h| h.score_kind == ScoreKind::Fused));
    }

    #[test]
    fn single_source_keeps_its_order() {
        let vec = hits(&["X", "Y", "Z"], ScoreKind::Similarity);
        let fused = fuse(&[], &vec, &config(0.3, 0.7, 15.0, 10));
        assert_eq!(ids(&fused), vec!["X", "Y", "Z"]);
        assert!((fused[2].score - 0.7 / 18.0).abs() < 1e-6);
    }

    #[test]
    fn equal_totals_keep_keyword_first() {
        let kw = hits(&["K"], ScoreKind::Keyword);
        let vec = hits(&["V"], ScoreKind::Similarity);
        let fused = fuse(&kw, &vec, &config(0.5, 0.5, 15.0, 10));
        assert_eq!(ids(&fused), vec!["K", "V"]);
        assert_eq!(fused[0].score, fused[1].score);
    }

    #[test]
    fn duplicates_within_a_list_count_once() {
        let kw = hits(&["A", "A", "B"], ScoreKind::Keyword);
        let fused = fuse(&kw, &[], &config(1.0, 1.0, 0.0, 10));
        assert_eq!(ids(&fused), vec!["A", "B"]);
        assert!((fused[0].score - 1.0).abs() < 1e-6);
        assert!((fused[1].score - 0.5).abs() < 1e-6, "B keeps rank 2 after the duplicate is skipped");
    }

    #[test]
    fn zero_weight_source_only_breaks_nothing() {
        let kw = hits(&["A", "B"], ScoreKind::Keyword);
        let vec = hits(&["B", "A"], ScoreKind::Similarity);
        let fused = fuse(&kw, &vec, &config(0.0, 1.0, 15.0, 10));
        assert_eq!(ids(&fused), vec!["B", "A"]);
    }

    #[test]
    fn empty_inputs_give_empty_output() {
        assert!(fuse(&[], &[], &FusionConfig::default()).is_empty());
    }
}
