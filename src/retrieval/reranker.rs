//! Heuristic re-ranking of vector search candidates

use crate::storage::SearchResult;

/// Largest boost from query words found in the text
pub const MAX_KEYWORD_BOOST: f32 = 0.2;
/// Boost for texts of a useful length
pub const LENGTH_BOOST: f32 = 0.1;
/// Penalty for very short or very long texts
pub const LENGTH_PENALTY: f32 = 0.05;
/// Boost per metadata key
pub const METADATA_BOOST_PER_KEY: f32 = 0.02;
pub const MAX_METADATA_BOOST: f32 = 0.1;

/// Re-score and re-order candidates for `query`.
///
/// Pure and deterministic: the adjusted score is the vector score plus a
/// keyword, a length and a metadata adjustment. Candidates with equal
/// adjusted scores keep their input order.
pub fn rerank_results(query: &str, results: &[SearchResult]) -> Vec<SearchResult> {
    let query_words: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();

    let mut reranked: Vec<SearchResult> = results
        .iter()
        .map(|result| SearchResult {
            score: adjusted_score(&query_words, result),
            ..result.clone()
        })
        .collect();

    reranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    reranked
}

fn adjusted_score(query_words: &[String], result: &SearchResult) -> f32 {
    let text = &result.document.text;
    result.score
        + keyword_boost(query_words, &text.to_lowercase())
        + length_adjustment(text.chars().count())
        + metadata_boost(result)
}

/// Fraction of query words present in the text, scaled to the max boost
fn keyword_boost(query_words: &[String], text: &str) -> f32 {
    if query_words.is_empty() {
        return 0.0;
    }
    let matches = query_words
        .iter()
        .filter(|word| text.contains(word.as_str()))
        .count();
    matches as f32 / query_words.len() as f32 * MAX_KEYWORD_BOOST
}

fn length_adjustment(chars: usize) -> f32 {
    match chars {
        100..=500 => LENGTH_BOOST,
        0..=49 => -LENGTH_PENALTY,
        1001.. => -LENGTH_PENALTY,
        _ => 0.0,
    }
}

fn metadata_boost(result: &SearchResult) -> f32 {
    result
        .document
        .metadata
        .as_ref()
        .map(|m| (m.len() as f32 * METADATA_BOOST_PER_KEY).min(MAX_METADATA_BOOST))
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DocumentMetadata, VectorDocument};
    use uuid::Uuid;

    fn result(text: &str, score: f32, faiss_id: u64) -> SearchResult {
        SearchResult {
            document: VectorDocument {
                id: format!("doc_{}", faiss_id),
                asset_id: Uuid::nil(),
                project_id: Uuid::nil(),
                chunk_index: 0,
                text: text.to_string(),
                embedding: vec![],
                metadata: None,
            },
            score,
            faiss_id,
        }
    }

    #[test]
    fn test_keyword_boost() {
        let words = vec!["email".to_string(), "launch".to_string()];
        assert_eq!(keyword_boost(&words, "email launch plan"), MAX_KEYWORD_BOOST);
        assert_eq!(keyword_boost(&words, "email only"), MAX_KEYWORD_BOOST / 2.0);
        assert_eq!(keyword_boost(&words, "nothing"), 0.0);
        assert_eq!(keyword_boost(&[], "anything"), 0.0);
    }

    #[test]
    fn test_length_adjustment() {
        assert_eq!(length_adjustment(10), -LENGTH_PENALTY);
        assert_eq!(length_adjustment(49), -LENGTH_PENALTY);
        assert_eq!(length_adjustment(50), 0.0);
        assert_eq!(length_adjustment(100), LENGTH_BOOST);
        assert_eq!(length_adjustment(500), LENGTH_BOOST);
        assert_eq!(length_adjustment(1000), 0.0);
        assert_eq!(length_adjustment(1001), -LENGTH_PENALTY);
    }

    #[test]
    fn test_metadata_boost_capped() {
        let mut r = result("text", 0.5, 1);
        assert_eq!(metadata_boost(&r), 0.0);

        r.document.metadata = Some(DocumentMetadata {
            filename: Some("a.txt".to_string()),
            chunk_index: Some(0),
            ..Default::default()
        });
        assert!((metadata_boost(&r) - 0.04).abs() < 1e-6);

        let mut many = DocumentMetadata::default();
        for i in 0..10 {
            many = many.with_extra(format!("k{}", i), i);
        }
        r.document.metadata = Some(many);
        assert_eq!(metadata_boost(&r), MAX_METADATA_BOOST);
    }

    #[test]
    fn test_keyword_match_outranks_small_score_gap() {
        let candidates = vec![
            result("Generic text about other things entirely here.", 0.60, 1),
            result("Our spring campaign targets new audiences.", 0.55, 2),
        ];
        let reranked = rerank_results("spring campaign", &candidates);
        assert_eq!(reranked[0].faiss_id, 2);
        assert!((reranked[0].score - (0.55 + 0.2 - 0.05)).abs() < 1e-6);
    }

    #[test]
    fn test_deterministic_and_stable() {
        let candidates = vec![
            result("same text", 0.5, 1),
            result("same text", 0.5, 2),
            result("same text", 0.5, 3),
        ];
        let first = rerank_results("query", &candidates);
        let second = rerank_results("query", &candidates);
        assert_eq!(first, second);
        let order: Vec<u64> = first.iter().map(|r| r.faiss_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_input_untouched() {
        let candidates = vec![result("alpha", 0.3, 1)];
        let _ = rerank_results("alpha", &candidates);
        assert_eq!(candidates[0].score, 0.3);
    }
}
