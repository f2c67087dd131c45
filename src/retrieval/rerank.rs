//! Cross-candidate reranking pass
//!
//! Reorders the fused candidate set by blending the fused store score with
//! lexical relevance against the original query. The original system
//! delegated this to a hosted reranker model; the core performs the pass
//! locally with keyword-overlap scoring so reranking works without an
//! extra dependency in the hot path.

use crate::retrieval::RetrievalCandidate;
use std::collections::HashSet;

/// Weight of the lexical signal relative to the fused store score
const LEXICAL_BLEND: f32 = 0.5;

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(|t| t.to_string())
        .collect()
}

/// Lexical relevance of `content` to `query` in [0, 1]
///
/// Fraction of query terms present in the content. Coarse, but stable and
/// cheap; candidates the stores scored equally get separated by how much
/// of the query they actually mention.
pub fn lexical_relevance(query: &str, content: &str) -> f32 {
    let query_terms = tokenize(query);
    if query_terms.is_empty() {
        return 0.0;
    }
    let content_terms = tokenize(content);
    let matched = query_terms
        .iter()
        .filter(|t| content_terms.contains(*t))
        .count();
    matched as f32 / query_terms.len() as f32
}

/// Rerank candidates in place against the query, highest first
///
/// Ties break on entity ID so the ordering is deterministic regardless of
/// which store's results arrived first.
pub fn rerank(query: &str, candidates: &mut [RetrievalCandidate]) {
    for candidate in candidates.iter_mut() {
        let lexical = lexical_relevance(query, &candidate.content);
        candidate.score = ((1.0 - LEXICAL_BLEND) * candidate.score + LEXICAL_BLEND * lexical)
            .clamp(0.0, 1.0);
    }

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
}
