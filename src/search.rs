//! Keyword retrieval over a collection's FTS5 table.
//!
//! User questions are free text ("What color is the sky?"), which is not a
//! valid FTS5 expression on its own. [`build_match_query`] reduces the text to
//! alphanumeric terms, quotes each one, and joins them with `OR` so any
//! shared term produces a candidate. BM25 then orders candidates, and scores
//! are min-max normalized into `[0, 1]` before truncation to `top_k`.

use anyhow::Result;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::index::IndexHandle;
use crate::models::RetrievedChunk;

/// Turn free text into an FTS5 `MATCH` expression, or `None` if the text
/// contains no searchable terms.
pub fn build_match_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    for term in query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
    {
        if !terms.contains(&term) {
            terms.push(term);
        }
    }

    if terms.is_empty() {
        return None;
    }

    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

// ============ Candidate types ============

#[derive(Debug, Clone)]
struct ChunkCandidate {
    chunk_id: String,
    document_id: String,
    title: Option<String>,
    raw_score: f64,
    text: String,
}

/// Retrieve the `top_k` best chunks for `query`.
pub async fn retrieve(
    pool: &SqlitePool,
    query: &str,
    top_k: usize,
    candidate_k: i64,
) -> Result<Vec<RetrievedChunk>> {
    let match_expr = match build_match_query(query) {
        Some(expr) => expr,
        None => return Ok(Vec::new()),
    };

    let candidates = fetch_keyword_candidates(pool, &match_expr, candidate_k).await?;
    let mut results: Vec<RetrievedChunk> = normalize_scores(&candidates)
        .into_iter()
        .map(|(c, score)| RetrievedChunk {
            chunk_id: c.chunk_id.clone(),
            document_id: c.document_id.clone(),
            title: c.title.clone(),
            text: c.text.clone(),
            score,
        })
        .collect();

    // Sort: score desc, chunk_id asc (deterministic)
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    results.truncate(top_k);

    Ok(results)
}

async fn fetch_keyword_candidates(
    pool: &SqlitePool,
    match_expr: &str,
    candidate_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let rows = sqlx::query(
        r#"
        SELECT chunks_fts.chunk_id AS chunk_id,
               chunks_fts.document_id AS document_id,
               chunks_fts.text AS text,
               chunks_fts.rank AS rank,
               documents.title AS title
        FROM chunks_fts
        JOIN documents ON documents.id = chunks_fts.document_id
        WHERE chunks_fts MATCH ?
        ORDER BY chunks_fts.rank
        LIMIT ?
        "#,
    )
    .bind(match_expr)
    .bind(candidate_k)
    .fetch_all(pool)
    .await?;

    let candidates = rows
        .iter()
        .map(|row| {
            let rank: f64 = row.get("rank");
            ChunkCandidate {
                chunk_id: row.get("chunk_id"),
                document_id: row.get("document_id"),
                title: row.get("title"),
                raw_score: -rank, // negate so higher = better
                text: row.get("text"),
            }
        })
        .collect();

    Ok(candidates)
}

// ============ Score normalization ============

/// Min-max normalize scores to [0, 1]. A single candidate, or candidates
/// with identical scores, all normalize to 1.0.
fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let s_min = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::INFINITY, f64::min);
    let s_max = candidates
        .iter()
        .map(|c| c.raw_score)
        .fold(f64::NEG_INFINITY, f64::max);

    candidates
        .iter()
        .map(|c| {
            let norm = if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - s_min) / (s_max - s_min)
            };
            (c, norm)
        })
        .collect()
}

/// CLI entry point for `ichat search`.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    let index = IndexHandle::load_from_disk(&config.index.dir, &config.index.collection).await?;
    let top_k = limit.unwrap_or(config.retrieval.top_k);
    let candidate_k = config.retrieval.candidate_k.max(top_k as i64);

    let results = index.retrieve(query, top_k, candidate_k).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        let title = result.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.2}] {}", i + 1, result.score, title);
        println!("    excerpt: \"{}\"", excerpt(&result.text, 240));
        println!("    chunk: {}", result.chunk_id);
        println!();
    }

    Ok(())
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_candidate(chunk_id: &str, score: f64) -> ChunkCandidate {
        ChunkCandidate {
            chunk_id: chunk_id.to_string(),
            document_id: "d1".to_string(),
            title: None,
            raw_score: score,
            text: String::new(),
        }
    }

    #[test]
    fn test_match_query_from_question() {
        assert_eq!(
            build_match_query("What color is the sky?").as_deref(),
            Some(r#""what" OR "color" OR "is" OR "the" OR "sky""#)
        );
    }

    #[test]
    fn test_match_query_strips_fts_syntax() {
        let q = build_match_query(r#"sky" NEAR(blue*) -- ^col:"#).unwrap();
        assert_eq!(q, r#""sky" OR "near" OR "blue" OR "col""#);
    }

    #[test]
    fn test_match_query_dedupes_case_insensitively() {
        assert_eq!(build_match_query("Sky sky SKY").as_deref(), Some(r#""sky""#));
    }

    #[test]
    fn test_match_query_empty() {
        assert!(build_match_query("").is_none());
        assert!(build_match_query("?!  ...").is_none());
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_single() {
        let candidates = vec![make_candidate("c1", 5.0)];
        let result = normalize_scores(&candidates);
        assert_eq!(result.len(), 1);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_range() {
        let candidates = vec![
            make_candidate("c1", 10.0),
            make_candidate("c2", 5.0),
            make_candidate("c3", 0.0),
        ];
        let result = normalize_scores(&candidates);
        assert!((result[0].1 - 1.0).abs() < 1e-9);
        assert!((result[1].1 - 0.5).abs() < 1e-9);
        assert!((result[2].1 - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_scores_always_in_unit() {
        let candidates = vec![
            make_candidate("c1", -5.0),
            make_candidate("c2", 100.0),
            make_candidate("c3", 42.0),
        ];
        for (_, score) in normalize_scores(&candidates) {
            assert!((0.0..=1.0).contains(&score), "Score out of range: {}", score);
        }
    }

    #[test]
    fn test_excerpt_truncates_on_chars() {
        assert_eq!(excerpt("a\nb", 10), "a b");
        assert_eq!(excerpt("ééééé", 3), "ééé...");
    }
}
