//! Read path of the retrieval index: similarity ranking and answer
//! composition.
//!
//! Vectors are compared in Rust with cosine similarity; the best passages are
//! handed to the model in a single prompt asking for an answer followed by a
//! `SOURCES:` line.

use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, cosine_similarity};
use crate::error::IndexError;
use crate::models::ScoredPassage;

/// The `k` passages of `collection` most similar to `query`, best first.
pub async fn top_passages(
    pool: &SqlitePool,
    collection: &str,
    query: &[f32],
    k: usize,
) -> Result<Vec<ScoredPassage>, IndexError> {
    let rows = sqlx::query("SELECT id, source, text, embedding FROM records WHERE collection = ?")
        .bind(collection)
        .fetch_all(pool)
        .await?;

    let mut scored: Vec<ScoredPassage> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            ScoredPassage {
                id: row.get("id"),
                source: row.get("source"),
                text: row.get("text"),
                score: cosine_similarity(query, &blob_to_vec(&blob)),
            }
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    scored.truncate(k);
    Ok(scored)
}

/// Prompt asking for an answer grounded in `passages` with cited sources.
pub fn compose_prompt(question: &str, passages: &[ScoredPassage]) -> String {
    let summaries = passages
        .iter()
        .map(|p| format!("Content: {}\nSource: {}", p.text, p.source))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Given the following extracted parts of a long document and a question, create a final answer with references (\"SOURCES\").\n\
         If you don't know the answer, just say that you don't know. Don't try to make up an answer.\n\
         ALWAYS return a \"SOURCES\" part in your answer.\n\n\
         QUESTION: {question}\n\
         =========\n\
         {summaries}\n\
         =========\n\
         FINAL ANSWER:"
    )
}

/// Split a model reply into the answer and its `SOURCES:` part.
///
/// The marker is matched case-insensitively, singular or plural; the last
/// occurrence wins. Without a marker the whole reply is the answer.
pub fn split_answer(reply: &str) -> (String, String) {
    let upper = reply.to_ascii_uppercase();
    let marker = ["SOURCES:", "SOURCE:"]
        .iter()
        .filter_map(|m| upper.rfind(m).map(|at| (at, m.len())))
        .max_by_key(|(at, _)| *at);

    let (answer, sources) = match marker {
        Some((at, len)) => (&reply[..at], reply[at + len..].trim()),
        None => (reply, ""),
    };
    let answer = answer.trim();
    let answer = answer.strip_prefix("FINAL ANSWER:").unwrap_or(answer).trim();
    (answer.to_string(), sources.to_string())
}
