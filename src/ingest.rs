//! Write path of the retrieval index.
//!
//! ```text
//! SourceDocument ─▶ split_document ─▶ drop known hashes ─▶ embed ─▶ one transaction
//! ```
//!
//! Passages the collection already holds are filtered out before the
//! embedding call, so re-ingesting unchanged sources costs nothing and adds
//! no records. Vectors for all new passages are computed before anything is
//! written; a failed embedding call leaves the collection untouched.

use std::collections::HashSet;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::chunk::split_document;
use crate::embedding::{vec_to_blob, EmbeddingProvider};
use crate::error::{GatewayError, IndexError};
use crate::models::{Passage, SourceDocument};

/// Number of records stored in `collection`.
pub async fn count_records(pool: &SqlitePool, collection: &str) -> Result<u64, IndexError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
        .bind(collection)
        .fetch_one(pool)
        .await?;
    Ok(count.max(0) as u64)
}

async fn known_hashes(pool: &SqlitePool, collection: &str) -> Result<HashSet<String>, IndexError> {
    let hashes: Vec<String> = sqlx::query_scalar("SELECT hash FROM records WHERE collection = ?")
        .bind(collection)
        .fetch_all(pool)
        .await?;
    Ok(hashes.into_iter().collect())
}

/// Split, embed, and store `documents`. Returns the number of new records.
pub async fn store_documents(
    pool: &SqlitePool,
    collection: &str,
    embedder: &dyn EmbeddingProvider,
    documents: &[SourceDocument],
    chunk_tokens: usize,
) -> Result<u64, IndexError> {
    let mut seen = known_hashes(pool, collection).await?;
    let fresh: Vec<Passage> = documents
        .iter()
        .flat_map(|doc| split_document(doc, chunk_tokens))
        .filter(|p| seen.insert(p.hash.clone()))
        .collect();

    if fresh.is_empty() {
        debug!(collection, "no new passages");
        return Ok(0);
    }

    let texts: Vec<String> = fresh.iter().map(|p| p.text.clone()).collect();
    let vectors = embedder.embed(&texts).await?;
    if vectors.len() != fresh.len() {
        return Err(GatewayError::InvalidResponse(format!(
            "Invalid response: expected {} embeddings, got {}",
            fresh.len(),
            vectors.len()
        ))
        .into());
    }

    let now = Utc::now().timestamp();
    let mut inserted = 0u64;
    let mut tx = pool.begin().await?;
    for (passage, vector) in fresh.iter().zip(vectors) {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO records
                (id, collection, source, chunk_index, text, metadata_json, embedding, hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(collection)
        .bind(&passage.source)
        .bind(passage.chunk_index)
        .bind(&passage.text)
        .bind(&passage.metadata_json)
        .bind(vec_to_blob(&vector))
        .bind(&passage.hash)
        .bind(now)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }
    tx.commit().await?;

    debug!(collection, inserted, model = embedder.model_name(), "stored passages");
    Ok(inserted)
}

/// Delete every record of `collection` and its model pin. Returns the
/// number of records removed.
pub async fn delete_collection(pool: &SqlitePool, collection: &str) -> Result<u64, IndexError> {
    let mut tx = pool.begin().await?;
    let removed = sqlx::query("DELETE FROM records WHERE collection = ?")
        .bind(collection)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    sqlx::query("DELETE FROM collections WHERE name = ?")
        .bind(collection)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(removed)
}
