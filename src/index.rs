//! Retrieval index manager.
//!
//! Owns one named collection in a persistent vector store and exposes the
//! operations the assistant needs:
//!
//! | Operation | Effect |
//! |-----------|--------|
//! | [`open`](RetrievalIndex::open) | attach (creating if needed), return record count |
//! | [`ingest_from_filesystem`](RetrievalIndex::ingest_from_filesystem) | load a folder + glob |
//! | [`ingest_from_web`](RetrievalIndex::ingest_from_web) | crawl a site |
//! | [`query`](RetrievalIndex::query) | answer a question from the top passages |
//! | [`reset`](RetrievalIndex::reset) | drop the collection |
//!
//! The collection remembers the embedding model it was built with; ingesting
//! into or querying it with a different model is refused.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::config::{Config, WebConfig};
use crate::connector_fs::{load_documents, scan_folder};
use crate::connector_web::{normalize_url, WebCrawler};
use crate::db;
use crate::embedding::{embed_query, EmbeddingProvider};
use crate::error::IndexError;
use crate::gateway::RetryPolicy;
use crate::ingest::{count_records, delete_collection, store_documents};
use crate::migrate::run_migrations;
use crate::models::{ChatRequest, Message, RagAnswer};
use crate::search::{compose_prompt, split_answer, top_passages};
use crate::traits::ChatBackend;

pub struct RetrievalIndex {
    dir: PathBuf,
    collection: String,
    top_k: usize,
    chunk_tokens: usize,
    loader_concurrency: usize,
    web: WebConfig,
    policy: RetryPolicy,
    answer_model: String,
    embedder: Arc<dyn EmbeddingProvider>,
    chat: Arc<dyn ChatBackend>,
    pool: Option<SqlitePool>,
    pinned_model: Option<String>,
}

impl RetrievalIndex {
    pub fn new(config: &Config, embedder: Arc<dyn EmbeddingProvider>, chat: Arc<dyn ChatBackend>) -> Self {
        Self {
            dir: config.index.path.clone(),
            collection: config.index.collection.clone(),
            top_k: config.index.top_k.max(1),
            chunk_tokens: config.index.chunk_tokens,
            loader_concurrency: config.index.loader_concurrency,
            web: config.web.clone(),
            policy: RetryPolicy::from_config(&config.retry),
            answer_model: config.chat.model.clone(),
            embedder,
            chat,
            pool: None,
            pinned_model: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.pool.is_some()
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Chat model used to compose answers in [`RetrievalIndex::query`].
    pub fn answer_model(&self) -> &str {
        &self.answer_model
    }

    pub fn set_answer_model(&mut self, model: &str) {
        self.answer_model = model.to_string();
    }

    /// Attach the store, creating it on first use. Returns the number of
    /// records in the collection. Calling it again is cheap.
    pub async fn open(&mut self) -> Result<u64, IndexError> {
        if self.pool.is_none() {
            let pool = db::connect(&self.dir).await?;
            run_migrations(&pool).await?;
            self.pool = Some(pool);
        }
        let pool = self.pool()?;

        sqlx::query(
            "INSERT OR IGNORE INTO collections (name, embedding_model, created_at) VALUES (?, ?, ?)",
        )
        .bind(&self.collection)
        .bind(self.embedder.model_name())
        .bind(chrono::Utc::now().timestamp())
        .execute(pool)
        .await?;

        let pinned: String =
            sqlx::query_scalar("SELECT embedding_model FROM collections WHERE name = ?")
                .bind(&self.collection)
                .fetch_one(pool)
                .await?;
        let count = count_records(pool, &self.collection).await?;
        self.pinned_model = Some(pinned);

        debug!(collection = %self.collection, count, "index opened");
        Ok(count)
    }

    /// Records currently in the collection.
    pub async fn count(&self) -> Result<u64, IndexError> {
        count_records(self.pool()?, &self.collection).await
    }

    fn pool(&self) -> Result<&SqlitePool, IndexError> {
        self.pool.as_ref().ok_or(IndexError::NotOpened)
    }

    fn ensure_model(&self) -> Result<(), IndexError> {
        match &self.pinned_model {
            Some(stored) if stored != self.embedder.model_name() => Err(IndexError::EmbeddingMismatch {
                collection: self.collection.clone(),
                stored: stored.clone(),
                configured: self.embedder.model_name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Ingest files under `folder` matching `pattern` (empty for all files).
    /// Returns the number of new records.
    pub async fn ingest_from_filesystem(&mut self, folder: &Path, pattern: &str) -> Result<u64, IndexError> {
        let paths = scan_folder(folder, pattern)?;
        self.open().await?;
        self.ensure_model()?;

        let documents = load_documents(paths, self.loader_concurrency).await;
        let added = store_documents(
            self.pool()?,
            &self.collection,
            self.embedder.as_ref(),
            &documents,
            self.chunk_tokens,
        )
        .await?;

        if added == 0 {
            return Err(IndexError::NothingNew(folder.display().to_string()));
        }
        info!(folder = %folder.display(), files = documents.len(), added, "folder ingested");
        Ok(added)
    }

    /// Crawl `url` and ingest the pages found. `max_depth` overrides the
    /// configured depth. Returns the number of new records.
    pub async fn ingest_from_web(&mut self, url: &str, max_depth: Option<usize>) -> Result<u64, IndexError> {
        let root = normalize_url(url)?;
        let crawler = WebCrawler::new(&self.web, self.policy.clone())?;
        crawler.probe(&root).await?;

        self.open().await?;
        self.ensure_model()?;

        let depth = max_depth.unwrap_or(self.web.max_depth);
        let documents = crawler.crawl(&root, depth).await?;
        let added = store_documents(
            self.pool()?,
            &self.collection,
            self.embedder.as_ref(),
            &documents,
            self.chunk_tokens,
        )
        .await?;

        if added == 0 {
            return Err(IndexError::NothingNew(root.to_string()));
        }
        info!(url = %root, pages = documents.len(), added, "site ingested");
        Ok(added)
    }

    /// Answer `question` from the most similar passages.
    ///
    /// Fails with [`IndexError::NotOpened`] before any network call when the
    /// store is not attached or holds nothing.
    pub async fn query(&self, question: &str) -> Result<RagAnswer, IndexError> {
        let pool = self.pool()?;
        self.ensure_model()?;
        if count_records(pool, &self.collection).await? == 0 {
            return Err(IndexError::NotOpened);
        }

        let query_vec = embed_query(self.embedder.as_ref(), question).await?;
        let passages = top_passages(pool, &self.collection, &query_vec, self.top_k).await?;

        let request = ChatRequest {
            model: self.answer_model.clone(),
            messages: vec![Message::user(compose_prompt(question, &passages))],
            temperature: 0.0,
            functions: Vec::new(),
            function_call: None,
        };
        let reply = self.chat.chat(&request).await?;
        let (answer, sources) = split_answer(reply.message.content_str());

        debug!(passages = passages.len(), tokens = reply.tokens_used, "query answered");
        Ok(RagAnswer {
            answer,
            sources,
            tokens_used: reply.tokens_used,
        })
    }

    /// Remove every record of the collection. Returns how many were removed.
    pub async fn reset(&mut self) -> Result<u64, IndexError> {
        self.open().await?;
        let removed = delete_collection(self.pool()?, &self.collection).await?;
        self.pinned_model = None;
        info!(collection = %self.collection, removed, "collection reset");
        Ok(removed)
    }
}
