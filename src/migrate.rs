//! Database schema migrations for the vector store.
//!
//! Creates all required SQLite tables (sources, crawled_pages,
//! document_chunks, chunks_fts, code_examples) and is safe to run
//! repeatedly. The graph store's schema is separate and lives in
//! `graph_store.rs`, applied against Neo4j instead of SQLite.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            source_id TEXT PRIMARY KEY,
            summary TEXT,
            total_word_count INTEGER NOT NULL DEFAULT 0,
            first_crawled_at INTEGER NOT NULL,
            last_crawled_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawled_pages (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            url TEXT NOT NULL UNIQUE,
            title TEXT,
            crawled_at INTEGER NOT NULL,
            FOREIGN KEY (source_id) REFERENCES sources(source_id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            url TEXT NOT NULL,
            source_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB,
            UNIQUE(document_id, chunk_index),
            FOREIGN KEY (document_id) REFERENCES crawled_pages(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS code_examples (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            url TEXT NOT NULL,
            source_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            language TEXT,
            code TEXT NOT NULL,
            summary TEXT NOT NULL,
            embedding BLOB,
            UNIQUE(url, chunk_index),
            FOREIGN KEY (document_id) REFERENCES crawled_pages(id)
        )
        "#,
    )
    .execute(&pool)
    .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                document_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    let code_fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='code_examples_fts'",
    )
    .fetch_one(&pool)
    .await?;

    if !code_fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE code_examples_fts USING fts5(
                code_id UNINDEXED,
                document_id UNINDEXED,
                code,
                summary
            )
            "#,
        )
        .execute(&pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_crawled_pages_source_id ON crawled_pages(source_id)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_document_id ON document_chunks(document_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_source_id ON document_chunks(source_id)",
    )
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_code_examples_document_id ON code_examples(document_id)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
