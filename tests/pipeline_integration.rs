//! End-to-end retrieval pipeline: ingest text, search, re-rank

use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use marketrag::chunking::{chunk_text, Chunker, TokenCounter};
use marketrag::config::{Config, RetrievalConfig};
use marketrag::embedding::{create_embedder, Embedder, HashEmbeddingProvider, ProviderKind};
use marketrag::ingestion::{AssetSource, Ingestor};
use marketrag::retrieval::{SearchQuery, SemanticSearcher};
use marketrag::storage::{VectorStore, VectorStoreConfig};

const TEXT: &str =
    "Marketing campaigns require planning. Social media boosts reach. Planning takes time.";

struct Pipeline {
    ingestor: Ingestor,
    searcher: SemanticSearcher,
    store: Arc<VectorStore>,
    _temp: TempDir,
}

fn pipeline() -> Pipeline {
    let temp = TempDir::new().unwrap();
    let embedder = Arc::new(Embedder::new(Arc::new(HashEmbeddingProvider::new(128)), 16));
    let store = Arc::new(
        VectorStore::open(VectorStoreConfig::new(temp.path().join("vectors.db"), 128))
            .expect("Failed to open store"),
    );
    let chunker = Chunker::with_counter(10, 2, TokenCounter::heuristic()).unwrap();

    Pipeline {
        ingestor: Ingestor::new(chunker, embedder.clone(), store.clone()),
        searcher: SemanticSearcher::new(embedder, store.clone(), RetrievalConfig::default()),
        store,
        _temp: temp,
    }
}

fn source(project_id: Uuid) -> AssetSource {
    AssetSource {
        asset_id: Uuid::new_v4(),
        project_id,
        filename: Some("campaign-brief.txt".to_string()),
        content_type: Some("text/plain".to_string()),
    }
}

#[test]
fn test_sentence_chunking_with_overlap() {
    let chunks = chunk_text(TEXT, 10, 2, TokenCounter::heuristic()).unwrap();

    assert_eq!(chunks.len(), 3);
    for (i, chunk) in chunks.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i);
        assert_eq!(&TEXT[chunk.start_char..chunk.end_char], chunk.text);
        assert!(chunk.token_count > 0);
    }
    assert!(chunks[0].text.starts_with("Marketing campaigns"));
    assert!(chunks[2].text.ends_with("Planning takes time."));
}

#[tokio::test]
async fn test_ingest_and_search() {
    let p = pipeline();
    let project = Uuid::new_v4();
    let asset = source(project);

    let report = p.ingestor.ingest_text(&asset, TEXT).unwrap();
    assert!(report.chunk_count >= 2);
    println!("✓ Ingested {} chunks", report.chunk_count);

    let query = SearchQuery::new("campaign planning", 2).with_project(project);
    assert!(query.rerank);
    let results = p.searcher.search(&query).await.unwrap();

    assert_eq!(results.len(), 2);
    assert!(results[0].document.text.contains("planning"));
    assert_eq!(results[0].document.chunk_index, 0);
    assert_eq!(results[0].document.asset_id, asset.asset_id);
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }

    let planning = results
        .iter()
        .position(|r| r.document.text.starts_with("Marketing campaigns require planning"))
        .unwrap();
    if let Some(social) = results
        .iter()
        .position(|r| r.document.text.contains("Social media"))
    {
        assert!(planning < social, "planning chunk ranked below the social media chunk");
    }

    let metadata = results[0].document.metadata.as_ref().unwrap();
    assert_eq!(metadata.filename.as_deref(), Some("campaign-brief.txt"));
    assert_eq!(metadata.chunk_index, Some(0));
}

#[tokio::test]
async fn test_projects_are_isolated() {
    let p = pipeline();
    let (project_a, project_b) = (Uuid::new_v4(), Uuid::new_v4());

    p.ingestor.ingest_text(&source(project_a), TEXT).unwrap();
    p.ingestor
        .ingest_text(&source(project_b), "Pricing pages convert visitors.")
        .unwrap();

    let records = p
        .searcher
        .search_with_context(&SearchQuery::new("campaign planning", 5).with_project(project_b), true)
        .await
        .unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].project_id, project_b);
    assert!(records[0].metadata.is_some());

    assert_eq!(p.store.get_document_count(Some(project_a)).unwrap(), 3);
    assert_eq!(p.store.get_document_count(None).unwrap(), 4);
}

#[tokio::test]
async fn test_reingest_and_delete() {
    let p = pipeline();
    let project = Uuid::new_v4();
    let asset = source(project);

    p.ingestor.ingest_text(&asset, TEXT).unwrap();
    p.ingestor
        .ingest_text(&asset, "Email newsletters keep customers engaged.")
        .unwrap();
    assert_eq!(p.store.get_document_count(Some(project)).unwrap(), 1);

    let results = p
        .searcher
        .search(&SearchQuery::new("newsletters", 5).with_asset(asset.asset_id))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].document.text.contains("newsletters"));

    assert_eq!(p.store.delete_by_asset(asset.asset_id).unwrap(), 1);
    let results = p
        .searcher
        .search(&SearchQuery::new("newsletters", 5))
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_pipeline_from_config() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.storage.data_dir = temp.path().to_path_buf();
    config.embedding.provider = ProviderKind::Hash;
    config.embedding.dimension = 64;
    config.chunking.chunk_size = 10;
    config.chunking.chunk_overlap = 2;

    let chunker = Chunker::new(&config.chunking_config()).unwrap();
    let embedder = Arc::new(create_embedder(&config.embedding_config()).unwrap());
    let store = Arc::new(VectorStore::open(config.vector_store_config()).unwrap());
    assert!(config.database_path().exists());

    let ingestor = Ingestor::new(chunker, embedder.clone(), store.clone());
    let searcher = SemanticSearcher::new(embedder, store, config.retrieval.clone());

    let project = Uuid::new_v4();
    ingestor.ingest_text(&source(project), TEXT).unwrap();

    let query = searcher.query("social media reach").with_project(project);
    assert_eq!(query.limit, config.retrieval.top_k);
    let results = searcher.search(&query).await.unwrap();
    assert_eq!(results[0].document.chunk_index, 1);
}

#[tokio::test]
#[ignore] // Requires model download
async fn test_fastembed_pipeline() {
    let temp = TempDir::new().unwrap();
    let config = Config::default();
    let embedder = Arc::new(create_embedder(&config.embedding_config()).unwrap());
    let store = Arc::new(
        VectorStore::open(VectorStoreConfig::new(
            temp.path().join("vectors.db"),
            embedder.get_embedding_dimension(),
        ))
        .unwrap(),
    );
    let chunker = Chunker::new(&config.chunking_config()).unwrap();
    let ingestor = Ingestor::new(chunker, embedder.clone(), store.clone());
    let searcher = SemanticSearcher::new(embedder, store, RetrievalConfig::default());

    let project = Uuid::new_v4();
    ingestor.ingest_text(&source(project), TEXT).unwrap();
    let results = searcher
        .search(&SearchQuery::new("how long does planning take", 1))
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    println!("✓ Top result: {}", results[0].document.text);
}
