use std::path::{Path, PathBuf};
use std::sync::Arc;

use marketrag::chunking::Chunker;
use marketrag::cli::{Cli, Commands, ConfigAction};
use marketrag::config::{Config, ConfigValidator};
use marketrag::embedding::create_embedder;
use marketrag::error::{MarketragError, Result};
use marketrag::ingestion::{AssetSource, Ingestor};
use marketrag::retrieval::{ContextRecord, SearchQuery, SemanticSearcher};
use marketrag::storage::VectorStore;
use uuid::Uuid;

fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    match cli.command {
        Commands::Ingest {
            file,
            project,
            asset,
            content_type,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            cmd_ingest(&config, &file, project, asset, content_type)?;
        }
        Commands::Search {
            query,
            project,
            asset,
            top_k,
            no_rerank,
            json,
        } => {
            let config = load_config(cli.config, cli.profile)?;
            let mut search = SearchQuery::new(query, top_k.unwrap_or(config.retrieval.top_k))
                .with_rerank(config.retrieval.rerank && !no_rerank);
            search.project_id = project;
            search.asset_id = asset;
            cmd_search(&config, &search, json)?;
        }
        Commands::Count { project } => {
            let config = load_config(cli.config, cli.profile)?;
            let store = open_store(&config)?;
            println!("{}", store.get_document_count(project)?);
        }
        Commands::Delete { asset, project } => {
            let config = load_config(cli.config, cli.profile)?;
            let store = open_store(&config)?;
            let removed = match (asset, project) {
                (Some(asset_id), _) => store.delete_by_asset(asset_id)?,
                (None, Some(project_id)) => store.delete_by_project(project_id)?,
                (None, None) => 0,
            };
            println!("✓ Removed {} chunks", removed);
        }
        Commands::Clear { yes } => {
            if !yes {
                println!("Refusing to clear the store without --yes");
                return Ok(());
            }
            let config = load_config(cli.config, cli.profile)?;
            open_store(&config)?.clear()?;
            println!("✓ Vector store cleared");
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "marketrag=debug"
    } else {
        "marketrag=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config) -> Result<Arc<VectorStore>> {
    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| MarketragError::Io {
            source: e,
            context: format!("Failed to create data directory: {:?}", parent),
        })?;
    }
    Ok(Arc::new(VectorStore::open(config.vector_store_config())?))
}

fn cmd_ingest(
    config: &Config,
    file: &Path,
    project_id: Uuid,
    asset_id: Option<Uuid>,
    content_type: Option<String>,
) -> Result<()> {
    let text = std::fs::read_to_string(file).map_err(|e| MarketragError::Io {
        source: e,
        context: format!("Failed to read asset file: {:?}", file),
    })?;

    let chunker = Chunker::new(&config.chunking_config())?;
    let embedder = Arc::new(create_embedder(&config.embedding_config())?);
    let store = open_store(config)?;
    let ingestor = Ingestor::new(chunker, embedder, store);

    let source = AssetSource {
        asset_id: asset_id.unwrap_or_else(Uuid::new_v4),
        project_id,
        filename: file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned()),
        content_type,
    };
    let report = ingestor.ingest_text(&source, &text)?;

    println!("✓ Ingested {}", file.display());
    println!("  Asset: {}", source.asset_id);
    println!("  Chunks: {}", report.chunk_count);
    println!("  Tokens: {}", report.total_tokens);
    Ok(())
}

fn cmd_search(config: &Config, query: &SearchQuery, json: bool) -> Result<()> {
    let embedder = Arc::new(create_embedder(&config.embedding_config())?);
    let store = open_store(config)?;
    let searcher = SemanticSearcher::new(embedder, store, config.retrieval.clone());

    let runtime = tokio::runtime::Runtime::new().map_err(|e| MarketragError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })?;
    let results = runtime.block_on(searcher.search(query))?;
    let records: Vec<ContextRecord> = results
        .into_iter()
        .map(|r| ContextRecord::from_result(r, json))
        .collect();

    if json {
        let out = serde_json::to_string_pretty(&records).map_err(|e| MarketragError::Json {
            source: e,
            context: "Failed to serialize search results".to_string(),
        })?;
        println!("{}", out);
        return Ok(());
    }

    if records.is_empty() {
        println!("No results");
        return Ok(());
    }

    for (rank, record) in records.iter().enumerate() {
        println!(
            "{}. [{:.3}] asset {} chunk {}",
            rank + 1,
            record.score,
            record.asset_id,
            record.chunk_index
        );
        println!("   {}", record.preview(200).replace('\n', " "));
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(config_path, profile)?;
            let json = serde_json::to_string_pretty(&config).map_err(|e| MarketragError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;
            println!("{}", json);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = match profile {
                Some(profile) => Config::load_with_profile(&path, &profile)?,
                None => Config::load(&path)?,
            };
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            let mut config = Config::default();
            config.storage.data_dir = Config::default_data_dir()?;
            ConfigValidator::validate(&config)?;
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'marketrag config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        ConfigValidator::validate(&config)?;
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}
