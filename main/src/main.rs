use std::{path::Path, sync::Arc};

use async_openai::{config::OpenAIConfig, Client};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::{
    storage::remote::RemoteStore,
    utils::{
        config::{get_config, AppConfig},
        embedding::EmbeddingProvider,
    },
};
use ingestion_pipeline::{extract_pdf_text, split_text};
use retrieval_pipeline::{ChatMemory, PipelineCache};
use vector_index::IndexPersistence;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = match get_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            eprintln!("Set OPENAI_API_KEY in the environment or a `config` file and retry.");
            std::process::exit(1);
        }
    };

    let openai_client = Arc::new(Client::with_config(
        OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider =
        EmbeddingProvider::from_config(&config, Some(openai_client.clone())).await?;
    info!(
        embedding_backend = embedding_provider.backend_label(),
        embedding_dimension = embedding_provider.dimension(),
        "Embedding provider initialized"
    );

    // Remote-store credentials resolve here, once; nothing later in the
    // session triggers an authentication flow.
    let remote = RemoteStore::new(&config).await?;
    let persistence = IndexPersistence::new(
        remote,
        embedding_provider.clone(),
        &config.index_dir,
        &config.archive_name,
    );

    run_shell(&config, &openai_client, &embedding_provider, &persistence).await?;

    Ok(())
}

enum Command {
    Upload(String),
    Ask(String),
    Status,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }

    let (keyword, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim()),
        None => (trimmed, ""),
    };

    match keyword.to_ascii_lowercase().as_str() {
        "upload" if !rest.is_empty() => Command::Upload(rest.to_string()),
        "ask" if !rest.is_empty() => Command::Ask(rest.to_string()),
        "status" => Command::Status,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(trimmed.to_string()),
    }
}

const HELP_TEXT: &str = "Commands:
  upload <pdf-path>   extract, chunk, and index a PDF document
  ask <question>      answer a question from the indexed documents
  status              show remote snapshot and session pipeline state
  help                show this help
  quit                exit";

/// One action per prompt; each runs to completion before the next line is
/// read. Failures print one line and the loop continues.
async fn run_shell(
    config: &AppConfig,
    openai_client: &Client<OpenAIConfig>,
    embedder: &EmbeddingProvider,
    persistence: &IndexPersistence,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cache = PipelineCache::new();
    let mut memory = ChatMemory::new();

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"Document QA assistant. Type `help` for commands.\n")
        .await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Help => println!("{HELP_TEXT}"),
            Command::Quit => break,
            Command::Unknown(input) => {
                println!("Unrecognized command: {input}. Type `help` for commands.");
            }
            Command::Status => {
                match persistence.snapshot_exists().await {
                    Ok(true) => println!("Remote snapshot: present"),
                    Ok(false) => println!("Remote snapshot: none"),
                    Err(e) => println!("{e}"),
                }
                match cache.current() {
                    Some(pipeline) => println!(
                        "Session pipeline: revision {} with {} chunks",
                        pipeline.revision(),
                        pipeline.chunk_count()
                    ),
                    None => println!("Session pipeline: not loaded"),
                }
            }
            Command::Upload(path) => {
                handle_upload(config, persistence, &mut cache, Path::new(&path)).await;
            }
            Command::Ask(question) => {
                handle_ask(
                    config,
                    openai_client,
                    embedder,
                    persistence,
                    &mut cache,
                    &mut memory,
                    &question,
                )
                .await;
            }
        }
    }

    Ok(())
}

async fn handle_upload(
    config: &AppConfig,
    persistence: &IndexPersistence,
    cache: &mut PipelineCache,
    path: &Path,
) {
    let text = match extract_pdf_text(path).await {
        Ok(text) => text,
        Err(e) => {
            println!("{e}");
            return;
        }
    };

    let chunks = match split_text(&text, config.chunk_max_chars, config.chunk_overlap_chars) {
        Ok(chunks) => chunks,
        Err(e) => {
            println!("{e}");
            return;
        }
    };

    if chunks.is_empty() {
        println!("Document contains no indexable text.");
        return;
    }

    match persistence.update_from_chunks(&chunks).await {
        Ok(report) => {
            println!(
                "Index {}: {} chunks added, {} total.",
                report.outcome,
                report.added_chunks,
                report.index.len()
            );
            // The returned index is current; rebuild the pipeline from it
            // instead of re-downloading the snapshot.
            cache.get_or_build(report.index, config.retrieval_top_k);
        }
        Err(e) => println!("{e}"),
    }
}

async fn handle_ask(
    config: &AppConfig,
    openai_client: &Client<OpenAIConfig>,
    embedder: &EmbeddingProvider,
    persistence: &IndexPersistence,
    cache: &mut PipelineCache,
    memory: &mut ChatMemory,
    question: &str,
) {
    if cache.current().is_none() {
        match persistence.load_for_query().await {
            Ok(Some(index)) => {
                cache.get_or_build(index, config.retrieval_top_k);
            }
            Ok(None) => {
                println!("No document index yet. Upload a PDF first.");
                return;
            }
            Err(e) => {
                println!("{e}");
                return;
            }
        }
    }

    let Some(pipeline) = cache.current() else {
        return;
    };

    match pipeline
        .ask(memory, openai_client, embedder, &config.query_model, question)
        .await
    {
        Ok(answer) => println!("{answer}"),
        Err(e) => println!("{e}"),
    }
}
