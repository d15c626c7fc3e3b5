use std::{
    collections::{BTreeMap, HashMap},
    io::{BufRead, IsTerminal, Write},
};

use clap::Parser;
use pocketrag::{
    ChunkDb,
    ChunkStore,
    ConfigDb,
    DataDir,
    Error,
    RagConfig,
    Result,
    chunking::ChunkingConfig,
    config::{self, SETTING_KEYS},
    embedding::EmbeddingService,
    ingestion::{self, IngestOptions, IngestOutcome},
    mcp,
    rag::{AskOptions, FALLBACK_ANSWER},
    search,
    walker,
};
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{
    AddArgs,
    AskArgs,
    Cli,
    ClearArgs,
    Command,
    ConfigAction,
    RetrievalArgs,
    SearchArgs,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("POCKETRAG_LOG") {
        EnvFilter::new(env)
    } else if quiet {
        EnvFilter::new("warn")
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn main() -> Result<()> {
    let Cli {
        data_dir,
        model,
        embedder,
        verbose,
        quiet,
        command,
    } = Cli::parse();
    init_tracing(verbose, quiet);

    if let Command::Completions(args) = &command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(data_dir.as_deref())?;
    let config_db = ConfigDb::open(&data_dir.config_db())?;

    // Settings are editable even when a stored value no longer parses.
    if let Command::Config { action } = command {
        return cmd_config(&config_db, action);
    }

    let mut config = RagConfig::load(&config_db)?;
    if let Some(model) = model {
        config.model_name = model;
    }
    if let Some(embedder) = embedder {
        config.embedder = embedder;
    }

    match command {
        Command::Add(args) => cmd_add(&config_db, &data_dir, &config, &args)?,
        Command::Remove(args) => {
            let record = config_db.find_document(&args.document)?;
            let store = ChunkDb::open(&data_dir.chunks_db())?;
            let removed =
                ingestion::remove_document(&record, &store, &config_db)?;
            println!("Removed {} ({removed} chunks)", record.name);
        }
        Command::List(args) => cmd_list(&config_db, args.json)?,
        Command::Clear(args) => cmd_clear(&config_db, &data_dir, &args)?,
        Command::Search(args) => {
            cmd_search(&config_db, &data_dir, &config, &args)?;
        }
        Command::Ask(args) => cmd_ask(&config_db, &data_dir, &config, &args)?,
        Command::Status(args) => {
            cmd_status(&config_db, &data_dir, &config, args.json)?;
        }
        Command::Mcp => mcp::run_mcp(data_dir, config_db, &config)?,
        Command::Config { .. } | Command::Completions(_) => {}
    }

    Ok(())
}

fn cmd_add(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &RagConfig,
    args: &AddArgs,
) -> Result<()> {
    let chunking = if args.legacy {
        ChunkingConfig::legacy()
    } else {
        ChunkingConfig {
            chunk_size: args.chunk_size.unwrap_or(config.chunking.chunk_size),
            overlap: args.overlap.unwrap_or(config.chunking.overlap),
        }
    };
    if chunking.chunk_size == 0 || chunking.overlap >= chunking.chunk_size {
        return Err(Error::Config(format!(
            "overlap ({}) must be smaller than a non-zero chunk size ({})",
            chunking.overlap, chunking.chunk_size
        )));
    }

    let filter = walker::build_filter(&args.globs)?;
    let files = walker::collect_inputs(&args.paths, filter.as_ref())?;
    if files.is_empty() {
        eprintln!("No supported documents found.");
        return Ok(());
    }

    let store = ChunkDb::open(&data_dir.chunks_db())?;
    let mut embeddings = EmbeddingService::new(config.build_embedder());
    let options = IngestOptions {
        chunking,
        force: args.force,
        progress: true,
    };

    let mut imported = 0;
    let mut last_error = None;
    for path in &files {
        match ingestion::ingest_document(
            path,
            &store,
            config_db,
            &mut embeddings,
            &options,
        ) {
            Ok(IngestOutcome::Ingested(record)) => {
                imported += 1;
                println!(
                    "Added {} #{}: {} pages, {} chunks",
                    record.name,
                    record.short_id(),
                    record.page_count,
                    record.chunk_count
                );
            }
            Ok(IngestOutcome::Unchanged(record)) => {
                imported += 1;
                println!(
                    "Unchanged {} #{} (use --force to re-import)",
                    record.name,
                    record.short_id()
                );
            }
            Err(e) => {
                eprintln!("Warning: {e}");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if imported == 0 => Err(e),
        _ => Ok(()),
    }
}

fn cmd_list(config_db: &ConfigDb, json: bool) -> Result<()> {
    let documents = config_db.list_documents()?;

    if json {
        println!("{}", serde_json::to_string(&documents)?);
        return Ok(());
    }

    if documents.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in &documents {
        println!(
            "#{} {} ({} pages, {} chunks)",
            doc.short_id(),
            doc.name,
            doc.page_count,
            doc.chunk_count
        );
        println!("          {}", doc.path);
    }
    Ok(())
}

fn cmd_clear(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    args: &ClearArgs,
) -> Result<()> {
    let count = config_db.list_documents()?.len();

    if !args.yes {
        if !std::io::stdin().is_terminal() {
            return Err(Error::Config(
                "refusing to clear without --yes when not interactive"
                    .to_string(),
            ));
        }
        eprint!("Remove all {count} documents? [y/N] ");
        std::io::stderr().flush()?;
        let mut answer = String::new();
        std::io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim(), "y" | "Y" | "yes") {
            eprintln!("Aborted.");
            return Ok(());
        }
    }

    let store = ChunkDb::open(&data_dir.chunks_db())?;
    store.delete_all()?;
    config_db.clear_documents()?;
    println!("Removed {count} documents.");
    Ok(())
}

fn ask_options(
    config_db: &ConfigDb,
    config: &RagConfig,
    args: &RetrievalArgs,
) -> Result<AskOptions> {
    let mut options = AskOptions::from_config(config);
    if let Some(count) = args.count {
        options.top_k = count.max(1);
    }
    if !args.documents.is_empty() {
        options.document_ids =
            Some(config_db.resolve_document_ids(&args.documents)?);
    }
    if let Some(min_score) = args.min_score {
        options.min_similarity = min_score;
    }
    if let Some(mode) = args.mode {
        options.mode = mode;
    }
    if let Some(weight) = args.embedding_weight {
        if !(0.0..=1.0).contains(&weight) {
            return Err(Error::Config(format!(
                "embedding weight must be between 0 and 1, got {weight}"
            )));
        }
        options.embedding_weight = weight;
    }
    Ok(options)
}

fn cmd_search(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &RagConfig,
    args: &SearchArgs,
) -> Result<()> {
    let options = ask_options(config_db, config, &args.retrieval)?;
    let store = ChunkDb::open(&data_dir.chunks_db())?;
    let mut rag = config.rag_service(store)?;

    let retrieval = rag.retrieve(&args.query, &options)?;
    let names = config_db.document_names()?;
    let results = search::to_results(&retrieval.chunks, &names);

    if args.json {
        search::format_json(&results, &args.query, options.mode)?;
    } else {
        search::format_human(&results);
    }
    Ok(())
}

fn cmd_ask(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &RagConfig,
    args: &AskArgs,
) -> Result<()> {
    let options = ask_options(config_db, config, &args.retrieval)?;
    let store = ChunkDb::open(&data_dir.chunks_db())?;
    let mut rag = config.rag_service(store)?;

    let result = rag.ask(&args.query, &options)?;
    let names = config_db.document_names()?;
    let name_of = |id: &str| -> String {
        names
            .get(id)
            .cloned()
            .unwrap_or_else(|| format!("#{}", &id[..id.len().min(8)]))
    };

    if args.json {
        let sources: Vec<_> = result
            .sources
            .iter()
            .map(|s| {
                serde_json::json!({
                    "document_id": s.document_id,
                    "document_name": name_of(&s.document_id),
                    "page_number": s.page_number,
                    "score": s.score,
                })
            })
            .collect();
        let value = serde_json::json!({
            "query": args.query,
            "answer": result.answer,
            "sources": sources,
            "context": result.context,
            "degraded_embedding": result.degraded_embedding,
        });
        println!("{}", serde_json::to_string(&value)?);
        return Ok(());
    }

    if result.degraded_embedding {
        eprintln!(
            "Warning: the embedding model produced no signal, \
             results are based on keywords only."
        );
    }
    if result.answer == FALLBACK_ANSWER && !rag.has_generator() {
        eprintln!(
            "No generator configured. Set one with \
             `pocketrag config set generator <command>` \
             or the POCKETRAG_GENERATOR environment variable."
        );
    }

    if args.show_context {
        println!("Context:\n{}\n", result.context);
    }
    println!("{}", result.answer);

    if !result.sources.is_empty() {
        println!("\nSources:");
        for source in &result.sources {
            println!(
                "  - {} p.{} ({:.3})",
                name_of(&source.document_id),
                source.page_number,
                source.score
            );
        }
    }
    Ok(())
}

fn cmd_config(config_db: &ConfigDb, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            config::check_setting_key(&key)?;
            match config_db.get_setting(&key)? {
                Some(value) => println!("{value}"),
                None => eprintln!("{key} is not set"),
            }
        }
        ConfigAction::Set { key, value } => {
            config::validate_setting(config_db, &key, &value)?;
            config_db.set_setting(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigAction::Unset { key } => {
            config::check_setting_key(&key)?;
            if config_db.remove_setting(&key)? {
                println!("Unset {key}");
            } else {
                eprintln!("{key} was not set");
            }
        }
        ConfigAction::List { json } => {
            let stored: HashMap<String, String> =
                config_db.list_settings()?.into_iter().collect();
            if json {
                let sorted: BTreeMap<_, _> = stored.iter().collect();
                println!("{}", serde_json::to_string(&sorted)?);
            } else {
                for key in SETTING_KEYS {
                    match stored.get(*key) {
                        Some(value) => println!("{key} = {value}"),
                        None => println!("{key} (default)"),
                    }
                }
            }
        }
    }
    Ok(())
}

fn cmd_status(
    config_db: &ConfigDb,
    data_dir: &DataDir,
    config: &RagConfig,
    json: bool,
) -> Result<()> {
    let documents = config_db.list_documents()?.len();
    let chunks = ChunkDb::open(&data_dir.chunks_db())?.count()?;
    let generator = config.generator.as_deref().unwrap_or("(none)");

    if json {
        let value = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "embedder": config.embedder.as_str(),
            "model": config.model_name,
            "generator": config.generator,
            "search_mode": config.search_mode,
            "documents": documents,
            "chunks": chunks,
        });
        println!("{}", serde_json::to_string(&value)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Embedder: {}", config.embedder);
        println!("Model: {}", config.model_name);
        println!("Generator: {generator}");
        println!("Search mode: {}", config.search_mode);
        println!("Documents: {documents}");
        println!("Chunks: {chunks}");
    }
    Ok(())
}
