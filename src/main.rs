use std::io::Write;

use clap::Parser;
use docsift::{
    DataDir,
    Index,
    ModelManager,
    chunking::ChunkingConfig,
    cli::{
        ChunkingArgs,
        Cli,
        Command,
        EmbedArgs,
        IngestArgs,
        RebuildArgs,
        SearchArgs,
        ShellArgs,
    },
    embedding::Embedder,
    error,
    index_store,
    ingestion,
    mcp,
    search::{self, SearchParams},
    shell,
    summary::{OllamaSummarizer, Summarizer},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("DOCSIFT_LOG") {
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

fn main() -> error::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    if let Command::Completions(args) = &cli.command {
        args.generate();
        return Ok(());
    }

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let model = ModelManager::resolve(cli.model.as_deref());

    match cli.command {
        Command::Ingest(args) => cmd_ingest(&data_dir, &args)?,
        Command::Embed(args) => cmd_embed(&data_dir, model, &args)?,
        Command::Rebuild(args) => cmd_rebuild(&data_dir, model, &args)?,
        Command::Search(args) => cmd_search(&data_dir, model, &args)?,
        Command::Shell(args) => cmd_shell(&data_dir, model, &args)?,
        Command::Status(args) => cmd_status(&data_dir, &model, args.json)?,
        Command::Mcp => mcp::run_mcp(&data_dir, model)?,
        Command::Completions(_) => {}
    }

    Ok(())
}

fn chunking_config(args: &ChunkingArgs) -> error::Result<ChunkingConfig> {
    ChunkingConfig::new(args.chunk_size, args.overlap)
}

fn cmd_ingest(data_dir: &DataDir, args: &IngestArgs) -> error::Result<()> {
    let config = chunking_config(&args.chunking)?;
    let documents = data_dir.documents_json();

    eprintln!("Ingesting {}...", args.path.display());
    let report = ingestion::ingest_directory(&args.path, &config)?;

    if args.reset {
        index_store::reset_chunks(&documents)?;
    }
    let total = index_store::append_chunks(&documents, &report.chunks)?;

    eprintln!(
        "  Chunked {} documents into {} chunks ({} skipped)",
        report.documents,
        report.chunks.len(),
        report.skipped.len()
    );
    eprintln!("  {total} chunks staged in {}", documents.display());
    Ok(())
}

fn cmd_embed(
    data_dir: &DataDir,
    mut model: ModelManager,
    args: &EmbedArgs,
) -> error::Result<()> {
    let chunks = index_store::load_chunks(&data_dir.documents_json())?;
    if chunks.is_empty() {
        eprintln!("No chunks staged; the index will be empty.");
    }

    eprintln!("Embedding {} chunks with {}...", chunks.len(), model.model_id());
    let index = Index::build(chunks, &mut model, args.batch_size)?;
    let paths = index.save(&data_dir.index_prefix())?;

    eprintln!(
        "  Saved {} embeddings of width {} to {}",
        index.len(),
        index.dimension(),
        paths.embeddings.display()
    );
    Ok(())
}

fn cmd_rebuild(
    data_dir: &DataDir,
    model: ModelManager,
    args: &RebuildArgs,
) -> error::Result<()> {
    cmd_ingest(
        data_dir,
        &IngestArgs {
            path: args.path.clone(),
            chunking: args.chunking.clone(),
            reset: true,
        },
    )?;
    cmd_embed(
        data_dir,
        model,
        &EmbedArgs {
            batch_size: args.batch_size,
        },
    )?;
    eprintln!("Rebuild complete.");
    Ok(())
}

fn load_index(
    data_dir: &DataDir,
    model: &mut ModelManager,
) -> error::Result<Index> {
    let dimension = model.dimension()?;
    let index = Index::load(&data_dir.index_prefix(), dimension)?;
    info!(
        "Loaded {} chunks with {}-dimensional embeddings",
        index.len(),
        index.dimension()
    );
    Ok(index)
}

fn print_summary(
    summarizer: &dyn Summarizer,
    query: &str,
    results: &[search::SearchResult],
) -> error::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "\nSummary:\n")?;
    let mut sink = |piece: &str| -> error::Result<()> {
        write!(out, "{piece}")?;
        out.flush()?;
        Ok(())
    };
    summarizer.summarize(query, results, &mut sink)?;
    writeln!(out)?;
    Ok(())
}

fn cmd_search(
    data_dir: &DataDir,
    mut model: ModelManager,
    args: &SearchArgs,
) -> error::Result<()> {
    let index = load_index(data_dir, &mut model)?;
    let params = SearchParams {
        query: args.query.clone(),
        top_k: args.top_k,
        threshold: args.threshold,
    };
    let outcome = search::execute_search(&params, &index, &mut model)?;

    if args.json {
        search::format_json(&outcome, &args.query)?;
    } else {
        search::format_human(&outcome.results, !args.preview)?;
    }

    if args.summarize && !outcome.results.is_empty() {
        let summarizer = OllamaSummarizer::from_env();
        info!(model = summarizer.model(), "summarizing results");
        print_summary(&summarizer, &args.query, &outcome.results)?;
    }
    Ok(())
}

fn cmd_shell(
    data_dir: &DataDir,
    mut model: ModelManager,
    args: &ShellArgs,
) -> error::Result<()> {
    let index = load_index(data_dir, &mut model)?;
    let summarizer = args.summarize.then(OllamaSummarizer::from_env);

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    shell::run_shell(
        &mut stdin.lock(),
        &mut stdout.lock(),
        &index,
        &mut model,
        summarizer.as_ref().map(|s| s as &dyn Summarizer),
    )?;
    Ok(())
}

fn cmd_status(
    data_dir: &DataDir,
    model: &ModelManager,
    json: bool,
) -> error::Result<()> {
    let staged = index_store::load_chunks(&data_dir.documents_json())?.len();
    let paths = data_dir.index_paths();
    let shape = if paths.exists() {
        Some(index_store::matrix_shape(&paths.embeddings)?)
    } else {
        None
    };

    if json {
        let index = shape.map(|(chunks, dimension)| {
            serde_json::json!({ "chunks": chunks, "dimension": dimension })
        });
        let status = serde_json::json!({
            "data_dir": data_dir.root().display().to_string(),
            "model": model.model_id(),
            "staged_chunks": staged,
            "index": index,
        });
        println!("{}", serde_json::to_string(&status)?);
    } else {
        println!("Data directory: {}", data_dir.root().display());
        println!("Model: {}", model.model_id());
        println!("Staged chunks: {staged}");
        match shape {
            Some((chunks, dimension)) => {
                println!(
                    "Index: {chunks} chunks, {dimension}-dimensional embeddings"
                );
            }
            None => println!("Index: not built"),
        }
    }
    Ok(())
}
