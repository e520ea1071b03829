use clap::Parser;
use tracing_subscriber::EnvFilter;

use lectern::{
    cli::{Cli, Command, IngestArgs, QueryArgs, ResetArgs, StatusArgs},
    data_dir::DataDir,
    embedding::OllamaEmbedder,
    engine::{IngestRequest, RetrievalEngine, SearchRequest},
    error::{Error, Result},
    vector_index::IndexParams,
};

fn init_tracing(verbose: u8, quiet: bool) {
    let filter = if let Ok(env) = std::env::var("LECTERN_LOG") {
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
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let data_dir = DataDir::resolve(cli.data_dir.as_deref())?;
    let embedder =
        OllamaEmbedder::new(&cli.ollama_url, &cli.model, cli.dimension)?;
    let engine =
        RetrievalEngine::open(data_dir, embedder, IndexParams::default())?;

    match cli.command {
        Command::Ingest(args) => cmd_ingest(&engine, &args),
        Command::Query(args) => cmd_query(&engine, &args),
        Command::Status(args) => cmd_status(&engine, &args),
        Command::Reset(args) => cmd_reset(&engine, &args),
    }
}

fn cmd_ingest(
    engine: &RetrievalEngine<OllamaEmbedder>,
    args: &IngestArgs,
) -> Result<()> {
    let mut failures = 0usize;
    for path in &args.files {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                Error::InvalidInput(format!(
                    "not a file path: {}",
                    path.display()
                ))
            })?;
        let bytes = std::fs::read(path)?;

        let request = IngestRequest {
            filename,
            bytes,
            department_id: args.department,
            track_id: args.track,
            module_id: args.module,
            activity_id: args.activity,
            owner_profile_id: args.profile,
            owner_user_id: args.user,
        };

        match engine.ingest(request) {
            Ok(report) => {
                println!(
                    "{}: {} chunk(s) indexed ({} total vectors)",
                    report.filename, report.chunks_indexed, report.total_vectors
                );
            }
            // Per-file failures should not abort the rest of the batch.
            Err(
                e @ (Error::DuplicateContent { .. }
                | Error::EmptyContent(_)
                | Error::InvalidInput(_)),
            ) => {
                eprintln!("skipping {}: {e}", path.display());
                failures += 1;
            }
            Err(e) => return Err(e),
        }
    }

    if failures > 0 {
        eprintln!("{failures} file(s) skipped");
    }
    Ok(())
}

fn cmd_query(
    engine: &RetrievalEngine<OllamaEmbedder>,
    args: &QueryArgs,
) -> Result<()> {
    let request = SearchRequest {
        query: args.query.clone(),
        top_k: args.top_k,
        score_threshold: args.threshold,
        use_mmr: !args.no_mmr,
        mmr_lambda: args.lambda,
        department_id: args.department,
        track_id: args.track,
    };

    match engine.find_relevant_context(&request)? {
        Some(texts) => {
            if args.json {
                println!("{}", serde_json::to_string(&texts)?);
            } else {
                for (i, text) in texts.iter().enumerate() {
                    if i > 0 {
                        println!("---");
                    }
                    println!("{text}");
                }
            }
        }
        None => {
            if args.json {
                println!("[]");
            } else {
                println!("No relevant context found.");
            }
        }
    }
    Ok(())
}

fn cmd_status(
    engine: &RetrievalEngine<OllamaEmbedder>,
    args: &StatusArgs,
) -> Result<()> {
    let stats = engine.stats()?;
    let documents = engine.documents()?;

    if args.json {
        #[derive(serde::Serialize)]
        struct StatusOutput {
            vectors: u64,
            dimension: usize,
            documents: usize,
        }
        println!(
            "{}",
            serde_json::to_string(&StatusOutput {
                vectors: stats.vectors,
                dimension: stats.dimension,
                documents: documents.len(),
            })?
        );
    } else {
        println!("Vectors: {}", stats.vectors);
        println!("Dimension: {}", stats.dimension);
        println!("Documents: {}", documents.len());
        for doc in &documents {
            println!(
                "  {} ({} chunk(s))",
                doc.original_filename, doc.chunk_count
            );
        }
    }
    Ok(())
}

fn cmd_reset(
    engine: &RetrievalEngine<OllamaEmbedder>,
    args: &ResetArgs,
) -> Result<()> {
    if !args.yes {
        eprintln!("This deletes all indexed data. Re-run with --yes to confirm.");
        return Ok(());
    }

    let report = engine.reset()?;
    println!(
        "Removed {} vector(s); {} file(s) deleted.",
        report.vectors_before,
        report.removed_paths.len()
    );
    Ok(())
}
