//! hooklane CLI
//!
//! Entry point for the `hooklane` command-line tool.

use clap::{Parser, Subcommand};
use hooklane::artifact::{ArtifactPipeline, ArtifactQuery, BlobStore};
use hooklane::mock::MockRuntime;
use hooklane::store::JobStore;
use hooklane::{ControllerConfig, JobController, RpcHandler, StaticSourceResolver, SystemClock};
use std::io::Write;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hooklane")]
#[command(about = "Instrumentation job controller and artifact store", version)]
struct Cli {
    /// Path to the config file (default: hooklane.toml)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve JSON-lines requests on stdin/stdout against the loopback runtime
    Serve,

    /// Inspect job history
    Jobs {
        #[command(subcommand)]
        action: JobsCommands,
    },

    /// Inspect captured artifacts
    Artifacts {
        #[command(subcommand)]
        action: ArtifactsCommands,
    },

    /// Blob store maintenance
    Blobs {
        #[command(subcommand)]
        action: BlobsCommands,
    },
}

#[derive(Subcommand)]
enum JobsCommands {
    /// List a target's jobs, newest first
    List {
        target_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one job record
    Show { job_id: String },

    /// Print the module source a job was started with
    Source { job_id: String },
}

#[derive(Subcommand)]
enum ArtifactsCommands {
    /// List artifacts by target and/or job, oldest first
    List {
        #[arg(long)]
        target: Option<String>,

        #[arg(long)]
        job: Option<String>,

        /// Resume after this artifact ID
        #[arg(long)]
        after: Option<String>,

        #[arg(long)]
        limit: Option<usize>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show one artifact record
    Get { artifact_id: String },

    /// Write an artifact's payload to stdout
    Cat { artifact_id: String },
}

#[derive(Subcommand)]
enum BlobsCommands {
    /// Count stored blobs and bytes
    Stats,

    /// Remove temp files left by interrupted writes
    Sweep {
        /// Only remove temp files older than this many seconds
        #[arg(long, default_value_t = 3600)]
        older_than_secs: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let config = load_config(&cli);

    match cli.command {
        Commands::Serve => run_serve(config),
        Commands::Jobs { action } => match action {
            JobsCommands::List { target_id, json } => run_jobs_list(&config, &target_id, json),
            JobsCommands::Show { job_id } => run_jobs_show(&config, &job_id),
            JobsCommands::Source { job_id } => run_jobs_source(&config, &job_id),
        },
        Commands::Artifacts { action } => match action {
            ArtifactsCommands::List {
                target,
                job,
                after,
                limit,
                json,
            } => run_artifacts_list(
                &config,
                ArtifactQuery {
                    target_id: target,
                    job_id: job,
                    after,
                    limit,
                },
                json,
            ),
            ArtifactsCommands::Get { artifact_id } => run_artifacts_get(&config, &artifact_id),
            ArtifactsCommands::Cat { artifact_id } => run_artifacts_cat(&config, &artifact_id),
        },
        Commands::Blobs { action } => match action {
            BlobsCommands::Stats => run_blobs_stats(&config),
            BlobsCommands::Sweep { older_than_secs } => run_blobs_sweep(&config, older_than_secs),
        },
    }
}

fn load_config(cli: &Cli) -> ControllerConfig {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("hooklane.toml"));

    let mut config = match ControllerConfig::load(Some(path.as_path())) {
        Ok(loaded) => {
            if let Some(path) = &loaded.path {
                log::debug!(
                    "loaded {} (sha256 {})",
                    path.display(),
                    loaded.digest.as_deref().unwrap_or("-")
                );
            }
            loaded.config
        }
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            process::exit(1);
        }
    };

    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            process::exit(1);
        }
    }
}

// Read-only commands open the stores directly. Opening a controller would
// fail the jobs of a server that is still running.
fn open_jobs(config: &ControllerConfig) -> JobStore {
    match JobStore::open(config.jobs_dir(), config.history_limit) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error opening job history at {}: {}", config.jobs_dir().display(), e);
            process::exit(1);
        }
    }
}

fn open_artifacts(config: &ControllerConfig) -> ArtifactPipeline {
    match ArtifactPipeline::open(config.artifacts_dir(), Arc::new(SystemClock)) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            eprintln!(
                "Error opening artifact store at {}: {}",
                config.artifacts_dir().display(),
                e
            );
            process::exit(1);
        }
    }
}

fn run_serve(config: ControllerConfig) {
    let controller = match JobController::open(
        config,
        Arc::new(MockRuntime::new()),
        Arc::new(StaticSourceResolver::new()),
        Arc::new(SystemClock),
    ) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error starting controller: {}", e);
            process::exit(1);
        }
    };

    eprintln!(
        "hooklane serving on stdio (data dir {})",
        controller.config().data_dir.display()
    );
    if let Err(e) = RpcHandler::new(controller).run() {
        eprintln!("I/O error: {}", e);
        process::exit(1);
    }
}

fn run_jobs_list(config: &ControllerConfig, target_id: &str, json: bool) {
    let store = open_jobs(config);
    let jobs: Vec<_> = store
        .list_for_target(target_id)
        .into_iter()
        .map(|r| r.snapshot())
        .collect();

    if json {
        print_json(&jobs);
        return;
    }
    if jobs.is_empty() {
        println!("No jobs for target '{}'.", target_id);
        return;
    }
    for job in &jobs {
        let error = job
            .last_error
            .as_ref()
            .map(|e| format!("  {}: {}", e.code, e.message))
            .unwrap_or_default();
        println!(
            "{}  {:<9}  {:<11}  {}{}",
            job.job_id,
            job.state.as_str(),
            job.job_type.as_str(),
            job.created_at.to_rfc3339(),
            error
        );
    }
}

fn run_jobs_show(config: &ControllerConfig, job_id: &str) {
    let store = open_jobs(config);
    match store.get(job_id) {
        Some(record) => print_json(&record.snapshot()),
        None => {
            eprintln!("Job '{}' not found.", job_id);
            process::exit(1);
        }
    }
}

fn run_jobs_source(config: &ControllerConfig, job_id: &str) {
    let store = open_jobs(config);
    match store.get(job_id) {
        Some(record) => print!("{}", record.module_source),
        None => {
            eprintln!("Job '{}' not found.", job_id);
            process::exit(1);
        }
    }
}

fn run_artifacts_list(config: &ControllerConfig, query: ArtifactQuery, json: bool) {
    let pipeline = open_artifacts(config);
    let page = match pipeline.page(&query) {
        Ok(page) => page,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    if json {
        print_json(&page.artifacts);
    } else {
        for a in &page.artifacts {
            println!(
                "{}  {:<12}  {:>10}  {}  job={}",
                a.artifact_id, a.artifact_type, a.size_bytes, a.mime, a.job_id
            );
        }
    }
    if let Some(next) = page.next_after {
        eprintln!("More results: --after {}", next);
    }
}

fn run_artifacts_get(config: &ControllerConfig, artifact_id: &str) {
    let pipeline = open_artifacts(config);
    match pipeline.get(artifact_id) {
        Some(record) => print_json(&record),
        None => {
            eprintln!("Artifact '{}' not found.", artifact_id);
            process::exit(1);
        }
    }
}

fn run_artifacts_cat(config: &ControllerConfig, artifact_id: &str) {
    let pipeline = open_artifacts(config);
    let Some(bytes) = pipeline.read_payload(artifact_id) else {
        eprintln!("Payload of artifact '{}' is not available.", artifact_id);
        process::exit(1);
    };
    let mut stdout = std::io::stdout().lock();
    if let Err(e) = stdout.write_all(&bytes).and_then(|_| stdout.flush()) {
        eprintln!("I/O error: {}", e);
        process::exit(1);
    }
}

fn open_blobs(config: &ControllerConfig, orphan_threshold: Duration) -> BlobStore {
    match BlobStore::open(config.artifacts_dir().join("blobs")) {
        Ok(store) => store.with_orphan_threshold(orphan_threshold),
        Err(e) => {
            eprintln!("Error opening blob store: {}", e);
            process::exit(1);
        }
    }
}

fn run_blobs_stats(config: &ControllerConfig) {
    let store = open_blobs(config, Duration::from_secs(3600));
    match store.stats() {
        Ok(stats) => {
            println!("Blob store: {}", store.root().display());
            println!("  Blobs: {}", stats.blobs);
            println!("  Bytes: {}", stats.bytes);
            println!("  Temp files: {}", stats.temp_files);
        }
        Err(e) => {
            eprintln!("Error walking blob store: {}", e);
            process::exit(1);
        }
    }
}

fn run_blobs_sweep(config: &ControllerConfig, older_than_secs: u64) {
    let store = open_blobs(config, Duration::from_secs(older_than_secs));
    match store.cleanup_orphaned_temps() {
        Ok(n) => println!("Removed {} orphaned temp file(s).", n),
        Err(e) => {
            eprintln!("Error sweeping blob store: {}", e);
            process::exit(1);
        }
    }
}
