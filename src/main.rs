//! branchsync - keeps a game installation in sync with its build branch

use anyhow::{bail, Context, Result};
use branchsync::bulk::{spawn_bulk_download, BulkEvent};
use branchsync::config::LauncherConfig;
use branchsync::downloaders::HttpClient;
use branchsync::launch::{LaunchPlan, RunningGameRegistry};
use branchsync::manifest::{fetch_manifest, BranchEndpoint, Manifest};
use branchsync::patcher::Patcher;
use branchsync::staging::{remove_stale_downloads, scan_staging};
use branchsync::status::{Status, StatusSink};
use branchsync::verify::{verify_branch_with, FileOutcome, VerifyOptions};
use clap::{Args, Parser, Subcommand};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "branchsync")]
#[command(version)]
#[command(about = "Verify, patch and launch a game installation from its build branch")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (default: ~/.config/branchsync/settings.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

/// Overrides for the stored settings
#[derive(Args)]
struct Target {
    /// Game installation directory
    #[arg(short, long, env = "BRANCHSYNC_INSTALL_ROOT")]
    root: Option<PathBuf>,

    /// Branch to sync against
    #[arg(short, long, env = "BRANCHSYNC_BRANCH")]
    branch: Option<String>,

    /// Build server host (files come from https://builds.<host>)
    #[arg(long)]
    host: Option<String>,

    /// Full build server URL, overriding --host
    #[arg(long)]
    base_url: Option<String>,
}

impl Target {
    fn apply(self, config: &mut LauncherConfig) {
        if let Some(root) = self.root {
            config.install_root = root;
        }
        if let Some(branch) = self.branch {
            config.branch = branch;
        }
        if let Some(host) = self.host {
            config.build_host = host;
        }
        if let Some(url) = self.base_url {
            config.build_base_url = Some(url);
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check every file of the branch against the installation
    Verify {
        #[command(flatten)]
        target: Target,

        /// Hashing threads (defaults to CPU thread count)
        #[arg(short, long)]
        threads: Option<usize>,
    },

    /// Download and swap in every missing or changed file
    Patch {
        #[command(flatten)]
        target: Target,
    },

    /// Download a fresh installation from a bulk descriptor
    Install {
        /// Installation target directory
        #[arg(short, long, env = "BRANCHSYNC_INSTALL_ROOT")]
        root: Option<PathBuf>,

        /// Descriptor URL (defaults to the configured one)
        #[arg(short, long)]
        descriptor: Option<String>,
    },

    /// List leftover .download and .bak files
    Artifacts {
        /// Game installation directory
        #[arg(short, long, env = "BRANCHSYNC_INSTALL_ROOT")]
        root: Option<PathBuf>,

        /// Delete leftover .download files (backups are kept)
        #[arg(long)]
        clean_downloads: bool,
    },

    /// Start the game with the branch's launch arguments
    Launch {
        #[command(flatten)]
        target: Target,

        /// Game executable (absolute or relative to the install root)
        #[arg(long)]
        exe: Option<PathBuf>,

        /// Do not fetch the manifest for launch arguments
        #[arg(long)]
        offline: bool,

        /// Extra arguments passed to the game
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Show or change stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings
    Show,
    /// Change one setting (empty value clears optional settings)
    Set { key: String, value: String },
}

/// Prints status updates for the terminal
struct PrintSink;

impl StatusSink for PrintSink {
    fn emit(&self, status: Status) {
        match status {
            Status::Downloading(_) => tracing::debug!("{}", status),
            _ => println!("{}", status),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only initialize logging if verbose or RUST_LOG is set
    if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env()
                    .add_directive(if cli.verbose { "branchsync=debug".parse()? } else { "branchsync=warn".parse()? }),
            )
            .init();
    }

    let settings_path = match &cli.config {
        Some(path) => path.clone(),
        None => LauncherConfig::default_path()?,
    };
    let mut config = match &cli.config {
        Some(path) => LauncherConfig::try_load_from(path)?,
        None => LauncherConfig::load(),
    };

    match cli.command {
        Commands::Verify { target, threads } => {
            target.apply(&mut config);
            if threads.is_some() {
                config.verify_threads = threads;
            }
            config.validate()?;

            let client = HttpClient::new()?;
            let manifest = fetch(&client, &config).await?;
            println!("{}", Status::Checking);

            let report = verify_with_progress(manifest, &config).await?;
            for check in report.results.iter().filter(|c| !c.is_ok()) {
                let label = match check.outcome {
                    FileOutcome::Missing => "missing",
                    _ => "differs",
                };
                match &check.error {
                    Some(e) => println!("  {:<8} {} ({})", label, check.path, e),
                    None => println!("  {:<8} {}", label, check.path),
                }
            }
            println!("{}", report.status());
        }

        Commands::Patch { target } => {
            target.apply(&mut config);
            config.validate()?;

            let client = HttpClient::new()?;
            let manifest = fetch(&client, &config).await?;
            let sink = PrintSink;
            sink.emit(Status::Checking);

            let outcome = Patcher::new(&client, config.endpoint()?)
                .with_status(&sink)
                .apply(&manifest, &config.install_root)
                .await;

            println!("\n=== Patch Summary ===");
            println!("Up to date: {}", outcome.verified());
            println!("Updated:    {}", outcome.updated());
            println!("Failed:     {}", outcome.failed_paths.len());
            for reason in outcome.reasons() {
                println!("  {}", reason);
            }

            if !outcome.succeeded {
                bail!("{} files could not be updated", outcome.failed_paths.len());
            }
        }

        Commands::Install { root, descriptor } => {
            if let Some(root) = root {
                config.install_root = root;
            }
            if config.install_root.as_os_str().is_empty() {
                bail!("No install root given (use --root or `config set install_root`)");
            }
            let descriptor = descriptor
                .or_else(|| config.descriptor_url.clone())
                .context("No descriptor URL given (use --descriptor or `config set descriptor_url`)")?;

            install(HttpClient::new()?, config.install_root.clone(), descriptor).await?;
        }

        Commands::Artifacts { root, clean_downloads } => {
            let root = root.unwrap_or_else(|| config.install_root.clone());
            if root.as_os_str().is_empty() {
                bail!("No install root given (use --root or `config set install_root`)");
            }

            let found = scan_staging(&root);
            if found.is_empty() {
                println!("No leftover files in {}", root.display());
                return Ok(());
            }

            print_paths("Partial downloads", &found.downloads, &root);
            print_paths("Backups", &found.backups, &root);
            print_paths("Backups without a live file (interrupted update)", &found.orphaned_backups, &root);

            if clean_downloads {
                let removed = remove_stale_downloads(&found);
                println!("\nRemoved {} partial downloads", removed);
            }
        }

        Commands::Launch { target, exe, offline, args } => {
            target.apply(&mut config);
            if exe.is_some() {
                config.exe_path = exe;
            }
            let program = config.resolved_exe_path()?;

            let mut plan = LaunchPlan::new(program);
            if !offline {
                config.validate()?;
                let client = HttpClient::new()?;
                let manifest = fetch(&client, &config).await?;
                plan = plan.with_manifest_arguments(manifest.arguments());
            }
            let plan = plan.with_extra_args(args);

            let registry = RunningGameRegistry::new(Arc::new(PrintSink));
            let session = registry.launch(&plan)?;
            let id = session.id;
            println!("Started {} (pid {:?})", plan.program().display(), session.pid);

            let exit = session.wait();
            tokio::pin!(exit);
            let interrupted = tokio::select! {
                _ = &mut exit => false,
                _ = tokio::signal::ctrl_c() => true,
            };
            if interrupted {
                println!("Stopping game...");
                registry.terminate(id);
                exit.await;
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                println!("# {}", settings_path.display());
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            ConfigAction::Set { key, value } => {
                config.set(&key, &value)?;
                config.save_to(&settings_path)?;
                println!("Saved {} to {}", key, settings_path.display());
            }
        },
    }

    Ok(())
}

async fn fetch(client: &HttpClient, config: &LauncherConfig) -> Result<Manifest> {
    let endpoint: BranchEndpoint = config.endpoint()?;
    println!("Fetching branch '{}' from {}", config.branch, endpoint.base_url());

    let manifest = fetch_manifest(client, &endpoint, &config.branch)
        .await
        .with_context(|| format!("Could not fetch manifest for branch '{}'", config.branch))?;

    println!("Manifest: {} files, {} MB", manifest.len(), manifest.total_bytes() / 1024 / 1024);
    Ok(manifest)
}

async fn verify_with_progress(
    manifest: Manifest,
    config: &LauncherConfig,
) -> Result<branchsync::verify::VerificationReport> {
    let root = config.install_root.clone();
    let options = VerifyOptions {
        threads: config.verify_threads,
    };

    let pb = ProgressBar::new(manifest.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] Verifying [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("=>-"),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let bar = pb.clone();
    let report = tokio::task::spawn_blocking(move || {
        let progress = |done: usize, _total: usize| bar.set_position(done as u64);
        verify_branch_with(&manifest, &root, &options, Some(&progress))
    })
    .await
    .context("Verification worker failed")?;

    pb.finish_and_clear();
    Ok(report)
}

async fn install(client: HttpClient, root: PathBuf, descriptor: String) -> Result<()> {
    println!("Installing into {}", root.display());

    let mut handle = spawn_bulk_download(Arc::new(client), root, descriptor);

    let mp = MultiProgress::new();
    let overall = mp.add(ProgressBar::new(0));
    overall.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] Files [{bar:40.cyan/blue}] {pos}/{len}")?
            .progress_chars("=>-"),
    );
    let current = mp.add(ProgressBar::new(100));
    current.set_style(
        ProgressStyle::default_bar()
            .template("  [{bar:40.green/white}] {pos:>3}% {msg}")?
            .progress_chars("=>-"),
    );

    let mut success = false;
    let mut errors = Vec::new();
    loop {
        let next = tokio::select! {
            event = handle.next_event() => Some(event),
            _ = tokio::signal::ctrl_c() => None,
        };
        let event = match next {
            Some(Some(event)) => event,
            Some(None) => break,
            None => {
                handle.terminate();
                mp.clear().ok();
                bail!("Install cancelled");
            }
        };

        match event {
            BulkEvent::Started { files } => overall.set_length(files as u64),
            BulkEvent::Progress { file, percent, .. } => {
                current.set_message(file);
                current.set_position(percent as u64);
                if percent == 100 {
                    overall.inc(1);
                }
            }
            BulkEvent::Error { file, message } => match file {
                Some(file) => errors.push(format!("{}: {}", file, message)),
                None => errors.push(message),
            },
            BulkEvent::Finished { success: s } => success = s,
        }
    }

    current.finish_and_clear();
    overall.finish();

    for error in &errors {
        eprintln!("Error: {}", error);
    }
    if !success {
        bail!("Install failed");
    }
    println!("{}", Status::Completed);
    Ok(())
}

fn print_paths(title: &str, paths: &[PathBuf], root: &Path) {
    if paths.is_empty() {
        return;
    }
    println!("{} ({}):", title, paths.len());
    for path in paths {
        println!("  {}", path.strip_prefix(root).unwrap_or(path).display());
    }
}
