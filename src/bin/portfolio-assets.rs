//! CLI binary for portfolio-assets.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig`,
//! builds a coordinator from the environment, and prints the same JSON
//! envelope an HTTP handler would send.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use portfolio_assets::api::{error_response, ApiResponse};
use portfolio_assets::pipeline::staging::validate_upload;
use portfolio_assets::{
    build_store, inspect_document, run_with_deadline, AssetCoordinator, AssetError, AssetKind,
    CancelFlag, DocumentRenderer, IncomingFile, JsonRecordStore, LifecycleObserver,
    LifecycleStats, OwnerKey, PdfiumRenderer, PipelineConfig, Stage, StorageSettings, UploadKind,
};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI lifecycle observer using indicatif ───────────────────────────────────

/// Terminal observer: a spinner showing the current stage, upload counts,
/// and a warning line for every object that could not be cleaned up.
struct CliObserver {
    bar: ProgressBar,
    cleanup_failures: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            cleanup_failures: AtomicUsize::new(0),
        })
    }
}

impl LifecycleObserver for CliObserver {
    fn on_stage(&self, key: &OwnerKey, stage: Stage) {
        self.bar.set_prefix(key.to_string());
        match stage {
            Stage::Cleaned => self.bar.finish_and_clear(),
            Stage::Failed => {
                self.bar.finish_and_clear();
                eprintln!("{} {} failed", red("✘"), key);
            }
            other => self.bar.set_message(other.to_string()),
        }
    }

    fn on_asset_uploaded(&self, _key: &OwnerKey, done: usize, total: usize) {
        self.bar.set_message(format!("UPLOADING {done}/{total}"));
    }

    fn on_cleanup_failure(&self, _key: &OwnerKey, storage_id: &str, error: &str) {
        self.cleanup_failures.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} left behind {}  {}",
            red("!"),
            storage_id,
            dim(error)
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Inspect a PDF (no storage needed)
  portfolio-assets inspect resume.pdf

  # Render pages locally
  portfolio-assets render resume.pdf --out ./pages

  # Upload / replace a user's resume
  portfolio-assets resume upload --owner user-42 resume.pdf

  # Set a blog post's featured image
  portfolio-assets image set --slot blog --owner post-7 cover.png

  # Append images to a project, then remove one
  portfolio-assets project add-images --project p-1 a.jpg b.jpg
  portfolio-assets project remove-image --project p-1 portfolio-cms/images/project_p-1_..._1

  # Delete everything a user account owns
  portfolio-assets account purge --user user-42 --project p-1 --blog post-7

ENVIRONMENT VARIABLES:
  PORTFOLIO_STORAGE_BACKEND   cloudinary (default) or filesystem
  CLOUDINARY_CLOUD_NAME       Cloudinary cloud name
  CLOUDINARY_API_KEY          Cloudinary API key
  CLOUDINARY_API_SECRET       Cloudinary API secret
  PORTFOLIO_STORAGE_DIR       Storage root (filesystem backend)
  PORTFOLIO_PUBLIC_BASE_URL   URL serving the storage root (filesystem backend)
  PORTFOLIO_FOLDER_PREFIX     Folder namespace (default: portfolio-cms)
  PDFIUM_LIB_PATH             Path to libpdfium
"#;

/// Render resume PDFs and manage portfolio assets in remote storage.
#[derive(Parser, Debug)]
#[command(
    name = "portfolio-assets",
    version,
    about = "Render resume PDFs and manage portfolio assets in remote storage",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    opts: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalOpts {
    /// Directory holding owner records (one JSON file per owner and slot).
    #[arg(long, global = true, env = "PORTFOLIO_DATA_DIR", default_value = "./portfolio-data")]
    data_dir: PathBuf,

    /// Directory for staged uploads and render scratch space.
    #[arg(long, global = true, env = "PORTFOLIO_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// Path to the pdfium shared library.
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Longest page edge in pixels.
    #[arg(long, global = true, env = "PORTFOLIO_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// JPEG quality for page images (1–100).
    #[arg(long, global = true, env = "PORTFOLIO_JPEG_QUALITY", default_value_t = 100,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Render deadline in seconds.
    #[arg(long, global = true, env = "PORTFOLIO_RENDER_TIMEOUT", default_value_t = 30)]
    render_timeout: u64,

    /// Per-call storage timeout in seconds.
    #[arg(long, global = true, env = "PORTFOLIO_UPLOAD_TIMEOUT", default_value_t = 60)]
    upload_timeout: u64,

    /// Concurrent uploads per run.
    #[arg(short, long, global = true, env = "PORTFOLIO_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Disable the spinner.
    #[arg(long, global = true, env = "PORTFOLIO_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PORTFOLIO_VERBOSE")]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true, env = "PORTFOLIO_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print page count and metadata of a PDF.
    Inspect { pdf: PathBuf },

    /// Render every page of a PDF to page-N.jpg in a directory.
    Render {
        pdf: PathBuf,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Manage a user's resume.
    #[command(subcommand)]
    Resume(ResumeCommand),

    /// Manage single-image slots (profile picture, blog featured image).
    #[command(subcommand)]
    Image(ImageCommand),

    /// Manage project image galleries.
    #[command(subcommand)]
    Project(ProjectCommand),

    /// Account-wide operations.
    #[command(subcommand)]
    Account(AccountCommand),
}

#[derive(Subcommand, Debug)]
enum ResumeCommand {
    /// Upload a PDF, replacing any existing resume.
    Upload {
        #[arg(long)]
        owner: String,
        pdf: PathBuf,
    },
    /// Print the current resume record.
    Show {
        #[arg(long)]
        owner: String,
    },
    /// Delete the resume and its stored objects.
    Delete {
        #[arg(long)]
        owner: String,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Slot {
    Profile,
    Blog,
}

impl From<Slot> for AssetKind {
    fn from(s: Slot) -> Self {
        match s {
            Slot::Profile => AssetKind::ProfileImage,
            Slot::Blog => AssetKind::FeaturedImage,
        }
    }
}

#[derive(Subcommand, Debug)]
enum ImageCommand {
    /// Upload an image, replacing the slot's current one.
    Set {
        #[arg(long, value_enum)]
        slot: Slot,
        /// User id (profile) or blog id (blog).
        #[arg(long)]
        owner: String,
        file: PathBuf,
    },
    /// Remove the slot's image.
    Remove {
        #[arg(long, value_enum)]
        slot: Slot,
        #[arg(long)]
        owner: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectCommand {
    /// Append images to a project's gallery.
    AddImages {
        #[arg(long)]
        project: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Remove one image by storage id.
    RemoveImage {
        #[arg(long)]
        project: String,
        storage_id: String,
    },
    /// Delete all images of a project.
    Purge {
        #[arg(long)]
        project: String,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Delete every asset a user account owns.
    Purge {
        #[arg(long)]
        user: String,
        /// Project ids owned by the user.
        #[arg(long = "project")]
        projects: Vec<String>,
        /// Blog ids owned by the user.
        #[arg(long = "blog")]
        blogs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let opts = &cli.opts;

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers stage feedback; keep library logs at warn unless
    // asked for more.
    let show_progress = !opts.quiet && !opts.no_progress;
    let filter = if opts.verbose {
        "debug"
    } else if opts.quiet || show_progress {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(opts)?;

    match cli.command {
        Command::Inspect { pdf } => {
            let info = inspect_document(&pdf, config.pdfium_lib_path.as_deref())
                .await
                .context("Failed to inspect PDF")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise metadata")?
            );
            Ok(())
        }
        Command::Render { pdf, out } => render_local(&config, &pdf, &out, opts.quiet).await,
        command => {
            // Storage commands: configuration must be complete before any work.
            let settings = StorageSettings::from_env().context("Storage is not configured")?;
            let store = build_store(&settings, &config).context("Failed to build object store")?;
            let renderer = PdfiumRenderer::new(&config);
            if matches!(command, Command::Resume(ResumeCommand::Upload { .. })) {
                renderer
                    .check_binding()
                    .context("PDFium library not available")?;
            }

            let mut coordinator = AssetCoordinator::new(
                config,
                Arc::new(renderer),
                store,
                Arc::new(JsonRecordStore::new(&opts.data_dir)),
                settings.folders.clone(),
            );
            if show_progress {
                coordinator = coordinator.with_observer(CliObserver::new());
            }

            match run_storage_command(&coordinator, command).await {
                Ok((response, stats)) => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&response)
                            .context("Failed to serialise response")?
                    );
                    if !opts.quiet {
                        print_summary(&stats);
                    }
                    Ok(())
                }
                Err(e) => {
                    let (status, body) = error_response(&e);
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&body).context("Failed to serialise error")?
                    );
                    Err(anyhow::Error::new(e).context(format!("Request failed ({status})")))
                }
            }
        }
    }
}

/// Map CLI args to `PipelineConfig`.
fn build_config(opts: &GlobalOpts) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_rendered_pixels(opts.max_pixels)
        .jpeg_quality(opts.jpeg_quality)
        .render_timeout_secs(opts.render_timeout)
        .upload_timeout_secs(opts.upload_timeout)
        .upload_concurrency(opts.concurrency);
    if let Some(ref dir) = opts.staging_dir {
        builder = builder.staging_dir(dir);
    }
    if let Some(ref lib) = opts.pdfium_lib {
        builder = builder.pdfium_lib_path(lib);
    }
    builder.build().context("Invalid configuration")
}

async fn run_storage_command(
    coordinator: &AssetCoordinator,
    command: Command,
) -> Result<(ApiResponse, LifecycleStats), AssetError> {
    match command {
        Command::Resume(ResumeCommand::Upload { owner, pdf }) => {
            let file = IncomingFile::from_path(&pdf).await?;
            let out = coordinator.replace_resume(&owner, file).await?;
            Ok((ApiResponse::resume_uploaded(&out.value), out.stats))
        }
        Command::Resume(ResumeCommand::Show { owner }) => {
            let record = coordinator.get_resume(&owner).await?;
            Ok((ApiResponse::resume(&record), LifecycleStats::default()))
        }
        Command::Resume(ResumeCommand::Delete { owner }) => {
            let stats = coordinator.delete_resume(&owner).await?;
            Ok((ApiResponse::resume_deleted(), stats))
        }
        Command::Image(ImageCommand::Set { slot, owner, file }) => {
            let file = IncomingFile::from_path(&file).await?;
            match slot {
                Slot::Profile => {
                    let out = coordinator.replace_profile_image(&owner, file).await?;
                    Ok((ApiResponse::profile_image(&owner, &out.value), out.stats))
                }
                Slot::Blog => {
                    let out = coordinator.replace_featured_image(&owner, file).await?;
                    Ok((ApiResponse::featured_image(&owner, &out.value), out.stats))
                }
            }
        }
        Command::Image(ImageCommand::Remove { slot, owner }) => {
            let stats = match slot {
                Slot::Profile => coordinator.remove_profile_image(&owner).await?,
                Slot::Blog => coordinator.remove_featured_image(&owner).await?,
            };
            Ok((ApiResponse::removed(slot.into()), stats))
        }
        Command::Project(ProjectCommand::AddImages { project, files }) => {
            let mut incoming = Vec::with_capacity(files.len());
            for path in &files {
                incoming.push(IncomingFile::from_path(path).await?);
            }
            let out = coordinator.add_project_images(&project, incoming).await?;
            Ok((ApiResponse::project_images(&project, &out.value), out.stats))
        }
        Command::Project(ProjectCommand::RemoveImage {
            project,
            storage_id,
        }) => {
            let out = coordinator
                .remove_project_image(&project, &storage_id)
                .await?;
            Ok((ApiResponse::project_images(&project, &out.value), out.stats))
        }
        Command::Project(ProjectCommand::Purge { project }) => {
            let stats = coordinator.delete_project_assets(&project).await?;
            Ok((ApiResponse::removed(AssetKind::ProjectImages), stats))
        }
        Command::Account(AccountCommand::Purge {
            user,
            projects,
            blogs,
        }) => {
            let stats = coordinator.purge_owner(&user, &projects, &blogs).await?;
            Ok((ApiResponse::new(200, "Account assets deleted successfully"), stats))
        }
        Command::Inspect { .. } | Command::Render { .. } => Err(AssetError::Internal(
            "local command routed to storage".into(),
        )),
    }
}

/// Validate and render a PDF into `out` without touching storage.
async fn render_local(
    config: &PipelineConfig,
    pdf: &std::path::Path,
    out: &std::path::Path,
    quiet: bool,
) -> Result<()> {
    let file = IncomingFile::from_path(pdf)
        .await
        .with_context(|| format!("Failed to read {}", pdf.display()))?;
    validate_upload(&file, UploadKind::Document, config).context("Rejected upload")?;
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("Failed to create {}", out.display()))?;

    let renderer = PdfiumRenderer::new(config);
    let cancel = CancelFlag::new();
    let rendered = run_with_deadline(
        config.render_timeout(),
        &cancel,
        renderer.render(pdf, out, cancel.clone()),
    )
    .await
    .into_result(|| AssetError::ConversionTimeout {
        secs: config.render_timeout_secs,
    })
    .context("Render failed")?;

    for path in &rendered.page_paths {
        println!("{}", path.display());
    }
    if !quiet {
        eprintln!(
            "{} {} pages  →  {}",
            green("✔"),
            bold(&rendered.page_count.to_string()),
            bold(&out.display().to_string())
        );
    }
    Ok(())
}

fn print_summary(stats: &LifecycleStats) {
    let tick = if stats.cleanup_failures == 0 {
        green("✔")
    } else {
        red("⚠")
    };
    eprintln!(
        "{}  {} uploaded  {} previous deleted  {} left behind  {}",
        tick,
        stats.uploaded,
        stats.previous_deleted,
        stats.cleanup_failures,
        dim(&format!("{}ms", stats.total_duration_ms)),
    );
}
