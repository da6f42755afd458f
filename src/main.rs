//! pfs - browse and reorganize a flat object store as a filesystem.
//!
//! Usage:
//!   pfs ls [PATH]               List a folder
//!   pfs tree [PATH]             Show the folder tree
//!   pfs mv SRC DEST             Move a file or folder
//!   pfs rename PATH NAME        Rename in place
//!   pfs cp SRC DEST             Copy a file or folder
//!   pfs rm PATH...              Delete files and folders
//!   pfs mkdir PATH              Create a folder
//!   pfs upload FILE... [--to]   Upload local files in chunks
//!   pfs find QUERY [PATH]       Search names
//!
//! The store is a local directory (`--root`); every key is a path under it.

mod local_store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Context, Result, bail, eyre};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;

use prefixfs_core::{StorageObject, VfsConfig, VfsPath};
use prefixfs_ops::{MoveEngine, OPERATION_CHANNEL_SIZE, OperationComplete, OperationProgress};
use prefixfs_tree::{SortDirection, SortKey, SortOrder, TreeCache, TreeView};
use prefixfs_upload::{LocalFile, UploadCheckpoint, UploadError, UploadPipeline, UploadStatus};

use crate::local_store::LocalStore;

/// Suffix of the checkpoint file written next to an unfinished upload.
const CHECKPOINT_SUFFIX: &str = ".pfs-upload";

#[derive(Parser)]
#[command(
    name = "pfs",
    version,
    about = "Browse and reorganize a flat object store as a filesystem",
    long_about = "pfs treats every key of an object store as a path and folders as \
                  shared prefixes. Moves, copies and deletes of whole folders are \
                  expanded into per-key requests; uploads are sent in resumable chunks."
)]
struct Cli {
    /// Directory backing the store
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// TOML file with engine settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List a folder
    Ls {
        /// Folder to list (defaults to the root)
        #[arg(default_value = "")]
        path: String,

        /// Sort key
        #[arg(short, long, default_value = "name")]
        sort: SortArg,

        /// Reverse the sort order
        #[arg(short = 'R', long)]
        reverse: bool,

        /// Only show names containing this text
        #[arg(short, long)]
        filter: Option<String>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the folder tree
    Tree {
        #[arg(default_value = "")]
        path: String,

        /// Maximum depth to load and display
        #[arg(short, long, default_value = "3")]
        depth: usize,
    },

    /// Move a file or folder (into DEST if it is an existing folder)
    Mv { from: String, to: String },

    /// Rename a file or folder in place
    Rename { path: String, name: String },

    /// Copy a file or folder (into DEST if it is an existing folder)
    Cp { from: String, to: String },

    /// Delete files and folders
    Rm {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Create a folder
    Mkdir { path: String },

    /// Upload local files
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination folder
        #[arg(short, long, default_value = "")]
        to: String,

        /// Continue from checkpoints left by an interrupted upload
        #[arg(long)]
        resume: bool,
    },

    /// Search names beneath a folder
    Find {
        query: String,

        #[arg(default_value = "")]
        path: String,

        /// How many folder levels to search
        #[arg(short, long, default_value = "8")]
        depth: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Size,
    Date,
    Type,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortKey::Name,
            SortArg::Size => SortKey::Size,
            SortArg::Date => SortKey::Modified,
            SortArg::Type => SortKey::Type,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_logging();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => VfsConfig::load(path).wrap_err("Invalid config")?,
        None => VfsConfig::default(),
    };
    let store = LocalStore::open(&cli.root)
        .wrap_err_with(|| format!("Cannot open {}", cli.root.display()))?;
    let cache = Arc::new(TreeCache::new(Arc::new(store)));

    match cli.command {
        Command::Ls {
            path,
            sort,
            reverse,
            filter,
            format,
        } => {
            let direction = if reverse {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            let view = TreeView::new(SortOrder::new(sort.into(), direction));
            run_ls(&cache, &parse_path(&path)?, view, filter.as_deref(), format).await?;
        }
        Command::Tree { path, depth } => {
            run_tree(&cache, &parse_path(&path)?, depth).await?;
        }
        Command::Mv { from, to } => {
            run_transfer(&cache, config, &from, &to, Transfer::Move).await?;
        }
        Command::Rename { path, name } => {
            let item = resolve(&cache, &path).await?;
            let engine = MoveEngine::new(Arc::clone(&cache), config);
            report(engine.rename(&item.key, &name).await?)?;
        }
        Command::Cp { from, to } => {
            run_transfer(&cache, config, &from, &to, Transfer::Copy).await?;
        }
        Command::Rm { paths } => {
            let mut keys = Vec::with_capacity(paths.len());
            for path in &paths {
                keys.push(resolve(&cache, path).await?.key);
            }
            let (engine, progress) = engine_with_progress(&cache, config);
            let complete = engine.remove_many(&keys).await;
            drop(engine);
            progress.await?;
            report(complete)?;
        }
        Command::Mkdir { path } => {
            let engine = MoveEngine::new(Arc::clone(&cache), config);
            report(engine.create_folder(&parse_path(&path)?).await?)?;
        }
        Command::Upload { files, to, resume } => {
            run_upload(&cache, config, &files, &parse_path(&to)?, resume).await?;
        }
        Command::Find { query, path, depth } => {
            let root = parse_path(&path)?;
            load_depth(&cache, &root, depth).await?;
            let hits = TreeView::default().search(&cache, &root, &query);
            if hits.is_empty() {
                eprintln!("No matches for '{query}'");
            }
            for node in hits {
                let marker = if node.is_folder { "/" } else { "" };
                println!("{}{marker}", node.path);
            }
        }
    }

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("PREFIXFS_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Parse a user-supplied path, tolerating leading and trailing slashes.
fn parse_path(raw: &str) -> Result<VfsPath> {
    VfsPath::parse(raw.trim_matches('/')).wrap_err_with(|| format!("Invalid path '{raw}'"))
}

/// Find the object a path names.
async fn resolve(cache: &TreeCache, raw: &str) -> Result<StorageObject> {
    let path = parse_path(raw)?;
    let Some(parent) = path.parent() else {
        bail!("The root folder cannot be used here");
    };
    cache
        .lookup(&parent, path.name())
        .await?
        .ok_or_else(|| eyre!("'{raw}': no such file or folder"))
}

/// Whether `path` names an existing folder (the root always does).
async fn is_folder(cache: &TreeCache, path: &VfsPath) -> Result<bool> {
    match path.parent() {
        None => Ok(true),
        Some(parent) => Ok(cache
            .lookup(&parent, path.name())
            .await?
            .is_some_and(|o| o.is_folder)),
    }
}

/// Load listings breadth-first down to `depth` levels below `root`.
async fn load_depth(cache: &TreeCache, root: &VfsPath, depth: usize) -> Result<()> {
    let mut frontier = vec![root.clone()];
    for _ in 0..depth {
        let mut next = Vec::new();
        for path in frontier {
            next.extend(
                cache
                    .load_children(&path)
                    .await?
                    .into_iter()
                    .filter(|n| n.is_folder)
                    .map(|n| n.path),
            );
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }
    Ok(())
}

async fn run_ls(
    cache: &TreeCache,
    path: &VfsPath,
    view: TreeView,
    filter: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    cache.load_children(path).await?;
    let nodes = view.children(cache, path, filter);

    match format {
        OutputFormat::Text => {
            for node in &nodes {
                let size = if node.is_folder {
                    "-".to_string()
                } else {
                    format_size(node.size)
                };
                let marker = if node.is_folder { "/" } else { "" };
                println!(
                    "{:>10}  {}  {}{marker}",
                    size,
                    node.last_modified.format("%Y-%m-%d %H:%M"),
                    node.name
                );
            }
            eprintln!("{} item(s), sorted by {}", nodes.len(), view.order.short_label());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&nodes)?);
        }
    }
    Ok(())
}

async fn run_tree(cache: &TreeCache, root: &VfsPath, depth: usize) -> Result<()> {
    load_depth(cache, root, depth).await?;
    let view = TreeView::default();
    println!("{root}");
    print_children(cache, &view, root, 1, depth);
    Ok(())
}

fn print_children(cache: &TreeCache, view: &TreeView, path: &VfsPath, depth: usize, max_depth: usize) {
    if depth > max_depth {
        return;
    }
    for node in view.children(cache, path, None) {
        let indent = "  ".repeat(depth);
        if node.is_folder {
            println!("{indent}▼ {}/", node.name);
            print_children(cache, view, &node.path, depth + 1, max_depth);
        } else {
            println!("{indent}  {} ({})", node.name, format_size(node.size));
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Transfer {
    Move,
    Copy,
}

async fn run_transfer(
    cache: &Arc<TreeCache>,
    config: VfsConfig,
    from: &str,
    to: &str,
    transfer: Transfer,
) -> Result<()> {
    let item = resolve(cache, from).await?;
    let dest = parse_path(to)?;
    let dst_key = if is_folder(cache, &dest).await? {
        dest.join(item.name())?.to_key(item.is_folder)
    } else {
        dest.to_key(item.is_folder)
    };

    let (engine, progress) = engine_with_progress(cache, config);
    let result = match transfer {
        Transfer::Move => engine.move_key(&item.key, &dst_key).await,
        Transfer::Copy => engine.copy(&item.key, &dst_key).await,
    };
    drop(engine);
    progress.await?;
    report(result?)
}

/// An engine whose progress is printed to stderr until the engine is dropped.
fn engine_with_progress(
    cache: &Arc<TreeCache>,
    config: VfsConfig,
) -> (MoveEngine, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<OperationProgress>(OPERATION_CHANNEL_SIZE);
    let printer = tokio::spawn(async move {
        while let Some(progress) = rx.recv().await {
            if let Some(key) = &progress.current_key {
                eprintln!(
                    "[{:>3.0}%] {} {key}",
                    progress.percentage(),
                    progress.operation_type
                );
            }
        }
    });
    (MoveEngine::new(Arc::clone(cache), config).with_progress(tx), printer)
}

fn report(complete: OperationComplete) -> Result<()> {
    for error in &complete.errors {
        eprintln!("  {}: {}", error.key, error.message);
    }
    if complete.is_success() {
        println!("{}", complete.summary());
        Ok(())
    } else {
        Err(eyre!(complete.summary()))
    }
}

fn checkpoint_path(file: &Path) -> PathBuf {
    let mut path = file.as_os_str().to_owned();
    path.push(CHECKPOINT_SUFFIX);
    PathBuf::from(path)
}

async fn run_upload(
    cache: &Arc<TreeCache>,
    config: VfsConfig,
    files: &[PathBuf],
    dest: &VfsPath,
    resume: bool,
) -> Result<()> {
    let pipeline = UploadPipeline::new(Arc::clone(cache), config);
    let mut progress = pipeline.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match progress.recv().await {
                Ok(update) => eprintln!(
                    "[{:>3.0}%] upload #{} {} of {}",
                    update.progress_percent,
                    update.task_id,
                    format_size(update.bytes_sent),
                    format_size(update.total_bytes)
                ),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut checkpoints = HashMap::new();
    for file in files {
        let source = Arc::new(
            LocalFile::open(file)
                .await
                .wrap_err_with(|| format!("Cannot read {}", file.display()))?,
        );
        let saved = checkpoint_path(file);
        let previous = if resume {
            UploadCheckpoint::load(&saved).await?
        } else {
            None
        };
        let task = match previous {
            Some(checkpoint) => pipeline.restore(checkpoint, source)?,
            None => pipeline.enqueue(source, dest)?,
        };
        checkpoints.insert(task.id, saved);
    }

    let tasks = tokio::select! {
        tasks = pipeline.wait_all() => tasks,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted, saving checkpoints...");
            for task in pipeline.tasks() {
                if !task.status.is_terminal() {
                    // Already settled tasks refuse; nothing to do for them.
                    let _ = pipeline.suspend(task.id);
                }
            }
            pipeline.wait_all().await
        }
    };
    printer.abort();

    let mut failed = 0;
    for task in &tasks {
        let Some(saved) = checkpoints.get(&task.id) else {
            continue;
        };
        match (task.status, &task.error) {
            (UploadStatus::Completed, _) => {
                UploadCheckpoint::delete(saved).await?;
                println!("Uploaded {} ({})", task.key, format_size(task.total_bytes));
            }
            (_, Some(error @ UploadError::ResumeUnsupported { .. })) => {
                failed += 1;
                UploadCheckpoint::delete(saved).await?;
                eprintln!("{error}; upload again without --resume");
            }
            (status, error) => {
                failed += 1;
                pipeline.checkpoint(task.id)?.save(saved).await?;
                match error {
                    Some(error) => eprintln!("{}: {error}", task.key),
                    None => eprintln!("{}: {status} at {:.0}%", task.key, task.progress),
                }
            }
        }
    }

    if failed > 0 {
        bail!("{failed} upload(s) did not finish; rerun with --resume to continue");
    }
    Ok(())
}

/// Format size in human-readable form.
fn format_size(bytes: u64) -> String {
    humansize::format_size(bytes, humansize::BINARY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from(["pfs", "--root", "/tmp", "mv", "photos/a.jpg", "archive"]).unwrap();
        assert_eq!(cli.root, PathBuf::from("/tmp"));
        assert!(matches!(cli.command, Command::Mv { .. }));

        assert!(Cli::try_parse_from(["pfs", "rm"]).is_err());
    }

    #[test]
    fn test_parse_path_trims_slashes() {
        assert_eq!(parse_path("/photos/2024/").unwrap().as_str(), "photos/2024");
        assert!(parse_path("").unwrap().is_root());
        assert!(parse_path("a//b").is_err());
    }

    #[test]
    fn test_checkpoint_path() {
        assert_eq!(
            checkpoint_path(Path::new("/data/movie.mkv")),
            PathBuf::from("/data/movie.mkv.pfs-upload")
        );
    }

    #[tokio::test]
    async fn test_transfer_into_existing_folder() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("archive")).unwrap();
        std::fs::create_dir_all(dir.path().join("photos")).unwrap();
        std::fs::write(dir.path().join("photos/a.jpg"), b"jpeg").unwrap();
        let store = LocalStore::open(dir.path()).unwrap();
        let cache = Arc::new(TreeCache::new(Arc::new(store)));

        run_transfer(&cache, VfsConfig::default(), "photos", "archive", Transfer::Copy)
            .await
            .unwrap();
        assert!(dir.path().join("archive/photos/a.jpg").is_file());

        run_transfer(&cache, VfsConfig::default(), "photos/a.jpg", "photos/b.jpg", Transfer::Move)
            .await
            .unwrap();
        assert!(dir.path().join("photos/b.jpg").is_file());
        assert!(!dir.path().join("photos/a.jpg").exists());
    }

    #[tokio::test]
    async fn test_upload_writes_file_and_clears_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let file = local.path().join("data.bin");
        std::fs::write(&file, vec![7u8; 100]).unwrap();
        std::fs::write(checkpoint_path(&file), b"stale").unwrap();

        let store = LocalStore::open(dir.path()).unwrap();
        let cache = Arc::new(TreeCache::new(Arc::new(store)));
        let config = VfsConfig::builder().chunk_size(16u64).build().unwrap();
        run_upload(&cache, config, &[file.clone()], &VfsPath::parse("inbox").unwrap(), false)
            .await
            .unwrap();

        assert_eq!(std::fs::read(dir.path().join("inbox/data.bin")).unwrap(), vec![7u8; 100]);
        assert!(!checkpoint_path(&file).exists());
    }
}
