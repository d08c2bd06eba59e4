use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use folio_core::{
    Argb, Command, DocumentReader, DocumentSession, EngineConfig, NormalizedRect,
    PersistenceCoordinator,
};
use folio_pdf::{LopdfReader, LopdfWriter};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Reorder, highlight, bookmark and search PDF pages"
)]
struct Args {
    /// Configuration file (defaults to folio.toml in the config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Debug, Subcommand)]
enum CliCommand {
    /// Print every match of QUERY in the text layer
    Search { file: PathBuf, query: String },
    /// Rearrange pages; ORDER lists every page once, 1-based
    Reorder {
        file: PathBuf,
        #[arg(long, value_delimiter = ',', required = true)]
        order: Vec<usize>,
        /// Write to this path instead of replacing FILE
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Highlight a rectangle given as LEFT,TOP,RIGHT,BOTTOM fractions of the page
    Highlight {
        file: PathBuf,
        #[arg(long)]
        page: usize,
        #[arg(long, value_parser = parse_rect)]
        rect: NormalizedRect,
        /// #AARRGGBB or #RRGGBB
        #[arg(long)]
        color: Option<Argb>,
        /// Rotation the rectangle was measured at, in degrees
        #[arg(long, default_value_t = 0.0)]
        rotation: f32,
    },
    Bookmarks {
        #[command(subcommand)]
        action: BookmarkAction,
    },
    /// Page count, metadata and annotation counts
    Info { file: PathBuf },
}

#[derive(Debug, Subcommand)]
enum BookmarkAction {
    List {
        file: PathBuf,
    },
    Add {
        file: PathBuf,
        #[arg(long)]
        page: usize,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        note: String,
    },
    Remove {
        file: PathBuf,
        #[arg(long)]
        page: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("org", "folio", "folio");
    let _log_guard = init_logging(project_dirs.as_ref())?;
    let config = load_config(args.config.as_deref(), project_dirs.as_ref())?;

    match args.command {
        CliCommand::Search { file, query } => search(&file, query, config).await,
        CliCommand::Reorder {
            file,
            order,
            output,
        } => reorder(&file, &order, output.as_deref(), config).await,
        CliCommand::Highlight {
            file,
            page,
            rect,
            color,
            rotation,
        } => {
            let mut session = open(&LopdfReader::new(&config), &file, config).await?;
            let display_index = zero_based(page)?;
            session.apply(Command::Rotate { degrees: rotation })?;
            session.apply(Command::AddHighlight {
                display_index,
                rects: vec![rect],
                color,
            })?;
            session.save_changes().await?;
            println!("highlighted page {page}");
            Ok(())
        }
        CliCommand::Bookmarks { action } => bookmarks(action, config).await,
        CliCommand::Info { file } => {
            let session = open(&LopdfReader::new(&config), &file, config).await?;
            let metadata = &session.info().metadata;
            println!("pages: {}", session.page_count());
            println!("title: {}", metadata.title.as_deref().unwrap_or("-"));
            println!("author: {}", metadata.author.as_deref().unwrap_or("-"));
            println!("bookmarks: {}", session.bookmarks().len());
            println!("highlights: {}", session.highlights().total_marks());
            Ok(())
        }
    }
}

async fn open<R: DocumentReader + ?Sized>(
    reader: &R,
    file: &Path,
    config: EngineConfig,
) -> Result<DocumentSession> {
    let coordinator = Arc::new(PersistenceCoordinator::new(
        Arc::new(LopdfWriter::new()),
        &config,
    )?);
    DocumentSession::open_with(reader, file, coordinator, config)
        .await
        .with_context(|| format!("failed to open {:?}", file))
}

#[cfg(feature = "pdfium")]
async fn search(file: &Path, query: String, config: EngineConfig) -> Result<()> {
    let reader = folio_pdf::PdfiumReader::new(&config)?;
    let mut session = open(&reader, file, config).await?;
    session.apply(Command::Search { query })?;
    for found in session.search().matches() {
        println!("page {}: {}", found.page_index + 1, found.text().trim());
    }
    println!("{} matches", session.search().matches().len());
    Ok(())
}

#[cfg(not(feature = "pdfium"))]
async fn search(_file: &Path, _query: String, _config: EngineConfig) -> Result<()> {
    bail!("text search needs a build with the `pdfium` feature")
}

async fn reorder(
    file: &Path,
    order: &[usize],
    output: Option<&Path>,
    config: EngineConfig,
) -> Result<()> {
    let order = order
        .iter()
        .map(|&page| zero_based(page))
        .collect::<Result<Vec<_>>>()?;
    let mut session = open(&LopdfReader::new(&config), file, config).await?;
    session.apply(Command::SetOrder { order })?;

    let written = match output {
        Some(destination) => session.export_to(destination).await?,
        None => session.save_changes().await?,
    };
    info!(written, "reordered");
    println!("wrote {written} pages");
    Ok(())
}

async fn bookmarks(action: BookmarkAction, config: EngineConfig) -> Result<()> {
    let reader = LopdfReader::new(&config);
    match action {
        BookmarkAction::List { file } => {
            let session = open(&reader, &file, config).await?;
            for record in session.bookmarks().iter() {
                if record.note.is_empty() {
                    println!("page {}: {}", record.page_index + 1, record.title);
                } else {
                    println!(
                        "page {}: {} ({})",
                        record.page_index + 1,
                        record.title,
                        record.note
                    );
                }
            }
        }
        BookmarkAction::Add {
            file,
            page,
            title,
            note,
        } => {
            let mut session = open(&reader, &file, config).await?;
            session.apply(Command::AddBookmark {
                display_index: zero_based(page)?,
                title,
                note,
            })?;
            session.save_changes().await?;
            println!("bookmarked page {page}");
        }
        BookmarkAction::Remove { file, page } => {
            let mut session = open(&reader, &file, config).await?;
            let display_index = zero_based(page)?;
            if !session.bookmarks().contains(display_index) {
                bail!("page {page} has no bookmark");
            }
            session.apply(Command::RemoveBookmark { display_index })?;
            session.save_changes().await?;
            println!("removed bookmark from page {page}");
        }
    }
    Ok(())
}

fn zero_based(page: usize) -> Result<usize> {
    page.checked_sub(1)
        .ok_or_else(|| anyhow!("page numbers start at 1"))
}

fn parse_rect(value: &str) -> Result<NormalizedRect, String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<f32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| format!("invalid number in {value:?}: {err}"))?;
    let [left, top, right, bottom] = parts[..] else {
        return Err(format!("expected LEFT,TOP,RIGHT,BOTTOM, got {value:?}"));
    };
    Ok(NormalizedRect::new(left, top, right, bottom).clamp())
}

fn load_config(
    explicit: Option<&Path>,
    project_dirs: Option<&ProjectDirs>,
) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        return EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {:?}", path));
    }
    let Some(dirs) = project_dirs else {
        return Ok(EngineConfig::default());
    };
    let path = dirs.config_dir().join("folio.toml");
    debug!(path = %path.display(), "looking for config");
    EngineConfig::load_or_default(&path)
        .with_context(|| format!("failed to load config from {:?}", path))
}

fn init_logging(project_dirs: Option<&ProjectDirs>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let log_dir = project_dirs.map(|dirs| dirs.data_local_dir().join("logs"));
    let (file_layer, guard) = match log_dir {
        Some(dir) if fs::create_dir_all(&dir).is_ok() => {
            let file_appender = tracing_appender::rolling::never(dir, "folio.log");
            let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer);
            (Some(layer), Some(guard))
        }
        _ => (None, None),
    };
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_argument_is_parsed_and_clamped() {
        let rect = parse_rect("0.1, 0.2,0.5,1.4").unwrap();
        assert_eq!(rect, NormalizedRect::new(0.1, 0.2, 0.5, 1.0));
        assert!(parse_rect("0.1,0.2,0.5").is_err());
        assert!(parse_rect("a,b,c,d").is_err());
    }

    #[test]
    fn pages_are_one_based() {
        assert_eq!(zero_based(1).unwrap(), 0);
        assert!(zero_based(0).is_err());
    }

    #[test]
    fn arguments_parse() {
        let args = Args::try_parse_from([
            "folio", "reorder", "doc.pdf", "--order", "3,1,2", "--output", "out.pdf",
        ])
        .unwrap();
        match args.command {
            CliCommand::Reorder { order, output, .. } => {
                assert_eq!(order, vec![3, 1, 2]);
                assert_eq!(output, Some(PathBuf::from("out.pdf")));
            }
            other => panic!("unexpected command {other:?}"),
        }

        let args = Args::try_parse_from([
            "folio", "highlight", "doc.pdf", "--page", "2", "--rect", "0,0,0.5,0.1", "--color",
            "#FF00FF00",
        ])
        .unwrap();
        match args.command {
            CliCommand::Highlight { page, color, rotation, .. } => {
                assert_eq!(page, 2);
                assert_eq!(color, Some(Argb(0xFF00_FF00)));
                assert_eq!(rotation, 0.0);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
