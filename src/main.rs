use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use library_backend::{
    config::{Config, StorageBackend},
    object_store as obj,
    storage::{BookSearch, Database},
    FileStorage, Library, NewBook, ObjectReference,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Library catalog and file storage tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a file and print its reference URL
    Upload {
        path: PathBuf,
        /// Key prefix, e.g. `users/profile/`
        #[arg(long)]
        folder: Option<String>,
        /// Guessed from the file name when omitted
        #[arg(long, default_value = "")]
        content_type: String,
    },
    /// Download the object behind a reference URL
    Download { reference: String, output: PathBuf },
    /// Check whether the object behind a reference URL exists
    Exists { reference: String },
    /// Delete one or more objects (batch request for more than one)
    Delete {
        #[arg(required = true)]
        references: Vec<String>,
    },
    /// Book catalog operations
    #[command(subcommand)]
    Book(BookCommand),
}

#[derive(Subcommand, Debug)]
enum BookCommand {
    Add {
        title: String,
        author: String,
        isbn: String,
        price: u64,
        /// Publish date, YYYY-MM-DD
        #[arg(long)]
        published: Option<NaiveDate>,
    },
    FindAuthor { author: String },
    FindIsbn { isbn: String },
    /// Books above a price published after a date
    Recent { min_price: u64, after: NaiveDate },
    Search {
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        min_price: Option<u64>,
        #[arg(long)]
        max_price: Option<u64>,
    },
    /// Upload a cover image for a book
    Cover {
        id: String,
        path: PathBuf,
        #[arg(long, default_value = "")]
        content_type: String,
    },
    Remove {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    match log_format.to_lowercase().as_str() {
        "gcp" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_stackdriver::layer())
                .init();
        }
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_span_list(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load()?;
    let files = FileStorage::new(object_store(&config)?, config.max_upload_size);

    match cli.command {
        Command::Upload {
            path,
            folder,
            content_type,
        } => {
            let (data, name) = read_upload(&path).await?;
            let reference = match folder {
                Some(folder) => {
                    files
                        .upload_to_folder(data, &content_type, &name, &folder)
                        .await?
                }
                None => files.upload(data, &content_type, &name).await?,
            };
            println!("{reference}");
        }
        Command::Download { reference, output } => {
            let reference: ObjectReference = reference.parse()?;
            let data = files.download(&reference).await?;
            tokio::fs::write(&output, &data)
                .await
                .with_context(|| format!("writing {}", output.display()))?;
            info!(bytes = data.len(), output = %output.display(), "Download complete");
        }
        Command::Exists { reference } => {
            let reference: ObjectReference = reference.parse()?;
            println!("{}", files.exists(&reference).await?);
        }
        Command::Delete { references } => {
            let references = references
                .iter()
                .map(|r| r.parse())
                .collect::<Result<Vec<ObjectReference>, _>>()?;
            if let [reference] = references.as_slice() {
                files.delete(reference).await?;
            } else {
                for outcome in files.delete_batch(&references).await? {
                    match outcome {
                        obj::DeleteOutcome::Deleted { key } => println!("deleted\t{key}"),
                        obj::DeleteOutcome::Failed { key, code, message } => {
                            println!("failed\t{key}\t{code}: {message}")
                        }
                    }
                }
            }
        }
        Command::Book(command) => {
            let db = Database::open(&config.data_dir)?;
            info!("Database opened at: {}", config.data_dir);
            run_book_command(Library::new(db, files), command).await?;
        }
    }

    Ok(())
}

async fn run_book_command(library: Library, command: BookCommand) -> anyhow::Result<()> {
    match command {
        BookCommand::Add {
            title,
            author,
            isbn,
            price,
            published,
        } => {
            let book = library.add_book(NewBook {
                title,
                author,
                isbn,
                price,
                published_date: published,
            })?;
            print_json(&book)?;
        }
        BookCommand::FindAuthor { author } => {
            print_json(&library.db().find_by_author(&author)?)?;
        }
        BookCommand::FindIsbn { isbn } => match library.db().find_by_isbn(&isbn)? {
            Some(book) => print_json(&book)?,
            None => anyhow::bail!("no book with ISBN {isbn}"),
        },
        BookCommand::Recent { min_price, after } => {
            print_json(&library.db().find_expensive_recent_books(min_price, after)?)?;
        }
        BookCommand::Search {
            author,
            min_price,
            max_price,
        } => {
            print_json(&library.search(&BookSearch {
                author,
                min_price,
                max_price,
            })?)?;
        }
        BookCommand::Cover {
            id,
            path,
            content_type,
        } => {
            let (data, name) = read_upload(&path).await?;
            let reference = library.set_cover(&id, data, &content_type, &name).await?;
            println!("{reference}");
        }
        BookCommand::Remove { ids } => {
            if let [id] = ids.as_slice() {
                if !library.remove_book(id).await? {
                    anyhow::bail!("no book with id {id}");
                }
            } else {
                let outcomes = library.remove_books(&ids).await?;
                let failed = outcomes.iter().filter(|o| !o.is_deleted()).count();
                info!(books = ids.len(), covers = outcomes.len(), failed, "Books removed");
            }
        }
    }
    Ok(())
}

/// Build the configured object store backend once for the process.
fn object_store(config: &Config) -> anyhow::Result<Arc<dyn obj::ObjectStore>> {
    let store: Arc<dyn obj::ObjectStore> = match config.storage.backend {
        StorageBackend::Local => {
            let store = obj::LocalStore::new(
                &config.storage.local_storage_path,
                &config.storage.local_public_url,
            )?;
            info!(
                "Using local storage backend at: {}",
                config.storage.local_storage_path
            );
            Arc::new(store)
        }
        StorageBackend::S3 => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .context("S3 settings missing for STORAGE_BACKEND=s3")?;
            let store = obj::S3Store::new(s3)?;
            info!(bucket = store.bucket(), region = %s3.region, "Using S3 storage backend");
            Arc::new(store)
        }
    };
    Ok(store)
}

async fn read_upload(path: &Path) -> anyhow::Result<(Bytes, String)> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((Bytes::from(data), name))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
