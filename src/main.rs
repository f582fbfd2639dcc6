use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use sift::backend::Backend;
use sift::config::{BackendKind, Config};
use sift::engine::{FilterSpec, Selection};
use sift::model::{CategoryId, FeedId, ItemId, NewFeed};
use sift::remote::RemoteClient;
use sift::session::Session;
use sift::storage::{Database, DatabaseError, NewItem};

/// Largest ingest file accepted (16 MB).
const MAX_INGEST_SIZE: u64 = 16 * 1024 * 1024;

/// Get the config directory path (~/.config/sift/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("sift"))
}

#[derive(Parser, Debug)]
#[command(
    name = "sift",
    about = "Feed aggregation with nested categories and filtered views"
)]
struct Args {
    /// Config file (default: ~/.config/sift/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Use the remote service instead of the local store
    #[arg(long)]
    remote: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the category tree with feed, item and unread counts
    Tree,

    /// Manage categories
    Category {
        #[command(subcommand)]
        action: CategoryCommand,
    },

    /// List feeds, optionally only those in one category
    Feeds {
        #[arg(long)]
        category: Option<i64>,
    },

    /// Manage feeds
    Feed {
        #[command(subcommand)]
        action: FeedCommand,
    },

    /// List items for a category, a feed or everything
    Items {
        #[arg(long, conflicts_with = "feed")]
        category: Option<i64>,
        #[arg(long)]
        feed: Option<i64>,
        /// Only unread items
        #[arg(long)]
        unread: bool,
        /// Case-insensitive match on title or body
        #[arg(long)]
        query: Option<String>,
        /// Only items published on or after this day (YYYY-MM-DD)
        #[arg(long)]
        since: Option<NaiveDate>,
    },

    /// Mark an item read
    Read { id: i64 },

    /// Mark an item unread
    Unread { id: i64 },

    /// File an item under a category
    Assign { category: i64, item: i64 },

    /// Remove an item from a category it was assigned to
    Unassign { category: i64, item: i64 },

    /// Load items for a feed from a JSON array (local store only)
    Ingest { feed: i64, file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum CategoryCommand {
    Add {
        name: String,
        #[arg(long)]
        parent: Option<i64>,
    },
    Rename {
        id: i64,
        name: String,
    },
    /// Move under another category, or to the top level without --parent
    Move {
        id: i64,
        #[arg(long)]
        parent: Option<i64>,
    },
    Rm {
        id: i64,
    },
}

#[derive(Subcommand, Debug)]
enum FeedCommand {
    Add {
        name: String,
        /// RSS/Atom URL
        #[arg(long, conflicts_with_all = ["user", "hashtag"])]
        url: Option<String>,
        /// Follow a social account
        #[arg(long, conflicts_with = "hashtag")]
        user: Option<String>,
        /// Follow a hashtag
        #[arg(long)]
        hashtag: Option<String>,
        #[arg(long)]
        category: Option<i64>,
    },
    Rm {
        id: i64,
    },
    /// Ask the backend to poll the feed now
    Fetch {
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let remote = args.remote || config.backend == BackendKind::Remote;
    if remote {
        if matches!(args.command, Command::Ingest { .. }) {
            anyhow::bail!("ingest writes to the local store; run it without --remote");
        }
        let client = RemoteClient::new(
            &config.api_base_url,
            config.api_token(),
            config.request_timeout(),
        )
        .context("Failed to set up API client")?;
        let mut session = Session::new(client, config.session_options());
        return run(&mut session, args.command).await;
    }

    let db_path = config.database_path(&config_dir);
    let db = open_database(&db_path).await?;

    if let Command::Ingest { feed, file } = &args.command {
        return ingest(&db, FeedId(*feed), file).await;
    }

    let mut session = Session::new(db, config.session_options());
    run(&mut session, args.command).await
}

async fn open_database(db_path: &Path) -> Result<Database> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create data directory {}", parent.display())
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) =
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                {
                    tracing::warn!(
                        path = %parent.display(),
                        error = %e,
                        "Failed to set data directory permissions to 0700"
                    );
                }
            }
        }
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    match Database::open(db_path_str).await {
        Ok(db) => Ok(db),
        Err(DatabaseError::InstanceLocked) => {
            eprintln!(
                "Error: Another instance of sift appears to be running. Please close it and try again."
            );
            std::process::exit(1);
        }
        Err(e) => Err(anyhow::anyhow!("Failed to open database: {}", e)),
    }
}

async fn ingest(db: &Database, feed: FeedId, file: &Path) -> Result<()> {
    let metadata = std::fs::metadata(file)
        .with_context(|| format!("Failed to read ingest file: {}", file.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("Ingest path must be a regular file");
    }
    if metadata.len() > MAX_INGEST_SIZE {
        anyhow::bail!(
            "Ingest file is {} bytes (max {} bytes)",
            metadata.len(),
            MAX_INGEST_SIZE
        );
    }

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read ingest file: {}", file.display()))?;
    let items: Vec<NewItem> =
        serde_json::from_str(&content).context("Ingest file must be a JSON array of items")?;

    let inserted = db
        .upsert_items(feed, &items)
        .await
        .with_context(|| format!("Failed to store items for feed {feed}"))?;
    tracing::info!(feed_id = %feed, received = items.len(), inserted, "Ingest complete");
    println!(
        "Stored {} items ({} new) for feed {}",
        items.len(),
        inserted,
        feed
    );
    Ok(())
}

async fn run<B: Backend>(session: &mut Session<B>, command: Command) -> Result<()> {
    session
        .sync()
        .await
        .context("Failed to load categories, feeds and items")?;

    match command {
        Command::Tree => print_tree(session),
        Command::Category { action } => run_category(session, action).await?,
        Command::Feeds { category } => {
            let feeds = match category {
                Some(id) => session
                    .catalog()
                    .feeds
                    .list_by_category(Some(CategoryId(id))),
                None => session.catalog().feeds.iter().collect(),
            };
            for feed in feeds {
                let location = feed.source_url().unwrap_or("-");
                let category = feed
                    .category_id
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>5}  {:<16} {:<30} category {:<5} {}",
                    feed.id.get(),
                    feed.kind.as_str(),
                    feed.name,
                    category,
                    location
                );
            }
        }
        Command::Feed { action } => run_feed(session, action).await?,
        Command::Items {
            category,
            feed,
            unread,
            query,
            since,
        } => {
            let selection = match (category, feed) {
                (Some(id), _) => Selection::Category(CategoryId(id)),
                (None, Some(id)) => Selection::Feed(FeedId(id)),
                (None, None) => Selection::None,
            };
            let mut filter = FilterSpec::new().unread_only(unread).since(since);
            if let Some(query) = &query {
                filter = filter.text(query);
            }
            print_items(session, selection, &filter);
        }
        Command::Read { id } => {
            session
                .mark_read(ItemId(id))
                .await
                .with_context(|| format!("Failed to mark item {id} read"))?;
        }
        Command::Unread { id } => {
            session
                .mark_unread(ItemId(id))
                .await
                .with_context(|| format!("Failed to mark item {id} unread"))?;
        }
        Command::Assign { category, item } => {
            let assignment = session
                .assign(CategoryId(category), ItemId(item))
                .await
                .context("Failed to assign item")?;
            println!(
                "Assigned item {} to category {} (assignment {})",
                assignment.item_id, assignment.category_id, assignment.id
            );
        }
        Command::Unassign { category, item } => {
            let removed = session
                .unassign(CategoryId(category), ItemId(item))
                .await
                .context("Failed to remove assignment")?;
            if removed == 0 {
                println!("Item {item} was not assigned to category {category}");
            }
        }
        Command::Ingest { .. } => {
            anyhow::bail!("ingest writes to the local store; run it without --remote");
        }
    }
    Ok(())
}

async fn run_category<B: Backend>(session: &mut Session<B>, action: CategoryCommand) -> Result<()> {
    match action {
        CategoryCommand::Add { name, parent } => {
            let id = session
                .create_category(&name, parent.map(CategoryId))
                .await
                .context("Failed to create category")?;
            println!("Created category {id}");
        }
        CategoryCommand::Rename { id, name } => {
            session
                .rename_category(CategoryId(id), &name)
                .await
                .context("Failed to rename category")?;
        }
        CategoryCommand::Move { id, parent } => {
            session
                .move_category(CategoryId(id), parent.map(CategoryId))
                .await
                .context("Failed to move category")?;
        }
        CategoryCommand::Rm { id } => {
            session
                .delete_category(CategoryId(id))
                .await
                .context("Failed to delete category")?;
        }
    }
    Ok(())
}

async fn run_feed<B: Backend>(session: &mut Session<B>, action: FeedCommand) -> Result<()> {
    match action {
        FeedCommand::Add {
            name,
            url,
            user,
            hashtag,
            category,
        } => {
            let request = match (url, user, hashtag) {
                (Some(url), None, None) => NewFeed::rss(name, url),
                (None, Some(user), None) => NewFeed::twitter_user(name, user),
                (None, None, Some(tag)) => NewFeed::twitter_hashtag(name, tag),
                _ => anyhow::bail!("give exactly one of --url, --user or --hashtag"),
            };
            let request = match category {
                Some(id) => request.in_category(CategoryId(id)),
                None => request,
            };
            let feed = session
                .create_feed(request)
                .await
                .context("Failed to add feed")?;
            println!("Created feed {} ({})", feed.id, feed.kind);
        }
        FeedCommand::Rm { id } => {
            session
                .delete_feed(FeedId(id))
                .await
                .context("Failed to delete feed")?;
        }
        FeedCommand::Fetch { id } => {
            let outcome = session
                .fetch_feed(FeedId(id))
                .await
                .with_context(|| format!("Failed to fetch feed {id}"))?;
            println!("Feed {id}: {} new items", outcome.new_items);
        }
    }
    Ok(())
}

fn print_tree<B: Backend>(session: &Session<B>) {
    for row in session.category_rows() {
        println!(
            "{}{} [{}]  feeds {}  items {}  unread {}",
            "  ".repeat(row.depth),
            row.name,
            row.id,
            row.counts.feeds,
            row.counts.items,
            row.counts.unread
        );
    }
}

fn print_items<B: Backend>(session: &mut Session<B>, selection: Selection, filter: &FilterSpec) {
    let view = session.view(selection, filter);
    let catalog = session.catalog();
    for item in &view.items {
        let marker = if catalog.read_state.is_read(item.id) {
            ' '
        } else {
            '*'
        };
        let published = item
            .published_at
            .map(|p| p.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "----------".to_string());
        let feed = catalog.feeds.display_name(item.feed_id).unwrap_or("?");
        println!(
            "{marker} {:>6}  {published}  {:<20}  {}",
            item.id.get(),
            feed,
            item.title
        );
    }
    println!("{} items, {} unread", view.total, view.unread);
}
