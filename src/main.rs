//! Docrepo CLI - inspect and edit an inbox/outbox document store pair

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use docrepo::config::{self, DocrepoConfig};
use docrepo::ui::{self, Icons, TableBuilder};
use docrepo::{
    CollectionSpec, DocumentRepository, EnvKey, Entity, NoKey, OutboxOps, OutboxRepository, StoreContext,
    StoreHandle,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const INBOX_STORE: &str = "Inbox";
const OUTBOX_STORE: &str = "Outbox";
const DEFAULT_COLLECTION: &str = "records";

#[derive(Parser)]
#[command(name = "docrepo")]
#[command(version)]
#[command(about = "Typed document repositories over an embedded store")]
#[command(long_about = r#"
Docrepo keeps records in two stores:
  • Inbox  - the last state synced from a remote source
  • Outbox - local changes waiting to be pushed
Reads merge both, preferring the outbox.

Example usage:
  docrepo init
  docrepo put a1 '{"name":"synced"}'
  docrepo stage a1 '{"name":"edited"}'
  docrepo list --pending
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON instead of human output
    #[arg(long, global = true)]
    json: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Folder holding the store files (overrides config)
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Collection name (overrides config)
    #[arg(long, global = true)]
    collection: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file and create both stores
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Store a synced record in the inbox
    Put {
        id: String,
        /// JSON object with the record fields
        #[arg(default_value = "{}")]
        fields: String,
    },

    /// Stage a local change in the outbox
    Stage {
        id: String,
        /// JSON object with the record fields
        #[arg(default_value = "{}")]
        fields: String,
    },

    /// Show one record, outbox first
    Get { id: String },

    /// List records (merged view by default)
    List {
        /// Only outbox records
        #[arg(long, conflicts_with = "synced")]
        pending: bool,

        /// Only inbox records
        #[arg(long)]
        synced: bool,
    },

    /// Count records in both stores
    Count {
        /// Count each record once even when present in both stores
        #[arg(long)]
        distinct: bool,
    },

    /// Delete a record from both stores
    Delete { id: String },

    /// Drop the inbox collection
    Drop {
        /// Drop the outbox collection instead
        #[arg(long)]
        outbox: bool,
    },

    /// Delete and recreate both stores
    Reset,

    /// Checkpoint both stores and delete their journals
    Teardown,
}

/// Schemaless record keyed by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    id: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Entity for Record {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    fn is_human(self) -> bool {
        self == OutputMode::Human
    }
}

fn emit_success(mode: OutputMode, command: &str, data: Value) -> anyhow::Result<()> {
    if mode.is_human() {
        return Ok(());
    }
    let envelope = json!({ "ok": true, "command": command, "data": data });
    println!("{}", serde_json::to_string_pretty(&envelope)?);
    Ok(())
}

fn emit_error(mode: OutputMode, err: &anyhow::Error) {
    if mode.is_human() {
        ui::error(&format!("{:#}", err));
    } else {
        let envelope = json!({ "ok": false, "error": format!("{:#}", err) });
        println!("{}", envelope);
    }
}

/// Resolved settings: flags over config over defaults
struct Settings {
    config_path: PathBuf,
    database_dir: PathBuf,
    collection: String,
    config: DocrepoConfig,
}

impl Settings {
    fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let config_path = cli.config.clone().unwrap_or_else(config::default_config_path);
        let config = config::load_config(Some(&config_path))?.unwrap_or_default();

        let database_dir = cli
            .dir
            .clone()
            .or_else(|| config.database_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| config::default_database_dir_in(Path::new(".")));
        let collection = cli
            .collection
            .clone()
            .or_else(|| config.collection.clone())
            .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());

        Ok(Self { config_path, database_dir, collection, config })
    }

    fn context(&self) -> StoreContext {
        let context = StoreContext::sqlite(&self.database_dir);
        match &self.config.key_env {
            Some(var) => context.with_keys(Arc::new(EnvKey::new(var).required())),
            None => context.with_keys(Arc::new(NoKey)),
        }
    }

    fn store(&self, context: &StoreContext, name: &str) -> Arc<StoreHandle> {
        Arc::new(StoreHandle::new(name, context.clone()).with_lock_timeout(self.config.lock_timeout()))
    }

    fn repository(&self) -> OutboxRepository<Record> {
        let context = self.context();
        let spec = CollectionSpec::for_entity::<Record>().with_name(&self.collection);
        OutboxRepository::with_spec(
            self.store(&context, INBOX_STORE),
            self.store(&context, OUTBOX_STORE),
            spec,
        )
    }
}

fn parse_record(id: String, fields: &str) -> anyhow::Result<Record> {
    let fields = match serde_json::from_str::<Value>(fields)? {
        Value::Object(map) => map,
        other => anyhow::bail!("fields must be a JSON object, got {}", other),
    };
    if fields.contains_key("id") {
        anyhow::bail!("fields must not contain \"id\"; the record id is {}", id);
    }
    Ok(Record { id, fields })
}

fn render_fields(record: &Record) -> String {
    Value::Object(record.fields.clone()).to_string()
}

fn print_records(records: &[Record], pending: &HashSet<String>) {
    if records.is_empty() {
        println!("{}", ui::dim("(no records)"));
        return;
    }
    let mut table = TableBuilder::new();
    for record in records {
        let source = ui::source_tag(pending.contains(&record.id));
        table.add_row(&record.id, &source, &render_fields(record));
    }
    println!("{}", table.build());
}

async fn pending_ids(repo: &OutboxRepository<Record>) -> anyhow::Result<HashSet<String>> {
    Ok(repo.get_pending().await?.into_iter().map(|r| r.id).collect())
}

async fn run(cli: Cli, mode: OutputMode) -> anyhow::Result<()> {
    let settings = Settings::resolve(&cli)?;

    match cli.command {
        Commands::Init { force } => {
            let mut cfg = settings.config.clone();
            cfg.database_dir = Some(settings.database_dir.to_string_lossy().to_string());
            cfg.collection = Some(settings.collection.clone());
            config::write_config(&settings.config_path, &cfg, force)?;
            config::ensure_db_dir(&settings.database_dir)?;

            let repo = settings.repository();
            repo.initialize().await?;
            tracing::info!("Initialized stores in {}", settings.database_dir.display());

            if mode.is_human() {
                ui::success("Initialized");
                ui::info("Config", &settings.config_path.display().to_string());
                ui::info("Inbox", &repo.inbox().db_path().display().to_string());
                ui::info("Outbox", &repo.outbox().db_path().display().to_string());
            }
            emit_success(
                mode,
                "init",
                json!({
                    "config": settings.config_path,
                    "inbox": repo.inbox().db_path(),
                    "outbox": repo.outbox().db_path(),
                }),
            )?;
        }

        Commands::Put { id, fields } => {
            let record = parse_record(id, &fields)?;
            settings.repository().upsert(Some(&record)).await?;
            if mode.is_human() {
                ui::header(Icons::INBOX, &format!("Stored {} in inbox", record.id));
            }
            emit_success(mode, "put", json!({ "id": record.id }))?;
        }

        Commands::Stage { id, fields } => {
            let record = parse_record(id, &fields)?;
            settings.repository().update_item(&record).await?;
            if mode.is_human() {
                ui::header(Icons::OUTBOX, &format!("Staged {} in outbox", record.id));
            }
            emit_success(mode, "stage", json!({ "id": record.id }))?;
        }

        Commands::Get { id } => {
            let repo = settings.repository();
            let record = repo.get_by_id(&id).await?;
            if mode.is_human() {
                match &record {
                    Some(record) => print_records(std::slice::from_ref(record), &pending_ids(&repo).await?),
                    None => ui::warn(&format!("No record with id {}", id)),
                }
            }
            emit_success(mode, "get", serde_json::to_value(&record)?)?;
        }

        Commands::List { pending, synced } => {
            let repo = settings.repository();
            let (records, view) = if pending {
                (repo.get_pending().await?, "pending")
            } else if synced {
                (repo.get_synced().await?, "synced")
            } else {
                (repo.get_all().await?, "merged")
            };
            if mode.is_human() {
                ui::header(Icons::MERGE, &format!("{} records ({})", records.len(), view));
                let marks = if synced { HashSet::new() } else { pending_ids(&repo).await? };
                print_records(&records, &marks);
            }
            emit_success(mode, "list", json!({ "view": view, "records": records }))?;
        }

        Commands::Count { distinct } => {
            let repo = settings.repository();
            let count = if distinct { repo.count_distinct().await? } else { repo.count().await? };
            if mode.is_human() {
                let label = if distinct { "Distinct records" } else { "Stored records" };
                ui::info(label, &count.to_string());
            }
            emit_success(mode, "count", json!({ "count": count, "distinct": distinct }))?;
        }

        Commands::Delete { id } => {
            let removed = settings.repository().delete_by_id(&id).await?;
            if mode.is_human() {
                if removed {
                    ui::header(Icons::DEL, &format!("Deleted {}", id));
                } else {
                    ui::warn(&format!("No record with id {}", id));
                }
            }
            emit_success(mode, "delete", json!({ "id": id, "removed": removed }))?;
        }

        Commands::Drop { outbox } => {
            let repo = settings.repository();
            if outbox {
                repo.drop_outbox_collection().await?;
            } else {
                repo.drop_collection().await?;
            }
            let target = if outbox { OUTBOX_STORE } else { INBOX_STORE };
            if mode.is_human() {
                ui::header(Icons::DEL, &format!("Dropped {} from {}", settings.collection, target));
            }
            emit_success(mode, "drop", json!({ "collection": settings.collection, "store": target }))?;
        }

        Commands::Reset => {
            let repo = settings.repository();
            repo.inbox().reinitialize_collections().await?;
            repo.outbox().reinitialize_collections().await?;
            if mode.is_human() {
                ui::header(Icons::WRENCH, "Recreated inbox and outbox");
            }
            emit_success(mode, "reset", json!({ "stores": [INBOX_STORE, OUTBOX_STORE] }))?;
        }

        Commands::Teardown => {
            let repo = settings.repository();
            repo.inbox().checkpoint_and_delete().await?;
            repo.outbox().checkpoint_and_delete().await?;
            if mode.is_human() {
                ui::header(Icons::DATABASE, "Checkpointed both stores");
            }
            emit_success(mode, "teardown", json!({ "stores": [INBOX_STORE, OUTBOX_STORE] }))?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mode = if cli.json { OutputMode::Json } else { OutputMode::Human };

    // Initialize logging; stdout is reserved for command output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if let Err(e) = run(cli, mode).await {
        emit_error(mode, &e);
        std::process::exit(1);
    }
}
