//! Command-line access to a CareSync sync queue.
//!
//! The CLI opens the durable SQLite queue a client uses and lets an operator
//! inspect it, enqueue test mutations, manage dead letters, and flush it
//! against a REST sync endpoint.

use anyhow::{Context, Result, bail};
use caresync_store::{LocalStore, SqliteStore};
use caresync_sync::{
    HttpHandlerConfig, HttpSyncHandler, NetworkMonitor, SyncConfig, SyncEngine, SyncState,
};
use caresync_types::{ActionId, Namespace, Operation, PendingAction, Timestamp};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "caresync")]
#[command(about = "Inspect and flush the CareSync offline sync queue")]
pub struct Cli {
    /// Path to the queue database
    #[arg(long, global = true, default_value = "caresync.db")]
    pub db: PathBuf,

    /// Path to a JSON sync config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue a mutation
    Enqueue {
        namespace: Namespace,
        entity: String,
        operation: Operation,
        /// Entity payload as JSON
        payload: String,
    },
    /// Show sync status
    Status {
        /// Restrict to one namespace
        #[arg(short, long)]
        namespace: Option<Namespace>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List actions awaiting sync
    Pending { namespace: Namespace },
    /// List actions held for manual review
    DeadLetters { namespace: Namespace },
    /// Return a dead letter to the queue with a fresh retry budget
    Requeue { namespace: Namespace, id: ActionId },
    /// Permanently drop a dead letter
    Discard { namespace: Namespace, id: ActionId },
    /// List audited conflict resolutions
    Conflicts { namespace: Namespace },
    /// Flush the queue against a sync endpoint
    Sync {
        /// Base URL of the sync API
        #[arg(long)]
        endpoint: String,
        /// Namespaces to flush (defaults to every namespace in the queue)
        #[arg(short, long)]
        namespace: Vec<Namespace>,
        /// Bearer token for the endpoint
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActionView<'a> {
    id: ActionId,
    entity: &'a str,
    operation: Operation,
    attempts: u32,
    queued_at: String,
    last_error: Option<&'a str>,
    payload: &'a serde_json::Value,
}

impl<'a> From<&'a PendingAction> for ActionView<'a> {
    fn from(action: &'a PendingAction) -> Self {
        Self {
            id: action.id,
            entity: &action.entity,
            operation: action.operation,
            attempts: action.attempts,
            queued_at: format_timestamp(action.client_timestamp),
            last_error: action.last_error.as_deref(),
            payload: &action.payload,
        }
    }
}

/// Formats a timestamp as RFC 3339 UTC.
pub fn format_timestamp(ts: Timestamp) -> String {
    i64::try_from(ts.as_millis())
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map_or_else(|| ts.to_string(), |dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Renders a status snapshot for humans.
pub fn render_status(state: &SyncState) -> String {
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    let last_sync = state
        .last_sync_time
        .map_or_else(|| "never".to_string(), format_timestamp);
    format!(
        "online:    {}\nsyncing:   {}\npending:   {}\nfailed:    {}\nlast sync: {}",
        yes_no(state.is_online),
        yes_no(state.is_syncing),
        state.pending_count,
        state.failed_count,
        last_sync
    )
}

fn open_engine(cli: &Cli) -> Result<(Arc<SqliteStore>, SyncEngine)> {
    let config = match &cli.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => SyncConfig::default(),
    };
    let store = Arc::new(
        SqliteStore::open(&cli.db)
            .with_context(|| format!("failed to open queue {}", cli.db.display()))?,
    );
    let engine = SyncEngine::new(store.clone(), NetworkMonitor::new(None), config)?;
    Ok((store, engine))
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn list_view(actions: &[PendingAction]) -> Result<String> {
    let views: Vec<ActionView<'_>> = actions.iter().map(ActionView::from).collect();
    to_json(&views)
}

/// Runs one command and returns what should be printed.
pub async fn run(cli: Cli) -> Result<String> {
    let (store, engine) = open_engine(&cli)?;

    match cli.command {
        Command::Enqueue {
            namespace,
            entity,
            operation,
            payload,
        } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("payload is not valid JSON")?;
            let action = engine.enqueue(&namespace, &entity, operation, payload)?;
            info!(namespace = %namespace, id = %action.id, "queued");
            to_json(&action)
        }
        Command::Status { namespace, json } => {
            let state = engine.status(namespace.as_ref())?;
            if json {
                to_json(&state)
            } else {
                Ok(render_status(&state))
            }
        }
        Command::Pending { namespace } => list_view(&engine.queue().list_due(&namespace)?),
        Command::DeadLetters { namespace } => list_view(&engine.dead_letters(&namespace)?),
        Command::Requeue { namespace, id } => {
            let action = engine.requeue(&namespace, &id)?;
            to_json(&ActionView::from(&action))
        }
        Command::Discard { namespace, id } => {
            if !engine.discard(&namespace, &id)? {
                bail!("{id} is not a dead letter in {namespace}");
            }
            Ok(format!("discarded {id}"))
        }
        Command::Conflicts { namespace } => to_json(&store.list_conflicts(&namespace)?),
        Command::Sync {
            endpoint,
            namespace,
            token,
        } => {
            let namespaces = if namespace.is_empty() {
                engine.queue().namespaces()?
            } else {
                namespace
            };
            for ns in &namespaces {
                let mut http = HttpHandlerConfig::new(endpoint.as_str(), ns.clone());
                http.timeout_ms = engine.config().request_timeout_ms;
                http.bearer_token = token.clone();
                engine.register_handler(ns.clone(), Arc::new(HttpSyncHandler::new(http)?));
            }

            let mut reports = Vec::with_capacity(namespaces.len());
            for ns in &namespaces {
                for report in engine.sync_now(Some(ns)).await? {
                    reports.push(report.ensure_ran()?);
                }
            }
            to_json(&reports)
        }
    }
}
