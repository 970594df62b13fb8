use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use dialflow_core::{
    pipeline::{Engine, StartMeta},
    session::Session,
    types::{ItemStatus, SessionKind, SessionStatus},
};
use std::path::Path;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum SessionSubcommand {
    /// Start a session (or point at the one already active for the list)
    Start {
        /// Pipeline kind: call_prep or prospecting
        kind: String,
        /// Contact list key the session runs against
        resource_key: String,
        /// Campaign this session belongs to; prospecting loads its brief by this id
        #[arg(long)]
        campaign: Option<String>,
        /// Calling date shown on the dial plan (e.g. 2026-08-26)
        #[arg(long)]
        calling_date: Option<String>,
        /// Sequence exported contacts enroll into
        #[arg(long)]
        sequence: Option<String>,
    },

    /// Start or resume a session, then advance until it gates or finishes
    Run {
        /// Pipeline kind: call_prep or prospecting
        kind: String,
        /// Contact list key the session runs against
        resource_key: String,
        /// Campaign this session belongs to; prospecting loads its brief by this id
        #[arg(long)]
        campaign: Option<String>,
        /// Calling date shown on the dial plan (e.g. 2026-08-26)
        #[arg(long)]
        calling_date: Option<String>,
        /// Sequence exported contacts enroll into
        #[arg(long)]
        sequence: Option<String>,
    },

    /// List active sessions
    List {
        /// Include completed, failed, and aborted sessions
        #[arg(long)]
        all: bool,
    },

    /// Show session details
    Show { id: String },

    /// Advance a session through its remaining stages
    Advance { id: String },

    /// Approve reviewed items (all generated items when none are named)
    Approve {
        id: String,
        /// Item ids to approve
        items: Vec<String>,
    },

    /// Reject items; they are skipped for the rest of the run
    Reject {
        id: String,
        /// Item ids to reject
        #[arg(required = true)]
        items: Vec<String>,
        /// Reason recorded on each rejected item
        #[arg(long)]
        reason: Option<String>,
    },

    /// Replace one item's generated payload
    Edit {
        id: String,
        /// Item id to edit
        item: String,
        /// Replacement payload as a JSON object
        #[arg(long)]
        payload: String,
    },

    /// Requeue failed items for another attempt
    Retry {
        id: String,
        /// Item ids to retry
        #[arg(required = true)]
        items: Vec<String>,
    },

    /// Abort a session
    Abort { id: String },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: SessionSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        SessionSubcommand::Start {
            kind,
            resource_key,
            campaign,
            calling_date,
            sequence,
        } => start(root, &kind, &resource_key, campaign, calling_date, sequence, json),
        SessionSubcommand::Run {
            kind,
            resource_key,
            campaign,
            calling_date,
            sequence,
        } => run_to_gate(root, &kind, &resource_key, campaign, calling_date, sequence, json),
        SessionSubcommand::List { all } => list(root, all, json),
        SessionSubcommand::Show { id } => show(root, &id, json),
        SessionSubcommand::Advance { id } => advance(root, &id, json),
        SessionSubcommand::Approve { id, items } => approve(root, &id, items, json),
        SessionSubcommand::Reject { id, items, reason } => {
            reject(root, &id, &items, reason.as_deref(), json)
        }
        SessionSubcommand::Edit { id, item, payload } => edit(root, &id, &item, &payload, json),
        SessionSubcommand::Retry { id, items } => retry(root, &id, &items, json),
        SessionSubcommand::Abort { id } => abort(root, &id, json),
    }
}

// ---------------------------------------------------------------------------
// start / run
// ---------------------------------------------------------------------------

fn start(
    root: &Path,
    kind_str: &str,
    resource_key: &str,
    campaign: Option<String>,
    calling_date: Option<String>,
    sequence: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let kind = SessionKind::from_str(kind_str)?;
    let engine = crate::cmd::open_engine(root)?;

    // One active session per list: point at the existing one instead of
    // erroring, so a rerun after a crash lands somewhere useful.
    if let Some(existing) = engine.store().find_resumable(kind, resource_key) {
        if json {
            return print_json(&existing);
        }
        println!(
            "Active session already exists: {} ({})",
            existing.id, existing.status
        );
        println!("Next: dialflow session advance {}", existing.id);
        return Ok(());
    }

    let meta = StartMeta {
        campaign,
        calling_date,
        sequence,
    };
    let rt = tokio::runtime::Runtime::new()?;
    let session = rt.block_on(engine.start(kind, resource_key, meta))?;

    if json {
        return print_json(&session);
    }
    println!(
        "Started {} session {} on '{}'",
        session.kind, session.id, session.resource_key
    );
    println!("Next: dialflow session advance {}", session.id);
    Ok(())
}

fn run_to_gate(
    root: &Path,
    kind_str: &str,
    resource_key: &str,
    campaign: Option<String>,
    calling_date: Option<String>,
    sequence: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let kind = SessionKind::from_str(kind_str)?;
    let engine = crate::cmd::open_engine(root)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(async {
        let session = match engine.store().find_resumable(kind, resource_key) {
            Some(existing) => {
                if !json {
                    println!(
                        "Resuming session {} at stage {}",
                        existing.id, existing.stage
                    );
                }
                existing
            }
            None => {
                let meta = StartMeta {
                    campaign,
                    calling_date,
                    sequence,
                };
                engine.start(kind, resource_key, meta).await?
            }
        };

        let id = session.id.clone();
        let finished = engine.advance(&id).await?;
        if !json {
            print_run_events(&engine, &id);
        }
        report(&finished, json)
    })
}

// ---------------------------------------------------------------------------
// list / show
// ---------------------------------------------------------------------------

fn list(root: &Path, all: bool, json: bool) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let sessions = if all {
        engine.store().list()
    } else {
        engine.store().list_active()
    };

    if json {
        return print_json(&sessions);
    }

    if sessions.is_empty() {
        if all {
            println!("No sessions yet.");
        } else {
            println!("No active sessions. Use --all to include finished ones.");
        }
        return Ok(());
    }

    let rows: Vec<Vec<String>> = sessions
        .iter()
        .map(|s| {
            vec![
                s.id.clone(),
                s.kind.to_string(),
                s.resource_key.clone(),
                s.stage.to_string(),
                s.status.to_string(),
                s.items.len().to_string(),
                s.created_at.format("%Y-%m-%d %H:%M").to_string(),
            ]
        })
        .collect();
    print_table(
        &["ID", "KIND", "LIST", "STAGE", "STATUS", "ITEMS", "CREATED"],
        rows,
    );
    Ok(())
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let session = engine.store().get(id)?;

    if json {
        return print_json(&session);
    }

    println!("Session:  {} ({})", session.id, session.kind);
    println!("List:     {}", session.resource_key);
    if let Some(ref campaign) = session.campaign {
        println!("Campaign: {campaign}");
    }
    if let Some(ref date) = session.calling_date {
        println!("Date:     {date}");
    }
    println!("Stage:    {}", session.stage);
    println!("Status:   {}", session.status);
    if let Some(ref failure) = session.failure {
        println!("Failure:  {failure}");
    }
    println!("Created:  {}", session.created_at.format("%Y-%m-%d %H:%M"));
    println!(
        "Stats:    {} fetched, {} generated, {} written, {} skipped, {} failed",
        session.stats.fetched,
        session.stats.generated,
        session.stats.written,
        session.stats.skipped,
        session.stats.failed
    );

    if !session.items.is_empty() {
        println!("\nItems ({}):", session.items.len());
        for item in &session.items {
            let mut line = format!("  [{}] {:<10} {}", item.external_id, item.stage_status, item.name);
            if let Some(ref err) = item.error {
                line.push_str(&format!("  ({err})"));
            }
            println!("{line}");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// advance
// ---------------------------------------------------------------------------

fn advance(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let rt = tokio::runtime::Runtime::new()?;
    let session = rt.block_on(engine.advance(id))?;

    if !json {
        print_run_events(&engine, id);
    }
    report(&session, json)
}

/// Print the events this invocation produced. The hub starts empty in each
/// CLI process, so sequence 1 onward is exactly this run.
fn print_run_events(engine: &Engine, id: &str) {
    for event in engine.hub().events_since(id, 1) {
        let item = event.item_id.as_deref().unwrap_or("-");
        println!(
            "  #{:<4} {:<18} {:<14} {}",
            event.sequence_number, event.event_type, event.stage, item
        );
    }
}

fn report(session: &Session, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(session);
    }

    println!("\nSession {} — {} ({})", session.id, session.status, session.stage);
    println!(
        "Stats: {} fetched, {} generated, {} written, {} skipped, {} failed",
        session.stats.fetched,
        session.stats.generated,
        session.stats.written,
        session.stats.skipped,
        session.stats.failed
    );

    match session.status {
        SessionStatus::AwaitingQa => {
            println!("Review the generated items, then:");
            println!("  dialflow session show {}", session.id);
            println!("  dialflow session approve {} [item-id ...]", session.id);
            println!("  dialflow session reject {} <item-id> --reason \"...\"", session.id);
        }
        SessionStatus::Completed => {
            if session.kind == SessionKind::CallPrep {
                println!("Call sheet: dialflow callsheet {}", session.id);
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// QA verbs
// ---------------------------------------------------------------------------

fn approve(root: &Path, id: &str, items: Vec<String>, json: bool) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let items = if items.is_empty() { None } else { Some(items) };
    let session = engine.approve(id, items.as_deref())?;

    if json {
        return print_json(&session);
    }
    if session.status == SessionStatus::Running {
        println!("Approved. Gate cleared.");
        println!("Next: dialflow session advance {}", session.id);
    } else {
        let remaining = pending_review(&session);
        println!("Approved. {remaining} item(s) still awaiting review.");
    }
    Ok(())
}

fn reject(
    root: &Path,
    id: &str,
    items: &[String],
    reason: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let session = engine.reject(id, items, reason)?;

    if json {
        return print_json(&session);
    }
    println!("Rejected {} item(s).", items.len());
    if session.status == SessionStatus::Running {
        println!("Next: dialflow session advance {}", session.id);
    }
    Ok(())
}

fn edit(root: &Path, id: &str, item: &str, payload_str: &str, json: bool) -> anyhow::Result<()> {
    let payload: serde_json::Value =
        serde_json::from_str(payload_str).context("--payload must be valid JSON")?;
    let engine = crate::cmd::open_engine(root)?;
    let session = engine.edit(id, item, payload)?;

    if json {
        return print_json(&session);
    }
    println!("Edited item {item}.");
    if session.status == SessionStatus::Running {
        println!("Next: dialflow session advance {}", session.id);
    } else {
        let remaining = pending_review(&session);
        println!("{remaining} item(s) still awaiting review.");
    }
    Ok(())
}

fn retry(root: &Path, id: &str, items: &[String], json: bool) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let session = engine.retry_items(id, items)?;

    if json {
        return print_json(&session);
    }
    println!("Requeued {} item(s).", items.len());
    if session.status == SessionStatus::Running {
        println!("Next: dialflow session advance {}", session.id);
    }
    Ok(())
}

fn abort(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let session = engine.abort(id)?;

    if json {
        return print_json(&session);
    }
    println!("Aborted session {} at stage {}.", session.id, session.stage);
    Ok(())
}

fn pending_review(session: &Session) -> usize {
    session
        .items
        .iter()
        .filter(|i| i.stage_status == ItemStatus::Generated)
        .count()
}
