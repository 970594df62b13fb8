use crate::output::print_json;
use anyhow::Context;
use chrono::Utc;
use clap::Subcommand;
use dialflow_core::{
    collab::Collaborators,
    config::Config,
    signals::{self, Disposition, Signal, SignalLedger},
};
use std::path::Path;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum SignalSubcommand {
    /// Record an observed buying signal
    Ingest {
        contact_id: String,
        /// Signal type, e.g. pricing_page, demo_request, webinar_attended
        signal_type: String,
        /// Weight of this observation
        #[arg(long, default_value = "1")]
        strength: u32,
    },

    /// Show a contact's current engagement tier
    Classify { contact_id: String },

    /// Record a call disposition and route the contact's sequence
    Disposition {
        contact_id: String,
        /// Disposition, e.g. meeting_booked, voicemail, no_answer
        disposition: String,
    },
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

pub fn run(root: &Path, subcmd: SignalSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        SignalSubcommand::Ingest {
            contact_id,
            signal_type,
            strength,
        } => ingest(root, &contact_id, &signal_type, strength, json),
        SignalSubcommand::Classify { contact_id } => classify(root, &contact_id, json),
        SignalSubcommand::Disposition {
            contact_id,
            disposition,
        } => self::disposition(root, &contact_id, &disposition, json),
    }
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

fn ingest(
    root: &Path,
    contact_id: &str,
    signal_type: &str,
    strength: u32,
    json: bool,
) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let mut ledger = SignalLedger::load(root, &config);

    let outcome = ledger.ingest(Signal {
        contact_id: contact_id.to_string(),
        signal_type: signal_type.to_string(),
        strength,
        observed_at: Utc::now(),
    });
    ledger.save(root).context("failed to save signal ledger")?;
    let tier = ledger.classify(contact_id, Utc::now());

    if json {
        return print_json(&serde_json::json!({
            "contact_id": contact_id,
            "outcome": outcome,
            "tier": tier,
        }));
    }
    println!("{outcome}: {signal_type} for {contact_id} (tier: {tier})");
    Ok(())
}

// ---------------------------------------------------------------------------
// classify
// ---------------------------------------------------------------------------

fn classify(root: &Path, contact_id: &str, json: bool) -> anyhow::Result<()> {
    let config = Config::load(root).context("failed to load config")?;
    let ledger = SignalLedger::load(root, &config);
    let tier = ledger.classify(contact_id, Utc::now());

    if json {
        return print_json(&serde_json::json!({
            "contact_id": contact_id,
            "tier": tier,
        }));
    }
    println!("{contact_id}: {tier}");
    Ok(())
}

// ---------------------------------------------------------------------------
// disposition
// ---------------------------------------------------------------------------

fn disposition(
    root: &Path,
    contact_id: &str,
    disposition_str: &str,
    json: bool,
) -> anyhow::Result<()> {
    let disposition = Disposition::from_str(disposition_str)?;
    let config = Config::load(root).context("failed to load config")?;
    let collab = Collaborators::local(root);

    let rt = tokio::runtime::Runtime::new()?;
    let route = rt.block_on(signals::apply_disposition(
        collab.sequencer.as_ref(),
        contact_id,
        disposition,
        &config.signals.nurture_sequence,
    ))?;

    if json {
        return print_json(&serde_json::json!({
            "contact_id": contact_id,
            "disposition": disposition,
            "route": route,
        }));
    }
    println!("{}", route.log_entry);
    Ok(())
}
