use crate::output::print_json;
use anyhow::Context;
use dialflow_core::callsheet::{self, Zone};
use std::path::Path;
use std::str::FromStr;

pub fn run(root: &Path, id: &str, now: Option<&str>, json: bool) -> anyhow::Result<()> {
    let engine = crate::cmd::open_engine(root)?;
    let session = engine.store().get(id)?;
    let zone = Zone::from_str(&engine.config().operator.timezone)
        .context("operator.timezone in .dialflow/config.yaml is not a recognized zone")?;
    // Without --now the host clock stands in for the operator's wall clock.
    let operator_now = match now {
        Some(clock) => callsheet::parse_clock(clock)?,
        None => chrono::Local::now().time(),
    };
    let entries = callsheet::build(&session, zone, operator_now);

    if json {
        return print_json(&serde_json::json!({
            "session_id": session.id,
            "operator_timezone": zone,
            "entries": entries,
        }));
    }

    print!("{}", callsheet::render_summary(&session, &entries));
    Ok(())
}
