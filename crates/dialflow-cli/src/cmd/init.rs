use anyhow::Context;
use dialflow_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path, sample: bool) -> anyhow::Result<()> {
    println!("Initializing dialflow in: {}", root.display());

    // 1. Create the .dialflow directory tree
    let dirs = [
        paths::DIALFLOW_DIR,
        paths::SESSIONS_DIR,
        paths::LISTS_DIR,
        paths::BRIEFS_DIR,
        paths::NOTES_DIR,
    ];
    for dir in dirs {
        let p = root.join(dir);
        io::ensure_dir(&p).with_context(|| format!("failed to create {}", p.display()))?;
    }

    // 2. Write config.yaml if missing
    let config_path = paths::config_path(root);
    if !config_path.exists() {
        Config::default()
            .save(root)
            .context("failed to write config.yaml")?;
        println!("  created: .dialflow/config.yaml");
    } else {
        println!("  exists:  .dialflow/config.yaml");
    }

    // 3. Seed sample fixtures if requested
    if sample {
        seed_sample(root)?;
    }

    println!("\ndialflow initialized.");
    if sample {
        println!("Next: dialflow session run call_prep sample-list");
    } else {
        println!("Next: drop a contact list into .dialflow/lists/, then run:");
        println!("      dialflow session run call_prep <list-key>");
    }

    Ok(())
}

fn seed_sample(root: &Path) -> anyhow::Result<()> {
    let fixtures: &[(&str, std::path::PathBuf, &str)] = &[
        (
            ".dialflow/lists/sample-list.json",
            paths::list_path(root, "sample-list"),
            SAMPLE_LIST,
        ),
        (
            ".dialflow/briefs/sample-campaign.yaml",
            paths::brief_path(root, "sample-campaign"),
            SAMPLE_BRIEF,
        ),
    ];

    for (display, path, content) in fixtures {
        let created = io::write_if_missing(path, content.as_bytes())
            .with_context(|| format!("failed to write {display}"))?;
        if created {
            println!("  created: {display}");
        } else {
            println!("  exists:  {display}");
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Sample fixture content
// ---------------------------------------------------------------------------

// Four contacts across three time zones; the last one is deliberately sparse
// so the prospecting qualify gate has something to reject.
const SAMPLE_LIST: &str = r#"[
  {
    "external_id": "c-101",
    "name": "Maya Torres",
    "company": "Halcyon Labs",
    "title": "VP Sales",
    "phone": "415-555-0131",
    "state": "CA",
    "email": "maya@halcyonlabs.com"
  },
  {
    "external_id": "c-102",
    "name": "Derek Shaw",
    "company": "Coastline Freight",
    "title": "Director of Operations",
    "phone": "212-555-0164",
    "state": "NY",
    "email": "derek@coastlinefreight.com"
  },
  {
    "external_id": "c-103",
    "name": "Priya Natarajan",
    "company": "Summit Grid",
    "title": "Head of Revenue",
    "phone": "303-555-0118",
    "state": "CO",
    "email": "priya@summitgrid.io",
    "timezone": "mountain"
  },
  {
    "external_id": "c-104",
    "name": "Lee Park"
  }
]
"#;

const SAMPLE_BRIEF: &str = r#"campaign: sample-campaign
persona: revenue operations leaders at 50-500 seat companies
goal: book discovery calls for the prep-automation pilot
talking_points:
  - manual call prep eats the first hour of every block
  - signals decay fast; same-day follow-up doubles connect rates
"#;
