#![allow(deprecated)]
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn dialflow(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("dialflow").unwrap();
    cmd.current_dir(dir.path()).env("DIALFLOW_ROOT", dir.path());
    cmd
}

fn init_workspace(dir: &TempDir) {
    dialflow(dir).args(["init", "--sample"]).assert().success();
}

/// Run the sample call-prep list to its review gate and return the session id.
fn run_to_review_gate(dir: &TempDir) -> String {
    let out = dialflow(dir)
        .args([
            "--json",
            "session",
            "run",
            "call_prep",
            "sample-list",
            "--campaign",
            "sample-campaign",
            "--calling-date",
            "2026-08-26",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let session: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(session["status"], "awaiting_qa");
    assert_eq!(session["stage"], "review");
    session["id"].as_str().unwrap().to_string()
}

fn item<'a>(session: &'a serde_json::Value, external_id: &str) -> &'a serde_json::Value {
    session["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|i| i["external_id"] == external_id)
        .unwrap()
}

// ---------------------------------------------------------------------------
// dialflow init
// ---------------------------------------------------------------------------

#[test]
fn init_creates_directory_tree() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    assert!(dir.path().join(".dialflow").is_dir());
    assert!(dir.path().join(".dialflow/sessions").is_dir());
    assert!(dir.path().join(".dialflow/lists").is_dir());
    assert!(dir.path().join(".dialflow/briefs").is_dir());
    assert!(dir.path().join(".dialflow/notes").is_dir());
    assert!(dir.path().join(".dialflow/config.yaml").exists());
}

#[test]
fn init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    // Run twice — should succeed both times without error
    dialflow(&dir).arg("init").assert().success();
    dialflow(&dir).arg("init").assert().success();
}

#[test]
fn init_sample_seeds_fixtures() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    let list_path = dir.path().join(".dialflow/lists/sample-list.json");
    assert!(list_path.exists());
    assert!(dir.path().join(".dialflow/briefs/sample-campaign.yaml").exists());

    let records: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&list_path).unwrap()).unwrap();
    assert_eq!(records.as_array().unwrap().len(), 4);
    assert_eq!(records[0]["external_id"], "c-101");
}

#[test]
fn init_sample_never_overwrites_a_list() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    let list_path = dir.path().join(".dialflow/lists/sample-list.json");
    std::fs::write(&list_path, "[]").unwrap();
    init_workspace(&dir);

    assert_eq!(std::fs::read_to_string(&list_path).unwrap(), "[]");
}

// ---------------------------------------------------------------------------
// dialflow session start / run
// ---------------------------------------------------------------------------

#[test]
fn start_creates_a_session() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "start", "call_prep", "sample-list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Started call_prep session"));
}

#[test]
fn start_twice_points_at_the_existing_session() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "start", "call_prep", "sample-list"])
        .assert()
        .success();
    dialflow(&dir)
        .args(["session", "start", "call_prep", "sample-list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Active session already exists"));
}

#[test]
fn run_stops_at_the_review_gate() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "run", "call_prep", "sample-list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("awaiting_qa"))
        .stdout(predicate::str::contains("dialflow session approve"));
}

#[test]
fn run_resumes_a_started_session() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "start", "call_prep", "sample-list"])
        .assert()
        .success();
    dialflow(&dir)
        .args(["session", "run", "call_prep", "sample-list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resuming session"))
        .stdout(predicate::str::contains("awaiting_qa"));
}

#[test]
fn run_json_reports_generated_items() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    let id = run_to_review_gate(&dir);
    let out = dialflow(&dir)
        .args(["--json", "session", "show", id.as_str()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let session: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(session["items"].as_array().unwrap().len(), 4);
    assert_eq!(session["stats"]["fetched"], 4);
    assert_eq!(session["stats"]["generated"], 4);
    for entry in session["items"].as_array().unwrap() {
        assert_eq!(entry["stage_status"], "generated");
        assert!(entry["payload"]["script"].as_str().is_some());
    }
}

#[test]
fn run_against_missing_list_records_failure() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["session", "run", "call_prep", "ghost-list"])
        .assert()
        .failure();
    dialflow(&dir)
        .args(["session", "list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("failed"));
}

// ---------------------------------------------------------------------------
// Review gate verbs
// ---------------------------------------------------------------------------

#[test]
fn approve_all_then_advance_completes_and_writes_notes() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args(["session", "approve", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Approved. Gate cleared."));

    dialflow(&dir)
        .args(["session", "advance", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains("dialflow callsheet"));

    let note =
        std::fs::read_to_string(dir.path().join(".dialflow/notes/c-101.html")).unwrap();
    assert!(note.contains("Maya Torres"));
    assert!(note.contains("SCRIPT"));

    let outbox = std::fs::read_to_string(dir.path().join(".dialflow/outbox.jsonl")).unwrap();
    assert!(outbox.contains("#dial-plan"));
    assert!(outbox.contains("sample-campaign"));
}

#[test]
fn approve_subset_keeps_the_gate_open() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args(["session", "approve", id.as_str(), "c-101"])
        .assert()
        .success()
        .stdout(predicate::str::contains("3 item(s) still awaiting review"));
}

#[test]
fn rejected_items_are_skipped_at_write() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args([
            "session",
            "reject",
            id.as_str(),
            "c-104",
            "--reason",
            "no phone on file",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Rejected 1 item(s)."));
    dialflow(&dir)
        .args(["session", "approve", id.as_str()])
        .assert()
        .success();
    dialflow(&dir)
        .args(["session", "advance", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"));

    assert!(dir.path().join(".dialflow/notes/c-101.html").exists());
    assert!(!dir.path().join(".dialflow/notes/c-104.html").exists());

    let out = dialflow(&dir)
        .args(["--json", "session", "show", id.as_str()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let session: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(session["stats"]["written"], 3);
    assert_eq!(session["stats"]["skipped"], 1);
    assert_eq!(item(&session, "c-104")["stage_status"], "rejected");
    assert_eq!(item(&session, "c-104")["error"], "no phone on file");
}

#[test]
fn edited_payload_reaches_the_note() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args([
            "session",
            "edit",
            id.as_str(),
            "c-101",
            "--payload",
            r#"{"script":"operator rewrite"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Edited item c-101."));
    dialflow(&dir)
        .args(["session", "approve", id.as_str()])
        .assert()
        .success();
    dialflow(&dir)
        .args(["session", "advance", id.as_str()])
        .assert()
        .success();

    let note =
        std::fs::read_to_string(dir.path().join(".dialflow/notes/c-101.html")).unwrap();
    assert!(note.contains("operator rewrite"));
}

#[test]
fn edit_rejects_malformed_payload() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args(["session", "edit", id.as_str(), "c-101", "--payload", "{nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--payload must be valid JSON"));
}

#[test]
fn retry_of_a_healthy_item_fails() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    // Only errored items can be requeued; c-101 generated cleanly.
    dialflow(&dir)
        .args(["session", "retry", id.as_str(), "c-101"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid transition"));
}

#[test]
fn advance_at_a_gate_is_a_no_op() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args(["session", "advance", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("awaiting_qa"));
}

#[test]
fn abort_ends_the_session() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args(["session", "abort", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Aborted session"));

    dialflow(&dir)
        .args(["session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No active sessions"));
    dialflow(&dir)
        .args(["session", "list", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aborted"));
}

// ---------------------------------------------------------------------------
// dialflow session list / show
// ---------------------------------------------------------------------------

#[test]
fn list_shows_active_sessions() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "start", "call_prep", "sample-list"])
        .assert()
        .success();
    dialflow(&dir)
        .args(["session", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sample-list"))
        .stdout(predicate::str::contains("call_prep"));
}

#[test]
fn list_json_output() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "start", "call_prep", "sample-list"])
        .assert()
        .success();
    let out = dialflow(&dir)
        .args(["--json", "session", "list"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let sessions: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["resource_key"], "sample-list");
    assert_eq!(sessions[0]["kind"], "call_prep");
}

#[test]
fn show_displays_items_with_status() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = run_to_review_gate(&dir);

    dialflow(&dir)
        .args(["session", "show", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Campaign: sample-campaign"))
        .stdout(predicate::str::contains("Items (4):"))
        .stdout(predicate::str::contains("[c-101]"))
        .stdout(predicate::str::contains("Maya Torres"));
}

#[test]
fn show_unknown_session_fails() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "show", "sess-nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("session not found"));
}

#[test]
fn uninitialized_root_fails_with_a_hint() {
    let dir = TempDir::new().unwrap();

    dialflow(&dir)
        .args(["session", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not initialized"));
}

#[test]
fn invalid_kind_fails() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    dialflow(&dir)
        .args(["session", "start", "cold-calls", "sample-list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid session kind"));
}

// ---------------------------------------------------------------------------
// Prospecting pipeline
// ---------------------------------------------------------------------------

#[test]
fn prospecting_gates_at_qualify_and_auto_rejects_sparse_records() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);

    let out = dialflow(&dir)
        .args([
            "--json",
            "session",
            "run",
            "prospecting",
            "sample-list",
            "--campaign",
            "sample-campaign",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let session: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(session["status"], "awaiting_qa");
    assert_eq!(session["stage"], "qualify");
    assert_eq!(item(&session, "c-101")["stage_status"], "generated");
    // Name-only record scores below the qualify minimum.
    assert_eq!(item(&session, "c-104")["stage_status"], "rejected");
    assert!(item(&session, "c-104")["error"]
        .as_str()
        .unwrap()
        .contains("below minimum"));
}

// ---------------------------------------------------------------------------
// dialflow callsheet
// ---------------------------------------------------------------------------

fn complete_sample_session(dir: &TempDir) -> String {
    let id = run_to_review_gate(dir);
    dialflow(dir)
        .args(["session", "approve", id.as_str()])
        .assert()
        .success();
    dialflow(dir)
        .args(["session", "advance", id.as_str()])
        .assert()
        .success();
    id
}

#[test]
fn callsheet_renders_the_dial_plan() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = complete_sample_session(&dir);

    dialflow(&dir)
        .args(["callsheet", id.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Dial plan — sample-campaign (2026-08-26)",
        ))
        .stdout(predicate::str::contains("Maya Torres"))
        .stdout(predicate::str::contains("Unknown timezone — order manually:"))
        .stdout(predicate::str::contains("Lee Park"));
}

#[test]
fn callsheet_json_lists_every_contact() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = complete_sample_session(&dir);

    let out = dialflow(&dir)
        .args(["--json", "callsheet", id.as_str()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let sheet: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(sheet["session_id"].as_str().unwrap(), id);
    assert_eq!(sheet["operator_timezone"], "pacific");
    let entries = sheet["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 4);
    // The zoneless contact sorts to the very end.
    assert_eq!(entries[3]["external_id"], "c-104");
    assert_eq!(entries[3]["window"], "unknown");
}

#[test]
fn callsheet_honors_a_clock_override() {
    let dir = TempDir::new().unwrap();
    init_workspace(&dir);
    let id = complete_sample_session(&dir);

    // 9:00 AM for the Pacific operator: the CA contact is mid-prime, the
    // NY contact has hit the lunchtime dead zone.
    let out = dialflow(&dir)
        .args(["--json", "callsheet", id.as_str(), "--now", "09:00"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let sheet: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let entries = sheet["entries"].as_array().unwrap();
    let entry = |ext: &str| {
        entries
            .iter()
            .find(|e| e["external_id"] == ext)
            .unwrap()
            .clone()
    };
    assert_eq!(entry("c-101")["window"], "prime");
    assert_eq!(entry("c-101")["local_time"], "9:00 AM");
    assert_eq!(entry("c-102")["window"], "dead_zone");
    assert_eq!(entry("c-102")["local_time"], "12:00 PM");
    assert_eq!(entry("c-104")["window"], "unknown");

    dialflow(&dir)
        .args(["callsheet", id.as_str(), "--now", "breakfast"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid clock time"));
}

// ---------------------------------------------------------------------------
// dialflow signal
// ---------------------------------------------------------------------------

#[test]
fn signal_ingest_accepts_then_deduplicates() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["signal", "ingest", "c-900", "demo_request", "--strength", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("accepted"))
        .stdout(predicate::str::contains("hot"));
    assert!(dir.path().join(".dialflow/signals.json").exists());

    dialflow(&dir)
        .args(["signal", "ingest", "c-900", "demo_request"])
        .assert()
        .success()
        .stdout(predicate::str::contains("deduplicated"));
}

#[test]
fn classify_reflects_the_strongest_live_signal() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["signal", "classify", "c-901"])
        .assert()
        .success()
        .stdout(predicate::str::contains("c-901: parked"));

    dialflow(&dir)
        .args(["signal", "ingest", "c-901", "webinar_attended"])
        .assert()
        .success();
    dialflow(&dir)
        .args(["signal", "classify", "c-901"])
        .assert()
        .success()
        .stdout(predicate::str::contains("c-901: warm"));
}

#[test]
fn meeting_booked_enrolls_into_nurture() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["signal", "disposition", "c-900", "meeting_booked"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Meeting booked, transferred to nurture sequence",
        ));

    let log =
        std::fs::read_to_string(dir.path().join(".dialflow/enrollments.jsonl")).unwrap();
    let entry: serde_json::Value =
        serde_json::from_str(log.lines().next().unwrap()).unwrap();
    assert_eq!(entry["action"], "enroll");
    assert_eq!(entry["contact_id"], "c-900");
    assert_eq!(entry["sequence_id"], "nurture");
}

#[test]
fn retry_disposition_touches_no_sequence() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["signal", "disposition", "c-900", "no_answer"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No answer, retry in 4 hours"));
    assert!(!dir.path().join(".dialflow/enrollments.jsonl").exists());
}

#[test]
fn unknown_disposition_fails() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["signal", "disposition", "c-900", "hung_up"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown disposition"));
}

// ---------------------------------------------------------------------------
// dialflow config
// ---------------------------------------------------------------------------

#[test]
fn config_show_prints_the_effective_config() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("operator:"))
        .stdout(predicate::str::contains("pacific"));
}

#[test]
fn config_validate_passes_on_defaults() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    dialflow(&dir)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Config is valid. No warnings."));
}

#[test]
fn config_validate_json_is_empty_on_defaults() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    let out = dialflow(&dir)
        .args(["--json", "config", "validate"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(v["warnings"], serde_json::json!([]));
}

#[test]
fn config_validate_flags_an_unknown_timezone() {
    let dir = TempDir::new().unwrap();
    dialflow(&dir).arg("init").assert().success();

    let config_path = dir.path().join(".dialflow/config.yaml");
    let config = std::fs::read_to_string(&config_path).unwrap();
    std::fs::write(&config_path, config.replace("pacific", "lunar")).unwrap();

    dialflow(&dir)
        .args(["config", "validate"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("[error]"))
        .stdout(predicate::str::contains("operator.timezone"));
}
