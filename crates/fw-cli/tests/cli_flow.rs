//! End-to-end tests driving the `fw` binary against on-disk client files.
//!
//! Covers the full pipeline: client files → status → sync → history.

use std::path::Path;
use std::process::{Command, Output};

use chrono::{TimeZone, Utc};
use fw_core::{Fingerprint, QueueEntry, QueueSnapshot, QueueStatus};
use tempfile::TempDir;

fn fw_binary() -> String {
    env!("CARGO_BIN_EXE_fw").to_string()
}

const LOG: &str = "\
--- Opening Log file [March 10 19:40:15 UTC]
Folding@Home Client Version 6.29r3
[19:40:16] - User name: harlam357 (Team 32)
[19:40:16] + Processing work unit
[19:40:16] Working on queue slot 03 [March 10 19:40:16 UTC]
[19:40:16] Folding@Home Gromacs SMP Core
[19:40:17] Project: 2669 (Run 13, Clone 247, Gen 48)
[19:40:23] Completed 0 out of 250000 steps  (0%)
[20:43:50] Folding@home Core Shutdown: FINISHED_UNIT
[20:43:55] + Processing work unit
[20:43:55] Working on queue slot 04 [March 10 20:43:55 UTC]
[20:43:56] Folding@Home Gromacs SMP Core
[20:43:57] Project: 2677 (Run 14, Clone 69, Gen 39)
[20:44:03] Completed 0 out of 250000 steps  (0%)
[20:51:35] Completed 2500 out of 250000 steps  (1%)
";

const UNIT_INFO: &str = "\
Current Work Unit
-----------------
Name: p2677_IBX in water
Tag: P2677R14C69G39
Download time: March 10 20:43:55
Due time: March 13 20:43:55
Progress: 1%  [__________]
";

/// Writes a client directory with log, queue and unit info files.
fn write_client(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(dir.join("FAHlog.txt"), LOG).unwrap();
    std::fs::write(dir.join("unitinfo.txt"), UNIT_INFO).unwrap();

    let mut snapshot = QueueSnapshot {
        current_index: 4,
        ..QueueSnapshot::default()
    };
    snapshot.entries[3] = QueueEntry {
        status: QueueStatus::Finished,
        fingerprint: Fingerprint::new(2669, 13, 247, 48),
        begin_time: Utc.with_ymd_and_hms(2009, 3, 10, 19, 40, 16).single(),
        end_time: Utc.with_ymd_and_hms(2009, 3, 10, 20, 43, 50).single(),
        core: "A2".to_string(),
        ..QueueEntry::default()
    };
    snapshot.entries[4] = QueueEntry {
        status: QueueStatus::FoldingNow,
        fingerprint: Fingerprint::new(2677, 14, 69, 39),
        begin_time: Utc.with_ymd_and_hms(2009, 3, 10, 20, 43, 55).single(),
        core: "A2".to_string(),
        ..QueueEntry::default()
    };
    std::fs::write(dir.join("queue.dat"), snapshot.to_bytes()).unwrap();
}

/// Creates a workspace with one client and a config file pointing at it.
fn setup() -> TempDir {
    let temp = TempDir::new().unwrap();
    let client_dir = temp.path().join("client");
    write_client(&client_dir);
    let config = format!(
        r#"
database_path = "{}"

[[clients]]
name = "home"
path = "{}"

[[proteins]]
project_id = 2677
frames = 100
credit = 3355.0
preferred_days = 3.0
maximum_days = 4.0
k_factor = 26.4
"#,
        temp.path().join("fw.db").display(),
        client_dir.display()
    );
    std::fs::write(temp.path().join("config.toml"), config).unwrap();
    temp
}

fn fw(temp: &TempDir, args: &[&str]) -> Output {
    Command::new(fw_binary())
        .env("HOME", temp.path())
        .env("XDG_CONFIG_HOME", temp.path().join("xdg-config"))
        .env("XDG_DATA_HOME", temp.path().join("xdg-data"))
        .env_remove("RUST_LOG")
        .arg("--config")
        .arg(temp.path().join("config.toml"))
        .args(args)
        .output()
        .expect("failed to run fw")
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "fw should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn test_status_shows_reconciled_slots() {
    let temp = setup();
    let out = stdout(&fw(&temp, &["status"]));

    assert!(out.starts_with("home (queue, active slot 4)\n"), "{out}");
    assert!(out.contains("P2669R13C247G48"), "{out}");
    assert!(out.contains("finished_unit"), "{out}");
    assert!(out.contains("91114.5"), "{out}");
    assert!(!out.contains("warning"), "{out}");
}

#[test]
fn test_status_json_carries_unit_info() {
    let temp = setup();
    let out = stdout(&fw(&temp, &["status", "--json", "--client", "home"]));
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();

    let slots = json["clients"][0]["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 2);
    assert_eq!(slots[1]["slot"], 4);
    assert_eq!(slots[1]["active"], true);
    assert_eq!(slots[1]["protein_name"], "p2677_IBX in water");
    assert_eq!(slots[1]["core"], "A2");
}

#[test]
fn test_status_without_queue_reads_log_only() {
    let temp = setup();
    std::fs::remove_file(temp.path().join("client/queue.dat")).unwrap();
    let out = stdout(&fw(&temp, &["status"]));

    assert!(out.starts_with("home (log only)\n"), "{out}");
    assert!(
        out.contains("warning: queue snapshot not found, reading log only"),
        "{out}"
    );
    assert!(out.contains("P2669R13C247G48"), "{out}");
    assert!(out.contains("P2677R14C69G39"), "{out}");
}

#[test]
fn test_sync_then_history() {
    let temp = setup();

    let out = stdout(&fw(&temp, &["sync"]));
    assert_eq!(out, "home: 2 units recorded\n");
    // A second pass updates rows instead of adding them.
    stdout(&fw(&temp, &["sync"]));

    let out = stdout(&fw(&temp, &["history", "--json"]));
    let json: serde_json::Value = serde_json::from_str(&out).unwrap();
    let units = json.as_array().unwrap();
    assert_eq!(units.len(), 2);
    assert_eq!(units[0]["protein_tag"], "P2669R13C247G48");
    assert_eq!(units[0]["unit_result"], "finished_unit");
    assert_eq!(units[1]["protein_tag"], "P2677R14C69G39");
    assert_eq!(units[1]["percent_complete"], 1);
}

#[test]
fn test_unknown_client_fails() {
    let temp = setup();
    let output = fw(&temp, &["status", "--client", "nope"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no client named 'nope'"));
}

#[test]
fn test_ppd_command() {
    let temp = setup();
    let out = stdout(&fw(
        &temp,
        &[
            "ppd",
            "--frame-time",
            "452",
            "--credit",
            "3355",
            "--preferred-days",
            "3",
            "--maximum-days",
            "4",
            "--k-factor",
            "26.4",
        ],
    ));
    assert!(out.contains("PPD: 91114.5"), "{out}");
    assert!(out.contains("By download time: unknown"), "{out}");
}
