//! End-to-end tests that drive the `marc` binary.

use chrono::{Duration, NaiveDate, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::TempDir;

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[storage]
hot_dir = "{root}/stream"
cold_dir = "{root}/archive"
digest_dir = "{root}/digest"

[retention]
hot_days = 7
"#,
        root = root.display()
    );

    let config_path = config_dir.join("marc.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_marc(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let output = Command::new(env!("CARGO_BIN_EXE_marc"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run marc");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code(),
    )
}

fn message(ts: &str, sender: &str, body: &str) -> String {
    serde_json::json!({
        "platform": "telegram",
        "chat_id": "c1",
        "timestamp": ts,
        "sender": {"id": sender.to_lowercase(), "name": sender},
        "content": {"body": body}
    })
    .to_string()
}

fn day_str(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

#[test]
fn test_ingest_writes_partition() {
    let (tmp, config) = setup_test_env();

    let msg = message("2026-02-17T10:00:00.000Z", "Alice", "明天记得开会吗？");
    let (stdout, stderr, code) = run_marc(&config, &["ingest", &msg]);
    assert_eq!(code, Some(0), "ingest failed: {}", stderr);
    assert!(stdout.contains("\"#待确认\""));
    assert!(stdout.contains("\"context_hash\""));

    let partition = tmp.path().join("stream/2026-02-17.jsonl");
    let text = fs::read_to_string(partition).unwrap();
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("明天记得开会吗？"));
    assert!(tmp.path().join("stream/index.sqlite").exists());
}

#[test]
fn test_duplicate_is_reported_and_not_written() {
    let (tmp, config) = setup_test_env();
    let msg = message("2026-02-17T10:00:00.000Z", "Alice", "hello");

    let (_, _, code) = run_marc(&config, &["ingest", &msg]);
    assert_eq!(code, Some(0));
    let (stdout, _, code) = run_marc(&config, &["ingest", &msg]);
    assert_eq!(code, Some(0));
    assert!(stdout.starts_with("duplicate: msg_telegram_"), "{}", stdout);

    let text = fs::read_to_string(tmp.path().join("stream/2026-02-17.jsonl")).unwrap();
    assert_eq!(text.lines().count(), 1);
}

#[test]
fn test_ingest_from_stdin() {
    let (tmp, config) = setup_test_env();
    let mut child = Command::new(env!("CARGO_BIN_EXE_marc"))
        .arg("--config")
        .arg(&config)
        .args(["ingest", "-"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(message("2026-02-18T01:00:00Z", "Bob", "piped").as_bytes())
        .unwrap();
    let status = child.wait().unwrap();
    assert!(status.success());
    assert!(tmp.path().join("stream/2026-02-18.jsonl").exists());
}

#[test]
fn test_invalid_message_exit_code() {
    let (tmp, config) = setup_test_env();

    let (_, stderr, code) = run_marc(&config, &["ingest", "not json"]);
    assert_eq!(code, Some(2));
    assert!(stderr.contains("not valid JSON"));

    let bad_body = r#"{"platform":"x","content":{"body":7}}"#;
    let (_, stderr, code) = run_marc(&config, &["ingest", bad_body]);
    assert_eq!(code, Some(2));
    assert!(stderr.contains("content.body"));

    assert!(!tmp.path().join("stream").join("2026-02-17.jsonl").exists());
}

#[test]
fn test_digest_no_data() {
    let (tmp, config) = setup_test_env();
    let (stdout, _, code) = run_marc(&config, &["digest", "2026-02-01"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("no data"));
    assert!(!tmp.path().join("digest/2026-02-01.md").exists());
}

#[test]
fn test_digest_after_ingest() {
    let (tmp, config) = setup_test_env();
    for (i, (sender, body)) in [("Alice", "记得备份"), ("Bob", "ok"), ("Alice", "好的？")]
        .iter()
        .enumerate()
    {
        let ts = format!("2026-02-17T10:00:0{}.000Z", i);
        let (_, _, code) = run_marc(&config, &["ingest", &message(&ts, sender, body)]);
        assert_eq!(code, Some(0));
    }

    let (stdout, stderr, code) = run_marc(&config, &["digest", "2026-02-17"]);
    assert_eq!(code, Some(0), "digest failed: {}", stderr);
    assert!(stdout.contains("messages: 3"));

    let md = fs::read_to_string(tmp.path().join("digest/2026-02-17.md")).unwrap();
    assert!(md.contains("- Total messages: 3"));
    assert!(md.contains("- telegram: 3"));
    assert!(md.contains("- Alice: 2"));
    assert!(md.contains("- #待办: 1"));
    assert!(md.contains("- #归档: 1"));
    assert!(md.contains("- #待回复: 1"));

    let (stdout, _, _) = run_marc(&config, &["digest", "2026-02-17", "--stdout"]);
    assert!(stdout.starts_with("# Message digest - 2026-02-17"));
}

#[test]
fn test_archive_boundary_and_idempotence() {
    let (tmp, config) = setup_test_env();
    let today = Utc::now().date_naive();
    let cutoff = today - Duration::days(7);
    let older = cutoff - Duration::days(1);

    let stream = tmp.path().join("stream");
    fs::create_dir_all(&stream).unwrap();
    fs::write(stream.join(format!("{}.jsonl", day_str(cutoff))), "{}\n").unwrap();
    fs::write(stream.join(format!("{}.jsonl", day_str(older))), "{}\n").unwrap();

    let (stdout, stderr, code) = run_marc(&config, &["archive"]);
    assert_eq!(code, Some(0), "archive failed: {}", stderr);
    assert!(stdout.contains("moved: 1"), "{}", stdout);

    let moved = tmp
        .path()
        .join("archive")
        .join(older.format("%Y-%m").to_string())
        .join(format!("{}.jsonl", day_str(older)));
    assert!(moved.exists());
    assert!(stream.join(format!("{}.jsonl", day_str(cutoff))).exists());
    assert!(!stream.join(format!("{}.jsonl", day_str(older))).exists());

    let (stdout, _, code) = run_marc(&config, &["archive"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("moved: 0"), "{}", stdout);
}

#[test]
fn test_late_message_after_archival() {
    let (tmp, config) = setup_test_env();
    let old = Utc::now().date_naive() - Duration::days(30);
    let day = day_str(old);

    let ts = format!("{}T09:00:00.000Z", day);
    let (_, _, code) = run_marc(&config, &["ingest", &message(&ts, "Alice", "first")]);
    assert_eq!(code, Some(0));
    let (_, stderr, code) = run_marc(&config, &["archive"]);
    assert_eq!(code, Some(0), "archive failed: {}", stderr);

    let ts = format!("{}T18:00:00.000Z", day);
    let (_, _, code) = run_marc(&config, &["ingest", &message(&ts, "Bob", "late")]);
    assert_eq!(code, Some(0));
    let (stdout, stderr, code) = run_marc(&config, &["archive"]);
    assert_eq!(code, Some(0), "second archive failed: {}", stderr);
    assert!(stdout.contains("moved: 1"), "{}", stdout);

    let cold = tmp
        .path()
        .join("archive")
        .join(old.format("%Y-%m").to_string())
        .join(format!("{}.jsonl", day));
    assert_eq!(fs::read_to_string(&cold).unwrap().lines().count(), 2);
    assert!(!tmp.path().join("stream").join(format!("{}.jsonl", day)).exists());

    let (stdout, stderr, code) = run_marc(&config, &["digest", &day]);
    assert_eq!(code, Some(0), "digest failed: {}", stderr);
    assert!(stdout.contains("messages: 2"), "{}", stdout);
}

#[test]
fn test_archive_dry_run() {
    let (tmp, config) = setup_test_env();
    let old = Utc::now().date_naive() - Duration::days(30);
    let stream = tmp.path().join("stream");
    fs::create_dir_all(&stream).unwrap();
    let path = stream.join(format!("{}.jsonl", day_str(old)));
    fs::write(&path, "{}\n").unwrap();

    let (stdout, _, code) = run_marc(&config, &["archive", "--dry-run"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("dry-run"));
    assert!(path.exists());
}

#[test]
fn test_daily_digests_yesterday_and_archives() {
    let (tmp, config) = setup_test_env();
    let yesterday = Utc::now().date_naive() - Duration::days(1);
    let ts = format!("{}T12:00:00.000Z", day_str(yesterday));
    run_marc(&config, &["ingest", &message(&ts, "Alice", "hi")]);

    let old = Utc::now().date_naive() - Duration::days(40);
    let stream = tmp.path().join("stream");
    fs::write(stream.join(format!("{}.jsonl", day_str(old))), "{}\n").unwrap();

    let (_, stderr, code) = run_marc(&config, &["daily"]);
    assert_eq!(code, Some(0), "daily failed: {}", stderr);
    assert!(tmp
        .path()
        .join(format!("digest/{}.md", day_str(yesterday)))
        .exists());
    assert!(!stream.join(format!("{}.jsonl", day_str(old))).exists());
}

#[test]
fn test_reindex_and_stats() {
    let (_tmp, config) = setup_test_env();
    run_marc(
        &config,
        &["ingest", &message("2026-02-17T10:00:00Z", "Alice", "a")],
    );
    run_marc(
        &config,
        &["ingest", &message("2026-02-17T11:00:00Z", "Alice", "b")],
    );

    let (stdout, _, code) = run_marc(&config, &["reindex"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("fingerprints: 2"));

    let (stdout, _, code) = run_marc(&config, &["stats"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("Fingerprints:  2"));
}

#[test]
fn test_tags_without_config() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, code) = run_marc(&tmp.path().join("missing.toml"), &["tags", "明天记得开会吗？"]);
    assert_eq!(code, Some(0));
    assert_eq!(stdout, "#待确认\n#待办\n#待回复\n");
}

#[test]
fn test_tags_with_broken_config_fails() {
    let (_tmp, config) = setup_test_env();
    let mut text = fs::read_to_string(&config).unwrap();
    text.push_str("\n[[tags.rules]]\npattern = \"(oops\"\ntag = \"#x\"\n");
    fs::write(&config, text).unwrap();

    let (stdout, stderr, code) = run_marc(&config, &["tags", "明天记得开会吗？"]);
    assert_ne!(code, Some(0));
    assert!(stdout.is_empty(), "{}", stdout);
    assert!(stderr.contains("rule 0"), "{}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, code) = run_marc(&tmp.path().join("missing.toml"), &["archive"]);
    assert_eq!(code, Some(1));
    assert!(stderr.contains("Failed to read config file"));
}
