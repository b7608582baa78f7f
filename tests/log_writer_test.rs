//! Shard layout and append ordering

mod common;

use chrono::{TimeZone, Utc};
use common::{cbor_map, envelope_line, shard_files};
use pubsub_logger::decoder::{decode_envelope, Record};
use pubsub_logger::log_writer::{AppendOutcome, LogWriter};
use serde_cbor::Value;

#[tokio::test]
async fn test_appends_keep_order_with_blank_line_separator() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LogWriter::new(dir.path());
    let first = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();
    let second = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 7).unwrap();

    writer
        .append_at("plebtoken.eth", &Record::Decoded(r#"{"type":"a"}"#.to_string()), first)
        .await
        .unwrap();
    writer
        .append_at("plebtoken.eth", &Record::RawText("hello\\nworld".to_string()), second)
        .await
        .unwrap();

    let contents = std::fs::read_to_string(dir.path().join("plebtoken.eth").join("2024-05-01")).unwrap();
    assert_eq!(
        contents,
        "2024-05-01T09:30:00 {\"type\":\"a\"}\r\n\r\n2024-05-01T09:30:07 hello\\nworld\r\n\r\n"
    );
}

#[tokio::test]
async fn test_date_rollover_starts_new_shard() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LogWriter::new(dir.path());
    let before = Utc.with_ymd_and_hms(2024, 5, 1, 23, 59, 59).unwrap();
    let after = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 1).unwrap();
    let record = Record::Decoded(r#"{"type":"x"}"#.to_string());

    let old = writer.append_at("12D3KooWChan", &record, before).await.unwrap();
    let new = writer.append_at("12D3KooWChan", &record, after).await.unwrap();
    assert_ne!(old, new);

    let shards = shard_files(&dir.path().join("12D3KooWChan"));
    let names: Vec<_> = shards
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["2024-05-01", "2024-05-02"]);

    let tail = std::fs::read_to_string(&shards[1]).unwrap();
    assert!(tail.starts_with("2024-05-02T00:00:01 "));
}

#[tokio::test]
async fn test_existing_shard_is_appended_not_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LogWriter::new(dir.path());
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    let shard = writer.shard_path("plebtoken.eth", at);
    std::fs::create_dir_all(shard.parent().unwrap()).unwrap();
    std::fs::write(&shard, "earlier\r\n\r\n").unwrap();

    let outcome = writer
        .append_at("plebtoken.eth", &Record::Decoded("{}".to_string()), at)
        .await
        .unwrap();
    assert_eq!(outcome, AppendOutcome::Written(shard.clone()));

    let contents = std::fs::read_to_string(&shard).unwrap();
    assert_eq!(contents, "earlier\r\n\r\n2024-05-01T12:00:00 {}\r\n\r\n");
}

#[tokio::test]
async fn test_unwritable_root_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "").unwrap();

    let writer = LogWriter::new(&blocker);
    let result = writer
        .append("plebtoken.eth", &Record::Decoded("{}".to_string()))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_truncated_payload_still_reaches_shard() {
    let dir = tempfile::tempdir().unwrap();
    let writer = LogWriter::new(dir.path());
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();

    let mut payload = cbor_map(vec![
        ("type", Value::Text("CHALLENGEREQUEST".into())),
        ("encryptedPublication", Value::Bytes(vec![0xff, 0xfe, 0x80])),
    ]);
    payload.pop();
    let record = decode_envelope(&envelope_line(&payload)).unwrap();

    let outcome = writer.append_at("plebtoken.eth", &record, at).await.unwrap();
    assert!(matches!(outcome, AppendOutcome::Written(_)));

    let contents = std::fs::read_to_string(dir.path().join("plebtoken.eth").join("2024-05-01")).unwrap();
    assert!(contents.starts_with("2024-05-01T08:00:00 "));
    assert!(contents.contains("CHALLENGEREQUEST"));
    assert!(contents.contains('\u{FFFD}'));
    assert!(contents.ends_with("\r\n\r\n"));
}
