//! Full run through a config file, a real SQLite file and a real
//! subprocess standing in for the mastering tool.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use tempfile::TempDir;

use masterline::db::{audio_file_repo, AudioFile};
use masterline::pipeline::NoopProgress;
use masterline::storage::LocalDisk;
use masterline::{load_config, AudioStatus, Database, Pipeline, PipelineConfig};

const TOOL_SCRIPT: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
    echo "fake-master 1.0"
    exit 0
fi
if [ "$1" = "master" ]; then
    case "$3" in
        *broken*) echo "unsupported sample rate" >&2; exit 4 ;;
    esac
    { printf 'LUFS%s:' "$7"; cat "$3"; } > "$5"
    exit 0
fi
exit 64
"#;

#[tokio::test]
async fn test_config_driven_run_with_real_tool() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("storage");
    std::fs::create_dir_all(root.join("uploads")).unwrap();

    let tool = dir.path().join("ai-mastering");
    std::fs::write(&tool, TOOL_SCRIPT).unwrap();
    std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

    let config_path = dir.path().join("masterline.json");
    std::fs::write(
        &config_path,
        serde_json::json!({
            "version": "1.0",
            "storage_root": root,
            "database_path": dir.path().join("db/masterline.db"),
            "mastering": { "tool_path": tool, "timeout_seconds": 30 },
            "eq": { "enabled": false }
        })
        .to_string(),
    )
    .unwrap();

    let config = load_config(&config_path).unwrap();
    let db = Database::open(config.database_path.as_ref().unwrap()).unwrap();
    let pipeline = Pipeline::from_config(
        Arc::new(PipelineConfig::from_config(&config)),
        Arc::new(db.clone()),
        Arc::new(LocalDisk::new(&config.storage_root)),
    );

    std::fs::write(root.join("uploads/good.wav"), b"pcm").unwrap();
    std::fs::write(root.join("uploads/broken.wav"), b"pcm").unwrap();
    audio_file_repo::insert(&db, &AudioFile::new_uploaded("good", "good.wav", "uploads/good.wav"))
        .unwrap();
    audio_file_repo::insert(
        &db,
        &AudioFile::new_uploaded("bad", "broken.wav", "uploads/broken.wav"),
    )
    .unwrap();

    let good = pipeline.process("good", &NoopProgress).await.unwrap();
    assert!(good.ai_mastering_applied);
    assert_eq!(
        std::fs::read(root.join("mastered/good_mastered.wav")).unwrap(),
        b"LUFS-14:pcm"
    );

    let err = pipeline.process("bad", &NoopProgress).await.unwrap_err();
    assert!(err.to_string().contains("unsupported sample rate"));

    let bad = audio_file_repo::find_by_id(&db, "bad").unwrap().unwrap();
    assert_eq!(bad.status, AudioStatus::Failed);
    assert!(!root.join("mastered/bad_mastered.wav").exists());

    let leftover: Vec<_> = std::fs::read_dir(root.join("temp")).unwrap().collect();
    assert!(leftover.is_empty());
}
