// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use crate::{ChangeDetector, Diff};

use std::fs::create_dir;
use std::path::PathBuf;
use std::thread::sleep;
use std::time::Duration;

use task_executor::Executor;

fn setup_fs() -> (tempfile::TempDir, PathBuf) {
    let tempdir = tempfile::TempDir::new().unwrap();
    let build_root = tempdir.path();
    create_dir(build_root.join("foo")).unwrap();
    let file_path = build_root.join("foo/watch_me.txt");
    std::fs::write(&file_path, b"contents").unwrap();
    (tempdir, file_path)
}

#[tokio::test]
async fn get_diff_of_same_view_is_empty() {
    let (tempdir, _file_path) = setup_fs();
    let detector = ChangeDetector::new(Executor::new(), tempdir.path().to_path_buf()).unwrap();
    let view = detector.get_current_view().unwrap();
    assert_eq!(detector.get_diff(view, view), Diff::Modified(Default::default()));
}

#[tokio::test]
async fn successive_views_with_no_change_are_empty() {
    let (tempdir, _file_path) = setup_fs();
    let detector = ChangeDetector::new(Executor::new(), tempdir.path().to_path_buf()).unwrap();
    let v1 = detector.get_current_view().unwrap();
    let v2 = detector.get_current_view().unwrap();
    assert_eq!(detector.get_diff(v1, v2), Diff::Modified(Default::default()));
}

#[tokio::test]
async fn receive_watch_event_on_file_change() {
    let (tempdir, file_path) = setup_fs();
    let detector = ChangeDetector::new(Executor::new(), tempdir.path().to_path_buf()).unwrap();
    let before = detector.get_current_view().unwrap();

    std::fs::write(&file_path, b"stnetnoc").unwrap();

    // Give the background thread a chance to observe the write.
    let mut after = before;
    let mut diff = Diff::Modified(Default::default());
    for _ in 0..20 {
        sleep(Duration::from_millis(100));
        after = detector.get_current_view().unwrap();
        diff = detector.get_diff(before, after);
        if diff != Diff::Modified(Default::default()) {
            break;
        }
    }
    match diff {
        Diff::Modified(paths) => assert!(
            paths.iter().any(|p| p.ends_with("watch_me.txt")),
            "expected watch_me.txt among {paths:?}"
        ),
        Diff::EverythingModified => {
            // A platform whose watcher coalesces generations is still a valid, if imprecise,
            // answer -- but only if we skipped at least one generation.
            assert_ne!(before, after);
        }
    }
}

#[tokio::test]
async fn non_adjacent_views_report_everything_modified() {
    let (tempdir, _file_path) = setup_fs();
    let detector = ChangeDetector::new(Executor::new(), tempdir.path().to_path_buf()).unwrap();
    let v1 = detector.get_current_view().unwrap();
    let _v2 = detector.get_current_view().unwrap();
    let v3 = detector.get_current_view().unwrap();
    assert_eq!(detector.get_diff(v1, v3), Diff::EverythingModified);
}

#[tokio::test]
async fn close_breaks_the_detector() {
    let (tempdir, _file_path) = setup_fs();
    let detector = ChangeDetector::new(Executor::new(), tempdir.path().to_path_buf()).unwrap();
    detector.close();
    assert!(detector.get_current_view().is_err());
    assert!(!detector.is_valid());
}
