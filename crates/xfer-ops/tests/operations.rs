mod support;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use support::Fixture;
use uuid::Uuid;
use xfer_ops::{
    ConfirmKind, ConfirmResponse, Configuration, CopyRequest, CreateDirectoryRequest, OperationError, OperationKind,
    OperationStatus, Operations, RemoveRequest,
};

fn copy_request(fx: &Fixture, elements: &[&str], destination: &str) -> CopyRequest {
    CopyRequest {
        source: "src".into(),
        source_elements: elements.iter().map(|e| fx.path(e)).collect(),
        destination: "dst".into(),
        destination_path: fx.path(destination),
        ..Default::default()
    }
}

fn keep_choice(result: bool) -> ConfirmResponse {
    ConfirmResponse { result, checked: true }
}

// ─── Copy ────────────────────────────────────────────────────────────

#[tokio::test]
async fn copies_files_and_directories() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"0123456789");
    fx.write("src/dir/b.txt", b"01234567890123456789");

    let op = fx
        .ops
        .copy(copy_request(&fx, &["src/a.txt", "src/dir"], "dst"))
        .await
        .unwrap();
    let done = op.wait().await;

    assert_eq!(done.status, OperationStatus::Done, "{:?}", done.fatal_error);
    assert_eq!(done.kind, OperationKind::Copy);
    assert!((done.progress - 1.0).abs() < 1e-9);
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"0123456789");
    assert_eq!(fx.read("dst/dir/b.txt").unwrap(), b"01234567890123456789");
    assert_eq!(fx.read("src/a.txt").unwrap(), b"0123456789");

    let mut affected = fx.dialog.wait_for_reloads(1).await.remove(0);
    affected.sort();
    assert_eq!(affected, vec!["dst".to_string(), "src".to_string()]);

    let reports = fx.dialog.reports.lock().unwrap().clone();
    assert!(reports.iter().any(|r| r.status == OperationStatus::Pending));
    let mut last = 0.0;
    for report in &reports {
        assert!(report.progress >= last);
        last = report.progress;
    }
}

#[tokio::test]
async fn persisted_plan_lists_directories_before_their_contents() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"0123456789");
    fx.write("src/dir/b.txt", b"01234567890123456789");
    fx.dst.hooks.hold.store(true, Ordering::SeqCst);

    let stored = Arc::new(Mutex::new(None));
    let sink = stored.clone();
    let mut request = copy_request(&fx, &["src/a.txt", "src/dir"], "dst");
    request.save_operation_info = true;
    request.operation_info_callback = Some(Arc::new(move |uuid: Uuid| {
        *sink.lock().unwrap() = Some(uuid);
    }));
    let op = fx.ops.copy(request).await.unwrap();
    let uuid = stored.lock().unwrap().unwrap();
    assert_eq!(uuid, op.uuid());

    fx.dst.hooks.wait_for_writes(1).await;
    let info_path = fx.ops.store().directory(uuid).join("info.json");
    let info: serde_json::Value = serde_json::from_slice(&std::fs::read(&info_path).unwrap()).unwrap();
    assert_eq!(info["type"], "copy");
    assert_eq!(info["version"], 1);
    assert_eq!(info["source"], "src");
    assert_eq!(info["destination"], "dst");

    let list = info["list"].as_array().unwrap();
    let froms: Vec<&str> = list.iter().map(|e| e["from"].as_str().unwrap()).collect();
    assert_eq!(
        froms,
        vec![fx.path("src/a.txt"), fx.path("src/dir"), fx.path("src/dir/b.txt")]
    );
    assert_eq!(list[0]["size"], 10);
    assert_eq!(list[1]["isDirectory"], true);
    assert_eq!(list[1]["isFile"], false);
    assert_eq!(list[2]["name"], "b.txt");
    assert_eq!(list[2]["isFile"], true);
    let sep = std::path::MAIN_SEPARATOR.to_string();
    assert!(list[1]["to"].as_str().unwrap().ends_with(&sep));
    assert_eq!(fx.ops.recoverable().await.unwrap(), vec![uuid]);

    fx.dst.hooks.hold.store(false, Ordering::SeqCst);
    fx.dst.hooks.release.notify_one();
    assert_eq!(op.wait().await.status, OperationStatus::Done);
    assert!(!fx.ops.store().directory(uuid).exists());
    assert!(fx.ops.recoverable().await.unwrap().is_empty());
}

#[tokio::test]
async fn flaky_writes_are_retried() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"payload");
    fx.dst.hooks.flaky_writes.store(1, Ordering::SeqCst);

    let op = fx.ops.copy(copy_request(&fx, &["src/a.txt"], "dst")).await.unwrap();
    let done = op.wait().await;

    assert_eq!(done.status, OperationStatus::Done, "{:?}", done.fatal_error);
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"payload");
    assert_eq!(fx.dst.hooks.writes_started.load(Ordering::SeqCst), 2);
    // The timeout dropped the first destination session.
    assert!(fx.dst.hooks.sessions.load(Ordering::SeqCst) >= 2);
    assert_eq!(fx.dialog.prompts_of(ConfirmKind::Retry), 0);
}

#[tokio::test]
async fn direct_copy_lands_on_the_destination_path() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"renamed");
    let mut request = copy_request(&fx, &["src/a.txt"], "dst/b.txt");
    request.direct = true;

    let done = fx.ops.copy(request).await.unwrap().wait().await;
    assert_eq!(done.status, OperationStatus::Done);
    assert_eq!(fx.read("dst/b.txt").unwrap(), b"renamed");
    assert!(fx.read("dst/a.txt").is_none());
}

#[tokio::test]
async fn two_elements_mapping_to_one_destination_conflict() {
    let fx = Fixture::new();
    fx.write("src/one/x.txt", b"1");
    fx.write("src/two/x.txt", b"2");

    let done = fx
        .ops
        .copy(copy_request(&fx, &["src/one/x.txt", "src/two/x.txt"], "dst"))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(done.status, OperationStatus::Error);
    assert!(done.fatal_error.unwrap().starts_with("conflict"));
    assert!(fx.read("dst/x.txt").is_none());
}

#[tokio::test]
async fn concurrent_writers_of_one_file_conflict() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"first");
    fx.dst.hooks.hold.store(true, Ordering::SeqCst);

    let first = fx.ops.copy(copy_request(&fx, &["src/a.txt"], "dst")).await.unwrap();
    fx.dst.hooks.wait_for_writes(1).await;

    let second = fx.ops.copy(copy_request(&fx, &["src/a.txt"], "dst")).await.unwrap();
    let refused = second.wait().await;
    assert_eq!(refused.status, OperationStatus::Error);
    assert!(refused.fatal_error.unwrap().contains(&fx.path("src/a.txt")));

    fx.dst.hooks.hold.store(false, Ordering::SeqCst);
    fx.dst.hooks.release.notify_one();
    assert_eq!(first.wait().await.status, OperationStatus::Done);
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"first");
}

#[tokio::test]
async fn unknown_file_system_is_rejected() {
    let fx = Fixture::new();
    let mut request = copy_request(&fx, &["src/a.txt"], "dst");
    request.destination = "elsewhere".into();
    match fx.ops.copy(request).await {
        Err(OperationError::UnknownAdapter(id)) => assert_eq!(id, "elsewhere"),
        other => panic!("unexpected {:?}", other.map(|op| op.snapshot())),
    }
}

// ─── Overwrites ──────────────────────────────────────────────────────

#[tokio::test]
async fn remembered_overwrite_is_asked_once() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"new a");
    fx.write("src/b.txt", b"new b");
    fx.write("dst/a.txt", b"old a");
    fx.write("dst/b.txt", b"old b");
    fx.dialog.answer(ConfirmKind::Overwrite, keep_choice(true));

    let done = fx
        .ops
        .copy(copy_request(&fx, &["src/a.txt", "src/b.txt"], "dst"))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(done.status, OperationStatus::Done);
    assert_eq!(fx.dialog.prompts_of(ConfirmKind::Overwrite), 1);
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"new a");
    assert_eq!(fx.read("dst/b.txt").unwrap(), b"new b");
}

#[tokio::test]
async fn declined_overwrites_keep_existing_files() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"new a");
    fx.write("src/b.txt", b"new b");
    fx.write("dst/a.txt", b"old a");
    fx.write("dst/b.txt", b"old b");

    let done = fx
        .ops
        .copy(copy_request(&fx, &["src/a.txt", "src/b.txt"], "dst"))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(done.status, OperationStatus::Done);
    assert_eq!(fx.dialog.prompts_of(ConfirmKind::Overwrite), 2);
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"old a");
    assert!(fx.dst.hooks.written_names().is_empty());
}

// ─── Move ────────────────────────────────────────────────────────────

#[tokio::test]
async fn move_removes_sources_after_copying() {
    let fx = Fixture::new();
    fx.write("src/dir/a.txt", b"a");
    fx.write("src/dir/sub/b.txt", b"b");

    let done = fx
        .ops
        .move_(copy_request(&fx, &["src/dir"], "dst"))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(done.status, OperationStatus::Done, "{:?}", done.fatal_error);
    assert_eq!(done.kind, OperationKind::Move);
    assert_eq!(fx.read("dst/dir/sub/b.txt").unwrap(), b"b");
    assert!(!fx.tmp.path().join("src/dir").exists());
}

#[tokio::test]
async fn corrupted_move_keeps_every_source() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"intact");
    fx.write("src/b.txt", b"damaged in transit");
    fx.dst.hooks.corrupt("b.txt");

    let done = fx
        .ops
        .move_(copy_request(&fx, &["src/a.txt", "src/b.txt"], "dst"))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(done.status, OperationStatus::Error);
    // The declined retry pass leaves the corrupted file outstanding.
    let fatal = done.fatal_error.unwrap();
    assert!(fatal.starts_with("1 item(s) could not be processed"), "{}", fatal);
    assert!(fatal.contains(&fx.path("src/b.txt")));
    assert_eq!(fx.dialog.prompts_of(ConfirmKind::Retry), 1);
    assert_eq!(fx.read("src/a.txt").unwrap(), b"intact");
    assert_eq!(fx.read("src/b.txt").unwrap(), b"damaged in transit");
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"intact");
    // A checksum mismatch is not retried within the pass.
    assert_eq!(fx.dst.hooks.writes_started.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn skipped_entries_keep_their_move_source() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"mine");
    fx.write("src/b.txt", b"b");
    fx.write("dst/a.txt", b"theirs");

    let done = fx
        .ops
        .move_(copy_request(&fx, &["src/a.txt", "src/b.txt"], "dst"))
        .await
        .unwrap()
        .wait()
        .await;

    assert_eq!(done.status, OperationStatus::Done);
    assert_eq!(fx.read("src/a.txt").unwrap(), b"mine");
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"theirs");
    assert!(fx.read("src/b.txt").is_none());
    assert_eq!(fx.read("dst/b.txt").unwrap(), b"b");
}

// ─── Recovery ────────────────────────────────────────────────────────

#[tokio::test]
async fn interrupted_copy_resumes_with_the_remaining_entries() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"a");
    fx.write("src/dir/b.txt", b"b");
    fx.write("src/dir/c.txt", b"c");
    fx.dst.hooks.unreachable("c.txt");

    let mut request = copy_request(&fx, &["src/a.txt", "src/dir"], "dst");
    request.save_operation_info = true;
    let first = fx.ops.copy(request).await.unwrap();
    let uuid = first.uuid();
    let failed = first.wait().await;
    assert_eq!(failed.status, OperationStatus::Error);

    let store = fx.ops.store();
    let log = std::fs::read_to_string(store.directory(uuid).join("completed")).unwrap();
    let mut lines: Vec<&str> = log.lines().collect();
    lines.sort();
    assert_eq!(lines, vec![fx.path("src/a.txt"), fx.path("src/dir/b.txt")]);
    assert_eq!(fx.ops.recoverable().await.unwrap(), vec![uuid]);

    fx.dst.hooks.heal();
    fx.dst.hooks.written.lock().unwrap().clear();
    let resumed = fx.ops.recover(uuid).await.unwrap();
    assert_eq!(resumed.uuid(), uuid);
    let done = resumed.wait().await;

    assert_eq!(done.status, OperationStatus::Done, "{:?}", done.fatal_error);
    assert_eq!(fx.dst.hooks.written_names(), vec!["c.txt".to_string()]);
    assert_eq!(fx.read("dst/dir/c.txt").unwrap(), b"c");
    assert_eq!(fx.read("dst/a.txt").unwrap(), b"a");
    assert!(fx.ops.recoverable().await.unwrap().is_empty());
}

#[tokio::test]
async fn recovering_an_unknown_operation_fails() {
    let fx = Fixture::new();
    let err = fx.ops.recover(Uuid::new_v4()).await.err().unwrap();
    assert!(matches!(err, OperationError::Persistence(_)));
}

// ─── Abort ───────────────────────────────────────────────────────────

#[tokio::test]
async fn confirmed_abort_stops_before_the_next_entry() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"a");
    fx.write("src/b.txt", b"b");
    fx.dst.hooks.hold.store(true, Ordering::SeqCst);
    fx.dialog.answer(ConfirmKind::Abort, ConfirmResponse::yes());

    let op = fx
        .ops
        .copy(copy_request(&fx, &["src/a.txt", "src/b.txt"], "dst"))
        .await
        .unwrap();
    fx.dst.hooks.wait_for_writes(1).await;
    assert_eq!(fx.ops.running().len(), 1);

    assert!(fx.ops.abort(op.id()).unwrap().await);
    fx.dst.hooks.hold.store(false, Ordering::SeqCst);
    fx.dst.hooks.release.notify_one();

    let done = op.wait().await;
    assert_eq!(done.status, OperationStatus::Aborted);
    assert!(done.fatal_error.is_none());
    assert_eq!(fx.dst.hooks.writes_started.load(Ordering::SeqCst), 1);
    assert!(fx.read("dst/b.txt").is_none());
    assert!(fx.ops.abort(u64::MAX).is_none());
}

#[tokio::test]
async fn declined_abort_lets_the_copy_finish() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"a");
    fx.dst.hooks.hold.store(true, Ordering::SeqCst);

    let op = fx.ops.copy(copy_request(&fx, &["src/a.txt"], "dst")).await.unwrap();
    fx.dst.hooks.wait_for_writes(1).await;
    assert!(!fx.ops.abort(op.id()).unwrap().await);

    fx.dst.hooks.hold.store(false, Ordering::SeqCst);
    fx.dst.hooks.release.notify_one();
    assert_eq!(op.wait().await.status, OperationStatus::Done);
    assert_eq!(fx.dialog.prompts_of(ConfirmKind::Abort), 1);
}

// ─── Remove ──────────────────────────────────────────────────────────

#[tokio::test]
async fn declined_removal_never_starts() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"a");

    let op = fx
        .ops
        .remove(RemoveRequest {
            source: "src".into(),
            source_elements: vec![fx.path("src/a.txt")],
        })
        .await
        .unwrap();

    assert!(op.is_none());
    assert_eq!(fx.dialog.prompts_of(ConfirmKind::Remove), 1);
    assert_eq!(fx.read("src/a.txt").unwrap(), b"a");
    assert!(fx.dialog.reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn confirmed_removal_deletes_files_and_trees() {
    let fx = Fixture::new();
    fx.write("src/a.txt", b"a");
    fx.write("src/dir/b.txt", b"b");
    fx.dialog.answer(ConfirmKind::Remove, ConfirmResponse::yes());

    let op = fx
        .ops
        .remove(RemoveRequest {
            source: "src".into(),
            source_elements: vec![fx.path("src/a.txt"), fx.path("src/dir")],
        })
        .await
        .unwrap()
        .unwrap();
    let done = op.wait().await;

    assert_eq!(done.status, OperationStatus::Done);
    assert_eq!(done.kind, OperationKind::Remove);
    assert!(!fx.tmp.path().join("src/a.txt").exists());
    assert!(!fx.tmp.path().join("src/dir").exists());
    assert_eq!(fx.dialog.wait_for_reloads(1).await[0], vec!["src".to_string()]);
}

#[tokio::test]
async fn removing_a_missing_element_fails() {
    let fx = Fixture::new();
    fx.dialog.answer(ConfirmKind::Remove, ConfirmResponse::yes());

    let done = fx
        .ops
        .remove(RemoveRequest {
            source: "src".into(),
            source_elements: vec![fx.path("nothing-here")],
        })
        .await
        .unwrap()
        .unwrap()
        .wait()
        .await;

    assert_eq!(done.status, OperationStatus::Error);
    assert!(done.fatal_error.unwrap().contains("nothing-here"));
}

// ─── Directories ─────────────────────────────────────────────────────

fn mkdir(fx: &Fixture, rel: &str, full: bool) -> CreateDirectoryRequest {
    CreateDirectoryRequest {
        source: "src".into(),
        source_path: fx.path(rel),
        is_new_directory_path: full,
    }
}

#[tokio::test]
async fn creating_an_existing_directory_succeeds() {
    let fx = Fixture::new();
    for _ in 0..2 {
        let op = fx.ops.create_directory(mkdir(&fx, "made", true)).await.unwrap().unwrap();
        assert_eq!(op.wait().await.status, OperationStatus::Done);
    }
    assert!(fx.tmp.path().join("made").is_dir());
}

#[tokio::test]
async fn creating_a_directory_over_a_file_fails() {
    let fx = Fixture::new();
    fx.write("taken", b"file");
    let op = fx.ops.create_directory(mkdir(&fx, "taken", true)).await.unwrap().unwrap();
    let done = op.wait().await;
    assert_eq!(done.status, OperationStatus::Error);
    assert_eq!(done.kind, OperationKind::Directory);
}

#[tokio::test]
async fn directory_name_is_prompted_until_acceptable() {
    let fx = Fixture::new();
    fx.write("parent/taken/keep", b"");
    fx.dialog.type_in(&["bad/name", "taken", " fresh "]);

    let op = fx.ops.create_directory(mkdir(&fx, "parent", false)).await.unwrap().unwrap();
    assert_eq!(op.wait().await.status, OperationStatus::Done);
    assert!(fx.tmp.path().join("parent/fresh").is_dir());

    let requests = fx.dialog.input_requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 3);
    assert!(requests[0].error.is_none());
    assert!(requests[1].error.is_some());
    assert!(requests[2].error.as_deref().unwrap().contains("already exists"));
}

#[tokio::test]
async fn cancelled_name_prompt_creates_nothing() {
    let fx = Fixture::new();
    std::fs::create_dir(fx.tmp.path().join("parent")).unwrap();
    let op = fx.ops.create_directory(mkdir(&fx, "parent", false)).await.unwrap();
    assert!(op.is_none());
    assert_eq!(std::fs::read_dir(fx.tmp.path().join("parent")).unwrap().count(), 0);
}

// ─── Configuration ───────────────────────────────────────────────────

#[tokio::test]
async fn reload_swaps_the_configured_file_systems() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
    let config = |id: &str| {
        Configuration::from_json(&format!(
            r#"{{"fileSystems":[{{"type":"local","identifier":"{}"}}],
                "operations":{{"infoDirectory":{:?},"retryBackoffMs":0}}}}"#,
            id,
            tmp.path().join("ops")
        ))
        .unwrap()
    };
    let dialog = support::ScriptedDialog::new();
    let ops = Operations::new(&config("disk"), dialog.clone()).unwrap();
    let element = tmp.path().join("a.txt").to_string_lossy().to_string();
    let request = |source: &str| CopyRequest {
        source: source.into(),
        source_elements: vec![element.clone()],
        destination: source.into(),
        destination_path: tmp.path().join("copy").to_string_lossy().to_string(),
        ..Default::default()
    };

    let done = ops.copy(request("disk")).await.unwrap().wait().await;
    assert_eq!(done.status, OperationStatus::Done, "{:?}", done.fatal_error);

    ops.reload(&config("archive")).await.unwrap();
    assert!(matches!(
        ops.copy(request("disk")).await.err(),
        Some(OperationError::UnknownAdapter(_))
    ));
    let again = ops.copy(request("archive")).await.unwrap().wait().await;
    assert_eq!(again.status, OperationStatus::Done, "{:?}", again.fatal_error);
}

#[tokio::test]
async fn empty_requests_are_refused() {
    let fx = Fixture::new();
    assert!(fx.ops.copy(copy_request(&fx, &[], "dst")).await.is_err());
    let mut direct = copy_request(&fx, &["src/a", "src/b"], "dst");
    direct.direct = true;
    assert!(fx.ops.move_(direct).await.is_err());
    assert!(fx
        .ops
        .remove(RemoveRequest {
            source: "src".into(),
            source_elements: vec![],
        })
        .await
        .is_err());
}
