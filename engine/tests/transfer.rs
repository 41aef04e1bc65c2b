use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use offload_engine::{
    read_manifest, read_manifest_journal, ChannelSink, ConflictPolicy, CopyMode, Engine, EngineConfig,
    EngineError, FatalSessionError, FixedSpaceProbe, LeafStatus, NullSink, Phase, PickedItem,
    TransferOptions, TransferProgress, TransferSummary, VerifyMode, JOURNAL_FILE, MANIFEST_FILE,
};

const MIB: usize = 1024 * 1024;

fn engine_with_space(avail: u64) -> Engine {
    Engine::with_probe(EngineConfig::default(), Box::new(FixedSpaceProbe(avail)))
}

/// 3 x 1 MiB images and 2 x 2 MiB documents.
fn trip_folder(root: &Path) -> PathBuf {
    let folder = root.join("trip");
    fs::create_dir_all(&folder).unwrap();
    for name in ["a.jpg", "b.jpg", "c.png"] {
        fs::write(folder.join(name), vec![1u8; MIB]).unwrap();
    }
    for name in ["itinerary.pdf", "notes.docx"] {
        fs::write(folder.join(name), vec![2u8; 2 * MIB]).unwrap();
    }
    folder
}

/// One worker, small buffers and unthrottled progress, so sinks see every step.
fn serial_engine() -> Engine {
    let mut config = EngineConfig::default().with_concurrency(1);
    config.copy_buffer_size = 64 * 1024;
    config.progress_interval = Duration::ZERO;
    Engine::with_probe(config, Box::new(FixedSpaceProbe(u64::MAX)))
}

fn destination(root: &Path) -> PathBuf {
    let dest = root.join("usb");
    fs::create_dir_all(&dest).unwrap();
    dest
}

#[test]
fn test_folder_copy_end_to_end() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let folder = trip_folder(temp_dir.path());
    let dest = destination(temp_dir.path());
    let engine = engine_with_space(100 * MIB as u64);
    let items = [PickedItem::folder(&folder)];

    let preflight = engine.preflight_scan(&items, &dest);
    assert_eq!(preflight.total_files, 5);
    assert_eq!(preflight.total_bytes, 7_340_032);
    assert!(preflight.will_fit);

    let summary = engine
        .start_transfer(&items, &TransferOptions::new(&dest), &NullSink)
        .expect("transfer should succeed");

    assert_eq!(summary.phase, Phase::Done);
    assert_eq!(summary.total_files, 5);
    assert_eq!(summary.copied_files, 5);
    assert_eq!(summary.error_files, 0);
    assert_eq!(summary.processed_files(), summary.total_files);
    assert!(summary.output_session_dir.starts_with(dest.join("Transfers")));

    let session = summary.session_dir();
    for name in ["a.jpg", "b.jpg", "c.png", "itinerary.pdf", "notes.docx"] {
        let copied = session.join("Folders").join("trip").join(name);
        assert_eq!(fs::read(&copied).unwrap(), fs::read(folder.join(name)).unwrap());
    }
    // Sources are untouched in copy mode.
    assert_eq!(fs::read_dir(&folder).unwrap().count(), 5);

    let manifest = read_manifest(&summary.manifest_path()).unwrap();
    assert_eq!(manifest.phase, Phase::Done);
    assert_eq!(manifest.entries.len(), 5);
    assert!(manifest.entries.iter().all(|e| e.status == LeafStatus::Copied));
    assert_eq!(read_manifest_journal(&session.join(JOURNAL_FILE)).unwrap().len(), 5);

    let root = dest.join("Transfers");
    assert!(root.join("README.txt").is_file());
    assert_eq!(
        fs::read_to_string(root.join("_latest.txt")).unwrap(),
        session.to_string_lossy()
    );
}

#[test]
fn test_insufficient_space_rejects_before_writing() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let folder = trip_folder(temp_dir.path());
    let dest = destination(temp_dir.path());
    let engine = engine_with_space(5 * MIB as u64);
    let items = [PickedItem::folder(&folder)];

    assert!(!engine.preflight_scan(&items, &dest).will_fit);

    let err = engine
        .start_transfer(&items, &TransferOptions::new(&dest), &NullSink)
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Rejected(FatalSessionError::InsufficientSpace { required: 7_340_032, .. })
    ));
    assert!(!dest.join("Transfers").exists());
    assert!(!engine.is_busy());
}

#[test]
fn test_missing_destination_is_rejected() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let engine = engine_with_space(u64::MAX);
    let err = engine
        .start_transfer(&[], &TransferOptions::new(temp_dir.path().join("unplugged")), &NullSink)
        .unwrap_err();
    assert!(matches!(
        err.fatal(),
        Some(FatalSessionError::DestinationMissing { .. })
    ));
}

#[test]
fn test_move_deletes_sources_only_after_copy() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = temp_dir.path().join("card");
    fs::create_dir_all(&src).unwrap();
    let names = ["IMG_0001.jpg", "clip.mov", "voice.m4a"];
    for (i, name) in names.iter().enumerate() {
        fs::write(src.join(name), vec![i as u8; 1000 + i]).unwrap();
    }
    let dest = destination(temp_dir.path());
    let items: Vec<_> = names.iter().map(|n| PickedItem::file(src.join(n))).collect();

    let mut options = TransferOptions::new(&dest);
    options.copy_mode = CopyMode::Move;
    options.verify_mode = VerifyMode::Sha256;
    let summary = engine_with_space(u64::MAX)
        .start_transfer(&items, &options, &NullSink)
        .unwrap();

    assert_eq!(summary.moved_files, 3);
    let manifest = read_manifest(&summary.manifest_path()).unwrap();
    for entry in &manifest.entries {
        assert_eq!(entry.status, LeafStatus::Moved);
        assert!(!entry.source_path.exists());
        assert_eq!(fs::metadata(&entry.dest_path).unwrap().len(), entry.size_bytes);
        assert_eq!(entry.checksum.as_ref().map(String::len), Some(64));
    }
    let session = summary.session_dir();
    assert!(session.join("Images").join("IMG_0001.jpg").is_file());
    assert!(session.join("Videos").join("clip.mov").is_file());
    assert!(session.join("Audio").join("voice.m4a").is_file());
}

#[test]
fn test_unreadable_leaf_is_recorded_and_session_continues() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let present = temp_dir.path().join("present.txt");
    fs::write(&present, b"here").unwrap();
    let missing = temp_dir.path().join("missing.txt");
    let dest = destination(temp_dir.path());

    let mut options = TransferOptions::new(&dest);
    options.copy_mode = CopyMode::Move;
    let summary = engine_with_space(u64::MAX)
        .start_transfer(
            &[PickedItem::file(&missing), PickedItem::file(&present)],
            &options,
            &NullSink,
        )
        .unwrap();

    assert_eq!(summary.phase, Phase::Done);
    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.error_files, 1);
    assert_eq!(summary.moved_files, 1);

    let entries = read_manifest(&summary.manifest_path()).unwrap().entries;
    assert_eq!(entries.len(), 2);
    let failed = entries.iter().find(|e| e.status == LeafStatus::Error).unwrap();
    assert_eq!(failed.source_path, missing);
    assert!(failed.error_message.is_some());
    assert!(!failed.dest_path.exists());
}

fn two_cameras(root: &Path) -> [PathBuf; 2] {
    let first = root.join("cam1").join("IMG_0001.jpg");
    let second = root.join("cam2").join("IMG_0001.jpg");
    for (path, data) in [(&first, b"one"), (&second, b"two")] {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, data).unwrap();
    }
    [first, second]
}

fn transfer_with_policy(
    engine: &Engine,
    items: &[PickedItem],
    dest: &Path,
    policy: ConflictPolicy,
) -> TransferSummary {
    let mut options = TransferOptions::new(dest);
    options.conflict_policy = policy;
    engine.start_transfer(items, &options, &NullSink).unwrap()
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn test_same_name_leaves_follow_the_conflict_policy() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let [first, second] = two_cameras(temp_dir.path());
    let items = [PickedItem::file(&first), PickedItem::file(&second)];
    let dest = destination(temp_dir.path());
    let engine = serial_engine();

    let renamed = transfer_with_policy(&engine, &items, &dest, ConflictPolicy::Rename);
    assert_eq!(renamed.copied_files, 2);
    let images = renamed.session_dir().join("Images");
    assert_eq!(file_names(&images), ["IMG_0001 (1).jpg", "IMG_0001.jpg"]);
    assert_eq!(fs::read(images.join("IMG_0001.jpg")).unwrap(), b"one");
    assert_eq!(fs::read(images.join("IMG_0001 (1).jpg")).unwrap(), b"two");

    let skipped = transfer_with_policy(&engine, &items, &dest, ConflictPolicy::Skip);
    assert_eq!(skipped.copied_files, 1);
    assert_eq!(skipped.skipped_files, 1);
    let images = skipped.session_dir().join("Images");
    assert_eq!(file_names(&images), ["IMG_0001.jpg"]);
    assert_eq!(fs::read(images.join("IMG_0001.jpg")).unwrap(), b"one");
    let entries = read_manifest(&skipped.manifest_path()).unwrap().entries;
    let skip = entries.iter().find(|e| e.status == LeafStatus::Skipped).unwrap();
    assert_eq!(skip.source_path, second);

    let overwritten = transfer_with_policy(&engine, &items, &dest, ConflictPolicy::Overwrite);
    assert_eq!(overwritten.copied_files, 2);
    assert_eq!(overwritten.skipped_files, 0);
    let images = overwritten.session_dir().join("Images");
    assert_eq!(file_names(&images), ["IMG_0001.jpg"]);
    assert_eq!(fs::read(images.join("IMG_0001.jpg")).unwrap(), b"two");
}

#[test]
fn test_concurrent_overwrites_of_one_name_take_turns() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let items: Vec<_> = (0..8u8)
        .map(|i| {
            let path = temp_dir.path().join(format!("card{i}")).join("DSC.jpg");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, vec![i; 256 * 1024]).unwrap();
            PickedItem::file(path)
        })
        .collect();
    let dest = destination(temp_dir.path());
    let mut config = EngineConfig::default().with_concurrency(4);
    config.copy_buffer_size = 16 * 1024;
    let engine = Engine::with_probe(config, Box::new(FixedSpaceProbe(u64::MAX)));

    let summary = transfer_with_policy(&engine, &items, &dest, ConflictPolicy::Overwrite);

    assert_eq!(summary.phase, Phase::Done);
    assert_eq!(summary.copied_files, 8);
    assert_eq!(summary.error_files, 0);
    let images = summary.session_dir().join("Images");
    assert_eq!(file_names(&images), ["DSC.jpg"]);
    let data = fs::read(images.join("DSC.jpg")).unwrap();
    assert_eq!(data.len(), 256 * 1024);
    assert!(data.iter().all(|b| *b == data[0]));
}

#[test]
fn test_flat_layout_without_grouping() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let folder = trip_folder(temp_dir.path());
    let dest = destination(temp_dir.path());

    let mut options = TransferOptions::new(&dest);
    options.group_by_type = false;
    options.group_by_date = true;
    options.dest_root_dir_name = "Backups".into();
    let summary = engine_with_space(u64::MAX)
        .start_transfer(&[PickedItem::folder(&folder)], &options, &NullSink)
        .unwrap();

    let session = summary.session_dir();
    assert!(session.join("trip").join("a.jpg").is_file());
    let day_dir = session.parent().unwrap();
    assert_eq!(day_dir.parent().unwrap(), dest.join("Backups"));
    assert!(day_dir.join("_latest.txt").is_file());
}

#[test]
fn test_progress_is_monotonic_and_ends_done() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let folder = trip_folder(temp_dir.path());
    let dest = destination(temp_dir.path());
    let (tx, rx) = crossbeam_channel::unbounded();

    let summary = engine_with_space(u64::MAX)
        .start_transfer(&[PickedItem::folder(&folder)], &TransferOptions::new(&dest), &ChannelSink(tx))
        .unwrap();

    let snapshots: Vec<TransferProgress> = rx.try_iter().collect();
    assert_eq!(snapshots.first().unwrap().phase, Phase::Scanning);
    let last = snapshots.last().unwrap();
    assert_eq!(last.phase, Phase::Done);
    assert_eq!(last.bytes_done, summary.total_bytes);
    assert_eq!(last.current_file, 5);
    assert_eq!(last.percent, 100.0);

    let copying: Vec<_> = snapshots.iter().filter(|p| p.phase != Phase::Scanning).collect();
    for pair in copying.windows(2) {
        assert!(pair[1].bytes_done >= pair[0].bytes_done);
        assert!(pair[1].current_file >= pair[0].current_file);
    }
}

#[test]
fn test_cancel_from_sink_stops_dispatch() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let folder = trip_folder(temp_dir.path());
    let dest = destination(temp_dir.path());
    let engine = Engine::with_probe(
        EngineConfig::default().with_concurrency(1),
        Box::new(FixedSpaceProbe(u64::MAX)),
    );

    let sink = |p: &TransferProgress| {
        if p.phase == Phase::Copying {
            engine.cancel_transfer();
        }
    };
    let summary = engine
        .start_transfer(&[PickedItem::folder(&folder)], &TransferOptions::new(&dest), &sink)
        .unwrap();

    assert_eq!(summary.phase, Phase::Cancelled);
    assert!(summary.processed_files() < summary.total_files);

    let manifest = read_manifest(&summary.manifest_path()).unwrap();
    assert_eq!(manifest.phase, Phase::Cancelled);
    assert_eq!(manifest.entries.len() as u64, summary.processed_files());
    let unique: HashSet<_> = manifest.entries.iter().map(|e| &e.source_path).collect();
    assert_eq!(unique.len(), manifest.entries.len());

    // The engine is free again afterwards.
    assert!(!engine.is_busy());
    engine.cancel_transfer();
}

#[test]
fn test_second_session_is_rejected_while_one_runs() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file = temp_dir.path().join("a.txt");
    fs::write(&file, b"a").unwrap();
    let dest = destination(temp_dir.path());
    let engine = engine_with_space(u64::MAX);
    let options = TransferOptions::new(&dest);
    let nested: Mutex<Option<bool>> = Mutex::new(None);

    let sink = |p: &TransferProgress| {
        if p.phase == Phase::Copying {
            let result = engine.start_transfer(&[PickedItem::file(&file)], &options, &NullSink);
            *nested.lock().unwrap() = Some(matches!(result, Err(EngineError::SessionActive)));
        }
    };
    let summary = engine
        .start_transfer(&[PickedItem::file(&file)], &options, &sink)
        .unwrap();

    assert_eq!(summary.copied_files, 1);
    assert_eq!(*nested.lock().unwrap(), Some(true));
}

#[test]
fn test_cancel_during_a_copy_lets_only_that_leaf_finish() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let src = temp_dir.path().join("footage");
    fs::create_dir_all(&src).unwrap();
    for i in 0..4u8 {
        fs::write(src.join(format!("clip{i}.mov")), vec![i; 2 * MIB]).unwrap();
    }
    let dest = destination(temp_dir.path());
    let engine = serial_engine();

    for _ in 0..5 {
        let seen = Mutex::new(Vec::new());
        let sink = |p: &TransferProgress| {
            seen.lock().unwrap().push(p.current_file);
            if p.phase == Phase::Copying && p.current_file == 1 && p.bytes_done > 0 {
                engine.cancel_transfer();
            }
        };
        let summary = engine
            .start_transfer(&[PickedItem::folder(&src)], &TransferOptions::new(&dest), &sink)
            .unwrap();

        assert_eq!(summary.phase, Phase::Cancelled);
        assert_eq!(summary.copied_files, 1);
        assert_eq!(summary.processed_files(), 1);
        assert_eq!(read_manifest(&summary.manifest_path()).unwrap().entries.len(), 1);
        assert!(seen.lock().unwrap().iter().all(|&n| n <= 1));
    }
}

#[test]
fn test_lost_session_directory_aborts_with_partial_summary() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let folder = trip_folder(temp_dir.path());
    let dest = destination(temp_dir.path());
    let unplugged = temp_dir.path().join("unplugged");
    let engine = serial_engine();
    let pulled = AtomicBool::new(false);

    // Move the session directory away as the second leaf is dispatched.
    let sink = |p: &TransferProgress| {
        if p.phase == Phase::Copying && p.current_file == 2 && !pulled.swap(true, Ordering::SeqCst) {
            let session = fs::read_dir(dest.join("Transfers"))
                .unwrap()
                .map(|e| e.unwrap().path())
                .find(|p| p.is_dir())
                .unwrap();
            fs::rename(session, &unplugged).unwrap();
        }
    };
    let err = engine
        .start_transfer(&[PickedItem::folder(&folder)], &TransferOptions::new(&dest), &sink)
        .unwrap_err();

    let (cause, summary) = match err {
        EngineError::Aborted { cause, summary } => (cause, summary),
        other => panic!("expected an aborted session, got {other:?}"),
    };
    assert!(matches!(cause, FatalSessionError::DestinationLost { .. }));
    assert_eq!(summary.phase, Phase::Error);
    assert_eq!(summary.total_files, 5);
    assert_eq!(summary.copied_files, 1);
    assert_eq!(summary.processed_files(), 1);
    assert!(!summary.output_session_dir.exists());

    // The journal followed the directory; the final manifest could not be written.
    let journal = read_manifest_journal(&unplugged.join(JOURNAL_FILE)).unwrap();
    assert_eq!(journal.len(), 1);
    assert!(journal[0].source_path.ends_with("a.jpg"));
    assert!(!unplugged.join(MANIFEST_FILE).exists());
    assert!(!engine.is_busy());
}
