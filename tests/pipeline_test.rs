//! Full capture pipeline on a scripted page, written to temp directories


use earth_history_capture::capture::{archive_path, run_session, CaptureRequest};
use earth_history_capture::report::{METADATA_FILE_NAME, REPORT_FILE_NAME};
use earth_history_capture::workspace::{ERROR_PAGE_NAME, ERROR_SCREENSHOT_NAME, LOG_FILE_NAME};
use earth_history_capture::{CaptureConfig, CaptureError, SessionState};
use fake_earth::{four_epoch_timeline, temp_root, FakeEarthPage};
use std::collections::BTreeSet;

fn config_for(name: &str) -> CaptureConfig {
    let mut config = CaptureConfig {
        output_root: temp_root(name),
        ..Default::default()
    };
    config.ocr.enabled = false;
    config
}

fn read_metadata(dir: &std::path::Path) -> anyhow::Result<serde_json::Value> {
    let text = std::fs::read_to_string(dir.join(METADATA_FILE_NAME))?;
    Ok(serde_json::from_str(&text)?)
}

#[tokio::test]
async fn test_accra_capture_end_to_end() -> anyhow::Result<()> {
    let config = config_for("e2e");
    let page = FakeEarthPage::new(four_epoch_timeline(), config.scan.timeline_y);
    let (mut session, mut workspace) =
        CaptureRequest::new("5.5555,-0.2616", 2019, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();

    let output = run_session(&page, &mut session, &mut workspace, &config).await?;

    assert_eq!(output, archive_path(&dir));
    assert!(output.exists());
    assert_eq!(session.state, SessionState::Completed);

    let navigations = page.navigations();
    assert_eq!(navigations.len(), 1);
    assert!(navigations[0].contains("@5.5555,-0.2616,"));
    assert_eq!(page.keys(), vec!["Escape".to_string()]);

    let metadata = read_metadata(&dir)?;
    assert_eq!(metadata["location"], "5.5555,-0.2616");
    assert_eq!(metadata["capturedImages"], 4);
    assert_eq!(metadata["totalSamples"], 25);
    assert_eq!(metadata["actualYearRange"], "est_2015 to est_2023");
    let files: Vec<&str> = metadata["images"]
        .as_array()
        .map(|images| images.iter().filter_map(|i| i["filename"].as_str()).collect())
        .unwrap_or_default();
    assert_eq!(
        files,
        vec![
            "5_5555_0_2616_est_2015.png",
            "5_5555_0_2616_est_2016.png",
            "5_5555_0_2616_est_2019.png",
            "5_5555_0_2616_est_2023.png",
        ]
    );
    for file in &files {
        assert!(dir.join(file).exists(), "{} missing", file);
    }

    let html = std::fs::read_to_string(dir.join(REPORT_FILE_NAME))?;
    assert_eq!(html.matches("class=\"card\"").count(), 4);
    let first = html.find("est_2015").unwrap_or(usize::MAX);
    let last = html.rfind("est_2023").unwrap_or(0);
    assert!(first < last);

    for stage in ["01_loaded.png", "02_history_mode.png", "03_scan_complete.png"] {
        assert!(dir.join(stage).exists(), "{} missing", stage);
    }
    let log = std::fs::read_to_string(dir.join(LOG_FILE_NAME))?;
    assert!(log.contains("Historical imagery mode active"));
    assert!(!dir.join(ERROR_SCREENSHOT_NAME).exists());

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}

#[tokio::test]
async fn test_no_archive_returns_session_directory() -> anyhow::Result<()> {
    let mut config = config_for("no-archive");
    config.create_archive = false;
    config.scan.num_points = 3;
    let page = FakeEarthPage::new(four_epoch_timeline(), config.scan.timeline_y);
    let (mut session, mut workspace) =
        CaptureRequest::new("5.5555,-0.2616", 2019, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();

    let output = run_session(&page, &mut session, &mut workspace, &config).await?;

    assert_eq!(output, dir);
    assert!(!archive_path(&dir).exists());
    // 400, 800, 1200: only the last lands in a new epoch
    let metadata = read_metadata(&dir)?;
    assert_eq!(metadata["capturedImages"], 1);

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}

#[tokio::test]
async fn test_zero_unique_frames_still_reports() -> anyhow::Result<()> {
    let config = config_for("zero-unique");
    let page = FakeEarthPage::new(
        vec![fake_earth::Epoch::new(f64::MIN, 1000, "")],
        config.scan.timeline_y,
    );
    let (mut session, mut workspace) =
        CaptureRequest::new("10,10", 2020, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();

    run_session(&page, &mut session, &mut workspace, &config).await?;

    let metadata = read_metadata(&dir)?;
    assert_eq!(metadata["capturedImages"], 0);
    assert_eq!(metadata["actualYearRange"], "N/A");
    assert_eq!(metadata["images"].as_array().map(Vec::len), Some(0));
    let html = std::fs::read_to_string(dir.join(REPORT_FILE_NAME))?;
    assert!(html.contains("No unique frames"));

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}

#[tokio::test]
async fn test_history_mode_failure_dumps_diagnostics() -> anyhow::Result<()> {
    let mut config = config_for("mode-failure");
    config.waits.mode_activation_retries = 2;
    let page = FakeEarthPage::new(four_epoch_timeline(), config.scan.timeline_y).stubborn();
    let (mut session, mut workspace) =
        CaptureRequest::new("5.5555,-0.2616", 2019, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();

    let err = run_session(&page, &mut session, &mut workspace, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::ModeActivation(_)));
    assert_eq!(page.clicks().len(), 2);
    assert!(dir.join(ERROR_SCREENSHOT_NAME).exists());
    assert!(dir.join(ERROR_PAGE_NAME).exists());
    // Nothing was sampled, so there is no partial report
    assert!(!dir.join(METADATA_FILE_NAME).exists());
    assert!(matches!(session.state, SessionState::Failed { .. }));

    let log = std::fs::read_to_string(dir.join(LOG_FILE_NAME))?;
    assert!(log.contains("ERROR Capture failed"));

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}

#[tokio::test]
async fn test_lost_browser_leaves_partial_report() -> anyhow::Result<()> {
    let mut config = config_for("partial");
    config.scan.num_points = 5;
    let page = FakeEarthPage::new(four_epoch_timeline(), config.scan.timeline_y).die_at(1120.0);
    let (mut session, mut workspace) =
        CaptureRequest::new("5.5555,-0.2616", 2019, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();

    let err = run_session(&page, &mut session, &mut workspace, &config)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    let metadata = read_metadata(&dir)?;
    assert_eq!(metadata["totalSamples"], 3);
    assert_eq!(metadata["status"]["state"], "failed");
    assert!(!archive_path(&dir).exists());

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}

#[tokio::test]
async fn test_archive_holds_the_whole_session_directory() -> anyhow::Result<()> {
    let mut config = config_for("archive-contents");
    config.scan.num_points = 3;
    let page = FakeEarthPage::new(four_epoch_timeline(), config.scan.timeline_y);
    let (mut session, mut workspace) =
        CaptureRequest::new("5.5555,-0.2616", 2019, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let output = run_session(&page, &mut session, &mut workspace, &config).await?;

    let mut archive = zip::ZipArchive::new(std::fs::File::open(&output)?)?;
    let names: BTreeSet<String> = (0..archive.len())
        .map(|i| archive.by_index(i).map(|f| f.name().to_string()))
        .collect::<Result<_, _>>()?;
    assert!(names.iter().all(|n| n.starts_with(&format!("{}/", dir_name))));

    let on_disk: BTreeSet<String> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .map(|e| format!("{}/{}", dir_name, e.file_name().to_string_lossy()))
        .collect();
    assert_eq!(names, on_disk);
    assert!(names.contains(&format!("{}/{}", dir_name, METADATA_FILE_NAME)));
    assert!(names.contains(&format!("{}/{}", dir_name, REPORT_FILE_NAME)));

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}

#[tokio::test]
async fn test_archive_failure_keeps_loose_files() -> anyhow::Result<()> {
    let config = config_for("archive-failure");
    let page = FakeEarthPage::new(four_epoch_timeline(), config.scan.timeline_y);
    let (mut session, mut workspace) =
        CaptureRequest::new("5.5555,-0.2616", 2019, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();
    // A directory where the zip should go makes archive creation fail
    std::fs::create_dir_all(archive_path(&dir))?;

    let output = run_session(&page, &mut session, &mut workspace, &config).await?;

    assert_eq!(output, dir);
    assert_eq!(session.state, SessionState::Completed);
    assert!(dir.join(METADATA_FILE_NAME).exists());
    assert!(dir.join(REPORT_FILE_NAME).exists());
    assert!(dir.join("5_5555_0_2616_est_2015.png").exists());
    let log = std::fs::read_to_string(dir.join(LOG_FILE_NAME))?;
    assert!(log.contains("WARN Archive creation failed"));

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}

#[tokio::test]
async fn test_report_write_failure_dumps_diagnostics() -> anyhow::Result<()> {
    let mut config = config_for("report-failure");
    config.scan.num_points = 3;
    let page = FakeEarthPage::new(four_epoch_timeline(), config.scan.timeline_y);
    let (mut session, mut workspace) =
        CaptureRequest::new("5.5555,-0.2616", 2019, true).open_session(&config)?;
    let dir = workspace.dir().to_path_buf();
    // metadata.json cannot be written over a directory
    std::fs::create_dir_all(dir.join(METADATA_FILE_NAME))?;

    let err = run_session(&page, &mut session, &mut workspace, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, CaptureError::Io(_)));
    assert!(matches!(session.state, SessionState::Failed { .. }));
    assert!(dir.join(ERROR_SCREENSHOT_NAME).exists());
    assert!(dir.join(ERROR_PAGE_NAME).exists());
    assert!(!archive_path(&dir).exists());

    std::fs::remove_dir_all(&config.output_root).ok();
    Ok(())
}
