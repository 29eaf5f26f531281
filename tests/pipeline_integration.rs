//! Integration tests for Flux Drill
//!
//! Drives whole runs through a scripted tool, plus a shell-script stand-in
//! for the real binary on Unix.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::tempdir;

use flux_drill::core::{Detection, FailureKind, Pipeline, PipelineSettings, PipelineState};
use flux_drill::progress::ProgressLog;
use flux_drill::report::RunReport;
use flux_drill::tool::{
    CancelToken, FluxTool, Invocation, Subcommand, ToolError, ToolExit, ToolStream,
};

const NO_INDEX: &str = "Command Failed: GetFluxStatus: No Index";

/// Scripted stand-in for the external tool
struct ScriptedTool {
    responsive: Vec<&'static str>,
    scores: Vec<(&'static str, &'static str)>,
    capture_exit: ToolExit,
    write_exit: ToolExit,
    cancel_during_capture: Option<CancelToken>,
    calls: Mutex<Vec<Invocation>>,
}

impl ScriptedTool {
    fn new() -> Self {
        Self {
            responsive: vec!["A"],
            scores: Vec::new(),
            capture_exit: ToolExit::ok(),
            write_exit: ToolExit::ok(),
            cancel_during_capture: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn responsive(mut self, drives: &[&'static str]) -> Self {
        self.responsive = drives.to_vec();
        self
    }

    fn score(mut self, format: &'static str, output: &'static str) -> Self {
        self.scores.push((format, output));
        self
    }

    fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    fn converted_formats(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter(|inv| inv.subcommand == Subcommand::Convert)
            .filter(|inv| inv.args[1].ends_with("temp.img"))
            .map(|inv| inv.args[2].trim_start_matches("--format=").to_string())
            .collect()
    }

    fn lines(text: &str) -> Vec<String> {
        text.lines().map(String::from).collect()
    }
}

impl FluxTool for ScriptedTool {
    fn stream(&self, inv: &Invocation) -> Result<ToolStream, ToolError> {
        self.calls.lock().push(inv.clone());

        match inv.subcommand {
            Subcommand::Read if inv.args[2] == "--revs=0" => {
                let drive = inv.args[1].trim_start_matches("--drive=");
                let text = if self.responsive.contains(&drive) {
                    "Reading c=0-0 revs=0"
                } else {
                    NO_INDEX
                };
                Ok(ToolStream::from_lines(Self::lines(text), ToolExit::ok()))
            }
            Subcommand::Read => {
                if let Some(cancel) = &self.cancel_during_capture {
                    cancel.cancel();
                }
                if self.capture_exit.success {
                    std::fs::write(&inv.args[0], b"SCP\0flux")?;
                }
                Ok(ToolStream::from_lines(
                    Self::lines("Reading c=0-79:h=0-1 revs=5\nT79.1: 5 revs"),
                    self.capture_exit,
                ))
            }
            Subcommand::Convert if inv.args[1].ends_with("temp.img") => {
                let format = inv.args[2].trim_start_matches("--format=");
                let text = self
                    .scores
                    .iter()
                    .find(|(f, _)| *f == format)
                    .map_or("", |(_, t)| *t);
                Ok(ToolStream::from_lines(Self::lines(text), ToolExit::ok()))
            }
            Subcommand::Convert => {
                if self.write_exit.success {
                    std::fs::write(&inv.args[1], vec![0xE5u8; 1024])?;
                }
                Ok(ToolStream::from_lines(
                    Self::lines("Converting flux to image"),
                    self.write_exit,
                ))
            }
        }
    }
}

fn settings_in(dir: &Path) -> PipelineSettings {
    PipelineSettings {
        dump_dir: dir.to_path_buf(),
        ..Default::default()
    }
}

fn run(tool: &ScriptedTool, settings: &PipelineSettings, name: &str) -> (RunReport, ProgressLog) {
    let log = ProgressLog::new();
    let report = Pipeline::new(tool, settings).run(name, &log);
    (report, log)
}

#[test]
fn test_confident_format_stops_search_and_writes_image() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new()
        .score("ibm.1440", "Found 18 sectors of 18")
        .score("ibm.720", "Found 9 sectors of 9");

    let (report, log) = run(&tool, &settings, "disk1.img");

    assert!(report.succeeded());
    assert_eq!(report.state, PipelineState::Done);
    assert_eq!(report.drive.as_ref().map(|d| d.as_str()), Some("A"));
    assert!(matches!(report.detection, Some(Detection::Confident { .. })));
    assert_eq!(tool.converted_formats(), vec!["ibm.1440"]);

    let image = report.image.as_ref().unwrap();
    assert_eq!(image.path, dir.path().join("disk1.img"));
    assert_eq!(image.size_bytes, 1024);
    assert_eq!(image.blake3.len(), 64);

    assert!(log.contains("Very confident match, stopping search."));
    assert!(log.contains("[4/4] Best format: ibm.1440"));
    assert_eq!(log.lines().last().map(String::as_str), Some("=== DONE ==="));
}

#[test]
fn test_best_candidate_used_when_nothing_is_confident() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new()
        .score("ibm.1440", "Found 12 sectors of 18")
        .score("ibm.720", "Found 17 sectors of 18\n3 CRC errors")
        .score("atarist.720", "Found 17 sectors of 18\n3 CRC errors");

    let (report, _) = run(&tool, &settings, "disk.img");

    assert!(report.succeeded());
    let detection = report.detection.unwrap();
    assert!(!detection.is_confident());
    // Tie with atarist.720 keeps the earlier candidate
    assert_eq!(detection.format().as_str(), "ibm.720");
    assert!((detection.adjusted_score() - 0.9144).abs() < 1e-3);
    assert_eq!(tool.converted_formats().len(), settings.formats.len());

    let last = tool.calls().pop().unwrap();
    assert_eq!(last.subcommand, Subcommand::Convert);
    assert_eq!(last.args[2], "--format=ibm.720");
}

#[test]
fn test_second_drive_found_after_first_fails() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new()
        .responsive(&["B"])
        .score("ibm.1440", "Found 18 sectors of 18");

    let (report, log) = run(&tool, &settings, "disk.img");

    assert_eq!(report.drive.as_ref().map(|d| d.as_str()), Some("B"));
    assert!(log.contains("No drive response."));
    assert!(log.contains("Drive B OK"));

    let capture = tool
        .calls()
        .into_iter()
        .find(|inv| inv.subcommand == Subcommand::Read && inv.args[2] != "--revs=0")
        .unwrap();
    assert_eq!(capture.args[1], "--drive=B");
    assert_eq!(capture.args[2], "--revs=5");
}

#[test]
fn test_no_drive_halts_before_capture() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new().responsive(&[]);

    let (report, log) = run(&tool, &settings, "disk.img");

    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(report.failure, Some(FailureKind::DriveNotFound));
    assert_eq!(tool.calls().len(), settings.drives.len());
    assert!(log.contains("No drive found."));
    assert!(!settings.flux_path().exists());
}

#[test]
fn test_unparseable_output_everywhere_means_not_detected() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new().score("ibm.1440", "Unexpected data on track 0");

    let (report, log) = run(&tool, &settings, "disk.img");

    assert_eq!(report.failure, Some(FailureKind::FormatNotDetected));
    assert!(report.detection.is_none());
    assert_eq!(tool.converted_formats().len(), settings.formats.len());
    assert!(log.contains("Format not detected."));
    assert!(!dir.path().join("disk.img").exists());
}

#[test]
fn test_failed_capture_stops_run() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let mut tool = ScriptedTool::new().score("ibm.1440", "Found 18 sectors of 18");
    tool.capture_exit = ToolExit::failed(1);

    let (report, _) = run(&tool, &settings, "disk.img");

    assert_eq!(report.failure, Some(FailureKind::CaptureFailed));
    assert!(tool.converted_formats().is_empty());
}

#[test]
fn test_lenient_capture_scores_anyway() {
    let dir = tempdir().unwrap();
    let settings = PipelineSettings {
        require_clean_capture: false,
        ..settings_in(dir.path())
    };
    let mut tool = ScriptedTool::new().score("ibm.1440", "Found 18 sectors of 18");
    tool.capture_exit = ToolExit::failed(1);

    let (report, log) = run(&tool, &settings, "disk.img");

    assert!(report.succeeded());
    assert!(log.contains("scoring anyway"));
}

#[test]
fn test_failed_write_is_reported() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let mut tool = ScriptedTool::new().score("ibm.1440", "Found 18 sectors of 18");
    tool.write_exit = ToolExit::failed(2);

    let (report, _) = run(&tool, &settings, "disk.img");

    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(report.failure, Some(FailureKind::WriteFailed));
    assert!(report.detection.is_some());
    assert!(report.image.is_none());
}

#[test]
fn test_invalid_name_never_touches_the_tool() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new();

    let (report, _) = run(&tool, &settings, "../escape.img");

    assert_eq!(report.failure, Some(FailureKind::InvalidOutputName));
    assert!(tool.calls().is_empty());
}

#[test]
fn test_flux_file_name_is_refused_as_output() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new().score("ibm.1440", "Found 18 sectors of 18");

    let (report, log) = run(&tool, &settings, "auto.scp");

    assert_eq!(report.state, PipelineState::Failed);
    assert_eq!(report.failure, Some(FailureKind::InvalidOutputName));
    assert!(tool.calls().is_empty());
    assert!(log.contains("working files"));
}

#[test]
fn test_cancel_between_stages() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let cancel = CancelToken::new();
    let mut tool = ScriptedTool::new().score("ibm.1440", "Found 18 sectors of 18");
    tool.cancel_during_capture = Some(cancel.clone());

    let log = ProgressLog::new();
    let report = Pipeline::new(&tool, &settings)
        .with_cancel(cancel)
        .run("disk.img", &log);

    assert_eq!(report.failure, Some(FailureKind::Cancelled));
    assert!(report.flux.is_some());
    assert!(tool.converted_formats().is_empty());
    assert!(log.contains("Run cancelled."));
}

#[test]
fn test_report_round_trips_through_disk() {
    let dir = tempdir().unwrap();
    let settings = settings_in(dir.path());
    let tool = ScriptedTool::new().score("ibm.720", "Found 9 sectors of 9");

    let (report, _) = run(&tool, &settings, "disk.img");
    let path: PathBuf = dir.path().join("report.json");
    report.save(&path).unwrap();

    let loaded = RunReport::load(&path).unwrap();
    assert_eq!(loaded.run_id, report.run_id);
    assert_eq!(loaded.state, PipelineState::Done);
    assert_eq!(
        loaded.detection.map(|d| d.format().to_string()),
        Some("ibm.720".to_string())
    );
}

/// A shell script standing in for the real binary
#[cfg(unix)]
mod process {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};

    use flux_drill::tool::ProcessTool;

    const FAKE_GW: &str = r#"#!/bin/sh
case "$1" in
  read)
    case "$4" in
      --revs=0)
        [ "$3" = "--drive=B" ] && echo "Reading c=0-0 revs=0" || echo "No Index" >&2
        ;;
      *)
        echo "Reading flux"
        echo "progress on stderr" >&2
        printf 'SCP' > "$2"
        ;;
    esac
    ;;
  convert)
    case "$2" in
      fail)
        echo "bad things" >&2
        exit 3
        ;;
      hang)
        exec sleep 5
        ;;
      detach)
        exec >/dev/null 2>&1
        exec sleep 5
        ;;
    esac
    case "$3" in
      *temp.img)
        [ "$4" = "--format=ibm.720" ] && echo "Found 9 sectors of 9" || echo "Found 3 sectors of 18"
        ;;
      *)
        printf 'IMAGE' > "$3"
        ;;
    esac
    ;;
esac
"#;

    /// Writing an executable while another test forks can fail with ETXTBSY
    static SERIAL: Mutex<()> = Mutex::new(());

    fn install_fake(dir: &Path) -> PathBuf {
        let path = dir.join("gw");
        std::fs::write(&path, FAKE_GW).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    /// `convert <mode>`, understood only by the fake
    fn scripted(mode: &str) -> Invocation {
        Invocation::new(Subcommand::Convert, vec![mode.to_string()])
    }

    #[test]
    fn test_process_collects_both_pipes_and_exit_code() {
        let _serial = SERIAL.lock();
        let dir = tempdir().unwrap();
        let tool = ProcessTool::new(install_fake(dir.path()));

        let out = tool.run(&scripted("fail")).unwrap();
        assert!(out.text.contains("bad things"));
        assert!(!out.exit.success);
        assert_eq!(out.exit.code, Some(3));
    }

    #[test]
    fn test_process_timeout_kills_tool() {
        let _serial = SERIAL.lock();
        let dir = tempdir().unwrap();
        let tool = ProcessTool::new(install_fake(dir.path()))
            .with_timeout(Some(Duration::from_millis(300)));

        let started = Instant::now();
        let err = tool.run(&scripted("hang")).unwrap_err();
        assert!(matches!(err, ToolError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_applies_after_pipes_close() {
        let _serial = SERIAL.lock();
        let dir = tempdir().unwrap();
        let tool = ProcessTool::new(install_fake(dir.path()))
            .with_timeout(Some(Duration::from_millis(300)));

        let started = Instant::now();
        let err = tool.run(&scripted("detach")).unwrap_err();
        assert!(matches!(err, ToolError::TimedOut(_)));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_process_cancel_kills_tool() {
        let _serial = SERIAL.lock();
        let dir = tempdir().unwrap();
        let cancel = CancelToken::new();
        let tool = ProcessTool::new(install_fake(dir.path())).with_cancel(cancel.clone());

        let trigger = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            cancel.cancel();
        });

        let started = Instant::now();
        let err = tool.run(&scripted("hang")).unwrap_err();
        trigger.join().unwrap();

        assert!(err.is_cancellation());
        assert!(started.elapsed() < Duration::from_secs(4));
        // Later invocations refuse to start
        assert!(matches!(tool.run(&scripted("fail")), Err(ToolError::Cancelled)));
    }

    #[test]
    fn test_full_run_against_fake_binary() {
        let _serial = SERIAL.lock();
        let dir = tempdir().unwrap();
        let tool = ProcessTool::new(install_fake(dir.path()));
        let settings = settings_in(dir.path());

        let log = ProgressLog::new();
        let report = Pipeline::new(&tool, &settings).run("game.st", &log);

        assert!(report.succeeded(), "{:?}", log.lines());
        assert_eq!(report.drive.as_ref().map(|d| d.as_str()), Some("B"));
        assert_eq!(
            report.detection.as_ref().map(|d| d.format().as_str()),
            Some("ibm.720")
        );
        assert!(log.contains("progress on stderr"));
        assert_eq!(std::fs::read(dir.path().join("game.st")).unwrap(), b"IMAGE");
    }
}
