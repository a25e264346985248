//! Invocation of the external statistical computation.
//!
//! The computation is an R script invoked with positional arguments and a
//! narrow output contract: on success its stdout contains one marker line
//! `timeframe_path:"<path>"` naming the produced result file. The trait
//! seam keeps the orchestrator unaware of the subprocess so the computation
//! could later move in-process without touching the pipeline.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tokio::process::Command;
use tracing::info;

use crate::window::ReportingWindow;

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("computation exited with {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("no result path marker found in computation output")]
    MissingMarker,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Runs the statistical computation over a downloaded result archive.
#[async_trait]
pub trait ResultComputation: Send + Sync {
    /// Execute the computation and return the path of the produced result
    /// file, resolved to an absolute path.
    async fn run(
        &self,
        archive: &Path,
        window: &ReportingWindow,
    ) -> Result<PathBuf, ComputeError>;
}

/// Interpreter used when none is configured explicitly.
pub const DEFAULT_INTERPRETER: &str = "Rscript";

static RESULT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"timeframe_path:(.+?)(?:\r?\n|$)").expect("marker regex is valid"));

#[derive(Debug, Clone)]
pub struct RscriptSettings {
    pub interpreter: String,
    pub script_path: PathBuf,
    pub los_max: u32,
    pub error_max: f64,
    pub clinic_nums: Option<Vec<u32>>,
}

#[derive(Debug)]
pub struct RscriptRunner {
    settings: RscriptSettings,
}

impl RscriptRunner {
    pub fn new(settings: RscriptSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ResultComputation for RscriptRunner {
    async fn run(
        &self,
        archive: &Path,
        window: &ReportingWindow,
    ) -> Result<PathBuf, ComputeError> {
        let mut command = Command::new(&self.settings.interpreter);
        command
            .arg(&self.settings.script_path)
            .arg(archive)
            .arg(window.current_week.to_string())
            .arg(window.start_week.to_string())
            .arg(self.settings.los_max.to_string())
            .arg(self.settings.error_max.to_string());
        if let Some(clinics) = &self.settings.clinic_nums {
            let joined = clinics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",");
            command.arg(joined);
        }

        info!(
            script = %self.settings.script_path.display(),
            archive = %archive.display(),
            "running computation"
        );
        let output = command.output().await?;
        if !output.status.success() {
            return Err(ComputeError::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let result_path = extract_result_path(&stdout)?;
        info!(path = %result_path.display(), "computation finished");
        // Canonicalize both to absolutize and to verify the declared file
        // actually exists.
        Ok(tokio::fs::canonicalize(result_path).await?)
    }
}

fn extract_result_path(stdout: &str) -> Result<PathBuf, ComputeError> {
    let captures = RESULT_MARKER
        .captures(stdout)
        .ok_or(ComputeError::MissingMarker)?;
    let raw = captures[1].trim().trim_matches('"');
    Ok(PathBuf::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::ReportingWindow;
    use std::io::Write;

    #[test]
    fn test_extract_result_path_strips_quotes_and_whitespace() {
        let stdout = "some log line\ntimeframe_path: \"/tmp/out/timeframe.csv\" \nmore output\n";
        assert_eq!(
            extract_result_path(stdout).unwrap(),
            PathBuf::from("/tmp/out/timeframe.csv")
        );
    }

    #[test]
    fn test_extract_result_path_without_trailing_newline() {
        let stdout = "timeframe_path:/tmp/out/result.csv";
        assert_eq!(
            extract_result_path(stdout).unwrap(),
            PathBuf::from("/tmp/out/result.csv")
        );
    }

    #[test]
    fn test_extract_result_path_missing_marker() {
        assert!(matches!(
            extract_result_path("no marker here\n"),
            Err(ComputeError::MissingMarker)
        ));
    }

    fn runner_for_script(script: &str, dir: &Path) -> (RscriptRunner, PathBuf) {
        let script_path = dir.join("fake_computation.sh");
        let mut file = std::fs::File::create(&script_path).unwrap();
        file.write_all(script.as_bytes()).unwrap();
        let runner = RscriptRunner::new(RscriptSettings {
            interpreter: "sh".to_string(),
            script_path: script_path.clone(),
            los_max: 410,
            error_max: 25.0,
            clinic_nums: None,
        });
        (runner, script_path)
    }

    #[tokio::test]
    async fn test_runner_parses_marker_from_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"
out_dir=$(dirname "$0")
: > "$out_dir/timeframe.csv"
echo 'reading case data'
echo "timeframe_path:\"$out_dir/timeframe.csv\""
"#;
        let (runner, _) = runner_for_script(script, dir.path());
        let archive = dir.path().join("result12.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let window = ReportingWindow::from_iso(2025, 10);
        let result = runner.run(&archive, &window).await.unwrap();
        assert!(result.is_absolute());
        assert!(result.ends_with("timeframe.csv"));
    }

    #[tokio::test]
    async fn test_runner_propagates_stderr_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo 'column entlassung_ts missing' >&2\nexit 3\n";
        let (runner, _) = runner_for_script(script, dir.path());
        let archive = dir.path().join("result12.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let window = ReportingWindow::from_iso(2025, 10);
        match runner.run(&archive, &window).await {
            Err(ComputeError::Failed { code, stderr }) => {
                assert_eq!(code, Some(3));
                assert!(stderr.contains("entlassung_ts"));
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_runner_rejects_missing_marker() {
        let dir = tempfile::tempdir().unwrap();
        let script = "echo 'finished without marker'\n";
        let (runner, _) = runner_for_script(script, dir.path());
        let archive = dir.path().join("result12.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let window = ReportingWindow::from_iso(2025, 10);
        assert!(matches!(
            runner.run(&archive, &window).await,
            Err(ComputeError::MissingMarker)
        ));
    }

    #[tokio::test]
    async fn test_runner_passes_window_and_thresholds_as_arguments() {
        let dir = tempfile::tempdir().unwrap();
        // Echo the arguments back through the marker path to observe them.
        let script = r#"
out_dir=$(dirname "$0")
args_file="$out_dir/args_$2_$3_$4_$5_$6"
: > "$args_file"
echo "timeframe_path:$args_file"
"#;
        let script_path = dir.path().join("fake_computation.sh");
        std::fs::write(&script_path, script).unwrap();
        let runner = RscriptRunner::new(RscriptSettings {
            interpreter: "sh".to_string(),
            script_path,
            los_max: 410,
            error_max: 25.0,
            clinic_nums: Some(vec![1, 2, 5]),
        });
        let archive = dir.path().join("result12.zip");
        std::fs::write(&archive, b"zip").unwrap();

        let window = ReportingWindow::from_iso(2025, 2);
        let result = runner.run(&archive, &window).await.unwrap();
        assert!(result.ends_with("args_2_51_410_25_1,2,5"));
    }
}
