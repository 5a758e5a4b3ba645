// runner.rs - Running phpmd against a single document
//
// stdout is parsed incrementally while the process runs; stderr is only
// collected so it can be logged.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tower_lsp::lsp_types::Diagnostic;

use crate::report::collect_report;

/// phpmd report format; the parser only understands `text`
pub const REPORT_FORMAT: &str = "text";

/// Everything needed to run phpmd once
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub executable: PathBuf,
    pub document: PathBuf,
    /// Comma-joined ruleset names, or a ruleset file
    pub rulesets: String,
    pub max_problems: usize,
    pub working_dir: Option<PathBuf>,
}

impl Invocation {
    /// `<document> text <rulesets>`
    pub fn args(&self) -> Vec<OsString> {
        vec![
            self.document.clone().into_os_string(),
            OsString::from(REPORT_FORMAT),
            OsString::from(&self.rulesets),
        ]
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.executable.display(),
            self.document.display(),
            REPORT_FORMAT,
            self.rulesets
        )
    }
}

/// Result of a phpmd run that terminated on its own
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    /// Exit code; `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub diagnostics: Vec<Diagnostic>,
    pub stderr: String,
}

/// Runs phpmd; the seam between the controller and real processes
#[async_trait]
pub trait PhpmdRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<RunOutcome>;
}

/// Spawns phpmd as a child process
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Duration,
}

impl ProcessRunner {
    /// Default timeout for a phpmd run (60 seconds).
    const RUN_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::with_timeout(Self::RUN_TIMEOUT)
    }
}

#[async_trait]
impl PhpmdRunner for ProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<RunOutcome> {
        let mut cmd = Command::new(&invocation.executable);
        cmd.args(invocation.args());

        if let Some(wd) = &invocation.working_dir {
            cmd.current_dir(wd);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", invocation.executable.display()))?;

        let stdout = child
            .stdout
            .take()
            .context("phpmd stdout was not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("phpmd stderr was not captured")?;

        let run = async {
            let (diagnostics, stderr) = tokio::try_join!(
                collect_report(stdout, invocation.max_problems),
                read_lossy(stderr),
            )?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>(RunOutcome {
                exit_code: status.code(),
                diagnostics,
                stderr,
            })
        };

        // On timeout the child is dropped here, which kills it.
        match tokio::time::timeout(self.timeout, run).await {
            Ok(outcome) => outcome.context("Failed to read phpmd output"),
            Err(_) => Err(anyhow!("phpmd timed out after {:?}", self.timeout)),
        }
    }
}

async fn read_lossy<R>(mut reader: R) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation(executable: &str, document: PathBuf) -> Invocation {
        Invocation {
            executable: PathBuf::from(executable),
            document,
            rulesets: "cleancode,naming".to_string(),
            max_problems: 100,
            working_dir: None,
        }
    }

    #[test]
    fn test_args_order() {
        let inv = invocation("phpmd", PathBuf::from("/src/Foo.php"));
        assert_eq!(
            inv.args(),
            vec![
                OsString::from("/src/Foo.php"),
                OsString::from("text"),
                OsString::from("cleancode,naming"),
            ]
        );
        assert_eq!(inv.to_string(), "phpmd /src/Foo.php text cleancode,naming");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let inv = invocation("/definitely/not/a/phpmd", PathBuf::from("Foo.php"));
        let err = ProcessRunner::default().run(&inv).await.unwrap_err();
        assert!(err.to_string().contains("Failed to spawn"));
    }

    // `sh <script> text <rulesets>` stands in for phpmd: the "document"
    // argument is the script to run.
    #[cfg(unix)]
    fn fake_phpmd(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fake_phpmd.sh");
        std::fs::write(&script, body).unwrap();
        (dir, script)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_collects_violations_and_exit_code() {
        let (_dir, script) = fake_phpmd(
            "printf 'PHPMD 2.15.0\\n\\nFoo.php:12\\tAvoid unused variable $x\\n'\n\
             echo 'deprecated option' >&2\n\
             exit 2\n",
        );

        let outcome = ProcessRunner::default()
            .run(&invocation("sh", script))
            .await
            .unwrap();

        assert_eq!(outcome.exit_code, Some(2));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].range.start.line, 11);
        assert_eq!(
            outcome.diagnostics[0].message,
            "PHPMD: Avoid unused variable $x"
        );
        assert_eq!(outcome.stderr.trim(), "deprecated option");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_passes_format_and_rulesets() {
        let (_dir, script) = fake_phpmd("printf 'a.php:1\\t%s %s\\n' \"$1\" \"$2\"\nexit 2\n");

        let outcome = ProcessRunner::default()
            .run(&invocation("sh", script))
            .await
            .unwrap();

        assert_eq!(outcome.diagnostics[0].message, "PHPMD: text cleancode,naming");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_clean_exit() {
        let (_dir, script) = fake_phpmd("exit 0\n");
        let outcome = ProcessRunner::default()
            .run(&invocation("sh", script))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.diagnostics.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_times_out() {
        let (_dir, script) = fake_phpmd("sleep 5\n");
        let err = ProcessRunner::with_timeout(Duration::from_millis(100))
            .run(&invocation("sh", script))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
