use crate::tool_definitions::SUPPORTED_LANGUAGES;
use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub success: bool,
    /// Interleaved stdout and stderr
    pub output: String,
}

impl ExecutionOutput {
    fn not_run(output: String) -> Self {
        Self {
            success: false,
            output,
        }
    }
}

/// Callback receiving output lines while code runs
pub trait OutputCallback: Send + Sync {
    fn on_output_chunk(&self, chunk: &str) -> Result<()>;
}

#[async_trait::async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(
        &self,
        language: &str,
        code: &str,
        callback: Option<&dyn OutputCallback>,
    ) -> Result<ExecutionOutput>;
}

/// How to run a script written in one language
struct Runner {
    program: String,
    extension: &'static str,
}

fn runner_for(language: &str) -> Option<Runner> {
    let (program, extension) = match language {
        "python" => ("python3".to_string(), ".py"),
        "R" => ("Rscript".to_string(), ".R"),
        "shell" => (
            std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string()),
            ".sh",
        ),
        "javascript" => ("node".to_string(), ".js"),
        "applescript" => ("osascript".to_string(), ".applescript"),
        _ => return None,
    };
    Some(Runner { program, extension })
}

/// Next line including its newline, decoded lossily so stray bytes cannot end the capture.
///
/// `buf` keeps bytes from a read cancelled by `select!` until the line completes.
async fn read_lossy_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    let read = reader.read_until(b'\n', buf).await?;
    if read == 0 && buf.is_empty() {
        return Ok(None);
    }
    while matches!(buf.last(), Some(b'\n' | b'\r')) {
        buf.pop();
    }
    let line = format!("{}\n", String::from_utf8_lossy(buf));
    buf.clear();
    Ok(Some(line))
}

/// Runs code with locally installed interpreters, one temporary script per run
#[derive(Default)]
pub struct LocalCodeExecutor {
    working_dir: Option<PathBuf>,
}

impl LocalCodeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }
}

#[async_trait::async_trait]
impl CodeExecutor for LocalCodeExecutor {
    async fn execute(
        &self,
        language: &str,
        code: &str,
        callback: Option<&dyn OutputCallback>,
    ) -> Result<ExecutionOutput> {
        if language == "html" {
            return Ok(ExecutionOutput::not_run(
                "HTML is not executed. It was shown to the user as is.".to_string(),
            ));
        }
        let Some(runner) = runner_for(language) else {
            return Ok(ExecutionOutput::not_run(format!(
                "Language '{}' is not supported. Use one of: {}.",
                language,
                SUPPORTED_LANGUAGES.join(", ")
            )));
        };

        if let Some(dir) = &self.working_dir {
            if !dir.is_dir() {
                return Err(anyhow!("Working directory does not exist: {}", dir.display()));
            }
        }

        let mut script = tempfile::Builder::new()
            .prefix("dft-interpreter-")
            .suffix(runner.extension)
            .tempfile()
            .context("Failed to create script file")?;
        script
            .write_all(code.as_bytes())
            .context("Failed to write script file")?;
        script.flush()?;

        debug!("Running {} script {}", language, script.path().display());

        let mut cmd = Command::new(&runner.program);
        cmd.arg(script.path());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to start '{}'", runner.program))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("Child stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("Child stderr not captured"))?;

        let mut stdout = BufReader::new(stdout);
        let mut stderr = BufReader::new(stderr);
        let (mut stdout_buf, mut stderr_buf) = (Vec::new(), Vec::new());
        let mut stdout_done = false;
        let mut stderr_done = false;
        let mut output = String::new();

        while !stdout_done || !stderr_done {
            let line = tokio::select! {
                line = read_lossy_line(&mut stdout, &mut stdout_buf), if !stdout_done => {
                    let line = line?;
                    stdout_done = line.is_none();
                    line
                }
                line = read_lossy_line(&mut stderr, &mut stderr_buf), if !stderr_done => {
                    let line = line?;
                    stderr_done = line.is_none();
                    line
                }
            };

            if let Some(line) = line {
                output.push_str(&line);
                if let Some(callback) = callback {
                    let _ = callback.on_output_chunk(&line);
                }
            }
        }

        let status = child.wait().await?;
        debug!("Script exited with {}", status);

        Ok(ExecutionOutput {
            success: status.success(),
            output,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CollectingCallback {
        chunks: Mutex<Vec<String>>,
    }

    impl OutputCallback for CollectingCallback {
        fn on_output_chunk(&self, chunk: &str) -> Result<()> {
            self.chunks.lock().unwrap().push(chunk.to_string());
            Ok(())
        }
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn test_shell_output_is_streamed_and_captured() -> Result<()> {
        let executor = LocalCodeExecutor::new();
        let callback = CollectingCallback::default();

        let result = executor
            .execute("shell", "echo one\necho two", Some(&callback))
            .await?;

        assert!(result.success);
        assert_eq!(result.output, "one\ntwo\n");
        assert_eq!(*callback.chunks.lock().unwrap(), vec!["one\n", "two\n"]);
        Ok(())
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn test_shell_stderr_and_exit_status() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let executor = LocalCodeExecutor::new().with_working_dir(dir.path().to_path_buf());

        let result = executor
            .execute("shell", "echo oops >&2\nexit 3", None)
            .await?;

        assert!(!result.success);
        assert_eq!(result.output, "oops\n");
        Ok(())
    }

    #[cfg(target_family = "unix")]
    #[tokio::test]
    async fn test_invalid_utf8_output_is_kept() -> Result<()> {
        let executor = LocalCodeExecutor::new();
        let callback = CollectingCallback::default();

        let result = executor
            .execute(
                "shell",
                "echo before\nprintf '\\377\\n'\necho after",
                Some(&callback),
            )
            .await?;

        assert!(result.success);
        assert_eq!(result.output, "before\n\u{FFFD}\nafter\n");
        assert_eq!(callback.chunks.lock().unwrap().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_lossy_lines() -> Result<()> {
        let mut reader: &[u8] = b"a\xffb\r\nlast";
        let mut buf = Vec::new();

        assert_eq!(
            read_lossy_line(&mut reader, &mut buf).await?.as_deref(),
            Some("a\u{FFFD}b\n")
        );
        assert_eq!(
            read_lossy_line(&mut reader, &mut buf).await?.as_deref(),
            Some("last\n")
        );
        assert_eq!(read_lossy_line(&mut reader, &mut buf).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_html_and_unknown_languages_are_described() -> Result<()> {
        let executor = LocalCodeExecutor::new();

        let html = executor.execute("html", "<p>hi</p>", None).await?;
        assert!(!html.success);
        assert!(html.output.contains("HTML"));

        let unknown = executor.execute("foo_bar", "hello", None).await?;
        assert!(!unknown.success);
        assert!(unknown.output.contains("'foo_bar' is not supported"));
        assert!(unknown.output.contains("python, R, shell"));
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_an_error() {
        let executor =
            LocalCodeExecutor::new().with_working_dir(PathBuf::from("/definitely/not/here"));
        assert!(executor.execute("shell", "true", None).await.is_err());
    }
}
