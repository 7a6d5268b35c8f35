//! External document compiler driven over standard input.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    process::Command,
};
use tracing::{info, warn};

use crate::application::ports::{CompileError, DocumentCompiler};
use crate::config::{CompilerSettings, OUTPUT_PLACEHOLDER};

const TARGET: &str = "infra::compiler";
const STDERR_LIMIT: usize = 4096;

/// Runs a typesetting program once per compile, feeding the intermediate text
/// on stdin and collecting the artifact from a scratch directory that is
/// removed afterwards.
#[derive(Debug, Clone)]
pub struct ProcessCompiler {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    signature: Option<String>,
    extension: String,
}

impl ProcessCompiler {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            signature: None,
            extension: "pdf".to_string(),
        }
    }

    pub fn from_settings(settings: &CompilerSettings, extension: &str) -> Self {
        Self::new(
            settings.program.clone(),
            settings.args.clone(),
            settings.timeout,
        )
        .with_signature(settings.signature.clone())
        .with_extension(extension)
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn arguments(&self, output_path: &Path) -> Vec<String> {
        let output = output_path.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output))
            .collect()
    }

    fn check_artifact(&self, bytes: &[u8]) -> Result<(), CompileError> {
        if bytes.is_empty() {
            return Err(CompileError::EmptyOutput);
        }
        if let Some(signature) = self.signature.as_deref()
            && !bytes.starts_with(signature.as_bytes())
        {
            return Err(CompileError::InvalidOutput {
                expected: signature.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentCompiler for ProcessCompiler {
    async fn compile(&self, intermediate: &str) -> Result<Bytes, CompileError> {
        let started_at = Instant::now();
        let workspace = tempfile::Builder::new()
            .prefix("quire-compile-")
            .tempdir()?;
        let output_path = workspace
            .path()
            .join(format!("artifact.{}", self.extension));

        let mut command = Command::new(&self.program);
        command
            .args(self.arguments(&output_path))
            .current_dir(workspace.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so helpers the compiler forks can be killed with it.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|source| {
                warn!(
                    target = TARGET,
                    op = "compiler::spawn",
                    result = "error",
                    program = %self.program.display(),
                    error = %source,
                    "Failed to spawn document compiler"
                );
                CompileError::Spawn {
                    program: self.program.display().to_string(),
                    source,
                }
            })?;
        let process_group = child.id();

        let stdin = child.stdin.take();
        let stderr = child.stderr.take();

        let feed = async move {
            let Some(mut stdin) = stdin else {
                return Ok(());
            };
            stdin.write_all(intermediate.as_bytes()).await?;
            stdin.shutdown().await
        };
        let drain = async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_end(&mut buf).await?;
            }
            Ok::<_, std::io::Error>(buf)
        };

        let run = async { tokio::join!(feed, child.wait(), drain) };
        let (fed, status, stderr) = match tokio::time::timeout(self.timeout, run).await {
            Ok(finished) => finished,
            Err(_) => {
                // Kill and reap before the scratch directory goes away.
                if let Some(pgid) = process_group
                    && let Err(err) = kill_process_group(pgid)
                {
                    warn!(
                        target = TARGET,
                        op = "compiler::kill",
                        result = "error",
                        pgid,
                        error = %err,
                        "Failed to kill compiler process group"
                    );
                }
                if let Err(err) = child.kill().await {
                    warn!(
                        target = TARGET,
                        op = "compiler::kill",
                        result = "error",
                        error = %err,
                        "Failed to kill timed-out document compiler"
                    );
                }
                warn!(
                    target = TARGET,
                    op = "compiler::compile",
                    result = "timeout",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Document compiler timed out"
                );
                drop(workspace);
                return Err(CompileError::Timeout {
                    after: self.timeout,
                });
            }
        };

        let status = status?;
        let stderr = stderr?;
        if !status.success() {
            let exit_code = status.code();
            let stderr = truncate_stderr(&stderr);
            warn!(
                target = TARGET,
                op = "compiler::compile",
                result = "error",
                error_code = "exit_status",
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                stderr = %stderr,
                "Document compiler exited unsuccessfully"
            );
            return Err(CompileError::Exit { exit_code, stderr });
        }
        // The compiler may legitimately stop reading once it has what it needs.
        if let Err(err) = fed
            && err.kind() != ErrorKind::BrokenPipe
        {
            return Err(CompileError::Io(err));
        }

        let bytes = match tokio::fs::read(&output_path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(CompileError::MissingOutput);
            }
            Err(err) => return Err(CompileError::Io(err)),
        };
        self.check_artifact(&bytes)?;

        info!(
            target = TARGET,
            op = "compiler::compile",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            artifact_bytes = bytes.len(),
            "Document compiled"
        );

        close_workspace(workspace);
        Ok(Bytes::from(bytes))
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pgid)
        .map_err(|_| std::io::Error::from(ErrorKind::InvalidInput))?;
    // SAFETY: killpg only takes integer arguments.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Every member already exited.
        return Ok(());
    }
    Err(err)
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) -> std::io::Result<()> {
    Ok(())
}

fn close_workspace(workspace: TempDir) {
    let path = workspace.path().to_path_buf();
    if let Err(err) = workspace.close() {
        warn!(
            target = TARGET,
            op = "compiler::cleanup",
            result = "error",
            path = %path.display(),
            error = %err,
            "Failed to remove compiler scratch directory"
        );
    }
}

fn truncate_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut end = text.len() - STDERR_LIMIT;
    while !text.is_char_boundary(end) {
        end += 1;
    }
    format!("...{}", &text[end..])
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::{fs, os::unix::fs::PermissionsExt};

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write script");
        let mut perms = fs::metadata(&path).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("set perms");
        path
    }

    /// A fake compiler that records its output path and copies stdin behind a
    /// PDF header.
    fn echo_compiler(dir: &Path, log: &Path) -> PathBuf {
        let script = format!(
            r#"#!/bin/sh
set -eu
out=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    -o)
      shift
      out="$1"
      ;;
  esac
  shift
done
printf '%s\n' "$out" > "{log}"
printf '%%PDF-1.7\n' > "$out"
cat >> "$out"
"#,
            log = log.display()
        );
        write_script(dir, "fake-pandoc", &script)
    }

    fn args() -> Vec<String> {
        vec!["--to=pdf".to_string(), "-o".to_string(), "{output}".to_string()]
    }

    #[tokio::test]
    async fn compiles_stdin_into_artifact_and_cleans_scratch() {
        let dir = TempDir::new().expect("temp dir");
        let log = dir.path().join("out.log");
        let program = echo_compiler(dir.path(), &log);
        let compiler = ProcessCompiler::new(program, args(), Duration::from_secs(10))
            .with_signature(Some("%PDF-".to_string()));

        let bytes = compiler
            .compile("\\section{Total: 42}")
            .await
            .expect("compiled");
        assert_eq!(&bytes[..], b"%PDF-1.7\n\\section{Total: 42}");

        let output_path = fs::read_to_string(&log).expect("read log");
        let output_path = Path::new(output_path.trim());
        assert!(output_path.ends_with("artifact.pdf"), "{output_path:?}");
        assert!(!output_path.exists(), "scratch output left behind");
    }

    #[tokio::test]
    async fn surfaces_exit_status_and_stderr() {
        let dir = TempDir::new().expect("temp dir");
        let program = write_script(
            dir.path(),
            "failing",
            "#!/bin/sh\ncat >/dev/null\necho '! Undefined control sequence.' >&2\nexit 43\n",
        );
        let compiler = ProcessCompiler::new(program, args(), Duration::from_secs(10));

        match compiler.compile("\\bad").await {
            Err(CompileError::Exit { exit_code, stderr }) => {
                assert_eq!(exit_code, Some(43));
                assert!(stderr.contains("Undefined control sequence"), "{stderr}");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn kills_compiler_after_timeout() {
        let dir = TempDir::new().expect("temp dir");
        let pid_file = dir.path().join("pid");
        let program = write_script(
            dir.path(),
            "hanging",
            &format!(
                "#!/bin/sh\necho $$ > \"{}\"\nexec sleep 30\n",
                pid_file.display()
            ),
        );
        let compiler = ProcessCompiler::new(program, args(), Duration::from_millis(500));

        let started = Instant::now();
        let result = compiler.compile("\\relax").await;
        assert!(
            matches!(result, Err(CompileError::Timeout { .. })),
            "unexpected result: {result:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = fs::read_to_string(&pid_file).expect("pid written");
        let alive = std::process::Command::new("kill")
            .arg("-0")
            .arg(pid.trim())
            .stderr(Stdio::null())
            .status()
            .expect("run kill");
        assert!(!alive.success(), "compiler process still running");
    }

    /// Whether `pid` still names a live process. Zombies awaiting reaping by
    /// init count as dead.
    fn process_alive(pid: &str) -> bool {
        if let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) {
            let state = stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next());
            return !matches!(state, Some('Z') | Some('X') | None);
        }
        std::process::Command::new("kill")
            .arg("-0")
            .arg(pid)
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn timeout_kills_processes_forked_by_the_compiler() {
        let dir = TempDir::new().expect("temp dir");
        let pid_file = dir.path().join("worker.pid");
        let program = write_script(
            dir.path(),
            "forking",
            &format!(
                "#!/bin/sh\nsleep 30 &\necho $! > \"{}\"\nwait\n",
                pid_file.display()
            ),
        );
        let compiler = ProcessCompiler::new(program, args(), Duration::from_millis(500));

        let result = compiler.compile("\\relax").await;
        assert!(
            matches!(result, Err(CompileError::Timeout { .. })),
            "unexpected result: {result:?}"
        );

        let pid = fs::read_to_string(&pid_file).expect("worker pid written");
        let pid = pid.trim();
        let deadline = Instant::now() + Duration::from_secs(5);
        while process_alive(pid) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!process_alive(pid), "forked worker {pid} outlived the timeout");
    }

    #[tokio::test]
    async fn reports_missing_output() {
        let dir = TempDir::new().expect("temp dir");
        let program = write_script(dir.path(), "silent", "#!/bin/sh\ncat >/dev/null\nexit 0\n");
        let compiler = ProcessCompiler::new(program, args(), Duration::from_secs(10));

        assert!(matches!(
            compiler.compile("x").await,
            Err(CompileError::MissingOutput)
        ));
    }

    #[tokio::test]
    async fn rejects_output_without_signature() {
        let dir = TempDir::new().expect("temp dir");
        let program = write_script(
            dir.path(),
            "garbage",
            "#!/bin/sh\nwhile [ \"$1\" != \"-o\" ]; do shift; done\ncat >/dev/null\necho hello > \"$2\"\n",
        );
        let compiler = ProcessCompiler::new(program.clone(), args(), Duration::from_secs(10))
            .with_signature(Some("%PDF-".to_string()));

        assert!(matches!(
            compiler.compile("x").await,
            Err(CompileError::InvalidOutput { .. })
        ));

        let unchecked = ProcessCompiler::new(program, args(), Duration::from_secs(10));
        let bytes = unchecked.compile("x").await.expect("signature disabled");
        assert_eq!(&bytes[..], b"hello\n");
    }

    #[tokio::test]
    async fn reports_spawn_failure() {
        let dir = TempDir::new().expect("temp dir");
        let compiler = ProcessCompiler::new(
            dir.path().join("does-not-exist"),
            args(),
            Duration::from_secs(10),
        );

        assert!(matches!(
            compiler.compile("x").await,
            Err(CompileError::Spawn { .. })
        ));
    }

    #[test]
    fn long_stderr_keeps_the_tail() {
        let noisy = format!("{}END", "x".repeat(STDERR_LIMIT * 2));
        let truncated = truncate_stderr(noisy.as_bytes());
        assert!(truncated.starts_with("..."));
        assert!(truncated.ends_with("END"));
        assert_eq!(truncated.len(), STDERR_LIMIT + 3);
    }
}
