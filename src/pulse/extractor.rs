//! Invocation of the external Action Unit extraction tool.
//!
//! The tool is treated as an opaque batch process: it receives a finished
//! video and an output directory and leaves a per-frame CSV table behind.
//! The newest table written during the invocation is its result.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

/// Allowance for filesystems with coarse modification times.
const MTIME_SLACK: Duration = Duration::from_secs(1);

/// Poll interval while waiting on a bounded extraction.
const CHILD_POLL: Duration = Duration::from_millis(50);

/// Runs a batch feature extraction over one video.
pub trait FeatureExtractor {
    /// Analyse `video`, writing into `out_dir`; returns the per-frame table.
    fn extract(&self, video: &Path, out_dir: &Path) -> Result<PathBuf, ExtractError>;
}

/// Errors raised by an extraction run.
#[derive(Debug)]
pub enum ExtractError {
    /// The tool could not be started
    Spawn(String),
    /// The tool exited unsuccessfully
    Failed {
        status: Option<i32>,
        stdout: String,
        stderr: String,
    },
    /// The tool exceeded the configured timeout and was killed
    TimedOut(Duration),
    /// The tool succeeded but left no table behind
    NoOutput(PathBuf),
    Io(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Spawn(e) => write!(f, "Could not start extractor: {e}"),
            ExtractError::Failed {
                status,
                stdout,
                stderr,
            } => {
                match status {
                    Some(code) => write!(f, "Extractor failed with exit code {code}")?,
                    None => write!(f, "Extractor terminated by signal")?,
                }
                if !stdout.trim().is_empty() {
                    write!(f, "\n{}", stdout.trim_end())?;
                }
                if !stderr.trim().is_empty() {
                    write!(f, "\n{}", stderr.trim_end())?;
                }
                Ok(())
            }
            ExtractError::TimedOut(limit) => {
                write!(f, "Extractor did not finish within {:.1}s", limit.as_secs_f64())
            }
            ExtractError::NoOutput(dir) => write!(f, "No CSV found in {}", dir.display()),
            ExtractError::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for ExtractError {}

/// OpenFace `FeatureExtraction` runner.
#[derive(Debug, Clone)]
pub struct OpenFaceExtractor {
    bin: PathBuf,
    timeout: Option<Duration>,
}

impl OpenFaceExtractor {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            timeout: None,
        }
    }

    /// Kill the tool and fail the pulse if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, video: &Path, out_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-f")
            .arg(video)
            .args(["-aus", "-pose", "-gaze", "-2Dfp", "-3Dfp"])
            .arg("-out_dir")
            .arg(out_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
}

impl FeatureExtractor for OpenFaceExtractor {
    fn extract(&self, video: &Path, out_dir: &Path) -> Result<PathBuf, ExtractError> {
        std::fs::create_dir_all(out_dir).map_err(|e| ExtractError::Io(e.to_string()))?;

        let since = SystemTime::now()
            .checked_sub(MTIME_SLACK)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        tracing::debug!(bin = %self.bin.display(), video = %video.display(), "running extractor");
        let child = self
            .command(video, out_dir)
            .spawn()
            .map_err(|e| ExtractError::Spawn(format!("{}: {e}", self.bin.display())))?;

        let output = wait_with_timeout(child, self.timeout)?;
        if !output.status.success() {
            return Err(ExtractError::Failed {
                status: output.status.code(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        newest_table(out_dir, since)?.ok_or_else(|| ExtractError::NoOutput(out_dir.to_path_buf()))
    }
}

struct ChildOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Wait for `child`, draining its pipes on helper threads so it cannot stall
/// on a full pipe; kill it once `timeout` elapses.
fn wait_with_timeout(mut child: Child, timeout: Option<Duration>) -> Result<ChildOutput, ExtractError> {
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match timeout {
        None => child.wait().map_err(|e| ExtractError::Io(e.to_string()))?,
        Some(limit) => {
            let deadline = Instant::now() + limit;
            loop {
                if let Some(status) = child.try_wait().map_err(|e| ExtractError::Io(e.to_string()))? {
                    break status;
                }
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ExtractError::TimedOut(limit));
                }
                thread::sleep(CHILD_POLL);
            }
        }
    };

    Ok(ChildOutput {
        status,
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Newest `*.csv` in `dir` modified at or after `since`.
pub fn newest_table(dir: &Path, since: SystemTime) -> Result<Option<PathBuf>, ExtractError> {
    let entries = std::fs::read_dir(dir).map_err(|e| ExtractError::Io(e.to_string()))?;

    let newest = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
        })
        .filter_map(|p| {
            let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            (modified >= since).then_some((modified, p))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, p)| p);

    Ok(newest)
}
