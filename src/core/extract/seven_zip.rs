use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, instrument};

use crate::core::error::{EngineError, EngineResult};
use crate::core::events::{ProgressEvent, Reporter};

use super::{archive_label, ArchiveExtractor};

const INSTALL_GUIDANCE: &str = "Please install 7-Zip (https://www.7-zip.org/download.html) \
or place the standalone 7za binary under resources/tools/7z/.";

/// Where the 7-Zip binary was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SevenZipSource {
    Bundled,
    System,
    /// Bare command name, resolved by the OS at spawn time.
    PathLookup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SevenZipBinary {
    pub path: PathBuf,
    pub source: SevenZipSource,
}

impl SevenZipBinary {
    /// Resolve in order: bundled binary, well-known system install paths,
    /// bare command name on PATH.
    pub fn locate(resource_dir: Option<&Path>) -> Self {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf));

        if let Some(path) = bundled_candidates(resource_dir, exe_dir.as_deref())
            .into_iter()
            .find(|candidate| candidate.is_file())
        {
            return Self {
                path,
                source: SevenZipSource::Bundled,
            };
        }

        if let Some(path) = system_candidates()
            .into_iter()
            .find(|candidate| candidate.is_file())
        {
            return Self {
                path,
                source: SevenZipSource::System,
            };
        }

        Self {
            path: PathBuf::from(fallback_command()),
            source: SevenZipSource::PathLookup,
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            source: SevenZipSource::System,
        }
    }
}

fn bundled_binary_name() -> &'static str {
    if cfg!(windows) {
        "7za.exe"
    } else {
        "7za"
    }
}

fn bundled_candidates(resource_dir: Option<&Path>, exe_dir: Option<&Path>) -> Vec<PathBuf> {
    [resource_dir, exe_dir]
        .into_iter()
        .flatten()
        .map(|base| base.join("tools").join("7z").join(bundled_binary_name()))
        .collect()
}

fn system_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if cfg!(windows) {
        candidates.push(PathBuf::from(r"C:\Program Files\7-Zip\7z.exe"));
        candidates.push(PathBuf::from(r"C:\Program Files (x86)\7-Zip\7z.exe"));
        for var in ["ProgramFiles", "ProgramFiles(x86)"] {
            if let Ok(root) = std::env::var(var) {
                candidates.push(PathBuf::from(root).join("7-Zip").join("7z.exe"));
            }
        }
    } else {
        for dir in ["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"] {
            for name in ["7z", "7zz", "7za"] {
                candidates.push(Path::new(dir).join(name));
            }
        }
    }
    candidates
}

fn fallback_command() -> &'static str {
    if cfg!(windows) {
        "7z.exe"
    } else {
        "7z"
    }
}

/// Runs `7z x <archive> -o<dir> -y`.
#[derive(Debug, Clone)]
pub struct SevenZipExtractor {
    binary: SevenZipBinary,
}

impl SevenZipExtractor {
    pub fn new(binary: SevenZipBinary) -> Self {
        Self { binary }
    }

    pub fn locate(resource_dir: Option<&Path>) -> Self {
        Self::new(SevenZipBinary::locate(resource_dir))
    }

    pub fn binary(&self) -> &SevenZipBinary {
        &self.binary
    }
}

#[async_trait]
impl ArchiveExtractor for SevenZipExtractor {
    #[instrument(skip(self, reporter))]
    async fn extract(
        &self,
        archive: &Path,
        output_dir: &Path,
        reporter: &Reporter,
    ) -> EngineResult<()> {
        let label = archive_label(archive);
        reporter.log(format!("Extracting: {label}"));
        reporter.progress(ProgressEvent::Extract {
            file: label.clone(),
            progress: 0.0,
        });

        let source = match self.binary.source {
            SevenZipSource::Bundled => "bundled",
            SevenZipSource::System => "system",
            SevenZipSource::PathLookup => "PATH",
        };
        reporter.log(format!("Using {source} 7-Zip at: {}", self.binary.path.display()));

        let output_arg = format!("-o{}", output_dir.display());
        reporter.log(format!(
            "Running: {} x {} {} -y",
            self.binary.path.display(),
            archive.display(),
            output_arg
        ));

        let mut cmd = tokio::process::Command::new(&self.binary.path);
        cmd.arg("x")
            .arg(archive)
            .arg(&output_arg)
            .arg("-y")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                let err = EngineError::ExtractorMissing {
                    tool: "7-Zip".to_string(),
                    guidance: INSTALL_GUIDANCE.to_string(),
                };
                reporter.log(format!("Extraction error: {err}"));
                return Err(err);
            }
            Err(source) => {
                let err = EngineError::Spawn {
                    path: self.binary.path.clone(),
                    source,
                };
                reporter.log(format!("Extraction error: {err}"));
                return Err(err);
            }
        };

        // pipes are drained while waiting; a full pipe would block the tool
        let stdout = child.stdout.take().map(|pipe| {
            let marker = (reporter.clone(), label.clone());
            tokio::spawn(drain_with_marker(pipe, marker))
        });
        let stderr = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));

        let status = child
            .wait()
            .await
            .map_err(|source| EngineError::Spawn {
                path: self.binary.path.clone(),
                source,
            })?;
        let stdout = collect(stdout).await;
        let stderr = collect(stderr).await;
        debug!("7-Zip finished with {:?}", status);

        if status.success() {
            reporter.log(format!("Extracted: {label}"));
            reporter.progress(ProgressEvent::Extract {
                file: label,
                progress: 100.0,
            });
            info!("Extraction of {:?} into {:?} finished", archive, output_dir);
            return Ok(());
        }

        let output = if stderr.trim().is_empty() { stdout } else { stderr };
        let err = EngineError::ExtractionFailed {
            code: status.code(),
            output: output.trim().to_string(),
        };
        reporter.log(format!("Extraction error: {err}"));
        Err(err)
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).to_string()
}

/// Like [`drain`], but reports a 50% extract step once the tool starts
/// writing output. 7-Zip gives no usable progress on a pipe.
async fn drain_with_marker<R: AsyncRead + Unpin>(
    mut pipe: R,
    (reporter, label): (Reporter, String),
) -> String {
    let mut output = Vec::new();
    let mut chunk = [0u8; 4096];
    let mut marked = false;
    loop {
        match pipe.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                output.extend_from_slice(&chunk[..n]);
                if !marked {
                    marked = true;
                    reporter.progress(ProgressEvent::Extract {
                        file: label.clone(),
                        progress: 50.0,
                    });
                }
            }
        }
    }
    String::from_utf8_lossy(&output).to_string()
}

async fn collect(handle: Option<tokio::task::JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}
