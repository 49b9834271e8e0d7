use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::core::error::{EngineError, EngineResult};
use crate::core::events::{ProgressEvent, Reporter};

use super::{archive_label, ArchiveExtractor};

/// In-process extractor for `.zip` archives. Entries keep their full relative
/// path; layout repair is left to the normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipExtractor;

#[async_trait]
impl ArchiveExtractor for ZipExtractor {
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

        let archive_path = archive.to_path_buf();
        let output = output_dir.to_path_buf();
        let result = tokio::task::spawn_blocking(move || extract_zip_file(&archive_path, &output))
            .await
            .map_err(|e| EngineError::Other(format!("Task join error: {e}")))?;

        match result {
            Ok(count) => {
                reporter.log(format!("Extracted: {label} ({count} entries)"));
                reporter.progress(ProgressEvent::Extract {
                    file: label,
                    progress: 100.0,
                });
                Ok(())
            }
            Err(err) => {
                reporter.log(format!("Extraction error: {err}"));
                Err(err)
            }
        }
    }
}

fn extract_zip_file(zip_path: &Path, output_dir: &Path) -> EngineResult<usize> {
    let zip_file = std::fs::File::open(zip_path).map_err(|source| EngineError::io(zip_path, source))?;
    let mut archive = zip::ZipArchive::new(zip_file)?;

    std::fs::create_dir_all(output_dir).map_err(|source| EngineError::io(output_dir, source))?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut zipped = archive.by_index(index)?;
        let rel_path: PathBuf = zipped
            .enclosed_name()
            .ok_or_else(|| EngineError::Other(format!("Invalid zip entry path: {}", zipped.name())))?;

        let out_path = output_dir.join(rel_path);
        if zipped.is_dir() {
            std::fs::create_dir_all(&out_path).map_err(|source| EngineError::io(&out_path, source))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| EngineError::io(parent, source))?;
        }

        let mut out =
            std::fs::File::create(&out_path).map_err(|source| EngineError::io(&out_path, source))?;
        std::io::copy(&mut zipped, &mut out).map_err(|source| EngineError::io(&out_path, source))?;

        #[cfg(unix)]
        if let Some(mode) = zipped.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode & 0o777))
                .map_err(|source| EngineError::io(&out_path, source))?;
        }
        written += 1;
    }

    Ok(written)
}
