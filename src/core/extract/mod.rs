// ─── Archive extraction ───
// The engine ships as (multi-part) 7z archives, extracted by an external
// 7-Zip binary. Plain zip archives are unpacked in-process.

pub mod seven_zip;
pub mod zip_archive;

use std::path::Path;

use async_trait::async_trait;

use crate::core::error::EngineResult;
use crate::core::events::Reporter;

pub use seven_zip::{SevenZipBinary, SevenZipExtractor, SevenZipSource};
pub use zip_archive::ZipExtractor;

#[async_trait]
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `output_dir`, overwriting existing files.
    /// Emits an extract event at 0% and, on success, at 100%.
    async fn extract(&self, archive: &Path, output_dir: &Path, reporter: &Reporter)
        -> EngineResult<()>;
}

/// Picks the in-process zip extractor for `.zip` files and 7-Zip for
/// everything else (`.7z`, `.7z.001`, ...).
pub struct AutoExtractor {
    seven_zip: SevenZipExtractor,
    zip: ZipExtractor,
}

impl AutoExtractor {
    pub fn new(seven_zip: SevenZipExtractor) -> Self {
        Self {
            seven_zip,
            zip: ZipExtractor,
        }
    }
}

#[async_trait]
impl ArchiveExtractor for AutoExtractor {
    async fn extract(
        &self,
        archive: &Path,
        output_dir: &Path,
        reporter: &Reporter,
    ) -> EngineResult<()> {
        if is_zip(archive) {
            self.zip.extract(archive, output_dir, reporter).await
        } else {
            self.seven_zip.extract(archive, output_dir, reporter).await
        }
    }
}

fn is_zip(archive: &Path) -> bool {
    archive
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"))
}

pub(crate) fn archive_label(archive: &Path) -> String {
    archive
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}
