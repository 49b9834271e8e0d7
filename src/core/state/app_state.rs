use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::core::config::{EngineConfig, EnginePaths};
use crate::core::downloader::ArchiveFetcher;
use crate::core::error::EngineResult;
use crate::core::events::{LogSink, TracingLog};
use crate::core::extract::{ArchiveExtractor, AutoExtractor, SevenZipExtractor};
use crate::core::installations::Installations;
use crate::core::installer::EngineInstaller;
use crate::core::registry::EngineRegistry;
use crate::core::supervisor::{EngineSupervisor, SupervisorOptions};

/// Everything the IPC layer needs, wired from one `EngineConfig`.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: EngineConfig,
    pub paths: EnginePaths,
    pub registry: Arc<EngineRegistry>,
    pub installations: Arc<Installations>,
    pub installer: EngineInstaller,
    pub supervisor: EngineSupervisor,
}

impl AppState {
    /// Load `engine_settings.json` from `data_dir` and wire the production
    /// components. `resource_dir` fills in the bundled-tools location unless
    /// the settings file already names one.
    pub fn load(data_dir: PathBuf, resource_dir: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = EngineConfig::load(&data_dir)?;
        if config.resource_dir.is_none() {
            config.resource_dir = resource_dir;
        }
        Self::new(data_dir, config, Arc::new(TracingLog))
    }

    pub fn new(data_dir: PathBuf, config: EngineConfig, engine_log: Arc<dyn LogSink>) -> EngineResult<Self> {
        let paths = config.paths();
        let seven_zip = SevenZipExtractor::locate(paths.resource_dir());
        info!(
            "Using 7-Zip at {:?} ({:?})",
            seven_zip.binary().path,
            seven_zip.binary().source
        );
        Self::assemble(
            data_dir,
            config,
            Arc::new(EngineRegistry::builtin()),
            Arc::new(AutoExtractor::new(seven_zip)),
            engine_log,
        )
    }

    /// Wire the state from explicit parts; used by `new` and by tests.
    pub fn assemble(
        data_dir: PathBuf,
        config: EngineConfig,
        registry: Arc<EngineRegistry>,
        extractor: Arc<dyn ArchiveExtractor>,
        engine_log: Arc<dyn LogSink>,
    ) -> EngineResult<Self> {
        let paths = config.paths();
        let installations = Arc::new(Installations::new(
            paths.engine_dir().to_path_buf(),
            registry.clone(),
        ));

        let fetcher = ArchiveFetcher::new(
            config.connect_timeout(),
            config.read_timeout(),
            config.max_redirects,
        )?;
        let installer = EngineInstaller::new(
            installations.clone(),
            paths.staging_root().to_path_buf(),
            fetcher,
            extractor,
        )
        .with_min_free_disk_bytes(config.min_free_disk_bytes);

        let supervisor =
            EngineSupervisor::new(installations.clone(), SupervisorOptions::from_config(&config))?
                .with_log_sink(engine_log);

        info!("Engine directory: {:?}", paths.engine_dir());
        Ok(Self {
            data_dir,
            config,
            paths,
            registry,
            installations,
            installer,
            supervisor,
        })
    }

    pub fn engine_dir(&self) -> &Path {
        self.paths.engine_dir()
    }
}
