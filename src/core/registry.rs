// ─── Engine registry ───
// Static catalog of the VOICEVOX engine builds this release knows how to
// install. Download URLs are pinned to one engine version.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{EngineError, EngineResult};

pub const ENGINE_VERSION: &str = "0.25.0";

const RELEASE_BASE: &str = "https://github.com/VOICEVOX/voicevox_engine/releases/download";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariantId {
    #[serde(alias = "gpu-cuda")]
    Cuda,
    #[serde(alias = "gpu-directml")]
    DirectMl,
    Cpu,
}

impl VariantId {
    /// Fallback order used when no engine has been selected explicitly.
    pub const PREFERENCE_ORDER: [VariantId; 3] = [VariantId::Cuda, VariantId::DirectMl, VariantId::Cpu];

    pub fn as_str(self) -> &'static str {
        match self {
            VariantId::Cuda => "cuda",
            VariantId::DirectMl => "directml",
            VariantId::Cpu => "cpu",
        }
    }

    pub fn is_gpu(self) -> bool {
        matches!(self, VariantId::Cuda | VariantId::DirectMl)
    }
}

impl fmt::Display for VariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VariantId {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cuda" | "gpu-cuda" => Ok(VariantId::Cuda),
            "directml" | "gpu-directml" => Ok(VariantId::DirectMl),
            "cpu" => Ok(VariantId::Cpu),
            _ => Err(EngineError::UnknownVariant(raw.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetPlatform {
    Windows,
    Linux,
    Mac,
}

impl TargetPlatform {
    pub fn current() -> Self {
        match std::env::consts::OS {
            "linux" => TargetPlatform::Linux,
            "macos" => TargetPlatform::Mac,
            _ => TargetPlatform::Windows,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineVariant {
    pub id: VariantId,
    pub name: String,
    pub description: String,
    pub recommended: bool,
    pub platform: TargetPlatform,
    pub urls: Vec<String>,
}

impl EngineVariant {
    pub fn is_gpu(&self) -> bool {
        self.id.is_gpu()
    }

    pub fn part_count(&self) -> usize {
        self.urls.len()
    }
}

#[derive(Debug, Clone)]
pub struct EngineRegistry {
    variants: Vec<EngineVariant>,
}

impl EngineRegistry {
    /// Validates that identifiers are unique and every variant has at least
    /// one download part.
    pub fn new(variants: Vec<EngineVariant>) -> EngineResult<Self> {
        for (index, variant) in variants.iter().enumerate() {
            if variant.urls.is_empty() {
                return Err(EngineError::Other(format!(
                    "Engine variant {} has no download URLs",
                    variant.id
                )));
            }
            if variants[..index].iter().any(|other| other.id == variant.id) {
                return Err(EngineError::Other(format!(
                    "Engine variant {} is registered twice",
                    variant.id
                )));
            }
        }
        Ok(Self { variants })
    }

    pub fn builtin() -> Self {
        Self {
            variants: builtin_variants(),
        }
    }

    pub fn get(&self, id: VariantId) -> Option<&EngineVariant> {
        self.variants.iter().find(|variant| variant.id == id)
    }

    /// Parse and look up in one step; unknown names become `UnknownVariant`.
    pub fn resolve(&self, raw: &str) -> EngineResult<&EngineVariant> {
        let id: VariantId = raw.parse()?;
        self.get(id)
            .ok_or_else(|| EngineError::UnknownVariant(raw.to_string()))
    }

    pub fn all(&self) -> impl Iterator<Item = (VariantId, &EngineVariant)> {
        self.variants.iter().map(|variant| (variant.id, variant))
    }

    pub fn ids(&self) -> Vec<VariantId> {
        self.variants.iter().map(|variant| variant.id).collect()
    }

    /// Registered variants in preference order.
    pub fn preference_order(&self) -> Vec<VariantId> {
        VariantId::PREFERENCE_ORDER
            .into_iter()
            .filter(|id| self.get(*id).is_some())
            .collect()
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn release_url(flavor: &str, part: u32) -> String {
    format!(
        "{RELEASE_BASE}/{ENGINE_VERSION}/voicevox_engine-windows-{flavor}-{ENGINE_VERSION}.7z.{part:03}"
    )
}

fn builtin_variants() -> Vec<EngineVariant> {
    vec![
        EngineVariant {
            id: VariantId::Cuda,
            name: "CUDA版（NVIDIA GPU対応）".to_string(),
            description: "【推奨】NVIDIA GPUで最高速。CUDA対応GPUが必要".to_string(),
            recommended: true,
            platform: TargetPlatform::Windows,
            urls: vec![release_url("nvidia", 1), release_url("nvidia", 2)],
        },
        EngineVariant {
            id: VariantId::DirectMl,
            name: "DirectML版（AMD/Intel GPU対応）".to_string(),
            description: "【推奨】AMD/Intel GPUで高速動作。Windows 10以降が必要".to_string(),
            recommended: true,
            platform: TargetPlatform::Windows,
            urls: vec![release_url("directml", 1)],
        },
        EngineVariant {
            id: VariantId::Cpu,
            name: "CPU版（すべてのPC対応）".to_string(),
            description: "GPU非対応の場合や、GPU版で問題が発生した場合に選択".to_string(),
            recommended: false,
            platform: TargetPlatform::Windows,
            urls: vec![release_url("cpu", 1)],
        },
    ]
}
