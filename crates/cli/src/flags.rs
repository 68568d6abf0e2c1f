use clap::ValueEnum;
use skinmatch_vector_store::{Device, EmbeddingMode, IndexBackend};

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum EmbedMode {
    Onnx,
    Stub,
}

impl EmbedMode {
    pub(crate) const fn as_domain(self) -> EmbeddingMode {
        match self {
            EmbedMode::Onnx => EmbeddingMode::Onnx,
            EmbedMode::Stub => EmbeddingMode::Stub,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum DeviceFlag {
    Cpu,
    Cuda,
}

impl DeviceFlag {
    pub(crate) const fn as_domain(self) -> Device {
        match self {
            DeviceFlag::Cpu => Device::Cpu,
            DeviceFlag::Cuda => Device::Cuda,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
pub(crate) enum IndexBackendFlag {
    Auto,
    Flat,
    Brute,
}

impl IndexBackendFlag {
    pub(crate) const fn as_domain(self) -> IndexBackend {
        match self {
            IndexBackendFlag::Auto => IndexBackend::Auto,
            IndexBackendFlag::Flat => IndexBackend::Flat,
            IndexBackendFlag::Brute => IndexBackend::Brute,
        }
    }
}

/// `locale=url` pair given to `refresh --source-url`.
pub(crate) fn parse_source(raw: &str) -> Result<(String, String), String> {
    let (locale, url) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected LOCALE=URL, got '{raw}'"))?;
    let (locale, url) = (locale.trim(), url.trim());
    if locale.is_empty() || url.is_empty() {
        return Err(format!("expected LOCALE=URL, got '{raw}'"));
    }
    Ok((locale.to_string(), url.to_string()))
}
