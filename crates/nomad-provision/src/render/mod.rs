//! Offline renderings of a manifest
//!
//! Instead of applying steps to the local host, a manifest can be turned
//! into text that performs the same install elsewhere.

mod bash;
mod cloud_init;

pub use bash::BashRenderer;
pub use cloud_init::CloudInitRenderer;

use thiserror::Error;

use crate::Manifest;

/// Turns a manifest into some output format
pub trait Renderer {
    type Output;
    type Error;

    fn render(&self, manifest: &Manifest) -> Result<Self::Output, Self::Error>;
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot write bash script")]
    Bash(#[from] std::fmt::Error),

    #[error("cannot serialize cloud-config: {0}")]
    CloudInit(#[from] serde_yaml::Error),
}

/// Text formats with default renderer settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptFormat {
    /// Verbose bash script with progress markers
    Bash,
    /// `#cloud-config` user data
    CloudInit,
}

impl ScriptFormat {
    pub fn render(self, manifest: &Manifest, color: bool) -> Result<String, RenderError> {
        let text = match self {
            Self::Bash => BashRenderer::new()
                .verbose(true)
                .color(color)
                .render(manifest)?,
            Self::CloudInit => CloudInitRenderer::new().render(manifest)?,
        };
        Ok(text)
    }
}
