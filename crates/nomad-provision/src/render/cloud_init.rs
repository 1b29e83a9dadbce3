//! Cloud-init YAML renderer

use serde::Serialize;

use crate::Manifest;

use super::Renderer;

/// Packages the rendered commands rely on
const DEFAULT_PACKAGES: [&str; 2] = ["curl", "unzip"];

/// Renders a manifest as cloud-init YAML
#[derive(Debug, Clone)]
pub struct CloudInitRenderer {
    /// Packages installed before any command runs
    packages: Vec<String>,
}

impl Default for CloudInitRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl CloudInitRenderer {
    /// Create a new cloud-init renderer
    pub fn new() -> Self {
        Self {
            packages: DEFAULT_PACKAGES.iter().map(ToString::to_string).collect(),
        }
    }
}

impl Renderer for CloudInitRenderer {
    type Output = String;
    type Error = serde_yaml::Error;

    fn render(&self, manifest: &Manifest) -> Result<String, Self::Error> {
        #[derive(Serialize)]
        struct CloudInitConfig {
            package_update: bool,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            packages: Vec<String>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            write_files: Vec<serde_yaml::Value>,
            #[serde(skip_serializing_if = "Vec::is_empty")]
            runcmd: Vec<String>,
            final_message: String,
        }

        let mut write_files = vec![];
        let mut runcmd = vec![];

        for step in &manifest.steps {
            let fragment = step.to_cloud_init();
            for file in fragment.write_files {
                write_files.push(serde_yaml::to_value(&file)?);
            }
            runcmd.extend(fragment.runcmd);
        }

        let mut packages = self.packages.clone();
        packages.sort();
        packages.dedup();

        let config = CloudInitConfig {
            package_update: !packages.is_empty(),
            packages,
            write_files,
            runcmd,
            final_message: format!("{} finished", manifest.name),
        };

        let yaml = serde_yaml::to_string(&config)?;
        Ok(format!("#cloud-config\n{yaml}"))
    }
}
