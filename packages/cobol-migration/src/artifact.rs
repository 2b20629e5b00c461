use crate::output_parser::{derive_package_path, derive_type_name};
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// One generated target-language file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub file_name: String,
    pub content: String,
    /// Directory form of the declared package (`com/example/app`)
    pub package_path: String,
    pub type_name: String,
    /// Input unit the file was generated from
    pub origin_unit: String,
}

impl GeneratedArtifact {
    pub fn new(
        file_name: impl Into<String>,
        content: impl Into<String>,
        origin_unit: impl Into<String>,
    ) -> Self {
        let file_name = file_name.into();
        let content = content.into();
        Self {
            package_path: derive_package_path(&content),
            type_name: derive_type_name(&content, &file_name),
            file_name,
            content,
            origin_unit: origin_unit.into(),
        }
    }

    /// `package_path/file_name`, keeping only the last component of the file name
    pub fn relative_path(&self) -> PathBuf {
        let base = self
            .file_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.file_name);
        self.package_path
            .split('/')
            .filter(|part| !part.is_empty())
            .collect::<PathBuf>()
            .join(base)
    }
}

/// Where generated files end up
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, artifact: &GeneratedArtifact) -> anyhow::Result<PathBuf>;
}

/// Writes artifacts below a root directory
pub struct FsArtifactSink {
    root: PathBuf,
}

impl FsArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn persist(&self, artifact: &GeneratedArtifact) -> anyhow::Result<PathBuf> {
        let relative = artifact.relative_path();
        if relative
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
        {
            bail!("Refusing to write outside the output directory: {}", relative.display());
        }

        let path = self.root.join(&relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, &artifact.content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        debug!("Wrote {} ({} bytes)", path.display(), artifact.content.len());
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactFailure {
    pub file_name: String,
    pub origin_unit: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    pub written: Vec<PathBuf>,
    pub failures: Vec<ArtifactFailure>,
}

/// Persist every artifact; individual failures are collected, not returned
pub async fn persist_artifacts(sink: &dyn ArtifactSink, artifacts: &[GeneratedArtifact]) -> PersistReport {
    let mut report = PersistReport::default();
    for artifact in artifacts {
        match sink.persist(artifact).await {
            Ok(path) => report.written.push(path),
            Err(e) => {
                warn!("Failed to persist {} from {}: {:#}", artifact.file_name, artifact.origin_unit, e);
                report.failures.push(ArtifactFailure {
                    file_name: artifact.file_name.clone(),
                    origin_unit: artifact.origin_unit.clone(),
                    error: format!("{:#}", e),
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_artifact_derives_location() {
        let artifact = GeneratedArtifact::new(
            "Payroll.java",
            "package com.acme.pay;\npublic class Payroll {}",
            "PAYROLL.cbl",
        );
        assert_eq!(artifact.package_path, "com/acme/pay");
        assert_eq!(artifact.type_name, "Payroll");
        assert_eq!(
            artifact.relative_path(),
            PathBuf::from("com").join("acme").join("pay").join("Payroll.java")
        );
    }

    #[test]
    fn test_relative_path_drops_directories_in_name() {
        let artifact = GeneratedArtifact::new("../../etc/Evil.java", "class Evil {}", "X.cbl");
        assert_eq!(
            artifact.relative_path(),
            PathBuf::from("generated").join("Evil.java")
        );
    }

    #[tokio::test]
    async fn test_fs_sink_writes_files() {
        let dir = TempDir::new().unwrap();
        let sink = FsArtifactSink::new(dir.path());
        let artifacts = vec![
            GeneratedArtifact::new("A.java", "package a.b;\nclass A {}", "A.cbl"),
            GeneratedArtifact::new("B.java", "class B {}", "B.cbl"),
        ];

        let report = persist_artifacts(&sink, &artifacts).await;

        assert!(report.failures.is_empty());
        assert_eq!(report.written.len(), 2);
        let written = std::fs::read_to_string(dir.path().join("a/b/A.java")).unwrap();
        assert_eq!(written, "package a.b;\nclass A {}");
        assert!(dir.path().join("generated/B.java").exists());
    }

    #[tokio::test]
    async fn test_failures_are_collected() {
        struct RejectingSink;

        #[async_trait]
        impl ArtifactSink for RejectingSink {
            async fn persist(&self, _artifact: &GeneratedArtifact) -> anyhow::Result<PathBuf> {
                bail!("disk full")
            }
        }

        let artifacts = vec![GeneratedArtifact::new("A.java", "class A {}", "A.cbl")];
        let report = persist_artifacts(&RejectingSink, &artifacts).await;

        assert!(report.written.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].error, "disk full");
    }
}
