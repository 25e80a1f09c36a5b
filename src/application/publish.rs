//! Publish status: compares the local `package.json` version with the registry.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::domain::paths::package_manifest_path;
use crate::domain::traits::RegistryClient;

/// A `major.minor.patch[-pre][+build]` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl FromStr for Version {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('v');
        // Build metadata does not take part in ordering
        let without_build = trimmed.split('+').next().unwrap_or(trimmed);
        let (core, pre) = match without_build.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some((core, _)) => (core, None),
            None => (without_build, None),
        };

        let mut parts = core.split('.');
        let mut next = |label: &str| -> Result<u64> {
            parts
                .next()
                .with_context(|| format!("version '{}' is missing the {} component", s, label))?
                .parse::<u64>()
                .with_context(|| format!("version '{}' has a non-numeric {} component", s, label))
        };
        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            anyhow::bail!("version '{}' has too many components", s);
        }

        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dot-separated identifiers; numeric ones compare numerically and sort first.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishKind {
    /// Never published
    New,
    /// Local version is ahead of the registry
    Update,
    /// Same version as the registry
    Unchanged,
    /// Registry is ahead of the local manifest
    Behind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagePublishStatus {
    pub name: String,
    pub local_version: String,
    pub registry_version: Option<String>,
    pub kind: PublishKind,
    pub needs_version_bump: bool,
    pub needs_publish: bool,
}

impl PackagePublishStatus {
    /// Classifies a package from its local and registry versions.
    pub fn evaluate(
        name: &str,
        local: &str,
        registry: Option<&str>,
        has_changes: bool,
    ) -> Result<Self> {
        let local_version: Version = local.parse()?;

        let (kind, needs_version_bump, needs_publish) = match registry {
            None => (PublishKind::New, false, true),
            Some(published) => {
                let published: Version = published.parse()?;
                match local_version.cmp(&published) {
                    Ordering::Greater => (PublishKind::Update, false, true),
                    Ordering::Equal => (PublishKind::Unchanged, has_changes, has_changes),
                    Ordering::Less => (PublishKind::Behind, true, true),
                }
            }
        };

        Ok(Self {
            name: name.to_string(),
            local_version: local.to_string(),
            registry_version: registry.map(str::to_string),
            kind,
            needs_version_bump,
            needs_publish,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalPackage {
    pub name: String,
    pub version: String,
}

/// Reads `name` and `version` from the package manifest.
pub async fn read_local_package(package_root: &Path) -> Result<LocalPackage> {
    let path = package_manifest_path(package_root);
    let raw = tokio::fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid manifest {}", path.display()))
}

/// Reads the manifest, asks the registry, and classifies.
pub async fn check_publish_status(
    package_root: &Path,
    registry: &dyn RegistryClient,
    has_changes: bool,
) -> Result<PackagePublishStatus> {
    let local = read_local_package(package_root).await?;
    let published = registry
        .published_version(&local.name)
        .await
        .with_context(|| format!("Registry lookup failed for {}", local.name))?;

    let status =
        PackagePublishStatus::evaluate(&local.name, &local.version, published.as_deref(), has_changes)?;
    tracing::info!(
        package = %status.name,
        local = %status.local_version,
        registry = ?status.registry_version,
        kind = ?status.kind,
        "Publish status evaluated"
    );
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_version_ordering() {
        assert!(v("1.2.3") < v("1.2.4"));
        assert!(v("1.10.0") > v("1.9.9"));
        assert!(v("2.0.0-beta.1") < v("2.0.0"));
        assert!(v("2.0.0-alpha") < v("2.0.0-beta"));
        assert!(v("2.0.0-beta.2") < v("2.0.0-beta.11"));
        assert_eq!(v("v1.0.0+build.5"), v("1.0.0"));
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.x.0".parse::<Version>().is_err());
    }

    #[test]
    fn test_evaluate_new_package() {
        let status = PackagePublishStatus::evaluate("@acme/ui", "0.1.0", None, true).unwrap();
        assert_eq!(status.kind, PublishKind::New);
        assert!(status.needs_publish);
        assert!(!status.needs_version_bump);
    }

    #[test]
    fn test_evaluate_against_registry() {
        let update = PackagePublishStatus::evaluate("p", "1.1.0", Some("1.0.0"), false).unwrap();
        assert_eq!(update.kind, PublishKind::Update);
        assert!(update.needs_publish && !update.needs_version_bump);

        let same = PackagePublishStatus::evaluate("p", "1.0.0", Some("1.0.0"), false).unwrap();
        assert_eq!(same.kind, PublishKind::Unchanged);
        assert!(!same.needs_publish && !same.needs_version_bump);

        let changed = PackagePublishStatus::evaluate("p", "1.0.0", Some("1.0.0"), true).unwrap();
        assert!(changed.needs_publish && changed.needs_version_bump);

        let behind = PackagePublishStatus::evaluate("p", "0.9.0", Some("1.0.0"), false).unwrap();
        assert_eq!(behind.kind, PublishKind::Behind);
        assert!(behind.needs_version_bump);
    }

    struct FixedRegistry(Option<&'static str>);

    #[async_trait]
    impl RegistryClient for FixedRegistry {
        async fn published_version(&self, _package_name: &str) -> Result<Option<String>> {
            Ok(self.0.map(str::to_string))
        }
    }

    #[tokio::test]
    async fn test_check_publish_status_reads_manifest() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("package.json"),
            r#"{"name":"@acme/tokens","version":"1.3.0","private":false}"#,
        )
        .unwrap();

        let status = check_publish_status(dir.path(), &FixedRegistry(Some("1.2.9")), false)
            .await
            .unwrap();
        assert_eq!(status.name, "@acme/tokens");
        assert_eq!(status.kind, PublishKind::Update);

        let missing = TempDir::new().unwrap();
        assert!(check_publish_status(missing.path(), &FixedRegistry(None), false).await.is_err());
    }
}
