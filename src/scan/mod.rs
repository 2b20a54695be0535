//! Discovery of archive files under the configured roots.
//!
//! Each root is walked on its own blocking task. Results land in a shared
//! list and are sorted once every walk has finished, so the output order
//! never depends on task scheduling.

use anyhow::{Context, Result};
use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::package::{VariantRole, archive_stem, is_archive_path};
use crate::retry::with_retry;
use crate::runtime::{Runtime, path_key};

/// A folder to scan and the role its archives take.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRoot {
    pub path: PathBuf,
    pub role: VariantRole,
    /// Label stamped on records found here. Defaults to the role's label.
    #[serde(default)]
    pub status: Option<String>,
}

impl ScanRoot {
    pub fn new(path: impl Into<PathBuf>, role: VariantRole) -> Self {
        Self {
            path: path.into(),
            role,
            status: None,
        }
    }

    pub fn status_label(&self) -> &str {
        self.status.as_deref().unwrap_or(self.role.status_label())
    }
}

/// One discovered archive file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDescriptor {
    /// Archive stem, e.g. `Creator.Package.3`.
    pub package: String,
    pub role: VariantRole,
    pub status: String,
    pub path: PathBuf,
    pub size: u64,
    pub mtime_ticks: i64,
}

/// Walk every root concurrently and return the sorted descriptor list.
///
/// Missing roots contribute nothing. Files whose stat keeps failing are
/// logged and skipped. A file reachable through several paths (symlinked
/// folders, overlapping roots) is reported once, under its first path in
/// sort order.
pub async fn discover<R: Runtime + 'static>(
    runtime: Arc<R>,
    roots: &[ScanRoot],
    exclude: &[String],
) -> Result<Vec<FileDescriptor>> {
    let patterns = compile_excludes(exclude)?;
    let found = Arc::new(Mutex::new(Vec::new()));

    let mut tasks = Vec::with_capacity(roots.len());
    for root in roots.iter().cloned() {
        let runtime = Arc::clone(&runtime);
        let found = Arc::clone(&found);
        let patterns = patterns.clone();
        tasks.push(tokio::task::spawn_blocking(move || {
            let descriptors = walk_root(runtime.as_ref(), &root, &patterns);
            debug!("{} archive(s) under {:?}", descriptors.len(), root.path);
            found.lock().extend(descriptors);
        }));
    }

    for task in tasks {
        task.await.context("Discovery task failed")?;
    }

    let mut descriptors = std::mem::take(&mut *found.lock());
    sort_descriptors(&mut descriptors);

    let mut seen = HashSet::new();
    descriptors.retain(|d| {
        let unique = seen.insert(canonical_or_self(runtime.as_ref(), &d.path));
        if !unique {
            debug!("{:?} is another path to an archive already found", d.path);
        }
        unique
    });
    Ok(descriptors)
}

/// Order descriptors by (package, role priority, path, mtime).
pub fn sort_descriptors(descriptors: &mut [FileDescriptor]) {
    descriptors.sort_by(|a, b| {
        a.package
            .cmp(&b.package)
            .then(a.role.priority().cmp(&b.role.priority()))
            .then_with(|| path_key(&a.path).cmp(&path_key(&b.path)))
            .then(a.mtime_ticks.cmp(&b.mtime_ticks))
    });
}

fn compile_excludes(exclude: &[String]) -> Result<Vec<glob::Pattern>> {
    exclude
        .iter()
        .map(|p| glob::Pattern::new(p).with_context(|| format!("Invalid exclude pattern: {}", p)))
        .collect()
}

fn is_excluded(path: &Path, patterns: &[glob::Pattern]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let key = path.to_string_lossy().replace('\\', "/");
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    patterns
        .iter()
        .any(|p| p.matches(&key) || p.matches(file_name))
}

fn canonical_or_self<R: Runtime>(runtime: &R, path: &Path) -> PathBuf {
    runtime
        .canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
}

fn walk_root<R: Runtime>(runtime: &R, root: &ScanRoot, patterns: &[glob::Pattern]) -> Vec<FileDescriptor> {
    let mut descriptors = Vec::new();
    if !runtime.exists(&root.path) {
        debug!("Scan root {:?} does not exist, skipping", root.path);
        return descriptors;
    }

    // Canonical folders already queued; symlink cycles end here.
    let mut visited = HashSet::from([canonical_or_self(runtime, &root.path)]);
    let mut pending = vec![root.path.clone()];
    while let Some(dir) = pending.pop() {
        let entries = match runtime.read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot list {:?}: {:#}", dir, e);
                continue;
            }
        };

        for path in entries {
            if is_excluded(&path, patterns) {
                debug!("Excluded {:?}", path);
                continue;
            }
            if runtime.is_dir(&path) {
                if visited.insert(canonical_or_self(runtime, &path)) {
                    pending.push(path);
                } else {
                    debug!("{:?} leads to a folder already walked", path);
                }
                continue;
            }
            if !is_archive_path(&path) {
                continue;
            }
            let Some(package) = archive_stem(&path) else {
                continue;
            };

            match with_retry("stat archive", || runtime.metadata(&path)) {
                Ok(stat) => descriptors.push(FileDescriptor {
                    package,
                    role: root.role,
                    status: root.status_label().to_string(),
                    path,
                    size: stat.size,
                    mtime_ticks: stat.mtime_ticks,
                }),
                Err(e) => warn!("Skipping {:?}: {:#}", path, e),
            }
        }
    }

    descriptors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{FileStat, MockRuntime, RealRuntime};
    use mockall::predicate::eq;
    use tempfile::tempdir;

    fn descriptor(package: &str, role: VariantRole, path: &str, mtime: i64) -> FileDescriptor {
        FileDescriptor {
            package: package.to_string(),
            role,
            status: role.status_label().to_string(),
            path: PathBuf::from(path),
            size: 1,
            mtime_ticks: mtime,
        }
    }

    #[test]
    fn test_sort_descriptors() {
        let mut list = vec![
            descriptor("B.B.1", VariantRole::Loaded, "/a/B.B.1.var", 0),
            descriptor("A.A.1", VariantRole::Archived, "/c/A.A.1.var", 0),
            descriptor("A.A.1", VariantRole::Loaded, "/z/A.A.1.var", 0),
            descriptor("A.A.1", VariantRole::Loaded, "/b/A.A.1.var", 0),
        ];
        sort_descriptors(&mut list);

        let order: Vec<_> = list.iter().map(|d| d.path.to_str().unwrap()).collect();
        assert_eq!(
            order,
            vec!["/b/A.A.1.var", "/z/A.A.1.var", "/c/A.A.1.var", "/a/B.B.1.var"]
        );
    }

    #[tokio::test]
    async fn test_discover_walks_roots_with_roles() -> Result<()> {
        let dir = tempdir()?;
        let loaded = dir.path().join("AddonPackages");
        let archived = dir.path().join("ArchivedPackages");
        std::fs::create_dir_all(loaded.join("Sub"))?;
        std::fs::create_dir_all(&archived)?;
        std::fs::write(loaded.join("A.Pack.1.var"), b"x")?;
        std::fs::write(loaded.join("Sub/B.Pack.2.VAR"), b"xy")?;
        std::fs::write(loaded.join("readme.txt"), b"not an archive")?;
        std::fs::write(archived.join("A.Pack.1.var"), b"xyz")?;

        let roots = vec![
            ScanRoot::new(&loaded, VariantRole::Loaded),
            ScanRoot::new(&archived, VariantRole::Archived),
            ScanRoot::new(dir.path().join("Missing"), VariantRole::Available),
        ];
        let found = discover(Arc::new(RealRuntime), &roots, &[]).await?;

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].package, "A.Pack.1");
        assert_eq!(found[0].role, VariantRole::Loaded);
        assert_eq!(found[0].size, 1);
        assert_eq!(found[1].package, "A.Pack.1");
        assert_eq!(found[1].role, VariantRole::Archived);
        assert_eq!(found[1].status, "Archived");
        assert_eq!(found[2].package, "B.Pack.2");
        Ok(())
    }

    #[tokio::test]
    async fn test_discover_applies_excludes() -> Result<()> {
        let dir = tempdir()?;
        std::fs::create_dir_all(dir.path().join("Skip"))?;
        std::fs::write(dir.path().join("A.Pack.1.var"), b"x")?;
        std::fs::write(dir.path().join("Skip/B.Pack.1.var"), b"x")?;
        std::fs::write(dir.path().join("C.Temp.1.var"), b"x")?;

        let roots = vec![ScanRoot::new(dir.path(), VariantRole::Available)];
        let exclude = vec!["*/Skip".to_string(), "*.Temp.*".to_string()];
        let found = discover(Arc::new(RealRuntime), &roots, &exclude).await?;

        let names: Vec<_> = found.iter().map(|d| d.package.as_str()).collect();
        assert_eq!(names, vec!["A.Pack.1"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_discover_rejects_bad_pattern() {
        let result = discover(Arc::new(RealRuntime), &[], &["[".to_string()]).await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_discover_survives_symlink_cycles() -> Result<()> {
        use std::os::unix::fs::symlink;

        let dir = tempdir()?;
        let addon = dir.path().join("AddonPackages");
        std::fs::create_dir_all(addon.join("Sub"))?;
        std::fs::write(addon.join("A.Pack.1.var"), b"x")?;
        std::fs::write(addon.join("Sub/B.Pack.1.var"), b"x")?;
        symlink(".", addon.join("loop"))?;
        symlink(addon.join("Sub"), addon.join("Alias"))?;

        let roots = vec![ScanRoot::new(&addon, VariantRole::Loaded)];
        let found = discover(Arc::new(RealRuntime), &roots, &[]).await?;

        let names: Vec<_> = found.iter().map(|d| d.package.as_str()).collect();
        assert_eq!(names, vec!["A.Pack.1", "B.Pack.1"]);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_discover_reports_linked_root_once() -> Result<()> {
        use std::os::unix::fs::symlink;

        let dir = tempdir()?;
        let addon = dir.path().join("AddonPackages");
        std::fs::create_dir_all(&addon)?;
        std::fs::write(addon.join("A.Pack.1.var"), b"x")?;
        symlink(&addon, dir.path().join("AllPackages"))?;

        let roots = vec![
            ScanRoot::new(dir.path().join("AllPackages"), VariantRole::Available),
            ScanRoot::new(&addon, VariantRole::Loaded),
        ];
        let found = discover(Arc::new(RealRuntime), &roots, &[]).await?;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].role, VariantRole::Loaded);
        assert_eq!(found[0].path, addon.join("A.Pack.1.var"));
        Ok(())
    }

    #[tokio::test]
    async fn test_discover_skips_unstatable_files() -> Result<()> {
        let mut runtime = MockRuntime::new();
        let root = PathBuf::from("/vam/AddonPackages");
        let good = root.join("A.Pack.1.var");
        let bad = root.join("B.Pack.1.var");

        runtime.expect_exists().with(eq(root.clone())).returning(|_| true);
        runtime
            .expect_canonicalize()
            .returning(|p| Ok(p.to_path_buf()));
        let listing = vec![good.clone(), bad.clone()];
        runtime
            .expect_read_dir()
            .with(eq(root.clone()))
            .returning(move |_| Ok(listing.clone()));
        runtime.expect_is_dir().returning(|_| false);
        runtime
            .expect_metadata()
            .with(eq(good.clone()))
            .returning(|_| {
                Ok(FileStat {
                    size: 10,
                    mtime_ticks: 20,
                })
            });
        runtime
            .expect_metadata()
            .with(eq(bad.clone()))
            .returning(|_| Err(anyhow::anyhow!("gone")));

        let roots = vec![ScanRoot::new(&root, VariantRole::Loaded)];
        let found = discover(Arc::new(runtime), &roots, &[]).await?;

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, good);
        assert_eq!(found[0].mtime_ticks, 20);
        Ok(())
    }
}
