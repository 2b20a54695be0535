//! Read-only queries over a freshly reconciled index.

use anyhow::{Context, Result};
use std::fmt::Write;
use std::sync::Arc;

use super::{load, resolve_name};
use crate::{
    config::Overrides,
    index::IndexSnapshot,
    package::{PackageRecord, strip_archive_extension},
    runtime::Runtime,
};

async fn run_query<R, F>(runtime: Arc<R>, overrides: Overrides, render: F) -> Result<()>
where
    R: Runtime + 'static,
    F: FnOnce(&IndexSnapshot) -> Result<String>,
{
    let (session, _, snapshot) = load(runtime, overrides).await?;
    let output = render(&snapshot);
    session.close();
    print!("{}", output?);
    Ok(())
}

/// Print one record and its other copies.
#[tracing::instrument(skip(runtime, overrides))]
pub async fn show<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides, key: &str) -> Result<()> {
    run_query(runtime, overrides, |s| render_show(s, key)).await
}

/// Print everything a package needs, transitively.
#[tracing::instrument(skip(runtime, overrides))]
pub async fn deps<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides, name: &str) -> Result<()> {
    run_query(runtime, overrides, |s| render_deps(s, name)).await
}

#[tracing::instrument(skip(runtime, overrides))]
pub async fn dependents<R: Runtime + 'static>(
    runtime: Arc<R>,
    overrides: Overrides,
    name: &str,
) -> Result<()> {
    run_query(runtime, overrides, |s| render_dependents(s, name)).await
}

/// Print everything that would break if a package were removed.
#[tracing::instrument(skip(runtime, overrides))]
pub async fn impact<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides, name: &str) -> Result<()> {
    run_query(runtime, overrides, |s| render_impact(s, name)).await
}

#[tracing::instrument(skip(runtime, overrides))]
pub async fn orphans<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides) -> Result<()> {
    run_query(runtime, overrides, render_orphans).await
}

/// Print packages with at least `min` direct dependents.
#[tracing::instrument(skip(runtime, overrides))]
pub async fn critical<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides, min: usize) -> Result<()> {
    run_query(runtime, overrides, |s| render_critical(s, min)).await
}

#[tracing::instrument(skip(runtime, overrides))]
pub async fn missing<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides) -> Result<()> {
    run_query(runtime, overrides, render_missing).await
}

/// Print packages superseded by a newer version of the same package.
#[tracing::instrument(skip(runtime, overrides))]
pub async fn old<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides) -> Result<()> {
    run_query(runtime, overrides, render_old).await
}

#[tracing::instrument(skip(runtime, overrides))]
pub async fn stats<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides) -> Result<()> {
    run_query(runtime, overrides, render_stats).await
}

fn render_show(snapshot: &IndexSnapshot, key: &str) -> Result<String> {
    let stem = strip_archive_extension(key.trim());
    let record = snapshot
        .find(stem)
        .or_else(|| {
            resolve_name(snapshot, stem)
                .ok()
                .and_then(|name| snapshot.canonical(&name))
        })
        .with_context(|| format!("Package not found: {}", key))?;

    let mut out = String::new();
    writeln!(out, "{}", record.full_name())?;
    writeln!(out, "  Path: {}", record.path.display())?;
    writeln!(out, "  Status: {}", record.status)?;
    writeln!(out, "  Size: {} bytes", record.file_size)?;
    if record.is_old_version {
        writeln!(out, "  Version: {} (latest is {})", record.version, record.latest_version)?;
    } else {
        writeln!(out, "  Version: {}", record.version)?;
    }
    if let Some(license) = &record.license_type {
        writeln!(out, "  License: {}", license)?;
    }
    if record.is_optimized {
        writeln!(out, "  Optimized: yes")?;
    }
    if record.is_corrupted {
        writeln!(
            out,
            "  Corrupted: {}",
            record.corruption_reason.as_deref().unwrap_or("unknown reason")
        )?;
    }
    writeln!(out, "  Locations: {}", record.duplicate_location_count)?;
    if !record.content_counts.is_empty() {
        let counts: Vec<String> = record
            .content_counts
            .iter()
            .map(|(category, n)| format!("{} {}", n, category))
            .collect();
        writeln!(out, "  Content: {}", counts.join(", "))?;
    }
    writeln!(out, "  Dependencies: {}", record.dependency_count)?;
    for dependency in &record.dependencies {
        if record.missing_dependencies.contains(dependency) {
            writeln!(out, "    {} (missing)", dependency)?;
        } else {
            writeln!(out, "    {}", dependency)?;
        }
    }
    writeln!(out, "  Dependents: {}", record.dependents_count)?;

    let copies: Vec<String> = snapshot
        .records
        .keys()
        .filter(|k| k.stem == record.full_name() && !k.is_canonical())
        .map(|k| k.to_string())
        .collect();
    if !copies.is_empty() {
        writeln!(out, "  Other copies: {}", copies.join(", "))?;
    }
    Ok(out)
}

fn render_deps(snapshot: &IndexSnapshot, name: &str) -> Result<String> {
    let name = resolve_name(snapshot, name)?;
    let chain = snapshot.graph.full_dependency_chain(&name);
    Ok(list_or(chain, &format!("{} has no dependencies.", name)))
}

fn render_dependents(snapshot: &IndexSnapshot, name: &str) -> Result<String> {
    let name = resolve_name(snapshot, name)?;
    let dependents = snapshot.graph.dependents(&name);
    Ok(list_or(dependents, &format!("Nothing depends on {}.", name)))
}

fn render_impact(snapshot: &IndexSnapshot, name: &str) -> Result<String> {
    let name = resolve_name(snapshot, name)?;
    let broken = snapshot.graph.packages_that_would_break(&name);
    if broken.is_empty() {
        return Ok(format!("Removing {} breaks nothing.\n", name));
    }
    let mut out = format!("Removing {} would break {} package(s):\n", name, broken.len());
    for package in broken {
        writeln!(out, "  {}", package)?;
    }
    Ok(out)
}

fn render_orphans(snapshot: &IndexSnapshot) -> Result<String> {
    Ok(list_or(snapshot.graph.orphans(), "No orphan packages."))
}

fn render_critical(snapshot: &IndexSnapshot, min: usize) -> Result<String> {
    let critical = snapshot.graph.critical(min);
    if critical.is_empty() {
        return Ok(format!("No package has {} or more dependents.\n", min));
    }
    let mut out = String::new();
    for (name, count) in critical {
        writeln!(out, "{:>5}  {}", count, name)?;
    }
    Ok(out)
}

fn render_missing(snapshot: &IndexSnapshot) -> Result<String> {
    let mut out = String::new();
    for record in snapshot.canonical_records() {
        if record.missing_dependencies.is_empty() {
            continue;
        }
        writeln!(out, "{}", record.full_name())?;
        for dependency in &record.missing_dependencies {
            writeln!(out, "  {}", dependency)?;
        }
    }
    if out.is_empty() {
        out.push_str("All dependencies are satisfied.\n");
    }
    Ok(out)
}

fn render_old(snapshot: &IndexSnapshot) -> Result<String> {
    let old: Vec<&PackageRecord> = snapshot
        .canonical_records()
        .filter(|r| r.is_old_version)
        .collect();
    if old.is_empty() {
        return Ok("No old versions.\n".to_string());
    }

    let mut out = String::new();
    for record in old {
        let needed = snapshot.graph.dependent_count(record.full_name());
        write!(out, "{} (latest: {})", record.full_name(), record.latest_version)?;
        if needed > 0 {
            write!(out, " [{} dependent(s)]", needed)?;
        }
        writeln!(out)?;
    }
    Ok(out)
}

fn render_stats(snapshot: &IndexSnapshot) -> Result<String> {
    let stats = snapshot.graph.graph_statistics();
    let mut out = String::new();
    writeln!(out, "Records: {}", snapshot.len())?;
    writeln!(out, "Packages: {}", stats.packages)?;
    writeln!(
        out,
        "Duplicated: {}",
        snapshot.canonical_records().filter(|r| r.is_duplicate).count()
    )?;
    writeln!(
        out,
        "Corrupted: {}",
        snapshot.canonical_records().filter(|r| r.is_corrupted).count()
    )?;
    writeln!(
        out,
        "Old versions: {}",
        snapshot.canonical_records().filter(|r| r.is_old_version).count()
    )?;
    writeln!(
        out,
        "With missing dependencies: {}",
        snapshot
            .canonical_records()
            .filter(|r| !r.missing_dependencies.is_empty())
            .count()
    )?;
    writeln!(out, "Dependency edges: {}", stats.edges)?;
    writeln!(out, "Orphans: {}", stats.orphans)?;
    writeln!(out, "With dependencies: {}", stats.with_dependencies)?;
    if let Some((name, count)) = stats.most_depended_on {
        writeln!(out, "Most depended on: {} ({})", name, count)?;
    }
    Ok(out)
}

fn list_or<I: IntoIterator<Item = String>>(items: I, empty: &str) -> String {
    let mut out = String::new();
    for item in items {
        out.push_str(&item);
        out.push('\n');
    }
    if out.is_empty() {
        out.push_str(empty);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::snapshot;
    use crate::index::VariantKey;

    fn sample() -> IndexSnapshot {
        let mut snapshot = snapshot(&[
            ("Me.Scene.1", &["Me.Look.latest", "Gone.Pack.2"]),
            ("Me.Look.1", &["Me.Skin.1"]),
            ("Me.Look.2", &["Me.Skin.1"]),
            ("Me.Skin.1", &[]),
        ]);
        let scene = snapshot
            .records
            .get_mut(&VariantKey::canonical("Me.Scene.1"))
            .unwrap();
        scene.missing_dependencies = vec!["Gone.Pack.2".to_string()];
        scene.dependency_count = 2;
        let old = snapshot
            .records
            .get_mut(&VariantKey::canonical("Me.Look.1"))
            .unwrap();
        old.is_old_version = true;
        old.latest_version = 2;
        snapshot
    }

    #[test]
    fn test_render_show() {
        let text = render_show(&sample(), "Me.Scene.1.var").unwrap();
        assert!(text.starts_with("Me.Scene.1\n"));
        assert!(text.contains("    Gone.Pack.2 (missing)"));
        assert!(text.contains("    Me.Look.latest\n"));
        assert!(render_show(&sample(), "Nope.Nope.1").is_err());
    }

    #[test]
    fn test_render_deps_and_impact() {
        let snapshot = sample();
        assert_eq!(
            render_deps(&snapshot, "Me.Scene.1").unwrap(),
            "Me.Look.1\nMe.Look.2\nMe.Skin.1\n"
        );
        assert_eq!(
            render_impact(&snapshot, "Me.Skin.1").unwrap(),
            "Removing Me.Skin.1 would break 3 package(s):\n  Me.Look.1\n  Me.Look.2\n  Me.Scene.1\n"
        );
        assert_eq!(
            render_dependents(&snapshot, "Me.Scene.1").unwrap(),
            "Nothing depends on Me.Scene.1.\n"
        );
    }

    #[test]
    fn test_render_critical_and_orphans() {
        let snapshot = sample();
        assert_eq!(render_critical(&snapshot, 2).unwrap(), "    2  Me.Skin.1\n");
        assert_eq!(
            render_orphans(&snapshot).unwrap(),
            "Me.Scene.1\n"
        );
    }

    #[test]
    fn test_render_missing_and_old() {
        let snapshot = sample();
        assert_eq!(
            render_missing(&snapshot).unwrap(),
            "Me.Scene.1\n  Gone.Pack.2\n"
        );
        assert_eq!(
            render_old(&snapshot).unwrap(),
            "Me.Look.1 (latest: 2) [1 dependent(s)]\n"
        );
    }

    #[test]
    fn test_render_stats() {
        let text = render_stats(&sample()).unwrap();
        assert!(text.contains("Packages: 4"));
        assert!(text.contains("Dependency edges: 4"));
        assert!(text.contains("Most depended on: Me.Skin.1 (2)"));
    }
}
