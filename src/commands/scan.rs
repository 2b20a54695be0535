use anyhow::Result;
use std::sync::Arc;

use crate::{config::Overrides, index::PassReport, runtime::Runtime};

/// Scan every configured folder and print a summary, or the whole index
/// as JSON.
#[tracing::instrument(skip(runtime, overrides))]
pub async fn scan<R: Runtime + 'static>(runtime: Arc<R>, overrides: Overrides, json: bool) -> Result<()> {
    let (session, report, snapshot) = super::load(runtime, overrides).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot.display_map())?);
    } else {
        println!("{}", summary(&report));
    }

    session.close();
    Ok(())
}

fn summary(report: &PassReport) -> String {
    let mut out = format!(
        "Indexed {} package(s) ({} record(s)) from {} archive(s)",
        report.packages, report.records, report.descriptors
    );
    out.push_str(&format!(
        "\n  reused: {}, cache hits: {}, parsed: {}",
        report.reused, report.cache_hits, report.parsed
    ));
    if report.corrupted > 0 {
        out.push_str(&format!("\n  corrupted: {}", report.corrupted));
    }
    if report.removed > 0 {
        out.push_str(&format!("\n  removed: {}", report.removed));
    }
    if report.missing_dependencies > 0 {
        out.push_str(&format!(
            "\n  missing dependencies: {}",
            report.missing_dependencies
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary() {
        let report = PassReport {
            packages: 2,
            records: 3,
            descriptors: 3,
            parsed: 3,
            corrupted: 1,
            ..Default::default()
        };
        let text = summary(&report);
        assert!(text.starts_with("Indexed 2 package(s) (3 record(s)) from 3 archive(s)"));
        assert!(text.contains("parsed: 3"));
        assert!(text.contains("corrupted: 1"));
        assert!(!text.contains("removed"));
    }
}
