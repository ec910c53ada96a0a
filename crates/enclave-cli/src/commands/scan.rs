//! `enclave scan`: list packages or units in archives.

use anyhow::Context;
use enclave_core::scanner::{self, ScanKind};
use enclave_core::Archive;
use std::path::PathBuf;

pub fn execute(paths: &[PathBuf], units: bool, ignore: &[String], json: bool) -> anyhow::Result<()> {
    let archives: Vec<Archive> = paths.iter().map(Archive::from_path).collect();
    let kind = if units { ScanKind::Units } else { ScanKind::Packages };

    let found = scanner::scan(&archives, ignore, kind).context("scan failed")?;
    tracing::debug!(archives = archives.len(), found = found.len(), "scan complete");

    if json {
        println!("{}", serde_json::to_string_pretty(&found)?);
    } else {
        for name in &found {
            println!("{}", name);
        }
    }
    Ok(())
}
