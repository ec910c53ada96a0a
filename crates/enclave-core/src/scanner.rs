//! Module scanner
//!
//! Enumerates the packages or units an archive set contains. Each archive
//! is scanned on its own scoped thread; results are merged into a sorted
//! set so completion order never shows in the output.

use crate::archive::{Archive, ArchiveError, EntryKind};
use crate::symbol;
use std::collections::BTreeSet;
use std::panic;
use tracing::debug;

/// What a scan collects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKind {
    /// Directories that directly contain at least one unit file
    Packages,
    /// Unit files
    Units,
}

/// Collect the packages contained in `archives`
///
/// A directory qualifies if it directly (not recursively) holds a unit file
/// and its symbol name does not start with any of `ignored`.
pub fn scan_packages(
    archives: &[Archive],
    ignored: &[String],
) -> Result<BTreeSet<String>, ArchiveError> {
    scan(archives, ignored, ScanKind::Packages)
}

/// Collect the units contained in `archives`, minus ignored prefixes
pub fn scan_units(archives: &[Archive], ignored: &[String]) -> Result<BTreeSet<String>, ArchiveError> {
    scan(archives, ignored, ScanKind::Units)
}

/// Scan every archive in parallel and merge the results
///
/// Any archive that cannot be opened or walked fails the whole scan.
pub fn scan(
    archives: &[Archive],
    ignored: &[String],
    kind: ScanKind,
) -> Result<BTreeSet<String>, ArchiveError> {
    if archives.len() <= 1 {
        return match archives.first() {
            Some(archive) => scan_archive(archive, ignored, kind),
            None => Ok(BTreeSet::new()),
        };
    }

    let outcomes = crossbeam::thread::scope(|s| {
        let handles: Vec<_> = archives
            .iter()
            .map(|archive| s.spawn(move |_| scan_archive(archive, ignored, kind)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)))
            .collect::<Vec<_>>()
    })
    .unwrap_or_else(|payload| panic::resume_unwind(payload));

    let mut merged = BTreeSet::new();
    for outcome in outcomes {
        merged.extend(outcome?);
    }
    Ok(merged)
}

fn scan_archive(
    archive: &Archive,
    ignored: &[String],
    kind: ScanKind,
) -> Result<BTreeSet<String>, ArchiveError> {
    let open = archive.open()?;
    let mut found = BTreeSet::new();

    for entry in open.entries()? {
        if entry.kind != EntryKind::File || !symbol::is_unit_file(&entry.path) {
            continue;
        }
        let name = match kind {
            ScanKind::Units => symbol::symbol_from_path(&entry.path),
            ScanKind::Packages => match entry.path.rsplit_once('/') {
                Some((dir, _)) => symbol::symbol_from_path(dir),
                // units at the archive root belong to no package
                None => continue,
            },
        };
        if name.is_empty() || symbol::matches_any(&name, ignored) {
            continue;
        }
        found.insert(name);
    }

    debug!(
        archive = %open.label(),
        kind = ?kind,
        found = found.len(),
        "scanned archive"
    );
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn zip_archive(label: &str, entries: &[&str]) -> Archive {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for name in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(b"unit").unwrap();
        }
        Archive::memory(label, writer.finish().unwrap().into_inner())
    }

    #[test]
    fn test_packages_require_direct_unit() {
        let archive = zip_archive(
            "a.zip",
            &["pkg/isolated/Foo.unit", "pkg/isolated/deep/Bar.unit", "pkg/notes.txt"],
        );
        let packages = scan_packages(&[archive], &[]).unwrap();

        // `pkg` only contains units recursively, so it does not qualify
        let expected: BTreeSet<String> = ["pkg.isolated", "pkg.isolated.deep"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(packages, expected);
    }

    #[test]
    fn test_units_and_ignores() {
        let archive = zip_archive("a.zip", &["pkg/Foo.unit", "meta/Gen.unit", "Root.unit"]);
        let units = scan_units(&[archive], &["meta".to_string()]).unwrap();

        assert!(units.contains("pkg.Foo"));
        assert!(units.contains("Root"));
        assert!(!units.contains("meta.Gen"));
    }

    #[test]
    fn test_root_units_have_no_package() {
        let archive = zip_archive("a.zip", &["Root.unit"]);
        assert!(scan_packages(&[archive], &[]).unwrap().is_empty());
    }

    #[test]
    fn test_parallel_scan_merges_and_dedups() {
        let a = zip_archive("a.zip", &["p/A.unit", "shared/S.unit"]);
        let b = zip_archive("b.zip", &["q/B.unit", "shared/S.unit"]);
        let units = scan(&[a, b], &[], ScanKind::Units).unwrap();

        assert_eq!(units.len(), 3);
        assert!(units.contains("shared.S"));
    }

    #[test]
    fn test_unreadable_archive_aborts_scan() {
        let good = zip_archive("good.zip", &["p/A.unit"]);
        let bad = Archive::memory("bad.zip", b"garbage".to_vec());
        let result = scan_packages(&[good, bad], &[]);
        assert!(matches!(result, Err(ArchiveError::Zip { .. })));
    }
}
