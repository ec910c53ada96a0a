//! Fixture archives shared by the integration tests

#![allow(dead_code)]

use enclave_core::Archive;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Write a zip archive to `path`
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut writer = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Write a directory archive rooted at `root`
pub fn write_dir(root: &Path, entries: &[(&str, &[u8])]) {
    for (name, data) in entries {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, data).unwrap();
    }
}

/// In-memory zip archive
pub fn memory_zip(label: &str, entries: &[(&str, &[u8])]) -> Archive {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    Archive::memory(label, writer.finish().unwrap().into_inner())
}

/// Archive holding the units used across the suites
pub fn isolated_zip() -> Archive {
    memory_zip(
        "isolated.zip",
        &[
            ("pkg/isolated/Foo.unit", b"foo"),
            ("pkg/isolated/Counter.unit", b"counter"),
            ("pkg/isolated/Failing.unit", b"failing"),
            ("pkg/isolated/internal/Bar.unit", b"bar"),
        ],
    )
}
