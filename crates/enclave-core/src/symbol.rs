//! Symbol names and their mapping to archive paths
//!
//! A symbol name is a dot-delimited fully-qualified name such as
//! `pkg.isolated.Foo`. Units live in archives at `pkg/isolated/Foo.unit`;
//! packages are the directories that hold them.

/// File suffix of a loadable unit
pub const UNIT_SUFFIX: &str = ".unit";

/// Namespace delimiter of symbol names
pub const DELIMITER: char = '.';

/// Check whether an archive path names a loadable unit file
pub fn is_unit_file(path: &str) -> bool {
    path.len() > UNIT_SUFFIX.len() && path.ends_with(UNIT_SUFFIX)
}

/// Translate an archive path into a symbol name
///
/// Separators become `.`, leading delimiters are stripped, and the unit
/// suffix is removed if present.
///
/// ```text
/// pkg/isolated/Foo.unit -> pkg.isolated.Foo
/// /pkg/isolated/        -> pkg.isolated
/// ```
pub fn symbol_from_path(path: &str) -> String {
    let path = path.strip_suffix(UNIT_SUFFIX).unwrap_or(path);
    path.replace(['/', '\\'], ".")
        .trim_start_matches(DELIMITER)
        .trim_end_matches(DELIMITER)
        .to_string()
}

/// Archive path of the unit file for a symbol name
pub fn unit_path(symbol: &str) -> String {
    format!("{}{}", symbol.replace(DELIMITER, "/"), UNIT_SUFFIX)
}

/// Check whether `symbol` starts with any of `prefixes`
pub fn matches_any<'a, I>(symbol: &str, prefixes: I) -> bool
where
    I: IntoIterator<Item = &'a String>,
{
    prefixes
        .into_iter()
        .any(|prefix| symbol.starts_with(prefix.as_str()))
}
