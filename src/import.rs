//! Import and export of exclusion lists.
//!
//! Supported inputs: plain newline-separated hostname lists (`.txt`, one per
//! polarity) and zip archives carrying up to one list of each polarity,
//! recognized by file names ending in `regular.txt` / `selective.txt`.
//! Parsing has no side effects; merging into the trees is done by the
//! engine so a format error aborts the whole import cleanly.

use std::io::{Cursor, Read, Write};

use crate::error::{ExclusionsError, ImportErrorKind, Result};
use crate::mode::Mode;
use crate::tree::ExclusionsTree;

/// File-name suffix marking a regular-mode list.
pub const REGULAR_LIST_SUFFIX: &str = "regular.txt";
/// File-name suffix marking a selective-mode list.
pub const SELECTIVE_LIST_SUFFIX: &str = "selective.txt";

/// Entry names used when exporting an archive; the importer recognizes them.
pub const EXPORT_REGULAR_NAME: &str = "exclusions-regular.txt";
pub const EXPORT_SELECTIVE_NAME: &str = "exclusions-selective.txt";

/// One parsed hostname list, tagged with the polarity it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedList {
    pub mode: Mode,
    pub hostnames: Vec<String>,
}

/// Parse an import payload, dispatching on the file name.
///
/// `.txt` is a single list (selective when the name ends in
/// `selective.txt`, regular otherwise); `.zip` may carry one list of each
/// polarity. Anything else is an `ImportError`.
pub fn parse_import(file_name: &str, data: &[u8]) -> Result<Vec<ParsedList>> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".txt") {
        let mode = if lower.ends_with(SELECTIVE_LIST_SUFFIX) {
            Mode::Selective
        } else {
            Mode::Regular
        };
        return Ok(vec![parse_list(mode, data, file_name)?]);
    }
    if lower.ends_with(".zip") {
        return parse_archive(data);
    }
    Err(ExclusionsError::import(
        ImportErrorKind::UnknownFormat,
        format!("unsupported file type: {}", file_name),
    ))
}

fn parse_list(mode: Mode, data: &[u8], name: &str) -> Result<ParsedList> {
    let text = std::str::from_utf8(data).map_err(|_| {
        ExclusionsError::import(
            ImportErrorKind::InvalidText,
            format!("{} is not valid UTF-8", name),
        )
    })?;
    let hostnames = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect();
    Ok(ParsedList { mode, hostnames })
}

fn parse_archive(data: &[u8]) -> Result<Vec<ParsedList>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data)).map_err(|e| {
        ExclusionsError::import(ImportErrorKind::BadArchive, format!("open failed: {}", e))
    })?;

    let mut lists: Vec<ParsedList> = Vec::new();
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(|e| {
            ExclusionsError::import(ImportErrorKind::BadArchive, format!("entry failed: {}", e))
        })?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if is_hidden_entry(&name) {
            continue;
        }
        let lower = name.to_lowercase();
        let mode = if lower.ends_with(SELECTIVE_LIST_SUFFIX) {
            Mode::Selective
        } else if lower.ends_with(REGULAR_LIST_SUFFIX) {
            Mode::Regular
        } else {
            continue;
        };
        // At most one list per polarity; later duplicates are ignored.
        if lists.iter().any(|l| l.mode == mode) {
            continue;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(|e| {
            ExclusionsError::import(ImportErrorKind::BadArchive, format!("read failed: {}", e))
        })?;
        lists.push(parse_list(mode, &buf, &name)?);
    }
    Ok(lists)
}

/// Hidden or metadata archive entries (dotfiles, macOS resource forks).
fn is_hidden_entry(name: &str) -> bool {
    name.split('/')
        .any(|segment| segment.starts_with('.') || segment == "__MACOSX")
}

/// Render a tree as a newline-separated hostname list.
pub fn render_list(tree: &ExclusionsTree) -> String {
    let mut out = String::new();
    for group in tree.groups_in_order() {
        for entry in &group.entries {
            out.push_str(&entry.hostname);
            out.push('\n');
        }
    }
    out
}

/// Build an export archive holding both polarity lists.
pub fn build_export_archive(regular: &str, selective: &str) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();

    for (name, body) in [
        (EXPORT_REGULAR_NAME, regular),
        (EXPORT_SELECTIVE_NAME, selective),
    ] {
        writer.start_file(name, options).map_err(|e| {
            ExclusionsError::import(ImportErrorKind::BadArchive, format!("write failed: {}", e))
        })?;
        writer.write_all(body.as_bytes())?;
    }

    let cursor = writer.finish().map_err(|e| {
        ExclusionsError::import(ImportErrorKind::BadArchive, format!("finish failed: {}", e))
    })?;
    Ok(cursor.into_inner())
}
