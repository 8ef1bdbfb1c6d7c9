//! Output file writers.
//!
//! Every file is written to a temporary file in the target directory and
//! then moved into place, so an interrupted run leaves previous outputs
//! intact.

use ahash::AHashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::classify::Classification;
use crate::prefix::PrefixSet;
use crate::Result;

/// Write `contents` to `path` atomically.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

/// Join lines with a trailing newline after each.
pub fn render_lines<I, S>(lines: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = String::new();
    for line in lines {
        out.push_str(line.as_ref());
        out.push('\n');
    }
    out
}

/// Render the three prefix files: IPv4 only, IPv6 only, combined.
pub fn render_prefix_files(stem: &str, set: &PrefixSet) -> Vec<(String, String)> {
    let v4 = render_lines(set.v4().iter().map(|p| p.to_string()));
    let v6 = render_lines(set.v6().iter().map(|p| p.to_string()));
    let combined = render_lines(set.to_lines());
    vec![
        (format!("{}-v4.txt", stem), v4),
        (format!("{}-v6.txt", stem), v6),
        (format!("{}.txt", stem), combined),
    ]
}

/// Render the classification files: tagged rule lines and bare names.
pub fn render_classification(stem: &str, result: &Classification) -> Vec<(String, String)> {
    let rules = render_lines(result.matched().map(|o| o.domain.to_rule_line()));

    let mut seen = AHashSet::new();
    let names = render_lines(
        result
            .matched()
            .map(|o| o.domain.name.as_str())
            .filter(|name| seen.insert(*name)),
    );

    vec![(format!("{}.list", stem), rules), (format!("{}.txt", stem), names)]
}

/// Write rendered files into `dir`, returning their paths.
pub fn write_files(dir: &Path, files: &[(String, String)]) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(files.len());
    for (name, contents) in files {
        let path = dir.join(name);
        write_atomic(&path, contents)?;
        log::info!("Wrote {:?} ({} lines)", path, contents.lines().count());
        written.push(path);
    }
    Ok(written)
}

/// Write `<stem>-v4.txt`, `<stem>-v6.txt` and `<stem>.txt`.
pub fn write_prefix_files(dir: &Path, stem: &str, set: &PrefixSet) -> Result<Vec<PathBuf>> {
    write_files(dir, &render_prefix_files(stem, set))
}

/// Write `<stem>.list` (`<tag>,<domain>`) and `<stem>.txt` (bare names).
pub fn write_classification(dir: &Path, stem: &str, result: &Classification) -> Result<Vec<PathBuf>> {
    write_files(dir, &render_classification(stem, result))
}
