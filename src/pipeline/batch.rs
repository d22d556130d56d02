use anyhow::{Context, Result, anyhow};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::report::UnitReport;
use crate::backend::BackendStats;
use crate::error::ErrorKind;

/// One input document.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub name: String,
    pub path: Option<PathBuf>,
    pub bytes: Vec<u8>,
    /// Set when the input could not be read; the item fails on its own.
    pub unreadable: Option<ErrorKind>,
}

impl BatchItem {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read input: {}", path.display()))?;
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            name,
            path: Some(path.to_path_buf()),
            bytes,
            unreadable: None,
        })
    }

    /// Like `from_path`, but a read failure is kept on the item instead of
    /// being returned.
    pub fn read(path: &Path) -> Self {
        Self::from_path(path).unwrap_or_else(|err| Self {
            name: path.display().to_string(),
            path: Some(path.to_path_buf()),
            bytes: Vec::new(),
            unreadable: Some(ErrorKind::UnsupportedFormat(format!("{err:#}"))),
        })
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            path: None,
            bytes,
            unreadable: None,
        }
    }

    fn stem(&self) -> &str {
        Path::new(&self.name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .filter(|stem| !stem.is_empty())
            .unwrap_or("document")
    }

    /// `<stem>_translated.<ext>`, or `<stem>_<ordinal>_translated.<ext>`
    /// when another item in the batch has the same stem.
    pub fn output_name(&self, extension: &str, ordinal: Option<usize>) -> String {
        match ordinal {
            Some(ordinal) => format!("{}_{ordinal}_translated.{extension}", self.stem()),
            None => format!("{}_translated.{extension}", self.stem()),
        }
    }
}

/// Per item, the 1-based ordinal to put in its output name when its stem
/// is shared with another item, `None` otherwise.
pub fn output_ordinals(items: &[BatchItem]) -> Vec<Option<usize>> {
    let mut counts = HashMap::new();
    for item in items {
        *counts.entry(item.stem().to_lowercase()).or_insert(0usize) += 1;
    }
    items
        .iter()
        .enumerate()
        .map(|(idx, item)| (counts[&item.stem().to_lowercase()] > 1).then_some(idx + 1))
        .collect()
}

#[derive(Debug, Clone)]
pub enum OutputDestination {
    Directory(PathBuf),
    /// Keeps output bytes on the item outcome.
    Memory,
}

/// Expands directories (recursively) into the files whose names match
/// `patterns`. Explicit file arguments are always kept. Output is sorted
/// per directory and deduplicated.
pub fn collect_inputs(paths: &[PathBuf], patterns: &[String]) -> Result<Vec<PathBuf>> {
    let matcher = build_matcher(patterns)?;
    let mut out = Vec::new();
    for path in paths {
        if path.is_dir() {
            walk(path, &matcher, &mut out)?;
        } else if path.is_file() {
            out.push(path.clone());
        } else {
            return Err(anyhow!("input not found: {}", path.display()));
        }
    }
    let mut seen = HashSet::new();
    out.retain(|path| seen.insert(path.clone()));
    Ok(out)
}

fn build_matcher(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(&pattern.to_lowercase())
            .with_context(|| format!("invalid file pattern '{}'", pattern))?;
        builder.add(glob);
    }
    Ok(Some(builder.build().with_context(|| "invalid file patterns")?))
}

fn walk(dir: &Path, matcher: &Option<GlobSet>, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .collect::<Vec<_>>();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            walk(&path, matcher, out)?;
            continue;
        }
        let name = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if matcher.as_ref().is_none_or(|set| set.is_match(&name)) {
            out.push(path);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub name: String,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    #[serde(skip)]
    pub bytes: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub units: Vec<UnitReport>,
}

impl ItemOutcome {
    pub fn failed(name: &str, error: ErrorKind) -> Self {
        Self {
            name: name.to_string(),
            status: ItemStatus::Failed,
            format: None,
            output: None,
            bytes: None,
            error: Some(error),
            units: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Set when a fatal error stopped the batch early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<ErrorKind>,
    pub stats: BackendStats,
    pub per_item: Vec<ItemOutcome>,
}

impl BatchSummary {
    pub fn from_items(
        per_item: Vec<ItemOutcome>,
        aborted: Option<ErrorKind>,
        stats: BackendStats,
    ) -> Self {
        let count = |status| per_item.iter().filter(|item| item.status == status).count();
        Self {
            succeeded: count(ItemStatus::Succeeded),
            failed: count(ItemStatus::Failed),
            cancelled: count(ItemStatus::Cancelled),
            aborted,
            stats,
            per_item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_keeps_stem() {
        let item = BatchItem::from_bytes("scan.page1.png", Vec::new());
        assert_eq!(item.output_name("png", None), "scan.page1_translated.png");
        let item = BatchItem::from_bytes("", Vec::new());
        assert_eq!(item.output_name("pdf", None), "document_translated.pdf");
    }

    #[test]
    fn shared_stems_get_ordinals() {
        let items = vec![
            BatchItem::from_bytes("x.png", Vec::new()),
            BatchItem::from_bytes("menu.png", Vec::new()),
            BatchItem::from_bytes("X.jpg", Vec::new()),
        ];
        assert_eq!(output_ordinals(&items), vec![Some(1), None, Some(3)]);
        assert_eq!(items[0].output_name("png", Some(1)), "x_1_translated.png");
    }

    #[test]
    fn unreadable_path_becomes_a_failed_item() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone.png");
        let item = BatchItem::read(&missing);
        assert!(item.bytes.is_empty());
        match item.unreadable {
            Some(ErrorKind::UnsupportedFormat(message)) => assert!(message.contains("gone.png")),
            other => panic!("unexpected: {other:?}"),
        }

        fs::write(dir.path().join("ok.png"), b"x").unwrap();
        let item = BatchItem::read(&dir.path().join("ok.png"));
        assert_eq!(item.name, "ok.png");
        assert!(item.unreadable.is_none());
    }

    #[test]
    fn collects_matching_files_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        fs::create_dir(&nested).unwrap();
        fs::write(dir.path().join("b.PNG"), b"x").unwrap();
        fs::write(dir.path().join("a.pdf"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(nested.join("c.docx"), b"x").unwrap();

        let patterns = vec!["*.png".to_string(), "*.pdf".to_string(), "*.docx".to_string()];
        let found = collect_inputs(&[dir.path().to_path_buf()], &patterns).unwrap();
        let names = found
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.pdf", "b.PNG", "c.docx"]);

        let explicit = collect_inputs(&[dir.path().join("notes.txt")], &patterns).unwrap();
        assert_eq!(explicit.len(), 1);
        assert!(collect_inputs(&[dir.path().join("missing.png")], &patterns).is_err());
    }

    #[test]
    fn summary_counts_by_status() {
        let mut ok = ItemOutcome::failed("a.png", ErrorKind::Fatal("x".into()));
        ok.status = ItemStatus::Succeeded;
        ok.error = None;
        let summary = BatchSummary::from_items(
            vec![
                ok,
                ItemOutcome::failed("b.png", ErrorKind::UnsupportedFormat("corrupt".into())),
            ],
            None,
            BackendStats::default(),
        );
        assert_eq!((summary.succeeded, summary.failed, summary.cancelled), (1, 1, 0));
    }
}
