//! Post-run artifact discovery.
//!
//! Workers report results only through side-effect files, so after a
//! successful exit the gateway scans the artifact directory (immediate
//! entries only) and picks, per declared artifact, the newest matching file.
//! Ties on modification time go to the lexicographically smallest name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Declared output of a tool: `<prefix>*.<extension>` in the artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Logical name returned to the caller (e.g. "xlsx", "primary-report")
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Extension with or without the leading dot; matched case-insensitively
    pub extension: String,
}

impl ArtifactSpec {
    pub fn matches(&self, file_name: &str) -> bool {
        let extension = self.extension.trim_start_matches('.');
        let Some(stem) = strip_suffix_ignore_case(file_name, extension) else {
            return false;
        };
        let Some(stem) = stem.strip_suffix('.') else {
            return false;
        };
        match &self.prefix {
            Some(prefix) => stem.starts_with(prefix.as_str()),
            None => !stem.is_empty(),
        }
    }
}

fn strip_suffix_ignore_case<'a>(text: &'a str, suffix: &str) -> Option<&'a str> {
    let split = text.len().checked_sub(suffix.len())?;
    if !text.is_char_boundary(split) {
        return None;
    }
    let (head, tail) = text.split_at(split);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    NotFound,
}

/// Per-artifact resolution results, keyed by logical artifact name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactSet {
    entries: BTreeMap<String, Resolution>,
}

impl ArtifactSet {
    pub fn get(&self, name: &str) -> Option<&Resolution> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resolved artifacts as `name -> path` strings
    pub fn found(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(name, resolution)| match resolution {
                Resolution::Found(path) => Some((name.clone(), path.display().to_string())),
                Resolution::NotFound => None,
            })
            .collect()
    }

    pub fn missing(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, resolution)| **resolution == Resolution::NotFound)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn any_found(&self) -> bool {
        self.entries
            .values()
            .any(|resolution| matches!(resolution, Resolution::Found(_)))
    }
}

struct Candidate {
    name: String,
    modified: SystemTime,
}

/// Resolve every declared artifact against `directory`.
///
/// A missing or unreadable directory yields `NotFound` for every artifact
/// rather than an error, so callers decide what an empty set means.
pub fn resolve(directory: &Path, specs: &[ArtifactSpec]) -> ArtifactSet {
    let candidates = scan(directory).unwrap_or_default();
    let base = std::path::absolute(directory).unwrap_or_else(|_| directory.to_path_buf());

    let entries = specs
        .iter()
        .map(|spec| {
            let resolution = match select(&candidates, |name| spec.matches(name)) {
                Some(name) => Resolution::Found(base.join(name)),
                None => Resolution::NotFound,
            };
            (spec.name.clone(), resolution)
        })
        .collect();

    ArtifactSet { entries }
}

/// Newest regular file in `directory` whose name satisfies `predicate`.
pub fn newest_match(
    directory: &Path,
    predicate: impl Fn(&str) -> bool,
) -> std::io::Result<Option<PathBuf>> {
    let candidates = scan(directory)?;
    Ok(select(&candidates, predicate).map(|name| directory.join(name)))
}

fn scan(directory: &Path) -> std::io::Result<Vec<Candidate>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let Ok(entry) = entry else { continue };
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        out.push(Candidate {
            name,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        });
    }
    Ok(out)
}

fn select(candidates: &[Candidate], predicate: impl Fn(&str) -> bool) -> Option<&str> {
    candidates
        .iter()
        .filter(|c| predicate(&c.name))
        .min_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)))
        .map(|c| c.name.as_str())
}
