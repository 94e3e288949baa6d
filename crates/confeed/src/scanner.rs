//! Directory snapshots, change detection and document parsing.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::SystemTime;

use tracing::warn;
use walkdir::WalkDir;

use lookout_bus::ConfigDocument;

/// Relative path → modification time, for every config file under the
/// watched root.
pub type Snapshot = BTreeMap<String, SystemTime>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// Take a snapshot of the tree. Only `.toml` files count; dotfiles and
/// editor temp files are skipped.
pub fn scan(root: &Path) -> Snapshot {
    let mut snapshot = Snapshot::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "error walking config tree");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || !name.ends_with(".toml") {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        snapshot.insert(normalize_path(relative), mtime);
    }
    snapshot
}

/// Relative path with `/` separators, whatever the platform uses.
fn normalize_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Changes between two snapshots.
pub fn diff(old: &Snapshot, new: &Snapshot) -> Vec<(String, ChangeKind)> {
    let mut changes = Vec::new();
    for (path, mtime) in new {
        match old.get(path) {
            None => changes.push((path.clone(), ChangeKind::Created)),
            Some(old_mtime) if old_mtime != mtime => {
                changes.push((path.clone(), ChangeKind::Modified));
            }
            Some(_) => {}
        }
    }
    for path in old.keys() {
        if !new.contains_key(path) {
            changes.push((path.clone(), ChangeKind::Removed));
        }
    }
    changes
}

/// Routing key for a config document: the relative path, extension
/// stripped, segments joined with dots so topic wildcards work over
/// subtrees (`chains/chainlink/bsc/alerts_config.toml` →
/// `chains.chainlink.bsc.alerts_config`).
pub fn routing_key_for(relative_path: &str) -> String {
    let without_extension = relative_path
        .strip_suffix(".toml")
        .unwrap_or(relative_path);
    without_extension.replace('/', ".")
}

/// Path carried inside the document: the relative path without extension,
/// `/`-separated.
pub fn document_path(relative_path: &str) -> String {
    relative_path
        .strip_suffix(".toml")
        .unwrap_or(relative_path)
        .to_string()
}

/// Parse one config file into its wire document. Values are stringified;
/// arrays become comma-joined lists; nested tables inside a section are
/// not supported and are skipped.
pub fn parse_document(contents: &str, relative_path: &str) -> Result<ConfigDocument, toml::de::Error> {
    let table: toml::Table = contents.parse()?;

    let mut sections = BTreeMap::new();
    for (section_name, value) in table {
        let toml::Value::Table(section) = value else {
            warn!(section = %section_name, path = relative_path, "top-level value outside a section, skipping");
            continue;
        };
        let mut options = BTreeMap::new();
        for (option, value) in section {
            match stringify(&value) {
                Some(value) => {
                    options.insert(option, value);
                }
                None => {
                    warn!(section = %section_name, option = %option, "unsupported option value, skipping");
                }
            }
        }
        sections.insert(section_name, options);
    }

    Ok(ConfigDocument {
        path: document_path(relative_path),
        sections,
    })
}

fn stringify(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(items) => {
            let parts: Option<Vec<String>> = items.iter().map(stringify).collect();
            parts.map(|p| p.join(","))
        }
        toml::Value::Table(_) => None,
    }
}
