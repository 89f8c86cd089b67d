//! Protocol-independent remote directory listing
//!
//! Every client exposes its directory reads through [`DirLister`]; glob
//! matching and path handling happen once, here.

use super::{ClientError, ClientResult};
use crate::catalog::Rule;
use glob::Pattern;

/// One entry of a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Base name, without any directory part
    pub name: String,
    pub is_dir: bool,
}

impl RemoteEntry {
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
        }
    }
}

/// Anything that can read the entries of a remote directory
pub trait DirLister {
    /// Entries directly under `path` (no recursion)
    fn read_dir(&mut self, path: &str) -> ClientResult<Vec<RemoteEntry>>;
}

/// Join remote path parts with `/`, skipping empty parts
pub fn join_remote(parts: &[&str]) -> String {
    let mut out = String::new();
    for part in parts.iter().filter(|p| !p.is_empty()) {
        if out.is_empty() {
            out.push_str(part.trim_end_matches('/'));
            if out.is_empty() {
                out.push('/');
            }
        } else {
            if !out.ends_with('/') {
                out.push('/');
            }
            out.push_str(part.trim_matches('/'));
        }
    }
    out
}

/// Split a listing pattern into its directory part and its file glob
fn split_pattern(pattern: &str) -> (&str, &str) {
    match pattern.rsplit_once('/') {
        Some((dir, file)) => (dir, file),
        None => ("", pattern),
    }
}

/// List the files under `rule`'s remote directory matching `pattern`
///
/// `pattern` may carry a directory part (`sub/*.csv`); only its last segment
/// is a glob. Directories and hidden entries are skipped. Returned paths are
/// relative to the rule directory.
pub fn list_matching<L>(lister: &mut L, rule: &Rule, pattern: &str) -> ClientResult<Vec<String>>
where
    L: DirLister + ?Sized,
{
    let (dir, file_glob) = split_pattern(pattern);
    let glob = Pattern::new(file_glob).map_err(|e| ClientError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let listed_dir = join_remote(&[&rule.remote_dir, dir]);
    let listed_dir = if listed_dir.is_empty() {
        ".".to_string()
    } else {
        listed_dir
    };

    let entries = lister.read_dir(&listed_dir)?;
    tracing::debug!("Read {} entries from {}", entries.len(), listed_dir);

    let files: Vec<String> = entries
        .into_iter()
        .filter(|e| !e.is_dir && !e.name.starts_with('.'))
        .filter(|e| glob.matches(&e.name))
        .map(|e| join_remote(&[dir, &e.name]))
        .collect();

    Ok(files)
}
