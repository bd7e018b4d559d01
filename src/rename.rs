//! Collision-resolution policies for destination files.
//!
//! A policy sees the candidate destination once per write and returns the
//! path the bytes should actually go to.  The segment then adopts the
//! returned path's base name as its file name.
//!
//! Policies are shared (`Arc<dyn RenamePolicy>`) across every segment of an
//! upload and must not depend on call order.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

pub trait RenamePolicy: Send + Sync {
    /// Map a candidate destination to the path to write.  Returning the
    /// candidate unchanged means "no collision".
    fn rename(&self, candidate: &Path) -> PathBuf;
}

impl<F> RenamePolicy for F
where
    F: Fn(&Path) -> PathBuf + Send + Sync,
{
    fn rename(&self, candidate: &Path) -> PathBuf {
        self(candidate)
    }
}

/// Default cap on suffix attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 9999;

/// Inserts `-N` before the extension until the name is free:
/// `a.txt` → `a-1.txt` → `a-2.txt` …
///
/// Existence is checked, not reserved: two writers racing for the same name
/// can still collide.  Once `max_attempts` suffixes are taken, the last one
/// tried is returned and the write overwrites it.
#[derive(Debug, Clone)]
pub struct SuffixRenamePolicy {
    pub separator:    String,
    pub max_attempts: u32,
}

impl Default for SuffixRenamePolicy {
    fn default() -> Self {
        Self { separator: "-".to_owned(), max_attempts: DEFAULT_MAX_ATTEMPTS }
    }
}

impl SuffixRenamePolicy {
    pub fn new() -> Self { Self::default() }

    /// `dir/stem{sep}{n}.ext`, keeping the extension (if any) intact.
    /// Dotfiles like `.profile` count as all stem.
    pub fn suffixed(&self, candidate: &Path, n: u32) -> PathBuf {
        let mut renamed = OsString::new();
        if let Some(stem) = candidate.file_stem() {
            renamed.push(stem);
        }
        renamed.push(&self.separator);
        renamed.push(n.to_string());
        if let Some(ext) = candidate.extension() {
            renamed.push(".");
            renamed.push(ext);
        }
        candidate.with_file_name(renamed)
    }
}

impl RenamePolicy for SuffixRenamePolicy {
    fn rename(&self, candidate: &Path) -> PathBuf {
        if !candidate.exists() {
            return candidate.to_path_buf();
        }
        let mut last = candidate.to_path_buf();
        for n in 1..=self.max_attempts.max(1) {
            last = self.suffixed(candidate, n);
            if !last.exists() {
                tracing::debug!(
                    from = %candidate.display(),
                    to   = %last.display(),
                    "name collision resolved"
                );
                return last;
            }
        }
        tracing::debug!(path = %last.display(), "rename attempts exhausted");
        last
    }
}
