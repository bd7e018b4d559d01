//! Transform registry: content type → write-side byte transform.
//!
//! # Selection rules
//! A segment's declared content type is looked up verbatim (exact string
//! match, no parameter stripping, no case folding).  A hit wraps the
//! destination sink with the registered transform for the duration of one
//! copy; a miss leaves the sink untouched.  There is no fallback chain and no
//! stacking: at most one transform runs per copy, exactly once over the whole
//! segment.
//!
//! Adding a transform means registering a constructor here.  The copy routine
//! in `segment` never changes.

pub mod macbinary;

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, OnceLock};

pub use macbinary::MacBinaryDecoder;

// ── Content types ─────────────────────────────────────────────────────────────

/// Legacy MacBinary envelope, as sent by classic Mac OS browsers.
pub const MACBINARY_CONTENT_TYPE: &str = "application/x-macbinary";

// ── Factory ───────────────────────────────────────────────────────────────────

/// Wraps a destination sink with a transform.  The returned writer borrows
/// the sink for the length of one copy.
pub type TransformFactory = for<'a> fn(&'a mut dyn Write) -> Box<dyn Write + 'a>;

fn macbinary<'a>(sink: &'a mut dyn Write) -> Box<dyn Write + 'a> {
    Box::new(MacBinaryDecoder::new(sink))
}

// ── Registry ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct TransformRegistry {
    factories: HashMap<String, TransformFactory>,
}

impl TransformRegistry {
    /// A registry with no transforms: every content type passes through.
    pub fn empty() -> Self {
        Self { factories: HashMap::new() }
    }

    /// Shared instance holding the built-in transforms.
    pub fn builtin() -> Arc<Self> {
        static BUILTIN: OnceLock<Arc<TransformRegistry>> = OnceLock::new();
        BUILTIN.get_or_init(|| Arc::new(Self::default())).clone()
    }

    /// Register `factory` for `content_type`, returning any factory it replaces.
    pub fn register(
        &mut self,
        content_type: impl Into<String>,
        factory:      TransformFactory,
    ) -> Option<TransformFactory> {
        self.factories.insert(content_type.into(), factory)
    }

    pub fn unregister(&mut self, content_type: &str) -> Option<TransformFactory> {
        self.factories.remove(content_type)
    }

    pub fn get(&self, content_type: &str) -> Option<TransformFactory> {
        self.factories.get(content_type).copied()
    }

    pub fn contains(&self, content_type: &str) -> bool {
        self.factories.contains_key(content_type)
    }

    /// Registered content types, sorted for stable output.
    pub fn content_types(&self) -> Vec<&str> {
        let mut v: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        v.sort_unstable();
        v
    }
}

impl Default for TransformRegistry {
    fn default() -> Self {
        let mut reg = Self::empty();
        reg.register(MACBINARY_CONTENT_TYPE, macbinary);
        reg
    }
}

impl std::fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("content_types", &self.content_types())
            .finish()
    }
}
