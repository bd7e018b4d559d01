//! File-bearing upload segment — single-pass materialization.
//!
//! # Lifecycle
//! The request parser builds one [`FileSegment`] per file part, handing it a
//! [`SegmentReader`] positioned at the start of the part body.  The caller
//! then materializes it exactly once, with [`FileSegment::write_to_path`] or
//! [`FileSegment::write_to_sink`], and drops it.  The shared upload stream
//! moves past the part as it is read, so a segment kept around for later has
//! nothing left to give.
//!
//! # States
//! `Unconsumed → Consumed`, entered by the first write on a segment that
//! carries a file, whether that write succeeds or fails.  Writes on a
//! consumed segment return a zero-byte outcome; they are not errors.
//!
//! # Destination resolution
//! A directory target receives `<dir>/<file_name>`, with any root, drive
//! prefix, or `..` in the declared name dropped; any other target is used
//! verbatim and the declared name is ignored.  An installed rename policy
//! then gets one chance to move the destination, and the segment adopts the
//! resulting base name.  The parent directory is created (recursively) before
//! the file is opened.
//!
//! # Failure
//! Errors end the call immediately.  Bytes already written stay on disk; the
//! destination file handle is released on every path.

use serde::Serialize;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::reader::{Chunk, SegmentReader};
use crate::rename::RenamePolicy;
use crate::transform::TransformRegistry;

/// Default copy chunk: 8 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;

// ── Error type ───────────────────────────────────────────────────────────────

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("Directory {} does not exist and cannot be created: {source}", .path.display())]
    CreateDir { path: PathBuf, #[source] source: io::Error },
    #[error("Cannot open destination {}: {source}", .path.display())]
    OpenSink { path: PathBuf, #[source] source: io::Error },
    /// Read or write failure mid-copy.  Partial output is left in place.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── SegmentOptions ───────────────────────────────────────────────────────────

/// Tuning for [`FileSegment::with_options`].
#[derive(Debug, Clone)]
pub struct SegmentOptions {
    /// Copy chunk size.  Affects throughput only, never output.
    pub chunk_size: usize,
    pub transforms: Arc<TransformRegistry>,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            transforms: TransformRegistry::builtin(),
        }
    }
}

// ── WriteOutcome ─────────────────────────────────────────────────────────────

/// What one write call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteOutcome {
    /// Final file name (after any rename), `None` if the part had no file.
    pub file_name: Option<String>,
    /// Destination file.  Only set by path writes that touched disk.
    pub path:      Option<PathBuf>,
    /// Parent directory of `path`.
    pub dir:       Option<PathBuf>,
    /// Bytes read from the segment, before any transform.
    pub bytes:     u64,
}

// ── FileSegment ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SegmentState {
    Unconsumed,
    Consumed,
}

pub struct FileSegment<R> {
    name:         String,
    file_name:    Option<String>,
    file_path:    Option<String>,
    content_type: String,
    reader:       SegmentReader<R>,
    dir:          Option<PathBuf>,
    renamer:      Option<Arc<dyn RenamePolicy>>,
    state:        SegmentState,
    chunk_size:   usize,
    transforms:   Arc<TransformRegistry>,
}

impl<R: Read> FileSegment<R> {
    pub fn new(
        name:         impl Into<String>,
        reader:       SegmentReader<R>,
        content_type: impl Into<String>,
        file_name:    Option<String>,
        file_path:    Option<String>,
    ) -> Self {
        Self::with_options(name, reader, content_type, file_name, file_path, SegmentOptions::default())
    }

    pub fn with_options(
        name:         impl Into<String>,
        reader:       SegmentReader<R>,
        content_type: impl Into<String>,
        file_name:    Option<String>,
        file_path:    Option<String>,
        opts:         SegmentOptions,
    ) -> Self {
        Self {
            name: name.into(),
            file_name,
            file_path,
            content_type: content_type.into(),
            reader,
            dir:        None,
            renamer:    None,
            state:      SegmentState::Unconsumed,
            chunk_size: opts.chunk_size.max(1),
            transforms: opts.transforms,
        }
    }

    /// Install the collision policy consulted by [`Self::write_to_path`].
    pub fn set_renamer(&mut self, renamer: Arc<dyn RenamePolicy>) {
        self.renamer = Some(renamer);
    }

    // ── Materialization ──────────────────────────────────────────────────────

    /// Write the segment to `target`, a directory or a file path.
    ///
    /// Returns a zero-byte outcome, without touching the filesystem, when the
    /// part carries no file or the segment was already consumed.
    pub fn write_to_path<P: AsRef<Path>>(&mut self, target: P) -> Result<WriteOutcome, SegmentError> {
        let Some(declared) = self.file_name.clone() else {
            return Ok(WriteOutcome::default());
        };
        if self.state == SegmentState::Consumed {
            return Ok(self.empty_outcome());
        }
        self.state = SegmentState::Consumed;

        let target = target.as_ref();
        let candidate = if target.is_dir() {
            target.join(contained_name(&declared))
        } else {
            target.to_path_buf()
        };

        let dest = match &self.renamer {
            Some(policy) => {
                let dest = policy.rename(&candidate);
                if let Some(base) = dest.file_name() {
                    self.file_name = Some(base.to_string_lossy().into_owned());
                }
                if dest != candidate {
                    tracing::debug!(
                        field = %self.name,
                        from  = %candidate.display(),
                        to    = %dest.display(),
                        "rename policy moved destination"
                    );
                }
                dest
            }
            None => candidate,
        };

        let parent = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            tracing::debug!(dir = %parent.display(), "creating destination directory");
            fs::create_dir_all(&parent)
                .map_err(|source| SegmentError::CreateDir { path: parent.clone(), source })?;
        }
        self.dir = Some(parent.clone());

        let file = File::create(&dest)
            .map_err(|source| SegmentError::OpenSink { path: dest.clone(), source })?;
        let mut sink = BufWriter::new(file);
        let bytes = self.copy_into(&mut sink)?;
        sink.flush()?;
        drop(sink);

        tracing::debug!(field = %self.name, path = %dest.display(), bytes, "segment written");
        Ok(WriteOutcome {
            file_name: self.file_name.clone(),
            path:      Some(dest),
            dir:       Some(parent),
            bytes,
        })
    }

    /// Write the segment into a caller-owned sink.  The sink is flushed but
    /// never closed.
    pub fn write_to_sink<W: Write>(&mut self, mut sink: W) -> Result<WriteOutcome, SegmentError> {
        if self.file_name.is_none() {
            return Ok(WriteOutcome::default());
        }
        if self.state == SegmentState::Consumed {
            return Ok(self.empty_outcome());
        }
        self.state = SegmentState::Consumed;

        let bytes = self.copy_into(&mut sink)?;
        tracing::debug!(field = %self.name, bytes, "segment written to sink");
        Ok(WriteOutcome { file_name: self.file_name.clone(), bytes, ..Default::default() })
    }

    /// Chunked copy from the reader into `sink`, through the transform
    /// registered for this segment's content type, if any.  Counts bytes
    /// read, not bytes emitted by the transform.
    fn copy_into(&mut self, sink: &mut dyn Write) -> io::Result<u64> {
        let mut buf = vec![0u8; self.chunk_size];
        match self.transforms.get(&self.content_type) {
            Some(wrap) => {
                tracing::trace!(content_type = %self.content_type, "applying transform");
                let mut out = wrap(sink);
                let n = pump(&mut self.reader, &mut buf, &mut *out)?;
                out.flush()?;
                Ok(n)
            }
            None => {
                let n = pump(&mut self.reader, &mut buf, sink)?;
                sink.flush()?;
                Ok(n)
            }
        }
    }

    fn empty_outcome(&self) -> WriteOutcome {
        WriteOutcome { file_name: self.file_name.clone(), ..Default::default() }
    }
}

/// Declared name reduced to its plain components, so joining it onto a
/// directory can never leave that directory (no root, prefix, or `..`).
fn contained_name(declared: &str) -> PathBuf {
    Path::new(declared)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}

fn pump<R: Read>(reader: &mut SegmentReader<R>, buf: &mut [u8], out: &mut dyn Write) -> io::Result<u64> {
    let mut total = 0u64;
    while let Chunk::Data(n) = reader.read_chunk(buf)? {
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    Ok(total)
}

// ── Accessors ────────────────────────────────────────────────────────────────

impl<R> FileSegment<R> {
    /// Form field name.  Not the file name.
    pub fn name(&self) -> &str { &self.name }

    /// Name the file had on the sender's system, or `None` if no file was
    /// chosen.  Reflects the rename policy once a path write has run.
    pub fn file_name(&self) -> Option<&str> { self.file_name.as_deref() }

    /// Full path as sent by the client, falling back to [`Self::file_name`]
    /// when the client sent no path.
    pub fn file_path(&self) -> Option<&str> {
        self.file_path.as_deref().or(self.file_name.as_deref())
    }

    pub fn content_type(&self) -> &str { &self.content_type }

    /// Directory of the last path write.
    pub fn dir(&self) -> Option<&Path> { self.dir.as_deref() }

    pub fn is_file(&self) -> bool { true }

    pub fn is_consumed(&self) -> bool { self.state == SegmentState::Consumed }

    /// Raw access to the part body for callers that stream it themselves.
    /// Anything read here is gone for the write methods.
    pub fn reader_mut(&mut self) -> &mut SegmentReader<R> { &mut self.reader }
}

impl<R> std::fmt::Debug for FileSegment<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileSegment")
            .field("name", &self.name)
            .field("file_name", &self.file_name)
            .field("file_path", &self.file_path)
            .field("content_type", &self.content_type)
            .field("dir", &self.dir)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::MACBINARY_CONTENT_TYPE;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn segment(data: &[u8], content_type: &str, file_name: Option<&str>) -> FileSegment<Cursor<Vec<u8>>> {
        FileSegment::new(
            "upload",
            SegmentReader::new(Cursor::new(data.to_vec())),
            content_type,
            file_name.map(str::to_owned),
            None,
        )
    }

    /// Sink that fails after accepting `budget` bytes.
    struct Choke { budget: usize, got: Vec<u8> }
    impl Write for Choke {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.got.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> { Ok(()) }
    }

    #[test]
    fn test_sink_write_passthrough() {
        let mut seg = segment(b"plain bytes", "text/plain", Some("a.txt"));
        let mut out = Vec::new();
        let outcome = seg.write_to_sink(&mut out).unwrap();
        assert_eq!(outcome.bytes, 11);
        assert_eq!(outcome.file_name.as_deref(), Some("a.txt"));
        assert_eq!(outcome.path, None);
        assert_eq!(out, b"plain bytes");
        assert!(seg.is_consumed());
    }

    #[test]
    fn test_absent_file_is_noop() {
        let mut seg = segment(b"ignored", "text/plain", None);
        let mut out = Vec::new();
        assert_eq!(seg.write_to_sink(&mut out).unwrap().bytes, 0);
        assert!(out.is_empty());
        assert!(!seg.is_consumed());
        assert_eq!(seg.reader_mut().bytes_read(), 0);
    }

    #[test]
    fn test_second_write_returns_zero() {
        let mut seg = segment(b"once", "text/plain", Some("a.txt"));
        assert_eq!(seg.write_to_sink(Vec::new()).unwrap().bytes, 4);
        let again = seg.write_to_sink(Vec::new()).unwrap();
        assert_eq!(again.bytes, 0);
        assert_eq!(again.file_name.as_deref(), Some("a.txt"));
    }

    #[test]
    fn test_drained_reader_yields_zero() {
        let mut seg = segment(b"consumed elsewhere", "text/plain", Some("a.txt"));
        seg.reader_mut().drain().unwrap();
        assert_eq!(seg.write_to_sink(Vec::new()).unwrap().bytes, 0);
    }

    #[test]
    fn test_macbinary_counts_input_bytes() {
        let env = crate::transform::macbinary::tests::envelope(b"fork", b"rsrc");
        let mut seg = segment(&env, MACBINARY_CONTENT_TYPE, Some("doc"));
        let mut out = Vec::new();
        let outcome = seg.write_to_sink(&mut out).unwrap();
        assert_eq!(outcome.bytes, env.len() as u64);
        assert_eq!(out, b"fork");
    }

    #[test]
    fn test_empty_registry_disables_macbinary() {
        let env = crate::transform::macbinary::tests::envelope(b"fork", b"");
        let opts = SegmentOptions { transforms: Arc::new(TransformRegistry::empty()), ..Default::default() };
        let mut seg = FileSegment::with_options(
            "f",
            SegmentReader::new(Cursor::new(env.clone())),
            MACBINARY_CONTENT_TYPE,
            Some("doc".into()),
            None,
            opts,
        );
        let mut out = Vec::new();
        seg.write_to_sink(&mut out).unwrap();
        assert_eq!(out, env);
    }

    #[test]
    fn test_sink_error_propagates_and_consumes() {
        let mut seg = segment(&[1u8; 100], "application/octet-stream", Some("a.bin"));
        let mut sink = Choke { budget: 40, got: Vec::new() };
        let err = seg.write_to_sink(&mut sink).unwrap_err();
        assert!(matches!(err, SegmentError::Io(_)));
        assert_eq!(sink.got.len(), 40);
        assert!(seg.is_consumed());
        assert_eq!(seg.write_to_sink(Vec::new()).unwrap().bytes, 0);
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        let opts = SegmentOptions { chunk_size: 0, ..Default::default() };
        let mut seg = FileSegment::with_options(
            "f",
            SegmentReader::new(Cursor::new(b"abc".to_vec())),
            "text/plain",
            Some("a".into()),
            None,
            opts,
        );
        let mut out = Vec::new();
        assert_eq!(seg.write_to_sink(&mut out).unwrap().bytes, 3);
        assert_eq!(out, b"abc");
    }

    #[test]
    fn test_file_path_falls_back_to_file_name() {
        let seg = segment(b"", "text/plain", Some("a.txt"));
        assert_eq!(seg.file_path(), Some("a.txt"));
        assert_eq!(seg.name(), "upload");
        assert!(seg.is_file());

        let seg = FileSegment::new(
            "f",
            SegmentReader::new(Cursor::new(Vec::new())),
            "text/plain",
            Some("a.txt".into()),
            Some("C:\\docs\\a.txt".into()),
        );
        assert_eq!(seg.file_path(), Some("C:\\docs\\a.txt"));
    }

    #[test]
    fn test_path_write_into_directory() {
        let dir = TempDir::new().unwrap();
        let mut seg = segment(b"hello", "text/plain", Some("greeting.txt"));
        let outcome = seg.write_to_path(dir.path()).unwrap();
        assert_eq!(outcome.bytes, 5);
        assert_eq!(outcome.path.as_deref(), Some(dir.path().join("greeting.txt").as_path()));
        assert_eq!(seg.dir(), Some(dir.path()));
        assert_eq!(fs::read(dir.path().join("greeting.txt")).unwrap(), b"hello");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_rename_writes_exact_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(OsStr::from_bytes(b"r\xe9sum\xe9.txt")), b"old").unwrap();

        let mut seg = segment(b"new", "text/plain", Some("ignored.txt"));
        let taken = dir.path().join(OsStr::from_bytes(b"r\xe9sum\xe9.txt"));
        seg.set_renamer(Arc::new(crate::rename::SuffixRenamePolicy::default()));
        let outcome = seg.write_to_path(&taken).unwrap();

        let expected = dir.path().join(OsStr::from_bytes(b"r\xe9sum\xe9-1.txt"));
        assert_eq!(outcome.path.as_deref(), Some(expected.as_path()));
        assert_eq!(fs::read(&expected).unwrap(), b"new");
        assert_eq!(fs::read(&taken).unwrap(), b"old");
    }

    #[test]
    fn test_contained_name_strips_escapes() {
        assert_eq!(contained_name("a.txt"), PathBuf::from("a.txt"));
        assert_eq!(contained_name("/etc/passwd"), PathBuf::from("etc/passwd"));
        assert_eq!(contained_name("../../x.bin"), PathBuf::from("x.bin"));
        assert_eq!(contained_name("./sub/./y"), PathBuf::from("sub/y"));
    }

    #[test]
    fn test_create_dir_failure_carries_path() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"not a dir").unwrap();
        let target = blocker.join("sub").join("out.bin");

        let mut seg = segment(b"data", "text/plain", Some("out.bin"));
        match seg.write_to_path(&target).unwrap_err() {
            SegmentError::CreateDir { path, .. } => assert_eq!(path, blocker.join("sub")),
            other => panic!("unexpected error: {other}"),
        }
        assert!(seg.dir().is_none());
        assert!(seg.is_consumed());
    }
}
