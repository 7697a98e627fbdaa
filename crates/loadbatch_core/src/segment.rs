//! Segments: compressed, append-only accumulations of records.
//!
//! A segment holds every record of one partition key within one generation.
//! Records are serialized as JSON lines and written through a zstd stream
//! encoder into a [`StorageBackend`] obtained from the configured
//! [`StorageProvider`].
//!
//! # Lifecycle
//!
//! ```text
//! Open --append*--> Open --finish--> Finished --finalize--> Closed --discard--> Discarded
//! ```
//!
//! `finish` ends the zstd frame, so the contents handed to a backend are a
//! complete frame any zstd decoder accepts; the byte size it returns is the
//! final compressed size. `finalize` syncs and closes the backing resource,
//! finishing the frame first if needed. `discard` is valid from any state.
//! `flush` pushes buffered output into the backend without ending the frame.

use crate::error::{SegmentError, SegmentResult};
use crate::key::{Generation, PartitionKey, SegmentId};
use loadbatch_storage::{StorageBackend, StorageError, StorageProvider};
use parking_lot::Mutex;
use serde::Serialize;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

type SegmentEncoder = zstd::stream::write::Encoder<'static, BackendWriter>;

/// Adapts a storage backend to `io::Write` so the compressor can sit on top.
struct BackendWriter {
    backend: Box<dyn StorageBackend>,
}

impl Write for BackendWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.backend.append(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.backend.flush()?;
        Ok(())
    }
}

/// Upper bound on name suffixes tried when leftover resources occupy a name.
const MAX_NAME_ATTEMPTS: u32 = 1024;

enum SegmentState {
    Open(Box<SegmentEncoder>),
    Finished(Box<dyn StorageBackend>),
    Closed(Box<dyn StorageBackend>),
    Discarded,
}

impl SegmentState {
    fn label(&self) -> &'static str {
        match self {
            SegmentState::Open(_) => "open",
            SegmentState::Finished(_) => "finished",
            SegmentState::Closed(_) => "finalized",
            SegmentState::Discarded => "discarded",
        }
    }

    fn backend(&self) -> Option<&dyn StorageBackend> {
        match self {
            SegmentState::Open(encoder) => Some(encoder.get_ref().backend.as_ref()),
            SegmentState::Finished(backend) | SegmentState::Closed(backend) => {
                Some(backend.as_ref())
            }
            SegmentState::Discarded => None,
        }
    }
}

/// The accumulated data of one partition key within one generation.
///
/// All operations take `&self`; an internal mutex serializes concurrent
/// writers onto the same compression stream.
pub struct Segment {
    id: SegmentId,
    name: String,
    state: Mutex<SegmentState>,
    records: AtomicU64,
    raw_bytes: AtomicU64,
}

impl Segment {
    /// Creates a segment and its backing resource.
    ///
    /// The resource is created exclusively. If [`SegmentId::name`] is taken,
    /// for example by a segment retained by an earlier run, the next free
    /// [`SegmentId::name_for_attempt`] is used instead.
    pub fn create(
        id: SegmentId,
        provider: &dyn StorageProvider,
        compression_level: i32,
    ) -> SegmentResult<Self> {
        let (name, backend) = create_backend(&id, provider)?;
        let encoder = SegmentEncoder::new(BackendWriter { backend }, compression_level)?;

        debug!(segment = %name, "segment created");

        Ok(Self {
            id,
            name,
            state: Mutex::new(SegmentState::Open(Box::new(encoder))),
            records: AtomicU64::new(0),
            raw_bytes: AtomicU64::new(0),
        })
    }

    /// Returns the segment identity.
    ///
    /// [`Segment::name`] may carry an attempt suffix the identity's own
    /// name does not.
    pub fn id(&self) -> &SegmentId {
        &self.id
    }

    /// Returns the external name of the segment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the partition key.
    pub fn key(&self) -> &PartitionKey {
        &self.id.key
    }

    /// Returns the generation the segment belongs to.
    pub fn generation(&self) -> Generation {
        self.id.generation
    }

    /// Number of records appended so far.
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Acquire)
    }

    /// Uncompressed bytes appended so far, newlines included.
    pub fn raw_bytes(&self) -> u64 {
        self.raw_bytes.load(Ordering::Acquire)
    }

    /// Returns true while the segment accepts records.
    pub fn is_open(&self) -> bool {
        matches!(*self.state.lock(), SegmentState::Open(_))
    }

    /// Serializes `payload` as one JSON line and appends it.
    pub fn append<T: Serialize + ?Sized>(&self, payload: &T) -> SegmentResult<()> {
        let mut line = serde_json::to_vec(payload)?;
        line.push(b'\n');

        let mut state = self.state.lock();
        let encoder = match &mut *state {
            SegmentState::Open(encoder) => encoder,
            other => return Err(self.rejected(other)),
        };
        encoder.write_all(&line)?;

        self.records.fetch_add(1, Ordering::AcqRel);
        self.raw_bytes.fetch_add(line.len() as u64, Ordering::AcqRel);
        Ok(())
    }

    /// Pushes all buffered compressed output into the backend and returns
    /// the compressed size.
    pub fn flush(&self) -> SegmentResult<u64> {
        let mut state = self.state.lock();
        let encoder = match &mut *state {
            SegmentState::Open(encoder) => encoder,
            other => return Err(self.rejected(other)),
        };
        encoder.flush()?;
        Ok(encoder.get_ref().backend.size()?)
    }

    /// Ends the zstd frame and returns the final compressed size.
    ///
    /// The segment accepts no more records afterwards. Calling this on a
    /// finished or finalized segment only reports the size.
    pub fn finish(&self) -> SegmentResult<u64> {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SegmentState::Discarded) {
            SegmentState::Open(encoder) => match (*encoder).try_finish() {
                Ok(writer) => {
                    let backend = writer.backend;
                    let size = backend.size();
                    *state = SegmentState::Finished(backend);
                    Ok(size?)
                }
                Err((encoder, e)) => {
                    *state = SegmentState::Open(Box::new(encoder));
                    Err(e.into())
                }
            },
            other => {
                *state = other;
                let backend = state.backend().ok_or_else(|| self.rejected(&state))?;
                Ok(backend.size()?)
            }
        }
    }

    /// Reads back the compressed bytes written so far.
    pub fn contents(&self) -> SegmentResult<Vec<u8>> {
        let state = self.state.lock();
        let backend = state.backend().ok_or_else(|| self.rejected(&state))?;
        let size = backend.size()?;
        Ok(backend.read_at(0, size as usize)?)
    }

    /// Ends the compression stream if still open, then syncs and closes the
    /// backing resource.
    ///
    /// Must be called at most once.
    pub fn finalize(&self) -> SegmentResult<()> {
        if self.is_open() {
            self.finish()?;
        }

        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SegmentState::Discarded) {
            SegmentState::Finished(mut backend) => match backend.sync() {
                Ok(()) => {
                    *state = SegmentState::Closed(backend);
                    Ok(())
                }
                Err(e) => {
                    *state = SegmentState::Finished(backend);
                    Err(e.into())
                }
            },
            other => {
                *state = other;
                Err(self.rejected(&state))
            }
        }
    }

    /// Removes the backing resource. A second call is a no-op.
    pub fn discard(&self) -> SegmentResult<()> {
        let mut state = self.state.lock();
        match &mut *state {
            SegmentState::Open(encoder) => encoder.get_mut().backend.remove()?,
            SegmentState::Finished(backend) | SegmentState::Closed(backend) => backend.remove()?,
            SegmentState::Discarded => return Ok(()),
        }
        *state = SegmentState::Discarded;
        debug!(segment = %self.name, "segment discarded");
        Ok(())
    }

    fn rejected(&self, state: &SegmentState) -> SegmentError {
        SegmentError::Closed {
            name: self.name.clone(),
            state: state.label(),
        }
    }
}

fn create_backend(
    id: &SegmentId,
    provider: &dyn StorageProvider,
) -> SegmentResult<(String, Box<dyn StorageBackend>)> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = id.name_for_attempt(attempt);
        match provider.create(&name) {
            Ok(backend) => return Ok((name, backend)),
            Err(StorageError::AlreadyExists { .. }) => {
                debug!(segment = %name, "segment name taken, trying next");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(StorageError::AlreadyExists {
        name: id.name_for_attempt(MAX_NAME_ATTEMPTS - 1),
    }
    .into())
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("name", &self.name)
            .field("state", &self.state.lock().label())
            .field("records", &self.records())
            .finish()
    }
}

/// Decodes segment contents back into their JSON lines.
///
/// Accepts both finalized segments and segments that were only flushed, whose
/// zstd frame has no epilogue yet.
pub fn decode_records(compressed: &[u8]) -> io::Result<Vec<Vec<u8>>> {
    let mut decoder = zstd::stream::read::Decoder::new(compressed)?;
    let mut raw = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            // Flushed but unfinished frame.
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(raw
        .split(|b| *b == b'\n')
        .filter(|line| !line.is_empty())
        .map(<[u8]>::to_vec)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use loadbatch_storage::{FileProvider, InMemoryProvider};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn segment(provider: &dyn StorageProvider) -> Segment {
        let id = SegmentId::new(0, 100, PartitionKey::new("a", "b"));
        Segment::create(id, provider, 3).unwrap()
    }

    #[test]
    fn append_flush_and_decode() {
        let provider = InMemoryProvider::new();
        let seg = segment(&provider);

        seg.append(&json!({"n": 1})).unwrap();
        seg.append(&json!({"n": 2})).unwrap();

        let size = seg.flush().unwrap();
        assert!(size > 0);
        assert_eq!(seg.records(), 2);

        let contents = seg.contents().unwrap();
        assert_eq!(contents.len() as u64, size);

        let records = decode_records(&contents).unwrap();
        assert_eq!(records, vec![b"{\"n\":1}".to_vec(), b"{\"n\":2}".to_vec()]);
    }

    #[test]
    fn finalize_produces_complete_frame() {
        let provider = InMemoryProvider::new();
        let seg = segment(&provider);
        seg.append(&json!("x")).unwrap();
        seg.flush().unwrap();
        seg.finalize().unwrap();

        let contents = seg.contents().unwrap();
        let decoded = zstd::stream::decode_all(contents.as_slice()).unwrap();
        assert_eq!(decoded, b"\"x\"\n");
    }

    #[test]
    fn finish_ends_the_frame() {
        let provider = InMemoryProvider::new();
        let seg = segment(&provider);
        seg.append(&json!({"n": 1})).unwrap();
        seg.append(&json!({"n": 2})).unwrap();

        let size = seg.finish().unwrap();
        let contents = seg.contents().unwrap();
        assert_eq!(contents.len() as u64, size);
        assert_eq!(
            zstd::stream::decode_all(contents.as_slice()).unwrap(),
            b"{\"n\":1}\n{\"n\":2}\n"
        );

        assert!(matches!(
            seg.append(&json!(3)).unwrap_err(),
            SegmentError::Closed { state: "finished", .. }
        ));
        assert_eq!(seg.finish().unwrap(), size);

        seg.finalize().unwrap();
        assert_eq!(seg.contents().unwrap(), contents);
    }

    #[test]
    fn leftover_file_is_never_reopened() {
        let dir = tempdir().unwrap();
        let provider = FileProvider::new(dir.path());

        let first = segment(&provider);
        first.append(&json!({"n": 1})).unwrap();
        first.finalize().unwrap();
        let leftover = std::fs::read(dir.path().join(first.name())).unwrap();

        // Same identity again, as after a restart within the same window.
        let second = segment(&provider);
        assert_eq!(second.name(), format!("{}-1", first.name()));
        second.append(&json!({"n": 2})).unwrap();
        second.finalize().unwrap();

        assert_eq!(
            std::fs::read(dir.path().join(first.name())).unwrap(),
            leftover
        );
        let bytes = std::fs::read(dir.path().join(second.name())).unwrap();
        assert_eq!(decode_records(&bytes).unwrap(), vec![b"{\"n\":2}".to_vec()]);
    }

    #[test]
    fn dashed_keys_get_separate_files() {
        let dir = tempdir().unwrap();
        let provider = FileProvider::new(dir.path());
        let left = Segment::create(
            SegmentId::new(0, 100, PartitionKey::new("a-b", "c")),
            &provider,
            3,
        )
        .unwrap();
        let right = Segment::create(
            SegmentId::new(0, 100, PartitionKey::new("a", "b-c")),
            &provider,
            3,
        )
        .unwrap();

        left.append(&json!("left")).unwrap();
        right.append(&json!("right")).unwrap();
        left.finalize().unwrap();
        right.finalize().unwrap();

        assert_ne!(left.name(), right.name());
        let read = |seg: &Segment| {
            decode_records(&std::fs::read(dir.path().join(seg.name())).unwrap()).unwrap()
        };
        assert_eq!(read(&left), vec![b"\"left\"".to_vec()]);
        assert_eq!(read(&right), vec![b"\"right\"".to_vec()]);
    }

    #[test]
    fn append_after_finalize_is_rejected() {
        let provider = InMemoryProvider::new();
        let seg = segment(&provider);
        seg.flush().unwrap();
        seg.finalize().unwrap();

        let err = seg.append(&json!(1)).unwrap_err();
        assert!(matches!(err, SegmentError::Closed { state: "finalized", .. }));
        assert!(seg.flush().is_err());
        assert!(seg.finalize().is_err());
    }

    #[test]
    fn discard_removes_backing_resource() {
        let provider = InMemoryProvider::new();
        let seg = segment(&provider);
        assert!(provider.contains(seg.name()));

        seg.append(&json!(1)).unwrap();
        seg.flush().unwrap();
        seg.finalize().unwrap();
        seg.discard().unwrap();

        assert!(!provider.contains(seg.name()));
        assert!(seg.discard().is_ok());
        assert!(seg.contents().is_err());
    }

    #[test]
    fn discard_open_segment() {
        let dir = tempdir().unwrap();
        let provider = FileProvider::new(dir.path());
        let seg = segment(&provider);
        seg.append(&json!({"k": "v"})).unwrap();

        let path = dir.path().join(seg.name());
        assert!(path.exists());

        seg.discard().unwrap();
        assert!(!path.exists());
        assert!(!seg.is_open());
    }

    #[test]
    fn file_segment_is_readable_after_finalize() {
        let dir = tempdir().unwrap();
        let provider = FileProvider::new(dir.path());
        let seg = segment(&provider);
        seg.append(&json!({"id": 1})).unwrap();
        seg.flush().unwrap();
        seg.finalize().unwrap();

        let bytes = std::fs::read(dir.path().join(seg.name())).unwrap();
        assert_eq!(decode_records(&bytes).unwrap(), vec![b"{\"id\":1}".to_vec()]);
    }

    #[test]
    fn concurrent_appends_serialize() {
        let provider = InMemoryProvider::new();
        let seg = Arc::new(segment(&provider));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let seg = Arc::clone(&seg);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        seg.append(&json!({"t": t, "i": i})).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        seg.flush().unwrap();
        let records = decode_records(&seg.contents().unwrap()).unwrap();
        assert_eq!(records.len(), 400);
        assert_eq!(seg.records(), 400);
        for line in records {
            let value: serde_json::Value = serde_json::from_slice(&line).unwrap();
            assert!(value.get("t").is_some());
        }
    }
}
