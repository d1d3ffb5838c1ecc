use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::foundation::core::FrameIndex;
use crate::foundation::error::{TrajviewError, TrajviewResult};
use crate::model::{AnnotationEdit, AnnotationRecord};

/// Durable destination for the full annotation row set.
pub trait AnnotationSink: Send {
    /// Replace the persisted rows with `rows` (frame order).
    fn write_all(&mut self, rows: &[AnnotationRecord]) -> TrajviewResult<()>;

    fn describe(&self) -> String {
        "annotation sink".to_string()
    }
}

struct StoreInner {
    // Only frames that received an edit (or were loaded) have a record.
    records: BTreeMap<FrameIndex, AnnotationRecord>,
    sink: Box<dyn AnnotationSink>,
    dirty: bool,
    closed: bool,
    flushes: u64,
}

impl StoreInner {
    /// Fresh record for an unedited frame, carrying the category of the
    /// nearest earlier record.
    fn seed(&self, frame: FrameIndex) -> AnnotationRecord {
        let previous = self.records.range(..frame).next_back().map(|(_, r)| r);
        AnnotationRecord::seeded_from(frame, previous)
    }

    fn record(&self, frame: FrameIndex) -> AnnotationRecord {
        match self.records.get(&frame) {
            Some(r) => r.clone(),
            None => self.seed(frame),
        }
    }

    fn rows(&self) -> Vec<AnnotationRecord> {
        self.records.values().cloned().collect()
    }

    fn flush(&mut self) -> TrajviewResult<()> {
        let rows = self.rows();
        match self.sink.write_all(&rows) {
            Ok(()) => {
                self.dirty = false;
                self.flushes += 1;
                tracing::debug!(rows = rows.len(), "annotations flushed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    sink = %self.sink.describe(),
                    error = %e,
                    "annotation flush failed; will retry on next edit"
                );
                Err(TrajviewError::persistence(format!(
                    "flush to {} failed: {e}",
                    self.sink.describe()
                )))
            }
        }
    }
}

/// Store handle that an annotation load swaps for every holder at once.
pub type SharedStore = Arc<RwLock<Arc<AnnotationStore>>>;

/// Per-frame annotation records with write-through persistence.
///
/// Every [`set`](Self::set) rewrites the whole row set before returning, under
/// the same lock that guards the records, so concurrent callers never observe
/// or persist a half-applied edit. Concurrent edits to one frame resolve
/// last-writer-wins.
pub struct AnnotationStore {
    inner: Mutex<StoreInner>,
}

impl std::fmt::Debug for AnnotationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let Some(inner) = self.inner.try_lock() else {
            return f.write_str("AnnotationStore { <locked> }");
        };
        f.debug_struct("AnnotationStore")
            .field("records", &inner.records.len())
            .field("dirty", &inner.dirty)
            .field("closed", &inner.closed)
            .finish()
    }
}

impl AnnotationStore {
    pub fn new(sink: Box<dyn AnnotationSink>) -> Self {
        Self::from_rows(Vec::new(), sink)
    }

    /// Seed from previously persisted rows. Loaded rows count as edited.
    pub fn from_rows(rows: Vec<AnnotationRecord>, sink: Box<dyn AnnotationSink>) -> Self {
        let records = rows.into_iter().map(|r| (r.frame, r)).collect();
        Self {
            inner: Mutex::new(StoreInner {
                records,
                sink,
                dirty: false,
                closed: false,
                flushes: 0,
            }),
        }
    }

    /// Record for `frame`. A frame that was never edited reads as a fresh
    /// record carrying the category of the nearest earlier edited frame; the
    /// read itself stores nothing.
    pub fn get(&self, frame: FrameIndex) -> AnnotationRecord {
        self.inner.lock().record(frame)
    }

    /// Apply one field edit and flush the full row set.
    ///
    /// On [`TrajviewError::Persistence`] the edit is kept in memory and the
    /// store stays dirty; the next edit or [`flush`](Self::flush) retries.
    #[tracing::instrument(skip_all, fields(frame = %frame))]
    pub fn set(
        &self,
        frame: FrameIndex,
        edit: AnnotationEdit,
    ) -> TrajviewResult<AnnotationRecord> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(TrajviewError::closed("annotation store is closed"));
        }
        // The first edit creates the record, seeded as `get` would show it.
        let mut record = inner.record(frame);
        record.apply(edit);
        inner.records.insert(frame, record.clone());
        inner.dirty = true;
        inner.flush()?;
        Ok(record)
    }

    /// Flush if anything is pending.
    pub fn flush(&self) -> TrajviewResult<()> {
        let mut inner = self.inner.lock();
        if !inner.dirty {
            return Ok(());
        }
        inner.flush()
    }

    /// Final flush, then reject further edits. On flush failure the store stays
    /// open so the caller can retry.
    pub fn close(&self) -> TrajviewResult<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Ok(());
        }
        if inner.dirty {
            inner.flush()?;
        }
        inner.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.lock().dirty
    }

    /// Successful flushes since construction.
    pub fn flush_count(&self) -> u64 {
        self.inner.lock().flushes
    }

    /// Every edited record, ordered by frame.
    pub fn export_rows(&self) -> Vec<AnnotationRecord> {
        self.inner.lock().rows()
    }

    pub fn annotated_frames(&self) -> Vec<FrameIndex> {
        self.inner.lock().records.keys().copied().collect()
    }
}

/// In-memory sink recording every flushed snapshot. Writes can be made to fail
/// to simulate unavailable storage.
#[derive(Clone, Default)]
pub struct MemorySink {
    snapshots: Arc<Mutex<Vec<Vec<AnnotationRecord>>>>,
    failing: Arc<Mutex<bool>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn snapshots(&self) -> Vec<Vec<AnnotationRecord>> {
        self.snapshots.lock().clone()
    }

    pub fn last(&self) -> Option<Vec<AnnotationRecord>> {
        self.snapshots.lock().last().cloned()
    }
}

impl AnnotationSink for MemorySink {
    fn write_all(&mut self, rows: &[AnnotationRecord]) -> TrajviewResult<()> {
        if *self.failing.lock() {
            return Err(TrajviewError::persistence("memory sink is unavailable"));
        }
        self.snapshots.lock().push(rows.to_vec());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::TrackId;
    use crate::model::Category;

    fn store() -> (AnnotationStore, MemorySink) {
        let sink = MemorySink::new();
        (AnnotationStore::new(Box::new(sink.clone())), sink)
    }

    #[test]
    fn every_set_flushes_the_whole_store() {
        let (s, sink) = store();
        s.set(FrameIndex(1), AnnotationEdit::Description("a".into()))
            .unwrap();
        s.set(FrameIndex(2), AnnotationEdit::Category(Some(Category::Merge)))
            .unwrap();
        let snaps = sink.snapshots();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].len(), 1);
        assert_eq!(snaps[1].len(), 2);
        assert_eq!(s.flush_count(), 2);
        assert!(!s.is_dirty());
    }

    #[test]
    fn get_alone_does_not_export_or_flush() {
        let (s, sink) = store();
        let r = s.get(FrameIndex(4));
        assert_eq!(r, AnnotationRecord::empty(FrameIndex(4)));
        assert!(s.export_rows().is_empty());
        assert!(sink.snapshots().is_empty());
    }

    #[test]
    fn category_seeds_from_nearest_earlier_frame_once() {
        let (s, _) = store();
        s.set(FrameIndex(6), AnnotationEdit::Category(Some(Category::LaneChange)))
            .unwrap();
        s.set(FrameIndex(6), AnnotationEdit::Referred(Some(TrackId(1))))
            .unwrap();

        let r7 = s.get(FrameIndex(7));
        assert_eq!(r7.category, Some(Category::LaneChange));
        assert_eq!(r7.referred, None);

        // Seeded at creation only: once 7 is edited, later changes upstream
        // do not propagate.
        s.set(FrameIndex(7), AnnotationEdit::Description("kept".into()))
            .unwrap();
        s.set(FrameIndex(6), AnnotationEdit::Category(Some(Category::Merge)))
            .unwrap();
        assert_eq!(s.get(FrameIndex(7)).category, Some(Category::LaneChange));
        assert_eq!(s.get(FrameIndex(8)).category, Some(Category::LaneChange));

        // Frames before any record start blank.
        assert_eq!(s.get(FrameIndex(2)).category, None);
    }

    #[test]
    fn reads_before_edits_do_not_block_carry_forward() {
        let (s, _) = store();
        // Viewing 7 first must not pin a blank record there.
        assert_eq!(s.get(FrameIndex(7)).category, None);
        s.set(FrameIndex(6), AnnotationEdit::Category(Some(Category::LaneChange)))
            .unwrap();
        assert_eq!(s.get(FrameIndex(7)).category, Some(Category::LaneChange));
        assert_eq!(s.annotated_frames(), vec![FrameIndex(6)]);

        // An edit at 8 seeds from 6, not from the unedited 7.
        let r8 = s
            .set(FrameIndex(8), AnnotationEdit::Description("merge".into()))
            .unwrap();
        assert_eq!(r8.category, Some(Category::LaneChange));
    }

    #[test]
    fn failed_flush_keeps_edit_and_retries() {
        let (s, sink) = store();
        sink.set_failing(true);
        let err = s
            .set(FrameIndex(3), AnnotationEdit::Description("late".into()))
            .unwrap_err();
        assert!(matches!(err, TrajviewError::Persistence(_)));
        assert!(s.is_dirty());
        assert_eq!(s.get(FrameIndex(3)).description, "late");

        sink.set_failing(false);
        s.set(FrameIndex(4), AnnotationEdit::Description("next".into()))
            .unwrap();
        let last = sink.last().unwrap();
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].description, "late");
        assert!(!s.is_dirty());
    }

    #[test]
    fn explicit_flush_retries_pending_rows() {
        let (s, sink) = store();
        sink.set_failing(true);
        let _ = s.set(FrameIndex(0), AnnotationEdit::Description("x".into()));
        assert!(s.flush().is_err());
        sink.set_failing(false);
        s.flush().unwrap();
        assert_eq!(sink.last().unwrap().len(), 1);
        // Clean store: flush is a no-op.
        s.flush().unwrap();
        assert_eq!(sink.snapshots().len(), 1);
    }

    #[test]
    fn closed_store_rejects_edits() {
        let (s, sink) = store();
        s.set(FrameIndex(0), AnnotationEdit::Description("x".into()))
            .unwrap();
        s.close().unwrap();
        assert!(s.is_closed());
        let err = s
            .set(FrameIndex(0), AnnotationEdit::Description("y".into()))
            .unwrap_err();
        assert!(matches!(err, TrajviewError::Closed(_)));
        assert_eq!(sink.last().unwrap()[0].description, "x");
    }

    #[test]
    fn close_with_failing_sink_stays_open() {
        let (s, sink) = store();
        sink.set_failing(true);
        let _ = s.set(FrameIndex(0), AnnotationEdit::Description("x".into()));
        assert!(s.close().is_err());
        assert!(!s.is_closed());
        sink.set_failing(false);
        s.close().unwrap();
        assert!(s.is_closed());
    }

    #[test]
    fn from_rows_exports_same_rows() {
        let mut r = AnnotationRecord::empty(FrameIndex(9));
        r.apply(AnnotationEdit::Description("kept".into()));
        let s = AnnotationStore::from_rows(vec![r.clone()], Box::new(MemorySink::new()));
        assert_eq!(s.export_rows(), vec![r]);
        assert_eq!(s.annotated_frames(), vec![FrameIndex(9)]);
        assert!(!s.is_dirty());
    }

    #[test]
    fn concurrent_sets_are_serialized() {
        let (s, sink) = store();
        let s = std::sync::Arc::new(s);
        std::thread::scope(|scope| {
            for t in 0..4u64 {
                let s = s.clone();
                scope.spawn(move || {
                    for i in 0..25u64 {
                        let edit = AnnotationEdit::Description(format!("{t}:{i}"));
                        s.set(FrameIndex(t * 100 + i), edit).unwrap();
                    }
                });
            }
        });
        assert_eq!(s.export_rows().len(), 100);
        let snaps = sink.snapshots();
        assert_eq!(snaps.len(), 100);
        // Each flush sees exactly one more row than the previous one.
        for (i, snap) in snaps.iter().enumerate() {
            assert_eq!(snap.len(), i + 1);
        }
    }
}
