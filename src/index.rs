use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::foundation::core::{FrameIndex, FrameSpan, TrackId};
use crate::foundation::error::{TrajviewError, TrajviewResult};
use crate::model::TrackState;

/// Index handle that a track reload swaps for every holder at once.
pub type SharedIndex = Arc<RwLock<Arc<TrajectoryIndex>>>;

/// Frame-keyed view over loaded track states.
///
/// Built once, then read-only: every [`TrackState`] is owned by exactly one
/// frame bucket, and per-track lifespans refer back into those buckets.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrajectoryIndex {
    frames: HashMap<FrameIndex, Vec<TrackState>>, // each bucket sorted by track id
    lifespans: BTreeMap<TrackId, Vec<FrameIndex>>, // strictly increasing
    span: Option<FrameSpan>,
}

/// Ordered states of one track.
#[derive(Clone, Debug)]
pub struct TrackLifespan<'a> {
    pub track_id: TrackId,
    pub first: FrameIndex,
    pub last: FrameIndex,
    pub states: Vec<&'a TrackState>,
}

impl TrajectoryIndex {
    /// Build from an ordered record sequence in one window.
    pub fn build(
        records: impl IntoIterator<Item = TrackState>,
        allow: Option<&BTreeSet<TrackId>>,
    ) -> TrajviewResult<Self> {
        let mut b = IndexBuilder::new(allow.cloned());
        b.push_window(records)?;
        b.finish()
    }

    /// Build while consuming `records` in windows of at most `window` rows.
    ///
    /// The result does not depend on `window`.
    pub fn build_windowed(
        records: impl IntoIterator<Item = TrackState>,
        window: usize,
        allow: Option<&BTreeSet<TrackId>>,
    ) -> TrajviewResult<Self> {
        let window = window.max(1);
        let mut b = IndexBuilder::new(allow.cloned());
        let mut buf = Vec::with_capacity(window.min(4096));
        for r in records {
            buf.push(r);
            if buf.len() == window {
                b.push_window(buf.drain(..))?;
            }
        }
        b.push_window(buf)?;
        b.finish()
    }

    /// States recorded at `frame`, ordered by track id. Empty when the frame has no data.
    pub fn active_at(&self, frame: FrameIndex) -> &[TrackState] {
        self.frames.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn track_ids_at(&self, frame: FrameIndex) -> Vec<TrackId> {
        self.active_at(frame).iter().map(|s| s.track_id).collect()
    }

    pub fn state_at(&self, frame: FrameIndex, id: TrackId) -> Option<&TrackState> {
        let bucket = self.frames.get(&frame)?;
        bucket
            .binary_search_by_key(&id, |s| s.track_id)
            .ok()
            .map(|i| &bucket[i])
    }

    pub fn lifespan_of(&self, id: TrackId) -> TrajviewResult<TrackLifespan<'_>> {
        let frames = self
            .lifespans
            .get(&id)
            .ok_or_else(|| TrajviewError::not_found(format!("track {id} has no recorded frames")))?;
        let states = frames
            .iter()
            .map(|&f| {
                self.state_at(f, id).ok_or_else(|| {
                    TrajviewError::not_found(format!("track {id} missing at frame {f}"))
                })
            })
            .collect::<TrajviewResult<Vec<_>>>()?;
        // Lifespans are only inserted with at least one frame.
        let (first, last) = match (frames.first(), frames.last()) {
            (Some(&a), Some(&b)) => (a, b),
            _ => return Err(TrajviewError::not_found(format!("track {id} is empty"))),
        };
        Ok(TrackLifespan {
            track_id: id,
            first,
            last,
            states,
        })
    }

    /// `[min frame, max frame]` over all loaded tracks, `None` when empty.
    pub fn frame_span(&self) -> Option<FrameSpan> {
        self.span
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Number of distinct frames carrying at least one state.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn track_count(&self) -> usize {
        self.lifespans.len()
    }

    pub fn state_count(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    pub fn track_ids(&self) -> impl Iterator<Item = TrackId> + '_ {
        self.lifespans.keys().copied()
    }
}

/// Incremental builder fed one bounded window at a time.
#[derive(Debug, Default)]
pub struct IndexBuilder {
    allow: Option<BTreeSet<TrackId>>,
    frames: HashMap<FrameIndex, Vec<TrackState>>,
    accepted: u64,
    dropped: u64,
}

impl IndexBuilder {
    pub fn new(allow: Option<BTreeSet<TrackId>>) -> Self {
        Self {
            allow,
            ..Self::default()
        }
    }

    pub fn push(&mut self, state: TrackState) -> TrajviewResult<()> {
        if let Some(allow) = &self.allow {
            if !allow.contains(&state.track_id) {
                self.dropped += 1;
                return Ok(());
            }
        }
        state.validate()?;
        self.frames.entry(state.frame).or_default().push(state);
        self.accepted += 1;
        Ok(())
    }

    pub fn push_window(
        &mut self,
        window: impl IntoIterator<Item = TrackState>,
    ) -> TrajviewResult<()> {
        for s in window {
            self.push(s)?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(accepted = self.accepted, dropped = self.dropped))]
    pub fn finish(self) -> TrajviewResult<TrajectoryIndex> {
        let mut frames = self.frames;
        let mut lifespans: BTreeMap<TrackId, Vec<FrameIndex>> = BTreeMap::new();
        let mut span: Option<FrameSpan> = None;

        for (&frame, bucket) in frames.iter_mut() {
            bucket.sort_by_key(|s| s.track_id);
            if let Some(w) = bucket.windows(2).find(|w| w[0].track_id == w[1].track_id) {
                return Err(TrajviewError::data_format(format!(
                    "track {} recorded twice at frame {frame}",
                    w[0].track_id
                )));
            }
            for s in bucket.iter() {
                lifespans.entry(s.track_id).or_default().push(frame);
            }
            span = Some(match span {
                Some(sp) => sp.include(frame),
                None => FrameSpan::single(frame),
            });
        }

        for frames_of_track in lifespans.values_mut() {
            frames_of_track.sort_unstable();
        }

        tracing::debug!(
            frames = frames.len(),
            tracks = lifespans.len(),
            "trajectory index built"
        );

        Ok(TrajectoryIndex {
            frames,
            lifespans,
            span,
        })
    }
}
