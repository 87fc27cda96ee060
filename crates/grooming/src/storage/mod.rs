//! Temporal segment store.
//!
//! Holds every guide's segments per imported time sample plus the mutable
//! current frame the tools edit. Edits land in the current frame first and
//! ripple into neighbouring samples on the next time change or flush.

pub mod interpolation;
pub mod persistence;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use groom_config::{GroomConfig, SolverConfig, TemporalConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GroomError, GroomResult};
use crate::segments::SegmentSet;
use crate::selection::SelectedGuide;
use crate::types::{GuideId, InterpolationGroups, RestPosition};

pub use persistence::FrameRecord;

/// Sparse change record: the listed guides and their segments.
///
/// Handed back and forth between the store and the undo arena.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialStorage {
    pub guide_ids: Vec<GuideId>,
    pub segments: Vec<SegmentSet>,
}

impl PartialStorage {
    pub fn len(&self) -> usize {
        self.guide_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guide_ids.is_empty()
    }
}

/// Totally ordered sample time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime(pub f64);

impl Eq for FrameTime {}

impl PartialOrd for FrameTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrameTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone)]
pub struct SegmentsStorage {
    frames: BTreeMap<FrameTime, Vec<SegmentSet>>,
    current: Vec<SegmentSet>,
    current_time: f64,
    /// Edits in `current` not yet rippled into `frames`.
    dirty: bool,
    dirty_guides: BTreeSet<GuideId>,
    solver: SolverConfig,
    temporal: TemporalConfig,
}

impl SegmentsStorage {
    /// Fresh straight guides along the rest axis.
    pub fn from_scratch(
        rest_positions: &[RestPosition],
        groups: &InterpolationGroups,
        config: &GroomConfig,
    ) -> GroomResult<Self> {
        groups.validate(rest_positions.len())?;
        let nominal = config.interpolation.nominal_guide_length;
        let current = (0..rest_positions.len())
            .map(|index| {
                let count = groups.segment_count_of(GuideId::from_index(index));
                SegmentSet::straight(count, nominal / (count - 1) as f64)
            })
            .collect::<GroomResult<Vec<_>>>()?;

        Ok(Self::with_current(current, config))
    }

    /// A store holding imported samples. The current frame starts at the
    /// earliest sample.
    pub fn from_frames(records: Vec<FrameRecord>, config: &GroomConfig) -> GroomResult<Self> {
        let Some(first) = records.first() else {
            return Err(GroomError::Format("no frames to import".to_string()));
        };
        let mut storage = Self::with_current(first.segments.clone(), config);
        storage.current_time = first.time;
        for record in records {
            storage.insert_frame(record.time, record.segments)?;
        }
        if let Some((&time, segments)) = storage.frames.iter().next() {
            storage.current = segments.clone();
            storage.current_time = time.0;
        }
        Ok(storage)
    }

    pub(crate) fn with_current(current: Vec<SegmentSet>, config: &GroomConfig) -> Self {
        Self {
            frames: BTreeMap::new(),
            current,
            current_time: 0.0,
            dirty: false,
            dirty_guides: BTreeSet::new(),
            solver: config.solver.clone(),
            temporal: config.temporal.clone(),
        }
    }

    /// Keep only `surviving` guides, in that order, across every frame.
    pub fn filtered(&self, surviving: &[GuideId]) -> GroomResult<Self> {
        self.check_ids(surviving)?;
        let pick = |segments: &[SegmentSet]| -> Vec<SegmentSet> {
            surviving
                .iter()
                .map(|id| segments[id.index()].clone())
                .collect()
        };
        Ok(Self {
            frames: self
                .frames
                .iter()
                .map(|(&time, segments)| (time, pick(segments)))
                .collect(),
            current: pick(&self.current),
            current_time: self.current_time,
            dirty: false,
            dirty_guides: BTreeSet::new(),
            solver: self.solver.clone(),
            temporal: self.temporal.clone(),
        })
    }

    pub fn guide_count(&self) -> usize {
        self.current.len()
    }

    pub fn current(&self) -> &[SegmentSet] {
        &self.current
    }

    pub fn segments(&self, guide: GuideId) -> Option<&SegmentSet> {
        self.current.get(guide.index())
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    /// True while edits are waiting to ripple into the time samples.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn sample_times(&self) -> Vec<f64> {
        self.frames.keys().map(|time| time.0).collect()
    }

    /// Every sample, earliest first.
    pub fn frames(&self) -> impl Iterator<Item = (f64, &[SegmentSet])> {
        self.frames
            .iter()
            .map(|(time, segments)| (time.0, segments.as_slice()))
    }

    /// Add or overwrite the sample at `time`.
    pub fn insert_frame(&mut self, time: f64, segments: Vec<SegmentSet>) -> GroomResult<()> {
        if !time.is_finite() {
            return Err(GroomError::invalid(format!("sample time {time} is not finite")));
        }
        if segments.len() != self.guide_count() {
            return Err(GroomError::invalid(format!(
                "sample at {time} has {} guides, store has {}",
                segments.len(),
                self.guide_count()
            )));
        }
        if let Some(short) = segments.iter().find(|set| set.vertex_count() < 2) {
            return Err(GroomError::invalid(format!(
                "sample at {time} has a guide with {} vertices",
                short.vertex_count()
            )));
        }
        self.frames.insert(FrameTime(time), segments);
        Ok(())
    }

    /// Drop every time sample. The current frame is kept.
    pub fn flush_frames(&mut self) {
        self.frames.clear();
        self.dirty_guides.clear();
        self.dirty = false;
    }

    /// Move the current frame to `time`.
    ///
    /// Without samples guides are time-invariant and nothing changes. Pending
    /// edits ripple first; then the current frame is the exact sample, the
    /// nearest end sample outside the sampled range, or a blend of the two
    /// bracketing samples re-spaced to uniform segment length.
    pub fn set_current_time(&mut self, time: f64) -> GroomResult<()> {
        if !time.is_finite() {
            return Err(GroomError::invalid(format!("time {time} is not finite")));
        }
        if self.frames.is_empty() {
            self.current_time = time;
            return Ok(());
        }

        self.propagate_changes_through_time();

        let key = FrameTime(time);
        let low = self.frames.range(..=key).next_back();
        let high = self.frames.range(key..).next();

        let current = match (low, high) {
            (Some((low_time, segments)), _) if low_time.0 == time => segments.clone(),
            (Some((_, segments)), None) | (None, Some((_, segments))) => segments.clone(),
            (Some((low_time, low)), Some((high_time, high))) => {
                let weight = (time - low_time.0) / (high_time.0 - low_time.0);
                debug!(
                    "blending samples {} and {} at weight {weight:.3}",
                    low_time.0, high_time.0
                );
                self.blend_frames(low, high, weight)?
            }
            (None, None) => return Ok(()),
        };

        self.current = current;
        self.current_time = time;
        Ok(())
    }

    fn blend_frames(
        &self,
        low: &[SegmentSet],
        high: &[SegmentSet],
        weight: f64,
    ) -> GroomResult<Vec<SegmentSet>> {
        low.iter()
            .zip(high)
            .map(|(a, b)| -> GroomResult<SegmentSet> {
                let mut blended = a.blended(b, weight)?;
                blended.uniformly_reposition(a.vertex_count(), &self.solver)?;
                Ok(blended)
            })
            .collect()
    }

    /// Swap in the given segments, returning what they displaced.
    ///
    /// Nothing changes if any id is unknown.
    pub fn replace(&mut self, partial: PartialStorage) -> GroomResult<PartialStorage> {
        self.check_partial(&partial)?;

        let mut displaced = PartialStorage {
            guide_ids: partial.guide_ids.clone(),
            segments: Vec::with_capacity(partial.segments.len()),
        };
        for (id, segments) in partial.guide_ids.into_iter().zip(partial.segments) {
            displaced
                .segments
                .push(std::mem::replace(&mut self.current[id.index()], segments));
            self.dirty_guides.insert(id);
        }
        self.dirty = true;
        Ok(displaced)
    }

    /// Write dirty selected guides into the current frame.
    ///
    /// Returns the previous segments of the written guides, or `None` when
    /// nothing was dirty.
    pub fn propagate_changes(&mut self, guides: &mut [SelectedGuide]) -> Option<PartialStorage> {
        let mut previous = PartialStorage::default();
        for guide in guides.iter_mut().filter(|guide| guide.dirty) {
            let Some(slot) = self.current.get_mut(guide.id.index()) else {
                warn!("dropping edit for unknown guide {:?}", guide.id);
                continue;
            };
            previous
                .segments
                .push(std::mem::replace(slot, guide.segments.clone()));
            previous.guide_ids.push(guide.id);
            self.dirty_guides.insert(guide.id);
            guide.dirty = false;
        }

        if previous.is_empty() {
            return None;
        }
        self.dirty = true;
        Some(previous)
    }

    /// Ripple edited guides into samples near the current time.
    ///
    /// A sample `dt` away receives `current * f + old * (1 - f)` with
    /// `f = 1 - ripple_decay * |dt|`; samples with `f <= 0` are untouched.
    pub fn propagate_changes_through_time(&mut self) {
        if !self.dirty {
            return;
        }
        let dirty_guides = std::mem::take(&mut self.dirty_guides);
        self.dirty = false;

        let current_time = self.current_time;
        let decay = self.temporal.ripple_decay;
        let mut touched = 0;

        for (time, segments) in self.frames.iter_mut() {
            let influence = 1.0 - decay * (time.0 - current_time).abs();
            if influence <= 0.0 {
                continue;
            }
            touched += 1;
            for &id in &dirty_guides {
                let edited = &self.current[id.index()];
                let old = &mut segments[id.index()];
                if influence >= 1.0 {
                    *old = edited.clone();
                    continue;
                }
                let result = edited
                    .blended(old, 1.0 - influence)
                    .and_then(|blended| blended.repositioned(old.vertex_count(), &self.solver));
                match result {
                    Ok(rippled) => *old = rippled,
                    Err(err) => warn!("ripple into sample {} skipped for {id:?}: {err}", time.0),
                }
            }
        }

        debug!(
            "rippled {} guides into {touched} samples around t={current_time}",
            dirty_guides.len()
        );
    }

    /// Resample every guide of every frame to its group's segment count.
    ///
    /// All frames are computed before any is stored, so a failure leaves the
    /// store untouched.
    pub fn set_segments_count(
        &mut self,
        rest_positions: &[RestPosition],
        groups: &InterpolationGroups,
    ) -> GroomResult<()> {
        groups.validate(rest_positions.len())?;
        if rest_positions.len() != self.guide_count() {
            return Err(GroomError::invalid(format!(
                "{} rest positions for {} guides",
                rest_positions.len(),
                self.guide_count()
            )));
        }
        self.propagate_changes_through_time();

        let resample = |segments: &[SegmentSet]| -> GroomResult<Vec<SegmentSet>> {
            segments
                .iter()
                .enumerate()
                .map(|(index, set)| {
                    set.repositioned(
                        groups.segment_count_of(GuideId::from_index(index)),
                        &self.solver,
                    )
                })
                .collect()
        };

        let frames = self
            .frames
            .iter()
            .map(|(&time, segments)| -> GroomResult<_> { Ok((time, resample(segments)?)) })
            .collect::<GroomResult<BTreeMap<_, _>>>()?;
        let current = resample(&self.current)?;

        self.frames = frames;
        self.current = current;
        info!(
            "Resampled {} guides to segment counts {:?}",
            self.guide_count(),
            groups.segment_counts
        );
        Ok(())
    }

    /// Check that [`replace`](Self::replace) would accept `partial`.
    pub fn check_partial(&self, partial: &PartialStorage) -> GroomResult<()> {
        self.check_ids(&partial.guide_ids)?;
        if partial.guide_ids.len() != partial.segments.len() {
            return Err(GroomError::invalid(format!(
                "{} guide ids for {} segment sets",
                partial.guide_ids.len(),
                partial.segments.len()
            )));
        }
        Ok(())
    }

    fn check_ids(&self, ids: &[GuideId]) -> GroomResult<()> {
        match ids.iter().find(|id| id.index() >= self.guide_count()) {
            Some(id) => Err(GroomError::UnknownGuide(id.index())),
            None => Ok(()),
        }
    }
}
