//! The groomed object: owner of a guide population and its history.
//!
//! Locks are taken in the order undo, topology, storage and are never held
//! across I/O.

use std::io::{Read, Write};
use std::sync::{Arc, Mutex, RwLock};

use glam::{DMat4, DVec3};
use groom_config::GroomConfig;
use tracing::{debug, info};

use crate::brush::{BrushCommand, BrushFootprint};
use crate::collision::HostSurface;
use crate::error::{GroomError, GroomResult};
use crate::pipeline::{GuideTask, TaskPipeline};
use crate::segments::SegmentSet;
use crate::selection::{SelectedGuide, SharedSelection};
use crate::spatial::NearestNeighborForest;
use crate::storage::persistence::{FrameRecord, read_frames, write_frames};
use crate::storage::SegmentsStorage;
use crate::types::{GuideId, InterpolationGroups, RestPosition};
use crate::undo::UndoStack;

/// Everything that changes only when the guide population changes.
#[derive(Debug)]
struct Topology {
    rest_positions: Vec<RestPosition>,
    groups: InterpolationGroups,
    /// Guide-local to world transform per guide at the current time.
    frames: Vec<DMat4>,
    forest: NearestNeighborForest,
}

impl Topology {
    fn new(rest_positions: Vec<RestPosition>, groups: InterpolationGroups, frames: Vec<DMat4>) -> Self {
        let forest = NearestNeighborForest::build(&rest_positions, &groups);
        Self {
            rest_positions,
            groups,
            frames,
            forest,
        }
    }
}

/// Default guide frames: translate to the rest root, rest axis unchanged.
fn rest_frames(rest_positions: &[RestPosition]) -> Vec<DMat4> {
    rest_positions
        .iter()
        .map(|rest| DMat4::from_translation(rest.position.as_dvec3()))
        .collect()
}

pub struct GroomObject {
    config: GroomConfig,
    storage: RwLock<SegmentsStorage>,
    topology: RwLock<Topology>,
    surface: RwLock<Option<Arc<dyn HostSurface>>>,
    undo: Mutex<UndoStack>,
}

impl GroomObject {
    /// Fresh straight guides at the given roots.
    pub fn new(
        rest_positions: Vec<RestPosition>,
        groups: InterpolationGroups,
        config: GroomConfig,
    ) -> GroomResult<Self> {
        config
            .validate()
            .map_err(|err| GroomError::invalid(err.to_string()))?;
        let storage = SegmentsStorage::from_scratch(&rest_positions, &groups, &config)?;
        let frames = rest_frames(&rest_positions);
        info!("Created groom object with {} guides", rest_positions.len());

        Ok(Self {
            undo: Mutex::new(UndoStack::new(config.undo.depth)),
            storage: RwLock::new(storage),
            topology: RwLock::new(Topology::new(rest_positions, groups, frames)),
            surface: RwLock::new(None),
            config,
        })
    }

    pub fn config(&self) -> &GroomConfig {
        &self.config
    }

    pub fn guide_count(&self) -> usize {
        self.storage.read().expect("storage lock poisoned").guide_count()
    }

    /// Update the per-guide world transforms, e.g. after the host surface
    /// deformed.
    pub fn set_guide_frames(&self, frames: Vec<DMat4>) -> GroomResult<()> {
        let mut topology = self.topology.write().expect("topology lock poisoned");
        if frames.len() != topology.rest_positions.len() {
            return Err(GroomError::invalid(format!(
                "{} frames for {} guides",
                frames.len(),
                topology.rest_positions.len()
            )));
        }
        topology.frames = frames;
        Ok(())
    }

    pub fn set_collision_surface(&self, surface: Option<Arc<dyn HostSurface>>) {
        *self.surface.write().expect("surface lock poisoned") = surface;
    }

    pub fn collision_surface(&self) -> Option<Arc<dyn HostSurface>> {
        self.surface.read().expect("surface lock poisoned").clone()
    }

    /// Detached working copies of the given guides.
    ///
    /// With a footprint, vertices are picked and weighted by distance to its
    /// centre; without one every free vertex is affected at full strength.
    pub fn select(
        &self,
        ids: &[GuideId],
        footprint: Option<&BrushFootprint>,
    ) -> GroomResult<Vec<SelectedGuide>> {
        let topology = self.topology.read().expect("topology lock poisoned");
        let storage = self.storage.read().expect("storage lock poisoned");

        ids.iter()
            .map(|&id| -> GroomResult<SelectedGuide> {
                let segments = storage
                    .segments(id)
                    .ok_or(GroomError::UnknownGuide(id.index()))?;
                let mut guide = SelectedGuide::new(id, segments.clone(), topology.frames[id.index()]);
                match footprint {
                    Some(footprint) => guide.apply_footprint(
                        DVec3::from_array(footprint.center.map(f64::from)),
                        footprint.radius as f64,
                        footprint.falloff,
                    ),
                    None => guide.select_all_free(),
                }
                Ok(guide)
            })
            .collect()
    }

    /// Turn a brush command into a queued task.
    ///
    /// The returned selection is what the worker edits; poll its dirty flags
    /// to observe completion. It holds the guides as of submission and is
    /// re-read from the store when the worker picks the task up.
    pub fn submit(
        self: &Arc<Self>,
        pipeline: &TaskPipeline,
        command: &BrushCommand,
    ) -> GroomResult<SharedSelection> {
        let mode = command.mode()?;
        let guides = self.select(&command.guide_ids, command.footprint.as_ref())?;
        let selection: SharedSelection = Arc::new(Mutex::new(guides));
        let task = GuideTask::new(
            mode,
            Arc::clone(&selection),
            command.input(),
            command.collision_enabled,
            Arc::clone(self),
        )
        .with_footprint(command.footprint);
        pipeline.enqueue_task(task)?;
        Ok(selection)
    }

    /// Write dirty guides back and record the change for undo.
    ///
    /// Called by the pipeline worker once a task has been solved. The undo
    /// lock is held across the write so the store never runs ahead of the
    /// history.
    pub fn persist_edit(&self, guides: &mut [SelectedGuide]) {
        let mut undo = self.undo.lock().expect("undo lock poisoned");
        let change = self
            .storage
            .write()
            .expect("storage lock poisoned")
            .propagate_changes(guides);
        if let Some(change) = change {
            debug!("Persisted edit of {} guides", change.len());
            undo.push(change);
        }
    }

    pub fn set_current_time(&self, time: f64) -> GroomResult<()> {
        self.storage
            .write()
            .expect("storage lock poisoned")
            .set_current_time(time)
    }

    pub fn current_time(&self) -> f64 {
        self.storage.read().expect("storage lock poisoned").current_time()
    }

    pub fn undo(&self) -> GroomResult<bool> {
        let mut undo = self.undo.lock().expect("undo lock poisoned");
        let mut storage = self.storage.write().expect("storage lock poisoned");
        undo.undo(&mut storage)
    }

    pub fn redo(&self) -> GroomResult<bool> {
        let mut undo = self.undo.lock().expect("undo lock poisoned");
        let mut storage = self.storage.write().expect("storage lock poisoned");
        undo.redo(&mut storage)
    }

    pub fn current_segments(&self, id: GuideId) -> Option<SegmentSet> {
        self.storage
            .read()
            .expect("storage lock poisoned")
            .segments(id)
            .cloned()
    }

    /// Snapshot of every guide in the current frame.
    pub fn current_frame(&self) -> Vec<SegmentSet> {
        self.storage
            .read()
            .expect("storage lock poisoned")
            .current()
            .to_vec()
    }

    /// Add or overwrite a time sample of every guide.
    pub fn insert_frame(&self, time: f64, segments: Vec<SegmentSet>) -> GroomResult<()> {
        self.storage
            .write()
            .expect("storage lock poisoned")
            .insert_frame(time, segments)
    }

    pub fn segment_counts(&self) -> Vec<usize> {
        self.topology
            .read()
            .expect("topology lock poisoned")
            .groups
            .segment_counts
            .clone()
    }

    /// Resample every guide to new per-group vertex counts. Clears undo.
    ///
    /// Structural edits assume the pipeline is idle.
    pub fn set_segments_count(&self, segment_counts: Vec<usize>) -> GroomResult<()> {
        let mut undo = self.undo.lock().expect("undo lock poisoned");
        let mut topology = self.topology.write().expect("topology lock poisoned");
        let mut storage = self.storage.write().expect("storage lock poisoned");

        let groups = InterpolationGroups {
            group_of_guide: topology.groups.group_of_guide.clone(),
            segment_counts,
        };
        storage.set_segments_count(&topology.rest_positions, &groups)?;
        topology.groups = groups;
        undo.clear();
        Ok(())
    }

    /// Replace the guide population, re-seeding every new guide from its
    /// nearest old neighbours. Clears undo.
    pub fn rebuild_guides(
        &self,
        rest_positions: Vec<RestPosition>,
        groups: InterpolationGroups,
        frames: Option<Vec<DMat4>>,
    ) -> GroomResult<()> {
        let frames = frames.unwrap_or_else(|| rest_frames(&rest_positions));
        if frames.len() != rest_positions.len() {
            return Err(GroomError::invalid(format!(
                "{} frames for {} guides",
                frames.len(),
                rest_positions.len()
            )));
        }

        let mut undo = self.undo.lock().expect("undo lock poisoned");
        let mut topology = self.topology.write().expect("topology lock poisoned");
        let mut storage = self.storage.write().expect("storage lock poisoned");

        storage.propagate_changes_through_time();
        if topology.forest.is_dirty() {
            let Topology {
                rest_positions,
                groups,
                forest,
                ..
            } = &mut *topology;
            forest.rebuild(rest_positions, groups);
        }

        let rebuilt = SegmentsStorage::reinterpolated(
            &storage,
            &topology.forest,
            &rest_positions,
            &groups,
            &self.config,
        )?;
        *storage = rebuilt;
        *topology = Topology::new(rest_positions, groups, frames);
        undo.clear();
        Ok(())
    }

    /// Delete every guide not listed in `surviving`. Clears undo.
    pub fn remove_guides(&self, surviving: &[GuideId]) -> GroomResult<()> {
        let mut undo = self.undo.lock().expect("undo lock poisoned");
        let mut topology = self.topology.write().expect("topology lock poisoned");
        let mut storage = self.storage.write().expect("storage lock poisoned");

        storage.propagate_changes_through_time();
        let filtered = storage.filtered(surviving)?;
        let rest_positions = surviving
            .iter()
            .map(|id| topology.rest_positions[id.index()])
            .collect();
        let frames = surviving
            .iter()
            .map(|id| topology.frames[id.index()])
            .collect();
        let groups = topology.groups.filtered(surviving);

        *storage = filtered;
        *topology = Topology::new(rest_positions, groups, frames);
        undo.clear();
        info!("Kept {} guides", surviving.len());
        Ok(())
    }

    /// Write every time sample, or the current frame when there are none.
    pub fn export_frames<W: Write>(&self, writer: &mut W) -> GroomResult<()> {
        let records = {
            let mut storage = self.storage.write().expect("storage lock poisoned");
            storage.propagate_changes_through_time();
            if storage.sample_times().is_empty() {
                vec![FrameRecord::new(storage.current_time(), storage.current().to_vec())]
            } else {
                storage
                    .frames()
                    .map(|(time, segments)| FrameRecord::new(time, segments.to_vec()))
                    .collect()
            }
        };
        write_frames(writer, &records)
    }

    /// Load time samples, replacing all guide data.
    ///
    /// Group segment counts and the spatial index are rebuilt from the loaded
    /// data. Clears undo.
    pub fn import_frames<R: Read>(&self, reader: &mut R) -> GroomResult<()> {
        let records = read_frames(reader)?;

        let mut undo = self.undo.lock().expect("undo lock poisoned");
        let mut topology_guard = self.topology.write().expect("topology lock poisoned");
        let mut storage = self.storage.write().expect("storage lock poisoned");
        let topology = &mut *topology_guard;

        let guide_count = topology.rest_positions.len();
        let segment_counts = derive_segment_counts(&records, &topology.groups, guide_count)?;
        let groups = InterpolationGroups {
            group_of_guide: topology.groups.group_of_guide.clone(),
            segment_counts,
        };

        let previous_time = storage.current_time();
        let mut imported = SegmentsStorage::from_frames(records, &self.config)?;
        imported.set_current_time(previous_time)?;

        topology.forest.set_dirty();
        topology.forest.rebuild(&topology.rest_positions, &groups);
        topology.groups = groups;
        *storage = imported;
        undo.clear();
        info!(
            "Imported {} samples for {guide_count} guides",
            storage.sample_times().len()
        );
        Ok(())
    }
}

/// Per-group vertex counts implied by imported records.
///
/// Every guide of a group must have the same count in every record. Groups
/// without guides keep their previous count.
fn derive_segment_counts(
    records: &[FrameRecord],
    groups: &InterpolationGroups,
    guide_count: usize,
) -> GroomResult<Vec<usize>> {
    let mut counts: Vec<Option<usize>> = vec![None; groups.group_count()];
    for record in records {
        if record.segments.len() != guide_count {
            return Err(GroomError::Format(format!(
                "sample at {} has {} guides, object has {guide_count}",
                record.time,
                record.segments.len()
            )));
        }
        for (index, set) in record.segments.iter().enumerate() {
            let group = groups.group_of(GuideId::from_index(index));
            match counts[group] {
                None => counts[group] = Some(set.vertex_count()),
                Some(count) if count == set.vertex_count() => {}
                Some(count) => {
                    return Err(GroomError::Format(format!(
                        "guide {index} has {} vertices, group {group} uses {count}",
                        set.vertex_count()
                    )));
                }
            }
        }
    }
    Ok(counts
        .into_iter()
        .zip(&groups.segment_counts)
        .map(|(derived, &previous)| derived.unwrap_or(previous))
        .collect())
}
