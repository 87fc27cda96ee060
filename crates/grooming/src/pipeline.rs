//! Background task pipeline for guide edits.
//!
//! The interactive thread enqueues [`GuideTask`]s; a single worker thread
//! drains them in FIFO order. Per task the worker:
//!
//! 1. re-reads the selected guides from the owner, so an edit queued behind
//!    another edit of the same guide starts from that edit's result
//! 2. applies the brush to the selected guides
//! 3. flags vertices that crossed the collision surface, when enabled
//! 4. projects every guide back onto its length and contact constraints
//! 5. hands the result to the owning object, which writes it to the store
//!
//! The queue and the running flag have separate locks. Enqueueing never holds
//! both; a finishing worker re-checks the queue while holding the running
//! lock so no task is stranded between the two.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use tracing::{debug, trace, warn};

use crate::brush::{BrushFootprint, BrushInput};
use crate::collision::detect_collisions;
use crate::deformation::apply_brush;
use crate::error::{GroomError, GroomResult};
use crate::object::GroomObject;
use crate::selection::SharedSelection;
use crate::solver::solve_guide;
use crate::types::BrushMode;

/// One queued edit.
pub struct GuideTask {
    pub brush: BrushMode,
    /// Guides the task edits. Locked by the worker for the whole task.
    pub selection: SharedSelection,
    pub input: BrushInput,
    pub collision_enabled: bool,
    /// Re-applied when the selection is refreshed at dequeue time.
    pub footprint: Option<BrushFootprint>,
    /// Receives the solved guides.
    pub owner: Arc<GroomObject>,
}

impl GuideTask {
    pub fn new(
        brush: BrushMode,
        selection: SharedSelection,
        input: BrushInput,
        collision_enabled: bool,
        owner: Arc<GroomObject>,
    ) -> Self {
        Self {
            brush,
            selection,
            input,
            collision_enabled,
            footprint: None,
            owner,
        }
    }

    pub fn with_footprint(mut self, footprint: Option<BrushFootprint>) -> Self {
        self.footprint = footprint;
        self
    }
}

#[derive(Default)]
struct PipelineShared {
    queue: Mutex<VecDeque<GuideTask>>,
    running: Mutex<bool>,
    /// Signalled when the worker stops.
    idle: Condvar,
    processed: AtomicU64,
}

impl PipelineShared {
    fn pop(&self) -> Option<GuideTask> {
        self.queue.lock().expect("task queue lock poisoned").pop_front()
    }

    /// Clear the running flag unless work arrived in the meantime.
    fn try_finish(&self) -> bool {
        let mut running = self.running.lock().expect("worker flag lock poisoned");
        if !self.queue.lock().expect("task queue lock poisoned").is_empty() {
            return false;
        }
        *running = false;
        self.idle.notify_all();
        true
    }
}

/// Clears the running flag if the worker unwinds.
struct RunningGuard(Arc<PipelineShared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            let mut running = self.0.running.lock().unwrap_or_else(PoisonError::into_inner);
            *running = false;
            self.0.idle.notify_all();
        }
    }
}

/// Task queue with at most one worker thread.
///
/// Cheap to clone; clones share the queue and the worker.
#[derive(Clone, Default)]
pub struct TaskPipeline {
    shared: Arc<PipelineShared>,
}

impl TaskPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a task and make sure a worker is running.
    ///
    /// If the worker cannot be started the error is returned and the task
    /// stays queued for the next successful call.
    pub fn enqueue_task(&self, task: GuideTask) -> GroomResult<()> {
        trace!("Enqueue {:?} task", task.brush);
        self.shared
            .queue
            .lock()
            .expect("task queue lock poisoned")
            .push_back(task);
        self.ensure_worker()
    }

    fn ensure_worker(&self) -> GroomResult<()> {
        let mut running = self.shared.running.lock().expect("worker flag lock poisoned");
        if *running {
            return Ok(());
        }
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("guide-worker".into())
            .spawn(move || run_worker(shared))
            .map_err(GroomError::WorkerSpawn)?;
        *running = true;
        debug!("Started guide worker");
        Ok(())
    }

    /// Drop queued tasks that have not started. Returns how many were dropped.
    pub fn purge_accumulator(&self) -> usize {
        let mut queue = self.shared.queue.lock().expect("task queue lock poisoned");
        let purged = queue.len();
        queue.clear();
        if purged > 0 {
            debug!("Purged {purged} queued tasks");
        }
        purged
    }

    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().expect("task queue lock poisoned").len()
    }

    pub fn is_running(&self) -> bool {
        *self.shared.running.lock().expect("worker flag lock poisoned")
    }

    /// Tasks completed since the pipeline was created.
    pub fn processed_tasks(&self) -> u64 {
        self.shared.processed.load(Ordering::Acquire)
    }

    /// Block until the worker has drained the queue and stopped.
    pub fn wait_until_idle(&self) {
        let mut running = self.shared.running.lock().expect("worker flag lock poisoned");
        while *running {
            running = self
                .shared
                .idle
                .wait(running)
                .expect("worker flag lock poisoned");
        }
    }
}

fn run_worker(shared: Arc<PipelineShared>) {
    let _guard = RunningGuard(Arc::clone(&shared));
    loop {
        match shared.pop() {
            Some(task) => {
                process_task(task);
                shared.processed.fetch_add(1, Ordering::Release);
            }
            None => {
                if shared.try_finish() {
                    debug!("Guide worker idle");
                    return;
                }
            }
        }
    }
}

fn process_task(task: GuideTask) {
    let GuideTask {
        brush,
        selection,
        input,
        collision_enabled,
        footprint,
        owner,
    } = task;

    let mut guides = selection.lock().unwrap_or_else(PoisonError::into_inner);
    let ids: Vec<_> = guides.iter().map(|guide| guide.id).collect();
    match owner.select(&ids, footprint.as_ref()) {
        Ok(fresh) => *guides = fresh,
        Err(err) => {
            warn!("{brush:?} task dropped: {err}");
            return;
        }
    }
    let config = owner.config();

    apply_brush(brush, &mut guides, &input, &config.brush);

    if collision_enabled {
        if let Some(surface) = owner.collision_surface() {
            for guide in guides.iter_mut() {
                detect_collisions(guide, surface.as_ref());
            }
        }
    }

    for guide in guides.iter_mut() {
        match solve_guide(guide, &config.solver) {
            Ok(report) if !report.converged => trace!(
                "guide {:?} stopped after {} iterations at residual {:.3e}",
                guide.id, report.iterations, report.residual
            ),
            Ok(_) => {}
            Err(err) => warn!("guide {:?} left unsolved: {err}", guide.id),
        }
    }

    owner.persist_edit(&mut guides);
    debug!("{brush:?} task finished for {} guides", guides.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brush::BrushCommand;
    use crate::collision::SphereSurface;
    use crate::selection::SelectedGuide;
    use crate::types::{GuideId, InterpolationGroups, RestPosition};
    use glam::{DVec3, Vec3};
    use groom_config::GroomConfig;
    use std::time::Duration;

    fn object() -> Arc<GroomObject> {
        Arc::new(
            GroomObject::new(
                vec![RestPosition::new(Vec3::ZERO, 0.0, 0.0)],
                InterpolationGroups::single(1, 5),
                GroomConfig::default(),
            )
            .unwrap(),
        )
    }

    fn selection(owner: &GroomObject) -> SharedSelection {
        Arc::new(Mutex::new(owner.select(&[GuideId(0)], None).unwrap()))
    }

    fn task(owner: &Arc<GroomObject>, selection: &SharedSelection, brush: BrushMode, drag: DVec3) -> GuideTask {
        GuideTask::new(
            brush,
            Arc::clone(selection),
            BrushInput::new(drag, 0.0, false),
            false,
            Arc::clone(owner),
        )
    }

    #[test]
    fn test_tasks_run_in_order() {
        let owner = object();
        let pipeline = TaskPipeline::new();
        let shared = selection(&owner);

        // Hold the selection so both tasks are queued before either runs.
        let held = shared.lock().unwrap();
        pipeline
            .enqueue_task(task(&owner, &shared, BrushMode::Translate, DVec3::X))
            .unwrap();
        pipeline
            .enqueue_task(task(&owner, &shared, BrushMode::PuffEnd, DVec3::X))
            .unwrap();
        drop(held);
        pipeline.wait_until_idle();

        // Puff after translate straightens the guide again.
        let guide = owner.current_segments(GuideId(0)).unwrap();
        assert!(guide.vertices[4].x.abs() < 1e-9);
        assert_eq!(guide.vertices[0], DVec3::ZERO);
        assert_eq!(pipeline.processed_tasks(), 2);
        assert!(!pipeline.is_running());
    }

    #[test]
    fn test_purge_drops_only_unstarted_tasks() {
        let owner = object();
        let pipeline = TaskPipeline::new();
        let shared = selection(&owner);

        let held = shared.lock().unwrap();
        pipeline
            .enqueue_task(task(&owner, &shared, BrushMode::Translate, DVec3::X))
            .unwrap();
        while pipeline.pending_tasks() > 0 {
            thread::sleep(Duration::from_millis(1));
        }
        // The first task is in flight, blocked on the selection.
        for _ in 0..2 {
            pipeline
                .enqueue_task(task(&owner, &shared, BrushMode::Translate, DVec3::Y))
                .unwrap();
        }
        assert_eq!(pipeline.purge_accumulator(), 2);
        drop(held);
        pipeline.wait_until_idle();

        assert_eq!(pipeline.processed_tasks(), 1);
        let guide = owner.current_segments(GuideId(0)).unwrap();
        assert!(guide.vertices[4].x > 0.0);
        assert!(guide.vertices[4].y.abs() < 1e-12);
    }

    #[test]
    fn test_worker_restarts_after_idle() {
        let owner = object();
        let pipeline = TaskPipeline::new();
        for _ in 0..2 {
            let shared = selection(&owner);
            pipeline
                .enqueue_task(task(&owner, &shared, BrushMode::Translate, DVec3::X * 0.1))
                .unwrap();
            pipeline.wait_until_idle();
            assert!(!pipeline.is_running());
            assert!(shared.lock().unwrap().iter().all(|guide: &SelectedGuide| !guide.dirty));
        }
        assert_eq!(pipeline.processed_tasks(), 2);
    }

    #[test]
    fn test_queued_submits_build_on_each_other() {
        let owner = object();
        let pipeline = TaskPipeline::new();

        // Keep the worker busy so both submits queue up behind it.
        let blocker = selection(&owner);
        let held = blocker.lock().unwrap();
        pipeline
            .enqueue_task(task(&owner, &blocker, BrushMode::Translate, DVec3::ZERO))
            .unwrap();
        while pipeline.pending_tasks() > 0 {
            thread::sleep(Duration::from_millis(1));
        }

        for drag in [[0.3, 0.0, 0.0], [0.0, 0.3, 0.0]] {
            let command = BrushCommand::new(BrushMode::Translate, vec![GuideId(0)], drag);
            owner.submit(&pipeline, &command).unwrap();
        }
        drop(held);
        pipeline.wait_until_idle();

        let tip = owner.current_segments(GuideId(0)).unwrap().vertices[4];
        assert!(tip.x > 0.01, "first edit lost: {tip}");
        assert!(tip.y > 0.01, "second edit lost: {tip}");
        assert_eq!(pipeline.processed_tasks(), 3);
    }

    #[test]
    fn test_singular_guide_does_not_stall_the_queue() {
        let owner = Arc::new(
            GroomObject::new(
                vec![
                    RestPosition::new(Vec3::ZERO, 0.0, 0.0),
                    RestPosition::new(Vec3::new(2.0, 0.0, 0.0), 1.0, 0.0),
                ],
                InterpolationGroups::single(2, 5),
                GroomConfig::default(),
            )
            .unwrap(),
        );

        // Two coincident vertices leave guide 0 without a usable gradient.
        let mut stored = owner.select(&[GuideId(0)], None).unwrap();
        let root = stored[0].segments.root();
        stored[0].segments.vertices = [0.0, 0.25, 0.25, 0.5, 0.75]
            .into_iter()
            .map(|height| root + DVec3::Z * height)
            .collect();
        stored[0].mark_dirty();
        owner.persist_edit(&mut stored);

        let pipeline = TaskPipeline::new();
        let both = Arc::new(Mutex::new(
            owner.select(&[GuideId(0), GuideId(1)], None).unwrap(),
        ));
        pipeline
            .enqueue_task(task(&owner, &both, BrushMode::Translate, DVec3::X * 0.2))
            .unwrap();
        pipeline.wait_until_idle();

        assert_eq!(pipeline.processed_tasks(), 1);
        assert!(!pipeline.is_running());

        let healthy = owner.current_segments(GuideId(1)).unwrap();
        assert!(healthy.max_length_error() < 1e-5);
        assert!(healthy.vertices[4].x > 0.0);

        let singular = owner.current_segments(GuideId(0)).unwrap();
        assert_eq!(singular.vertices[1], singular.vertices[2]);
        assert!(both.lock().unwrap().iter().all(|guide| !guide.dirty));
    }

    #[test]
    fn test_collision_enabled_task_pushes_out_of_surface() {
        let owner = object();
        // Swallows the middle vertex (0, 0, 0.5) only.
        let center = DVec3::new(0.05, 0.0, 0.55);
        owner.set_collision_surface(Some(Arc::new(SphereSurface::new(center, 0.1))));
        let pipeline = TaskPipeline::new();
        let shared = selection(&owner);

        let mut still = task(&owner, &shared, BrushMode::Translate, DVec3::ZERO);
        still.collision_enabled = true;
        pipeline.enqueue_task(still).unwrap();
        pipeline.wait_until_idle();

        let guide = owner.current_segments(GuideId(0)).unwrap();
        assert_eq!(guide.vertices[0], DVec3::ZERO);
        assert!(guide.vertices[2].distance(center) > 0.1 - 1e-3);
        assert!(guide.max_length_error() < 1e-3);
    }
}
