//! Hair guide grooming core.
//!
//! This crate edits thousands of polyline guides anchored to a deforming
//! surface:
//! - Brush-based editing (Translate, Rotate, Clump, Puff, Scale, Cut)
//! - An iterative constraint solver that keeps segment lengths fixed and
//!   pushes vertices out of the host surface
//! - A per-group nearest-neighbour forest used to re-seed guides when the
//!   guide population changes
//! - A temporal segment store with interpolation, undo/redo replacement and
//!   ripple of edits into neighbouring time samples
//!
//! # Architecture
//!
//! Editing never runs on the interactive thread. A selection is turned into a
//! task and handed to the [`pipeline::TaskPipeline`], whose single background
//! worker applies the brush, detects collisions, runs the solver and finally
//! asks the owning [`object::GroomObject`] to persist the change.
//!
//! ## Key Components
//!
//! - **Segments**: one guide's vertices plus its nominal segment length
//! - **Spatial**: nearest-neighbour forest over rest roots
//! - **Storage**: frames of segments, current-frame cache, persistence codec
//! - **Solver**: inextensibility + non-penetration projection
//! - **Brush / Deformation**: brush input and the per-mode algorithms
//! - **Pipeline**: FIFO task queue with one worker

pub mod brush;
pub mod collision;
pub mod deformation;
pub mod error;
pub mod object;
pub mod pipeline;
pub mod segments;
pub mod selection;
pub mod solver;
pub mod spatial;
pub mod storage;
pub mod types;
pub mod undo;

pub use groom_config::GroomConfig;

pub use brush::{BrushCommand, BrushFootprint, BrushInput, FalloffCurve};
pub use collision::{HostSurface, PlaneSurface, SphereSurface};
pub use error::{GroomError, GroomResult, SolverError};
pub use object::GroomObject;
pub use pipeline::{GuideTask, TaskPipeline};
pub use segments::SegmentSet;
pub use selection::{SegmentAdditionalInfo, SelectedGuide, SharedSelection};
pub use spatial::NearestNeighborForest;
pub use storage::{FrameRecord, PartialStorage, SegmentsStorage};
pub use types::{BrushMode, GuideId, InterpolationGroups, REST_AXIS, RestPosition};
pub use undo::UndoStack;
