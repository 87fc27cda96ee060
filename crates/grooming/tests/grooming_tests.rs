//! End-to-end editing through the public API.

use std::sync::Arc;

use glam::{DMat4, DVec3, Vec3};
use grooming::deformation::apply_translate;
use grooming::{
    BrushCommand, BrushInput, BrushMode, GroomConfig, GroomError, GroomObject, GuideId,
    InterpolationGroups, RestPosition, SegmentSet, SelectedGuide, TaskPipeline,
};

fn config_with_length(length: f64) -> GroomConfig {
    let mut config = GroomConfig::default();
    config.interpolation.nominal_guide_length = length;
    config
}

fn roots(count: usize) -> Vec<RestPosition> {
    (0..count)
        .map(|i| RestPosition::new(Vec3::new(i as f32 * 2.0, 0.0, 0.0), i as f32, 0.0))
        .collect()
}

/// Unit segments, five vertices per guide.
fn object(count: usize) -> Arc<GroomObject> {
    Arc::new(
        GroomObject::new(
            roots(count),
            InterpolationGroups::single(count, 5),
            config_with_length(4.0),
        )
        .unwrap(),
    )
}

fn edge_lengths(set: &SegmentSet) -> Vec<f64> {
    set.vertices
        .windows(2)
        .map(|edge| edge[0].distance(edge[1]))
        .collect()
}

#[test]
fn test_translate_tip_restores_lengths() {
    let mut guide = SelectedGuide::new(
        GuideId(0),
        SegmentSet::straight(5, 1.0).unwrap(),
        DMat4::IDENTITY,
    );
    for k in 2..5 {
        guide.info[k].inside_brush = true;
        guide.info[k].fall_off = 1.0;
    }

    let input = BrushInput::new(DVec3::new(0.3, 0.0, 0.0), 0.0, false);
    apply_translate(&mut guide, &input);
    assert_eq!(guide.segments.vertices[1], DVec3::Z);
    assert!((guide.segments.vertices[2].x - 0.3).abs() < 1e-12);

    grooming::solver::solve_guide(&mut guide, &GroomConfig::default().solver).unwrap();

    let lengths = edge_lengths(&guide.segments);
    assert!((lengths[0] - 1.0).abs() < 1e-5);
    assert!((lengths[1] - 1.0).abs() < 1e-5);
    assert_eq!(guide.segments.vertices[0], DVec3::ZERO);
    assert!((guide.segments.total_length() - 4.0).abs() < 1e-4);
}

#[test]
fn test_submitted_edit_persists_and_undoes() {
    let object = object(2);
    let pipeline = TaskPipeline::new();
    let before = object.current_frame();

    let command = BrushCommand::new(BrushMode::Translate, vec![GuideId(0)], [0.3, 0.0, 0.0]);
    let selection = object.submit(&pipeline, &command).unwrap();
    pipeline.wait_until_idle();

    assert!(selection.lock().unwrap().iter().all(|guide| !guide.dirty));
    let edited = object.current_segments(GuideId(0)).unwrap();
    assert_ne!(edited, before[0]);
    assert_eq!(edited.root(), DVec3::ZERO);
    assert!(edited.max_length_error() < 1e-5);
    assert!(edited.vertices[4].x > 0.0);
    assert_eq!(object.current_segments(GuideId(1)).unwrap(), before[1]);

    assert!(object.undo().unwrap());
    assert_eq!(object.current_frame(), before);
    assert!(object.redo().unwrap());
    assert_eq!(object.current_segments(GuideId(0)).unwrap(), edited);
}

#[test]
fn test_footprint_from_json_limits_the_edit() {
    let object = object(1);
    let pipeline = TaskPipeline::new();

    // Brush around the tip: only the last two vertices fall inside.
    let command: BrushCommand = serde_json::from_str(
        r#"{
            "brush_id": 0,
            "guide_ids": [0],
            "displacement": [0.5, 0.0, 0.0],
            "elapsed_time": 0.0,
            "fall_off_enabled": true,
            "collision_enabled": false,
            "footprint": { "center": [0.0, 0.0, 4.0], "radius": 1.5, "falloff": "Linear" }
        }"#,
    )
    .unwrap();
    assert_eq!(command.mode().unwrap(), BrushMode::Translate);

    let selection = object.submit(&pipeline, &command).unwrap();
    {
        let guides = selection.lock().unwrap();
        let inside: Vec<bool> = guides[0].info.iter().map(|info| info.inside_brush).collect();
        assert_eq!(inside, vec![false, false, false, true, true]);
    }
    pipeline.wait_until_idle();

    let edited = object.current_segments(GuideId(0)).unwrap();
    assert_eq!(edited.root(), DVec3::ZERO);
    assert!(edited.vertices[4].x > 0.0);
    assert!(edited.vertices[1].x.abs() < edited.vertices[4].x);
    assert!(edited.max_length_error() < 1e-5);
}

#[test]
fn test_unknown_brush_id_is_rejected() {
    let object = object(1);
    let pipeline = TaskPipeline::new();
    let mut command = BrushCommand::new(BrushMode::Scale, vec![GuideId(0)], [0.0; 3]);
    command.brush_id = 7;
    assert!(matches!(
        object.submit(&pipeline, &command),
        Err(GroomError::UnknownBrush(7))
    ));
}

fn bent() -> SegmentSet {
    SegmentSet::from_vertices(vec![
        DVec3::ZERO,
        DVec3::new(0.0, 0.0, 0.5),
        DVec3::new(0.5, 0.0, 0.5),
    ])
    .unwrap()
}

/// One guide of three vertices with samples at t = 0 (straight) and t = 2 (bent).
fn animated() -> GroomObject {
    let object = GroomObject::new(
        roots(1),
        InterpolationGroups::single(1, 3),
        GroomConfig::default(),
    )
    .unwrap();
    object
        .insert_frame(0.0, vec![SegmentSet::straight(3, 0.5).unwrap()])
        .unwrap();
    object.insert_frame(2.0, vec![bent()]).unwrap();
    object
}

#[test]
fn test_time_between_samples_blends() {
    let object = animated();

    object.set_current_time(1.0).unwrap();
    let midway = object.current_segments(GuideId(0)).unwrap();
    assert_eq!(midway.vertex_count(), 3);
    assert_eq!(midway.root(), DVec3::ZERO);
    assert!(midway.max_length_error() < 1e-4);
    assert!(midway.vertices[2].x > 0.0 && midway.vertices[2].x < 0.5);

    object.set_current_time(2.0).unwrap();
    assert_eq!(object.current_segments(GuideId(0)).unwrap(), bent());
}

#[test]
fn test_time_outside_samples_clamps() {
    let object = animated();

    object.set_current_time(10.0).unwrap();
    assert_eq!(object.current_segments(GuideId(0)).unwrap(), bent());
    object.set_current_time(-3.0).unwrap();
    assert_eq!(
        object.current_segments(GuideId(0)).unwrap(),
        SegmentSet::straight(3, 0.5).unwrap()
    );
    assert_eq!(object.current_time(), -3.0);
}

#[test]
fn test_edit_ripples_into_nearby_samples_only() {
    let object = animated();
    object
        .insert_frame(10.0, vec![SegmentSet::straight(3, 0.5).unwrap()])
        .unwrap();
    object.set_current_time(0.0).unwrap();

    let mut guides = object.select(&[GuideId(0)], None).unwrap();
    for vertex in guides[0].segments.vertices.iter_mut().skip(1) {
        *vertex += DVec3::new(0.0, 0.2, 0.0);
    }
    guides[0].mark_dirty();
    object.persist_edit(&mut guides);
    let edited = object.current_segments(GuideId(0)).unwrap();

    // Sample two units away keeps 60% of the edit.
    object.set_current_time(2.0).unwrap();
    let rippled = object.current_segments(GuideId(0)).unwrap();
    assert_ne!(rippled, bent());
    assert_ne!(rippled, edited);
    assert!(rippled.vertices[2].y > 0.0);
    assert!(rippled.max_length_error() < 1e-4);

    // Sample ten units away is beyond the ripple.
    object.set_current_time(10.0).unwrap();
    assert_eq!(
        object.current_segments(GuideId(0)).unwrap(),
        SegmentSet::straight(3, 0.5).unwrap()
    );

    // The edited sample itself took the edit verbatim.
    object.set_current_time(0.0).unwrap();
    assert_eq!(object.current_segments(GuideId(0)).unwrap(), edited);
}

#[test]
fn test_export_import_keeps_every_sample() {
    let source = animated();
    let mut bytes = Vec::new();
    source.export_frames(&mut bytes).unwrap();

    let target = GroomObject::new(
        roots(1),
        InterpolationGroups::single(1, 8),
        GroomConfig::default(),
    )
    .unwrap();
    target.import_frames(&mut bytes.as_slice()).unwrap();
    assert_eq!(target.segment_counts(), vec![3]);

    for time in [0.0, 1.0, 2.0] {
        source.set_current_time(time).unwrap();
        target.set_current_time(time).unwrap();
        assert_eq!(target.current_frame(), source.current_frame());
    }
}

