//! Binary frame records.
//!
//! Layout, native byte order, no padding:
//!
//! ```text
//! frame   := time: f64, guide_count: u32, guide_count * guide
//! guide   := segment_length: f64, vertex_count: u32, vertex_count * (x, y, z: f64)
//! ```
//!
//! Frames are written back to back; a reader stops cleanly at end of stream.

use std::io::{ErrorKind, Read, Write};

use glam::DVec3;
use tracing::debug;

use crate::error::{GroomError, GroomResult};
use crate::segments::SegmentSet;

/// Upper bound on guides per record, to reject garbage before allocating.
pub const MAX_GUIDES_PER_FRAME: u32 = 1 << 24;

/// Upper bound on vertices per guide.
pub const MAX_VERTICES_PER_GUIDE: u32 = 1 << 16;

/// Guides reserved up front; larger frames grow as records arrive.
const PREALLOCATED_GUIDES: usize = 1024;

const VERTEX_BYTES: usize = std::mem::size_of::<DVec3>();

/// One time sample of every guide.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameRecord {
    pub time: f64,
    pub segments: Vec<SegmentSet>,
}

impl FrameRecord {
    pub fn new(time: f64, segments: Vec<SegmentSet>) -> Self {
        Self { time, segments }
    }
}

pub fn write_frame<W: Write>(writer: &mut W, frame: &FrameRecord) -> GroomResult<()> {
    writer.write_all(&frame.time.to_ne_bytes())?;
    writer.write_all(&count_u32(frame.segments.len(), "guide")?.to_ne_bytes())?;
    for set in &frame.segments {
        writer.write_all(&set.segment_length.to_ne_bytes())?;
        writer.write_all(&count_u32(set.vertex_count(), "vertex")?.to_ne_bytes())?;
        writer.write_all(bytemuck::cast_slice(&set.vertices))?;
    }
    Ok(())
}

pub fn write_frames<W: Write>(writer: &mut W, frames: &[FrameRecord]) -> GroomResult<()> {
    for frame in frames {
        write_frame(writer, frame)?;
    }
    debug!("wrote {} frame records", frames.len());
    Ok(())
}

/// Read one record. `Ok(None)` at a clean end of stream.
pub fn read_frame<R: Read>(reader: &mut R) -> GroomResult<Option<FrameRecord>> {
    let mut time = [0u8; 8];
    if !read_or_eof(reader, &mut time)? {
        return Ok(None);
    }
    let time = f64::from_ne_bytes(time);

    let guide_count = read_u32(reader)?;
    if guide_count > MAX_GUIDES_PER_FRAME {
        return Err(GroomError::Format(format!(
            "frame at {time} claims {guide_count} guides"
        )));
    }

    let mut segments = Vec::with_capacity((guide_count as usize).min(PREALLOCATED_GUIDES));
    for guide in 0..guide_count {
        let segment_length = read_f64(reader)?;
        let vertex_count = read_u32(reader)?;
        if !(2..=MAX_VERTICES_PER_GUIDE).contains(&vertex_count) {
            return Err(GroomError::Format(format!(
                "guide {guide} at {time} has {vertex_count} vertices"
            )));
        }

        let mut bytes = vec![0u8; vertex_count as usize * VERTEX_BYTES];
        read_exact(reader, &mut bytes)?;
        let vertices = bytes
            .chunks_exact(VERTEX_BYTES)
            .map(bytemuck::pod_read_unaligned::<DVec3>)
            .collect();

        segments.push(SegmentSet {
            vertices,
            segment_length,
        });
    }

    Ok(Some(FrameRecord { time, segments }))
}

/// Read records until the stream ends.
pub fn read_frames<R: Read>(reader: &mut R) -> GroomResult<Vec<FrameRecord>> {
    let mut frames = Vec::new();
    while let Some(frame) = read_frame(reader)? {
        frames.push(frame);
    }
    debug!("read {} frame records", frames.len());
    Ok(frames)
}

fn count_u32(count: usize, what: &str) -> GroomResult<u32> {
    u32::try_from(count).map_err(|_| GroomError::Format(format!("{what} count {count} overflows u32")))
}

fn read_u32<R: Read>(reader: &mut R) -> GroomResult<u32> {
    let mut bytes = [0u8; 4];
    read_exact(reader, &mut bytes)?;
    Ok(u32::from_ne_bytes(bytes))
}

fn read_f64<R: Read>(reader: &mut R) -> GroomResult<f64> {
    let mut bytes = [0u8; 8];
    read_exact(reader, &mut bytes)?;
    Ok(f64::from_ne_bytes(bytes))
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> GroomResult<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        ErrorKind::UnexpectedEof => GroomError::Format("truncated frame record".to_string()),
        _ => GroomError::Io(err),
    })
}

/// Fill `buf`, or report a clean end of stream when nothing was available.
fn read_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> GroomResult<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(GroomError::Format("truncated frame record".to_string())),
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<FrameRecord> {
        vec![
            FrameRecord::new(0.0, vec![
                SegmentSet::straight(3, 0.5).unwrap(),
                SegmentSet::from_vertices(vec![DVec3::ZERO, DVec3::new(0.1, -0.2, 0.9)]).unwrap(),
            ]),
            FrameRecord::new(1.5, vec![
                SegmentSet::straight(3, 0.25).unwrap(),
                SegmentSet::straight(2, 2.0).unwrap(),
            ]),
        ]
    }

    #[test]
    fn test_record_layout() {
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &sample()[0]).unwrap();
        // time + count, then per guide length + count + vertices
        assert_eq!(bytes.len(), 8 + 4 + (8 + 4 + 3 * 24) + (8 + 4 + 2 * 24));
        assert_eq!(&bytes[..8], &0.0f64.to_ne_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_ne_bytes());
        assert_eq!(&bytes[12..20], &0.5f64.to_ne_bytes());
    }

    #[test]
    fn test_stream_of_frames() {
        let frames = sample();
        let mut bytes = Vec::new();
        write_frames(&mut bytes, &frames).unwrap();
        let read = read_frames(&mut bytes.as_slice()).unwrap();
        assert_eq!(read, frames);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let mut bytes = Vec::new();
        write_frames(&mut bytes, &sample()).unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            read_frames(&mut bytes.as_slice()),
            Err(GroomError::Format(_))
        ));

        let partial_header = [0u8; 3];
        assert!(matches!(
            read_frame(&mut partial_header.as_slice()),
            Err(GroomError::Format(_))
        ));
    }

    #[test]
    fn test_oversized_header_without_body_is_truncated() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.0f64.to_ne_bytes());
        bytes.extend_from_slice(&MAX_GUIDES_PER_FRAME.to_ne_bytes());
        assert!(matches!(
            read_frame(&mut bytes.as_slice()),
            Err(GroomError::Format(_))
        ));

        bytes.truncate(8);
        bytes.extend_from_slice(&(MAX_GUIDES_PER_FRAME + 1).to_ne_bytes());
        assert!(matches!(
            read_frame(&mut bytes.as_slice()),
            Err(GroomError::Format(_))
        ));
    }

    #[test]
    fn test_short_guide_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.0f64.to_ne_bytes());
        bytes.extend_from_slice(&1u32.to_ne_bytes());
        bytes.extend_from_slice(&1.0f64.to_ne_bytes());
        bytes.extend_from_slice(&1u32.to_ne_bytes());
        bytes.extend_from_slice(&[0u8; 24]);
        assert!(matches!(
            read_frame(&mut bytes.as_slice()),
            Err(GroomError::Format(_))
        ));
    }

    #[test]
    fn test_empty_stream() {
        let empty: &[u8] = &[];
        assert!(read_frames(&mut { empty }).unwrap().is_empty());
    }
}
