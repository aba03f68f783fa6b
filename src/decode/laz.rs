//! LAZ payloads, decompressed by the `las` crate codec.

use super::las::LasPoint;
use super::{DecodeError, DecodeResult};
use crate::point::PointBatch;
use glam::DVec3;

/// Decompress a LAZ buffer into a batch translated by `translation`.
#[cfg(feature = "laz")]
pub fn decode_laz(buffer: &[u8], translation: DVec3) -> DecodeResult<PointBatch> {
    use std::io::Cursor;

    let mut reader = las::Reader::new(Cursor::new(buffer.to_vec()))
        .map_err(|e| DecodeError::Codec(e.to_string()))?;

    let total = reader.header().number_of_points() as usize;
    let mut points = Vec::with_capacity(total);
    for point in reader.points() {
        let point = point.map_err(|e| DecodeError::Codec(e.to_string()))?;
        points.push(LasPoint {
            position: DVec3::new(point.x, point.y, point.z),
            intensity: point.intensity,
            return_number: point.return_number,
            number_of_returns: point.number_of_returns,
            classification: u8::from(point.classification),
            source_id: point.point_source_id,
            gps_time: point.gps_time,
            color: point.color.map(|c| [c.red, c.green, c.blue]),
        });
    }

    tracing::trace!(points = points.len(), "decompressed LAZ payload");
    Ok(super::las::points_to_batch(&points, translation))
}

#[cfg(not(feature = "laz"))]
pub fn decode_laz(_buffer: &[u8], _translation: DVec3) -> DecodeResult<PointBatch> {
    Err(DecodeError::CodecUnavailable)
}
