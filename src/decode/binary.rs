//! Fixed-stride binary point payloads of the Potree octree format.

use super::normals::{decode_oct16, decode_sphere_mapped};
use super::{DecodeError, DecodeResult};
use crate::octree::point_attributes::{AttributeName, PointAttributes};
use crate::point::{BatchStats, PointBatch, sequential_indices};
use crate::version::Version;
use byteorder::{ByteOrder, LittleEndian};
use glam::{DVec3, Vec3};

/// Per-node parameters for [`decode_binary`].
#[derive(Debug, Clone, Copy)]
pub struct BinaryDecodeParams {
    /// Quantization unit of integer coordinates.
    pub scale: f64,
    /// Added to every decoded position.
    pub offset: DVec3,
    pub version: Version,
}

impl BinaryDecodeParams {
    /// Formats newer than 1.3 store positions as scaled `u32` triplets.
    pub fn quantized_positions(&self) -> bool {
        self.version.newer_than((1, 3))
    }
}

/// Decode `buffer` laid out as `schema` records.
///
/// The point count is `buffer.len() / schema.byte_size()`; a trailing partial
/// record is an error.
pub fn decode_binary(
    buffer: &[u8],
    schema: &PointAttributes,
    params: &BinaryDecodeParams,
) -> DecodeResult<PointBatch> {
    let stride = schema.byte_size();
    if stride == 0 {
        return Err(DecodeError::InvalidFormat {
            context: "binary schema",
            detail: "point attributes have no size".to_string(),
        });
    }
    if buffer.len() % stride != 0 {
        let num_points = buffer.len() / stride + 1;
        return Err(DecodeError::BufferTooSmall {
            expected: num_points * stride,
            actual: buffer.len(),
        });
    }

    let num_points = buffer.len() / stride;
    let record = |i: usize, offset: usize, len: usize| {
        let start = i * stride + offset;
        &buffer[start..start + len]
    };

    let mut batch = PointBatch {
        indices: sequential_indices(num_points),
        ..Default::default()
    };

    for (offset, attribute) in schema.with_offsets() {
        match attribute.name {
            AttributeName::PositionCartesian => {
                let mut stats = BatchStats::new(num_points);
                let mut positions = Vec::with_capacity(num_points);
                let quantized = params.quantized_positions();

                for i in 0..num_points {
                    let bytes = record(i, offset, 12);
                    let stored = if quantized {
                        DVec3::new(
                            f64::from(LittleEndian::read_u32(&bytes[0..4])),
                            f64::from(LittleEndian::read_u32(&bytes[4..8])),
                            f64::from(LittleEndian::read_u32(&bytes[8..12])),
                        ) * params.scale
                    } else {
                        DVec3::new(
                            f64::from(LittleEndian::read_f32(&bytes[0..4])),
                            f64::from(LittleEndian::read_f32(&bytes[4..8])),
                            f64::from(LittleEndian::read_f32(&bytes[8..12])),
                        )
                    };
                    let position = stored + params.offset;

                    stats.add(position);
                    positions.push(position.as_vec3());
                }

                let (tight_bounding_box, mean) = stats.finish();
                batch.positions = positions;
                batch.tight_bounding_box = tight_bounding_box;
                batch.mean = mean;
            }
            AttributeName::ColorPacked => {
                batch.colors = Some(
                    (0..num_points)
                        .map(|i| {
                            let b = record(i, offset, 4);
                            [b[0], b[1], b[2], b[3]]
                        })
                        .collect(),
                );
            }
            AttributeName::Intensity => {
                batch.intensities = Some(
                    (0..num_points)
                        .map(|i| LittleEndian::read_u16(record(i, offset, 2)))
                        .collect(),
                );
            }
            AttributeName::Classification => {
                batch.classifications =
                    Some((0..num_points).map(|i| record(i, offset, 1)[0]).collect());
            }
            AttributeName::ReturnNumber => {
                batch.return_numbers =
                    Some((0..num_points).map(|i| record(i, offset, 1)[0]).collect());
            }
            AttributeName::NumberOfReturns => {
                batch.number_of_returns =
                    Some((0..num_points).map(|i| record(i, offset, 1)[0]).collect());
            }
            AttributeName::SourceId => {
                batch.source_ids = Some(
                    (0..num_points)
                        .map(|i| LittleEndian::read_u16(record(i, offset, 2)))
                        .collect(),
                );
            }
            AttributeName::GpsTime => {
                batch.gps_times = Some(
                    (0..num_points)
                        .map(|i| LittleEndian::read_f64(record(i, offset, 8)))
                        .collect(),
                );
            }
            AttributeName::Spacing => {
                batch.spacings = Some(
                    (0..num_points)
                        .map(|i| LittleEndian::read_f32(record(i, offset, 4)))
                        .collect(),
                );
            }
            AttributeName::NormalSphereMapped => {
                batch.normals = Some(
                    (0..num_points)
                        .map(|i| {
                            let b = record(i, offset, 2);
                            decode_sphere_mapped(b[0], b[1])
                        })
                        .collect(),
                );
            }
            AttributeName::NormalOct16 => {
                batch.normals = Some(
                    (0..num_points)
                        .map(|i| {
                            let b = record(i, offset, 2);
                            decode_oct16(b[0], b[1])
                        })
                        .collect(),
                );
            }
            AttributeName::Normal => {
                batch.normals = Some(
                    (0..num_points)
                        .map(|i| {
                            let b = record(i, offset, 12);
                            Vec3::new(
                                LittleEndian::read_f32(&b[0..4]),
                                LittleEndian::read_f32(&b[4..8]),
                                LittleEndian::read_f32(&b[8..12]),
                            )
                        })
                        .collect(),
                );
            }
            // replaced by the synthetic sequence
            AttributeName::Indices => {}
        }
    }

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::octree::point_attributes::{
        CLASSIFICATION, COLOR_PACKED, INDICES, INTENSITY, NORMAL_OCT16, POSITION_CARTESIAN,
    };
    use byteorder::WriteBytesExt;

    const V14: Version = Version::new(1, 4);
    const V13: Version = Version::new(1, 3);

    fn schema() -> PointAttributes {
        PointAttributes::from_attributes([POSITION_CARTESIAN, COLOR_PACKED, INTENSITY])
    }

    fn encode_quantized(points: &[(DVec3, [u8; 4], u16)], scale: f64) -> Vec<u8> {
        let mut buf = Vec::new();
        for (p, c, intensity) in points {
            for v in [p.x, p.y, p.z] {
                buf.write_u32::<LittleEndian>((v / scale).round() as u32).unwrap();
            }
            buf.extend_from_slice(c);
            buf.write_u16::<LittleEndian>(*intensity).unwrap();
        }
        buf
    }

    #[test]
    fn quantized_positions_round_trip_within_scale() {
        let scale = 0.001;
        let points: Vec<_> = (0..50)
            .map(|i| {
                let f = i as f64;
                (
                    DVec3::new(f * 0.123, 10.0 - f * 0.05, f * f * 0.01),
                    [i as u8, 255 - i as u8, 7, 255],
                    i as u16 * 100,
                )
            })
            .collect();
        let buffer = encode_quantized(&points, scale);
        let params = BinaryDecodeParams {
            scale,
            offset: DVec3::ZERO,
            version: V14,
        };

        let batch = decode_binary(&buffer, &schema(), &params).unwrap();
        assert_eq!(batch.len(), 50);
        for (i, (p, c, intensity)) in points.iter().enumerate() {
            let decoded = batch.positions[i].as_dvec3();
            assert!((decoded - *p).abs().max_element() <= scale, "{decoded} vs {p}");
            assert_eq!(batch.colors.as_ref().unwrap()[i], *c);
            assert_eq!(batch.intensities.as_ref().unwrap()[i], *intensity);
        }
        assert_eq!(batch.indices, (0..50).collect::<Vec<u32>>());
    }

    #[test]
    fn float_positions_are_exact() {
        let mut buffer = Vec::new();
        let positions = [[1.5f32, -2.25, 8.0], [0.125, 4.0, -16.5]];
        for p in positions {
            for v in p {
                buffer.write_f32::<LittleEndian>(v).unwrap();
            }
            buffer.extend_from_slice(&[1, 2, 3, 4]);
            buffer.write_u16::<LittleEndian>(9).unwrap();
        }
        let params = BinaryDecodeParams {
            scale: 0.01,
            offset: DVec3::new(1.0, 2.0, 3.0),
            version: V13,
        };

        let batch = decode_binary(&buffer, &schema(), &params).unwrap();
        assert_eq!(batch.positions[0], Vec3::new(2.5, -0.25, 11.0));
        assert_eq!(batch.positions[1], Vec3::new(1.125, 6.0, -13.5));
        assert_eq!(batch.tight_bounding_box.min, DVec3::new(1.125, -0.25, -13.5));
        assert_eq!(batch.tight_bounding_box.max, DVec3::new(2.5, 6.0, 11.0));
        assert_eq!(batch.mean, DVec3::new(1.8125, 2.875, -1.25));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let buffer = vec![0u8; 18 * 3 + 5];
        let params = BinaryDecodeParams {
            scale: 0.01,
            offset: DVec3::ZERO,
            version: V14,
        };
        assert_eq!(
            decode_binary(&buffer, &schema(), &params).unwrap_err(),
            DecodeError::BufferTooSmall {
                expected: 18 * 4,
                actual: 18 * 3 + 5
            }
        );
    }

    #[test]
    fn empty_buffer_decodes_to_empty_batch() {
        let params = BinaryDecodeParams {
            scale: 0.01,
            offset: DVec3::ZERO,
            version: V14,
        };
        let batch = decode_binary(&[], &schema(), &params).unwrap();
        assert!(batch.is_empty());
        assert!(batch.tight_bounding_box.is_empty());
    }

    #[test]
    fn payload_indices_are_replaced_and_normals_decoded() {
        let schema = PointAttributes::from_attributes([
            POSITION_CARTESIAN,
            INDICES,
            CLASSIFICATION,
            NORMAL_OCT16,
        ]);
        assert_eq!(schema.byte_size(), 12 + 4 + 1 + 2);

        let mut buffer = Vec::new();
        for i in 0..3u32 {
            for _ in 0..3 {
                buffer.write_u32::<LittleEndian>(i * 10).unwrap();
            }
            buffer.write_u32::<LittleEndian>(1000 + i).unwrap();
            buffer.push(i as u8 + 2);
            buffer.extend_from_slice(&[128, 128]);
        }
        let params = BinaryDecodeParams {
            scale: 1.0,
            offset: DVec3::ZERO,
            version: V14,
        };

        let batch = decode_binary(&buffer, &schema, &params).unwrap();
        assert_eq!(batch.indices, vec![0, 1, 2]);
        assert_eq!(batch.classifications, Some(vec![2, 3, 4]));
        assert_eq!(batch.positions[2], Vec3::splat(20.0));
        let normals = batch.normals.unwrap();
        assert!(normals.iter().all(|n| n.z > 0.99));
        assert!(batch.colors.is_none());
    }
}
