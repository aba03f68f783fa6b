//! Greyhound `read` payloads: records laid out per the requested schema, then a
//! little-endian `u32` point count.

use super::{DecodeError, DecodeResult, color_channel_to_u8, ensure_len};
use crate::point::{BatchStats, PointBatch, sequential_indices};
use byteorder::{ByteOrder, LittleEndian};
use glam::DVec3;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    Signed,
    Unsigned,
    Floating,
}

/// One entry of a Greyhound schema, e.g. `{"name": "X", "type": "signed", "size": 4}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DimensionKind,
    pub size: usize,
}

impl Dimension {
    pub fn new(name: impl Into<String>, kind: DimensionKind, size: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            size,
        }
    }

    fn validate(&self) -> DecodeResult<()> {
        let valid = match self.kind {
            DimensionKind::Signed | DimensionKind::Unsigned => matches!(self.size, 1 | 2 | 4 | 8),
            DimensionKind::Floating => matches!(self.size, 4 | 8),
        };
        if valid {
            Ok(())
        } else {
            Err(DecodeError::InvalidFormat {
                context: "greyhound schema",
                detail: format!("{} has unsupported size {}", self.name, self.size),
            })
        }
    }

    fn read(&self, bytes: &[u8]) -> f64 {
        match (self.kind, self.size) {
            (DimensionKind::Signed, 1) => f64::from(bytes[0] as i8),
            (DimensionKind::Signed, 2) => f64::from(LittleEndian::read_i16(bytes)),
            (DimensionKind::Signed, 4) => f64::from(LittleEndian::read_i32(bytes)),
            (DimensionKind::Signed, _) => LittleEndian::read_i64(bytes) as f64,
            (DimensionKind::Unsigned, 1) => f64::from(bytes[0]),
            (DimensionKind::Unsigned, 2) => f64::from(LittleEndian::read_u16(bytes)),
            (DimensionKind::Unsigned, 4) => f64::from(LittleEndian::read_u32(bytes)),
            (DimensionKind::Unsigned, _) => LittleEndian::read_u64(bytes) as f64,
            (DimensionKind::Floating, 4) => f64::from(LittleEndian::read_f32(bytes)),
            (DimensionKind::Floating, _) => LittleEndian::read_f64(bytes),
        }
    }
}

/// The schema requested from Greyhound by default: scaled integer XYZ, color
/// and the common LiDAR attributes.
pub fn default_schema() -> Vec<Dimension> {
    use DimensionKind::*;
    vec![
        Dimension::new("X", Signed, 4),
        Dimension::new("Y", Signed, 4),
        Dimension::new("Z", Signed, 4),
        Dimension::new("Intensity", Unsigned, 2),
        Dimension::new("Classification", Unsigned, 1),
        Dimension::new("Red", Unsigned, 2),
        Dimension::new("Green", Unsigned, 2),
        Dimension::new("Blue", Unsigned, 2),
    ]
}

/// Positions are `value * scale + translation` per axis.
#[derive(Debug, Clone, Copy)]
pub struct GreyhoundDecodeParams {
    pub scale: DVec3,
    pub translation: DVec3,
}

pub fn decode_greyhound(
    buffer: &[u8],
    schema: &[Dimension],
    params: &GreyhoundDecodeParams,
) -> DecodeResult<PointBatch> {
    for dimension in schema {
        dimension.validate()?;
    }
    let stride: usize = schema.iter().map(|d| d.size).sum();
    if stride == 0 {
        return Err(DecodeError::InvalidFormat {
            context: "greyhound schema",
            detail: "schema is empty".to_string(),
        });
    }

    ensure_len(buffer, 4)?;
    let (body, count) = buffer.split_at(buffer.len() - 4);
    let num_points = LittleEndian::read_u32(count) as usize;
    ensure_len(body, num_points * stride)?;

    let mut offsets = Vec::with_capacity(schema.len());
    let mut offset = 0;
    for dimension in schema {
        offsets.push(offset);
        offset += dimension.size;
    }
    let column = |name: &str| {
        schema
            .iter()
            .position(|d| d.name == name)
            .map(|i| (&schema[i], offsets[i]))
    };
    let read_column = |name: &str| {
        column(name).map(|(dimension, offset)| {
            (0..num_points)
                .map(|i| {
                    let start = i * stride + offset;
                    dimension.read(&body[start..start + dimension.size])
                })
                .collect::<Vec<f64>>()
        })
    };

    let axes = [read_column("X"), read_column("Y"), read_column("Z")];
    let [Some(xs), Some(ys), Some(zs)] = axes else {
        return Err(DecodeError::InvalidFormat {
            context: "greyhound schema",
            detail: "X, Y and Z are required".to_string(),
        });
    };

    let mut stats = BatchStats::new(num_points);
    let positions = (0..num_points)
        .map(|i| {
            let position =
                DVec3::new(xs[i], ys[i], zs[i]) * params.scale + params.translation;
            stats.add(position);
            position.as_vec3()
        })
        .collect();
    let (tight_bounding_box, mean) = stats.finish();

    let channel = |name: &str| read_column(name).unwrap_or_else(|| vec![0.0; num_points]);
    let colors = (column("Red").is_some() || column("Green").is_some() || column("Blue").is_some())
        .then(|| {
            let (r, g, b) = (channel("Red"), channel("Green"), channel("Blue"));
            (0..num_points)
                .map(|i| {
                    [
                        color_channel_to_u8(r[i] as u16),
                        color_channel_to_u8(g[i] as u16),
                        color_channel_to_u8(b[i] as u16),
                        255,
                    ]
                })
                .collect()
        });

    let narrow_u8 = |name: &str| read_column(name).map(|v| v.into_iter().map(|x| x as u8).collect());
    let narrow_u16 =
        |name: &str| read_column(name).map(|v| v.into_iter().map(|x| x as u16).collect());

    Ok(PointBatch {
        positions,
        colors,
        intensities: narrow_u16("Intensity"),
        classifications: narrow_u8("Classification"),
        return_numbers: narrow_u8("ReturnNumber"),
        number_of_returns: narrow_u8("NumberOfReturns"),
        source_ids: narrow_u16("PointSourceId"),
        gps_times: read_column("GpsTime"),
        indices: sequential_indices(num_points),
        tight_bounding_box,
        mean,
        ..Default::default()
    })
}
