//! LAS 1.0 to 1.2 containers with uncompressed point formats 0 to 3.

use super::{DecodeError, DecodeResult, color_channel_to_u8, ensure_len};
use crate::octree::aabb::Aabb;
use crate::point::{BatchStats, PointBatch, sequential_indices};
use binrw::BinRead;
use byteorder::{ByteOrder, LittleEndian};
use glam::DVec3;
use std::io::{Cursor, SeekFrom};

/// Public header block size up to the end of the bounds.
pub const LAS_HEADER_MIN_SIZE: usize = 227;

/// Points decoded per [`LasReader::read_chunk`] call in [`decode_las`].
const CHUNK_SIZE: usize = 1_000_000;

#[derive(BinRead, Debug, Clone, PartialEq)]
#[br(little, magic = b"LASF")]
pub struct LasHeader {
    #[br(seek_before = SeekFrom::Start(24))]
    pub version_major: u8,
    pub version_minor: u8,

    #[br(seek_before = SeekFrom::Start(96))]
    pub point_data_offset: u32,

    /// Point format id in the low six bits, compression flags in the top two.
    #[br(seek_before = SeekFrom::Start(104))]
    pub point_format_byte: u8,
    pub point_record_length: u16,
    pub point_count: u32,

    #[br(seek_before = SeekFrom::Start(131), map = |v: [f64; 3]| DVec3::from_array(v))]
    pub scale: DVec3,
    #[br(map = |v: [f64; 3]| DVec3::from_array(v))]
    pub offset: DVec3,
    /// Stored as `[maxX, minX, maxY, minY, maxZ, minZ]`.
    #[br(map = |b: [f64; 6]| Aabb::new(DVec3::new(b[1], b[3], b[5]), DVec3::new(b[0], b[2], b[4])))]
    pub bounds: Aabb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LasCompression {
    None,
    Laz,
    /// Both flag bits set; predates LAZ and cannot be decoded.
    Legacy,
}

impl LasHeader {
    /// Parse the header and reject versions whose layout differs from 1.0 to 1.2.
    pub fn parse(buffer: &[u8]) -> DecodeResult<Self> {
        ensure_len(buffer, LAS_HEADER_MIN_SIZE)?;

        let header =
            LasHeader::read(&mut Cursor::new(buffer)).map_err(|e| DecodeError::InvalidFormat {
                context: "LAS header",
                detail: e.to_string(),
            })?;

        if header.version_major != 1 || header.version_minor > 2 {
            return Err(DecodeError::UnsupportedLasVersion {
                major: header.version_major,
                minor: header.version_minor,
            });
        }

        Ok(header)
    }

    pub fn compression(&self) -> LasCompression {
        match self.point_format_byte & 0xC0 {
            0 => LasCompression::None,
            0xC0 => LasCompression::Legacy,
            _ => LasCompression::Laz,
        }
    }

    pub fn point_format(&self) -> u8 {
        self.point_format_byte & 0x3F
    }
}

/// Byte layout of one of the point record formats 0 to 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecordLayout {
    gps_time: Option<usize>,
    color: Option<usize>,
    min_length: usize,
}

impl RecordLayout {
    fn for_format(format: u8) -> DecodeResult<Self> {
        let layout = match format {
            0 => RecordLayout {
                gps_time: None,
                color: None,
                min_length: 20,
            },
            1 => RecordLayout {
                gps_time: Some(20),
                color: None,
                min_length: 28,
            },
            2 => RecordLayout {
                gps_time: None,
                color: Some(20),
                min_length: 26,
            },
            3 => RecordLayout {
                gps_time: Some(20),
                color: Some(28),
                min_length: 34,
            },
            other => return Err(DecodeError::UnknownPointFormat(other)),
        };
        Ok(layout)
    }
}

/// One decoded LAS point; `position` is in the file's world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LasPoint {
    pub position: DVec3,
    pub intensity: u16,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub classification: u8,
    pub source_id: u16,
    pub gps_time: Option<f64>,
    pub color: Option<[u16; 3]>,
}

#[derive(Debug, Clone, Default)]
pub struct LasChunk {
    pub points: Vec<LasPoint>,
    pub has_more_data: bool,
}

/// Incremental reader over an uncompressed LAS buffer.
#[derive(Debug)]
pub struct LasReader<'a> {
    header: LasHeader,
    layout: RecordLayout,
    buffer: &'a [u8],
    next_point: usize,
}

impl<'a> LasReader<'a> {
    pub fn new(buffer: &'a [u8]) -> DecodeResult<Self> {
        let header = LasHeader::parse(buffer)?;
        match header.compression() {
            LasCompression::None => {}
            LasCompression::Legacy => return Err(DecodeError::UnsupportedCompression),
            LasCompression::Laz => {
                return Err(DecodeError::InvalidFormat {
                    context: "LAS reader",
                    detail: "compressed point data needs the LAZ codec".to_string(),
                });
            }
        }

        let layout = RecordLayout::for_format(header.point_format())?;
        let record_length = usize::from(header.point_record_length);
        if record_length < layout.min_length {
            return Err(DecodeError::InvalidFormat {
                context: "LAS header",
                detail: format!(
                    "record length {record_length} too short for point format {}",
                    header.point_format()
                ),
            });
        }

        let expected =
            header.point_data_offset as usize + header.point_count as usize * record_length;
        ensure_len(buffer, expected)?;

        Ok(Self {
            header,
            layout,
            buffer,
            next_point: 0,
        })
    }

    pub fn header(&self) -> &LasHeader {
        &self.header
    }

    /// Read up to `max_points` points, keeping every `skip`-th record.
    pub fn read_chunk(&mut self, max_points: usize, skip: usize) -> LasChunk {
        let skip = skip.max(1);
        let total = self.header.point_count as usize;
        let mut points = Vec::with_capacity(max_points.min(total.saturating_sub(self.next_point)));

        while points.len() < max_points && self.next_point < total {
            points.push(self.read_point(self.next_point));
            self.next_point += skip;
        }

        LasChunk {
            points,
            has_more_data: self.next_point < total,
        }
    }

    fn read_point(&self, index: usize) -> LasPoint {
        let record_length = usize::from(self.header.point_record_length);
        let start = self.header.point_data_offset as usize + index * record_length;
        let record = &self.buffer[start..start + record_length];

        let raw = DVec3::new(
            f64::from(LittleEndian::read_i32(&record[0..4])),
            f64::from(LittleEndian::read_i32(&record[4..8])),
            f64::from(LittleEndian::read_i32(&record[8..12])),
        );
        let returns = record[14];

        LasPoint {
            position: raw * self.header.scale + self.header.offset,
            intensity: LittleEndian::read_u16(&record[12..14]),
            return_number: returns & 0b111,
            number_of_returns: (returns >> 3) & 0b111,
            classification: record[15],
            source_id: LittleEndian::read_u16(&record[18..20]),
            gps_time: self
                .layout
                .gps_time
                .map(|at| LittleEndian::read_f64(&record[at..at + 8])),
            color: self.layout.color.map(|at| {
                [
                    LittleEndian::read_u16(&record[at..at + 2]),
                    LittleEndian::read_u16(&record[at + 2..at + 4]),
                    LittleEndian::read_u16(&record[at + 4..at + 6]),
                ]
            }),
        }
    }
}

/// Convert decoded points to a batch, adding `translation` to every position.
pub fn points_to_batch(points: &[LasPoint], translation: DVec3) -> PointBatch {
    let mut stats = BatchStats::new(points.len());
    let positions = points
        .iter()
        .map(|p| {
            let position = p.position + translation;
            stats.add(position);
            position.as_vec3()
        })
        .collect();
    let (tight_bounding_box, mean) = stats.finish();

    let colors = points.iter().all(|p| p.color.is_some()).then(|| {
        points
            .iter()
            .filter_map(|p| p.color)
            .map(|[r, g, b]| {
                [
                    color_channel_to_u8(r),
                    color_channel_to_u8(g),
                    color_channel_to_u8(b),
                    255,
                ]
            })
            .collect()
    });
    let gps_times = points
        .iter()
        .all(|p| p.gps_time.is_some())
        .then(|| points.iter().filter_map(|p| p.gps_time).collect());

    PointBatch {
        positions,
        colors: colors.filter(|c: &Vec<_>| !c.is_empty()),
        intensities: Some(points.iter().map(|p| p.intensity).collect()),
        classifications: Some(points.iter().map(|p| p.classification).collect()),
        return_numbers: Some(points.iter().map(|p| p.return_number).collect()),
        number_of_returns: Some(points.iter().map(|p| p.number_of_returns).collect()),
        source_ids: Some(points.iter().map(|p| p.source_id).collect()),
        gps_times: gps_times.filter(|g: &Vec<_>| !g.is_empty()),
        indices: sequential_indices(points.len()),
        tight_bounding_box,
        mean,
        ..Default::default()
    }
}

/// Decode a whole LAS or LAZ buffer, translating positions by `translation`.
pub fn decode_las(buffer: &[u8], translation: DVec3) -> DecodeResult<PointBatch> {
    let header = LasHeader::parse(buffer)?;
    match header.compression() {
        LasCompression::Legacy => Err(DecodeError::UnsupportedCompression),
        LasCompression::Laz => super::laz::decode_laz(buffer, translation),
        LasCompression::None => {
            let mut reader = LasReader::new(buffer)?;
            let mut points = Vec::with_capacity(header.point_count as usize);
            loop {
                let chunk = reader.read_chunk(CHUNK_SIZE, 1);
                points.extend(chunk.points);
                if !chunk.has_more_data {
                    break;
                }
            }
            Ok(points_to_batch(&points, translation))
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    pub(crate) struct TestPoint {
        pub xyz: [i32; 3],
        pub intensity: u16,
        pub classification: u8,
        pub color: [u16; 3],
    }

    /// A LAS 1.2 file with point format `format` (0 to 3) and no VLRs.
    pub(crate) fn build_las(format: u8, scale: [f64; 3], offset: [f64; 3], points: &[TestPoint]) -> Vec<u8> {
        let record_length: u16 = match format {
            0 => 20,
            1 => 28,
            2 => 26,
            _ => 34,
        };
        let mut buf = vec![0u8; LAS_HEADER_MIN_SIZE];
        buf[0..4].copy_from_slice(b"LASF");
        buf[24] = 1;
        buf[25] = 2;
        LittleEndian::write_u16(&mut buf[94..96], LAS_HEADER_MIN_SIZE as u16);
        LittleEndian::write_u32(&mut buf[96..100], LAS_HEADER_MIN_SIZE as u32);
        buf[104] = format;
        LittleEndian::write_u16(&mut buf[105..107], record_length);
        LittleEndian::write_u32(&mut buf[107..111], points.len() as u32);

        let mut at = 131;
        for v in scale.iter().chain(offset.iter()) {
            LittleEndian::write_f64(&mut buf[at..at + 8], *v);
            at += 8;
        }
        let mut min = [f64::MAX; 3];
        let mut max = [f64::MIN; 3];
        for p in points {
            for axis in 0..3 {
                let v = f64::from(p.xyz[axis]) * scale[axis] + offset[axis];
                min[axis] = min[axis].min(v);
                max[axis] = max[axis].max(v);
            }
        }
        for axis in 0..3 {
            LittleEndian::write_f64(&mut buf[at..at + 8], max[axis]);
            LittleEndian::write_f64(&mut buf[at + 8..at + 16], min[axis]);
            at += 16;
        }

        for (i, p) in points.iter().enumerate() {
            let mut record = Vec::with_capacity(record_length as usize);
            for v in p.xyz {
                record.write_i32::<LittleEndian>(v).unwrap();
            }
            record.write_u16::<LittleEndian>(p.intensity).unwrap();
            // return 1 of 2
            record.push(1 | (2 << 3));
            record.push(p.classification);
            record.extend_from_slice(&[0, 0]);
            record.write_u16::<LittleEndian>(i as u16).unwrap();
            if format == 1 || format == 3 {
                record.write_f64::<LittleEndian>(i as f64 * 0.5).unwrap();
            }
            if format >= 2 {
                for c in p.color {
                    record.write_u16::<LittleEndian>(c).unwrap();
                }
            }
            assert_eq!(record.len(), record_length as usize);
            buf.extend_from_slice(&record);
        }
        buf
    }

    fn sample_points() -> Vec<TestPoint> {
        (0..10)
            .map(|i| TestPoint {
                xyz: [i * 100, -i * 50, 1000 + i],
                intensity: i as u16 * 7,
                classification: (i % 3) as u8,
                color: [i as u16 * 1000, 200, 65535],
            })
            .collect()
    }

    #[test]
    fn header_fields_at_documented_offsets() {
        let buf = build_las(2, [0.01, 0.02, 0.001], [500.0, -20.0, 3.5], &sample_points());
        let header = LasHeader::parse(&buf).unwrap();

        assert_eq!((header.version_major, header.version_minor), (1, 2));
        assert_eq!(header.point_data_offset, 227);
        assert_eq!(header.point_format(), 2);
        assert_eq!(header.compression(), LasCompression::None);
        assert_eq!(header.point_record_length, 26);
        assert_eq!(header.point_count, 10);
        assert_eq!(header.scale, DVec3::new(0.01, 0.02, 0.001));
        assert_eq!(header.offset, DVec3::new(500.0, -20.0, 3.5));
        let world = |xyz: [f64; 3]| {
            DVec3::new(xyz[0] * 0.01 + 500.0, xyz[1] * 0.02 - 20.0, xyz[2] * 0.001 + 3.5)
        };
        assert_eq!(header.bounds.min, world([0.0, -450.0, 1000.0]));
        assert_eq!(header.bounds.max, world([900.0, 0.0, 1009.0]));
    }

    #[test]
    fn compression_flags() {
        let mut buf = build_las(0, [1.0; 3], [0.0; 3], &sample_points());
        buf[104] = 0x80 | 3;
        let header = LasHeader::parse(&buf).unwrap();
        assert_eq!(header.compression(), LasCompression::Laz);
        assert_eq!(header.point_format(), 3);

        buf[104] = 0xC0;
        assert_eq!(LasReader::new(&buf).unwrap_err(), DecodeError::UnsupportedCompression);
        assert_eq!(decode_las(&buf, DVec3::ZERO).unwrap_err(), DecodeError::UnsupportedCompression);
    }

    #[test]
    fn rejects_newer_versions_and_formats() {
        let mut buf = build_las(0, [1.0; 3], [0.0; 3], &sample_points());
        buf[25] = 4;
        assert_eq!(
            LasHeader::parse(&buf).unwrap_err(),
            DecodeError::UnsupportedLasVersion { major: 1, minor: 4 }
        );

        buf[25] = 2;
        buf[104] = 6;
        assert_eq!(LasReader::new(&buf).unwrap_err(), DecodeError::UnknownPointFormat(6));
    }

    #[test]
    fn rejects_bad_magic_and_short_buffers() {
        let mut buf = build_las(0, [1.0; 3], [0.0; 3], &sample_points());
        buf[0] = b'X';
        assert!(matches!(
            LasHeader::parse(&buf),
            Err(DecodeError::InvalidFormat { .. })
        ));

        assert_eq!(
            LasHeader::parse(&buf[..100]).unwrap_err(),
            DecodeError::BufferTooSmall {
                expected: LAS_HEADER_MIN_SIZE,
                actual: 100
            }
        );

        let buf = build_las(0, [1.0; 3], [0.0; 3], &sample_points());
        let truncated = &buf[..buf.len() - 3];
        assert!(matches!(
            LasReader::new(truncated),
            Err(DecodeError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn reads_records_of_every_format() {
        for format in 0..=3u8 {
            let buf = build_las(format, [0.5, 0.5, 0.5], [10.0, 0.0, 0.0], &sample_points());
            let mut reader = LasReader::new(&buf).unwrap();
            let chunk = reader.read_chunk(usize::MAX, 1);
            assert!(!chunk.has_more_data);
            assert_eq!(chunk.points.len(), 10);

            let p = chunk.points[3];
            assert_eq!(p.position, DVec3::new(160.0, -75.0, 501.5));
            assert_eq!(p.intensity, 21);
            assert_eq!(p.classification, 0);
            assert_eq!((p.return_number, p.number_of_returns), (1, 2));
            assert_eq!(p.source_id, 3);
            assert_eq!(p.gps_time.is_some(), format == 1 || format == 3);
            assert_eq!(p.color.is_some(), format >= 2);
            if format >= 2 {
                assert_eq!(p.color, Some([3000, 200, 65535]));
            }
        }
    }

    #[test]
    fn skip_and_chunking_drive_the_read_loop() {
        let buf = build_las(0, [1.0; 3], [0.0; 3], &sample_points());
        let mut reader = LasReader::new(&buf).unwrap();

        let first = reader.read_chunk(2, 3);
        assert_eq!(first.points.len(), 2);
        assert!(first.has_more_data);
        assert_eq!(first.points[1].position.x, 300.0);

        let second = reader.read_chunk(10, 3);
        // records 6 and 9
        assert_eq!(second.points.len(), 2);
        assert!(!second.has_more_data);
        assert_eq!(second.points[1].position.x, 900.0);
    }

    #[test]
    fn batch_colors_are_scaled_to_bytes() {
        let buf = build_las(2, [1.0; 3], [0.0; 3], &sample_points());
        let batch = decode_las(&buf, DVec3::new(-100.0, 0.0, -1000.0)).unwrap();

        assert_eq!(batch.len(), 10);
        assert_eq!(batch.positions[1].to_array(), [0.0, -50.0, 1.0]);
        let colors = batch.colors.as_ref().unwrap();
        assert_eq!(colors[0], [0, 200, 255, 255]);
        assert_eq!(colors[3], [11, 200, 255, 255]);
        assert!(batch.gps_times.is_none());
        assert_eq!(batch.tight_bounding_box.min, DVec3::new(-100.0, -450.0, 0.0));
        assert_eq!(batch.indices.len(), 10);
    }
}
