use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Primitive type of one attribute element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementType {
    pub ordinal: usize,
    pub name: &'static str,
    pub size: u16,
}

macro_rules! create_data_type {
    ($const_name:ident, $ord:expr, $name:expr, $size:expr) => {
        pub const $const_name: ElementType = ElementType {
            ordinal: $ord,
            name: $name,
            size: $size,
        };
    };
}

create_data_type!(DATA_TYPE_DOUBLE, 0, "double", 8);
create_data_type!(DATA_TYPE_FLOAT, 1, "float", 4);
create_data_type!(DATA_TYPE_INT8, 2, "int8", 1);
create_data_type!(DATA_TYPE_UINT8, 3, "uint8", 1);
create_data_type!(DATA_TYPE_INT16, 4, "int16", 2);
create_data_type!(DATA_TYPE_UINT16, 5, "uint16", 2);
create_data_type!(DATA_TYPE_INT32, 6, "int32", 4);
create_data_type!(DATA_TYPE_UINT32, 7, "uint32", 4);
create_data_type!(DATA_TYPE_INT64, 8, "int64", 8);
create_data_type!(DATA_TYPE_UINT64, 9, "uint64", 8);

pub const ELEMENT_TYPES: &[ElementType] = &[
    DATA_TYPE_DOUBLE,
    DATA_TYPE_FLOAT,
    DATA_TYPE_INT8,
    DATA_TYPE_UINT8,
    DATA_TYPE_INT16,
    DATA_TYPE_UINT16,
    DATA_TYPE_INT32,
    DATA_TYPE_UINT32,
    DATA_TYPE_INT64,
    DATA_TYPE_UINT64,
];

/// Semantic identity of a per-point attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeName {
    PositionCartesian,
    ColorPacked,
    Intensity,
    Classification,
    ReturnNumber,
    NumberOfReturns,
    SourceId,
    NormalSphereMapped,
    NormalOct16,
    Normal,
    Indices,
    Spacing,
    GpsTime,
}

impl AttributeName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeName::PositionCartesian => "POSITION_CARTESIAN",
            AttributeName::ColorPacked => "COLOR_PACKED",
            AttributeName::Intensity => "INTENSITY",
            AttributeName::Classification => "CLASSIFICATION",
            AttributeName::ReturnNumber => "RETURN_NUMBER",
            AttributeName::NumberOfReturns => "NUMBER_OF_RETURNS",
            AttributeName::SourceId => "SOURCE_ID",
            AttributeName::NormalSphereMapped => "NORMAL_SPHEREMAPPED",
            AttributeName::NormalOct16 => "NORMAL_OCT16",
            AttributeName::Normal => "NORMAL",
            AttributeName::Indices => "INDICES",
            AttributeName::Spacing => "SPACING",
            AttributeName::GpsTime => "GPS_TIME",
        }
    }
}

impl fmt::Display for AttributeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown point attribute: {0}")]
pub struct UnknownAttributeError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointAttribute {
    pub name: AttributeName,
    pub element_type: ElementType,
    pub num_elements: u16,
}

macro_rules! create_point_attribute {
    ($const_name:ident, $name:expr, $type:expr, $count:expr) => {
        pub const $const_name: PointAttribute = PointAttribute {
            name: $name,
            element_type: $type,
            num_elements: $count,
        };
    };
}

create_point_attribute!(POSITION_CARTESIAN, AttributeName::PositionCartesian, DATA_TYPE_FLOAT, 3);
create_point_attribute!(COLOR_PACKED, AttributeName::ColorPacked, DATA_TYPE_INT8, 4);
create_point_attribute!(INTENSITY, AttributeName::Intensity, DATA_TYPE_UINT16, 1);
create_point_attribute!(CLASSIFICATION, AttributeName::Classification, DATA_TYPE_UINT8, 1);
create_point_attribute!(RETURN_NUMBER, AttributeName::ReturnNumber, DATA_TYPE_UINT8, 1);
create_point_attribute!(NUMBER_OF_RETURNS, AttributeName::NumberOfReturns, DATA_TYPE_UINT8, 1);
create_point_attribute!(SOURCE_ID, AttributeName::SourceId, DATA_TYPE_UINT16, 1);
create_point_attribute!(NORMAL_SPHEREMAPPED, AttributeName::NormalSphereMapped, DATA_TYPE_UINT8, 2);
create_point_attribute!(NORMAL_OCT16, AttributeName::NormalOct16, DATA_TYPE_UINT8, 2);
create_point_attribute!(NORMAL, AttributeName::Normal, DATA_TYPE_FLOAT, 3);
create_point_attribute!(INDICES, AttributeName::Indices, DATA_TYPE_UINT32, 1);
create_point_attribute!(SPACING, AttributeName::Spacing, DATA_TYPE_FLOAT, 1);
create_point_attribute!(GPS_TIME, AttributeName::GpsTime, DATA_TYPE_DOUBLE, 1);

impl PointAttribute {
    pub fn byte_size(&self) -> usize {
        self.element_type.size as usize * self.num_elements as usize
    }
}

impl FromStr for PointAttribute {
    type Err = UnknownAttributeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "POSITION_CARTESIAN" => POSITION_CARTESIAN,
            "COLOR_PACKED" | "RGBA_PACKED" => COLOR_PACKED,
            "INTENSITY" => INTENSITY,
            "CLASSIFICATION" => CLASSIFICATION,
            "RETURN_NUMBER" => RETURN_NUMBER,
            "NUMBER_OF_RETURNS" => NUMBER_OF_RETURNS,
            "SOURCE_ID" => SOURCE_ID,
            "NORMAL_SPHEREMAPPED" => NORMAL_SPHEREMAPPED,
            "NORMAL_OCT16" => NORMAL_OCT16,
            "NORMAL" | "NORMAL_FLOATS" => NORMAL,
            "INDICES" => INDICES,
            "SPACING" => SPACING,
            "GPS_TIME" => GPS_TIME,
            other => return Err(UnknownAttributeError(other.to_string())),
        })
    }
}

/// Ordered per-point record layout.
///
/// Declaration order is physical order: the offset of attribute `k` is the sum of
/// the byte sizes of the attributes before it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointAttributes {
    attributes: Vec<PointAttribute>,
    byte_size: usize,
}

impl PointAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attributes(attributes: impl IntoIterator<Item = PointAttribute>) -> Self {
        let mut schema = Self::new();
        for attribute in attributes {
            schema.add(attribute);
        }
        schema
    }

    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, UnknownAttributeError> {
        let attributes = names
            .iter()
            .map(|name| name.as_ref().parse::<PointAttribute>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_attributes(attributes))
    }

    pub fn add(&mut self, attribute: PointAttribute) {
        self.byte_size += attribute.byte_size();
        self.attributes.push(attribute);
    }

    /// Stride of one point record in bytes.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PointAttribute> {
        self.attributes.iter()
    }

    pub fn contains(&self, name: AttributeName) -> bool {
        self.attributes.iter().any(|a| a.name == name)
    }

    /// Byte offset of the first attribute called `name` within a point record.
    pub fn offset_of(&self, name: AttributeName) -> Option<usize> {
        self.with_offsets()
            .find(|(_, attribute)| attribute.name == name)
            .map(|(offset, _)| offset)
    }

    /// Iterate `(offset, attribute)` pairs in declaration order.
    pub fn with_offsets(&self) -> impl Iterator<Item = (usize, &PointAttribute)> {
        self.attributes.iter().scan(0usize, |offset, attribute| {
            let current = *offset;
            *offset += attribute.byte_size();
            Some((current, attribute))
        })
    }
}
