use crate::version::Version;
use binrw::{BinReaderExt, binrw};
use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use thiserror::Error;

/// Size of one [`HierarchyRecord`] on disk.
pub const HIERARCHY_RECORD_SIZE: usize = 5;

#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[br(little)]
pub struct HierarchyRecord {
    pub child_mask: u8,
    pub num_points: u32,
}

/// A node described by a hierarchy source, before it is linked into a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyEntry {
    pub name: String,
    pub child_mask: u8,
    pub num_points: u32,
}

impl HierarchyEntry {
    pub fn has_children(&self) -> bool {
        self.child_mask != 0
    }
}

#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("Hierarchy block is empty")]
    Empty,

    #[error("Hierarchy block truncated: {len} bytes is not a whole number of records")]
    Truncated { len: usize },

    #[error("Hierarchy block ends before the children of {0} are described")]
    MissingChildren(String),

    #[error("Invalid node name: {0}")]
    InvalidName(String),

    #[error("Node {0} is listed before its parent")]
    Orphan(String),

    #[error("Invalid binary data")]
    InvalidBinaryData(#[from] binrw::Error),
}

/// Decode a hierarchy block fetched for `root_name`.
///
/// The first entry describes `root_name` itself; the others follow in the
/// breadth-first order they are stored in, so every parent precedes its children.
pub fn parse_hierarchy_block(
    buf: &[u8],
    root_name: &str,
) -> Result<Vec<HierarchyEntry>, HierarchyError> {
    if buf.is_empty() {
        return Err(HierarchyError::Empty);
    }
    if buf.len() % HIERARCHY_RECORD_SIZE != 0 {
        return Err(HierarchyError::Truncated { len: buf.len() });
    }

    let mut cursor = Cursor::new(buf);
    let root: HierarchyRecord = cursor.read_le()?;

    let mut entries = vec![HierarchyEntry {
        name: root_name.to_string(),
        child_mask: root.child_mask,
        num_points: root.num_points,
    }];
    let mut queue = VecDeque::from([0usize]);

    while let Some(index) = queue.pop_front() {
        let child_mask = entries[index].child_mask;

        for octant in 0..8 {
            if child_mask & (1 << octant) == 0 {
                continue;
            }
            if cursor.position() as usize >= buf.len() {
                return Err(HierarchyError::MissingChildren(entries[index].name.clone()));
            }

            let record: HierarchyRecord = cursor.read_le()?;
            entries.push(HierarchyEntry {
                name: format!("{}{}", entries[index].name, octant),
                child_mask: record.child_mask,
                num_points: record.num_points,
            });
            queue.push_back(entries.len() - 1);
        }

        // nodes still queued have their children in the next block
        if cursor.position() as usize == buf.len() {
            break;
        }
    }

    Ok(entries)
}

/// Turn the flat `[name, numPoints]` list of older manifests into entries.
///
/// Child masks are derived from the names present in the list.
pub fn flat_hierarchy_entries(
    pairs: &[(String, u32)],
) -> Result<Vec<HierarchyEntry>, HierarchyError> {
    let mut index_of: HashMap<&str, usize> = HashMap::with_capacity(pairs.len());
    let mut entries: Vec<HierarchyEntry> = Vec::with_capacity(pairs.len());

    for (name, num_points) in pairs {
        let octant = validate_name(name)?;

        if let Some(octant) = octant {
            let parent_name = &name[..name.len() - 1];
            let parent = *index_of
                .get(parent_name)
                .ok_or_else(|| HierarchyError::Orphan(name.clone()))?;
            entries[parent].child_mask |= 1 << octant;
        } else if !entries.is_empty() {
            return Err(HierarchyError::InvalidName(name.clone()));
        }

        index_of.insert(name.as_str(), entries.len());
        entries.push(HierarchyEntry {
            name: name.clone(),
            child_mask: 0,
            num_points: *num_points,
        });
    }

    Ok(entries)
}

/// Checks the `r[0-7]*` shape and returns the octant of a non-root name.
pub fn validate_name(name: &str) -> Result<Option<u8>, HierarchyError> {
    let invalid = || HierarchyError::InvalidName(name.to_string());

    let digits = name.strip_prefix('r').ok_or_else(invalid)?;
    if !digits.bytes().all(|b| (b'0'..=b'7').contains(&b)) {
        return Err(invalid());
    }
    Ok(digits.bytes().last().map(|b| b - b'0'))
}

/// Directory of a node below the octree directory: `r` followed by full groups
/// of `step_size` digits of the name.
pub fn hierarchy_path(name: &str, step_size: u32) -> String {
    let digits = name.strip_prefix('r').unwrap_or(name);
    let step_size = step_size.max(1) as usize;

    let mut path = String::from("r");
    for group in digits.as_bytes().chunks_exact(step_size) {
        path.push('/');
        path.extend(group.iter().map(|&b| b as char));
    }
    path
}

/// Location of a node's point payload, without file extension.
pub fn node_base_url(octree_dir: &str, version: Version, step_size: u32, name: &str) -> String {
    if version.equal_or_higher((1, 5)) {
        format!("{octree_dir}/{}/{name}", hierarchy_path(name, step_size))
    } else {
        format!("{octree_dir}/{name}")
    }
}

pub fn hierarchy_url(octree_dir: &str, step_size: u32, name: &str) -> String {
    format!("{octree_dir}/{}/{name}.hrc", hierarchy_path(name, step_size))
}

/// Whether loading a node must first fetch the hierarchy block rooted at it.
pub fn needs_hierarchy_block(level: u32, step_size: u32, has_children: bool) -> bool {
    has_children && step_size > 0 && level % step_size == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(records: &[(u8, u32)]) -> Vec<u8> {
        records
            .iter()
            .flat_map(|(mask, n)| {
                let mut r = vec![*mask];
                r.extend_from_slice(&n.to_le_bytes());
                r
            })
            .collect()
    }

    #[test]
    fn fifo_expansion() {
        // r has children 0 and 3, r0 has child 7
        let buf = block(&[(0b0000_1001, 100), (0b1000_0000, 40), (0, 30), (0b0000_0010, 5)]);
        let entries = parse_hierarchy_block(&buf, "r").unwrap();

        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["r", "r0", "r3", "r07"]);
        assert_eq!(entries[0].num_points, 100);
        assert_eq!(entries[3].num_points, 5);
        // r07 has a child in the next block
        assert!(entries[3].has_children());
        assert!(!entries[2].has_children());
    }

    #[test]
    fn expansion_is_deterministic() {
        let buf = block(&[(0xFF, 1), (0x81, 2), (0, 3), (0, 4), (0, 5), (0, 6), (0, 7), (0, 8), (0x10, 9), (0, 10), (0, 11)]);
        let first = parse_hierarchy_block(&buf, "r24").unwrap();
        for _ in 0..10 {
            assert_eq!(parse_hierarchy_block(&buf, "r24").unwrap(), first);
        }
        assert_eq!(first.len(), 11);
        assert_eq!(first[9].name, "r2400");
        assert_eq!(first[10].name, "r2407");
    }

    #[test]
    fn stops_when_the_buffer_is_exhausted() {
        // children of r1 and r2 are not part of this block
        let buf = block(&[(0b0110, 10), (0xFF, 4), (0x01, 6)]);
        let entries = parse_hierarchy_block(&buf, "r").unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().skip(1).all(HierarchyEntry::has_children));
    }

    #[test]
    fn malformed_blocks() {
        assert!(matches!(parse_hierarchy_block(&[], "r"), Err(HierarchyError::Empty)));
        assert!(matches!(
            parse_hierarchy_block(&[1, 2, 3, 4, 5, 6], "r"),
            Err(HierarchyError::Truncated { len: 6 })
        ));
        // root announces two children, only one record follows
        let buf = block(&[(0b11, 10), (0, 4)]);
        assert!(matches!(
            parse_hierarchy_block(&buf, "r"),
            Err(HierarchyError::MissingChildren(name)) if name == "r"
        ));
        let buf = block(&[(0b11, 10), (0b1, 4), (0, 1)]);
        assert_eq!(parse_hierarchy_block(&buf, "r").unwrap().len(), 3);
    }

    #[test]
    fn flat_hierarchy_masks() {
        let pairs: Vec<(String, u32)> = [("r", 10), ("r0", 5), ("r6", 4), ("r06", 1)]
            .into_iter()
            .map(|(n, c)| (n.to_string(), c))
            .collect();
        let entries = flat_hierarchy_entries(&pairs).unwrap();
        assert_eq!(entries[0].child_mask, 0b0100_0001);
        assert_eq!(entries[1].child_mask, 0b0100_0000);
        assert_eq!(entries[2].child_mask, 0);

        let orphan = vec![("r".to_string(), 1), ("r12".to_string(), 1)];
        assert!(matches!(flat_hierarchy_entries(&orphan), Err(HierarchyError::Orphan(_))));

        let bad = vec![("r".to_string(), 1), ("r9".to_string(), 1)];
        assert!(matches!(flat_hierarchy_entries(&bad), Err(HierarchyError::InvalidName(_))));
    }

    #[test]
    fn paths_and_urls() {
        assert_eq!(hierarchy_path("r", 5), "r");
        assert_eq!(hierarchy_path("r0123", 5), "r");
        assert_eq!(hierarchy_path("r01234", 5), "r/01234");
        assert_eq!(hierarchy_path("r0123456789012", 5), "r/01234/56789");
        assert_eq!(hierarchy_path("r012345", 3), "r/012/345");

        let v15 = Version::new(1, 5);
        let v14 = Version::new(1, 4);
        assert_eq!(node_base_url("data", v15, 5, "r012345"), "data/r/01234/r012345");
        assert_eq!(node_base_url("data", v14, 5, "r012345"), "data/r012345");
        assert_eq!(hierarchy_url("data", 5, "r01234"), "data/r/01234/r01234.hrc");
    }

    #[test]
    fn hierarchy_block_boundaries() {
        assert!(needs_hierarchy_block(0, 5, true));
        assert!(!needs_hierarchy_block(0, 5, false));
        assert!(!needs_hierarchy_block(3, 5, true));
        assert!(needs_hierarchy_block(10, 5, true));
        assert!(!needs_hierarchy_block(4, 0, true));
    }
}
