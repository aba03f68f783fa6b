use crate::octree::aabb::Aabb;

/// Owned copy of a subtree, children ordered by octant.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeSnapshot {
    pub name: String,
    pub bounding_box: Aabb,
    pub spacing: f64,
    pub level: u32,
    pub num_points: u32,
    pub has_children: bool,
    pub loaded: bool,
    pub children: Vec<NodeSnapshot>,
}

pub struct SnapshotIter<'a> {
    stack: Vec<&'a NodeSnapshot>,
}

impl<'a> Iterator for SnapshotIter<'a> {
    type Item = &'a NodeSnapshot;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        for child in node.children.iter().rev() {
            self.stack.push(child);
        }
        Some(node)
    }
}

impl NodeSnapshot {
    /// Depth-first, pre-order.
    pub fn iter(&self) -> SnapshotIter<'_> {
        SnapshotIter { stack: vec![self] }
    }

    pub fn find(&self, name: &str) -> Option<&NodeSnapshot> {
        self.iter().find(|node| node.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(name: &str) -> NodeSnapshot {
        NodeSnapshot {
            name: name.to_string(),
            level: name.len() as u32 - 1,
            ..Default::default()
        }
    }

    #[test]
    fn pre_order() {
        let mut r0 = leaf("r0");
        r0.children = vec![leaf("r01"), leaf("r06")];
        let mut root = leaf("r");
        root.children = vec![r0, leaf("r4")];

        let names: Vec<_> = root.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["r", "r0", "r01", "r06", "r4"]);
        assert_eq!(root.iter().count(), 5);
        assert_eq!(root.find("r06").map(|n| n.level), Some(2));
        assert!(root.find("r7").is_none());
    }
}
