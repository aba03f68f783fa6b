use glam::DVec3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// An inverted box, the identity for [`Aabb::expand_by_point`].
    pub const EMPTY: Aabb = Aabb {
        min: DVec3::INFINITY,
        max: DVec3::NEG_INFINITY,
    };

    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn volume(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let size = self.size();
        size.x * size.y * size.z
    }

    pub fn expand_by_point(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    pub fn translated(&self, offset: DVec3) -> Aabb {
        Aabb::new(self.min + offset, self.max + offset)
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere {
            center: self.center(),
            radius: self.size().length() * 0.5,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

/// Box of the octant `index` of `aabb`.
///
/// Bit 0 selects the upper z half, bit 1 the upper y half, bit 2 the upper x half.
pub fn create_child_aabb(aabb: &Aabb, index: usize) -> Aabb {
    let mut min = aabb.min;
    let mut max = aabb.max;
    let size = (max - min) * 0.5;

    if (index & 0b0001) > 0 {
        min.z += size.z;
    } else {
        max.z -= size.z;
    }
    if (index & 0b0010) > 0 {
        min.y += size.y;
    } else {
        max.y -= size.y;
    }
    if (index & 0b0100) > 0 {
        min.x += size.x;
    } else {
        max.x -= size.x;
    }

    Aabb::new(min, max)
}

/// Axis of a binary (kd) split.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SplitAxis {
    X,
    Y,
    Z,
}

/// Half of `aabb` along `axis`; `upper` selects the half with larger coordinates.
pub fn create_kd_child_aabb(aabb: &Aabb, axis: SplitAxis, upper: bool) -> Aabb {
    let mut min = aabb.min;
    let mut max = aabb.max;
    let center = aabb.center();

    let (lo, hi, mid) = match axis {
        SplitAxis::X => (&mut min.x, &mut max.x, center.x),
        SplitAxis::Y => (&mut min.y, &mut max.y, center.y),
        SplitAxis::Z => (&mut min.z, &mut max.z, center.z),
    };
    if upper {
        *lo = mid;
    } else {
        *hi = mid;
    }

    Aabb::new(min, max)
}
