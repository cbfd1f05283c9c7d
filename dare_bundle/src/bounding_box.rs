use bytemuck::{Pod, Zeroable};

/// Describes an axis aligned bounding box in 3d space
///
/// Stored as plain arrays so it can live inside bundle records as is.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct BoundingBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    /// Bounding box containing nothing, the identity of [`BoundingBox::union`]
    pub const EMPTY: Self = Self {
        min: [f32::INFINITY; 3],
        max: [f32::NEG_INFINITY; 3],
    };

    pub fn new(min: glam::Vec3, max: glam::Vec3) -> Self {
        Self {
            min: min.to_array(),
            max: max.to_array(),
        }
    }

    /// Smallest bounding box containing every point
    pub fn from_points<I: IntoIterator<Item = glam::Vec3>>(points: I) -> Self {
        points.into_iter().fold(Self::EMPTY, |bounds, point| {
            Self::new(bounds.min().min(point), bounds.max().max(point))
        })
    }

    pub fn min(&self) -> glam::Vec3 {
        glam::Vec3::from_array(self.min)
    }

    pub fn max(&self) -> glam::Vec3 {
        glam::Vec3::from_array(self.max)
    }

    pub fn is_empty(&self) -> bool {
        self.min().cmpgt(self.max()).any()
    }

    pub fn center(&self) -> glam::Vec3 {
        (self.min() + self.max()) * 0.5
    }

    /// Correct the existing bounding box ensuring minimum bounds are minimum and maximum bounds are maximum extents
    pub fn correct(&mut self) {
        let min = self.min();
        let max = self.max();
        *self = Self::new(min.min(max), max.max(min));
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::new(self.min().min(other.min()), self.max().max(other.max()))
    }

    /// Bounding box of the 8 transformed corners
    pub fn transform(&self, transform: &glam::Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let (min, max) = (self.min(), self.max());
        Self::from_points((0..8).map(|corner| {
            let point = glam::Vec3::new(
                if corner & 1 == 0 { min.x } else { max.x },
                if corner & 2 == 0 { min.y } else { max.y },
                if corner & 4 == 0 { min.z } else { max.z },
            );
            transform.transform_point3(point)
        }))
    }
}
