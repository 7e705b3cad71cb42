//! Frustum planes and sphere tests.
//!
//! Planes are extracted from a projection (or view-projection) matrix, so
//! they live in whatever space that matrix maps from.

/// A plane in 3D space (Ax + By + Cz + D = 0).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Plane {
    /// Normal X component.
    pub a: f32,
    /// Normal Y component.
    pub b: f32,
    /// Normal Z component.
    pub c: f32,
    /// Distance from origin.
    pub d: f32,
}

impl Plane {
    /// Creates a new plane.
    #[must_use]
    pub const fn new(a: f32, b: f32, c: f32, d: f32) -> Self {
        Self { a, b, c, d }
    }

    /// Normalizes the plane.
    #[must_use]
    pub fn normalized(self) -> Self {
        let len = (self.a * self.a + self.b * self.b + self.c * self.c).sqrt();
        if len > 0.0 {
            Self {
                a: self.a / len,
                b: self.b / len,
                c: self.c / len,
                d: self.d / len,
            }
        } else {
            self
        }
    }

    /// Returns the signed distance from a point to the plane.
    #[inline]
    #[must_use]
    pub fn distance_to_point(&self, p: [f32; 3]) -> f32 {
        self.a * p[0] + self.b * p[1] + self.c * p[2] + self.d
    }
}

/// View frustum.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Frustum {
    /// Left, right, bottom, top, near, far planes.
    pub planes: [Plane; 6],
}

impl Frustum {
    /// Left plane index.
    pub const LEFT: usize = 0;
    /// Right plane index.
    pub const RIGHT: usize = 1;
    /// Bottom plane index.
    pub const BOTTOM: usize = 2;
    /// Top plane index.
    pub const TOP: usize = 3;
    /// Near plane index.
    pub const NEAR: usize = 4;
    /// Far plane index.
    pub const FAR: usize = 5;

    /// Extracts the six planes from a column-major clip matrix
    /// (`m[column][row]`, clip depth -w..w).
    #[must_use]
    pub fn from_matrix(m: &[[f32; 4]; 4]) -> Self {
        let row = |r: usize| [m[0][r], m[1][r], m[2][r], m[3][r]];
        let (r0, r1, r2, r3) = (row(0), row(1), row(2), row(3));
        let plus = |x: [f32; 4]| Plane::new(r3[0] + x[0], r3[1] + x[1], r3[2] + x[2], r3[3] + x[3]).normalized();
        let minus = |x: [f32; 4]| Plane::new(r3[0] - x[0], r3[1] - x[1], r3[2] - x[2], r3[3] - x[3]).normalized();

        let mut planes = [Plane::default(); 6];
        planes[Self::LEFT] = plus(r0);
        planes[Self::RIGHT] = minus(r0);
        planes[Self::BOTTOM] = plus(r1);
        planes[Self::TOP] = minus(r1);
        planes[Self::NEAR] = plus(r2);
        planes[Self::FAR] = minus(r2);
        Self { planes }
    }

    /// Tests if a sphere intersects the frustum.
    ///
    /// A sphere is rejected only when it lies entirely behind one plane.
    #[must_use]
    pub fn test_sphere(&self, center: [f32; 3], radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to_point(center) >= -radius)
    }
}
