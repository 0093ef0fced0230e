use nalgebra::Matrix4;

/// Append-only sequence of absolute `4x4` camera poses.
///
/// Index 0 is the identity: the world origin sits at the first frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Trajectory {
    poses: Vec<Matrix4<f64>>,
}

impl Default for Trajectory {
    fn default() -> Self {
        Self {
            poses: vec![Matrix4::identity()],
        }
    }
}

impl Trajectory {
    /// Appends `latest · relative` and returns it.
    pub fn compose(&mut self, relative: &Matrix4<f64>) -> Matrix4<f64> {
        let next = self.latest() * relative;
        self.poses.push(next);
        next
    }

    pub fn latest(&self) -> Matrix4<f64> {
        self.poses[self.poses.len() - 1]
    }

    pub fn poses(&self) -> &[Matrix4<f64>] {
        &self.poses
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    /// Never true: the origin pose is always present.
    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    /// Row-major copies, suitable for serialization.
    pub fn to_rows(&self) -> Vec<[[f64; 4]; 4]> {
        self.poses
            .iter()
            .map(|pose| std::array::from_fn(|r| std::array::from_fn(|c| pose[(r, c)])))
            .collect()
    }
}
