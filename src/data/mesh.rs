//! Dense 3D pixel arrays.

use crate::apr::ImageDims;

/// Dense image with y as the fastest axis: `index = y + x * y_num + z * x_num * y_num`.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshData<T> {
    pub y_num: u32,
    pub x_num: u32,
    pub z_num: u32,
    pub mesh: Vec<T>,
}

impl<T: Copy> MeshData<T> {
    pub fn new(y_num: u32, x_num: u32, z_num: u32, value: T) -> Self {
        Self {
            y_num,
            x_num,
            z_num,
            mesh: vec![value; y_num as usize * x_num as usize * z_num as usize],
        }
    }

    pub fn from_dims(dims: ImageDims, value: T) -> Self {
        Self::new(dims.y_num, dims.x_num, dims.z_num, value)
    }

    /// Image whose pixel `(y, x, z)` is `f(y, x, z)`.
    pub fn from_fn<F>(dims: ImageDims, f: F) -> Self
    where
        F: Fn(u32, u32, u32) -> T,
    {
        let mut mesh = Vec::with_capacity(dims.num_voxels());
        for z in 0..dims.z_num {
            for x in 0..dims.x_num {
                for y in 0..dims.y_num {
                    mesh.push(f(y, x, z));
                }
            }
        }
        Self {
            y_num: dims.y_num,
            x_num: dims.x_num,
            z_num: dims.z_num,
            mesh,
        }
    }

    #[inline]
    pub fn at(&self, y: u32, x: u32, z: u32) -> T {
        self.mesh[self.index(y, x, z)]
    }

    #[inline]
    pub fn set(&mut self, y: u32, x: u32, z: u32, value: T) {
        let idx = self.index(y, x, z);
        self.mesh[idx] = value;
    }
}

impl<T> MeshData<T> {
    #[inline]
    pub fn index(&self, y: u32, x: u32, z: u32) -> usize {
        (z as usize * self.x_num as usize + x as usize) * self.y_num as usize + y as usize
    }

    pub fn dims(&self) -> ImageDims {
        ImageDims::new(self.y_num, self.x_num, self.z_num)
    }

    /// Number of pixels in one z plane.
    #[inline]
    pub fn plane_len(&self) -> usize {
        self.y_num as usize * self.x_num as usize
    }

    pub fn len(&self) -> usize {
        self.mesh.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mesh.is_empty()
    }
}
