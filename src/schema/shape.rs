//! Synthetic shapes used to drive APR construction from a configuration.

use serde::{Deserialize, Serialize};

use crate::apr::ImageDims;

/// A synthetic object defining both the image intensity and the level
/// each voxel requires.
///
/// Required levels fall off with the distance to the object's surface:
/// voxels on the surface ask for `level_max`, and every doubling of the
/// distance drops one level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Shape {
    /// Solid sphere.
    Sphere {
        /// Center position as fraction of image size (y, x, z).
        center: (f32, f32, f32),
        /// Radius as fraction of the largest image dimension.
        radius: f32,
        /// Intensity inside the sphere.
        intensity: f32,
        /// Intensity outside the sphere.
        #[serde(default)]
        background: f32,
    },
    /// Spherical shell between two radii.
    Shell {
        center: (f32, f32, f32),
        inner_radius: f32,
        outer_radius: f32,
        intensity: f32,
        #[serde(default)]
        background: f32,
    },
    /// Constant image at a single level.
    Uniform {
        intensity: f32,
        #[serde(default)]
        level: u8,
    },
}

impl Default for Shape {
    fn default() -> Self {
        Shape::Sphere {
            center: (0.5, 0.5, 0.5),
            radius: 0.3,
            intensity: 1000.0,
            background: 100.0,
        }
    }
}

impl Shape {
    /// Check radii and centres; returns a description of the first problem.
    pub fn check(&self) -> Result<(), String> {
        match *self {
            Shape::Sphere { radius, .. } if !(radius > 0.0) => {
                Err(format!("sphere radius must be positive, got {}", radius))
            }
            Shape::Shell {
                inner_radius,
                outer_radius,
                ..
            } if !(inner_radius >= 0.0 && outer_radius > inner_radius) => Err(format!(
                "shell radii must satisfy 0 <= inner < outer, got {} and {}",
                inner_radius, outer_radius
            )),
            _ => Ok(()),
        }
    }

    /// Intensity of voxel `(y, x, z)`.
    pub fn intensity(&self, dims: ImageDims, y: u32, x: u32, z: u32) -> f32 {
        match *self {
            Shape::Sphere {
                center,
                radius,
                intensity,
                background,
            } => {
                let r = distance_from(dims, center, y, x, z);
                if r <= radius * scale(dims) { intensity } else { background }
            }
            Shape::Shell {
                center,
                inner_radius,
                outer_radius,
                intensity,
                background,
            } => {
                let r = distance_from(dims, center, y, x, z);
                let s = scale(dims);
                if r >= inner_radius * s && r <= outer_radius * s {
                    intensity
                } else {
                    background
                }
            }
            Shape::Uniform { intensity, .. } => intensity,
        }
    }

    /// Level required at voxel `(y, x, z)`, before clamping to the level range.
    pub fn required_level(&self, dims: ImageDims, level_max: u8, y: u32, x: u32, z: u32) -> u8 {
        let surface_distance = match *self {
            Shape::Sphere { center, radius, .. } => {
                (distance_from(dims, center, y, x, z) - radius * scale(dims)).abs()
            }
            Shape::Shell {
                center,
                inner_radius,
                outer_radius,
                ..
            } => {
                let r = distance_from(dims, center, y, x, z);
                let s = scale(dims);
                (r - inner_radius * s).abs().min((r - outer_radius * s).abs())
            }
            Shape::Uniform { level, .. } => return level,
        };
        let drop = (1.0 + surface_distance).log2().floor() as u32;
        level_max.saturating_sub(drop.min(u8::MAX as u32) as u8)
    }
}

fn scale(dims: ImageDims) -> f32 {
    dims.y_num.max(dims.x_num).max(dims.z_num) as f32
}

/// Distance in voxels from the centre of voxel `(y, x, z)` to `center`.
fn distance_from(dims: ImageDims, center: (f32, f32, f32), y: u32, x: u32, z: u32) -> f32 {
    let dy = y as f32 + 0.5 - center.0 * dims.y_num as f32;
    let dx = x as f32 + 0.5 - center.1 * dims.x_num as f32;
    let dz = z as f32 + 0.5 - center.2 * dims.z_num as f32;
    (dy * dy + dx * dx + dz * dz).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_intensity() {
        let dims = ImageDims::new(32, 32, 32);
        let shape = Shape::default();
        assert_eq!(shape.intensity(dims, 16, 16, 16), 1000.0);
        assert_eq!(shape.intensity(dims, 0, 0, 0), 100.0);
    }

    #[test]
    fn test_levels_fall_off_from_surface() {
        let dims = ImageDims::new(64, 64, 64);
        let shape = Shape::Sphere {
            center: (0.5, 0.5, 0.5),
            radius: 0.25,
            intensity: 1.0,
            background: 0.0,
        };
        // Radius 16 voxels; voxel 15 along y sits on the surface.
        assert_eq!(shape.required_level(dims, 6, 47, 32, 32), 6);
        let centre = shape.required_level(dims, 6, 32, 32, 32);
        let corner = shape.required_level(dims, 6, 0, 0, 0);
        assert!(centre < 6);
        assert!(corner < 6);
    }

    #[test]
    fn test_uniform_level() {
        let shape = Shape::Uniform {
            intensity: 3.0,
            level: 2,
        };
        let dims = ImageDims::new(8, 8, 8);
        assert_eq!(shape.required_level(dims, 3, 1, 2, 3), 2);
        assert_eq!(shape.intensity(dims, 1, 2, 3), 3.0);
    }

    #[test]
    fn test_check_rejects_bad_radii() {
        let shell = Shape::Shell {
            center: (0.5, 0.5, 0.5),
            inner_radius: 0.3,
            outer_radius: 0.2,
            intensity: 1.0,
            background: 0.0,
        };
        assert!(shell.check().is_err());
        assert!(Shape::default().check().is_ok());
    }

    #[test]
    fn test_serde_tagged() {
        let json = r#"{"type": "Uniform", "intensity": 5.0}"#;
        let shape: Shape = serde_json::from_str(json).unwrap();
        assert_eq!(
            shape,
            Shape::Uniform {
                intensity: 5.0,
                level: 0
            }
        );
    }
}
