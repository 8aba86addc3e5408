//! Scalar types that can be stored in particle files.

use bytemuck::Pod;

/// A plain-old-data particle value with a stable on-disk type tag.
pub trait ParticleScalar: Pod + Default + PartialEq + std::fmt::Debug + Send + Sync {
    const TAG: u8;
    const NAME: &'static str;
}

macro_rules! impl_particle_scalar {
    ($($ty:ty => $tag:expr),* $(,)?) => {
        $(
            impl ParticleScalar for $ty {
                const TAG: u8 = $tag;
                const NAME: &'static str = stringify!($ty);
            }
        )*
    };
}

impl_particle_scalar! {
    u8 => 1,
    u16 => 2,
    u32 => 3,
    u64 => 4,
    i16 => 5,
    i32 => 6,
    f32 => 7,
    f64 => 8,
}

/// Name of the scalar type stored under `tag`, for diagnostics.
pub fn scalar_name(tag: u8) -> Option<&'static str> {
    Some(match tag {
        1 => u8::NAME,
        2 => u16::NAME,
        3 => u32::NAME,
        4 => u64::NAME,
        5 => i16::NAME,
        6 => i32::NAME,
        7 => f32::NAME,
        8 => f64::NAME,
        _ => return None,
    })
}
