//! Saturating quantization of posting values.
//!
//! Postings keep their weights in a narrower "stored" type than the `f32`
//! values callers ingest. Narrowing clamps to the stored type's range, so
//! round trips through `save`/`load` reflect that loss.

use half::{bf16, f16};
use std::fmt::Debug;

/// A posting value type. `Pod` lets mmap-backed stores view raw bytes as `[Self]`.
pub trait StoredValue: bytemuck::Pod + Debug + Send + Sync + 'static {
    const NAME: &'static str;

    /// Narrow a logical value into the stored type.
    fn quantize(value: f32) -> Self;

    /// Widen a stored value back into the logical type.
    fn to_f32(self) -> f32;
}

impl StoredValue for f32 {
    const NAME: &'static str = "f32";

    #[inline]
    fn quantize(value: f32) -> Self {
        value
    }

    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

macro_rules! impl_float_stored_value {
    ($ty:ty, $name:literal) => {
        impl StoredValue for $ty {
            const NAME: &'static str = $name;

            #[inline]
            fn quantize(value: f32) -> Self {
                let max = <$ty>::MAX.to_f32();
                let min = <$ty>::MIN.to_f32();
                if value >= max {
                    <$ty>::MAX
                } else if value <= min {
                    <$ty>::MIN
                } else {
                    <$ty>::from_f32(value)
                }
            }

            #[inline]
            fn to_f32(self) -> f32 {
                <$ty>::to_f32(self)
            }
        }
    };
}

impl_float_stored_value!(f16, "f16");
impl_float_stored_value!(bf16, "bf16");

macro_rules! impl_int_stored_value {
    ($ty:ty, $name:literal) => {
        impl StoredValue for $ty {
            const NAME: &'static str = $name;

            #[inline]
            fn quantize(value: f32) -> Self {
                if value >= <$ty>::MAX as f32 {
                    <$ty>::MAX
                } else if value <= <$ty>::MIN as f32 {
                    <$ty>::MIN
                } else {
                    value as $ty
                }
            }

            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }
        }
    };
}

impl_int_stored_value!(u8, "u8");
impl_int_stored_value!(u16, "u16");
