use bytemuck::Pod;
use half::f16;

use crate::kernel::Precision;

pub trait Zero: Sized {
    fn zero() -> Self;
}

impl Zero for f32 {
    fn zero() -> Self {
        0.0
    }
}

impl Zero for f16 {
    fn zero() -> Self {
        Self::ZERO
    }
}

pub trait Scalar: Sized + Clone + Copy + Pod + Zero + std::fmt::Debug + sealed::Sealed {
    /// Size of the type in bytes.
    fn size() -> usize {
        std::mem::size_of::<Self>()
    }
}

impl Scalar for f32 {}
impl Scalar for f16 {}

/// Host-side floats that can be packed into (and recovered from) an fp16 image.
pub trait Float: Scalar + Hom<f16> + Hom<f32> + CoHom<f16> + CoHom<f32> {
    const PRECISION: Precision;
}

impl Float for f32 {
    const PRECISION: Precision = Precision::Fp32;
}

impl Float for f16 {
    const PRECISION: Precision = Precision::Fp16;
}

pub trait Hom<Into> {
    fn hom(self) -> Into;
}

impl Hom<f32> for f32 {
    fn hom(self) -> f32 {
        self
    }
}

impl Hom<f16> for f32 {
    /// Round to nearest, ties to even.
    fn hom(self) -> f16 {
        f16::from_f32(self)
    }
}

impl Hom<f32> for f16 {
    fn hom(self) -> f32 {
        self.to_f32()
    }
}

impl Hom<f16> for f16 {
    fn hom(self) -> f16 {
        self
    }
}

pub trait CoHom<From> {
    fn co_hom(value: From) -> Self;
}

impl<From, Into> CoHom<From> for Into
where
    From: Hom<Into>,
{
    fn co_hom(value: From) -> Self {
        value.hom()
    }
}

mod sealed {
    use half::f16;

    pub trait Sealed {}

    impl Sealed for f32 {}
    impl Sealed for f16 {}
}

#[cfg(test)]
mod tests {
    use half::f16;

    use super::{CoHom, Float, Hom};
    use crate::kernel::Precision;

    #[test]
    fn test_hom_rounding() {
        let x: f16 = 0.1f32.hom();
        assert_eq!(x, f16::from_f32(0.1));
        let y: f32 = f32::co_hom(x);
        assert!((y - 0.1).abs() < 1.0e-3);

        // 2049 sits between two fp16 values; ties go to even
        let z: f16 = 2049.0f32.hom();
        assert_eq!(z.to_f32(), 2048.0);
    }

    #[test]
    fn test_precision_tag() {
        assert_eq!(<f32 as Float>::PRECISION, Precision::Fp32);
        assert_eq!(<f16 as Float>::PRECISION, Precision::Fp16);
    }
}
