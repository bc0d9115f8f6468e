//! Host-side pixel (un)shuffle on linear NCHW data, used to verify device results.
use crate::{
    num::Scalar,
    operator::{pixel_shuffle_shape, pixel_unshuffle_shape},
    tensor::Shape,
    LayoutError,
};

/// Largest deviation accepted when comparing fp16 device output against an fp32 reference.
pub const FP16_MAX_DIFF: f32 = 5.0e-1;

/// Source coordinate `(c, h, w)` in the input for output channel `c` at `(h, w)`.
/// Each `r × r` block of the input becomes `r²` consecutive groups of `C` output channels,
/// in row-major block order.
#[inline]
pub fn unshuffle_source(
    input_channels: usize,
    factor: usize,
    c: usize,
    h: usize,
    w: usize,
) -> (usize, usize, usize) {
    let block = c / input_channels;
    (
        c % input_channels,
        h * factor + block / factor,
        w * factor + block % factor,
    )
}

fn check_len<T>(data: &[T], shape: Shape) -> Result<(), crate::Error> {
    match data.len() == shape.len() {
        true => Ok(()),
        false => Err(LayoutError::Size {
            expected: shape.len(),
            actual: data.len(),
        }
        .into()),
    }
}

/// Pixel-unshuffle `data` of `shape` by `factor`; returns the output and its shape.
pub fn pixel_unshuffle<T: Scalar>(
    data: &[T],
    shape: Shape,
    factor: usize,
) -> Result<(Vec<T>, Shape), crate::Error> {
    check_len(data, shape)?;
    let output_shape = pixel_unshuffle_shape(shape, factor)?;

    let mut output = Vec::with_capacity(output_shape.len());
    for n in 0..output_shape.n() {
        for c in 0..output_shape.c() {
            for h in 0..output_shape.h() {
                for w in 0..output_shape.w() {
                    let (c, h, w) = unshuffle_source(shape.c(), factor, c, h, w);
                    output.push(data[shape.shape_index(n, c, h, w)]);
                }
            }
        }
    }
    Ok((output, output_shape))
}

/// The inverse of [`pixel_unshuffle`] with the same channel ordering.
pub fn pixel_shuffle<T: Scalar>(
    data: &[T],
    shape: Shape,
    factor: usize,
) -> Result<(Vec<T>, Shape), crate::Error> {
    check_len(data, shape)?;
    let output_shape = pixel_shuffle_shape(shape, factor)?;

    let mut output = vec![T::zero(); output_shape.len()];
    for n in 0..shape.n() {
        for c in 0..shape.c() {
            for h in 0..shape.h() {
                for w in 0..shape.w() {
                    let (c_out, h_out, w_out) =
                        unshuffle_source(output_shape.c(), factor, c, h, w);
                    output[output_shape.shape_index(n, c_out, h_out, w_out)] =
                        data[shape.shape_index(n, c, h, w)];
                }
            }
        }
    }
    Ok((output, output_shape))
}

/// Whether `a` and `b` agree within `max_diff`, either absolutely or relative to the larger magnitude.
pub fn is_approx(a: f32, b: f32, max_diff: f32) -> bool {
    let abs_diff = (a - b).abs();
    let scale = a.abs().max(b.abs());
    let relative_diff = match scale > 0.0 {
        true => abs_diff / scale,
        false => 0.0,
    };
    abs_diff <= max_diff || relative_diff <= max_diff
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use itertools::Itertools;

    use super::{is_approx, pixel_shuffle, pixel_unshuffle};
    use crate::{tensor::Shape, Error, ShapeError};

    #[test]
    fn test_unshuffle_scenario() -> Result<()> {
        let shape = Shape::new(1, 1, 4, 4);
        let data = (0..16).map(|x| x as f32).collect_vec();
        let (output, output_shape) = pixel_unshuffle(&data, shape, 2)?;
        assert_eq!(output_shape, Shape::new(1, 4, 2, 2));
        assert_eq!(
            output,
            vec![
                0.0, 2.0, 8.0, 10.0, 1.0, 3.0, 9.0, 11.0, 4.0, 6.0, 12.0, 14.0, 5.0, 7.0, 13.0,
                15.0
            ]
        );
        Ok(())
    }

    #[test]
    fn test_identity() -> Result<()> {
        for shape in [
            Shape::new(1, 1, 1, 1),
            Shape::new(2, 3, 5, 7),
            Shape::new(1, 8, 4, 2),
        ] {
            let data = (0..shape.len()).map(|x| x as f32).collect_vec();
            let (output, output_shape) = pixel_unshuffle(&data, shape, 1)?;
            assert_eq!(output_shape, shape);
            assert_eq!(output, data);
        }
        Ok(())
    }

    #[test]
    fn test_inverse() -> Result<()> {
        let cases = [
            (Shape::new(1, 1, 4, 4), 2),
            (Shape::new(2, 3, 6, 9), 3),
            (Shape::new(1, 5, 8, 4), 4),
            (Shape::new(3, 2, 2, 2), 2),
        ];
        for (shape, factor) in cases {
            let data = (0..shape.len()).map(|_| fastrand::f32()).collect_vec();
            let (output, output_shape) = pixel_unshuffle(&data, shape, factor)?;
            assert_eq!(
                output_shape,
                Shape::new(
                    shape.n(),
                    shape.c() * factor * factor,
                    shape.h() / factor,
                    shape.w() / factor
                )
            );
            let (restored, restored_shape) = pixel_shuffle(&output, output_shape, factor)?;
            assert_eq!(restored_shape, shape);
            assert_eq!(restored, data);
        }
        Ok(())
    }

    #[test]
    fn test_channel_order() -> Result<()> {
        // with C = 2 the first C output channels hold block 0 of every input channel
        let shape = Shape::new(1, 2, 2, 2);
        let data = vec![0.0f32, 1.0, 2.0, 3.0, 10.0, 11.0, 12.0, 13.0];
        let (output, _) = pixel_unshuffle(&data, shape, 2)?;
        assert_eq!(
            output,
            vec![0.0, 10.0, 1.0, 11.0, 2.0, 12.0, 3.0, 13.0]
        );
        Ok(())
    }

    #[test]
    fn test_indivisible() {
        let shape = Shape::new(1, 1, 4, 6);
        let data = vec![0.0f32; shape.len()];
        let err = pixel_unshuffle(&data, shape, 4).unwrap_err();
        assert!(matches!(
            err,
            Error::Shape(ShapeError::Indivisible { size: 6, factor: 4, .. })
        ));
    }

    #[test]
    fn test_is_approx() {
        assert!(is_approx(1.0, 1.2, 0.5));
        assert!(is_approx(100.0, 120.0, 0.5));
        assert!(!is_approx(1.0, 3.0, 0.5));
        assert!(is_approx(0.0, 0.0, 0.0));
    }
}
