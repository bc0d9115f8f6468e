use anyhow::Result;
use half::f16;
use web_unshuffle::{
    context::{Context, ContextBuilder, InstanceExt},
    reference::{self, FP16_MAX_DIFF},
    wgpu::{Instance, PowerPreference},
    Backend, DataLayout, Error, ImageCopy, ImageShape, Kernel, KernelContext, KernelRegistry,
    KernelState, LayoutError, OpDesc, OpLite, Operator, Precision, Scope, Shape,
};

#[tokio::main]
async fn create_context() -> Result<Context> {
    let instance = Instance::default();
    let adapter = instance.adapter(PowerPreference::HighPerformance).await?;
    let context = ContextBuilder::new(adapter).build().await?;
    Ok(context)
}

fn unshuffle_desc(factor: i64) -> OpDesc {
    OpDesc::new("pixel_unshuffle")
        .input("X", "x")
        .output("Out", "out")
        .attr("downscale_factor", factor)
}

/// Drive the full path: registry, operator, kernel, upload, launch, download.
fn run(context: &Context, shape: Shape, factor: i64, data: &[f32]) -> Result<(Vec<f32>, Shape)> {
    let registry = KernelRegistry::with_builtin();

    let mut scope = Scope::new();
    let x = scope.var("x");
    let output = scope.var("out");
    x.resize(shape);

    let op = Operator::create(&unshuffle_desc(factor), &scope)?;
    op.check_shape()?;
    let output_shape = op.infer_shape()?;
    output.check_shape(output_shape)?;

    let mut kernels = registry.create(
        op.debug_string(),
        Backend::WebGpu,
        Precision::Fp16,
        DataLayout::ImageDefault,
    );
    assert_eq!(kernels.len(), 1);
    let kernel = &mut kernels[0];
    op.attach_kernel(&mut **kernel)?;

    let mut shared = KernelContext::default();
    shared.init_once(context);
    kernel.set_context(shared.copy_shared())?;
    assert_eq!(kernel.state(), KernelState::ContextBound);

    x.upload(context, data)?;
    kernel.launch()?.wait();
    assert_eq!(kernel.state(), KernelState::Launched);

    let actual = output.download()?;
    Ok((actual, output_shape))
}

#[test]
fn test_scenario() -> Result<()> {
    let context = match create_context() {
        Ok(context) => context,
        Err(_) => return Ok(()),
    };

    let data: Vec<f32> = (0..16).map(|x| x as f32).collect();
    let (actual, shape) = run(&context, Shape::new(1, 1, 4, 4), 2, &data)?;
    assert_eq!(shape, Shape::new(1, 4, 2, 2));
    assert_eq!(
        actual,
        [0, 2, 8, 10, 1, 3, 9, 11, 4, 6, 12, 14, 5, 7, 13, 15].map(|x| x as f32)
    );
    Ok(())
}

#[test]
fn test_against_reference() -> Result<()> {
    let context = match create_context() {
        Ok(context) => context,
        Err(_) => return Ok(()),
    };

    for (shape, factor) in [
        (Shape::new(1, 3, 8, 8), 2),
        (Shape::new(2, 4, 6, 12), 3),
        (Shape::new(1, 6, 16, 4), 4),
        (Shape::new(2, 1, 5, 5), 5),
    ] {
        let data: Vec<f32> = (0..shape.len())
            .map(|_| 10.0 * (fastrand::f32() - 0.5))
            .collect();
        let (actual, output_shape) = run(&context, shape, factor, &data)?;
        let (expected, expected_shape) = reference::pixel_unshuffle(&data, shape, factor as usize)?;
        assert_eq!(output_shape, expected_shape);
        for (index, (&a, &b)) in actual.iter().zip(expected.iter()).enumerate() {
            assert!(
                reference::is_approx(a, b, FP16_MAX_DIFF),
                "{shape} r={factor}: mismatch at {index}, {a} vs {b}"
            );
        }

        // the inverse transform on the host restores the input up to fp16 rounding
        let (restored, restored_shape) =
            reference::pixel_shuffle(&actual, output_shape, factor as usize)?;
        assert_eq!(restored_shape, shape);
        for (&a, &b) in restored.iter().zip(data.iter()) {
            assert_eq!(a, f16::from_f32(b).to_f32());
        }
    }
    Ok(())
}

#[test]
fn test_pitched_read() -> Result<()> {
    let context = match create_context() {
        Ok(context) => context,
        Err(_) => return Ok(()),
    };

    let data: Vec<f32> = (0..16).map(|x| x as f32).collect();
    let (_, shape) = run(&context, Shape::new(1, 1, 4, 4), 2, &data)?;

    // the output image is a single 2x2 texel block; read it back with padded rows
    let image_shape = ImageShape::from(shape);
    assert_eq!(image_shape, ImageShape::new(2, 2));

    let mut scope = Scope::new();
    let x = scope.var("x");
    x.resize(shape);
    let data: Vec<f32> = [0, 2, 8, 10, 1, 3, 9, 11, 4, 6, 12, 14, 5, 7, 13, 15]
        .map(|x| x as f32)
        .to_vec();
    let image = x.upload(&context, &data)?;

    let row_pitch = 3 * 4 * std::mem::size_of::<f16>();
    let copy = ImageCopy::new(image_shape).with_pitch(row_pitch, 0);
    let texels = image.read(copy)?;
    assert_eq!(texels.len(), 2 * 3 * 4);

    // texel (0, 0) holds channels 0..4 at (h, w) = (0, 0)
    let first: Vec<f32> = texels[..4].iter().map(|x| x.to_f32()).collect();
    assert_eq!(first, vec![0.0, 1.0, 4.0, 5.0]);
    // the padding texel of each row is left zero
    assert!(texels[8..12].iter().all(|x| *x == f16::ZERO));
    Ok(())
}

#[test]
fn test_pitched_write() -> Result<()> {
    let context = match create_context() {
        Ok(context) => context,
        Err(_) => return Ok(()),
    };

    // two channels, so each texel carries two spare lanes
    let shape = Shape::new(1, 2, 2, 3);
    let image_shape = ImageShape::from(shape);
    assert_eq!(image_shape, ImageShape::new(3, 2));

    let mut scope = Scope::new();
    let x = scope.var("x");
    x.resize(shape);
    let image = x.upload(&context, &vec![0.0f32; shape.len()])?;

    // rows of 3 texels written 5 texels apart; the gap holds garbage that must not land
    let texel = 4;
    let row_pitch = 5 * texel * std::mem::size_of::<f16>();
    let mut padded = vec![f16::from_f32(-1.0); 2 * 5 * texel];
    for (y, row) in padded.chunks_exact_mut(5 * texel).enumerate() {
        for (index, lane) in row[..3 * texel].iter_mut().enumerate() {
            *lane = f16::from_f32((y * 3 * texel + index) as f32);
        }
    }
    image.write(&padded, ImageCopy::new(image_shape).with_pitch(row_pitch, 0))?;

    let tight = image.read(ImageCopy::new(image_shape))?;
    let expected: Vec<f16> = (0..2 * 3 * texel).map(|x| f16::from_f32(x as f32)).collect();
    assert_eq!(tight, expected);

    // texel (x, y) carries (h, w) = (y, x), channel c in lane c
    let values: Vec<f32> = x.download()?;
    assert_eq!(values, vec![0.0, 4.0, 8.0, 12.0, 16.0, 20.0, 1.0, 5.0, 9.0, 13.0, 17.0, 21.0]);
    Ok(())
}

#[test]
fn test_download_after_reshape() -> Result<()> {
    let context = match create_context() {
        Ok(context) => context,
        Err(_) => return Ok(()),
    };

    let mut scope = Scope::new();
    let x = scope.var("x");
    x.resize([1, 1, 1, 4]);
    x.upload(&context, &[1.0f32, 2.0, 3.0, 4.0])?;

    // same element count, but the packed image would be 1x4 instead of 4x1
    x.resize([1, 1, 4, 1]);
    let err = x.download::<f32>().unwrap_err();
    assert_eq!(
        err,
        Error::Layout(LayoutError::ImageShape {
            expected: ImageShape::new(1, 4),
            actual: ImageShape::new(4, 1),
        })
    );
    Ok(())
}

#[test]
fn test_shape_failure() {
    let mut scope = Scope::new();
    scope.var("x").resize([1, 1, 6, 4]);
    scope.var("out");

    let op = Operator::create(&unshuffle_desc(4), &scope).expect("attach succeeds");
    assert!(op.check_shape().is_err());
    assert!(op.infer_shape().is_err());
    assert!(scope.var("out").dims().is_empty());
}
