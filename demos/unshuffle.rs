//! Run pixel-unshuffle on a random tensor and verify it against the host reference.

use std::time::Instant;

use anyhow::{bail, Result};
use clap::Parser;
use web_unshuffle::{
    context::{Context, ContextBuilder, InstanceExt},
    reference::{self, FP16_MAX_DIFF},
    Backend, DataLayout, Kernel, KernelContext, KernelRegistry, OpDesc, OpLite, Operator, Precision,
    Scope, Shape,
};

async fn create_context(adapter: Option<usize>) -> Result<Context> {
    let instance = wgpu::Instance::default();
    let adapter = match adapter {
        Some(index) => {
            let adapters = instance.enumerate_adapters(wgpu::Backends::all());
            let count = adapters.len();
            match adapters.into_iter().nth(index) {
                Some(adapter) => adapter,
                None => bail!("adapter {index} not found, {count} available"),
            }
        }
        None => {
            instance
                .adapter(wgpu::PowerPreference::HighPerformance)
                .await?
        }
    };
    let context = ContextBuilder::new(adapter).build().await?;
    Ok(context)
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input shape as `N C H W`.
    #[arg(short, long, num_args = 4, value_names = ["N", "C", "H", "W"], default_values_t = [1, 3, 64, 64])]
    shape: Vec<usize>,
    #[arg(short = 'r', long, default_value_t = 2)]
    factor: i64,
    /// Index of the adapter to run on; picks a high performance one if absent.
    #[arg(short, long)]
    adapter: Option<usize>,
    #[arg(long, default_value_t = 1)]
    repeat: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Warn)
        .with_module_level("web_unshuffle", log::LevelFilter::Info)
        .with_module_level("unshuffle", log::LevelFilter::Info)
        .init()?;
    let cli = Cli::parse();

    let context = create_context(cli.adapter).await?;
    let registry = KernelRegistry::with_builtin();

    let mut scope = Scope::new();
    let x = scope.var("x");
    let output = scope.var("out");
    x.resize(cli.shape.clone());

    let desc = OpDesc::new("pixel_unshuffle")
        .input("X", "x")
        .output("Out", "out")
        .attr("downscale_factor", cli.factor);
    let op = Operator::create(&desc, &scope)?;
    op.check_shape()?;
    let output_shape = op.infer_shape()?;
    output.check_shape(output_shape)?;

    let mut kernels = registry.create(
        op.debug_string(),
        Backend::WebGpu,
        Precision::Fp16,
        DataLayout::ImageDefault,
    );
    if kernels.is_empty() {
        bail!("no kernel for {}", op.debug_string());
    }
    let mut kernel = kernels.swap_remove(0);
    log::info!("{}", kernel.doc());
    op.attach_kernel(&mut *kernel)?;
    kernel.set_context(KernelContext::new(context.clone()))?;

    let shape = Shape::try_from(x.dims())?;
    let data: Vec<f32> = (0..shape.len())
        .map(|_| 10.0 * (fastrand::f32() - 0.5))
        .collect();
    x.upload(&context, &data)?;

    let Operator::PixelUnshuffle(inner) = &op;
    let info = inner.runtime_info()?;
    log::info!("{} -> {} ({})", info.input_shape, info.output_shape, info.remark);

    let start = Instant::now();
    for _ in 0..cli.repeat.max(1) {
        kernel.launch()?.wait();
    }
    let elapsed = start.elapsed();

    let actual: Vec<f32> = output.download()?;
    let (expected, expected_shape) =
        reference::pixel_unshuffle(&data, shape, cli.factor as usize)?;
    assert_eq!(expected_shape, output_shape);

    let mismatches = actual
        .iter()
        .zip(expected.iter())
        .filter(|(a, b)| !reference::is_approx(**a, **b, FP16_MAX_DIFF))
        .count();
    let max_diff = actual
        .iter()
        .zip(expected.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);

    println!("{shape} -> {output_shape}");
    println!(
        "{} launches in {:.3} ms, max diff {max_diff:.4}, {mismatches} mismatches",
        cli.repeat.max(1),
        elapsed.as_secs_f64() * 1000.0
    );
    if mismatches > 0 {
        bail!("{mismatches} elements differ from the reference");
    }
    Ok(())
}
