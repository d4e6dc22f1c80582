use anyhow::Context;
use clap::Parser;
use gui_bridge::bridge::GuiBridge;
use log::info;
use std::path::PathBuf;
use takecore::processing::ProductData;
use tokio::runtime::Builder as TokioBuilder;
use tokio::signal;
use workflow::config::{RecordingConfig, WorkflowConfig};
use workflow::runner::{Runner, WorkflowResult};

mod generator;
mod gui_bridge;
mod workflow;

#[derive(Parser)]
#[command(author, version, about = "Hyperspectral take acquisition driver")]
struct Args {
    /// Run the workflow to end of stream and print a summary
    #[arg(long, default_value_t = false)]
    offline: bool,
    /// Load a workflow config from YAML
    #[arg(long)]
    workflow: Option<PathBuf>,
    #[arg(long, default_value_t = 640)]
    width: usize,
    #[arg(long, default_value_t = 480)]
    height: usize,
    #[arg(long, default_value_t = 200)]
    frames: u64,
    /// Synthetic frame rate; 0 delivers frames unpaced
    #[arg(long, default_value_t = 100.0)]
    fps: f64,
    /// Record the run into this absolute path
    #[arg(long)]
    record: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    averaging: u64,
    /// Keep capturing and serve the HTTP bridge until Ctrl+C
    #[arg(long, default_value_t = false)]
    serve: bool,
}

fn summarize(result: &WorkflowResult) -> String {
    let product = match result.last_product.as_ref().map(|p| &p.data) {
        Some(ProductData::Frame { width, height, .. }) => format!("frame {}x{}", width, height),
        Some(ProductData::Profile { values, .. }) => format!("profile of {}", values.len()),
        Some(ProductData::Spectrum { magnitudes, .. }) => format!("spectrum of {} bins", magnitudes.len()),
        Some(ProductData::Overlay { center, .. }) => format!("overlay of {} rows", center.len()),
        None => "none".to_string(),
    };
    format!(
        "frames={} product_updates={} last_product={} mask_frames={:?} recording_completed={} errors={} fps={:.1}",
        result.frames,
        result.product_updates,
        product,
        result.mask_frames,
        result.recording_completed,
        result.errors.len(),
        result.metrics.fps
    )
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut workflow_config = if let Some(path) = &args.workflow {
        WorkflowConfig::load(path)?
    } else {
        WorkflowConfig::from_args(args.width, args.height, args.frames, args.fps)
    };
    if let Some(path) = args.record {
        workflow_config.recording = Some(RecordingConfig {
            path,
            frame_count: args.frames,
            averaging: args.averaging,
            confirm_overwrite: false,
        });
    }

    let runner = Runner::new(workflow_config);

    if args.offline {
        let result = runner.execute()?;
        println!("Offline run -> {}", summarize(&result));
        for error in &result.errors {
            println!("  error: {}", error);
        }
    }

    if args.serve {
        let live = runner.start_live()?;
        let mut bridge = GuiBridge::start(live.engine.clone(), runner.config().bridge_address)?;
        bridge.publish_status("HTTP bridge running (Ctrl+C to stop)...");
        let runtime = TokioBuilder::new_current_thread()
            .enable_all()
            .build()
            .context("creating runtime for signal handling")?;
        runtime.block_on(async {
            signal::ctrl_c().await.context("awaiting Ctrl+C to exit")?;
            Ok::<(), anyhow::Error>(())
        })?;
        info!("shutting down after {} frames", live.engine.metrics().frames);
        bridge.shutdown();
        live.engine.stop_saving();
        live.session.stop();
        live.engine.wait_for_writers();
        live.engine.close();
    }

    Ok(())
}
