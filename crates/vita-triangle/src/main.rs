mod shaders;
mod triangle;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use vita_gfx::driver::{GpuDriver, HeadlessDisplay, HeadlessDriver, MultisampleMode};
use vita_gfx::input::{Buttons, ControllerSource, InputFrame, InputState, ScriptedController};
use vita_gfx::logging::{init_logging, LoggingConfig};
use vita_gfx::{Graphics, GraphicsFailure, GraphicsInit};

use triangle::Triangle;

/// Spins a vertex-colored triangle on the headless GPU until SELECT is pressed.
#[derive(Parser, Debug)]
#[command(name = "vita-triangle", version, about)]
struct Args {
    /// Frames to render before SELECT is pressed.
    #[arg(long, default_value_t = 300)]
    frames: usize,

    /// Also write the log to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Multisample mode for the render target and depth buffer.
    #[arg(long, value_enum, default_value = "none")]
    msaa: Msaa,

    /// Simulated vblank interval in microseconds.
    #[arg(long, default_value_t = 16_667)]
    vblank_us: u64,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Msaa {
    None,
    X2,
    X4,
}

impl From<Msaa> for MultisampleMode {
    fn from(m: Msaa) -> Self {
        match m {
            Msaa::None => MultisampleMode::None,
            Msaa::X2 => MultisampleMode::X2,
            Msaa::X4 => MultisampleMode::X4,
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(LoggingConfig {
        log_file: args.log_file.clone(),
        ..LoggingConfig::default()
    });

    let display = Arc::new(HeadlessDisplay::new(Duration::from_micros(args.vblank_us)));
    let config = GraphicsInit {
        multisample_mode: args.msaa.into(),
        ..GraphicsInit::default()
    };

    let mut gfx = Graphics::init(HeadlessDriver::new(), display.clone(), config)
        .map_err(GraphicsFailure::into_error)
        .context("graphics init")?;

    let mut pad = ScriptedController::press_after(args.frames, Buttons::SELECT);
    let (rendered, cleanup) = match Triangle::init(&mut gfx) {
        Ok(mut triangle) => {
            let rendered = run(&mut gfx, &mut triangle, &mut pad);
            (rendered, triangle.cleanup(&mut gfx))
        }
        Err(e) => (Err(e), Ok(())),
    };

    let driver = gfx
        .shutdown()
        .map_err(GraphicsFailure::into_error)
        .context("graphics shutdown")?;
    let rendered = rendered?;
    cleanup.context("triangle cleanup")?;

    let stats = driver.stats();
    info!(
        "rendered {rendered} frame(s): {} scene(s), {} draw(s), {} flip(s), {} frame(s) shown",
        stats.scenes,
        stats.draws,
        stats.queued_flips,
        display.frame_count()
    );
    Ok(())
}

/// Runs the frame loop until SELECT is held. Returns the frames rendered.
fn run<D: GpuDriver>(
    gfx: &mut Graphics<D>,
    triangle: &mut Triangle,
    pad: &mut impl ControllerSource,
) -> Result<u64> {
    let mut input = InputState::default();
    let mut frame = InputFrame::default();
    let mut rendered = 0u64;

    loop {
        frame.clear();
        input.apply(&mut frame, pad.read());
        if input.button_down(Buttons::SELECT) {
            info!("SELECT pressed after {rendered} frame(s)");
            break;
        }

        triangle.update();

        gfx.start_scene()?;
        triangle.draw(gfx)?;
        gfx.end_scene()?;
        gfx.swap_buffers()?;
        rendered += 1;

        if rendered % 60 == 0 {
            log::debug!("frame {rendered}, rotation {:.3}", triangle.rotation());
        }
    }

    Ok(rendered)
}
