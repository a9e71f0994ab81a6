use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use notify::RecommendedWatcher;

use svgpeek::dispatch::DispatchQueue;
use svgpeek::geometry::Viewport;
use svgpeek::logging;
use svgpeek::options::{Options, default_options_path};
use svgpeek::panic_handler;
use svgpeek::raster::Rasterizer;
use svgpeek::session::{Session, SessionState};
use svgpeek::watch::{FileView, PngSurface, scale_for_dpi, watch_file};

const PUMP_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "svgpeek", version, about = "Live raster preview of SVG files")]
struct Cli {
    /// Options file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "svgpeek.log")]
    log_file: PathBuf,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch a file and write its preview on every change
    Watch {
        file: PathBuf,

        /// Where to write the preview PNG (defaults to <file>.preview.png)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Monitor DPI; scales the preview envelope
        #[arg(long)]
        dpi: Option<f32>,

        /// Viewport used for placement, as WIDTHxHEIGHT
        #[arg(long, default_value = "800x600", value_parser = parse_viewport)]
        viewport: Viewport,

        /// Exit after the first applied preview
        #[arg(long)]
        once: bool,
    },
    /// Manage the options file
    Config {
        /// Write the default options
        #[arg(long)]
        init: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn parse_viewport(raw: &str) -> Result<Viewport, String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))?;
    let width: f64 = w.trim().parse().map_err(|e| format!("bad width '{w}': {e}"))?;
    let height: f64 = h.trim().parse().map_err(|e| format!("bad height '{h}': {e}"))?;
    if width <= 0.0 || height <= 0.0 {
        return Err(format!("viewport must be positive, got '{raw}'"));
    }
    Ok(Viewport::new(width, height))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(&cli.log_file, cli.verbose)?;
    panic_handler::initialize_panic_handler();
    info!("Starting svgpeek");

    let config_path = match cli.config {
        Some(path) => path,
        None => default_options_path().ok_or_else(|| anyhow!("No config directory available"))?,
    };

    let res = match cli.command {
        Command::Config { init, force } => run_config(&config_path, init, force),
        Command::Watch {
            file,
            output,
            dpi,
            viewport,
            once,
        } => {
            let output = output.unwrap_or_else(|| file.with_extension("preview.png"));
            run_watch(&config_path, &file, &output, dpi, viewport, once)
        }
    };

    if let Err(err) = &res {
        error!("Application error: {err:?}");
    }
    info!("Shutting down svgpeek");
    res
}

fn run_config(path: &Path, init: bool, force: bool) -> Result<()> {
    if !init {
        let options = Options::load(path)?;
        println!("# {}", path.display());
        print!("{}", serde_yaml::to_string(&options)?);
        return Ok(());
    }

    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Options::default().save(path)?;
    println!("Wrote default options to {}", path.display());
    Ok(())
}

#[cfg(feature = "svg")]
fn rasterizer() -> Result<Arc<dyn Rasterizer>> {
    Ok(Arc::new(svgpeek::raster::ResvgRasterizer::new()))
}

#[cfg(not(feature = "svg"))]
fn rasterizer() -> Result<Arc<dyn Rasterizer>> {
    bail!("svgpeek was built without the `svg` feature")
}

fn load_options(path: &Path, dpi: Option<f32>) -> Result<Options> {
    let options = Options::load(path)?;
    Ok(match dpi {
        Some(dpi) => scale_for_dpi(options, dpi),
        None => options,
    })
}

/// Reload options whenever the options file changes
fn watch_options(path: &Path) -> Option<(RecommendedWatcher, flume::Receiver<()>)> {
    let (tx, rx) = flume::unbounded();
    match watch_file(path, move || {
        let _ = tx.send(());
    }) {
        Ok(watcher) => Some((watcher, rx)),
        Err(e) => {
            warn!("Not watching options file {path:?}: {e}");
            None
        }
    }
}

fn run_watch(
    config_path: &Path,
    file: &Path,
    output: &Path,
    dpi: Option<f32>,
    viewport: Viewport,
    once: bool,
) -> Result<()> {
    if !file.exists() {
        bail!("{} does not exist", file.display());
    }
    let mut options = load_options(config_path, dpi)?;

    let queue = DispatchQueue::new();
    let view = Arc::new(FileView::new(file, viewport));
    let mut session = Session::open(view, options.clone(), rasterizer()?, queue.dispatcher())
        .ok_or_else(|| anyhow!("{} is not an SVG, XML or HTML file", file.display()))?;
    session.set_surface(Box::new(PngSurface::new(output, io::stdout())));

    let options_watch = watch_options(config_path);
    info!("Watching {file:?}, writing previews to {output:?}");

    loop {
        if let Some((_, changed)) = &options_watch {
            if changed.try_iter().count() > 0 {
                match load_options(config_path, dpi) {
                    Ok(reloaded) => {
                        for field in options.diff(&reloaded) {
                            session.options_changed(reloaded.clone(), field);
                        }
                        options = reloaded;
                    }
                    Err(e) => warn!("Keeping previous options: {e:#}"),
                }
            }
        }

        session.pump();
        queue.run_for(PUMP_INTERVAL);

        if session.is_closed() {
            break;
        }
        if once && matches!(session.state(), SessionState::Applied(_)) {
            break;
        }
    }

    session.close();
    queue.run_pending();
    Ok(())
}
