use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{error, info};

use crack_overlay::config::SelectionStrategy;
use crack_overlay::contour::ContourMode;
use crack_overlay::export;
use crack_overlay::seeds::derive_seed;
use crack_overlay::{ConfigPatch, OverlayConfig, OverlayEngine, Point, ProjectionMatrix, RoadSegment, ViewState, Viewport};

#[derive(Parser, Debug)]
#[command(name = "crack_overlay")]
#[command(about = "Render a procedural crack overlay over a demo road network")]
struct Args {
    /// JSON overlay configuration (defaults are used if omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Noise seed, overriding the configuration
    #[arg(short, long)]
    seed: Option<u32>,

    /// Viewport width in pixels
    #[arg(short = 'W', long, default_value = "1024")]
    width: u32,

    /// Viewport height in pixels
    #[arg(short = 'H', long, default_value = "768")]
    height: u32,

    /// Camera zoom
    #[arg(short, long, default_value = "1.0")]
    zoom: f64,

    /// Render with the 2:1 isometric projection
    #[arg(long)]
    iso: bool,

    /// Active bucket strategy (smallest, largest, random)
    #[arg(long)]
    strategy: Option<SelectionStrategy>,

    /// Number of demo road segments
    #[arg(long, default_value = "24")]
    roads: usize,

    /// Directory for the PNG outputs
    #[arg(short, long, default_value = "overlay_out")]
    output: PathBuf,

    /// Also write every crack tile as its own PNG
    #[arg(long)]
    export_tiles: bool,
}

/// A jittered street grid around the world origin.
fn demo_roads(seed: u32, count: usize, extent: f64) -> Vec<RoadSegment> {
    let mut rng = ChaCha8Rng::seed_from_u64(derive_seed(seed as u64, "demo_roads"));
    let mut roads = Vec::with_capacity(count);
    let lanes = (count / 2).max(1);
    let spacing = 2.0 * extent / (lanes + 1) as f64;

    for i in 0..count {
        let offset = -extent + spacing * ((i / 2) + 1) as f64 + rng.gen_range(-0.2..0.2) * spacing;
        let bend = rng.gen_range(-0.1..0.1) * extent;
        let width = rng.gen_range(6.0..16.0);
        let (start, end) = if i % 2 == 0 {
            (Point::new(-extent, offset), Point::new(extent, offset + bend))
        } else {
            (Point::new(offset, -extent), Point::new(offset + bend, extent))
        };
        roads.push(RoadSegment::new(start, end, width));
    }
    roads
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = match &args.config {
        Some(path) => OverlayConfig::load(path)?,
        None => OverlayConfig::default(),
    };
    let patch = ConfigPatch {
        seed: args.seed,
        selection_strategy: args.strategy,
        ..Default::default()
    };
    let config = config.update(&patch)?;
    info!("Rendering overlay with seed {} ({} buckets, strategy {})",
        config.noise.seed, config.bucket_count, config.selection_strategy);

    let mut engine = OverlayEngine::new(config)?;
    let viewport = Viewport::new(
        -(args.width as f64) * 0.5,
        -(args.height as f64) * 0.5,
        args.width as f64,
        args.height as f64,
    );
    engine.set_viewport(viewport);
    engine.set_view(ViewState::new(0.0, 0.0, args.zoom));
    engine.set_projection(args.iso.then(ProjectionMatrix::isometric));

    let extent = (args.width.max(args.height) as f64) / args.zoom.max(1e-3);
    engine.set_roads(demo_roads(engine.config().noise.seed, args.roads, extent));
    engine.subscribe(|event| info!(?event, "overlay event"));

    if !engine.frame() {
        info!("No redraw was pending");
    }
    let Some(snapshot) = engine.mask_snapshot() else {
        info!("Degenerate view; nothing to render");
        return Ok(());
    };
    info!("Mask: {}x{} cells, {} active", snapshot.width, snapshot.height, snapshot.active_cells());
    for (bucket, count) in engine.active_buckets() {
        info!("  bucket {}: {} samples", bucket, count);
    }

    std::fs::create_dir_all(&args.output)?;
    export::save_rgb(&export::render_mask(&snapshot)?, args.output.join("mask.png"))?;
    if let Some(tester) = engine.tester() {
        let grid = tester.grid();
        export::save_rgb(&export::render_noise(&grid.base)?, args.output.join("noise.png"))?;
        export::save_rgb(&export::render_classification(grid)?, args.output.join("classes.png"))?;
    }

    let tiles = engine.generate_all_cracks();
    let degraded = tiles.iter().filter(|t| t.degraded).count();
    let unfiltered = tiles.iter().filter(|t| !t.filtered).count();
    info!("Generated {} crack tiles ({} degraded, {} unfiltered)", tiles.len(), degraded, unfiltered);

    if args.export_tiles {
        for (i, tile) in tiles.iter().enumerate() {
            export::save_rgba(&export::render_tile(tile)?, args.output.join(format!("tile_{:04}.png", i)))?;
        }
    }

    let projector = engine.projector();
    let mut screen = export::compose_screen(&viewport, &projector, &tiles, [214, 208, 196])?;
    let outlines = engine.extract_contours(ContourMode::RoadHugging);
    export::draw_polylines(&mut screen, &viewport, &outlines, [200, 40, 40, 160]);
    let mask_outlines = engine.extract_contours(ContourMode::Mask);
    export::draw_polylines(&mut screen, &viewport, &mask_outlines, [40, 90, 200, 120]);
    export::save_rgba(&screen, args.output.join("overlay.png"))?;

    info!("{}", engine.cache_stats().summary());
    info!("Wrote outputs to {}", args.output.display());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
