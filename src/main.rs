use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use image::ImageReader;

use cardscan::config::LayoutConfig;
use cardscan::synth::centered_quad;
use cardscan::{
    CardLocator, Frame, FramePipeline, Point, Quadrilateral, ScanConfig, ScanError, ScanSession, ScanStatus,
    SyntheticCard,
};

#[derive(Parser)]
#[command(name = "cardscan")]
#[command(about = "Read payment card numbers from camera frames")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed still images through a scan session as camera frames
    Scan(ScanArgs),
    /// Render a synthetic card frame
    Synth(SynthArgs),
}

#[derive(Args)]
struct ScanArgs {
    /// Input image files, used as consecutive frames
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// JSON config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Card corners "x1,y1,x2,y2,x3,y3,x4,y4" instead of searching the guide region
    #[arg(long, value_name = "CORNERS")]
    quad: Option<String>,

    /// Times each image is fed as a frame
    #[arg(long, default_value_t = 10)]
    repeat: u32,

    /// Use the 4-6-5 American Express layout
    #[arg(long)]
    amex: bool,

    /// Save debug outputs to directory (must be empty)
    #[arg(long, value_name = "DIR")]
    debug_out: Option<PathBuf>,
}

#[derive(Args)]
struct SynthArgs {
    /// Card number to emboss
    #[arg(long)]
    number: String,

    /// Expiry as MM/YY
    #[arg(long)]
    expiry: Option<String>,

    /// Output image path
    #[arg(short, long)]
    out: PathBuf,

    #[arg(long, default_value_t = 640)]
    width: u32,

    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Uniform noise amplitude in grey levels
    #[arg(long, default_value_t = 0)]
    noise: u8,

    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Render the card upside down
    #[arg(long)]
    flipped: bool,

    /// Use the 4-6-5 American Express layout
    #[arg(long)]
    amex: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match cli.command {
        Command::Scan(args) => scan(args),
        Command::Synth(args) => synth(args),
    }
}

fn load_config(path: Option<&PathBuf>, amex: bool) -> anyhow::Result<ScanConfig> {
    let mut config = match path {
        Some(path) => ScanConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ScanConfig::default(),
    };
    if amex {
        config.layout = LayoutConfig::amex();
        config.validate()?;
    }
    Ok(config)
}

fn parse_quad(text: &str) -> anyhow::Result<Quadrilateral> {
    let values = text
        .split(',')
        .map(|v| v.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid corner list: {}", text))?;
    let [x1, y1, x2, y2, x3, y3, x4, y4] = values[..] else {
        bail!("Expected 8 comma-separated numbers, got {}", values.len());
    };
    Ok(Quadrilateral::from_unordered([
        Point::new(x1, y1),
        Point::new(x2, y2),
        Point::new(x3, y3),
        Point::new(x4, y4),
    ]))
}

fn scan(args: ScanArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref(), args.amex)?;

    let locator = match &args.quad {
        Some(text) => CardLocator::Fixed(parse_quad(text)?),
        None => CardLocator::guided(&config),
    };
    let mut pipeline = FramePipeline::new(&config);
    if let Some(debug_dir) = args.debug_out {
        pipeline = pipeline.with_debug(debug_dir)?;
    }
    let mut session = ScanSession::with_parts(config, pipeline, locator)?;

    let mut frames = Vec::with_capacity(args.images.len());
    for path in &args.images {
        let img = ImageReader::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?
            .decode()
            .with_context(|| format!("Failed to decode image {}", path.display()))?;
        log::debug!("loaded {} ({}x{})", path.display(), img.width(), img.height());
        frames.push(img);
    }

    let mut sequence = 0u64;
    for _ in 0..args.repeat {
        for img in &frames {
            let frame = Frame::from_dynamic(img, sequence);
            sequence += 1;
            match session.process_frame(&frame) {
                Ok(ScanStatus::Scanning(progress)) => {
                    log::debug!(
                        "frame {}: {} slots, stability {:.2}",
                        progress.sequence,
                        progress.slots_detected,
                        progress.stability
                    );
                }
                Ok(ScanStatus::Complete(report)) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    return Ok(());
                }
                Err(ScanError::TimedOut { frames }) => bail!("No card read within {} frames", frames),
                Err(e) => return Err(e).context("Scan failed"),
            }
        }
    }

    let stats = session.stats();
    bail!(
        "No card read after {} frames ({} dropped: {} geometry, {} card not found)",
        stats.frames_received,
        stats.frames_failed(),
        stats.invalid_geometry,
        stats.card_not_found
    )
}

fn synth(args: SynthArgs) -> anyhow::Result<()> {
    let config = load_config(None, args.amex)?;
    let mut card = SyntheticCard::new(args.number.as_str(), &config).flipped(args.flipped);
    if let Some(expiry) = &args.expiry {
        let (month, year) = expiry
            .split_once('/')
            .and_then(|(m, y)| Some((m.parse::<u32>().ok()?, y.parse::<u32>().ok()?)))
            .with_context(|| format!("Expiry must be MM/YY, got {}", expiry))?;
        card = card.with_expiry(month, year);
    }

    let aspect = config.canonical.width as f64 / config.canonical.height as f64;
    let quad = centered_quad(args.width, args.height, aspect, 0.78);
    let frame = card.render_noisy_frame(args.width, args.height, &quad, 40, args.noise, args.seed)?;
    frame
        .save(&args.out)
        .with_context(|| format!("Failed to save {}", args.out.display()))?;

    let [tl, tr, br, bl] = quad.corners();
    println!(
        "{},{},{},{},{},{},{},{}",
        tl.x, tl.y, tr.x, tr.y, br.x, br.y, bl.x, bl.y
    );
    Ok(())
}
