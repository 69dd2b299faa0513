mod click_path;
mod config;
mod input;
mod menu;
mod mouse;
mod palette;
mod prepare;
mod preview;
mod recorder;
mod region;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{ArgAction, Parser, Subcommand};
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use crate::click_path::{ClickPathError, PathSummary};
use crate::config::{sanitize_name, ConfigStore, Configuration};
use crate::input::InputHub;
use crate::menu::{InputClosed, Prompter};
use crate::palette::{format_key, hex};
use crate::prepare::RESOLUTION_SCALES;

#[derive(Parser, Debug)]
#[command(
    name = "autodraw",
    version,
    about = "Quantize an image to an on-screen palette and draw it with replayed mouse clicks"
)]
struct Cli {
    /// Configuration file holding canvases and palettes
    #[arg(long, default_value = "config.json")]
    config: PathBuf,
    /// Directory searched for source images
    #[arg(long, default_value = "img")]
    img_dir: PathBuf,
    /// Output root for previews (default: $AUTODRAW_OUT_DIR or .autodraw)
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Pause between mouse actions, in milliseconds
    #[arg(long, default_value_t = 10)]
    click_interval_ms: u64,
    /// Global key that aborts the program
    #[arg(long, default_value = "F8", value_parser = input::parse_killswitch)]
    killswitch: rdev::Key,
    /// Skip opening the quantized preview after drawing
    #[arg(long, action = ArgAction::SetTrue)]
    no_preview: bool,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Interactive numbered menu (default)
    Menu,
    /// Select a canvas, record palette colours and save a configuration
    Setup,
    /// Quantize an image and draw it with a saved configuration
    Draw,
    /// Print saved configurations as JSON
    Configs,
}

struct Session {
    config_path: PathBuf,
    img_dir: PathBuf,
    out_root: PathBuf,
    click_interval: Duration,
    preview: bool,
    hub: Option<InputHub>,
}

impl Session {
    fn hub(&self) -> Result<&InputHub> {
        self.hub
            .as_ref()
            .context("global input hook is not running")
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    if ConfigStore::init_if_missing(&cli.config)? {
        tracing::warn!(path = %cli.config.display(), "configuration file missing; created an empty one");
    }
    // Malformed files stop the program before any input device is touched.
    ConfigStore::load(&cli.config)?;

    let command = cli.command.unwrap_or(Commands::Menu);
    let hub = if command == Commands::Configs {
        None
    } else {
        Some(InputHub::start(cli.killswitch)?)
    };

    let session = Session {
        config_path: cli.config,
        img_dir: cli.img_dir,
        out_root: cli.out_dir.unwrap_or_else(out_root),
        click_interval: Duration::from_millis(cli.click_interval_ms),
        preview: !cli.no_preview,
        hub,
    };
    let mut prompter = Prompter::stdio();

    let outcome = match command {
        Commands::Menu => return command_menu(&session, &mut prompter),
        Commands::Setup => command_setup(&session, &mut prompter),
        Commands::Draw => command_draw(&session, &mut prompter),
        Commands::Configs => print_configs(&session),
    };
    match outcome {
        Err(err) if err.is::<InputClosed>() => Ok(()),
        other => other,
    }
}

fn init_logging(level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

type Action<R, W> = fn(&Session, &mut Prompter<R, W>) -> Result<()>;

fn command_menu<R: BufRead, W: Write>(
    session: &Session,
    prompter: &mut Prompter<R, W>,
) -> Result<()> {
    let actions: [(&str, Action<R, W>); 2] =
        [("draw", command_draw::<R, W>), ("setup", command_setup::<R, W>)];
    run_menu(session, prompter, &actions)
}

/// Runs the chosen action until input closes. A failed action is reported
/// and the menu is shown again.
fn run_menu<R: BufRead, W: Write>(
    session: &Session,
    prompter: &mut Prompter<R, W>,
    actions: &[(&str, Action<R, W>)],
) -> Result<()> {
    let labels: Vec<&str> = actions.iter().map(|(label, _)| *label).collect();
    loop {
        let outcome = prompter
            .choose("Enter action", &labels, "Invalid mode!")
            .and_then(|choice| (actions[choice].1)(session, prompter));
        match outcome {
            Ok(()) => {}
            Err(err) if err.is::<InputClosed>() => {
                prompter.say("Bye Bye!")?;
                return Ok(());
            }
            Err(err) => {
                tracing::debug!(error = %format!("{err:#}"), "action failed");
                prompter.say(&format!("error: {err:#}"))?;
            }
        }
    }
}

fn command_setup<R: BufRead, W: Write>(
    session: &Session,
    prompter: &mut Prompter<R, W>,
) -> Result<()> {
    prompter.say("Please select the drawing area (canvas)")?;
    let canvas = region::capture_canvas()?;

    prompter.say(
        "Left click on the location of each colour on the palette, or right click to cancel/finish.",
    )?;
    let palette = {
        let subscription = session.hub()?.subscribe()?;
        recorder::record_palette(|| subscription.recv(), &mut recorder::XcapSampler)?
    };

    let mut store = ConfigStore::load(&session.config_path)?;
    prompter.say("What would you like to name this configuration?")?;
    let name = prompt_config_name(prompter, &store)?;

    let colours = palette.len();
    store.insert(name.clone(), Configuration { palette, canvas })?;
    store.save()?;
    tracing::info!(%name, %canvas, colours, "configuration saved");
    prompter.say(&format!(
        "Saved configuration `{name}` ({colours} colours) to {}",
        abs_path(store.path()).display()
    ))?;
    Ok(())
}

fn prompt_config_name<R: BufRead, W: Write>(
    prompter: &mut Prompter<R, W>,
    store: &ConfigStore,
) -> Result<String> {
    loop {
        let name = sanitize_name(&prompter.line()?);
        if name.trim().is_empty() {
            prompter.say("Please enter a name using letters, numbers, spaces, '.' or '_'")?;
        } else if store.contains(&name) {
            prompter.say("A configuration with that name already exists!")?;
        } else {
            return Ok(name);
        }
    }
}

fn command_draw<R: BufRead, W: Write>(
    session: &Session,
    prompter: &mut Prompter<R, W>,
) -> Result<()> {
    let store = ConfigStore::load(&session.config_path)?;
    if store.is_empty() {
        prompter.say("No configurations detected!")?;
        prompter.say("Please use the setup option before using the draw option!")?;
        return Ok(());
    }

    let config_index = prompter.choose(
        "Enter configuration",
        &store.names(),
        "Invalid config option!",
    )?;
    let Some((config_name, config)) = store.entry(config_index) else {
        return Ok(());
    };

    let images = prepare::list_images(&session.img_dir)?;
    if images.is_empty() {
        prompter.say(&format!(
            "No images found in {} (supported: {})",
            session.img_dir.display(),
            prepare::SUPPORTED_TYPES.join(", ")
        ))?;
        return Ok(());
    }
    let image_labels: Vec<String> = images.iter().map(|p| p.display().to_string()).collect();
    let image_index = prompter.choose("Choose an image", &image_labels, "Invalid choice!")?;
    let image_path = session.img_dir.join(&images[image_index]);

    let scale_labels: Vec<&str> = RESOLUTION_SCALES.iter().map(|(label, _)| *label).collect();
    let scale_index = prompter.choose("Choose resolution scale", &scale_labels, "Invalid choice!")?;
    let (scale_label, stride) = RESOLUTION_SCALES[scale_index];

    prompter.begin("Recolouring image...")?;
    let prepared = prepare::prepare_image(&image_path, &config.canvas, &config.palette, stride)?;
    prompter.say("Done!\n")?;

    let actions = match click_path::synthesize(
        &prepared.image,
        prepared.stride,
        &config.canvas,
        &config.palette,
    ) {
        Ok(actions) => actions,
        Err(err @ ClickPathError::OutOfBounds { .. }) => {
            tracing::debug!(error = %err, "draw cancelled");
            prompter.say("Out of bounds! Cancelling operation")?;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    let summary = PathSummary::of(&actions);

    // Never drive the mouse without a working killswitch.
    session
        .hub()?
        .ensure_alive()
        .context("refusing to draw")?;

    prompter.begin("Printing image...")?;
    let started = Instant::now();
    let mut driver = mouse::EnigoDriver::new()?;
    mouse::replay(&actions, &mut driver, session.click_interval)?;
    let elapsed = started.elapsed();
    prompter.say("Done!")?;

    let report = draw_report(
        config_name,
        config,
        &image_path,
        scale_label,
        &prepared,
        summary,
        elapsed,
    );
    let preview_target = preview::preview_path(&session.out_root, config_name);
    let files = preview::write_preview(&prepared.image, &preview_target, &report)?;
    tracing::info!(
        image = %files.image_path.display(),
        sidecar = %files.sidecar_path.display(),
        "preview written"
    );
    if session.preview {
        if let Err(err) = preview::open_in_viewer(&files.image_path) {
            tracing::debug!(error = %format!("{err:#}"), "could not open preview");
            prompter.say(&format!(
                "Preview saved to {}",
                abs_path(&files.image_path).display()
            ))?;
        }
    }
    Ok(())
}

fn draw_report(
    config_name: &str,
    config: &Configuration,
    image_path: &Path,
    scale_label: &str,
    prepared: &prepare::PreparedImage,
    summary: PathSummary,
    elapsed: Duration,
) -> Value {
    let (width, height) = prepared.image.dimensions();
    let mut used: Vec<String> = Vec::new();
    for y in (0..height).step_by(prepared.stride as usize) {
        for x in (0..width).step_by(prepared.stride as usize) {
            let key = format_key(*prepared.image.get_pixel(x, y));
            if !used.contains(&key) {
                used.push(key);
            }
        }
    }

    json!({
        "draw_report_version": 1,
        "generated_at": timestamp_iso(),
        "configuration": config_name,
        "canvas": config.canvas,
        "source_path": abs_path(image_path).display().to_string(),
        "source_size": {"w": prepared.source_size.0, "h": prepared.source_size.1, "units": "px"},
        "drawn_size": {"w": width, "h": height, "units": "px"},
        "resolution_scale": scale_label,
        "stride": prepared.stride,
        "palette_size": config.palette.len(),
        "colours_used": used,
        "actions": summary,
        "elapsed_ms": elapsed.as_millis() as u64,
    })
}

fn print_configs(session: &Session) -> Result<()> {
    let store = ConfigStore::load(&session.config_path)?;
    let mut rows = Vec::with_capacity(store.len());
    for index in 0..store.len() {
        let Some((name, config)) = store.entry(index) else {
            continue;
        };
        let colours: Vec<Value> = config
            .palette
            .iter()
            .map(|entry| {
                json!({
                    "rgb": format_key(entry.color),
                    "hex": hex(entry.color),
                    "at": [entry.point.x, entry.point.y],
                })
            })
            .collect();
        rows.push(json!({
            "name": name,
            "canvas": config.canvas,
            "width": config.canvas.width(),
            "height": config.canvas.height(),
            "colours": colours,
        }));
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "config_path": abs_path(store.path()).display().to_string(),
            "configs": rows,
        }))?
    );
    Ok(())
}

fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    ensure_parent_dir(path)?;
    let raw = serde_json::to_string_pretty(value)?;
    fs::write(path, raw).with_context(|| format!("failed to write JSON: {}", path.display()))?;
    Ok(())
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn default_sidecar_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output")
        .to_string();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("{stem}.json"))
}

fn out_root() -> PathBuf {
    env::var("AUTODRAW_OUT_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".autodraw"))
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || matches!(lower, '.' | '_' | '-') {
            out.push(lower);
        } else if lower.is_ascii_whitespace() {
            out.push('-');
        }
    }
    if out.is_empty() {
        "config".to_string()
    } else {
        out
    }
}

fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}

fn timestamp_iso() -> String {
    Utc::now().to_rfc3339()
}
