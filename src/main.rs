use asemu::config::Config;
use asemu::config_loader;
use clap::Parser;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use env_logger::Env;
use log::info;
use std::path::PathBuf;

/// Render an emulation scenario and compile it into container artifacts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the scenario YAML file
    #[arg(short, long)]
    config: PathBuf,

    /// Output directory (overrides general.output)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Replace an existing output directory
    #[arg(long = "override")]
    override_existing: bool,

    /// Render only; do not write artifacts
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // The scenario carries the log level, so the logger starts after loading
    let config = config_loader::load_config(&args.config)?;
    env_logger::Builder::from_env(Env::default().default_filter_or(log_filter(&config))).init();

    info!("Starting asemu");
    info!("Loaded configuration from {:?}", args.config);

    let mut emu = config_loader::build_emulator(&config)?;
    emu.render().wrap_err("Failed to render emulation")?;

    if args.dry_run {
        info!(
            "Dry run: rendered {} nodes, layer order {}",
            emu.registry().node_count(),
            emu.applied_order().join(", ")
        );
        return Ok(());
    }

    let output = args.output.unwrap_or_else(|| config.general.output.clone());
    info!("Output directory: {:?}", output);

    let compiler = config_loader::compiler(&config);
    let options = config_loader::compile_options(&config, args.override_existing);
    emu.compile(&compiler, &output, options)
        .wrap_err_with(|| format!("Failed to compile emulation into '{}'", output.display()))?;

    info!("Emulation compiled; run `docker compose up` in {:?}", output);
    Ok(())
}

/// Default filter when RUST_LOG is unset.
fn log_filter(config: &Config) -> &str {
    config.general.log_level.as_deref().unwrap_or("info")
}
