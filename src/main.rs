//! tempokit - Tick-synchronized multi-channel metronome

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tempokit::audio::{list_output_devices, ClickDevice, ClickDeviceConfig, DeviceId};
use tempokit::model::{AccentPattern, MetronomeConfig, TimeSignature};
use tempokit::output::{
    DeviceSet, OutputDevice, OutputSourceConfig, OutputSourceRegistry, SourceKind,
    TerminalFlashDevice,
};
use tempokit::tap::TapTempo;
use tempokit::transport::{Transport, TransportError, TransportSettings};

#[derive(Parser)]
#[command(name = "tempokit")]
#[command(about = "Tick-synchronized multi-channel metronome")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List available audio output devices
    Devices,

    /// Run the metronome
    Play {
        /// Tempo in BPM (20-400)
        #[arg(short, long)]
        bpm: Option<f64>,

        /// Time signature, e.g. 3/4
        #[arg(short, long)]
        time_signature: Option<TimeSignature>,

        /// Accented beats (0-indexed, comma separated)
        #[arg(long, value_delimiter = ',')]
        accents: Option<Vec<u32>>,

        /// Ticks per beat (1-8)
        #[arg(short, long)]
        subdivisions: Option<u32>,

        /// Mute the audio click
        #[arg(long)]
        no_audio: bool,

        /// Hide the visual flash
        #[arg(long)]
        no_visual: bool,

        /// Enable the haptic pulse
        #[arg(long)]
        haptic: bool,

        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<u64>,

        /// Metronome config file (JSON); flags override its values
        #[arg(short, long, env = "TEMPOKIT_CONFIG")]
        config: Option<PathBuf>,

        /// Output device name (use 'devices' to see available devices)
        #[arg(long)]
        output_device: Option<String>,
    },

    /// Estimate a tempo from taps on Enter
    Tap,
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn list_devices() {
    println!("Output devices:");
    let devices = list_output_devices();
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let default_marker = if device.is_default { " (default)" } else { "" };
        println!("  - {}{}", device.name, default_marker);
        if let Some(rate) = device.default_sample_rate {
            println!(
                "      {} Hz default, {} channels, rates {:?}",
                rate, device.max_channels, device.supported_sample_rates
            );
        }
    }
}

fn load_config(path: &Path) -> Result<MetronomeConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Options of the `play` subcommand
struct PlayOptions {
    config: MetronomeConfig,
    duration: Option<Duration>,
    output_device: Option<String>,
}

fn devices_for(output_device: Option<String>) -> DeviceSet {
    DeviceSet::new()
        .with_audio(move |_: &OutputSourceConfig| {
            Box::new(ClickDevice::new(ClickDeviceConfig {
                device: output_device.clone().map(DeviceId),
                ..Default::default()
            })) as Box<dyn OutputDevice>
        })
        .with_visual(|_: &OutputSourceConfig| {
            Box::new(TerminalFlashDevice) as Box<dyn OutputDevice>
        })
}

fn print_help() {
    println!("Commands: t = tap, + / - = nudge tempo, bpm N = set tempo, q = quit");
}

async fn run_play(options: PlayOptions) -> Result<()> {
    options
        .config
        .validate()
        .context("Invalid metronome configuration")?;

    let registry = Arc::new(OutputSourceRegistry::with_defaults(
        devices_for(options.output_device),
        vec![
            OutputSourceConfig::new("click", SourceKind::Audio),
            OutputSourceConfig::new("flash", SourceKind::Visual),
            OutputSourceConfig::new("pulse", SourceKind::Haptic),
        ],
    ));
    registry.reset().await?;
    registry.on_error(|error| warn!("{}", error));

    let transport = Transport::new(
        registry.clone(),
        options.config,
        TransportSettings::default(),
    )?;
    let _tempo = transport.on_tempo_change(|bpm| println!("Tempo: {} BPM", bpm));

    let session = match transport.start().await {
        Ok(session) => session,
        Err(TransportError::Output(error)) if !error.failed_sources().is_empty() => {
            // Play on without the channels that could not be opened
            for id in error.failed_sources() {
                warn!("Disabling source {}", id);
                if let Some(source) = registry.get_source(id).await {
                    source.set_enabled(false);
                }
            }
            transport.start().await?
        }
        Err(e) => return Err(e.into()),
    };
    info!("Session {}", session.id);
    {
        let config = transport.config();
        println!(
            "Playing {} BPM in {} ({} ticks per beat)",
            config.tempo, config.time_signature, config.subdivisions
        );
    }
    print_help();

    let deadline = async {
        match options.duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    let mut stdin_reader = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut tap = TapTempo::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
            _ = &mut deadline => break,
            line_result = stdin_reader.next_line(), if stdin_open => {
                let line = match line_result {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("stdin closed");
                        stdin_open = false;
                        continue;
                    }
                    Err(e) => {
                        warn!("stdin error: {}", e);
                        stdin_open = false;
                        continue;
                    }
                };

                let current = transport.config();
                let next = match line.trim() {
                    "" => continue,
                    "q" | "quit" => break,
                    "t" => match tap.apply_to(&current) {
                        Some(config) => config,
                        None => continue,
                    },
                    "+" => current.with_tempo(current.tempo + 1.0),
                    "-" => current.with_tempo(current.tempo - 1.0),
                    other => match other.strip_prefix("bpm ").map(|n| n.trim().parse::<f64>()) {
                        Some(Ok(bpm)) => current.with_tempo(bpm),
                        _ => {
                            print_help();
                            continue;
                        }
                    },
                };

                if let Err(e) = transport.update_config(next).await {
                    warn!("Rejected config: {}", e);
                }
            }
        }
    }

    let position = transport.stop().await;
    println!(
        "Stopped at bar {} beat {}",
        position.bar + 1,
        position.beat + 1
    );

    for source in registry.sources().await {
        let stats = source.stats();
        println!(
            "  {:<6} {:<16} rendered {:>5}  degraded {:>3}  failed {:>3}",
            source.kind(),
            source.device_name(),
            stats.rendered,
            stats.degraded,
            stats.failed
        );
    }

    registry.dispose().await;
    Ok(())
}

async fn run_tap() -> Result<()> {
    println!("Press Enter in time with the beat, q to quit");

    let mut stdin_reader = BufReader::new(tokio::io::stdin()).lines();
    let mut tap = TapTempo::new();

    while let Some(line) = stdin_reader.next_line().await? {
        if line.trim() == "q" {
            break;
        }
        match tap.tap() {
            Some(bpm) => println!("{} BPM", bpm),
            None => println!("..."),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Play {
            bpm,
            time_signature,
            accents,
            subdivisions,
            no_audio,
            no_visual,
            haptic,
            duration,
            config,
            output_device,
        } => {
            let mut metronome = match config {
                Some(path) => load_config(&path)?,
                None => MetronomeConfig::default(),
            };
            if let Some(time_signature) = time_signature {
                metronome = metronome.with_time_signature(time_signature);
            }
            if let Some(accents) = accents {
                metronome.accent_pattern = AccentPattern::new(accents);
            }
            if let Some(bpm) = bpm {
                metronome.tempo = bpm;
            }
            if let Some(subdivisions) = subdivisions {
                metronome.subdivisions = subdivisions;
            }
            let channels = metronome
                .channels
                .with(SourceKind::Audio, metronome.channels.audio && !no_audio)
                .with(SourceKind::Visual, metronome.channels.visual && !no_visual)
                .with(SourceKind::Haptic, metronome.channels.haptic || haptic);
            metronome = metronome.with_channels(channels);

            run_play(PlayOptions {
                config: metronome,
                duration: duration.map(Duration::from_secs),
                output_device,
            })
            .await?;
        }
        Commands::Tap => run_tap().await?,
    }

    Ok(())
}
