//! # Transcribe - Audio to Sheet Music
//!
//! Command line front end for the transcriber.
//!
//! ## Commands
//! - **run**: Transcribe one recording into MIDI, MusicXML and optionally PNG
//! - **serve**: Host the upload form; transcriptions run on a worker thread
//! - **config**: Print the effective configuration as JSON

mod web;
mod worker;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn, Level};
use transcribe_core::render::{MuseScoreRenderer, RasterRenderer, MUSESCORE_PATH_ENV};
use transcribe_core::{transcribe, MinNoteDuration, RasterOutcome, TranscribeRequest, TranscriptionConfig};

use web::ServeOptions;
use worker::TranscriptionWorker;

#[derive(Parser, Debug)]
#[command(name = "transcribe", version, about = "Transcribe monophonic audio to MIDI and sheet music")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Transcribe a WAV, MP3 or FLAC recording
    Run(RunArgs),
    /// Serve the upload form
    Serve(ServeArgs),
    /// Print the effective configuration as JSON
    Config(ConfigArgs),
}

/// Configuration file plus per-field overrides.
#[derive(Args, Debug)]
struct ConfigArgs {
    /// JSON configuration file; missing fields keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// FFT frame size in samples
    #[arg(long)]
    frame_size: Option<usize>,

    /// Samples between analysis frames
    #[arg(long)]
    hop_length: Option<usize>,

    /// Frames whose peak is below this (0.0 to 1.0) are rests
    #[arg(long)]
    silence_threshold: Option<f32>,

    /// Shortest note kept, in seconds
    #[arg(long)]
    min_duration: Option<f64>,

    /// Tempo written to MIDI and MusicXML
    #[arg(long)]
    tempo: Option<f64>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<TranscriptionConfig> {
        let mut config = match &self.config {
            Some(path) => TranscriptionConfig::load(path)
                .with_context(|| format!("cannot load config {}", path.display()))?,
            None => TranscriptionConfig::default(),
        };
        if let Some(frame_size) = self.frame_size {
            config.analysis.frame_size = frame_size;
        }
        if let Some(hop_length) = self.hop_length {
            config.analysis.hop_length = hop_length;
        }
        if let Some(threshold) = self.silence_threshold {
            config.quantizer.silence_threshold = threshold;
        }
        if let Some(seconds) = self.min_duration {
            config.quantizer.min_duration = MinNoteDuration::Seconds(seconds);
        }
        if let Some(tempo) = self.tempo {
            config.score.tempo_bpm = tempo;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Input recording
    audio: PathBuf,

    #[arg(long, default_value = "output.mid")]
    midi: PathBuf,

    #[arg(long, default_value = "output.musicxml")]
    musicxml: PathBuf,

    /// Also render the score to this PNG (needs MuseScore)
    #[arg(long)]
    png: Option<PathBuf>,

    /// MuseScore executable used for PNG rendering
    #[arg(long, env = MUSESCORE_PATH_ENV)]
    musescore: Option<PathBuf>,

    /// Write the detected notes as JSON
    #[arg(long)]
    notes_json: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:5000")]
    addr: SocketAddr,

    /// Folder holding uploads and generated files
    #[arg(long, default_value = "static")]
    upload_dir: PathBuf,

    #[arg(long, default_value_t = 50)]
    max_upload_mb: usize,

    /// Render a PNG for every upload (needs MuseScore)
    #[arg(long)]
    render_png: bool,

    #[arg(long, env = MUSESCORE_PATH_ENV)]
    musescore: Option<PathBuf>,

    #[command(flatten)]
    config: ConfigArgs,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn renderer(musescore: Option<PathBuf>) -> Option<MuseScoreRenderer> {
    musescore
        .filter(|p| !p.as_os_str().is_empty())
        .map(MuseScoreRenderer::new)
}

fn run(args: RunArgs) -> Result<()> {
    let config = args.config.resolve()?;
    let renderer = renderer(args.musescore);
    let request = TranscribeRequest {
        audio_path: args.audio,
        midi_path: args.midi,
        musicxml_path: args.musicxml,
        png_path: args.png,
    };

    let report = transcribe(
        &request,
        &config,
        renderer.as_ref().map(|r| r as &dyn RasterRenderer),
    )
    .with_context(|| format!("failed to transcribe {}", request.audio_path.display()))?;

    println!(
        "{}: {:.2} s at {} Hz, {} frames, {} notes ({:.0} ms)",
        request.audio_path.display(),
        report.audio_seconds,
        report.sample_rate,
        report.frame_count,
        report.notes.len(),
        report.processing_ms
    );
    for note in &report.notes.notes {
        println!(
            "  {:>5.2} s  {:<4} {:>5.2} s  vel {:>3}",
            note.start_seconds,
            note.name(),
            note.duration_seconds,
            note.midi_velocity()
        );
    }
    println!("MIDI:     {}", request.midi_path.display());
    println!("MusicXML: {}", request.musicxml_path.display());
    match &report.raster {
        RasterOutcome::Skipped => {}
        RasterOutcome::Rendered(path) => println!("PNG:      {}", path.display()),
        RasterOutcome::Unavailable(reason) => println!("PNG:      not rendered ({reason})"),
    }

    if let Some(path) = &args.notes_json {
        report
            .notes
            .save_json(path)
            .with_context(|| format!("cannot write {}", path.display()))?;
        info!("Notes written to {}", path.display());
    }
    Ok(())
}

fn serve(args: ServeArgs) -> Result<()> {
    let config = args.config.resolve()?;
    let renderer: Option<Box<dyn RasterRenderer>> = if args.render_png {
        let renderer = renderer(args.musescore);
        if renderer.is_none() {
            warn!("--render-png given but no MuseScore executable; PNGs will be skipped");
        }
        renderer.map(|r| Box::new(r) as Box<dyn RasterRenderer>)
    } else {
        None
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    let worker = TranscriptionWorker::start(config, renderer)?;
    let options = ServeOptions {
        addr: args.addr,
        upload_dir: args.upload_dir,
        max_upload_bytes: args.max_upload_mb.saturating_mul(1024 * 1024),
        render_png: args.render_png,
    };
    runtime.block_on(web::serve(options, worker))
}

fn print_config(args: ConfigArgs) -> Result<()> {
    let config = args.resolve()?;
    let json = serde_json::to_string_pretty(&config).context("cannot serialize config")?;
    println!("{json}");
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run(args) => run(args),
        Command::Serve(args) => serve(args),
        Command::Config(args) => print_config(args),
    }
}
