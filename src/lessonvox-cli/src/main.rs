//! LessonVox CLI - Dialogue Lesson Audio Generator
//!
//! Renders a dialogue script into one lesson track with aligned subtitles
//! and a JSON timeline.

use clap::{Parser, Subcommand};
use colored::Colorize;
use lessonvox_core::{
    Config, KokoroSynthesizer, LessonPipeline, OpenAiTranscriptionBackend, PipelineCallback,
    PipelineEvent, Script, SpeechSynthesizer,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "lessonvox",
    version,
    about = "Lesson audio generator - turn dialogue scripts into timed audio",
    long_about = "Synthesizes every line of a dialogue script, stitches the lines into one track, \
                  aligns the timings against a transcription, and writes WAV, SRT and JSON output."
)]
struct Cli {
    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate lesson audio, subtitles and timeline from a script
    Generate {
        /// Path to the JSON script
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "output", value_name = "DIR")]
        output: PathBuf,

        /// TOML configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Skip forced alignment and keep the stitched timings
        #[arg(long)]
        no_align: bool,

        /// Drift above which transcribed timings are adopted (50-500)
        #[arg(long, value_name = "MS")]
        drift_threshold: Option<u32>,
    },
    /// Validate a script without generating audio
    Validate {
        /// Path to the JSON script
        #[arg(value_name = "SCRIPT")]
        script: PathBuf,
    },
    /// Generate every script in a directory, continuing past failures
    Batch {
        /// Directory containing JSON scripts
        #[arg(value_name = "DIR")]
        directory: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "output", value_name = "DIR")]
        output: PathBuf,

        /// TOML configuration file
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Skip forced alignment and keep the stitched timings
        #[arg(long)]
        no_align: bool,
    },
    /// Write a commented default configuration file
    InitConfig {
        /// Where to write the configuration
        #[arg(short, long, default_value = "lessonvox.toml", value_name = "PATH")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// List available voices
    Voices,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Generate {
            script,
            output,
            config,
            no_align,
            drift_threshold,
        } => {
            generate(
                &script,
                &output,
                config.as_deref(),
                no_align,
                drift_threshold,
            )
            .await
        }
        Command::Batch {
            directory,
            output,
            config,
            no_align,
        } => batch(&directory, &output, config.as_deref(), no_align).await,
        Command::Validate { script } => validate(&script),
        Command::InitConfig { output, force } => init_config(&output, force),
        Command::Voices => voices().await,
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn generate(
    script_path: &Path,
    output_dir: &Path,
    config_path: Option<&Path>,
    no_align: bool,
    drift_threshold: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path, no_align, drift_threshold)?;
    let script = Script::load(script_path)?;

    // Print header
    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - {}", "LessonVox".bold(), script.title)
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());
    println!();
    println!("{} {}", "Lesson:".bold(), script.lesson_id.bright_white());
    println!("{} {}", "Level:".bold(), script.level);
    println!("{} {}", "Lines:".bold(), script.lines.len());
    println!(
        "{} {}",
        "Alignment:".bold(),
        if config.alignment.enabled {
            format!("on ({} ms threshold)", config.alignment.drift_threshold_ms).green()
        } else {
            "off".yellow()
        }
    );
    println!();
    println!("{}", "─".repeat(70).dimmed());

    info!(engine = %config.tts.engine, "initializing TTS engine");
    let synthesizer = KokoroSynthesizer::new().await?;
    if let Err(message) = check_voices(&synthesizer, &config, &script) {
        eprintln!("{} {}", "Error:".red().bold(), message);
        std::process::exit(1);
    }

    let backend = OpenAiTranscriptionBackend::new(
        config.transcription.clone(),
        config.alignment.language.clone(),
    );

    let mut pipeline =
        LessonPipeline::new(config, synthesizer, backend)?.with_callback(create_console_callback());

    let output = pipeline.generate(&script, output_dir).await?;

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!("{}", "  Lesson generated.".bright_green().bold());
    println!("{}", "═".repeat(70).bright_blue());
    println!("  {} {}", "Audio:".bold(), output.audio_path.display());
    println!("  {} {}", "Subtitles:".bold(), output.subtitle_path.display());
    println!("  {} {}", "Timeline:".bold(), output.manifest_path.display());
    if output.manifest.metadata.needs_review {
        println!(
            "  {}",
            "Some lines drifted past the threshold; review the timings.".yellow()
        );
    }
    println!();

    Ok(())
}

async fn batch(
    directory: &Path,
    output_dir: &Path,
    config_path: Option<&Path>,
    no_align: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path, no_align, None)?;
    let scripts = lessonvox_core::script::find_scripts(directory)?;
    if scripts.is_empty() {
        println!("No JSON scripts found in {}", directory.display());
        return Ok(());
    }

    println!();
    println!("{}", "═".repeat(70).bright_blue());
    println!(
        "{}",
        format!("  {} - batch of {}", "LessonVox".bold(), scripts.len())
            .bright_blue()
            .bold()
    );
    println!("{}", "═".repeat(70).bright_blue());

    info!(engine = %config.tts.engine, "initializing TTS engine");
    let synthesizer = KokoroSynthesizer::new().await?;
    let backend = OpenAiTranscriptionBackend::new(
        config.transcription.clone(),
        config.alignment.language.clone(),
    );
    // One pipeline for the whole batch so the transcription model loads once.
    let mut pipeline =
        LessonPipeline::new(config, synthesizer, backend)?.with_callback(create_console_callback());

    let mut succeeded = 0usize;
    let mut failed = 0usize;
    for path in &scripts {
        println!();
        println!("{} {}", "Script:".bold(), path.display());

        let result = match Script::load(path) {
            Ok(script) => {
                match check_voices(pipeline.synthesizer(), pipeline.config(), &script) {
                    Ok(()) => pipeline
                        .generate(&script, output_dir)
                        .await
                        .map(|_| ())
                        .map_err(|e| e.to_string()),
                    Err(message) => Err(message),
                }
            }
            Err(e) => Err(e.to_string()),
        };

        match result {
            Ok(()) => succeeded += 1,
            Err(message) => {
                failed += 1;
                warn!(script = %path.display(), error = %message, "lesson failed");
                eprintln!("  {} {}", "✗".red(), message);
            }
        }
    }

    println!();
    println!("{}", "─".repeat(70).dimmed());
    println!(
        "Completed: {} success, {} failed",
        succeeded.to_string().green(),
        if failed > 0 {
            failed.to_string().red()
        } else {
            failed.to_string().normal()
        }
    );

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(
    config_path: Option<&Path>,
    no_align: bool,
    drift_threshold: Option<u32>,
) -> Result<Config, Box<dyn std::error::Error>> {
    let mut config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if no_align {
        config.alignment.enabled = false;
    }
    if let Some(threshold) = drift_threshold {
        config.alignment.drift_threshold_ms = threshold;
    }
    Ok(config)
}

/// Check that every speaker resolves to a voice the engine has.
fn check_voices(
    synthesizer: &KokoroSynthesizer,
    config: &Config,
    script: &Script,
) -> Result<(), String> {
    for line in &script.lines {
        let voice = config.voices.resolve(&line.speaker);
        synthesizer
            .validate_voice(&voice)
            .map_err(|message| format!("Line {} ({}): {}", line.id, line.speaker, message))?;
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    Config::write_default(path)?;
    println!("{} Wrote {}", "✓".bright_green(), path.display());
    Ok(())
}

fn validate(script_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let script = Script::load(script_path)?;
    let errors = lessonvox_core::script::validate(&script);

    if errors.is_empty() {
        println!(
            "{} {} ({} lines)",
            "✓".bright_green(),
            script.lesson_id.bold(),
            script.lines.len()
        );
        return Ok(());
    }

    eprintln!("{} {}", "Invalid script:".red().bold(), script_path.display());
    for error in &errors {
        eprintln!("  - {}", error);
    }
    std::process::exit(1);
}

async fn voices() -> Result<(), Box<dyn std::error::Error>> {
    let synthesizer = KokoroSynthesizer::new().await?;
    let mut voices = synthesizer.available_voices();
    voices.sort();

    println!("{}", "Kokoro voices:".bold());
    for voice in &voices {
        println!("  {}", voice);
    }
    println!();
    println!("Total: {} voices", voices.len());
    Ok(())
}

/// Create a callback that prints pipeline events to the console.
fn create_console_callback() -> PipelineCallback {
    Box::new(move |event| match event {
        PipelineEvent::Validated { lesson_id, lines } => {
            println!(
                "{} {} ({} lines)",
                "▶".bright_cyan(),
                format!("Synthesizing {}", lesson_id).bright_cyan().bold(),
                lines
            );
        }
        PipelineEvent::LineRendered {
            line_id,
            attempts,
            duration_ms,
        } => {
            let retries = if attempts > 1 {
                format!(" after {} attempts", attempts).yellow().to_string()
            } else {
                String::new()
            };
            println!(
                "  {} line {} {}{}",
                "✓".green(),
                line_id,
                format!("{} ms", duration_ms).dimmed(),
                retries
            );
        }
        PipelineEvent::LineFailed {
            line_id,
            attempts,
            error,
        } => {
            println!(
                "  {} line {} failed after {} attempts: {}",
                "✗".red(),
                line_id,
                attempts,
                error.dimmed()
            );
        }
        PipelineEvent::Stitched {
            duration_ms,
            gain_db,
        } => {
            println!(
                "{} Stitched {} ms {}",
                "▶".bright_cyan(),
                duration_ms,
                format!("(gain {:+.1} dB)", gain_db).dimmed()
            );
        }
        PipelineEvent::Aligned {
            success,
            corrected,
            total_drift_ms,
            needs_review,
        } => {
            if success {
                println!(
                    "{} Aligned: {} lines corrected, total drift {} ms{}",
                    "▶".bright_cyan(),
                    corrected,
                    total_drift_ms,
                    if needs_review {
                        " (needs review)".yellow().to_string()
                    } else {
                        String::new()
                    }
                );
            } else {
                println!(
                    "{} {}",
                    "▶".bright_cyan(),
                    "Alignment unavailable, keeping stitched timings".yellow()
                );
            }
        }
        PipelineEvent::Finished {
            duration_ms,
            quality_score,
        } => {
            println!(
                "{} Done: {:.1} s, quality {:.2}",
                "▶".bright_cyan(),
                duration_ms as f64 / 1000.0,
                quality_score
            );
        }
    })
}
