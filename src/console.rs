// console.rs — Terminal front end: run one analysis, then chat about it.
//
// Status and progress arrive on the inspector's event channel and are
// printed to stderr; the report and chat answers go to stdout.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::ai::ProviderKind;
use crate::capture::VideoSource;
use crate::orchestrator::{Inspector, InspectorEvent, Outcome};
use crate::session::{ReferenceImage, Role};
use crate::settings::{config_path, FramePreset, ImageQuality, Settings};

#[derive(Debug, Parser)]
#[command(
    name = "line-inspector",
    version,
    about = "Compare a manufacturing video against SOP reference images"
)]
pub struct Cli {
    /// Settings file. Defaults to <config dir>/line-inspector/settings.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze a video, then answer follow-up questions on stdin.
    Analyze(AnalyzeArgs),
    /// Print the effective settings, or write a default settings file.
    Config(ConfigArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    video: PathBuf,
    /// SOP reference image; repeat for several.
    #[arg(long = "reference", required = true)]
    references: Vec<PathBuf>,
    #[arg(long, value_enum)]
    provider: Option<ProviderArg>,
    /// Seconds between sampled frames.
    #[arg(long)]
    interval: Option<u32>,
    #[arg(long, value_enum)]
    frames: Option<PresetArg>,
    #[arg(long, value_enum)]
    quality: Option<QualityArg>,
    /// Stream the response and show intermediate progress.
    #[arg(long)]
    stream: bool,
    /// Exit after the report instead of starting a chat.
    #[arg(long)]
    no_chat: bool,
    /// Also write the report to this file. A directory gets a dated
    /// manufacturing-analysis-YYYY-MM-DD.txt inside it.
    #[arg(long, value_name = "PATH")]
    report_out: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ConfigArgs {
    /// Write a settings file with defaults.
    #[arg(long)]
    init: bool,
    /// Overwrite an existing file with --init.
    #[arg(long)]
    force: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Gemini,
    Openai,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Fast,
    Balanced,
    Detailed,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QualityArg {
    Standard,
    High,
    Maximum,
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

pub async fn run(cli: Cli) -> CliResult {
    let path = match cli.config {
        Some(path) => path,
        None => config_path()?,
    };
    match cli.command {
        Command::Config(args) => config(&path, args),
        Command::Analyze(args) => analyze(&path, args).await,
    }
}

fn config(path: &Path, args: ConfigArgs) -> CliResult {
    if args.init {
        if path.exists() && !args.force {
            return Err(format!("{} already exists (use --force to overwrite)", path.display()).into());
        }
        Settings::default().save_to(path)?;
        println!("Wrote {}", path.display());
        return Ok(());
    }

    let mut settings = Settings::load_from(path)?.with_env_overrides();
    for key in [&mut settings.gemini_api_key, &mut settings.openai_api_key] {
        if !key.is_empty() {
            *key = "********".into();
        }
    }
    println!("# {}", path.display());
    print!("{}", toml::to_string_pretty(&settings)?);
    Ok(())
}

fn apply_overrides(mut settings: Settings, args: &AnalyzeArgs) -> Settings {
    if let Some(provider) = args.provider {
        settings.provider = match provider {
            ProviderArg::Gemini => ProviderKind::Gemini,
            ProviderArg::Openai => ProviderKind::OpenAi,
        };
    }
    if let Some(interval) = args.interval {
        settings.frame_interval = interval;
    }
    if let Some(preset) = args.frames {
        settings.max_frames = match preset {
            PresetArg::Fast => FramePreset::Fast,
            PresetArg::Balanced => FramePreset::Balanced,
            PresetArg::Detailed => FramePreset::Detailed,
        };
    }
    if let Some(quality) = args.quality {
        settings.image_quality = match quality {
            QualityArg::Standard => ImageQuality::Standard,
            QualityArg::High => ImageQuality::High,
            QualityArg::Maximum => ImageQuality::Maximum,
        };
    }
    if args.stream {
        settings.stream_responses = true;
    }
    settings
}

async fn analyze(path: &Path, args: AnalyzeArgs) -> CliResult {
    let settings = apply_overrides(Settings::load_from(path)?.with_env_overrides(), &args);
    let (inspector, events) = Inspector::new(settings)?;
    let printer = tokio::spawn(print_events(events));

    let (name, mime, bytes) = read_upload(&args.video).await?;
    inspector.set_video(VideoSource::new(name, mime, bytes)?);
    for reference in &args.references {
        let (name, mime, bytes) = read_upload(reference).await?;
        inspector.add_reference(ReferenceImage::new(name, mime, bytes)?);
    }

    match inspector.analyze().await? {
        Outcome::Completed => {
            if let Some(report) = inspector.report() {
                println!("\n{report}\n");
                if let Some(out) = &args.report_out {
                    let written = save_report(out, &report).await?;
                    eprintln!("Report saved to {}", written.display());
                }
            }
        }
        Outcome::Failed(message) => return Err(message.into()),
        Outcome::Superseded => return Err("analysis was superseded".into()),
    }

    if !args.no_chat {
        chat_loop(&inspector).await?;
    }

    drop(inspector);
    let _ = printer.await;
    Ok(())
}

async fn save_report(out: &Path, report: &str) -> Result<PathBuf, std::io::Error> {
    let path = if out.is_dir() {
        out.join(format!(
            "manufacturing-analysis-{}.txt",
            chrono::Local::now().format("%Y-%m-%d")
        ))
    } else {
        out.to_path_buf()
    };
    tokio::fs::write(&path, report).await?;
    log::info!("Report written to {}", path.display());
    Ok(path)
}

async fn read_upload(path: &Path) -> Result<(String, String, Vec<u8>), std::io::Error> {
    let bytes = tokio::fs::read(path).await?;
    let mime = mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    Ok((name, mime, bytes))
}

/// Interactive follow-up questions. `/new` restarts the chat, `/quit` leaves,
/// and a bare number picks a quick question.
async fn chat_loop(inspector: &Inspector) -> CliResult {
    print_last_assistant_turn(inspector);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let actions = inspector.quick_actions();
        if !actions.is_empty() {
            println!("Quick questions:");
            for (i, action) in actions.iter().enumerate() {
                println!("  {}. {action}", i + 1);
            }
        }
        println!("Ask a question (/new, /quit):");

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        let question = match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/new" => {
                inspector.start_new_chat();
                for turn in inspector.transcript() {
                    println!("{}\n", turn.text);
                }
                continue;
            }
            _ => match line.parse::<usize>() {
                Ok(n) if (1..=actions.len()).contains(&n) => actions[n - 1].to_string(),
                _ => line.to_string(),
            },
        };

        match inspector.ask(&question).await {
            Ok(_) => print_last_assistant_turn(inspector),
            Err(e) => eprintln!("{e}"),
        }
    }
    Ok(())
}

fn print_last_assistant_turn(inspector: &Inspector) {
    if let Some(turn) = inspector
        .transcript()
        .into_iter()
        .rev()
        .find(|t| t.role == Role::Assistant)
    {
        println!("\n{}\n", turn.text);
    }
}

async fn print_events(mut events: mpsc::UnboundedReceiver<InspectorEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            InspectorEvent::Status { text, .. } => eprintln!("… {text}"),
            InspectorEvent::Progress { request_id, value } => {
                log::debug!("request {request_id}: {value}%")
            }
            InspectorEvent::Phase { request_id, phase } => {
                log::debug!("request {request_id}: {phase}")
            }
            InspectorEvent::Error { kind, message, .. } => eprintln!("{kind} error: {message}"),
            InspectorEvent::Report { .. }
            | InspectorEvent::Chat { .. }
            | InspectorEvent::Stats { .. } => {}
        }
    }
}
