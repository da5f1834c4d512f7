//! CLI for MediaSight - video summaries and image detection via Gemini.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use mediasight::{
    Config, ConfigOverrides, DetectionPreset, GeminiClient, ImageJob, JobPoller, OutputWriter,
    Pipeline, RunReport, SampleDownloader, Stage, StageError, StageExt, StageResult, VideoJob,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mediasight")]
#[command(about = "Summarize videos and detect objects or emotions in images with Gemini")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args)]
struct GlobalArgs {
    /// Gemini API key (overrides GEMINI_API_KEY / GOOGLE_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Read settings from this env file instead of searching for .env
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Model name, e.g. gemini-2.0-flash
    #[arg(long, global = true)]
    model: Option<String>,

    /// Seconds between processing-state checks
    #[arg(long, global = true, value_name = "SECS")]
    poll_interval: Option<u64>,

    /// Give up waiting for processing after this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    max_wait: Option<u64>,

    /// Per-request HTTP timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    request_timeout: Option<u64>,

    /// Directory for output files (default: current directory)
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// Leave the uploaded file on the server after analysis
    #[arg(long, global = true)]
    keep_remote: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize a video as text
    Video(VideoArgs),

    /// Detect objects or emotions in an image and save an annotated copy
    Image(ImageArgs),

    /// Download the sample images
    Samples(SamplesArgs),
}

#[derive(Args)]
struct VideoArgs {
    /// Video file to analyze
    #[arg(long)]
    video: PathBuf,

    /// Custom instruction for the model
    #[arg(short, long)]
    prompt: Option<String>,

    /// Output file path (default: <name>_summary.txt)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ImageArgs {
    /// Image file to analyze; prompts for one in the current directory if omitted
    #[arg(long)]
    image: Option<PathBuf>,

    /// Custom instruction for the model
    #[arg(short, long)]
    prompt: Option<String>,

    /// What to detect
    #[arg(long, value_enum, default_value = "objects")]
    preset: PresetArg,

    /// Output file path (default: <name>_analyzed.jpg or <name>_emotions.jpg)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct SamplesArgs {
    /// Directory to save the images in
    #[arg(long, default_value = "images")]
    dir: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PresetArg {
    Objects,
    Emotions,
}

impl From<PresetArg> for DetectionPreset {
    fn from(arg: PresetArg) -> Self {
        match arg {
            PresetArg::Objects => DetectionPreset::Objects,
            PresetArg::Emotions => DetectionPreset::Emotions,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    let json = cli.global.json;
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            match e.downcast_ref::<StageError>() {
                Some(stage_err) => eprintln!("error: {stage_err}"),
                None => eprintln!("error: {e:#}"),
            }
            if json {
                print_json_error(&e);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "warn,mediasight=info",
        2 => "info,mediasight=debug",
        _ => "debug,mediasight=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let global = cli.global;
    match cli.command {
        Commands::Video(args) => {
            let pipeline = build_pipeline(&global)?;
            let job = VideoJob {
                path: args.video,
                prompt: args.prompt,
                output: args.output,
            };
            let report = pipeline.run_video(&job).await?;
            print_report("video", &report, global.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Image(args) => {
            let pipeline = build_pipeline(&global)?;
            let path = match args.image {
                Some(path) => path,
                None => match pick_image(Path::new("."))? {
                    Some(path) => path,
                    None => {
                        eprintln!("No image selected.");
                        return Ok(ExitCode::SUCCESS);
                    }
                },
            };
            let job = ImageJob {
                path,
                prompt: args.prompt,
                preset: args.preset.into(),
                output: args.output,
            };
            let report = pipeline.run_image(&job).await?;
            print_report("image", &report, global.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Samples(args) => download_samples(&args.dir, global.json).await,
    }
}

fn build_pipeline(global: &GlobalArgs) -> StageResult<Pipeline<GeminiClient>> {
    let overrides = ConfigOverrides {
        api_key: global.api_key.clone(),
        env_file: global.env_file.clone(),
        model: global.model.clone(),
        poll_interval: global.poll_interval.map(Duration::from_secs),
        max_wait: global.max_wait.map(Duration::from_secs),
        request_timeout: global.request_timeout.map(Duration::from_secs),
    };
    let config = Config::load(overrides).at(Stage::LoadConfig)?;
    tracing::debug!(?config, "configuration loaded");
    let client = config.gemini_client().at(Stage::LoadConfig)?;

    let writer = match &global.output_dir {
        Some(dir) => OutputWriter::new(dir),
        None => OutputWriter::default(),
    };
    Ok(Pipeline::new(client)
        .poller(JobPoller::new(config.poll_interval, config.max_wait))
        .writer(writer)
        .keep_remote(global.keep_remote))
}

/// Lists images in `dir` and asks which one to analyze. `None` means the
/// user chose to exit.
fn pick_image(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let mut images: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_pickable(path))
        .collect();
    images.sort();

    if images.is_empty() {
        anyhow::bail!("no .jpg, .jpeg or .png files found in {}", dir.display());
    }

    let mut stderr = std::io::stderr();
    writeln!(stderr, "Available images:")?;
    for (i, path) in images.iter().enumerate() {
        let name = path.file_name().unwrap_or_default().to_string_lossy();
        writeln!(stderr, "  {}. {}", i + 1, name)?;
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        write!(stderr, "Select an image (1-{}, 0 to exit): ", images.len())?;
        stderr.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            anyhow::bail!("no selection made");
        }
        match line.trim().parse::<usize>() {
            Ok(0) => return Ok(None),
            Ok(n) if n <= images.len() => return Ok(Some(images.swap_remove(n - 1))),
            _ => writeln!(stderr, "Please enter a number between 0 and {}.", images.len())?,
        }
    }
}

fn is_pickable(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false)
}

fn print_report(kind: &str, report: &RunReport, json_output: bool) -> anyhow::Result<()> {
    if json_output {
        let result = serde_json::json!({
            "type": kind,
            "success": true,
            "output": report.output.display().to_string(),
            "remote_file": report.remote_file,
            "result": report.result,
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    match report.result.detections() {
        Some(detections) => {
            println!(
                "Annotated image: {} ({} detections)",
                report.output.display(),
                detections.len()
            );
            for detection in detections {
                match detection.confidence {
                    Some(c) => println!("  - {} ({:.0}%)", detection.label, c * 100.0),
                    None => println!("  - {}", detection.label),
                }
            }
        }
        None => {
            println!("Summary saved: {}", report.output.display());
        }
    }
    Ok(())
}

fn print_json_error(err: &anyhow::Error) {
    let result = match err.downcast_ref::<StageError>() {
        Some(e) => serde_json::json!({
            "success": false,
            "stage": e.stage,
            "kind": e.kind().to_string(),
            "detail": e.source.detail(),
            "message": e.source.to_string(),
        }),
        None => serde_json::json!({
            "success": false,
            "message": format!("{err:#}"),
        }),
    };
    if let Ok(text) = serde_json::to_string_pretty(&result) {
        println!("{text}");
    }
}

async fn download_samples(dir: &Path, json_output: bool) -> anyhow::Result<ExitCode> {
    let downloader = SampleDownloader::new()?;
    let report = downloader
        .download_all(dir)
        .await
        .with_context(|| format!("failed to prepare {}", dir.display()))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for path in &report.saved {
            println!("Downloaded: {}", path.display());
        }
        for failed in &report.failed {
            eprintln!("Failed: {} ({})", failed.file_name, failed.error);
        }
        println!(
            "{} of {} images saved to {}",
            report.saved.len(),
            report.saved.len() + report.failed.len(),
            dir.display()
        );
    }

    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
