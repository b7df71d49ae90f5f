use anyhow::{bail, Context};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use multicam::display::SnapshotSurface;
use multicam::testing::SyntheticSystem;
use multicam::{
    CaptureError, CaptureOrchestrator, MulticamConfig, OrchestratorBuilder, RecordingSummary,
    SourceSystem,
};
use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const USAGE: &str = "\
Usage: multicam [options]

Options:
  --config <path>      Configuration file (default: multicam.toml)
  --sources <n>        Number of cameras to open
  --backend <name>     Camera backend: synthetic or webcam
  --output <dir>       Directory for recordings
  --preview-dir <dir>  Write previews as PNG files into <dir>
  -h, --help           Show this help";

const COMMANDS: &str = "\
Commands:
  start              Start recording all cameras
  stop               Stop recording (asks whether to keep the files)
  status [--json]    Show per-camera counters
  preview on|off     Toggle the live preview
  help               Show this list
  exit               Quit (asks about an active recording)";

const EVENT_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    sources: Option<usize>,
    backend: Option<String>,
    output: Option<String>,
    preview_dir: Option<PathBuf>,
    help: bool,
}

fn parse_args(args: &[String]) -> anyhow::Result<Options> {
    let mut options = Options::default();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let mut value = |name: &str| -> anyhow::Result<String> {
            i += 1;
            args.get(i)
                .cloned()
                .with_context(|| format!("{name} requires a value"))
        };
        match flag {
            "--config" => options.config = Some(PathBuf::from(value("--config")?)),
            "--sources" => {
                options.sources = Some(
                    value("--sources")?
                        .parse()
                        .context("--sources must be a number")?,
                )
            }
            "--backend" => options.backend = Some(value("--backend")?),
            "--output" => options.output = Some(value("--output")?),
            "--preview-dir" => options.preview_dir = Some(PathBuf::from(value("--preview-dir")?)),
            "-h" | "--help" => options.help = true,
            other => bail!("unknown option: {other}"),
        }
        i += 1;
    }
    Ok(options)
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Start,
    Stop,
    Exit,
    Status { json: bool },
    Preview(bool),
    Help,
    Empty,
    Unknown(String),
}

fn parse_command(line: &str) -> Command {
    let words: Vec<&str> = line.split_whitespace().collect();
    match words.as_slice() {
        [] => Command::Empty,
        ["start"] => Command::Start,
        ["stop"] => Command::Stop,
        ["exit"] | ["quit"] => Command::Exit,
        ["status"] => Command::Status { json: false },
        ["status", "--json"] => Command::Status { json: true },
        ["preview", "on"] => Command::Preview(true),
        ["preview", "off"] => Command::Preview(false),
        ["help"] | ["?"] => Command::Help,
        _ => Command::Unknown(line.trim().to_string()),
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

enum Input {
    Line(String),
    Eof,
    Interrupt,
}

fn spawn_stdin_reader(tx: Sender<Input>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Input::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(_) => break,
                }
            }
            let _ = tx.send(Input::Eof);
        })?;
    Ok(())
}

fn load_config(options: &Options) -> anyhow::Result<MulticamConfig> {
    let path = options
        .config
        .clone()
        .unwrap_or_else(MulticamConfig::default_path);
    let mut config = if path.exists() || options.config.is_some() {
        MulticamConfig::load_layered(&path)
            .with_context(|| format!("failed to load {}", path.display()))?
    } else {
        MulticamConfig::default()
    };
    if let Some(output) = &options.output {
        config.recording.output_directory = output.clone();
    }
    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn make_system(options: &Options, config: &MulticamConfig) -> anyhow::Result<Box<dyn SourceSystem>> {
    let default_backend = if cfg!(feature = "webcam") { "webcam" } else { "synthetic" };
    match options.backend.as_deref().unwrap_or(default_backend) {
        "synthetic" => {
            let count = options.sources.or(config.camera.max_sources).unwrap_or(3);
            Ok(Box::new(
                SyntheticSystem::new(count).with_buffer_count(config.camera.buffer_count),
            ))
        }
        #[cfg(feature = "webcam")]
        "webcam" => Ok(Box::new(multicam::source::webcam::WebcamSystem::new(
            config.camera.buffer_count,
        ))),
        #[cfg(not(feature = "webcam"))]
        "webcam" => bail!("built without the webcam feature"),
        other => bail!("unknown backend: {other}"),
    }
}

/// Ask whether to keep the recording. End of input or Ctrl-C keeps it.
fn ask_save(rx: &Receiver<Input>) -> bool {
    loop {
        print!("Save recording? (yes/no): ");
        let _ = std::io::stdout().flush();
        match rx.recv() {
            Ok(Input::Line(line)) => match parse_answer(&line) {
                Some(answer) => return answer,
                None => println!("Please answer yes or no."),
            },
            Ok(Input::Eof) | Ok(Input::Interrupt) | Err(_) => {
                println!();
                return true;
            }
        }
    }
}

fn print_summary(summary: &RecordingSummary) {
    if summary.saved {
        println!(
            "Saved {} file(s), {} frames in {:.1}s:",
            summary.kept_files().count(),
            summary.total_frames(),
            summary.duration_secs
        );
        for path in summary.kept_files() {
            println!("  {}", path.display());
        }
    } else {
        println!("Recording discarded.");
    }
    for file in summary.incomplete() {
        println!(
            "  camera {}: {:?}{}",
            file.index,
            file.status,
            file.error
                .as_deref()
                .map(|e| format!(" ({e})"))
                .unwrap_or_default()
        );
    }
}

fn stop_recording(orchestrator: &mut CaptureOrchestrator, rx: &Receiver<Input>) {
    let save = ask_save(rx);
    match orchestrator.stop_recording(save) {
        Ok(summary) => print_summary(&summary),
        Err(e) => println!("Error: {e}"),
    }
}

fn print_status(orchestrator: &CaptureOrchestrator, json: bool) -> anyhow::Result<()> {
    let status = orchestrator.status();
    if json {
        println!("{}", serde_json::to_string(&status)?);
        return Ok(());
    }
    println!("State: {}", status.state);
    if let Some(session) = &status.recording {
        println!(
            "Recording {} for {:.1}s",
            session.timestamp,
            session.elapsed_secs()
        );
    }
    for source in &status.sources {
        println!(
            "  camera {} [{}] {}: captured {}, written {}, shown {}, dropped {}{}",
            source.index,
            source.format,
            source.description,
            source.telemetry.frames_captured,
            source.telemetry.frames_written,
            source.telemetry.frames_shown,
            source.telemetry.dropped_frames,
            if source.telemetry.disconnected { " (disconnected)" } else { "" }
        );
    }
    Ok(())
}

fn report_events(orchestrator: &CaptureOrchestrator) {
    for event in orchestrator.drain_events() {
        match event {
            CaptureError::SourceDisconnected { .. } | CaptureError::WriteFailed { .. } => {
                println!("Warning: {event}")
            }
            other => println!("Error: {other}"),
        }
    }
}

fn run(orchestrator: &mut CaptureOrchestrator, rx: &Receiver<Input>) -> anyhow::Result<()> {
    loop {
        report_events(orchestrator);
        let input = match rx.recv_timeout(EVENT_POLL) {
            Ok(input) => input,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Ok(()),
        };

        let line = match input {
            Input::Line(line) => line,
            Input::Eof | Input::Interrupt => {
                if orchestrator.is_recording() {
                    println!("Input closed; saving active recording.");
                    match orchestrator.stop_recording(true) {
                        Ok(summary) => print_summary(&summary),
                        Err(e) => println!("Error: {e}"),
                    }
                }
                return Ok(());
            }
        };

        match parse_command(&line) {
            Command::Empty => {}
            Command::Start => match orchestrator.start_recording() {
                Ok(session) => {
                    println!("Recording {} camera(s):", session.files.len());
                    for (_, path) in &session.files {
                        println!("  {}", path.display());
                    }
                }
                Err(e) => println!("Error: {e}"),
            },
            Command::Stop => {
                if orchestrator.is_recording() {
                    stop_recording(orchestrator, rx);
                } else {
                    println!("Not recording");
                }
            }
            Command::Exit => {
                if orchestrator.is_recording() {
                    stop_recording(orchestrator, rx);
                }
                return Ok(());
            }
            Command::Status { json } => print_status(orchestrator, json)?,
            Command::Preview(true) => match orchestrator.start_display() {
                Ok(()) => println!("Preview on"),
                Err(e) => println!("Error: {e}"),
            },
            Command::Preview(false) => {
                orchestrator.stop_display()?;
                println!("Preview off");
            }
            Command::Help => println!("{COMMANDS}"),
            Command::Unknown(text) => println!("Unknown command: {text} (try 'help')"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let options = parse_args(&args)?;
    if options.help {
        println!("{USAGE}\n\n{COMMANDS}");
        return Ok(());
    }

    multicam::init_logging();
    let config = load_config(&options)?;

    let (tx, rx) = crossbeam_channel::unbounded();
    let interrupt_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(Input::Interrupt);
    })
    .context("failed to install Ctrl-C handler")?;
    spawn_stdin_reader(tx).context("failed to read stdin")?;

    let system = make_system(&options, &config)?;
    let mut builder = OrchestratorBuilder::from_boxed(system).config(config.clone());
    if let Some(count) = options.sources {
        builder = builder.sources(count);
    }
    if let Some(dir) = &options.preview_dir {
        builder = builder.surface(Arc::new(SnapshotSurface::new(dir)?));
    }
    let mut orchestrator = builder.initialize().context("failed to initialize cameras")?;

    if config.display.enabled_on_startup {
        if let Err(e) = orchestrator.start_display() {
            log::warn!("Preview not started: {}", e);
        }
    }

    println!(
        "{} camera(s) ready. Recordings go to {}",
        orchestrator.source_count(),
        config.recording.output_directory
    );
    println!("{COMMANDS}");

    let result = run(&mut orchestrator, &rx);
    if let Some(summary) = orchestrator.shutdown() {
        print_summary(&summary);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("start"), Command::Start);
        assert_eq!(parse_command("  stop  "), Command::Stop);
        assert_eq!(parse_command("quit"), Command::Exit);
        assert_eq!(parse_command("status --json"), Command::Status { json: true });
        assert_eq!(parse_command("preview off"), Command::Preview(false));
        assert_eq!(parse_command(""), Command::Empty);
        assert_eq!(parse_command("record"), Command::Unknown("record".to_string()));
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer("YES"), Some(true));
        assert_eq!(parse_answer(" n "), Some(false));
        assert_eq!(parse_answer("maybe"), None);
    }

    #[test]
    fn test_parse_args() {
        let options = parse_args(&args(&["--sources", "2", "--backend", "synthetic"])).unwrap();
        assert_eq!(options.sources, Some(2));
        assert_eq!(options.backend.as_deref(), Some("synthetic"));

        assert!(parse_args(&args(&["--sources"])).is_err());
        assert!(parse_args(&args(&["--sources", "two"])).is_err());
        assert!(parse_args(&args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn test_eof_during_prompt_saves() {
        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(Input::Line("perhaps".to_string())).unwrap();
        tx.send(Input::Eof).unwrap();
        assert!(ask_save(&rx));

        tx.send(Input::Line("no".to_string())).unwrap();
        assert!(!ask_save(&rx));
    }
}
