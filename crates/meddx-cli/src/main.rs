use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use meddx_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use meddx_contracts::insights::InsightKind;
use meddx_contracts::prompts::DOCTOR_DISCLAIMER;
use meddx_engine::{
    DryrunGateway, GatewayConfig, InferenceGateway, OpenAiGateway, Session, SessionPhase,
};
use serde_json::Value;

#[derive(Debug, Parser)]
#[command(
    name = "meddx",
    version,
    about = "Medical image diagnostic reports from a multimodal model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive session: /upload, /analyze, then follow-up insights.
    Chat(ChatArgs),
    /// Upload one image, analyze it, and print the requested insights.
    Analyze(AnalyzeArgs),
}

#[derive(Debug, Args)]
struct GatewayArgs {
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long)]
    text_model: Option<String>,
    /// Answer locally without contacting the provider.
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    gateway: GatewayArgs,
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long = "insight")]
    insights: Vec<InsightKind>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[command(flatten)]
    gateway: GatewayArgs,
}

fn main() {
    let _ = dotenvy::dotenv();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("meddx error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Analyze(args) => run_analyze(args),
    }
}

fn build_gateway(args: &GatewayArgs) -> Result<Box<dyn InferenceGateway>> {
    if args.dryrun {
        return Ok(Box::new(DryrunGateway));
    }
    let mut config = GatewayConfig::from_env().context("provider configuration")?;
    if let Some(model) = non_empty(args.vision_model.as_deref()) {
        config.vision_model = model;
    }
    if let Some(model) = non_empty(args.text_model.as_deref()) {
        config.text_model = model;
    }
    Ok(Box::new(OpenAiGateway::new(config)?))
}

fn open_session(
    gateway: &GatewayArgs,
    out: &Path,
    events: Option<&Path>,
) -> Result<Session<Box<dyn InferenceGateway>>> {
    let gateway = build_gateway(gateway)?;
    let events_path = events
        .map(Path::to_path_buf)
        .unwrap_or_else(|| out.join("events.jsonl"));
    Session::open(gateway, out, events_path)
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = open_session(&args.gateway, &args.out, args.events.as_deref())?;

    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "meddx chat started ({}). Type /help for commands.",
        session.gateway().name()
    );
    println!("For informational purposes only. {DOCTOR_DISCLAIMER}");

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);

        match intent.action.as_str() {
            "noop" => continue,
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
            }
            "quit" => break,
            "upload" => {
                let Some(path) = value_as_non_empty_string(intent.command_args.get("path")) else {
                    println!("/upload requires a path to a jpg, jpeg, or png image");
                    continue;
                };
                match session.upload_path(Path::new(&path)) {
                    Ok(()) => println!(
                        "Image uploaded successfully! Type /analyze to get the report."
                    ),
                    Err(err) => println!("Upload failed: {err}"),
                }
            }
            "analyze" => {
                println!("Analyzing image, please wait...");
                match session.analyze() {
                    Ok(report) => {
                        println!("### Diagnostic Report\n{report}");
                        println!("\nAdditional insights: {}", insight_commands());
                    }
                    Err(err) => println!("Analysis failed: {err}"),
                }
            }
            "insight" => {
                let Some(kind) = intent.insight else {
                    continue;
                };
                println!("{}", kind.busy_message());
                match session.request_insight(kind) {
                    Ok(insight) => println!("**{}:**\n\n{insight}", kind.heading()),
                    Err(err) => println!("{} failed: {err}", kind.heading()),
                }
            }
            "status" => print_status(&session),
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {
                println!("Commands start with '/'. Type /help for commands.");
            }
        }

        if let Some(err) = session.event_log_error() {
            eprintln!("warning: event log write failed ({err})");
        }
    }

    let summary = session.finish()?;
    println!(
        "Session finished: {} upload(s), {} analysis(es), {} insight(s).",
        summary.uploads, summary.analyses, summary.insights
    );
    Ok(())
}

fn run_analyze(args: AnalyzeArgs) -> Result<i32> {
    let mut session = open_session(&args.gateway, &args.out, args.events.as_deref())?;
    let outcome = analyze_once(&mut session, &args);
    session.finish()?;
    outcome
}

fn analyze_once(
    session: &mut Session<Box<dyn InferenceGateway>>,
    args: &AnalyzeArgs,
) -> Result<i32> {
    session
        .upload_path(&args.image)
        .with_context(|| format!("upload failed ({})", args.image.display()))?;

    eprintln!("Analyzing image, please wait...");
    let report = session.analyze().context("analysis failed")?;
    println!("### Diagnostic Report\n{report}");

    let mut code = 0;
    for kind in &args.insights {
        eprintln!("{}", kind.busy_message());
        match session.request_insight(*kind) {
            Ok(insight) => println!("\n**{}:**\n\n{insight}", kind.heading()),
            Err(err) => {
                eprintln!("{} failed: {err}", kind.heading());
                code = 1;
            }
        }
    }
    Ok(code)
}

fn print_status<G: InferenceGateway>(session: &Session<G>) {
    println!("Session: {}", session.session_id());
    println!("Phase: {}", session.phase());
    match session.staged_image() {
        Some(staged) => println!(
            "Staged image: {} ({}, {} bytes)",
            staged.file_name(),
            staged.format(),
            staged.len()
        ),
        None => println!("Staged image: none"),
    }
    match session.diagnostic_result() {
        Some(report) => println!(
            "Diagnostic report: {} chars{}",
            report.text().chars().count(),
            if session.phase() == SessionPhase::ImageStaged {
                " (from the previous image)"
            } else {
                ""
            }
        ),
        None => println!("Diagnostic report: none"),
    }
}

fn insight_commands() -> String {
    InsightKind::ALL
        .iter()
        .map(|kind| format!("/{}", kind.as_str()))
        .collect::<Vec<String>>()
        .join(" ")
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
