use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::path::Path;

use clap::Parser;
use colored::*;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use failure_analyst::cache::{ReportRead, ReportStatus};
use failure_analyst::cli::{Args, Command};
use failure_analyst::config::AppConfig;
use failure_analyst::dataset::Dataset;
use failure_analyst::service::{AnalystService, ChatReply, UploadStatus, UploadSummary};

fn load_dataset(path: &Path) -> Result<Dataset, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {e}", path.display()))?;
    Ok(Dataset::from_json(&text)?)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_upload(summary: &UploadSummary) {
    eprintln!(
        "{} {} rows, {} columns, {} failures",
        "Loaded:".bright_blue().bold(),
        summary.rows,
        summary.columns,
        summary.failure_count
    );
    if summary.status == UploadStatus::WaitingForDefinitions {
        eprintln!(
            "{} {}",
            "Undefined failure modes:".yellow().bold(),
            summary.unknown_acronyms.join(", ")
        );
        eprintln!("Pass --define NAME=TEXT for each to start the analysis.");
    }
}

fn print_report(read: &ReportRead) {
    let label = match read.status {
        ReportStatus::Ready => "ready".green(),
        ReportStatus::Pending => "pending".yellow(),
        ReportStatus::Error | ReportStatus::NotFound => "error".red(),
    };
    eprintln!("{} {}", "Report:".bright_blue().bold(), label);
    println!("{}", read.text);
}

fn print_reply(reply: &ChatReply) {
    match reply {
        ChatReply::Answer(text) => println!("{text}"),
        ChatReply::Error(msg) => eprintln!("{} {msg}", "Error:".red().bold()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("failure_analyst=info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut config = AppConfig::load(args.config.as_deref())?;
    args.apply_overrides(&mut config);
    let service = AnalystService::from_config(&config)?;

    match &args.command {
        Command::Analyze {
            data,
            machine,
            definitions,
            kind,
            section,
        } => {
            if !definitions.is_empty() {
                service.define_acronyms(definitions.iter().cloned().collect::<HashMap<_, _>>());
            }
            let summary = service.upload(load_dataset(data)?, machine.clone());
            if summary.status == UploadStatus::WaitingForDefinitions {
                if args.json {
                    print_json(&summary)?;
                } else {
                    print_upload(&summary);
                }
                return Ok(());
            }
            if !args.json {
                print_upload(&summary);
                if let Ok(fast) = service.fast_report() {
                    println!("{fast}\n");
                }
                eprintln!("{}", "Running background analysis...".dimmed());
            }
            service.wait_for_analysis().await;
            let read = match section {
                Some(s) => service.report_section(*kind, *s),
                None => service.report(*kind),
            };
            if args.json {
                print_json(&read)?;
            } else {
                print_report(&read);
            }
        }
        Command::Ask { data, question } => {
            service.state().set_dataset(load_dataset(data)?, None);
            let reply = service.chat(question).await;
            if args.json {
                print_json(&reply)?;
            } else {
                print_reply(&reply);
            }
        }
        Command::Chat { data } => {
            let summary = service.upload(load_dataset(data)?, None);
            print_upload(&summary);
            let stdin = io::stdin();
            loop {
                eprint!("{} ", ">".bright_cyan().bold());
                io::stderr().flush()?;
                let mut line = String::new();
                if stdin.lock().read_line(&mut line)? == 0 {
                    break;
                }
                let question = line.trim();
                if question.is_empty() {
                    continue;
                }
                if matches!(question, "exit" | "quit") {
                    break;
                }
                let reply = service.chat(question).await;
                if args.json {
                    print_json(&reply)?;
                } else {
                    print_reply(&reply);
                }
            }
        }
        Command::FastReport { data } => {
            service.state().set_dataset(load_dataset(data)?, None);
            println!("{}", service.fast_report()?);
        }
        Command::Correlations { data } => {
            service.state().set_dataset(load_dataset(data)?, None);
            println!("{}", service.correlation_report()?);
        }
        Command::Unknown { data, definitions } => {
            service.define_acronyms(definitions.iter().cloned().collect::<HashMap<_, _>>());
            service.state().set_dataset(load_dataset(data)?, None);
            let unknown = service.unknown_acronyms()?;
            if args.json {
                print_json(&unknown)?;
            } else if unknown.is_empty() {
                println!("{}", "All failure modes are defined.".green());
            } else {
                for name in unknown {
                    println!("{name}");
                }
            }
        }
    }

    Ok(())
}
