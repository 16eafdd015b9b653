use clap::ValueEnum;
use colored::Colorize;
use serde_json::json;

use crate::consent::{ExecState, PendingRequest};
use crate::error::{ParleyError, Result};
use crate::grammar::{Command, ExecStatus};
use crate::model::Record;
use crate::reader::Event;
use crate::store::transfer::TransferRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Json,
    Pretty,
    Minimal,
}

pub fn print_record(record: &Record, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(record)?),
        Format::Pretty => println!("{}", pretty_record(record, &crate::grammar::classify(record))),
        Format::Minimal => print!("{}", crate::codec::encode_record(record)),
    }
    Ok(())
}

pub fn print_records(records: &[Record], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(records)?),
        _ => {
            for record in records {
                print_record(record, format)?;
            }
        }
    }
    Ok(())
}

fn pretty_record(record: &Record, command: &Command) -> String {
    let time = record.timestamp.format("%H:%M:%S").to_string().dimmed();
    let sender = format!("{}:", record.sender).cyan().bold();
    let body = match command {
        Command::PlainMessage { text } => text.normal(),
        Command::ExecRequest { .. } => record.body.yellow(),
        Command::FileNotice { .. } => record.body.green(),
        Command::ExecOutcome {
            status: ExecStatus::Accepted,
            ..
        } => record.body.magenta(),
        Command::ExecOutcome { .. } => record.body.red(),
    };
    format!("{time} {sender} {body}")
}

pub fn print_event(event: &Event, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(event)?),
        Format::Pretty => match event {
            Event::Message {
                record, command, ..
            } => println!("{}", pretty_record(record, command)),
            // Exec requests are shown through `print_pending` once registered.
            Event::ExecRequest { sender, command } => println!(
                "{} {} asks to run: {}",
                "[exec]".yellow().bold(),
                sender.cyan(),
                command
            ),
            Event::FileArrived { filename } => println!(
                "{} new file received: {}",
                "[file]".green().bold(),
                filename.bold()
            ),
            Event::ExecOutcome {
                command,
                success: true,
                ..
            } => println!("{} launched: {}", "[exec]".magenta().bold(), command),
            Event::ExecOutcome {
                command, detail, ..
            } => println!(
                "{} launch failed: {} ({})",
                "[exec]".red().bold(),
                command,
                detail
            ),
        },
        Format::Minimal => match event {
            Event::Message { line, .. } => println!("{line}"),
            Event::ExecRequest { sender, command } => println!("exec-request {sender} {command}"),
            Event::FileArrived { filename } => println!("file {filename}"),
            Event::ExecOutcome {
                command, success, ..
            } => println!(
                "exec-{} {command}",
                if *success { "launched" } else { "failed" }
            ),
        },
    }
    Ok(())
}

/// An incoming request waiting for `@accept`/`@refuse`.
pub fn print_pending(pending: &PendingRequest, format: Format) -> Result<()> {
    match format {
        Format::Json => println!(
            "{}",
            json!({"event": "exec_pending", "request": pending})
        ),
        Format::Pretty => {
            println!(
                "{} {} asks to run: {}",
                format!("[exec #{}]", pending.id).yellow().bold(),
                pending.sender.cyan().bold(),
                pending.command.bold()
            );
            println!(
                "  {}",
                format!("@accept {0} to run it, @refuse {0} to decline", pending.id).dimmed()
            );
        }
        Format::Minimal => println!(
            "exec-pending {} {} {}",
            pending.id, pending.sender, pending.command
        ),
    }
    Ok(())
}

pub fn print_decision(id: u64, state: ExecState, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", json!({"request": id, "state": state})),
        Format::Pretty => {
            let label = format!("[exec #{id}]");
            match state {
                ExecState::Refused => println!("{} refused", label.red().bold()),
                other => println!("{} {}", label.magenta().bold(), other),
            }
        }
        Format::Minimal => println!("{id} {state}"),
    }
    Ok(())
}

pub fn print_transfer(transfer: &TransferRecord, format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(transfer)?),
        Format::Pretty => println!(
            "Sent {} to '{}'",
            transfer.filename.bold(),
            transfer.dest_user.cyan()
        ),
        Format::Minimal => println!("{}", transfer.dest_path.display()),
    }
    Ok(())
}

pub fn print_files(files: &[String], format: Format) -> Result<()> {
    match format {
        Format::Json => println!("{}", serde_json::to_string(files)?),
        Format::Pretty if files.is_empty() => println!("{}", "No files received.".dimmed()),
        _ => {
            for f in files {
                println!("{f}");
            }
        }
    }
    Ok(())
}

/// Interactive-mode notices (usage hints, recoverable failures).
pub fn print_notice(text: &str, format: Format) {
    match format {
        Format::Json => println!("{}", json!({"event": "notice", "message": text})),
        Format::Pretty => println!("{}", text.dimmed()),
        Format::Minimal => println!("{text}"),
    }
}

/// A failed operation that does not end the session.
pub fn print_error(err: &ParleyError, format: Format) {
    match format {
        Format::Json => eprintln!("{}", json!({"error": err.code(), "message": err.to_string()})),
        _ => eprintln!("{} {err}", "error:".red().bold()),
    }
}
