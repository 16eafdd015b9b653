use std::io::{self, BufRead, BufReader};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::consent::{ConsentEngine, Intake, PolicyKind};
use crate::error::Result;
use crate::grammar::{Input, parse_input};
use crate::output::{self, Format};
use crate::reader::Event;
use crate::session::Session;

/// How long the foreground waits for typed input before checking for events.
const INPUT_TICK: Duration = Duration::from_millis(50);

const HELP: &str =
    "Commands: @exit, @send <file> <user>, @exec <user> <command>, @accept <id>, @refuse <id>";

/// Interactive session: join, print everything that arrives, send what is
/// typed, and answer exec requests with `@accept`/`@refuse`.
pub fn run(session: &Session, policy: PolicyKind, format: Format) -> Result<()> {
    let (events_tx, events_rx) = mpsc::channel();
    let mut engine = session.consent_engine(Box::new(policy), events_tx.clone())?;
    let reader = session.reader()?.spawn(events_tx)?;
    session.join()?;
    output::print_notice(HELP, format);

    let input = spawn_input_reader(BufReader::new(io::stdin()));
    loop {
        for event in events_rx.try_iter() {
            handle_event(&mut engine, event, format);
        }
        match input.recv_timeout(INPUT_TICK) {
            Ok(Ok(line)) => {
                if !handle_input(session, &mut engine, &line, format) {
                    break;
                }
            }
            Ok(Err(err)) => {
                warn!(error = %err, "stdin read failed; leaving");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let left = session.leave();
    let summary = reader.stop();
    let undecided = engine.pending().len();
    engine.shutdown();
    for event in events_rx.try_iter() {
        if !matches!(event, Event::ExecRequest { .. }) {
            output::print_event(&event, format)?;
        }
    }
    info!(
        records = summary.records,
        skipped = summary.skipped,
        undecided,
        "chat session ended"
    );
    left.map(|_| ())
}

fn handle_event(engine: &mut ConsentEngine, event: Event, format: Format) {
    let shown = match event {
        Event::ExecRequest { sender, command } => match engine.receive(&sender, &command) {
            Ok(Intake::AwaitingConsent(pending)) => output::print_pending(&pending, format),
            Ok(Intake::Resolved { id, state }) => output::print_decision(id, state, format),
            Err(err) => Err(err),
        },
        other => output::print_event(&other, format),
    };
    if let Err(err) = shown {
        output::print_error(&err, format);
    }
}

/// Act on one typed line. Returns `false` when the participant asked to leave.
fn handle_input(session: &Session, engine: &mut ConsentEngine, line: &str, format: Format) -> bool {
    let result = match parse_input(line) {
        Input::Empty => Ok(()),
        Input::Exit => return false,
        Input::Message(text) => session.append_message(&text).map(|_| ()),
        Input::Send { path, dest_user } => session
            .send_file(Path::new(&path), &dest_user)
            .and_then(|transfer| output::print_transfer(&transfer, format)),
        Input::Exec { dest_user, command } => session
            .append_exec_command(&dest_user, &command)
            .map(|_| output::print_notice(&format!("exec request sent to {dest_user}"), format)),
        Input::Accept(id) => engine
            .decide(id, true)
            .and_then(|state| output::print_decision(id, state, format)),
        Input::Refuse(id) => engine
            .decide(id, false)
            .and_then(|state| output::print_decision(id, state, format)),
        Input::Usage(hint) => {
            output::print_notice(hint, format);
            Ok(())
        }
    };
    if let Err(err) = result {
        output::print_error(&err, format);
    }
    true
}

/// Read lines on a separate thread so the foreground never blocks on the
/// terminal. The channel disconnects at end of input.
fn spawn_input_reader<R>(mut input: R) -> Receiver<io::Result<String>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let mut line = String::new();
        loop {
            line.clear();
            match input.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {
                    let normalized = line
                        .trim_end_matches('\n')
                        .trim_end_matches('\r')
                        .to_string();
                    if tx.send(Ok(normalized)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err));
                    break;
                }
            }
        }
        debug!("input reader finished");
    });

    rx
}
