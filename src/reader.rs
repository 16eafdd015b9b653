//! The per-participant polling loop over the shared log and the local
//! transfer directory.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec;
use crate::error::Result;
use crate::grammar::{self, Command};
use crate::model::{Record, Username};
use crate::store::log::{LogTail, SharedLog};
use crate::store::transfer::{ArrivalWatch, TransferChannel};

/// Everything the core reports to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// A well-formed record, whatever its command.
    Message {
        line: String,
        record: Record,
        command: Command,
    },
    /// An exec request addressed to the local participant.
    ExecRequest { sender: String, command: String },
    FileArrived { filename: String },
    /// Launch result for a request accepted locally.
    ExecOutcome {
        command: String,
        success: bool,
        detail: String,
    },
}

/// Final counters of a stopped reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderSummary {
    pub cursor: u64,
    pub records: u64,
    pub skipped: u64,
}

/// An idle reader. `poll_once` drives it by hand; `spawn` moves it onto its
/// own thread.
#[derive(Debug)]
pub struct TailingReader {
    user: Username,
    tail: LogTail,
    transfers: TransferChannel,
    arrivals: ArrivalWatch,
    poll_interval: Duration,
    records: u64,
    skipped: u64,
}

impl TailingReader {
    /// Reader positioned at the current end of the log: history is not
    /// replayed.
    pub fn new(
        log: &SharedLog,
        transfers: TransferChannel,
        user: Username,
        poll_interval: Duration,
    ) -> Result<Self> {
        let position = log.end_position()?;
        Self::starting_at(log, position, transfers, user, poll_interval)
    }

    pub fn starting_at(
        log: &SharedLog,
        position: u64,
        transfers: TransferChannel,
        user: Username,
        poll_interval: Duration,
    ) -> Result<Self> {
        transfers.ensure_user_dir(&user)?;
        let arrivals = ArrivalWatch::new(&transfers, user.clone())?;
        Ok(Self {
            user,
            tail: log.tail_from(position),
            transfers,
            arrivals,
            poll_interval,
            records: 0,
            skipped: 0,
        })
    }

    pub fn cursor(&self) -> u64 {
        self.tail.cursor()
    }

    /// One iteration: new log lines first, then new files. Storage errors are
    /// logged and left for the next iteration.
    pub fn poll_once(&mut self) -> Vec<Event> {
        let mut events = Vec::new();

        match self.tail.poll() {
            Ok(lines) => {
                for line in lines {
                    self.dispatch_line(line, &mut events);
                }
            }
            Err(err) => warn!(error = %err, "shared log unavailable; retrying next poll"),
        }

        match self.arrivals.poll(&self.transfers) {
            Ok(files) => {
                events.extend(files.into_iter().map(|filename| Event::FileArrived { filename }));
            }
            Err(err) => warn!(error = %err, "transfer directory unavailable; retrying next poll"),
        }

        events
    }

    fn dispatch_line(&mut self, line: String, events: &mut Vec<Event>) {
        let record = match codec::decode(&line) {
            Ok(record) => record,
            Err(err) => {
                self.skipped += 1;
                if !line.trim().is_empty() {
                    debug!(error = %err, line = %line, "skipping malformed log line");
                }
                return;
            }
        };
        self.records += 1;

        let command = grammar::classify(&record);
        let exec_for_me = match &command {
            Command::ExecRequest {
                dest_user,
                command: requested,
            } if dest_user == self.user.as_str() => Some(Event::ExecRequest {
                sender: record.sender.clone(),
                command: requested.clone(),
            }),
            _ => None,
        };

        events.push(Event::Message {
            line,
            record,
            command,
        });
        events.extend(exec_for_me);
    }

    fn summary(&self) -> ReaderSummary {
        ReaderSummary {
            cursor: self.tail.cursor(),
            records: self.records,
            skipped: self.skipped,
        }
    }

    /// Start polling on a dedicated thread, delivering events over `events`.
    pub fn spawn(self, events: Sender<Event>) -> Result<ReaderHandle> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("parley-reader-{}", self.user))
            .spawn(move || self.run(events, stop_rx))?;
        Ok(ReaderHandle { stop_tx, thread })
    }

    fn run(mut self, events: Sender<Event>, stop: Receiver<()>) -> ReaderSummary {
        info!(user = %self.user, cursor = self.cursor(), "reader started");
        loop {
            for event in self.poll_once() {
                if events.send(event).is_err() {
                    debug!("event receiver dropped; stopping reader");
                    return self.summary();
                }
            }
            // The interval wait doubles as the cancellation point.
            match stop.recv_timeout(self.poll_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        let summary = self.summary();
        info!(
            user = %self.user,
            cursor = summary.cursor,
            records = summary.records,
            "reader stopped"
        );
        summary
    }
}

/// A running reader.
#[derive(Debug)]
pub struct ReaderHandle {
    stop_tx: Sender<()>,
    thread: JoinHandle<ReaderSummary>,
}

impl ReaderHandle {
    /// Stop the loop and wait for it. The iteration in flight finishes first;
    /// nothing is sent on the event channel after this returns.
    pub fn stop(self) -> ReaderSummary {
        let _ = self.stop_tx.send(());
        match self.thread.join() {
            Ok(summary) => summary,
            Err(_) => {
                warn!("reader thread panicked");
                ReaderSummary::default()
            }
        }
    }
}
