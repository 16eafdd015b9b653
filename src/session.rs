use std::path::Path;
use std::sync::mpsc::Sender;

use tracing::info;

use crate::config::Config;
use crate::consent::{ConsentEngine, ExecPolicy};
use crate::error::{ParleyError, Result};
use crate::grammar::Command;
use crate::model::{Record, Username};
use crate::reader::{Event, TailingReader};
use crate::store::log::SharedLog;
use crate::store::transfer::{TransferChannel, TransferRecord};

/// Everything one participant needs, built once at startup and passed to
/// each operation.
#[derive(Debug, Clone)]
pub struct Session {
    config: Config,
    user: Username,
    log: SharedLog,
    transfers: TransferChannel,
}

impl Session {
    pub fn open(config: Config, user: Username) -> Result<Self> {
        let log = SharedLog::open(&config.shared_log_path)?;
        let transfers = TransferChannel::open(&config.transfer_root);
        transfers.ensure_user_dir(&user)?;
        Ok(Self {
            config,
            user,
            log,
            transfers,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn user(&self) -> &Username {
        &self.user
    }

    pub fn log(&self) -> &SharedLog {
        &self.log
    }

    pub fn transfers(&self) -> &TransferChannel {
        &self.transfers
    }

    /// Announce arrival in the log.
    pub fn join(&self) -> Result<Record> {
        info!(user = %self.user, log = %self.log.path().display(), "joining");
        self.append(&Command::plain(format!("{} joined the chat", self.user)))
    }

    /// Announce departure in the log.
    pub fn leave(&self) -> Result<Record> {
        info!(user = %self.user, "leaving");
        self.append(&Command::plain(format!("{} left the chat", self.user)))
    }

    pub fn append_message(&self, text: &str) -> Result<Record> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ParleyError::InvalidMessage("message is empty".into()));
        }
        self.append(&Command::plain(text))
    }

    /// Ask `dest_user` to run `command`.
    pub fn append_exec_command(&self, dest_user: &str, command: &str) -> Result<Record> {
        let dest_user = Username::parse(dest_user)?;
        let command = command.trim();
        if command.is_empty() {
            return Err(ParleyError::InvalidMessage("command is empty".into()));
        }
        self.append(&Command::ExecRequest {
            dest_user: dest_user.to_string(),
            command: command.to_string(),
        })
    }

    /// Drop a file into `dest_user`'s directory and note it in the log.
    pub fn send_file(&self, path: &Path, dest_user: &str) -> Result<TransferRecord> {
        let dest_user = Username::parse(dest_user)?;
        let transfer = self.transfers.send(path, &dest_user)?;
        self.append(&Command::FileNotice {
            dest_user: transfer.dest_user.clone(),
            filename: transfer.filename.clone(),
        })?;
        Ok(transfer)
    }

    /// An idle reader positioned at the current end of the log.
    pub fn reader(&self) -> Result<TailingReader> {
        TailingReader::new(
            &self.log,
            self.transfers.clone(),
            self.user.clone(),
            self.config.poll_interval(),
        )
    }

    /// An idle reader that replays the whole log first.
    pub fn reader_from_start(&self) -> Result<TailingReader> {
        TailingReader::starting_at(
            &self.log,
            0,
            self.transfers.clone(),
            self.user.clone(),
            self.config.poll_interval(),
        )
    }

    pub fn consent_engine(
        &self,
        policy: Box<dyn ExecPolicy>,
        events: Sender<Event>,
    ) -> Result<ConsentEngine> {
        ConsentEngine::new(self.log.clone(), self.user.clone(), policy, events)
    }

    fn append(&self, command: &Command) -> Result<Record> {
        let record = Record::new(&self.user, command.to_body())?;
        self.log.append(&record)?;
        Ok(record)
    }
}
