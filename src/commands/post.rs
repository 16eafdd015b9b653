use std::path::Path;

use crate::error::Result;
use crate::output::{self, Format};
use crate::session::Session;

pub fn say(session: &Session, text: &str, format: Format) -> Result<()> {
    let record = session.append_message(text)?;
    output::print_record(&record, format)
}

pub fn exec(session: &Session, dest_user: &str, command: &str, format: Format) -> Result<()> {
    let record = session.append_exec_command(dest_user, command)?;
    output::print_record(&record, format)
}

pub fn send(session: &Session, path: &Path, dest_user: &str, format: Format) -> Result<()> {
    let transfer = session.send_file(path, dest_user)?;
    output::print_transfer(&transfer, format)
}
