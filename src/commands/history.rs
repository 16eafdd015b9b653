use crate::error::Result;
use crate::output::{self, Format};
use crate::session::Session;

/// Print the last `limit` well-formed records of the shared log.
pub fn run(session: &Session, limit: Option<usize>, format: Format) -> Result<()> {
    let records = session.log().read_records(limit)?;
    output::print_records(&records, format)
}

/// Print the files currently in the local participant's transfer directory.
pub fn files(session: &Session, format: Format) -> Result<()> {
    let names: Vec<String> = session
        .transfers()
        .list(session.user())?
        .into_iter()
        .collect();
    output::print_files(&names, format)
}
