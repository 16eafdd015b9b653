use std::sync::mpsc;

use crate::error::Result;
use crate::output::{self, Format};
use crate::session::Session;

/// Follow the shared log and the local transfer directory, printing events.
///
/// Exec requests are displayed but never acted on here; use `chat` to answer
/// them. With `once`, a single poll is made and the command returns.
pub fn run(session: &Session, from_start: bool, once: bool, format: Format) -> Result<()> {
    let mut reader = if from_start {
        session.reader_from_start()?
    } else {
        session.reader()?
    };

    if once {
        for event in reader.poll_once() {
            output::print_event(&event, format)?;
        }
        return Ok(());
    }

    let (tx, rx) = mpsc::channel();
    let handle = reader.spawn(tx)?;
    for event in rx {
        output::print_event(&event, format)?;
    }
    handle.stop();
    Ok(())
}
