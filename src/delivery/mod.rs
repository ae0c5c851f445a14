//! Delivery gate: hand the saved message back to the transport.

pub mod transport;

use tracing::info;

use crate::error::Result;
use crate::workspace::Workspace;

pub use transport::{SendmailTransport, Transport};

/// Re-inject the message saved in `workspace` with its saved arguments.
///
/// Reads both back from disk, so delivery sees exactly what the MTA handed
/// over. A failure to read them is permanent; a transport failure is not.
pub fn deliver(workspace: &Workspace, transport: &dyn Transport) -> Result<()> {
    let args = workspace.load_args()?;
    let content = workspace.load_content()?;
    transport.deliver(&args, &content)?;
    info!(arg_count = args.len(), size = content.len(), "Message re-injected");
    Ok(())
}
