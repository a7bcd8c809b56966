//! Cursor command implementation.

use super::OutputFormat;
use serde::Serialize;
use treesync_protocol::{CursorCodec, CursorPosition};

/// Decoded cursor.
#[derive(Debug, Serialize)]
pub struct CursorReport {
    /// Cursor format version.
    pub version: u8,
    /// Log the cursor belongs to, as hex.
    pub log_id: String,
    /// Next position to read.
    pub position: u64,
    /// Truncation epoch when issued.
    pub epoch: u64,
    /// Whether the issuing scan stopped before the log head.
    pub partial: bool,
}

impl From<CursorPosition> for CursorReport {
    fn from(cursor: CursorPosition) -> Self {
        Self {
            version: treesync_protocol::CURSOR_VERSION,
            log_id: format!("{:016x}", cursor.log_id),
            position: cursor.position,
            epoch: cursor.epoch,
            partial: cursor.is_partial(),
        }
    }
}

/// Decodes `token` without contacting any server.
pub fn inspect(token: &str) -> Result<CursorReport, Box<dyn std::error::Error>> {
    Ok(CursorCodec::decode(token)?.into())
}

/// Runs the cursor command.
pub fn run(token: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let format = OutputFormat::parse(format)?;
    let report = inspect(token)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Cursor v{}", report.version);
            println!("  Log ID:   {}", report.log_id);
            println!("  Position: {}", report.position);
            println!("  Epoch:    {}", report.epoch);
            println!("  Partial:  {}", if report.partial { "yes" } else { "no" });
        }
    }

    Ok(())
}
