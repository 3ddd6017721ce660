//! Helpers shared by the subcommands

use colored::Colorize;
use nexum_pcsc::{PcscError, Reader, ReaderStatus, ReaderStatusFlags};
use std::error::Error;

/// `true` if `reader` passes the `--reader` filter.
pub(crate) fn selected(reader: &Reader, filter: Option<&str>) -> bool {
    filter.is_none_or(|name| reader.name() == name)
}

/// Fail if the `--reader` filter names none of the `attached` readers.
pub(crate) fn ensure_attached(attached: &[Reader], filter: Option<&str>) -> Result<(), PcscError> {
    match filter {
        Some(name) if !attached.iter().any(|reader| reader.name() == name) => {
            Err(PcscError::ReaderNotFound(name.to_string()))
        }
        _ => Ok(()),
    }
}

/// `true` if the reader holds a card nobody else is using and that answered
/// the reset.
pub(crate) fn card_ready(status: ReaderStatusFlags) -> bool {
    status.has(&[ReaderStatus::Present])
        && !status.has_any(&[ReaderStatus::Mute, ReaderStatus::InUse])
}

/// Short colored description of a reader status.
pub(crate) fn describe(status: ReaderStatusFlags) -> String {
    if status.has(&[ReaderStatus::Present]) {
        format!("card present, {status}").green().to_string()
    } else if status.has(&[ReaderStatus::Empty]) {
        "no card".yellow().to_string()
    } else {
        status.to_string().red().to_string()
    }
}

/// Parse a hex APDU, ignoring whitespace.
pub(crate) fn parse_apdu(input: &str) -> Result<Vec<u8>, Box<dyn Error>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let apdu = hex::decode(compact)?;
    if apdu.len() < 4 {
        return Err(format!("APDU too short: {} bytes", apdu.len()).into());
    }
    Ok(apdu)
}
