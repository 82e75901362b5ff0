// MIT License - Copyright (c) 2026 Peter Wright
// External surfaces over a device fleet

pub mod http;
pub mod mqtt;

use tracing::{debug, error};

use crate::error::AirconError;
use crate::store::{CommandOutcome, CommandTicket};

/// Log how a bridge-issued command ends, without blocking the caller.
pub(crate) fn report_outcome(device_id: &str, source: &'static str, ticket: CommandTicket) {
    let device_id = device_id.to_string();
    tokio::spawn(async move {
        let name = ticket.name().to_string();
        match ticket.confirmed().await {
            Ok(CommandOutcome::Succeeded) => {
                debug!("[{}] {} command {} confirmed", device_id, source, name)
            }
            Ok(_) => {}
            Err(e @ AirconError::CommandTimeout { .. }) => {
                error!("[{}] {} command failed: {}", device_id, source, e)
            }
            // Device shut down first
            Err(_) => {}
        }
    });
}
