//! `decode` subcommand: shows how a payload would be read.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::io::Read;
use std::path::Path;
use timer_protocol::decode_timer_state;

pub fn run(path: Option<&Path>) -> Result<(), String> {
    let bytes = match path {
        Some(path) => fs_err::read(path).map_err(|err| err.to_string())?,
        None => {
            let mut buffer = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buffer)
                .map_err(|err| format!("Failed to read stdin: {}", err))?;
            buffer
        }
    };
    println!("{}", report(&bytes, Utc::now()));
    Ok(())
}

pub fn report(bytes: &[u8], now: DateTime<Utc>) -> serde_json::Value {
    let decoded = decode_timer_state(bytes, now);
    json!({
        "generation": decoded.generation.as_str(),
        "error": decoded.error.as_ref().map(ToString::to_string),
        "diagnostics": decoded
            .diagnostics
            .iter()
            .map(|diagnostic| format!("{:?}", diagnostic))
            .collect::<Vec<_>>(),
        "state": decoded.state.to_wire(),
    })
}
