use anyhow::Result;
use chrono::Local;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_epoch_secs() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}

/// Local run date as `dd-mm-yy`, the snapshot directory suffix.
pub fn run_stamp() -> String {
    Local::now().format("%d-%m-%y").to_string()
}
