//! Common test utilities

#![allow(dead_code, unreachable_pub)]

use nexum_pcsc::{ClientConfig, PcscService};
use std::time::Duration;

/// Try to get a real PC/SC service for tests
pub fn get_pcsc_service() -> Option<PcscService> {
    PcscService::with_config(test_config()).ok()
}

/// Try to get the name of a real reader for tests
pub fn get_reader_name() -> Option<String> {
    let service = get_pcsc_service()?;
    service.list_readers().ok()?.into_iter().next()
}

/// Configuration with a short monitor timeout so tests stop quickly
pub fn test_config() -> ClientConfig {
    ClientConfig::new().with_monitor_timeout(Some(Duration::from_millis(200)))
}
