//! `list`: print the attached readers

use nexum_pcsc::{Client, ReaderStatusFlags};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::utils;

/// Monitor for `settle`, then print every reader seen with its last status.
pub(crate) async fn list_command(
    client: &Client,
    filter: Option<&str>,
    settle: Duration,
) -> Result<(), Box<dyn Error>> {
    let statuses: Arc<Mutex<HashMap<String, ReaderStatusFlags>>> = Arc::default();

    let sink = Arc::clone(&statuses);
    let readers = client.on_reader(move |reader| {
        let name = reader.name().to_string();
        let sink = Arc::clone(&sink);
        let _ = reader.on_change(move |status, _atr| {
            sink.lock().insert(name.clone(), status);
        });
    });

    client.start()?;
    tokio::time::sleep(settle).await;

    let attached: Vec<_> = client
        .readers()
        .into_iter()
        .filter(|reader| utils::selected(reader, filter))
        .collect();
    client.stop()?;
    readers.unsubscribe();
    utils::ensure_attached(&attached, filter)?;

    if attached.is_empty() {
        println!("No readers found!");
        return Ok(());
    }

    let statuses = statuses.lock();
    println!("Available readers:");
    for (i, reader) in attached.iter().enumerate() {
        let status = statuses
            .get(reader.name())
            .map_or_else(|| "unknown".to_string(), |status| utils::describe(*status));
        println!("{}. {} ({})", i + 1, reader, status);
    }
    debug!(readers = attached.len(), "listed readers");

    Ok(())
}
