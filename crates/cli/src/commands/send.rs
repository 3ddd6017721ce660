//! `send`: transmit one APDU

use nexum_pcsc::{CardMode, Client, Disposition};
use std::error::Error;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::utils;

/// Wait up to `timeout` for a usable card, send `apdu` and print the response.
pub(crate) async fn send_command(
    client: &Client,
    filter: Option<String>,
    apdu: &str,
    timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    let command = utils::parse_apdu(apdu)?;

    let wanted = filter.clone();
    let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
    let readers = client.on_reader(move |reader| {
        if !utils::selected(&reader, filter.as_deref()) {
            return;
        }
        let ready = ready_tx.clone();
        let target = reader.clone();
        let _ = reader.on_change(move |status, _atr| {
            if utils::card_ready(status) {
                let _ = ready.send(target.clone());
            }
        });
    });

    client.start()?;
    let reader = tokio::time::timeout(timeout, ready_rx.recv()).await;
    readers.unsubscribe();

    let reader = match reader {
        Ok(Some(reader)) => reader,
        _ => {
            let attached = client.readers();
            client.stop()?;
            utils::ensure_attached(&attached, wanted.as_deref())?;
            return Err("No card found in any reader!".into());
        }
    };
    info!("Using reader: {}", reader);

    let card = reader.connect(CardMode::Shared).await?;
    debug!(protocol = %card.protocol()?, "card connected");

    let response = card.transmit(&command).await;
    card.disconnect(Disposition::Leave).await?;
    client.stop()?;

    println!("{}", hex::encode_upper(&response?));
    Ok(())
}
