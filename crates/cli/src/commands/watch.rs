//! `watch`: follow reader events and probe inserted cards

use nexum_pcsc::{CardMode, Client, ControlCode, Disposition, PcscError, Reader};
use std::error::Error;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::utils;

/// Log every reader event until Ctrl-C. Each usable card is connected, its
/// state logged and the reader's feature list requested.
///
/// A monitor error restarts the client.
pub(crate) async fn watch_command(
    client: &Client,
    filter: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let runtime = Handle::current();

    let readers = client.on_reader(move |reader| {
        if !utils::selected(&reader, filter.as_deref()) {
            return;
        }
        info!(reader = %reader, "reader attached");

        let runtime = runtime.clone();
        let target = reader.clone();
        let _ = reader.on_change(move |status, atr| {
            info!(
                reader = %target,
                %status,
                atr = %hex::encode_upper(&atr),
                "reader changed"
            );
            if utils::card_ready(status) {
                let reader = target.clone();
                runtime.spawn(async move {
                    if let Err(e) = probe(&reader).await {
                        warn!(reader = %reader, code = %e.code(), error = %e, "card probe failed");
                    }
                });
            }
        });

        let name = reader.to_string();
        let _ = reader.on_disconnect(move || info!(reader = %name, "reader detached"));
    });

    let restart = client.clone();
    let errors = client.on_error(move |e| {
        error!(code = %e.code(), error = %e, "monitor error, restarting");
        if let Err(e) = restart.stop().and_then(|()| restart.start()) {
            error!(error = %e, "failed to restart monitor");
        }
    });

    client.start()?;
    info!("watching readers, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    client.stop()?;
    readers.unsubscribe();
    errors.unsubscribe();
    Ok(())
}

async fn probe(reader: &Reader) -> Result<(), PcscError> {
    let card = reader.connect(CardMode::Shared).await?;
    info!("{}", card.state().await?);

    match card.control(ControlCode::feature_request(), &[]).await {
        Ok(features) => info!(
            reader = %reader,
            features = %hex::encode_upper(&features),
            "reader features"
        ),
        Err(e) => warn!(reader = %reader, error = %e, "feature request failed"),
    }

    card.disconnect(Disposition::Reset).await
}
