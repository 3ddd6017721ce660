//! Example showing how to enumerate connected card readers

use nexum_pcsc::{Client, ClientConfig, ReaderStatus};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::with_config(ClientConfig::new())?;

    // Every reader attached at start is published right away
    let _readers = client.on_reader(|reader| {
        let name = reader.name().to_string();
        let _ = reader.on_change(move |status, atr| {
            if status.has(&[ReaderStatus::Present]) {
                println!("{name}: card present, ATR: {}", hex::encode_upper(&atr));
            } else {
                println!("{name}: {status}");
            }
        });
    });

    client.start()?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    println!("Found {} readers", client.readers().len());
    client.stop()?;

    Ok(())
}
