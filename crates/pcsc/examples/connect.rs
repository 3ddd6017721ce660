//! Example showing basic connection to a smart card and sending commands

use nexum_pcsc::{CardMode, Client, Disposition, ReaderStatus};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client = Client::new()?;

    // Changes are delivered right after the reader itself, so subscribe from
    // inside the handler to not miss the first one.
    let (found, mut readers) = mpsc::unbounded_channel();
    let _readers = client.on_reader(move |reader| {
        let found = found.clone();
        let target = reader.clone();
        let _ = reader.on_change(move |status, _atr| {
            if status.has(&[ReaderStatus::Present]) {
                let _ = found.send(target.clone());
            }
        });
    });
    client.start()?;

    // Use the first reader that has a card
    let Ok(Some(reader)) = tokio::time::timeout(Duration::from_secs(5), readers.recv()).await
    else {
        println!("No reader with a card inserted found!");
        client.stop()?;
        return Ok(());
    };

    println!("Using reader: {reader}");
    let card = reader.connect(CardMode::Shared).await?;
    println!("{}", card.state().await?);

    // Define some common APDUs to try
    let commands = [
        // SELECT PSE (Payment System Environment)
        ("SELECT PSE", "00A404000E315041592E5359532E4444463031"),
        // SELECT PPSE (Proximity Payment System Environment)
        ("SELECT PPSE", "00A404000E325041592E5359532E4444463031"),
        // Get Data - Application Interchange Profile
        ("GET DATA - AIP", "80CA9F1700"),
    ];

    // Keep other processes out while the commands run
    let transaction = card.transaction().await?;
    for (name, hex) in &commands {
        let command = hex::decode(hex)?;
        println!("\nSending {}: {}", name, hex);

        match card.transmit(&command).await {
            Ok(response) if response.len() >= 2 => {
                let (data, status) = response.split_at(response.len() - 2);
                println!("  Status: {}", hex::encode_upper(status));
                if !data.is_empty() {
                    println!("  Data: {}", hex::encode_upper(data));
                }
            }
            Ok(response) => println!("Short response: {}", hex::encode_upper(&response)),
            Err(e) => println!("Command failed: {e}"),
        }
    }
    transaction.end(Disposition::Leave).await?;

    // Reset the card before exiting to put it in a clean state
    card.disconnect(Disposition::Reset).await?;
    client.stop()?;

    println!("\nConnection test completed.");
    Ok(())
}
