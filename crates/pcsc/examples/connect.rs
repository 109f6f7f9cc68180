//! Example showing a connection to the first card and a few raw APDUs
//!
//! Waits up to ten seconds for a card if none is inserted. Pulling the card
//! out while the example runs makes the next transmit report a cancellation.

use std::thread::sleep;
use std::time::Duration;

use cardgate_pcsc::{ConnectStrategy, PcscConfig, PcscDeviceManager};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manager = PcscDeviceManager::new()?;
    let config = PcscConfig::default().with_insert_timeout(Duration::from_secs(10));

    let mut connection = match manager.connect(ConnectStrategy::FirstAvailable, config) {
        Ok(connection) => connection,
        Err(e) => {
            println!("Could not connect: {} ({})", e, e.status_name());
            return Ok(());
        }
    };

    println!("Reader:   {}", connection.reader_name());
    println!("ATR:      {}", hex::encode_upper(connection.atr()));
    println!("Protocol: {}", connection.protocol_name());

    let commands = [
        // SELECT MF
        ("SELECT MF", "00A4000C"),
        // SELECT EF.DIR
        ("SELECT EF.DIR", "00A4020C022F00"),
        // GET CHALLENGE
        ("GET CHALLENGE", "0084000008"),
    ];

    for (name, apdu) in &commands {
        let bytes = hex::decode(apdu)?;
        println!("\nSending {}: {}", name, apdu);

        match connection.transmit(&bytes) {
            Ok(response) => println!("Response: {}", hex::encode_upper(&response)),
            Err(e) => println!("Command failed: {}", e.status_name()),
        }

        sleep(Duration::from_millis(50));
    }

    connection.close();
    println!("\nConnection test completed.");
    Ok(())
}
