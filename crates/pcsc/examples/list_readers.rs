//! Example showing how to enumerate connected card readers

use cardgate_pcsc::PcscDeviceManager;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let manager = PcscDeviceManager::new()?;
    let readers = manager.list_readers()?;

    println!("Found {} readers:", readers.len());

    for (i, reader) in readers.iter().enumerate() {
        println!("{}. Reader: {}", i + 1, reader.name());

        match reader.atr() {
            Some(atr) => println!("   Card present, ATR: {}", hex::encode_upper(atr)),
            None if reader.has_card() => println!("   Card present, ATR: Unknown"),
            None => println!("   No card present"),
        }
    }

    Ok(())
}
