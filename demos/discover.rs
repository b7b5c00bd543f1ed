// Basic device discovery example
//
// This example lists every serial endpoint the host can see and shows which
// device family, if any, each one matches.

use sensorlink_rs::{find_port, DeviceFamily, SensorConnector};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (optional)
    env_logger::init();

    println!("SensorLink Device Discovery Example");
    println!("===================================\n");

    println!("1. Enumerating serial endpoints...");
    let descriptors = SensorConnector::available_ports()?;

    if descriptors.is_empty() {
        println!("No serial endpoints found. Please connect a device and try again.");
        return Ok(());
    }

    println!("Found {} endpoint(s):", descriptors.len());
    for (i, descriptor) in descriptors.iter().enumerate() {
        println!(
            "  {}. {} - {} [{}]",
            i + 1,
            descriptor.device,
            descriptor.description,
            descriptor.hardware_id
        );
    }
    println!();

    println!("2. Matching device families...");
    let families = [
        DeviceFamily::UsbMicrocontroller,
        DeviceFamily::BluetoothBridge,
        DeviceFamily::UsbSerialAdapter,
    ];
    for family in families {
        match find_port(&descriptors, &family.selector()) {
            Some(descriptor) => println!(
                "  {} -> {} ({} baud)",
                family,
                descriptor.device,
                family.baud_rate()
            ),
            None => println!("  {} -> no match", family),
        }
    }

    Ok(())
}
