// Live sensor capture example
//
// Connects to a device, collects readings in the background for a while and
// prints periodic snapshots of the accumulated buffer.

use clap::Parser;
use sensorlink_rs::{AcquisitionSession, DeviceFamily, SessionState};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "live_capture")]
#[command(version = "1.0")]
#[command(about = "Collect sensor readings from a serial-attached device")]
struct Args {
    /// Port to open directly instead of running discovery
    #[arg(short, long, help = "Port name, e.g. COM3 or /dev/ttyACM0")]
    port: Option<String>,

    /// Connect through a Bluetooth-to-serial bridge instead of direct USB
    #[arg(short, long, help = "Use the Bluetooth bridge family (9600 baud)")]
    bluetooth: bool,

    /// How long to collect, in seconds
    #[arg(short, long, default_value_t = 10)]
    seconds: u64,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let family = if args.bluetooth {
        DeviceFamily::BluetoothBridge
    } else {
        DeviceFamily::UsbMicrocontroller
    };

    println!("SensorLink Live Capture");
    println!("=======================");
    println!("Family: {family}");

    let mut session = AcquisitionSession::open(family, args.port.as_deref())?;
    println!("Connected, collecting for {} second(s)...\n", args.seconds);

    session.start();

    for elapsed in 1..=args.seconds {
        std::thread::sleep(Duration::from_secs(1));

        let readings = session.snapshot();
        match readings.last() {
            Some(latest) => println!(
                "t+{elapsed}s: {} reading(s), latest value {}",
                readings.len(),
                latest.value
            ),
            None => println!("t+{elapsed}s: no readings yet"),
        }

        if session.state() == SessionState::Failed {
            println!("Device stopped responding, giving up.");
            break;
        }
    }

    session.stop();
    let exit = session.join();
    println!("\nAcquisition ended: {exit:?}");
    println!("Total readings collected: {}", session.snapshot().len());

    Ok(())
}
