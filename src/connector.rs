use serialport::SerialPortType;
use std::time::Duration;

use crate::sensor_link::{LinkError, SensorLink};

/// Default bounded read timeout for newly opened links.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Immutable snapshot of one enumerated serial endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDescriptor {
    /// Host path or name of the endpoint, e.g. `COM3` or `/dev/ttyACM0`.
    pub device: String,
    /// Free-text description of the endpoint, empty when the host has none.
    pub description: String,
    /// Hardware identifier string, `VID:PID` form where available.
    pub hardware_id: String,
}

impl PortDescriptor {
    pub fn new(device: String, description: String, hardware_id: String) -> Self {
        Self {
            device,
            description,
            hardware_id,
        }
    }

    fn from_port_info(info: &serialport::SerialPortInfo) -> Self {
        let (description, hardware_id) = match &info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut hardware_id = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial) = &usb.serial_number {
                    hardware_id.push_str(&format!(" SER={serial}"));
                }
                (usb.product.clone().unwrap_or_default(), hardware_id)
            }
            SerialPortType::BluetoothPort => {
                ("Bluetooth serial port".to_string(), "BLUETOOTH".to_string())
            }
            SerialPortType::PciPort => ("PCI serial port".to_string(), "PCI".to_string()),
            SerialPortType::Unknown => (String::new(), String::new()),
        };

        Self {
            device: info.port_name.clone(),
            description,
            hardware_id,
        }
    }
}

/// Matching rule used to auto-identify the right endpoint among several.
///
/// Both variants match case-insensitively; a descriptor matches when any of
/// the listed patterns occurs as a substring of the relevant field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelector {
    /// Match against the hardware identifier, e.g. `0D28:0204`.
    HardwareId(Vec<String>),
    /// Match against the free-text description, e.g. `HC-05`.
    Description(Vec<String>),
}

impl TargetSelector {
    pub fn matches(&self, descriptor: &PortDescriptor) -> bool {
        match self {
            Self::HardwareId(patterns) => {
                let hardware_id = descriptor.hardware_id.to_uppercase();
                patterns
                    .iter()
                    .any(|p| hardware_id.contains(&p.to_uppercase()))
            }
            Self::Description(patterns) => {
                let description = descriptor.description.to_uppercase();
                patterns
                    .iter()
                    .any(|p| description.contains(&p.to_uppercase()))
            }
        }
    }
}

/// Known device families and their fixed link parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// Microcontroller board with an on-board USB debug chip (DAPLink).
    UsbMicrocontroller,
    /// HC-05 style Bluetooth-to-serial bridge, paired as a host COM port.
    BluetoothBridge,
    /// Generic USB-to-serial adapter cable.
    UsbSerialAdapter,
}

impl DeviceFamily {
    /// The selector that auto-identifies endpoints of this family.
    pub fn selector(&self) -> TargetSelector {
        match self {
            Self::UsbMicrocontroller => TargetSelector::HardwareId(vec!["0D28:0204".to_string()]),
            Self::BluetoothBridge => TargetSelector::Description(vec![
                "HC-05".to_string(),
                "BLUETOOTH".to_string(),
            ]),
            Self::UsbSerialAdapter => {
                TargetSelector::Description(vec!["USB SERIAL".to_string()])
            }
        }
    }

    /// Fixed baud rate of the family. Bluetooth bridges ship at 9600.
    pub fn baud_rate(&self) -> u32 {
        match self {
            Self::UsbMicrocontroller | Self::UsbSerialAdapter => 115_200,
            Self::BluetoothBridge => 9600,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::UsbMicrocontroller => "USB microcontroller",
            Self::BluetoothBridge => "Bluetooth bridge",
            Self::UsbSerialAdapter => "USB serial adapter",
        }
    }
}

impl std::fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    #[error("Sensor link error: {0}")]
    Link(#[from] LinkError),

    #[error("Failed to enumerate serial ports: {0}")]
    Enumerate(#[from] serialport::Error),

    #[error("No {family} found. Please connect a device or specify the port manually")]
    DeviceNotFound { family: DeviceFamily },
}

/// Return the first descriptor the selector accepts, or `None`.
///
/// Pure function over the supplied list; ties break in list order, so the
/// result is deterministic for a fixed enumeration.
pub fn find_port<'a>(
    descriptors: &'a [PortDescriptor],
    selector: &TargetSelector,
) -> Option<&'a PortDescriptor> {
    descriptors.iter().find(|d| selector.matches(d))
}

pub struct SensorConnector;

impl SensorConnector {
    /// Enumerate the serial endpoints currently visible on the host.
    pub fn available_ports() -> Result<Vec<PortDescriptor>, ConnectorError> {
        let ports = serialport::available_ports()?;
        Ok(ports.iter().map(PortDescriptor::from_port_info).collect())
    }

    /// Open a link to a device of the given family.
    ///
    /// With `port` supplied the named endpoint is opened directly at the
    /// family's baud rate, bypassing discovery. Without it, enumeration runs
    /// and the first endpoint matching the family's selector is opened.
    pub fn connect(
        family: DeviceFamily,
        port: Option<&str>,
    ) -> Result<SensorLink, ConnectorError> {
        let port_name = match port {
            Some(port) => {
                log::debug!("Connecting to {family} on manually chosen port {port}");
                port.to_string()
            }
            None => Self::discover(family)?,
        };

        let link = SensorLink::open(&port_name, family.baud_rate(), DEFAULT_READ_TIMEOUT)?;
        Ok(link)
    }

    /// Find the endpoint for a device of the given family.
    pub fn discover(family: DeviceFamily) -> Result<String, ConnectorError> {
        log::debug!("Searching for a {family}");

        let descriptors = Self::available_ports()?;
        find_port(&descriptors, &family.selector())
            .map(|descriptor| {
                log::debug!(
                    "Matched {} ({}) for {family}",
                    descriptor.device,
                    descriptor.description
                );
                descriptor.device.clone()
            })
            .ok_or(ConnectorError::DeviceNotFound { family })
    }
}
