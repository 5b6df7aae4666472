#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
use linux::{is_port_open, lock_exclusive};

pub use serialport::SerialPort;

use anyhow::{Context, Result};
use log::{debug, info};
use serialport::{self, ClearBuffer, DataBits, Parity, SerialPortType, StopBits};
use std::io;
use thiserror::Error;

use crate::protocol::{Port, LOCK_TIMEOUT, READ_TIMEOUT};

#[derive(Error, Debug)]
pub enum OpenPortError {
    #[error("no IPS compatible ports found")]
    NoCompatiblePort,
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
    #[error("{port_name:?} still locked after {timeout:?}")]
    LockTimeout {
        port_name: String,
        timeout: std::time::Duration,
    },
}

#[derive(PartialEq)]
struct UsbId(u16, u16);

static COMPATIBLE_IDS: &[UsbId] = &[
    UsbId(0x0403, 0x6001), // FTDI FT232R USB UART
    UsbId(0x067b, 0x2303), // Prolific PL2303 Serial Port
    UsbId(0x1a86, 0x7523), // QinHeng Electronics HL-340 USB-Serial adapter
];

/// Opens `port_name` (or the first known USB adapter for `auto`) at 8N2,
/// the IPS serial framing, and takes an exclusive lock on it.
pub fn open_port(port_name: &str, baudrate: u32, force: bool) -> Result<Box<dyn SerialPort>> {
    let true_name: String = if port_name == "auto" {
        guess_port()?
    } else {
        port_name.to_string()
    };

    if !force && is_port_open(&true_name) {
        return Err(OpenPortError::PortBusy {
            port_name: true_name,
        }
        .into());
    }

    let port = serialport::new(&true_name, baudrate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::Two)
        .timeout(READ_TIMEOUT)
        .open_native()
        .with_context(|| format!("Failed to open {}", true_name))?;

    lock_exclusive(&port, &true_name, LOCK_TIMEOUT)?;

    info!("opened {} @ {} baud", &true_name, baudrate);
    Ok(Box::new(port))
}

impl Port for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(self.clear(ClearBuffer::Input)?)
    }
}

fn guess_port() -> Result<String> {
    let name = serialport::available_ports()?
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                COMPATIBLE_IDS.contains(&UsbId(usb_info.vid, usb_info.pid))
            }
            SerialPortType::Unknown | SerialPortType::PciPort | SerialPortType::BluetoothPort => {
                false
            }
        })
        .map(|info| info.port_name)
        .next()
        .ok_or(OpenPortError::NoCompatiblePort)?;
    debug!("guessed port {}", name);
    Ok(name)
}

#[cfg(not(target_os = "linux"))]
fn is_port_open(_port_name: &str) -> bool {
    false
}

#[cfg(not(target_os = "linux"))]
fn lock_exclusive<T>(_port: &T, _port_name: &str, _timeout: std::time::Duration) -> Result<()> {
    Ok(())
}
