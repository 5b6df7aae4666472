pub mod commands;
pub mod engine;
pub mod ips;
pub mod status;
pub mod template;

use std::{fmt::Display, io, str::FromStr, time::Duration};
use thiserror::Error;

pub use commands::{Command, CommandTable, Parameter};
pub use engine::Engine;
pub use ips::{Control, Full, Heater, Ips, Legacy, Profile, ReadOnly};
pub use status::{Activity, CommsMode, ControlMode, Status, Version};
pub use template::Value;

/// Per-byte read timeout configured on the serial port.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Ceiling for acquiring exclusive access to the port.
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(20);

/// Byte stream to the power supply. Serial ports and the simulator both qualify.
pub trait Port: io::Read + io::Write + Send {
    /// Throw away whatever the supply sent that has not been read yet.
    fn clear_input(&mut self) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfileKind {
    Full,
    ReadOnly,
    Legacy,
}

impl ProfileKind {
    pub const ALL: &'static [ProfileKind] =
        &[ProfileKind::Full, ProfileKind::ReadOnly, ProfileKind::Legacy];
}

impl Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileKind::Full => "full".fmt(f),
            ProfileKind::ReadOnly => "readonly".fmt(f),
            ProfileKind::Legacy => "legacy".fmt(f),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("invalid profile '{0}'")]
    BadProfile(String),
}

impl FromStr for ProfileKind {
    type Err = ProfileError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "full" => Ok(ProfileKind::Full),
            "readonly" => Ok(ProfileKind::ReadOnly),
            "legacy" => Ok(ProfileKind::Legacy),
            _ => Err(ProfileError::BadProfile(input.to_string())),
        }
    }
}

/// Line terminator. CR is the power-on default; CR+LF persists until the
/// supply is power cycled, so callers must re-assert it after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Cr,
    CrLf,
}

impl Terminator {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Terminator::Cr => b"\r",
            Terminator::CrLf => b"\r\n",
        }
    }
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Cr
    }
}

/// Pacing of one exchange.
///
/// There is no separate pause after a reply is read: the next command always
/// starts with `settle`, so the supply gets the same quiet time after its own
/// transmission as after ours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause before and after every transmission.
    pub settle: Duration,
    /// Deadline for a complete reply line.
    pub reply_timeout: Duration,
}

impl Timing {
    /// No settling and a short reply deadline, for in-memory peers.
    pub const fn immediate() -> Self {
        Self {
            settle: Duration::ZERO,
            reply_timeout: Duration::from_millis(20),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            reply_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("transport failure")]
    Io(#[from] io::Error),
    #[error("no reply to {command} within {timeout:?}")]
    Timeout {
        command: &'static str,
        timeout: Duration,
    },
    #[error("port closed while waiting for reply to {command}")]
    Disconnected { command: &'static str },
    #[error("device rejected {command}: {reply:?}")]
    Rejected { command: &'static str, reply: String },
    #[error("unexpected reply to {command} at byte {offset}: {raw:?}")]
    Mismatch {
        command: &'static str,
        raw: String,
        offset: usize,
    },
    #[error("reply to {0} does not decode")]
    Shape(&'static str),
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("{0} requires a value")]
    MissingArgument(&'static str),
    #[error("{0} takes no value")]
    UnexpectedArgument(&'static str),
    #[error("invalid value {value} for {command}")]
    InvalidArgument { command: &'static str, value: f64 },
    #[error("precondition {precondition} of {command} failed")]
    Precondition {
        command: &'static str,
        precondition: &'static str,
        #[source]
        source: Box<ProtocolError>,
    },
    #[error("precondition cycle through {0}")]
    DependencyCycle(&'static str),
}

impl ProtocolError {
    /// True when the device answered with `?`, as opposed to a garbled or missing reply.
    pub fn is_rejection(&self) -> bool {
        match self {
            ProtocolError::Rejected { .. } => true,
            ProtocolError::Precondition { source, .. } => source.is_rejection(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_names_round_trip() {
        for profile in ProfileKind::ALL {
            assert_eq!(profile.to_string().parse::<ProfileKind>().unwrap(), *profile);
        }
        assert!("commissioning".parse::<ProfileKind>().is_err());
    }

    #[test]
    fn rejection_is_seen_through_preconditions() {
        let err = ProtocolError::Precondition {
            command: "setSetpointCurrent",
            precondition: "setRemoteUnlocked",
            source: Box::new(ProtocolError::Rejected {
                command: "setRemoteUnlocked",
                reply: "?C3".to_string(),
            }),
        };
        assert!(err.is_rejection());
        assert!(!ProtocolError::UnknownCommand("x".into()).is_rejection());
    }
}
