//! Decoded replies: the packed status line and the identity string.

use lazy_static::lazy_static;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use regex::Regex;
use std::fmt::Display;

use super::Value;

/// System fault digit, first column after `X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Fault {
    Normal = 0,
    Quenched = 1,
    OverHeated = 2,
    WarmingUp = 4,
    Fault = 8,
}

/// Limit digit, second column after `X`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Limit {
    Normal = 0,
    PositiveVoltage = 1,
    NegativeVoltage = 2,
    NegativeCurrent = 4,
    PositiveCurrent = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Activity {
    Hold = 0,
    ToSetpoint = 1,
    ToZero = 2,
    Clamped = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum ControlMode {
    LocalLocked = 0,
    RemoteLocked = 1,
    LocalUnlocked = 2,
    RemoteUnlocked = 3,
    /// Reported only; the supply enters it by itself after a quench.
    AutoRunDown = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum HeaterState {
    OffAtZero = 0,
    On = 1,
    OffAtField = 2,
    Fault = 5,
    NoSwitch = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum SweepMode {
    AmpsFast = 0,
    TeslaFast = 1,
    AmpsSlow = 4,
    TeslaSlow = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Sweep {
    AtRest = 0,
    Sweeping = 1,
    Limiting = 2,
    SweepingLimiting = 3,
}

/// Argument of the `Q` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommsMode {
    Normal = 0,
    NormalLf = 2,
    Extended = 4,
    ExtendedLf = 6,
}

impl CommsMode {
    pub fn terminator(&self) -> super::Terminator {
        match self {
            CommsMode::Normal | CommsMode::Extended => super::Terminator::Cr,
            CommsMode::NormalLf | CommsMode::ExtendedLf => super::Terminator::CrLf,
        }
    }
}

macro_rules! labels {
    ($ty:ident { $($variant:ident => $text:expr),* $(,)? }) => {
        impl Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $($ty::$variant => $text.fmt(f),)*
                }
            }
        }
    };
}

labels!(Fault {
    Normal => "Normal",
    Quenched => "Quenched",
    OverHeated => "Over Heated",
    WarmingUp => "Warming Up",
    Fault => "Fault",
});
labels!(Limit {
    Normal => "Normal",
    PositiveVoltage => "On Positive Voltage Limit",
    NegativeVoltage => "On Negative Voltage Limit",
    NegativeCurrent => "Outside Negative Current Limit",
    PositiveCurrent => "Outside Positive Current Limit",
});
labels!(Activity {
    Hold => "Hold",
    ToSetpoint => "To Setpoint",
    ToZero => "To Zero",
    Clamped => "Clamped",
});
labels!(ControlMode {
    LocalLocked => "Local & Locked",
    RemoteLocked => "Remote & Locked",
    LocalUnlocked => "Local & Unlocked",
    RemoteUnlocked => "Remote & Unlocked",
    AutoRunDown => "Auto-Run-Down",
});
labels!(HeaterState {
    OffAtZero => "Off Mag at 0",
    On => "On",
    OffAtField => "Off Mag at F",
    Fault => "Heater Fault",
    NoSwitch => "No Switch",
});
labels!(SweepMode {
    AmpsFast => "Amps Fast",
    TeslaFast => "Tesla Fast",
    AmpsSlow => "Amps Slow",
    TeslaSlow => "Tesla Slow",
});
labels!(Sweep {
    AtRest => "At Rest",
    Sweeping => "Sweeping",
    Limiting => "Sweep Limiting",
    SweepingLimiting => "Sweeping & Sweep Limiting",
});

/// The seven digits of an `X` reply. Raw codes are kept as sent; the
/// accessors decode them and return `None` for codes with no known meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub fault: u8,
    pub limit: u8,
    pub activity: u8,
    pub control: u8,
    pub heater: u8,
    pub mode: u8,
    pub sweep: u8,
}

impl Status {
    pub const FIELDS: [&'static str; 7] = [
        "fault", "limit", "activity", "control", "heater", "mode", "sweep",
    ];

    pub fn from_values(values: &[Value]) -> Option<Self> {
        let digits = values
            .iter()
            .map(|v| v.as_u32().and_then(|d| u8::try_from(d).ok()))
            .collect::<Option<Vec<u8>>>()?;
        match digits[..] {
            [fault, limit, activity, control, heater, mode, sweep] => Some(Status {
                fault,
                limit,
                activity,
                control,
                heater,
                mode,
                sweep,
            }),
            _ => None,
        }
    }

    pub fn raw(&self) -> [u8; 7] {
        [
            self.fault,
            self.limit,
            self.activity,
            self.control,
            self.heater,
            self.mode,
            self.sweep,
        ]
    }

    pub fn fault(&self) -> Option<Fault> {
        Fault::from_u8(self.fault)
    }

    pub fn limit(&self) -> Option<Limit> {
        Limit::from_u8(self.limit)
    }

    pub fn activity(&self) -> Option<Activity> {
        Activity::from_u8(self.activity)
    }

    pub fn control(&self) -> Option<ControlMode> {
        ControlMode::from_u8(self.control)
    }

    pub fn heater(&self) -> Option<HeaterState> {
        HeaterState::from_u8(self.heater)
    }

    pub fn mode(&self) -> Option<SweepMode> {
        SweepMode::from_u8(self.mode)
    }

    pub fn sweep(&self) -> Option<Sweep> {
        Sweep::from_u8(self.sweep)
    }

    /// Human readable meaning of each digit, in [`Status::FIELDS`] order.
    pub fn labels(&self) -> [String; 7] {
        fn label<T: Display>(value: Option<T>, raw: u8) -> String {
            value.map_or_else(|| format!("Unknown ({})", raw), |v| v.to_string())
        }
        [
            label(self.fault(), self.fault),
            label(self.limit(), self.limit),
            label(self.activity(), self.activity),
            label(self.control(), self.control),
            label(self.heater(), self.heater),
            label(self.mode(), self.mode),
            label(self.sweep(), self.sweep),
        ]
    }
}

/// Reply to `V`: model name followed by free firmware text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub model: String,
    pub firmware: String,
}

impl Version {
    pub fn from_values(values: &[Value]) -> Option<Self> {
        match values {
            [model, firmware] => Some(Version {
                model: model.as_str()?.to_string(),
                firmware: firmware.as_str()?.to_string(),
            }),
            _ => None,
        }
    }

    /// Firmware release number, e.g. `3.07` out of `Version 3.07  (c) OXFORD 1996`.
    pub fn release(&self) -> Option<&str> {
        lazy_static! {
            static ref RE: Regex = Regex::new(r"(?i)version\s+(\d+(?:\.\d+)*)").unwrap();
        }
        RE.captures(&self.firmware)
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str())
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.model, self.firmware)
    }
}
