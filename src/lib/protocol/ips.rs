//! Typed access to one supply.
//!
//! The profile is a type parameter, so operations a profile does not have are
//! not methods at all. Writing through a read-only handle does not compile:
//!
//! ```compile_fail
//! use ips_utils::protocol::{Ips, ReadOnly};
//! use ips_utils::sim::SimulatedIps;
//!
//! let mut device = SimulatedIps::default();
//! let mut ips = Ips::<ReadOnly>::new(&mut device);
//! ips.set_target_current(1.0).unwrap();
//! ```
//!
//! and neither does driving the switch heater on a legacy supply:
//!
//! ```compile_fail
//! use ips_utils::protocol::{Ips, Legacy};
//! use ips_utils::sim::SimulatedIps;
//!
//! let mut device = SimulatedIps::default();
//! let mut ips = Ips::<Legacy>::new(&mut device);
//! ips.set_heater(true).unwrap();
//! ```
//!
//! The same calls on a full handle are fine:
//!
//! ```
//! use ips_utils::protocol::{Full, Ips, Parameter, Timing};
//! use ips_utils::sim::SimulatedIps;
//!
//! let mut device = SimulatedIps::default();
//! let mut ips = Ips::<Full>::new(&mut device).with_timing(Timing::immediate());
//! ips.set_target_current(1.0).unwrap();
//! ips.set_heater(true).unwrap();
//! assert_eq!(ips.read(Parameter::SetpointCurrent).unwrap(), 1.0);
//! ```

use num_traits::ToPrimitive;
use std::marker::PhantomData;

use super::commands::Parameter;
use super::engine::Engine;
use super::status::{Activity, CommsMode, ControlMode, Status, SweepMode, Version};
use super::template::Value;
use super::{Port, ProfileKind, ProtocolError, Terminator, Timing};

pub trait Profile {
    const KIND: ProfileKind;
}

/// Profiles that may change the state of the supply.
pub trait Control: Profile {}

/// Profiles that may drive the persistent switch heater.
pub trait Heater: Control {}

#[derive(Debug)]
pub struct Full;

#[derive(Debug)]
pub struct ReadOnly;

#[derive(Debug)]
pub struct Legacy;

impl Profile for Full {
    const KIND: ProfileKind = ProfileKind::Full;
}
impl Control for Full {}
impl Heater for Full {}

impl Profile for ReadOnly {
    const KIND: ProfileKind = ProfileKind::ReadOnly;
}

impl Profile for Legacy {
    const KIND: ProfileKind = ProfileKind::Legacy;
}
impl Control for Legacy {}

pub struct Ips<'a, P: Profile> {
    engine: Engine<'a>,
    profile: PhantomData<P>,
}

impl<'a, P: Profile> Ips<'a, P> {
    pub fn new(port: &'a mut dyn Port) -> Self {
        Ips {
            engine: Engine::new(port, P::KIND),
            profile: PhantomData,
        }
    }

    pub fn with_terminator(self, terminator: Terminator) -> Self {
        Ips {
            engine: self.engine.with_terminator(terminator),
            profile: PhantomData,
        }
    }

    pub fn with_timing(self, timing: Timing) -> Self {
        Ips {
            engine: self.engine.with_timing(timing),
            profile: PhantomData,
        }
    }

    /// The untyped engine underneath, for commands addressed by name.
    pub fn engine(&mut self) -> &mut Engine<'a> {
        &mut self.engine
    }

    pub fn version(&mut self) -> Result<Version, ProtocolError> {
        let values = self.engine.execute("getVersion", None)?;
        Version::from_values(&values).ok_or(ProtocolError::Shape("getVersion"))
    }

    pub fn read(&mut self, parameter: Parameter) -> Result<f64, ProtocolError> {
        let name = parameter.command_name();
        let values = self.engine.execute(name, None)?;
        match values.as_slice() {
            [value] => value.as_f64().ok_or(ProtocolError::Shape(name)),
            _ => Err(ProtocolError::Shape(name)),
        }
    }

    pub fn status(&mut self) -> Result<Status, ProtocolError> {
        let values = self.engine.execute("getStatus", None)?;
        Status::from_values(&values).ok_or(ProtocolError::Shape("getStatus"))
    }

    fn write(&mut self, name: &str, value: Option<f64>) -> Result<(), ProtocolError> {
        self.engine.execute(name, value).map(|_: Vec<Value>| ())
    }
}

fn code<T: ToPrimitive>(value: T) -> Option<f64> {
    value.to_f64()
}

impl<'a, P: Control> Ips<'a, P> {
    /// `RemoteUnlocked` is what every other write needs; any other mode hands
    /// control back and makes the next write re-assert remote control.
    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), ProtocolError> {
        self.write("setControlMode", code(mode))
    }

    pub fn set_activity(&mut self, activity: Activity) -> Result<(), ProtocolError> {
        self.write("setActivity", code(activity))
    }

    /// Amps.
    pub fn set_target_current(&mut self, current: f64) -> Result<(), ProtocolError> {
        self.write("setSetpointCurrent", Some(current))
    }

    /// Tesla.
    pub fn set_target_field(&mut self, field: f64) -> Result<(), ProtocolError> {
        self.write("setSetpointField", Some(field))
    }

    pub fn set_sweep_mode(&mut self, mode: SweepMode) -> Result<(), ProtocolError> {
        self.write("setSweepMode", code(mode))
    }

    /// Amps per minute.
    pub fn set_current_sweep_rate(&mut self, rate: f64) -> Result<(), ProtocolError> {
        self.write("setCurrentSweepRate", Some(rate))
    }

    /// Tesla per minute.
    pub fn set_field_sweep_rate(&mut self, rate: f64) -> Result<(), ProtocolError> {
        self.write("setFieldSweepRate", Some(rate))
    }

    /// Inter-character wait of the supply's transmitter, in milliseconds.
    pub fn set_wait(&mut self, millis: u16) -> Result<(), ProtocolError> {
        self.write("setWait", Some(f64::from(millis)))
    }

    /// The supply does not answer `Q`; from here on both sides use the new
    /// terminator until the supply is power cycled.
    pub fn set_comms_mode(&mut self, mode: CommsMode) -> Result<(), ProtocolError> {
        self.write("setCommsMode", code(mode))
    }
}

impl<'a, P: Heater> Ips<'a, P> {
    pub fn set_heater(&mut self, on: bool) -> Result<(), ProtocolError> {
        self.write("setHeater", Some(if on { 1.0 } else { 0.0 }))
    }
}
