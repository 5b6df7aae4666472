//! The IPS command set.
//!
//! Every operation the tool can perform is one static [`Command`]. A profile
//! selects a subset of them; anything a profile does not list simply does not
//! exist for it. Unlocking system configuration, calibration and memory
//! access commands are deliberately absent from every profile.

use itertools::Itertools;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::{fmt::Display, str::FromStr};
use thiserror::Error;

use super::template::{Arg, Field};
use super::ProfileKind::{self, Full, Legacy, ReadOnly};

/// Name of the command every state-changing command depends on.
pub const REMOTE_UNLOCKED: &str = "setRemoteUnlocked";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Parsed against a template.
    Fields(&'static [Field]),
    /// Exactly the command letter, read and discarded.
    Ack,
    /// The device sends nothing back.
    Silent,
}

/// Engine-side bookkeeping triggered by a successful command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    /// Changes the control mode, so any established precondition is void.
    Control,
    /// Switches line terminator.
    Terminator,
    /// Reports the control mode as the fourth captured value.
    Observe,
}

#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub name: &'static str,
    pub letter: char,
    pub arg: Arg,
    pub reply: Reply,
    pub mutates: bool,
    pub requires: &'static [&'static str],
    pub effect: Effect,
    pub profiles: &'static [ProfileKind],
    pub description: &'static str,
}

const ALL: &[ProfileKind] = &[Full, ReadOnly, Legacy];
const CONTROL: &[ProfileKind] = &[Full, Legacy];

const PARAMETER: &[Field] = &[Field::Literal("R"), Field::Float];
const VERSION: &[Field] = &[Field::Word, Field::Rest];

const STATUS_HEAD: [Field; 12] = [
    Field::Literal("X"),
    Field::Uint(1),
    Field::Uint(1),
    Field::Literal("A"),
    Field::Uint(1),
    Field::Literal("C"),
    Field::Uint(1),
    Field::Literal("H"),
    Field::Uint(1),
    Field::Literal("M"),
    Field::Uint(1),
    Field::Uint(1),
];

const STATUS_POLARITY: &[Field] = &[
    STATUS_HEAD[0],
    STATUS_HEAD[1],
    STATUS_HEAD[2],
    STATUS_HEAD[3],
    STATUS_HEAD[4],
    STATUS_HEAD[5],
    STATUS_HEAD[6],
    STATUS_HEAD[7],
    STATUS_HEAD[8],
    STATUS_HEAD[9],
    STATUS_HEAD[10],
    STATUS_HEAD[11],
    Field::Literal("P"),
    Field::Skip(1),
    Field::Skip(1),
];

const STATUS_PLAIN: &[Field] = &STATUS_HEAD;

impl Command {
    const fn query(
        name: &'static str,
        letter: char,
        arg: Arg,
        reply: &'static [Field],
        profiles: &'static [ProfileKind],
        description: &'static str,
    ) -> Self {
        Command {
            name,
            letter,
            arg,
            reply: Reply::Fields(reply),
            mutates: false,
            requires: &[],
            effect: Effect::None,
            profiles,
            description,
        }
    }

    const fn parameter(name: &'static str, code: u32, description: &'static str) -> Self {
        Self::query(name, 'R', Arg::Fixed(code), PARAMETER, ALL, description)
    }

    const fn setter(
        name: &'static str,
        letter: char,
        arg: Arg,
        profiles: &'static [ProfileKind],
        description: &'static str,
    ) -> Self {
        Command {
            name,
            letter,
            arg,
            reply: Reply::Ack,
            mutates: true,
            requires: &[REMOTE_UNLOCKED],
            effect: Effect::None,
            profiles,
            description,
        }
    }

    const fn with_effect(mut self, effect: Effect) -> Self {
        self.effect = effect;
        self
    }

    const fn with_reply(mut self, reply: Reply) -> Self {
        self.reply = reply;
        self
    }

    const fn standalone(mut self) -> Self {
        self.requires = &[];
        self
    }

    pub fn available_in(&self, profile: ProfileKind) -> bool {
        self.profiles.contains(&profile)
    }

    /// The request line, without terminator.
    pub fn request(&self, value: Option<f64>) -> Result<String, super::ProtocolError> {
        Ok(format!("{}{}", self.letter, self.arg.render(self.name, value)?))
    }
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let form = match self.arg {
            Arg::None => String::new(),
            Arg::Fixed(code) => code.to_string(),
            Arg::Int { min, max } => format!("<{}-{}>", min, max),
            Arg::Choice(codes) => format!("<{}>", codes.iter().join("/")),
            Arg::Float { precision } => format!("<±d.{}>", "d".repeat(precision)),
        };
        write!(
            f,
            "{:<24} {}{:<12} {:<2} {}",
            self.name,
            self.letter,
            form,
            if self.mutates { "W" } else { "R" },
            self.description
        )
    }
}

pub static COMMANDS: &[Command] = &[
    Command::query("getVersion", 'V', Arg::None, VERSION, ALL, "model and firmware"),
    Command::parameter("getDemandCurrent", 0, "demand (output) current, A"),
    Command::parameter("getMeasuredVoltage", 1, "measured power supply voltage, V"),
    Command::parameter("getMeasuredCurrent", 2, "measured magnet current, A"),
    Command::parameter("getSetpointCurrent", 5, "target current, A"),
    Command::parameter("getCurrentSweepRate", 6, "current sweep rate, A/min"),
    Command::parameter("getDemandField", 7, "demand (output) field, T"),
    Command::parameter("getSetpointField", 8, "target field, T"),
    Command::parameter("getFieldSweepRate", 9, "field sweep rate, T/min"),
    Command::parameter("getVoltageLimit", 15, "software voltage limit, V"),
    Command::parameter("getPersistentCurrent", 16, "persistent magnet current, A"),
    Command::parameter("getTripCurrent", 17, "trip current, A"),
    Command::parameter("getPersistentField", 18, "persistent magnet field, T"),
    Command::parameter("getTripField", 19, "trip field, T"),
    Command::parameter("getHeaterCurrent", 20, "switch heater current, mA"),
    Command::parameter("getNegativeCurrentLimit", 21, "safe current limit, most negative, A"),
    Command::parameter("getPositiveCurrentLimit", 22, "safe current limit, most positive, A"),
    Command::parameter("getLeadResistance", 23, "lead resistance, mOhm"),
    Command::parameter("getMagnetInductance", 24, "magnet inductance, H"),
    Command::query("getStatus", 'X', Arg::None, STATUS_POLARITY, &[Full, ReadOnly], "status")
        .with_effect(Effect::Observe),
    Command::query("getStatus", 'X', Arg::None, STATUS_PLAIN, &[Legacy], "status")
        .with_effect(Effect::Observe),
    Command::setter(
        "setControlMode",
        'C',
        Arg::Int { min: 0, max: 3 },
        CONTROL,
        "local/remote and lock state",
    )
    .standalone()
    .with_effect(Effect::Control),
    Command::setter(REMOTE_UNLOCKED, 'C', Arg::Fixed(3), CONTROL, "remote & unlocked")
        .standalone()
        .with_effect(Effect::Control),
    Command::setter("setActivity", 'A', Arg::Choice(&[0, 1, 2, 4]), CONTROL, "hold/to setpoint/to zero/clamp"),
    Command::setter("setHeater", 'H', Arg::Int { min: 0, max: 1 }, &[Full], "switch heater off/on"),
    Command::setter("setSetpointCurrent", 'I', Arg::Float { precision: 4 }, CONTROL, "target current, A"),
    Command::setter("setSetpointField", 'J', Arg::Float { precision: 5 }, CONTROL, "target field, T"),
    Command::setter("setSweepMode", 'M', Arg::Int { min: 0, max: 9 }, CONTROL, "sweep mode"),
    Command::setter("setCurrentSweepRate", 'S', Arg::Float { precision: 3 }, CONTROL, "current sweep rate, A/min"),
    Command::setter("setFieldSweepRate", 'T', Arg::Float { precision: 4 }, CONTROL, "field sweep rate, T/min"),
    Command::setter("setWait", 'W', Arg::Int { min: 0, max: 32767 }, CONTROL, "inter-character wait, ms"),
    Command::setter("setCommsMode", 'Q', Arg::Choice(&[0, 2, 4, 6]), CONTROL, "terminator and resolution")
        .with_reply(Reply::Silent)
        .with_effect(Effect::Terminator),
];

/// The commands one profile exposes, looked up by name.
#[derive(Debug, Clone)]
pub struct CommandTable {
    profile: ProfileKind,
    commands: Vec<&'static Command>,
}

impl CommandTable {
    pub fn for_profile(profile: ProfileKind) -> Self {
        CommandTable {
            profile,
            commands: COMMANDS
                .iter()
                .filter(|command| command.available_in(profile))
                .collect(),
        }
    }

    pub fn profile(&self) -> ProfileKind {
        self.profile
    }

    pub fn get(&self, name: &str) -> Option<&'static Command> {
        self.commands.iter().copied().find(|command| command.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static Command> + '_ {
        self.commands.iter().copied()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.iter().map(|command| command.name).sorted().collect()
    }
}

/// Readable numeric parameters, by their `R` code. Codes 3, 4 and 10 to 14
/// are reserved on the supply and have no variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Parameter {
    DemandCurrent = 0,
    MeasuredVoltage = 1,
    MeasuredCurrent = 2,
    SetpointCurrent = 5,
    CurrentSweepRate = 6,
    DemandField = 7,
    SetpointField = 8,
    FieldSweepRate = 9,
    VoltageLimit = 15,
    PersistentCurrent = 16,
    TripCurrent = 17,
    PersistentField = 18,
    TripField = 19,
    HeaterCurrent = 20,
    NegativeCurrentLimit = 21,
    PositiveCurrentLimit = 22,
    LeadResistance = 23,
    MagnetInductance = 24,
}

impl Parameter {
    pub const ALL: [Parameter; 18] = [
        Parameter::DemandCurrent,
        Parameter::MeasuredVoltage,
        Parameter::MeasuredCurrent,
        Parameter::SetpointCurrent,
        Parameter::CurrentSweepRate,
        Parameter::DemandField,
        Parameter::SetpointField,
        Parameter::FieldSweepRate,
        Parameter::VoltageLimit,
        Parameter::PersistentCurrent,
        Parameter::TripCurrent,
        Parameter::PersistentField,
        Parameter::TripField,
        Parameter::HeaterCurrent,
        Parameter::NegativeCurrentLimit,
        Parameter::PositiveCurrentLimit,
        Parameter::LeadResistance,
        Parameter::MagnetInductance,
    ];

    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn command_name(&self) -> &'static str {
        match self {
            Parameter::DemandCurrent => "getDemandCurrent",
            Parameter::MeasuredVoltage => "getMeasuredVoltage",
            Parameter::MeasuredCurrent => "getMeasuredCurrent",
            Parameter::SetpointCurrent => "getSetpointCurrent",
            Parameter::CurrentSweepRate => "getCurrentSweepRate",
            Parameter::DemandField => "getDemandField",
            Parameter::SetpointField => "getSetpointField",
            Parameter::FieldSweepRate => "getFieldSweepRate",
            Parameter::VoltageLimit => "getVoltageLimit",
            Parameter::PersistentCurrent => "getPersistentCurrent",
            Parameter::TripCurrent => "getTripCurrent",
            Parameter::PersistentField => "getPersistentField",
            Parameter::TripField => "getTripField",
            Parameter::HeaterCurrent => "getHeaterCurrent",
            Parameter::NegativeCurrentLimit => "getNegativeCurrentLimit",
            Parameter::PositiveCurrentLimit => "getPositiveCurrentLimit",
            Parameter::LeadResistance => "getLeadResistance",
            Parameter::MagnetInductance => "getMagnetInductance",
        }
    }
}

impl Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.command_name().trim_start_matches("get").fmt(f)
    }
}

#[derive(Error, Debug)]
pub enum ParameterError {
    #[error("unknown parameter '{0}'")]
    BadParameter(String),
}

impl FromStr for Parameter {
    type Err = ParameterError;

    /// Accepts the `R` code, the command name or the bare name, case-insensitively.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let by_code = input.parse::<u8>().ok().and_then(Parameter::from_u8);
        by_code
            .or_else(|| {
                Parameter::ALL.iter().copied().find(|p| {
                    input.eq_ignore_ascii_case(p.command_name())
                        || input.eq_ignore_ascii_case(&p.to_string())
                })
            })
            .ok_or_else(|| ParameterError::BadParameter(input.to_string()))
    }
}
