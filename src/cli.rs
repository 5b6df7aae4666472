use anyhow::Result;
pub use clap::StructOpt;
use clap::{Parser, Subcommand};

use ips_utils::protocol::{Parameter, ProfileKind};

fn parse_with_radix<T>(input: &str) -> Result<T, T::FromStrRadixErr>
where
    T: num_traits::Num,
    <T as num_traits::Num>::FromStrRadixErr: std::error::Error + Send + Sync,
{
    if let Some(hex) = input.strip_prefix("0x") {
        T::from_str_radix(hex, 16)
    } else if let Some(bin) = input.strip_prefix("0b") {
        T::from_str_radix(bin, 2)
    } else {
        T::from_str_radix(input, 10)
    }
}

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Skip sanity checks
    #[clap(long, short)]
    pub force: bool,

    /// enable debug output
    #[clap(long, short)]
    pub debug: bool,

    /// Serial device or 'auto'
    #[clap(long, short, default_value = "auto")]
    pub port: String,

    /// Serial baud rate
    #[clap(long, short, default_value_t = 9600, parse(try_from_str=parse_with_radix))]
    pub baudrate: u32,

    /// Use json-formatted output
    #[clap(long, short)]
    pub json: bool,

    /// Command set: full, readonly or legacy
    #[clap(long, short = 'P', default_value = "full")]
    pub profile: ProfileKind,

    /// The supply already terminates lines with CR+LF
    #[clap(long)]
    pub crlf: bool,

    /// Pause before and after each transmission, ms
    #[clap(long, default_value_t = 100, parse(try_from_str=parse_with_radix))]
    pub settle_ms: u64,

    /// Deadline for a complete reply, ms
    #[clap(long, default_value_t = 5000, parse(try_from_str=parse_with_radix))]
    pub reply_timeout_ms: u64,

    /// Talk to an in-memory simulated supply instead of a port
    #[clap(long, short)]
    pub simulate: bool,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List commands of the selected profile
    ListCommands,

    /// List readable parameters
    ListParameters,

    /// Read model and firmware
    Version,

    /// Read and decode the status line
    Status,

    /// Read one parameter by name or R code
    Read { parameter: Parameter },

    /// Run any command of the profile by name
    Exec {
        name: String,
        #[clap(allow_hyphen_values = true)]
        value: Option<f64>,
    },

    /// Decode a system alarm string into per-board bitmasks
    DecodeAlarms { message: String },
}
