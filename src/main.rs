mod cli;

use std::io;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, shells::Bash};
use json::JsonValue;
use log::error;

use ips_utils::alarms;
use ips_utils::port;
use ips_utils::protocol::{
    CommandTable, Engine, Parameter, Port, ProfileKind, Status, Terminator, Timing, Value, Version,
};
use ips_utils::sim::SimulatedIps;

use cli::{Cli, Commands, StructOpt};

enum OutputFormat {
    Plain,
    Json,
}

fn slice_to_line<T: ToString>(data: &[T]) -> String {
    data.iter()
        .map(|x| x.to_string())
        .collect::<Vec<String>>()
        .join(" ")
}

fn slice_to_column<T: ToString>(data: &[T]) -> String {
    data.iter()
        .map(|x| x.to_string())
        .collect::<Vec<String>>()
        .join("\n")
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Uint(v) => (*v).into(),
        Value::Float(v) => (*v).into(),
        Value::Text(s) => s.as_str().into(),
    }
}

fn cmd_list_commands(profile: ProfileKind, fmt: OutputFormat) -> Result<String> {
    let table = CommandTable::for_profile(profile);
    Ok(match fmt {
        OutputFormat::Plain => slice_to_column(&table.iter().collect::<Vec<_>>()),
        OutputFormat::Json => json::stringify(table.names()),
    })
}

fn cmd_list_parameters(fmt: OutputFormat) -> Result<String> {
    Ok(match fmt {
        OutputFormat::Plain => slice_to_column(
            &Parameter::ALL
                .iter()
                .map(|p| format!("{:>2} {}", p.code(), p))
                .collect::<Vec<_>>(),
        ),
        OutputFormat::Json => {
            let mut obj = JsonValue::new_object();
            for p in Parameter::ALL {
                obj[p.to_string()] = p.code().into();
            }
            json::stringify(obj)
        }
    })
}

fn cmd_version(engine: &mut Engine, fmt: OutputFormat) -> Result<String> {
    let values = engine
        .execute("getVersion", None)
        .context("Failed to read version")?;
    let version = Version::from_values(&values).ok_or_else(|| anyhow!("Malformed version reply"))?;

    Ok(match fmt {
        OutputFormat::Plain => version.to_string(),
        OutputFormat::Json => {
            let mut obj = JsonValue::new_object();
            obj["model"] = version.model.as_str().into();
            obj["firmware"] = version.firmware.as_str().into();
            obj["release"] = version.release().into();
            json::stringify(obj)
        }
    })
}

fn cmd_status(engine: &mut Engine, fmt: OutputFormat) -> Result<String> {
    let values = engine
        .execute("getStatus", None)
        .context("Failed to read status")?;
    let status = Status::from_values(&values).ok_or_else(|| anyhow!("Malformed status reply"))?;
    let labels = status.labels();

    Ok(match fmt {
        OutputFormat::Plain => slice_to_column(
            &Status::FIELDS
                .iter()
                .zip(status.raw().iter())
                .zip(labels.iter())
                .map(|((name, raw), label)| format!("{:<9} {} {}", name, raw, label))
                .collect::<Vec<_>>(),
        ),
        OutputFormat::Json => {
            let mut obj = JsonValue::new_object();
            for ((name, raw), label) in Status::FIELDS.iter().zip(status.raw()).zip(labels) {
                let mut field = JsonValue::new_object();
                field["code"] = raw.into();
                field["text"] = label.into();
                obj[*name] = field;
            }
            json::stringify(obj)
        }
    })
}

fn cmd_read(engine: &mut Engine, parameter: Parameter, fmt: OutputFormat) -> Result<String> {
    let values = engine
        .execute(parameter.command_name(), None)
        .with_context(|| format!("Failed to read {}", parameter))?;
    let value = values
        .first()
        .and_then(Value::as_f64)
        .ok_or_else(|| anyhow!("Malformed reply to {}", parameter.command_name()))?;

    Ok(match fmt {
        OutputFormat::Plain => value.to_string(),
        OutputFormat::Json => json::stringify(value),
    })
}

fn cmd_exec(engine: &mut Engine, name: &str, value: Option<f64>, fmt: OutputFormat) -> Result<String> {
    let values = engine
        .execute(name, value)
        .with_context(|| format!("Failed to execute {}", name))?;

    Ok(match fmt {
        OutputFormat::Plain => slice_to_line(&values),
        OutputFormat::Json => json::stringify(values.iter().map(value_to_json).collect::<Vec<_>>()),
    })
}

fn cmd_decode_alarms(message: &str, fmt: OutputFormat) -> Result<String> {
    let decoded = alarms::decode(message);

    Ok(match fmt {
        OutputFormat::Plain => slice_to_column(
            &decoded
                .iter()
                .map(|(board, mask)| {
                    format!(
                        "{} {:#010x} {}",
                        board.id,
                        mask,
                        alarms::describe(board.category, mask).join(", ")
                    )
                })
                .collect::<Vec<_>>(),
        ),
        OutputFormat::Json => {
            let mut obj = JsonValue::new_object();
            for (board, mask) in decoded.iter() {
                obj[board.id] = mask.into();
            }
            obj["errors"] = decoded
                .errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .into();
            json::stringify(obj)
        }
    })
}

fn do_main() -> Result<String> {
    if std::env::var("GENERATE_COMPLETION").is_ok() {
        generate(Bash, &mut cli::Cli::command(), "ips-tool", &mut io::stdout());

        return Ok(String::default());
    }

    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug {
        "debug"
    } else {
        "info"
    }))
    .format_timestamp(None)
    .format_target(false)
    .init();

    let fmt = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Plain
    };

    match cli.command {
        Commands::ListCommands => cmd_list_commands(cli.profile, fmt),
        Commands::ListParameters => cmd_list_parameters(fmt),
        Commands::DecodeAlarms { message } => cmd_decode_alarms(&message, fmt),
        _ => {
            let mut simulated;
            let mut serial;
            let port: &mut dyn Port = if cli.simulate {
                simulated = SimulatedIps::for_profile(cli.profile);
                &mut simulated
            } else {
                serial = port::open_port(&cli.port, cli.baudrate, cli.force)?;
                &mut serial
            };

            let terminator = if cli.crlf {
                Terminator::CrLf
            } else {
                Terminator::Cr
            };
            let timing = Timing {
                settle: Duration::from_millis(cli.settle_ms),
                reply_timeout: Duration::from_millis(cli.reply_timeout_ms),
            };
            let mut engine = Engine::new(port, cli.profile)
                .with_terminator(terminator)
                .with_timing(timing);

            match cli.command {
                Commands::Version => cmd_version(&mut engine, fmt),
                Commands::Status => cmd_status(&mut engine, fmt),
                Commands::Read { parameter } => cmd_read(&mut engine, parameter, fmt),
                Commands::Exec { name, value } => cmd_exec(&mut engine, &name, value, fmt),
                _ => Err(anyhow!("unexpected command (this is a bug!)")),
            }
        }
    }
}

fn main() {
    match do_main() {
        Ok(s) => println!("{}", s),
        Err(e) => error!("{:#}", e),
    }
}

