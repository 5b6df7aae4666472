//! An IPS that lives in memory.
//!
//! [`SimulatedIps`] implements [`Port`], so it plugs into anything that
//! takes one. Commands are taken off the write
//! side one CR-terminated line at a time and answered immediately; the magnet
//! reaches its target the moment it is told to sweep.

use log::debug;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};

use crate::protocol::{Port, ProfileKind, Terminator};

/// Load line of the simulated magnet, tesla per amp.
pub const TESLA_PER_AMP: f64 = 0.01;

pub const IDENTITY: &str = "IPS120-10  Version 3.07  (c) OXFORD 1996";

#[derive(Debug)]
pub struct SimulatedIps {
    polarity: bool,
    fault: u8,
    limit: u8,
    activity: u8,
    control: u8,
    heater: u8,
    mode: u8,
    wait: u16,
    comms: u8,
    demand: f64,
    setpoint: f64,
    persistent: f64,
    current_rate: f64,
    field_rate: f64,
    input: Vec<u8>,
    output: VecDeque<u8>,
    received: Vec<String>,
}

impl SimulatedIps {
    /// `polarity` controls the trailing `Pmn` group of the status line.
    pub fn new(polarity: bool) -> Self {
        SimulatedIps {
            polarity,
            fault: 0,
            limit: 0,
            activity: 0,
            control: 0,
            heater: 0,
            mode: 0,
            wait: 0,
            comms: 0,
            demand: 0.0,
            setpoint: 0.0,
            persistent: 0.0,
            current_rate: 1.0,
            field_rate: 0.01,
            input: Vec::new(),
            output: VecDeque::new(),
            received: Vec::new(),
        }
    }

    /// A device whose status line matches what `profile` expects.
    pub fn for_profile(profile: ProfileKind) -> Self {
        Self::new(profile != ProfileKind::Legacy)
    }

    /// Every command line seen so far, without terminators.
    pub fn received(&self) -> &[String] {
        &self.received
    }

    pub fn control(&self) -> u8 {
        self.control
    }

    pub fn wait(&self) -> u16 {
        self.wait
    }

    pub fn current(&self) -> f64 {
        self.demand
    }

    pub fn field(&self) -> f64 {
        self.demand * TESLA_PER_AMP
    }

    /// Lose the magnet: output drops to zero and the fault digit reads quenched.
    pub fn quench(&mut self) {
        self.fault = 1;
        self.demand = 0.0;
        self.persistent = 0.0;
        self.activity = 0;
    }

    pub fn terminator(&self) -> Terminator {
        match self.comms {
            2 | 6 => Terminator::CrLf,
            _ => Terminator::Cr,
        }
    }

    fn precision(&self) -> usize {
        match self.comms {
            4 | 6 => 5,
            _ => 4,
        }
    }

    fn remote(&self) -> bool {
        self.control == 1 || self.control == 3
    }

    fn status_line(&self) -> String {
        let mut line = format!(
            "X{}{}A{}C{}H{}M{}{}",
            self.fault, self.limit, self.activity, self.control, self.heater, self.mode, 0
        );
        if self.polarity {
            line.push_str("P00");
        }
        line
    }

    fn parameter(&self, code: u8) -> Option<f64> {
        let value = match code {
            0 | 2 => self.demand,
            1 => 0.0,
            5 => self.setpoint,
            6 => self.current_rate,
            7 => self.field(),
            8 => self.setpoint * TESLA_PER_AMP,
            9 => self.field_rate,
            15 => 2.0,
            16 => self.persistent,
            17 => 0.0,
            18 => self.persistent * TESLA_PER_AMP,
            19 => 0.0,
            20 => 20.0,
            21 => -120.0,
            22 => 120.0,
            23 => 0.0,
            24 => 0.0,
            _ => return None,
        };
        Some(value)
    }

    fn sweep(&mut self) {
        match self.activity {
            1 => self.demand = self.setpoint,
            2 => self.demand = 0.0,
            _ => {}
        }
        if self.heater == 1 {
            self.persistent = self.demand;
        }
    }

    /// Reply to one command line, or `None` where the supply stays silent.
    fn respond(&mut self, line: &str) -> Option<String> {
        let mut chars = line.chars();
        let letter = chars.next()?;
        let arg = chars.as_str();
        let rejected = Some(format!("?{}", line));

        if matches!(letter, 'A' | 'H' | 'I' | 'J' | 'M' | 'S' | 'T' | 'W') && !self.remote() {
            return rejected;
        }

        let ack = Some(letter.to_string());
        match letter {
            'V' if arg.is_empty() => Some(IDENTITY.to_string()),
            'X' if arg.is_empty() => Some(self.status_line()),
            'R' => match arg.parse::<u8>().ok().and_then(|code| self.parameter(code)) {
                Some(value) => Some(format!("R{:.*}", self.precision(), value)),
                None => rejected,
            },
            'C' => match arg.parse::<u8>() {
                Ok(mode) if mode <= 3 => {
                    self.control = mode;
                    ack
                }
                _ => rejected,
            },
            'A' => match arg.parse::<u8>() {
                Ok(activity) if matches!(activity, 0 | 1 | 2 | 4) => {
                    self.activity = activity;
                    self.sweep();
                    ack
                }
                _ => rejected,
            },
            'H' => match arg {
                "0" => {
                    self.heater = if self.demand == 0.0 { 0 } else { 2 };
                    ack
                }
                "1" => {
                    self.heater = 1;
                    self.persistent = self.demand;
                    ack
                }
                _ => rejected,
            },
            'M' => match arg.parse::<u8>() {
                Ok(mode) if mode <= 9 => {
                    self.mode = mode;
                    ack
                }
                _ => rejected,
            },
            'W' => match arg.parse::<u16>() {
                Ok(wait) if wait <= 32767 => {
                    self.wait = wait;
                    ack
                }
                _ => rejected,
            },
            'Q' => match arg.parse::<u8>() {
                Ok(comms) if matches!(comms, 0 | 2 | 4 | 6) => {
                    self.comms = comms;
                    None
                }
                _ => rejected,
            },
            'I' | 'J' | 'S' | 'T' => match arg.parse::<f64>() {
                Ok(value) if value.is_finite() => {
                    match letter {
                        'I' => self.setpoint = value,
                        'J' => self.setpoint = value / TESLA_PER_AMP,
                        'S' => self.current_rate = value,
                        _ => self.field_rate = value,
                    }
                    self.sweep();
                    ack
                }
                _ => rejected,
            },
            _ => Some("?".to_string()),
        }
    }

    fn process(&mut self) {
        while let Some(end) = self.input.iter().position(|&b| b == b'\r') {
            let raw: Vec<u8> = self.input.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_start_matches('\n').trim_end_matches('\r').to_string();
            debug!("sim recv {:?}", line);

            let terminator = self.terminator();
            if let Some(reply) = self.respond(&line) {
                debug!("sim send {:?}", reply);
                self.output.extend(reply.bytes());
                self.output.extend(terminator.as_bytes());
            }
            self.received.push(line);
        }
    }
}

impl Default for SimulatedIps {
    fn default() -> Self {
        Self::new(true)
    }
}

impl io::Read for SimulatedIps {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.output.is_empty() {
            return Err(io::Error::new(ErrorKind::TimedOut, "nothing to send"));
        }
        let n = buf.len().min(self.output.len());
        for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Port for SimulatedIps {
    fn clear_input(&mut self) -> io::Result<()> {
        if !self.output.is_empty() {
            debug!("sim drop {} unread bytes", self.output.len());
        }
        self.output.clear();
        Ok(())
    }
}

impl io::Write for SimulatedIps {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.input.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
