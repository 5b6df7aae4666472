use log::{debug, info, warn};
use num_traits::FromPrimitive;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::thread;
use std::time::Instant;

use super::commands::{Command, CommandTable, Effect, Reply, REMOTE_UNLOCKED};
use super::status::{CommsMode, ControlMode};
use super::template::{parse_line, Mismatch, Value};
use super::{Port, ProfileKind, ProtocolError, Terminator, Timing};

/// Executes named commands over one port, one exchange at a time.
///
/// Holding the engine by `&mut` is what serialises access to the device;
/// nothing is retried and a timeout ends the command.
pub struct Engine<'a> {
    port: &'a mut dyn Port,
    table: CommandTable,
    terminator: Terminator,
    timing: Timing,
    satisfied: HashSet<&'static str>,
    last_mismatch: Option<String>,
}

impl<'a> Engine<'a> {
    pub fn new(port: &'a mut dyn Port, profile: ProfileKind) -> Self {
        Self {
            port,
            table: CommandTable::for_profile(profile),
            terminator: Terminator::default(),
            timing: Timing::default(),
            satisfied: HashSet::new(),
            last_mismatch: None,
        }
    }

    pub fn with_terminator(mut self, terminator: Terminator) -> Self {
        self.terminator = terminator;
        self
    }

    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = timing;
        self
    }

    pub fn profile(&self) -> ProfileKind {
        self.table.profile()
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    pub fn terminator(&self) -> Terminator {
        self.terminator
    }

    /// Use after the supply has been power cycled or reconfigured behind our back.
    pub fn set_terminator(&mut self, terminator: Terminator) {
        self.terminator = terminator;
    }

    /// Raw text of the most recent reply that did not fit its template.
    pub fn last_mismatch(&self) -> Option<&str> {
        self.last_mismatch.as_deref()
    }

    /// Forget which preconditions are believed to hold.
    pub fn invalidate(&mut self) {
        self.satisfied.clear();
    }

    pub fn execute(&mut self, name: &str, value: Option<f64>) -> Result<Vec<Value>, ProtocolError> {
        let command = self
            .table
            .get(name)
            .ok_or_else(|| ProtocolError::UnknownCommand(name.to_string()))?;
        let mut chain = Vec::new();
        self.run(command, value, &mut chain)
    }

    fn run(
        &mut self,
        command: &'static Command,
        value: Option<f64>,
        chain: &mut Vec<&'static str>,
    ) -> Result<Vec<Value>, ProtocolError> {
        if chain.contains(&command.name) {
            return Err(ProtocolError::DependencyCycle(command.name));
        }
        // Rendered up front so a bad argument never triggers a precondition.
        let request = command.request(value)?;

        chain.push(command.name);
        for &precondition in command.requires {
            if self.satisfied.contains(precondition) {
                continue;
            }
            let dependency = self
                .table
                .get(precondition)
                .ok_or_else(|| ProtocolError::UnknownCommand(precondition.to_string()))?;
            info!("{} needs {} first", command.name, precondition);
            self.run(dependency, None, chain)
                .map_err(|source| ProtocolError::Precondition {
                    command: command.name,
                    precondition,
                    source: Box::new(source),
                })?;
        }
        chain.pop();

        match self.exchange(command, &request) {
            Ok(values) => {
                self.apply(command, value, &values);
                Ok(values)
            }
            Err(err) => {
                self.satisfied.clear();
                Err(err)
            }
        }
    }

    fn apply(&mut self, command: &'static Command, value: Option<f64>, values: &[Value]) {
        match command.effect {
            Effect::None => {}
            Effect::Control => {
                self.satisfied.clear();
                let mode = command
                    .arg
                    .resolve(value)
                    .and_then(ControlMode::from_f64);
                if mode == Some(ControlMode::RemoteUnlocked) {
                    self.satisfied.insert(REMOTE_UNLOCKED);
                }
            }
            Effect::Terminator => {
                if let Some(mode) = value.and_then(CommsMode::from_f64) {
                    debug!("terminator now {:?}", mode.terminator());
                    self.terminator = mode.terminator();
                }
            }
            Effect::Observe => {
                let control = values.get(3).and_then(Value::as_u32);
                if control != Some(ControlMode::RemoteUnlocked as u32) {
                    self.satisfied.remove(REMOTE_UNLOCKED);
                }
            }
        }
    }

    fn exchange(&mut self, command: &'static Command, request: &str) -> Result<Vec<Value>, ProtocolError> {
        thread::sleep(self.timing.settle);
        // A reply that missed its deadline must not answer this request.
        self.port.clear_input()?;
        self.send(request)?;
        thread::sleep(self.timing.settle);

        let template = match command.reply {
            Reply::Silent => return Ok(Vec::new()),
            Reply::Ack => None,
            Reply::Fields(template) => Some(template),
        };

        let line = self.receive(command)?;
        if line.starts_with('?') {
            warn!("{} rejected: {:?}", command.name, line);
            return Err(ProtocolError::Rejected {
                command: command.name,
                reply: line,
            });
        }

        let parsed = match template {
            Some(template) => parse_line(template, &line),
            None => ack(command.letter, &line),
        };
        parsed.map_err(|Mismatch(offset)| {
            warn!("{}: cannot parse {:?} at byte {}", command.name, line, offset);
            self.last_mismatch = Some(line.clone());
            ProtocolError::Mismatch {
                command: command.name,
                raw: line,
                offset,
            }
        })
    }

    fn send(&mut self, request: &str) -> Result<(), ProtocolError> {
        debug!("send {:?}", request);
        let mut bytes = request.as_bytes().to_vec();
        bytes.extend_from_slice(self.terminator.as_bytes());
        self.port.write_all(&bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self, command: &'static Command) -> Result<String, ProtocolError> {
        let deadline = Instant::now() + self.timing.reply_timeout;
        let terminator = self.terminator.as_bytes();
        let mut line: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];

        loop {
            if Instant::now() >= deadline {
                debug!("partial reply {:?}", String::from_utf8_lossy(&line));
                return Err(ProtocolError::Timeout {
                    command: command.name,
                    timeout: self.timing.reply_timeout,
                });
            }
            match self.port.read(&mut byte) {
                Ok(0) => {
                    return Err(ProtocolError::Disconnected {
                        command: command.name,
                    })
                }
                Ok(_) => {
                    // Left over from a peer still sending CR+LF.
                    if byte[0] == b'\n' && line.is_empty() && self.terminator == Terminator::Cr {
                        continue;
                    }
                    line.push(byte[0]);
                    if line.ends_with(terminator) {
                        line.truncate(line.len() - terminator.len());
                        break;
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let line = String::from_utf8_lossy(&line).into_owned();
        debug!("recv {:?}", line);
        Ok(line)
    }
}

fn ack(letter: char, line: &str) -> Result<Vec<Value>, Mismatch> {
    let mut chars = line.chars();
    match chars.next() {
        Some(c) if c == letter => match chars.as_str() {
            "" => Ok(Vec::new()),
            _ => Err(Mismatch(letter.len_utf8())),
        },
        _ => Err(Mismatch(0)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::io;
    use std::time::Duration;

    enum Scripted {
        Reply { bytes: Vec<u8>, delay: Duration },
        Hangup,
        Fail,
    }

    /// Answers each request with the next scripted reply and records what
    /// was written. A request with nothing left to answer it gets silence.
    #[derive(Default)]
    pub(crate) struct ScriptedPort {
        script: VecDeque<Scripted>,
        pending: Option<(Instant, Vec<u8>)>,
        output: VecDeque<u8>,
        hangup: bool,
        fail: bool,
        pub written: Vec<u8>,
    }

    impl ScriptedPort {
        /// One reply per request; an empty reply stands for a silent one.
        pub fn new(replies: &[&str]) -> Self {
            replies
                .iter()
                .fold(Self::default(), |port, reply| port.reply_after(reply, Duration::ZERO))
        }

        pub fn reply_after(mut self, reply: &str, delay: Duration) -> Self {
            self.script.push_back(Scripted::Reply {
                bytes: reply.as_bytes().to_vec(),
                delay,
            });
            self
        }

        pub fn hangup(mut self) -> Self {
            self.script.push_back(Scripted::Hangup);
            self
        }

        pub fn fail(mut self) -> Self {
            self.script.push_back(Scripted::Fail);
            self
        }

        pub fn sent(&self) -> String {
            String::from_utf8_lossy(&self.written).into_owned()
        }

        fn arrive(&mut self) {
            if let Some((at, _)) = &self.pending {
                if Instant::now() >= *at {
                    if let Some((_, bytes)) = self.pending.take() {
                        self.output.extend(bytes);
                    }
                }
            }
        }
    }

    impl io::Read for ScriptedPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.arrive();
            if self.output.is_empty() {
                if self.hangup {
                    return Ok(0);
                }
                if self.fail {
                    return Err(io::Error::new(ErrorKind::BrokenPipe, "line dropped"));
                }
                return Err(io::Error::new(ErrorKind::TimedOut, "no data"));
            }
            let n = buf.len().min(self.output.len());
            for (slot, byte) in buf.iter_mut().zip(self.output.drain(..n)) {
                *slot = byte;
            }
            Ok(n)
        }
    }

    impl io::Write for ScriptedPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            self.hangup = false;
            self.fail = false;
            match self.script.pop_front() {
                Some(Scripted::Reply { bytes, delay }) if delay.is_zero() => self.output.extend(bytes),
                Some(Scripted::Reply { bytes, delay }) => {
                    self.pending = Some((Instant::now() + delay, bytes))
                }
                Some(Scripted::Hangup) => self.hangup = true,
                Some(Scripted::Fail) => self.fail = true,
                None => {}
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Port for ScriptedPort {
        fn clear_input(&mut self) -> io::Result<()> {
            self.arrive();
            self.output.clear();
            Ok(())
        }
    }

    fn engine(port: &mut ScriptedPort, profile: ProfileKind) -> Engine<'_> {
        Engine::new(port, profile).with_timing(Timing::immediate())
    }

    #[test]
    fn reads_parameter() {
        let mut port = ScriptedPort::new(&["R3.14159\r"]);
        let values = engine(&mut port, ProfileKind::Full)
            .execute("getDemandField", None)
            .unwrap();
        assert_eq!(values, vec![Value::Float(3.14159)]);
        assert_eq!(port.sent(), "R7\r");
    }

    #[test]
    fn question_mark_is_a_rejection() {
        for reply in ["?R7\r", "?\r", "?R3.14159\r"] {
            let mut port = ScriptedPort::new(&[reply]);
            let err = engine(&mut port, ProfileKind::Full)
                .execute("getDemandField", None)
                .unwrap_err();
            assert!(matches!(err, ProtocolError::Rejected { .. }), "{}", reply);
        }
    }

    #[test]
    fn status_in_one_parse() {
        let mut port = ScriptedPort::new(&["X18A1C3H1M04P00\r"]);
        let values = engine(&mut port, ProfileKind::Full).execute("getStatus", None).unwrap();
        let digits: Vec<u32> = values.iter().filter_map(Value::as_u32).collect();
        assert_eq!(digits, vec![1, 8, 1, 3, 1, 0, 4]);
    }

    #[test]
    fn status_mismatch_keeps_raw_text() {
        let mut port = ScriptedPort::new(&["X18A1C3Z1M04P00\r"]);
        let mut engine = engine(&mut port, ProfileKind::Full);
        match engine.execute("getStatus", None) {
            Err(ProtocolError::Mismatch { raw, offset, .. }) => {
                assert_eq!(raw, "X18A1C3Z1M04P00");
                assert_eq!(offset, 7);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(engine.last_mismatch(), Some("X18A1C3Z1M04P00"));
    }

    #[test]
    fn write_runs_remote_unlocked_once() {
        let mut port = ScriptedPort::new(&["C\r", "I\r", "J\r"]);
        let mut engine = engine(&mut port, ProfileKind::Full);
        engine.execute("setSetpointCurrent", Some(1.5)).unwrap();
        engine.execute("setSetpointField", Some(0.015)).unwrap();
        drop(engine);
        assert_eq!(port.sent(), "C3\rI1.5000\rJ0.01500\r");
    }

    #[test]
    fn failed_precondition_aborts() {
        let mut port = ScriptedPort::new(&["?C3\r"]);
        let err = engine(&mut port, ProfileKind::Full)
            .execute("setActivity", Some(1.0))
            .unwrap_err();
        match err {
            ProtocolError::Precondition {
                command,
                precondition,
                ..
            } => {
                assert_eq!(command, "setActivity");
                assert_eq!(precondition, REMOTE_UNLOCKED);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(port.sent(), "C3\r");
    }

    #[test]
    fn rejection_forgets_remote_mode() {
        let mut port = ScriptedPort::new(&["C\r", "?A1\r", "C\r", "A\r"]);
        let mut engine = engine(&mut port, ProfileKind::Full);
        assert!(engine.execute("setActivity", Some(1.0)).is_err());
        engine.execute("setActivity", Some(1.0)).unwrap();
        drop(engine);
        assert_eq!(port.sent(), "C3\rA1\rC3\rA1\r");
    }

    #[test]
    fn only_remote_mode_is_remembered() {
        let mut port = ScriptedPort::new(&["C\r", "I\r", "A\r"]);
        let mut engine = engine(&mut port, ProfileKind::Full);
        engine.execute("setSetpointCurrent", Some(1.5)).unwrap();
        engine.execute("setActivity", Some(1.0)).unwrap();
        assert_eq!(engine.satisfied, HashSet::from([REMOTE_UNLOCKED]));
    }

    #[test]
    fn local_control_write_forgets_remote_mode() {
        let mut port = ScriptedPort::new(&["C\r", "C\r", "C\r", "H\r"]);
        let mut engine = engine(&mut port, ProfileKind::Full);
        engine.execute(REMOTE_UNLOCKED, None).unwrap();
        engine.execute("setControlMode", Some(0.0)).unwrap();
        engine.execute("setHeater", Some(1.0)).unwrap();
        drop(engine);
        assert_eq!(port.sent(), "C3\rC0\rC3\rH1\r");
    }

    #[test]
    fn status_showing_local_forgets_remote_mode() {
        let mut port = ScriptedPort::new(&["C\r", "X00A0C0H0M00P00\r", "C\r", "W\r"]);
        let mut engine = engine(&mut port, ProfileKind::Full);
        engine.execute(REMOTE_UNLOCKED, None).unwrap();
        engine.execute("getStatus", None).unwrap();
        engine.execute("setWait", Some(10.0)).unwrap();
        drop(engine);
        assert_eq!(port.sent(), "C3\rX\rC3\rW10\r");
    }

    #[test]
    fn bad_argument_sends_nothing() {
        let mut port = ScriptedPort::new(&[]);
        let err = engine(&mut port, ProfileKind::Full)
            .execute("setActivity", Some(3.0))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidArgument { .. }));
        assert!(port.written.is_empty());
    }

    #[test]
    fn ack_with_payload_is_mismatch() {
        let mut port = ScriptedPort::new(&["C\r", "T0.5\r"]);
        let err = engine(&mut port, ProfileKind::Full)
            .execute("setFieldSweepRate", Some(0.5))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Mismatch { offset: 1, .. }));
    }

    #[test]
    fn comms_mode_switches_terminator() {
        let mut port = ScriptedPort::new(&["C\r", "", "R1.0\r\n"]);
        let mut engine = engine(&mut port, ProfileKind::Full);
        assert!(engine.execute("setCommsMode", Some(2.0)).unwrap().is_empty());
        assert_eq!(engine.terminator(), Terminator::CrLf);
        assert_eq!(engine.execute("getDemandCurrent", None).unwrap(), vec![Value::Float(1.0)]);
        drop(engine);
        assert_eq!(port.sent(), "C3\rQ2\rR0\r\n");
    }

    #[test]
    fn stray_line_feed_is_skipped() {
        let mut port = ScriptedPort::new(&["\nR2.5\r"]);
        let values = engine(&mut port, ProfileKind::ReadOnly)
            .execute("getDemandCurrent", None)
            .unwrap();
        assert_eq!(values, vec![Value::Float(2.5)]);
    }

    #[test]
    fn silence_times_out() {
        let mut port = ScriptedPort::new(&["R1.0"]);
        let err = engine(&mut port, ProfileKind::Full)
            .execute("getDemandCurrent", None)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Timeout { command: "getDemandCurrent", .. }));
    }

    #[test]
    fn readonly_knows_no_writes() {
        let mut port = ScriptedPort::new(&[]);
        let mut engine = engine(&mut port, ProfileKind::ReadOnly);
        for name in ["setSetpointCurrent", "setControlMode", REMOTE_UNLOCKED, "setCommsMode"] {
            assert!(matches!(
                engine.execute(name, Some(0.0)),
                Err(ProtocolError::UnknownCommand(_))
            ));
        }
        drop(engine);
        assert!(port.written.is_empty());
    }

    #[test]
    fn version_is_free_text() {
        let mut port = ScriptedPort::new(&["IPS120-10  Version 3.07  (c) OXFORD 1996\r"]);
        let values = engine(&mut port, ProfileKind::Legacy).execute("getVersion", None).unwrap();
        assert_eq!(values[0], Value::Text("IPS120-10".into()));
        assert_eq!(values[1], Value::Text("Version 3.07  (c) OXFORD 1996".into()));
    }

    #[test]
    fn late_reply_is_not_taken_for_the_next_one() {
        let mut port = ScriptedPort::default()
            .reply_after("R42.0000\r", Duration::from_millis(50))
            .reply_after("R0.0000\r", Duration::ZERO);
        let mut engine = engine(&mut port, ProfileKind::Full);
        assert!(matches!(
            engine.execute("getDemandCurrent", None),
            Err(ProtocolError::Timeout { command: "getDemandCurrent", .. })
        ));
        thread::sleep(Duration::from_millis(60));
        assert_eq!(
            engine.execute("getMeasuredVoltage", None).unwrap(),
            vec![Value::Float(0.0)]
        );
        drop(engine);
        assert_eq!(port.sent(), "R0\rR1\r");
    }

    #[test]
    fn hangup_is_a_disconnect_and_forgets_remote_mode() {
        let mut port = ScriptedPort::new(&["C\r"])
            .hangup()
            .reply_after("C\r", Duration::ZERO)
            .reply_after("A\r", Duration::ZERO);
        let mut engine = engine(&mut port, ProfileKind::Full);
        assert!(matches!(
            engine.execute("setActivity", Some(1.0)),
            Err(ProtocolError::Disconnected { command: "setActivity" })
        ));
        engine.execute("setActivity", Some(1.0)).unwrap();
        drop(engine);
        assert_eq!(port.sent(), "C3\rA1\rC3\rA1\r");
    }

    #[test]
    fn transport_error_surfaces_and_forgets_remote_mode() {
        let mut port = ScriptedPort::new(&["C\r"])
            .fail()
            .reply_after("C\r", Duration::ZERO)
            .reply_after("W\r", Duration::ZERO);
        let mut engine = engine(&mut port, ProfileKind::Legacy);
        match engine.execute("setWait", Some(10.0)) {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), ErrorKind::BrokenPipe),
            other => panic!("unexpected {:?}", other),
        }
        engine.execute("setWait", Some(10.0)).unwrap();
        drop(engine);
        assert_eq!(port.sent(), "C3\rW10\rC3\rW10\r");
    }
}
