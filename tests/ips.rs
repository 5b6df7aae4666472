use ips_utils::protocol::status::{Fault, HeaterState};
use ips_utils::protocol::{
    Activity, CommsMode, ControlMode, Engine, Full, Ips, Legacy, Parameter, ProfileKind,
    ProtocolError, ReadOnly, Terminator, Timing, Value,
};
use ips_utils::sim::SimulatedIps;

#[test]
fn sweep_to_field_and_back() {
    let mut device = SimulatedIps::default();
    let mut ips = Ips::<Full>::new(&mut device).with_timing(Timing::immediate());

    ips.set_target_current(10.0).unwrap();
    ips.set_activity(Activity::ToSetpoint).unwrap();
    assert_eq!(ips.read(Parameter::DemandCurrent).unwrap(), 10.0);
    assert_eq!(ips.read(Parameter::DemandField).unwrap(), 0.1);

    let status = ips.status().unwrap();
    assert_eq!(status.activity(), Some(Activity::ToSetpoint));
    assert_eq!(status.control(), Some(ControlMode::RemoteUnlocked));

    ips.set_activity(Activity::ToZero).unwrap();
    assert_eq!(ips.read(Parameter::DemandField).unwrap(), 0.0);
    drop(ips);

    let sent: Vec<&str> = device.received().iter().map(String::as_str).collect();
    assert_eq!(
        sent,
        ["C3", "I10.0000", "A1", "R0", "R7", "X", "A2", "R7"]
    );
}

#[test]
fn control_mode_round_trip() {
    let mut device = SimulatedIps::for_profile(ProfileKind::Legacy);
    let mut ips = Ips::<Legacy>::new(&mut device).with_timing(Timing::immediate());

    ips.set_wait(5).unwrap();
    ips.set_control_mode(ControlMode::LocalUnlocked).unwrap();
    assert_eq!(ips.status().unwrap().control(), Some(ControlMode::LocalUnlocked));
    ips.set_field_sweep_rate(0.1).unwrap();
    assert_eq!(ips.read(Parameter::FieldSweepRate).unwrap(), 0.1);
    drop(ips);

    assert_eq!(device.wait(), 5);
    assert_eq!(device.control(), 3);
    let sent: Vec<&str> = device.received().iter().map(String::as_str).collect();
    assert_eq!(sent, ["C3", "W5", "C2", "X", "C3", "T0.1000", "R9"]);
}

#[test]
fn heater_after_handing_back_control() {
    let mut device = SimulatedIps::default();
    {
        let mut ips = Ips::<Full>::new(&mut device).with_timing(Timing::immediate());
        ips.set_current_sweep_rate(2.0).unwrap();
    }
    let mut ips = Ips::<Full>::new(&mut device).with_timing(Timing::immediate());
    ips.engine().execute("setControlMode", Some(2.0)).unwrap();
    let err = ips.engine().execute("setRemoteUnlocked", Some(1.0)).unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedArgument("setRemoteUnlocked")));
    ips.set_heater(true).unwrap();
    assert_eq!(ips.status().unwrap().heater(), Some(HeaterState::On));
}

#[test]
fn quench_is_reported() {
    let mut device = SimulatedIps::default();
    {
        let mut ips = Ips::<Full>::new(&mut device).with_timing(Timing::immediate());
        ips.set_target_field(0.05).unwrap();
        ips.set_activity(Activity::ToSetpoint).unwrap();
    }
    device.quench();

    let mut ips = Ips::<ReadOnly>::new(&mut device).with_timing(Timing::immediate());
    let status = ips.status().unwrap();
    assert_eq!(status.fault(), Some(Fault::Quenched));
    assert_eq!(status.labels()[0], "Quenched");
    assert_eq!(ips.read(Parameter::DemandCurrent).unwrap(), 0.0);
}

#[test]
fn every_parameter_reads() {
    let mut device = SimulatedIps::default();
    let mut ips = Ips::<ReadOnly>::new(&mut device).with_timing(Timing::immediate());
    for parameter in Parameter::ALL {
        assert!(ips.read(parameter).is_ok(), "{}", parameter);
    }
    assert_eq!(ips.read(Parameter::PositiveCurrentLimit).unwrap(), 120.0);
}

#[test]
fn extended_crlf_mode() {
    let mut device = SimulatedIps::default();
    let mut ips = Ips::<Full>::new(&mut device).with_timing(Timing::immediate());
    ips.set_target_current(1.23456).unwrap();
    ips.set_comms_mode(CommsMode::ExtendedLf).unwrap();
    assert_eq!(ips.read(Parameter::SetpointCurrent).unwrap(), 1.2346);
    assert_eq!(ips.version().unwrap().release(), Some("3.07"));
    drop(ips);
    assert_eq!(device.terminator(), Terminator::CrLf);

    // The supply keeps CR+LF until power cycled; a new session has to be told.
    let mut engine = Engine::new(&mut device, ProfileKind::ReadOnly)
        .with_timing(Timing::immediate())
        .with_terminator(Terminator::CrLf);
    assert_eq!(
        engine.execute("getSetpointCurrent", None).unwrap(),
        vec![Value::Float(1.2346)]
    );
}

#[test]
fn bad_arguments_never_reach_the_device() {
    let mut device = SimulatedIps::default();
    let mut engine = Engine::new(&mut device, ProfileKind::Full).with_timing(Timing::immediate());

    let err = engine.execute("getStatus", Some(1.0)).unwrap_err();
    assert!(matches!(err, ProtocolError::UnexpectedArgument(_)));

    let err = engine.execute("setSweepMode", Some(12.0)).unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidArgument { .. }));
    assert!(engine.last_mismatch().is_none());
    drop(engine);
    assert!(device.received().is_empty());
}

#[test]
fn legacy_profile_against_polarity_device() {
    let mut device = SimulatedIps::new(true);
    let mut ips = Ips::<Legacy>::new(&mut device).with_timing(Timing::immediate());
    match ips.status() {
        Err(ProtocolError::Mismatch { raw, offset, .. }) => {
            assert_eq!(raw, "X00A0C0H0M00P00");
            assert_eq!(offset, 12);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(ips.engine().last_mismatch(), Some("X00A0C0H0M00P00"));
}
