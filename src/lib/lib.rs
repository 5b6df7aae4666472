pub mod alarms;
pub mod port;
pub mod protocol;
pub mod sim;
