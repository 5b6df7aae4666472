use super::OpenPortError;

use anyhow::Result;
use glob::glob;
use log::debug;
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, Instant};
use std::{fs, thread};

const LOCK_POLL: Duration = Duration::from_millis(100);

pub fn is_port_open(port_name: &str) -> bool {
    let paths = match glob("/proc/[0-9]*/fd/*") {
        Ok(paths) => paths,
        Err(_) => return false,
    };
    paths
        .filter_map(|p| p.ok())
        .filter_map(|path| fs::read_link(path).ok())
        .any(|link| link.to_str() == Some(port_name))
}

/// Advisory lock shared with every other tool that talks to the supply.
/// Only one exchange may be in flight on the line at a time.
pub fn lock_exclusive<T: AsRawFd>(port: &T, port_name: &str, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match flock(port.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => return Ok(()),
            Err(Errno::EWOULDBLOCK) if Instant::now() < deadline => {
                debug!("{} locked, waiting", port_name);
                thread::sleep(LOCK_POLL);
            }
            Err(Errno::EWOULDBLOCK) => {
                return Err(OpenPortError::LockTimeout {
                    port_name: port_name.to_string(),
                    timeout,
                }
                .into())
            }
            Err(err) => return Err(err.into()),
        }
    }
}
