use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use log::debug;
use nix::errno::Errno;
use nix::libc;
use nix::sys::signal::Signal;
use nix::unistd::Pid;
use serde::Serialize;

/***
How a child ended.

Exit codes and terminating signals are kept apart. `legacy_code()` folds
them back into the single popen-style number for callers that want it.
 */
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum Outcome {
    #[default]
    Unknown,
    Exited(i32),
    Killed(i32),
}

impl Outcome {
    pub fn code(&self) -> Option<i32> {
        match self {
            Outcome::Exited(code) => Some(*code),
            _ => None,
        }
    }

    pub fn signal(&self) -> Option<Signal> {
        match self {
            Outcome::Killed(signo) => Signal::try_from(*signo).ok(),
            _ => None,
        }
    }

    pub fn success(&self) -> bool {
        *self == Outcome::Exited(0)
    }

    pub fn legacy_code(&self) -> i32 {
        match self {
            Outcome::Exited(code) | Outcome::Killed(code) => *code,
            Outcome::Unknown => 0,
        }
    }
}

impl From<ExitStatus> for Outcome {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => Outcome::Exited(code),
            (None, Some(signo)) => Outcome::Killed(signo),
            _ => Outcome::Unknown,
        }
    }
}

/***
Block until `pid` terminates and return its raw wait status.
EINTR restarts the wait for the same pid and is never reported.
 */
pub(crate) fn wait_for(pid: Pid) -> Result<ExitStatus, Errno> {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: `status` outlives the call and waitpid only writes to it.
        let res = unsafe { libc::waitpid(pid.as_raw(), &mut status, 0) };
        match Errno::result(res) {
            Ok(_) => return Ok(ExitStatus::from_raw(status)),
            Err(Errno::EINTR) => {
                debug!("{}: wait interrupted, retrying", pid);
            }
            Err(e) => return Err(e),
        }
    }
}
