use std::ffi::NulError;

use nix::errno::Errno;
use nix::unistd::Pid;

use crate::popen::HandleId;

/// Errors surfaced by a [`SubprocessManager`](crate::SubprocessManager).
///
/// Every failure is a value: spawning never panics and closing never
/// touches a record it does not own.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    // -------------------------------------------------------------------------
    // Spawn errors
    // -------------------------------------------------------------------------
    /// The kernel refused to create a pipe (usually descriptor exhaustion).
    #[error("failed to create pipe: {0}")]
    Pipe(#[source] Errno),

    /// The kernel refused to fork.
    #[error("failed to fork: {0}")]
    Fork(#[source] Errno),

    /// The command line or shell configuration contains an interior NUL
    /// byte and cannot be handed to exec.
    #[error("command contains an interior NUL byte: {0}")]
    InvalidCommand(#[from] NulError),

    /// A popen mode string other than "r" or "w".
    #[error("invalid pipe mode {0:?} (expected \"r\" or \"w\")")]
    InvalidMode(String),

    // -------------------------------------------------------------------------
    // Registry errors
    // -------------------------------------------------------------------------
    /// The handle was never spawned by this manager, or was already closed.
    #[error("handle {id} is not tracked by this manager")]
    NotTracked { id: HandleId },

    // -------------------------------------------------------------------------
    // Reap errors
    // -------------------------------------------------------------------------
    /// waitpid failed for a reason other than EINTR, e.g. the child was
    /// already reaped elsewhere. The record has been removed regardless.
    #[error("failed to wait for process {pid}: {source}")]
    Wait {
        pid: Pid,
        #[source]
        source: Errno,
    },

    /// IO error on a channel handle.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized Result type for popen2 operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Resource exhaustion while setting up a channel.
    pub fn is_spawn_error(&self) -> bool {
        matches!(self, Error::Pipe(_) | Error::Fork(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Error>();
    }

    #[test]
    fn spawn_errors_are_detected() {
        assert!(Error::Pipe(Errno::EMFILE).is_spawn_error());
        assert!(Error::Fork(Errno::EAGAIN).is_spawn_error());
        assert!(!Error::NotTracked { id: 3 }.is_spawn_error());
    }

    #[test]
    fn nul_error_converts_with_question_mark() {
        fn build() -> Result<CString> {
            Ok(CString::new("echo \0 oops")?)
        }
        assert!(matches!(build(), Err(Error::InvalidCommand(_))));
    }

    #[test]
    fn not_tracked_names_the_handle() {
        let err = Error::NotTracked { id: 42 };
        assert_eq!(err.to_string(), "handle 42 is not tracked by this manager");
    }
}
