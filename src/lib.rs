//! Launch a shell command and talk to it over pipes.
//!
//! Like `popen(3)`, but a child can be wired both ways: the parent gets a
//! buffered writer feeding the child's stdin and a buffered reader draining
//! its stdout. Every spawned child is tracked by the [`SubprocessManager`]
//! that launched it until it is closed, which flushes and closes the
//! parent's handles, waits for that exact child and decodes how it ended.
//!
//! ```no_run
//! use std::io::{BufRead, Write};
//! use popen2::SubprocessManager;
//!
//! # fn main() -> popen2::Result<()> {
//! let manager = SubprocessManager::new();
//! let mut child = manager.spawn_bidirectional("cat")?;
//!
//! if let Some(stdin) = child.stdin.as_mut() {
//!     stdin.write_all(b"one\n")?;
//!     stdin.flush()?;
//! }
//! let mut line = String::new();
//! if let Some(stdout) = child.stdout.as_mut() {
//!     stdout.read_line(&mut line)?;
//! }
//!
//! let status = manager.close_bidirectional(&mut child)?;
//! assert!(status.success());
//! # Ok(())
//! # }
//! ```
//!
//! Commands are handed verbatim to `/bin/sh -c` (configurable through
//! [`ShellConfig`]); the shell is trusted and quoting is the caller's job.
//!
//! # Threads
//!
//! A `SubprocessManager` (the default `Unsynchronized` flavour) is `!Sync`
//! and can only be used from one thread. `SubprocessManager::synchronized()`
//! guards its registry with a lock and can be shared.

pub mod error;
mod popen;

pub use error::{Error, Result};
pub use popen::{
    load_config, ChildStdin, ChildStdout, Direction, HandleId, LogConfig, Outcome, PipeHandle, PipeStream,
    Popen2Config, ProcessRecord, ProcessRegistry, RegistryAccess, ShellConfig, Subprocess, SubprocessManager,
    Synchronized, Unsynchronized,
};
