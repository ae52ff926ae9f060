use std::fs::File;
use std::io::{BufReader, BufWriter};

use nix::unistd::Pid;

pub(crate) mod child;
pub(crate) mod config;
mod pipe;
mod process_orchestrator;
mod registry;
mod status;
mod stream;

pub use config::{load_config, LogConfig, Popen2Config, ShellConfig};
pub use registry::{ProcessRecord, ProcessRegistry, RegistryAccess, Synchronized, Unsynchronized};
pub use status::Outcome;

/// Registry token identifying one spawned child. Never reused by a manager.
pub type HandleId = u64;

/***
Which way a unidirectional channel flows, seen from the parent.
 */
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Direction {
    /// Parent reads the child's stdout ("r").
    Read,
    /// Parent writes the child's stdin ("w").
    Write,
}

/// Buffered, write-only stream feeding a child's stdin.
#[derive(Debug)]
pub struct ChildStdin {
    inner: BufWriter<File>,
}

/// Buffered, read-only stream draining a child's stdout.
#[derive(Debug)]
pub struct ChildStdout {
    inner: BufReader<File>,
}

#[derive(Debug)]
pub enum PipeStream {
    Reader(ChildStdout),
    Writer(ChildStdin),
}

/***
A child launched with both stdin and stdout wired to the parent.

The handles are plain fields so they can be moved to other threads; any
handle still present when the child is closed is flushed and closed first.
A handle taken out of here must be dropped by the caller before closing, or
the child never sees EOF and the close blocks.
 */
#[derive(Debug)]
pub struct Subprocess {
    id: HandleId,
    pid: Pid,
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    outcome: Outcome,
    closed: bool,
}

/***
A child launched with exactly one of stdin or stdout wired to the parent.
 */
#[derive(Debug)]
pub struct PipeHandle {
    id: HandleId,
    pid: Pid,
    direction: Direction,
    stream: Option<PipeStream>,
    outcome: Outcome,
    closed: bool,
}

//  Each manager owns its own registry. Nothing about subprocess bookkeeping
//  is process-wide, so independent managers (and tests) never see each
//  other's children.
pub struct SubprocessManager<R: RegistryAccess = Unsynchronized> {
    registry: R,
    shell: ShellConfig,
}
