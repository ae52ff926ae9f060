use std::os::fd::{AsRawFd, OwnedFd};
use std::process::ExitStatus;

use log::{debug, info, warn};
use nix::unistd::{fork, ForkResult, Pid};

use crate::error::{Error, Result};
use crate::popen::child::ChildProcess;
use crate::popen::pipe::{Pipe, PipeEnds};
use crate::popen::registry::{next_handle_id, ProcessRecord};
use crate::popen::status::wait_for;
use crate::popen::{
    ChildStdin, ChildStdout, Direction, HandleId, Outcome, PipeHandle, PipeStream, RegistryAccess, ShellConfig,
    Subprocess, SubprocessManager, Synchronized, Unsynchronized,
};

impl SubprocessManager<Unsynchronized> {
    /***
    Create a single-threaded manager using `/bin/sh -c`.
     */
    pub fn new() -> SubprocessManager<Unsynchronized> {
        SubprocessManager::with_config(ShellConfig::default())
    }
}

impl Default for SubprocessManager<Unsynchronized> {
    fn default() -> Self {
        SubprocessManager::new()
    }
}

impl SubprocessManager<Synchronized> {
    /***
    Create a manager that can be shared across threads.
     */
    pub fn synchronized() -> SubprocessManager<Synchronized> {
        SubprocessManager::with_config(ShellConfig::default())
    }
}

impl<R: RegistryAccess> SubprocessManager<R> {
    pub fn with_config(shell: ShellConfig) -> SubprocessManager<R> {
        SubprocessManager { registry: R::default(), shell }
    }

    pub fn shell(&self) -> &ShellConfig {
        &self.shell
    }

    /***
    Launch `command` through the shell with both its stdin and stdout
    connected to the parent.
     */
    pub fn spawn_bidirectional(&self, command: &str) -> Result<Subprocess> {
        // Two pipes: with a single one the parent would read back its own writes.
        let stdin_pipe = PipeEnds::to_child(Pipe::new()?);
        let stdout_pipe = PipeEnds::from_child(Pipe::new()?);

        let (id, pid, mut parent_ends) = self.fork_child(command, vec![stdout_pipe, stdin_pipe])?;
        let stdin = ChildStdin::new(parent_ends.remove(1));
        let stdout = ChildStdout::new(parent_ends.remove(0));

        info!("{}: spawned {:?} (stdin fd {}, stdout fd {})", pid, command, stdin.as_raw_fd(), stdout.as_raw_fd());
        Ok(Subprocess::new(id, pid, stdin, stdout))
    }

    /***
    Launch `command` through the shell with only its stdout (`Direction::Read`)
    or only its stdin (`Direction::Write`) connected to the parent.
     */
    pub fn spawn_unidirectional(&self, command: &str, direction: Direction) -> Result<PipeHandle> {
        let ends = match direction {
            Direction::Read => PipeEnds::from_child(Pipe::new()?),
            Direction::Write => PipeEnds::to_child(Pipe::new()?),
        };

        let (id, pid, mut parent_ends) = self.fork_child(command, vec![ends])?;
        let parent_end = parent_ends.remove(0);
        let stream = match direction {
            Direction::Read => PipeStream::Reader(ChildStdout::new(parent_end)),
            Direction::Write => PipeStream::Writer(ChildStdin::new(parent_end)),
        };

        info!("{}: spawned {:?} ({:?}, fd {})", pid, command, direction, stream.as_raw_fd());
        Ok(PipeHandle::new(id, pid, stream))
    }

    /***
    Flush and close both handles, wait for the child and record how it ended.
    Fails with `Error::NotTracked` if this handle was never spawned here or
    has already been closed; nothing is touched in that case.
     */
    pub fn close_bidirectional(&self, child: &mut Subprocess) -> Result<ExitStatus> {
        let pid = self.registry.with(|r| r.begin_reap(child.id()))?;
        child.close_streams();

        let (outcome, status) = self.reap(child.id(), pid);
        child.mark_closed(outcome);
        status
    }

    pub fn close_unidirectional(&self, handle: &mut PipeHandle) -> Result<ExitStatus> {
        let pid = self.registry.with(|r| r.begin_reap(handle.id()))?;
        handle.close_stream();

        let (outcome, status) = self.reap(handle.id(), pid);
        handle.mark_closed(outcome);
        status
    }

    pub fn is_tracked(&self, id: HandleId) -> bool {
        self.registry.with(|r| r.contains(id))
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.registry.with(|r| r.pids())
    }

    pub fn len(&self) -> usize {
        self.registry.with(|r| r.len())
    }

    pub fn is_empty(&self) -> bool {
        self.registry.with(|r| r.is_empty())
    }

    // Snapshot, fork and registration happen under one registry access, so a
    // concurrent spawn on a synchronized manager always sees a complete set
    // of descriptors to close. Returns the parent ends in the order given.
    fn fork_child(&self, command: &str, ends: Vec<PipeEnds>) -> Result<(HandleId, Pid, Vec<OwnedFd>)> {
        self.registry.with(|registry| {
            let child = ChildProcess::new(&self.shell, command, registry.inherited_fds(), &ends)?;

            // SAFETY: the child branch only runs async-signal-safe calls
            // (see ChildProcess::exec) and never returns.
            match unsafe { fork() }.map_err(Error::Fork)? {
                ForkResult::Child => child.exec(),
                ForkResult::Parent { child: pid } => {
                    let id = next_handle_id();
                    let parent_ends = ends.into_iter().map(|e| {
                        debug!("{}: closing child end fd {} in parent", pid, e.child.as_raw_fd());
                        e.parent
                    }).collect::<Vec<_>>();

                    let fds = parent_ends.iter().map(|fd| fd.as_raw_fd()).collect();
                    if let Some(stale) = registry.insert(ProcessRecord::new(id, pid, fds)) {
                        warn!("{}: pid reused, forgetting handle {} that was reaped elsewhere", pid, stale.id);
                    }
                    Ok((id, pid, parent_ends))
                }
            }
        })
    }

    // The registry lock is not held while blocked in waitpid.
    fn reap(&self, id: HandleId, pid: Pid) -> (Outcome, Result<ExitStatus>) {
        let waited = wait_for(pid);
        let outcome = waited.as_ref().map(|status| Outcome::from(*status)).unwrap_or(Outcome::Unknown);

        // removed whether or not the wait worked
        if self.registry.with(|r| r.remove(id)).is_some() {
            info!("{}: reaped, {:?}", pid, outcome);
        }

        (outcome, waited.map_err(|source| Error::Wait { pid, source }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, Write};

    fn instance() -> SubprocessManager {
        SubprocessManager::new()
    }

    #[test]
    fn no_children_after_creation() {
        let manager = instance();
        assert!(manager.is_empty());
        assert_eq!(manager.shell(), &ShellConfig::default());
    }

    #[test]
    fn spawning_registers_and_closing_deregisters() {
        let manager = instance();
        let mut child = manager.spawn_bidirectional("cat").unwrap();
        assert_eq!(manager.len(), 1);
        assert!(manager.is_tracked(child.id()));
        assert_eq!(manager.pids(), vec![child.pid()]);

        let status = manager.close_bidirectional(&mut child).unwrap();
        assert!(status.success());
        assert!(manager.is_empty());
        assert_eq!(child.outcome(), Outcome::Exited(0));
        assert!(child.stdin.is_none() && child.stdout.is_none());
    }

    #[test]
    fn closing_twice_is_not_tracked() {
        let manager = instance();
        let mut child = manager.spawn_bidirectional("true").unwrap();
        manager.close_bidirectional(&mut child).unwrap();

        let second = manager.close_bidirectional(&mut child);
        assert!(matches!(second, Err(Error::NotTracked { id }) if id == child.id()));
        assert_eq!(child.outcome(), Outcome::Exited(0));
    }

    #[test]
    fn closing_on_another_manager_is_not_tracked() {
        let manager = instance();
        let stranger = instance();
        let mut handle = manager.spawn_unidirectional("true", Direction::Read).unwrap();

        assert!(matches!(stranger.close_unidirectional(&mut handle), Err(Error::NotTracked { .. })));
        assert!(handle.is_open());
        assert_eq!(manager.len(), 1);

        manager.close_unidirectional(&mut handle).unwrap();
    }

    #[test]
    fn unidirectional_read_sees_child_stdout() {
        let manager = instance();
        let mut handle = manager.spawn_unidirectional("echo foobar", Direction::Read).unwrap();
        let mut line = String::new();
        handle.reader().unwrap().read_line(&mut line).unwrap();
        assert_eq!(line, "foobar\n");

        let status = manager.close_unidirectional(&mut handle).unwrap();
        assert_eq!(status.code(), Some(0));
    }

    #[test]
    fn unidirectional_write_feeds_child_stdin() {
        let manager = instance();
        let mut handle = manager.spawn_unidirectional(r#"read line; test "$line" = hello"#, Direction::Write).unwrap();
        writeln!(handle, "hello").unwrap();

        // close flushes the pending line before waiting
        let status = manager.close_unidirectional(&mut handle).unwrap();
        assert!(status.success());
    }

    #[test]
    fn nul_in_command_spawns_nothing() {
        let manager = instance();
        let result = manager.spawn_bidirectional("echo \0");
        assert!(matches!(result, Err(Error::InvalidCommand(_))));
        assert!(manager.is_empty());
    }
}
