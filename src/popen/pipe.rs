//! Close-on-exec pipes and the parent/child ownership handoff.
//!
//! Every end lives in an `OwnedFd` until it is either wrapped into a stream
//! (parent side) or redirected onto a stdio slot (child side), so any early
//! return before the fork releases it.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};

use nix::libc::{STDIN_FILENO, STDOUT_FILENO};

use crate::error::{Error, Result};

pub(crate) struct Pipe {
    reader: OwnedFd,
    writer: OwnedFd,
}

impl Pipe {
    pub fn new() -> Result<Self> {
        let (reader, writer) = pipe_cloexec().map_err(Error::Pipe)?;
        Ok(Self { reader, writer })
    }

    pub fn split(self) -> (OwnedFd, OwnedFd) {
        (self.reader, self.writer)
    }
}

#[cfg(not(target_os = "macos"))]
fn pipe_cloexec() -> nix::Result<(OwnedFd, OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(target_os = "macos")]
fn pipe_cloexec() -> nix::Result<(OwnedFd, OwnedFd)> {
    let (reader, writer) = nix::unistd::pipe()?;
    set_cloexec(reader.as_raw_fd())?;
    set_cloexec(writer.as_raw_fd())?;
    Ok((reader, writer))
}

#[cfg(target_os = "macos")]
fn set_cloexec(fd: RawFd) -> nix::Result<()> {
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Clear close-on-exec so `fd` survives `execv`. Async-signal-safe.
pub(crate) fn remove_cloexec(fd: RawFd) -> nix::Result<()> {
    nix::fcntl::fcntl(fd, nix::fcntl::FcntlArg::F_SETFD(nix::fcntl::FdFlag::empty()))?;
    Ok(())
}

/***
One pipe with each end assigned to exactly one owner.
`target` is the stdio slot the child end is redirected onto.
 */
pub(crate) struct PipeEnds {
    pub parent: OwnedFd,
    pub child: OwnedFd,
    pub target: RawFd,
}

impl PipeEnds {
    /// Parent writes, child reads it as stdin.
    pub fn to_child(pipe: Pipe) -> Self {
        let (reader, writer) = pipe.split();
        PipeEnds { parent: writer, child: reader, target: STDIN_FILENO }
    }

    /// Child writes it as stdout, parent reads.
    pub fn from_child(pipe: Pipe) -> Self {
        let (reader, writer) = pipe.split();
        PipeEnds { parent: reader, child: writer, target: STDOUT_FILENO }
    }

    pub fn raw_fds(&self) -> [RawFd; 2] {
        [self.parent.as_raw_fd(), self.child.as_raw_fd()]
    }
}
