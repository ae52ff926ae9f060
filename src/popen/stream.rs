use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::str::FromStr;

use log::warn;
use nix::unistd::Pid;

use crate::error::Error;
use crate::popen::{ChildStdin, ChildStdout, Direction, HandleId, Outcome, PipeHandle, PipeStream, Subprocess};

impl FromStr for Direction {
    type Err = Error;

    /***
    Parse a popen mode string: "r" reads from the child, "w" writes to it.
     */
    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode {
            "r" => Ok(Direction::Read),
            "w" => Ok(Direction::Write),
            other => Err(Error::InvalidMode(other.to_string())),
        }
    }
}

impl ChildStdin {
    pub(crate) fn new(fd: OwnedFd) -> ChildStdin {
        ChildStdin { inner: BufWriter::new(File::from(fd)) }
    }
}

impl Write for ChildStdin {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl AsRawFd for ChildStdin {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.get_ref().as_raw_fd()
    }
}

impl ChildStdout {
    pub(crate) fn new(fd: OwnedFd) -> ChildStdout {
        ChildStdout { inner: BufReader::new(File::from(fd)) }
    }
}

impl Read for ChildStdout {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl BufRead for ChildStdout {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt)
    }
}

impl AsRawFd for ChildStdout {
    fn as_raw_fd(&self) -> RawFd {
        self.inner.get_ref().as_raw_fd()
    }
}

impl PipeStream {
    pub fn direction(&self) -> Direction {
        match self {
            PipeStream::Reader(_) => Direction::Read,
            PipeStream::Writer(_) => Direction::Write,
        }
    }

    /***
    Flush whatever is still buffered, then drop (and so close) the descriptor.
    Write errors here are not fatal: the child still has to be reaped.
     */
    pub(crate) fn close(self, pid: Pid) {
        if let PipeStream::Writer(mut stdin) = self {
            if let Err(e) = stdin.flush() {
                warn!("{}: could not flush stdin before close: {}", pid, e);
            }
        }
    }
}

impl AsRawFd for PipeStream {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            PipeStream::Reader(stdout) => stdout.as_raw_fd(),
            PipeStream::Writer(stdin) => stdin.as_raw_fd(),
        }
    }
}

impl Subprocess {
    pub(crate) fn new(id: HandleId, pid: Pid, stdin: ChildStdin, stdout: ChildStdout) -> Subprocess {
        Subprocess { id, pid, stdin: Some(stdin), stdout: Some(stdout), outcome: Outcome::Unknown, closed: false }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /***
    Unknown until the child has been closed.
     */
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub(crate) fn mark_closed(&mut self, outcome: Outcome) {
        self.outcome = outcome;
        self.closed = true;
    }

    pub(crate) fn close_streams(&mut self) {
        if let Some(stdin) = self.stdin.take() {
            PipeStream::Writer(stdin).close(self.pid);
        }
        if let Some(stdout) = self.stdout.take() {
            PipeStream::Reader(stdout).close(self.pid);
        }
    }
}

impl Drop for Subprocess {
    fn drop(&mut self) {
        if !self.closed {
            warn!("{}: dropped without being closed; the child will not be reaped", self.pid);
        }
    }
}

impl PipeHandle {
    pub(crate) fn new(id: HandleId, pid: Pid, stream: PipeStream) -> PipeHandle {
        PipeHandle { id, pid, direction: stream.direction(), stream: Some(stream), outcome: Outcome::Unknown, closed: false }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn reader(&mut self) -> Option<&mut ChildStdout> {
        match self.stream.as_mut() {
            Some(PipeStream::Reader(stdout)) => Some(stdout),
            _ => None,
        }
    }

    pub fn writer(&mut self) -> Option<&mut ChildStdin> {
        match self.stream.as_mut() {
            Some(PipeStream::Writer(stdin)) => Some(stdin),
            _ => None,
        }
    }

    pub(crate) fn mark_closed(&mut self, outcome: Outcome) {
        self.outcome = outcome;
        self.closed = true;
    }

    pub(crate) fn close_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.close(self.pid);
        }
    }

    fn unavailable(&self, wanted: Direction) -> io::Error {
        let reason = if self.is_open() {
            format!("{:?} on a {:?} pipe", wanted, self.direction)
        } else {
            "pipe already closed".to_string()
        };
        io::Error::new(io::ErrorKind::Unsupported, reason)
    }
}

impl Read for PipeHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.reader() {
            Some(stdout) => stdout.read(buf),
            None => Err(self.unavailable(Direction::Read)),
        }
    }
}

impl Write for PipeHandle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.writer() {
            Some(stdin) => stdin.write(buf),
            None => Err(self.unavailable(Direction::Write)),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer() {
            Some(stdin) => stdin.flush(),
            None => Err(self.unavailable(Direction::Write)),
        }
    }
}

impl Drop for PipeHandle {
    fn drop(&mut self) {
        if !self.closed {
            warn!("{}: dropped without being closed; the child will not be reaped", self.pid);
        }
    }
}
