use std::ffi::CString;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::raw::c_char;
use std::ptr;

use nix::fcntl::{fcntl, FcntlArg};
use nix::libc::{self, SIGPIPE, SIG_DFL, STDERR_FILENO};
use nix::unistd::{close, dup2};

use crate::error::Result;
use crate::popen::child::{ChildProcess, Redirect};
use crate::popen::pipe::{remove_cloexec, PipeEnds};
use crate::popen::ShellConfig;

impl ChildProcess {
    /***
    Plan the child side of a spawn.
    @arg inherited: descriptors recorded for earlier, still-registered spawns
    @arg ends: this spawn's pipes, already split between parent and child
     */
    pub fn new(shell: &ShellConfig, command: &str, inherited: Vec<RawFd>, ends: &[PipeEnds]) -> Result<ChildProcess> {
        let shell_path = CString::new(shell.path.as_os_str().as_bytes())?;
        let argv = vec![
            CString::new(shell.name.as_str())?,
            CString::new(shell.command_flag.as_str())?,
            CString::new(command)?,
        ];
        let mut argv_ptrs = argv.iter().map(|arg| arg.as_ptr()).collect::<Vec<*const c_char>>();
        argv_ptrs.push(ptr::null());

        // A recorded descriptor may belong to a handle the caller already
        // dropped, and its number may now be one of ours.
        let own = ends.iter().flat_map(|e| e.raw_fds()).collect::<Vec<RawFd>>();
        let inherited = inherited.into_iter().filter(|fd| !own.contains(fd)).collect();

        Ok(ChildProcess {
            shell: shell_path,
            argv,
            argv_ptrs,
            inherited,
            unused: ends.iter().map(|e| e.parent.as_raw_fd()).collect(),
            redirects: ends.iter().map(|e| Redirect { fd: e.child.as_raw_fd(), target: e.target }).collect(),
            exec_failure_code: shell.exec_failure_code,
        })
    }

    /***
    Runs in the freshly forked child and never returns.
    Only async-signal-safe calls from here on: close, fcntl, dup2, signal,
    execv, _exit.
     */
    pub fn exec(mut self) -> ! {
        for fd in &self.inherited {
            let _ = close(*fd);
        }
        for fd in &self.unused {
            let _ = close(*fd);
        }

        if self.relocate_clobbered().is_err() || self.redirect().is_err() {
            self.fail();
        }

        // The Rust runtime ignores SIGPIPE and an ignored disposition
        // survives exec. A shell child expects the default.
        // SAFETY: signal(2) is async-signal-safe and SIG_DFL installs no handler.
        unsafe { libc::signal(SIGPIPE, SIG_DFL) };

        // SAFETY: both pointers come from CStrings owned by `self`, and
        // argv_ptrs is null-terminated. The environment is inherited as is.
        unsafe { libc::execv(self.shell.as_ptr(), self.argv_ptrs.as_ptr()) };

        // exec only returns on failure
        self.fail()
    }

    fn fail(&self) -> ! {
        // SAFETY: _exit(2) is async-signal-safe and skips the parent's
        // atexit handlers and stdio buffers, which the child must not run.
        unsafe { libc::_exit(self.exec_failure_code) }
    }

    // A child end sitting on another redirect's target slot would be
    // overwritten by that dup2, so move it above stderr first.
    fn relocate_clobbered(&mut self) -> nix::Result<()> {
        for i in 0..self.redirects.len() {
            let Redirect { fd, target } = self.redirects[i];
            let clobbered = self.redirects.iter().any(|r| r.target == fd && r.target != target);
            if clobbered {
                let moved = fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(STDERR_FILENO + 1))?;
                let _ = close(fd);
                self.redirects[i].fd = moved;
            }
        }
        Ok(())
    }

    fn redirect(&self) -> nix::Result<()> {
        for r in &self.redirects {
            if r.fd == r.target {
                // already in place; only the close-on-exec flag has to go
                remove_cloexec(r.fd)?;
            } else {
                dup2(r.fd, r.target)?;
                let _ = close(r.fd);
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn argv(&self) -> Vec<&str> {
        self.argv.iter().map(|a| a.to_str().unwrap()).collect()
    }
}
