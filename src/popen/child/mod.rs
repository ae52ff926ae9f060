/***
* Child-side setup
* Everything the forked child needs is computed in the parent, before fork,
* so the child itself never allocates, locks or logs.
***/
use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::raw::c_char;

mod child_process;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) struct Redirect {
    pub fd: RawFd,
    pub target: RawFd,
}

pub(crate) struct ChildProcess {
    shell: CString,
    // shell name, command flag, command line; owns what argv_ptrs points at
    #[allow(dead_code)]
    argv: Vec<CString>,
    // null-terminated pointers into `argv`
    argv_ptrs: Vec<*const c_char>,
    // parent-side descriptors of earlier spawns
    inherited: Vec<RawFd>,
    // parent ends of this spawn's pipes
    unused: Vec<RawFd>,
    redirects: Vec<Redirect>,
    exec_failure_code: i32,
}
