extern crate libc;
extern crate nix;

use nix::errno::Errno;
use nix::poll::{self, PollFd, PollFlags};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::wait::{self, WaitPidFlag, WaitStatus};
use nix::unistd::{self, Pid};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::*;
use crate::job;

static INTERACTIVE: AtomicBool = AtomicBool::new(false);

fn sigchld() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set
}

/// Keeps SIGCHLD blocked for as long as it lives, then puts the previous
/// mask back.
pub struct SigchldBlock {
    old: SigSet,
}

impl SigchldBlock {
    pub fn new() -> CliResult<SigchldBlock> {
        let mut old = SigSet::empty();
        signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&sigchld()), Some(&mut old))
            .map_err(sys("sigprocmask"))?;
        Ok(SigchldBlock { old })
    }
}

impl Drop for SigchldBlock {
    fn drop(&mut self) {
        let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.old), None);
    }
}

/// Forked children start with the shell's mask; they must not exec with
/// SIGCHLD blocked.
pub fn unblock_in_child() -> nix::Result<()> {
    signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&sigchld()), None)
}

pub fn install_reaper(interactive: bool) -> CliResult {
    INTERACTIVE.store(interactive, Ordering::SeqCst);
    let action = SigAction::new(
        SigHandler::Handler(handle_sigchld),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }.map_err(ShellError::Signal)?;
    Ok(())
}

/// Lets pending child notifications through, and when `buffered` is false
/// also sleeps in poll(2) until `fd` is readable. This is the only place the
/// reaper can run.
pub fn await_input(fd: RawFd, buffered: bool) -> CliResult {
    let mask = sigchld();
    signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None).map_err(sys("sigprocmask"))?;
    let res = if buffered {
        Ok(())
    } else {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
        loop {
            match poll::poll(&mut fds, -1) {
                Err(e) if e.as_errno() == Some(Errno::EINTR) => continue,
                r => break r.map(drop),
            }
        }
    };
    signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(sys("sigprocmask"))?;
    res.map_err(sys("poll"))
}

pub extern "C" fn handle_sigchld(_signal: libc::c_int) {
    loop {
        match wait::waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(status) => {
                let pid = match status.pid() {
                    Some(pid) => pid,
                    None => continue,
                };
                // foreground children and non-leader members end up here too
                if let Some(job) = job::reap_leader(pid) {
                    let lead = if INTERACTIVE.load(Ordering::SeqCst) {
                        "\n"
                    } else {
                        ""
                    };
                    let msg = format!(
                        "{}[{}] {} finished {}\n",
                        lead, job.id, job.leader, job.description
                    );
                    let _ = unistd::write(libc::STDOUT_FILENO, msg.as_bytes());
                }
            }
        }
    }
}
