extern crate libc;
extern crate nix;

use nix::errno::Errno;
use nix::fcntl::{self, FcntlArg};
use nix::sys::wait;
use nix::unistd::{self, AccessFlags, ForkResult, Pid};
use std::convert::Infallible;
use std::env;
use std::ffi::{CStr, CString, OsStr};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::builtin::Builtin;
use crate::common::*;
use crate::job;
use crate::parser::{Pipeline, Stage};
use crate::sh::Shell;
use crate::signal::{self, SigchldBlock};

#[derive(Debug, Error, PartialEq)]
pub enum ResolveError {
    #[error("file \"{}\" does not exist", .0.display())]
    NotFound(PathBuf),
    #[error("file \"{}\" is not an executable", .0.display())]
    NotExecutable(PathBuf),
    #[error("{0}: command not found in PATH")]
    NotInPath(String),
}

/// How a parsed pipeline is going to run.
#[derive(Debug, PartialEq)]
enum Plan {
    Builtin(Builtin),
    Spawn,
}

fn plan(pipeline: &Pipeline) -> CliResult<Plan> {
    let builtins: Vec<Option<Builtin>> = pipeline
        .stages
        .iter()
        .map(|s| Builtin::classify(s.program()))
        .collect();
    match builtins.as_slice() {
        [Some(b)] => Ok(Plan::Builtin(*b)),
        _ => match builtins.iter().flatten().next() {
            Some(b) => Err(ShellError::BuiltinInPipeline(b.name())),
            None => Ok(Plan::Spawn),
        },
    }
}

pub fn execute(sh: &mut dyn Shell, pipeline: &Pipeline) -> CliResult<Flow> {
    match plan(pipeline)? {
        Plan::Builtin(b) => b.run(sh, &pipeline.stages[0].argv[1..]),
        Plan::Spawn => {
            spawn(pipeline)?;
            ok("")
        }
    }
}

/// Saved copies of the shell's stdin and stdout, put back on drop.
/// All wiring happens in the children today; this keeps any parent-side
/// redirection from leaking past the pipeline.
struct StdioGuard {
    saved: [(RawFd, RawFd); 2],
}

impl StdioGuard {
    fn save() -> CliResult<StdioGuard> {
        let stdin = dup_cloexec(libc::STDIN_FILENO)?;
        let stdout = match dup_cloexec(libc::STDOUT_FILENO) {
            Ok(fd) => fd,
            Err(e) => {
                let _ = unistd::close(stdin);
                return Err(e);
            }
        };
        Ok(StdioGuard {
            saved: [(stdin, libc::STDIN_FILENO), (stdout, libc::STDOUT_FILENO)],
        })
    }
}

fn dup_cloexec(fd: RawFd) -> CliResult<RawFd> {
    fcntl::fcntl(fd, FcntlArg::F_DUPFD_CLOEXEC(0)).map_err(sys("dup"))
}

impl Drop for StdioGuard {
    fn drop(&mut self) {
        for &(saved, fd) in self.saved.iter() {
            if let Err(e) = unistd::dup2(saved, fd) {
                warn!(fd, error = %e, "failed to restore descriptor");
            }
            let _ = unistd::close(saved);
        }
    }
}

/// Where a forked stage reads and writes before its own redirects apply.
struct Wiring {
    /// Read end of the previous stage's pipe; `None` keeps the shell's stdin.
    stdin: Option<RawFd>,
    /// Fresh pipe to the next stage as `(read, write)`; `None` on the last stage.
    pipe: Option<(RawFd, RawFd)>,
    /// Process group to join when running in the background; pid 0 starts a new one.
    pgid: Option<Pid>,
}

fn close_quietly(fd: Option<RawFd>) {
    if let Some(fd) = fd {
        let _ = unistd::close(fd);
    }
}

fn spawn(pipeline: &Pipeline) -> CliResult {
    let _stdio = StdioGuard::save()?;
    let _block = SigchldBlock::new()?;
    io::stdout().flush()?;
    io::stderr().flush()?;

    let last = pipeline.stages.len() - 1;
    let mut pids: Vec<Pid> = Vec::with_capacity(pipeline.stages.len());
    let mut stdin: Option<RawFd> = None;
    let mut failure = None;

    for (i, stage) in pipeline.stages.iter().enumerate() {
        let pipe = if i < last {
            match unistd::pipe() {
                Ok(p) => Some(p),
                Err(e) => {
                    failure = Some(ShellError::Sys("pipe", e));
                    break;
                }
            }
        } else {
            None
        };
        let pgid = if pipeline.background {
            Some(pids.first().copied().unwrap_or_else(|| Pid::from_raw(0)))
        } else {
            None
        };

        // the shell is single-threaded, so the child may run arbitrary code
        match unsafe { unistd::fork() } {
            Ok(ForkResult::Child) => run_stage(stage, Wiring { stdin, pipe, pgid }),
            Ok(ForkResult::Parent { child, .. }) => {
                if let Some(pgid) = pgid {
                    let group = if pgid.as_raw() == 0 { child } else { pgid };
                    // the child does the same; whichever runs first wins
                    let _ = unistd::setpgid(child, group);
                }
                debug!(pid = %child, stage = %stage.raw, "forked stage");
                pids.push(child);
                close_quietly(stdin);
                stdin = pipe.map(|(read, write)| {
                    let _ = unistd::close(write);
                    read
                });
            }
            Err(e) => {
                if let Some((read, write)) = pipe {
                    let _ = unistd::close(read);
                    let _ = unistd::close(write);
                }
                failure = Some(ShellError::Fork(e));
                break;
            }
        }
    }
    close_quietly(stdin);

    if let Some(e) = failure {
        warn!(spawned = pids.len(), error = %e, "pipeline aborted");
        if !pipeline.background {
            wait_all(&pids);
        }
        return Err(e);
    }

    if pipeline.background {
        let leader = pids[0];
        let (id, active) = job::with_jobs(|jobs| {
            let id = jobs.insert(leader, pipeline.description());
            (id, jobs.len())
        })?;
        info!(id, leader = %leader, active, "registered background job");
        println!("[{}] {} running in background.", id, leader);
    } else {
        wait_all(&pids);
    }
    Ok(())
}

fn wait_all(pids: &[Pid]) {
    for &pid in pids {
        loop {
            match wait::waitpid(pid, None) {
                Ok(status) => {
                    debug!(pid = %pid, ?status, "stage finished");
                    break;
                }
                Err(e) if e.as_errno() == Some(Errno::EINTR) => continue,
                // already collected
                Err(e) if e.as_errno() == Some(Errno::ECHILD) => break,
                Err(e) => {
                    warn!(pid = %pid, error = %e, "waitpid failed");
                    break;
                }
            }
        }
    }
}

/// Child side of a fork. Never returns.
fn run_stage(stage: &Stage, wiring: Wiring) -> ! {
    let code = match exec_stage(stage, wiring) {
        Err(ShellError::Resolve(e @ ResolveError::NotFound(_)))
        | Err(ShellError::Resolve(e @ ResolveError::NotInPath(_))) => {
            eprintln!("quash: {}", e);
            127
        }
        Err(e) => {
            eprintln!("quash: {}", e);
            126
        }
        Ok(never) => match never {},
    };
    unsafe { libc::_exit(code) }
}

fn exec_stage(stage: &Stage, wiring: Wiring) -> CliResult<Infallible> {
    signal::unblock_in_child().map_err(sys("sigprocmask"))?;

    if let Some(fd) = wiring.stdin {
        unistd::dup2(fd, libc::STDIN_FILENO).map_err(sys("dup2"))?;
        unistd::close(fd).map_err(sys("close"))?;
    }
    if let Some((read, write)) = wiring.pipe {
        unistd::close(read).map_err(sys("close"))?;
        unistd::dup2(write, libc::STDOUT_FILENO).map_err(sys("dup2"))?;
        unistd::close(write).map_err(sys("close"))?;
    }
    if let Some(pgid) = wiring.pgid {
        // new job belongs to 1 process group; the parent sets it too
        let _ = unistd::setpgid(Pid::from_raw(0), pgid);
    }

    if let Some(path) = &stage.input {
        let file = File::open(path).map_err(|e| redirect_err(path, e))?;
        unistd::dup2(file.as_raw_fd(), libc::STDIN_FILENO).map_err(sys("dup2"))?;
    }
    if let Some(path) = &stage.output {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| redirect_err(path, e))?;
        unistd::dup2(file.as_raw_fd(), libc::STDOUT_FILENO).map_err(sys("dup2"))?;
    }

    let cwd = env::current_dir()?;
    let program = resolve(stage.program(), env::var_os("PATH").as_deref(), &cwd)?;

    let path = to_cstring(program.as_os_str())?;
    let args = stage
        .argv
        .iter()
        .map(|a| to_cstring(OsStr::new(a)))
        .collect::<CliResult<Vec<_>>>()?;
    let argv: Vec<&CStr> = args.iter().map(|a| a.as_c_str()).collect();
    unistd::execv(&path, &argv).map_err(sys("execv"))
}

fn redirect_err(path: &str, e: io::Error) -> ShellError {
    ShellError::Io(io::Error::new(
        e.kind(),
        format!("couldn't open \"{}\": {}", path, e),
    ))
}

fn to_cstring(s: &OsStr) -> CliResult<CString> {
    CString::new(s.as_bytes()).map_err(|e| ShellError::Io(io::Error::new(io::ErrorKind::InvalidInput, e)))
}

fn check_executable(path: PathBuf) -> Result<PathBuf, ResolveError> {
    if unistd::access(&path, AccessFlags::F_OK).is_err() {
        return Err(ResolveError::NotFound(path));
    }
    if !path.is_file() || unistd::access(&path, AccessFlags::X_OK).is_err() {
        return Err(ResolveError::NotExecutable(path));
    }
    Ok(path)
}

/// Finds the file to exec for `name`. Absolute and `./` names are taken as
/// given; anything else is searched for in `path_var`, first match wins.
pub fn resolve(name: &str, path_var: Option<&OsStr>, cwd: &Path) -> Result<PathBuf, ResolveError> {
    if name.starts_with('/') {
        return check_executable(PathBuf::from(name));
    }
    if let Some(rest) = name.strip_prefix("./") {
        return check_executable(cwd.join(rest));
    }
    let dirs = match path_var {
        Some(p) => env::split_paths(p).collect(),
        None => Vec::new(),
    };
    dirs.into_iter()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| {
            candidate.is_file() && unistd::access(candidate, AccessFlags::X_OK).is_ok()
        })
        .ok_or_else(|| ResolveError::NotInPath(name.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn script(dir: &Path, name: &str, mode: u32) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
        path
    }

    #[test]
    fn plan_single_builtin() {
        let p = parse("cd /tmp").unwrap();
        assert_eq!(plan(&p).unwrap(), Plan::Builtin(Builtin::Cd));
        let p = parse("jobs &").unwrap();
        assert_eq!(plan(&p).unwrap(), Plan::Builtin(Builtin::Jobs));
    }

    #[test]
    fn plan_refuses_builtin_in_pipeline() {
        let p = parse("cd . | ls").unwrap();
        assert!(matches!(plan(&p), Err(ShellError::BuiltinInPipeline("cd"))));
        let p = parse("ls | jobs").unwrap();
        assert!(matches!(plan(&p), Err(ShellError::BuiltinInPipeline("jobs"))));
    }

    #[test]
    fn plan_spawns_programs() {
        let p = parse("cat < in.txt | grep foo | wc -l").unwrap();
        assert_eq!(plan(&p).unwrap(), Plan::Spawn);
        let p = parse("ls").unwrap();
        assert_eq!(plan(&p).unwrap(), Plan::Spawn);
    }

    #[test]
    fn resolve_absolute_path() {
        let dir = TempDir::new().unwrap();
        let exe = script(dir.path(), "run", 0o755);
        let plain = script(dir.path(), "data", 0o644);
        let cwd = dir.path();

        assert_eq!(resolve(exe.to_str().unwrap(), None, cwd), Ok(exe.clone()));
        assert_eq!(
            resolve(plain.to_str().unwrap(), None, cwd),
            Err(ResolveError::NotExecutable(plain.clone()))
        );
        let missing = dir.path().join("missing");
        assert_eq!(
            resolve(missing.to_str().unwrap(), None, cwd),
            Err(ResolveError::NotFound(missing.clone()))
        );
    }

    #[test]
    fn resolve_relative_to_cwd() {
        let dir = TempDir::new().unwrap();
        let exe = script(dir.path(), "tool", 0o755);
        assert_eq!(resolve("./tool", None, dir.path()), Ok(exe));
        assert_eq!(
            resolve("./nope", None, dir.path()),
            Err(ResolveError::NotFound(dir.path().join("nope")))
        );
    }

    #[test]
    fn resolve_searches_path_in_order() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        script(first.path(), "tool", 0o644);
        let wanted = script(second.path(), "tool", 0o755);
        let also = script(first.path(), "other", 0o755);
        script(second.path(), "other", 0o755);

        let path_var = env::join_paths(vec![first.path(), second.path()]).unwrap();
        let cwd = Path::new("/");
        assert_eq!(resolve("tool", Some(path_var.as_os_str()), cwd), Ok(wanted));
        assert_eq!(resolve("other", Some(path_var.as_os_str()), cwd), Ok(also));
        assert_eq!(
            resolve("absent", Some(path_var.as_os_str()), cwd),
            Err(ResolveError::NotInPath("absent".to_owned()))
        );
    }

    #[test]
    fn resolve_without_path_finds_nothing() {
        assert_eq!(
            resolve("sh", None, Path::new("/")),
            Err(ResolveError::NotInPath("sh".to_owned()))
        );
        assert_eq!(
            resolve("sh", Some(OsStr::new("")), Path::new("/")),
            Err(ResolveError::NotInPath("sh".to_owned()))
        );
    }
}
