extern crate nix;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::env;
use std::path::PathBuf;
use tracing::debug;

use crate::common::*;
use crate::config::Config;
use crate::job;
use crate::sh::Shell;

const HELP: &str = "\
USAGE
-----
Interactive Mode: simply run the executable with no arguments.
Script Mode: run the executable, and pipe your script to it with
             stdin. E.g. quash < scriptname.sh.

SHELL BUILTINS
--------------
1) cd <directory>
    - If no argument given, changes to $HOME.
2) exit
3) quit
4) jobs
    - Prints list of jobs currently running in the background.
5) kill <process id>
    - Sends SIGKILL signal to process with the given process ID.
6) set <environment variable>
    - Only two environment variables recognized: HOME and PATH.
    - E.g. set HOME=/home/johndoe
    - E.g. set PATH=/bin:/usr/bin
    - Directories for PATH must be separated by colons.
7) help
    - Prints this message.
";

#[derive(Debug)]
pub struct Rsh {
    config: Config,
}

impl Rsh {
    pub fn new(config: Config) -> Rsh {
        Rsh { config }
    }
}

fn home_dir() -> Option<PathBuf> {
    match env::var_os("HOME") {
        Some(home) if !home.is_empty() => Some(PathBuf::from(home)),
        _ => dirs::home_dir(),
    }
}

impl Shell for Rsh {
    fn prompt(&self) -> CliResult<String> {
        if !self.config.emit_prompt {
            return Ok(String::new());
        }
        let cwd = env::current_dir()?;
        Ok(format!("[{}]$ ", cwd.display()))
    }

    fn cd(&mut self, args: &[String]) -> CliResult<String> {
        let target = match args.first() {
            Some(dir) => PathBuf::from(dir),
            None => home_dir().ok_or_else(|| builtin_err("cd", "HOME not set"))?,
        };
        env::set_current_dir(&target)
            .map_err(|e| builtin_err("cd", format!("{}: {}", target.display(), e)))?;
        debug!(dir = %target.display(), "changed directory");
        Ok(String::new())
    }

    fn set(&mut self, args: &[String]) -> CliResult<String> {
        let arg = args
            .first()
            .ok_or_else(|| builtin_err("set", "need to specify PATH=... or HOME=..."))?;
        let (name, value) = match arg.find('=') {
            Some(pos) => (&arg[..pos], &arg[pos + 1..]),
            None => return Err(builtin_err("set", "need to specify PATH=... or HOME=...")),
        };
        match name {
            "HOME" | "PATH" if value.contains('\0') => Err(builtin_err(
                "set",
                format!("{}: value must not contain a NUL byte", name),
            )),
            "HOME" | "PATH" => {
                env::set_var(name, value);
                debug!(name, value, "set variable");
                Ok(String::new())
            }
            _ => Err(builtin_err(
                "set",
                format!("{}: only HOME and PATH can be set", name),
            )),
        }
    }

    fn kill(&mut self, args: &[String]) -> CliResult<String> {
        let arg = args
            .first()
            .ok_or_else(|| builtin_err("kill", "must specify process ID of process to kill"))?;
        let pid = arg
            .parse::<i32>()
            .map_err(|_| builtin_err("kill", format!("{}: argument must be a PID", arg)))?;
        signal::kill(Pid::from_raw(pid), Signal::SIGKILL)
            .map_err(|e| builtin_err("kill", format!("({}): {}", pid, e)))?;
        Ok(String::new())
    }

    fn list_jobs(&self) -> CliResult<String> {
        job::with_jobs(|jobs| jobs.render())
    }

    fn help(&self) -> CliResult<String> {
        Ok(HELP.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> Rsh {
        Rsh::new(Config::default())
    }

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_prompt_when_not_interactive() {
        assert_eq!(sh().prompt().unwrap(), "");
    }

    #[test]
    fn prompt_shows_cwd() {
        let sh = Rsh::new(Config { emit_prompt: true });
        let cwd = env::current_dir().unwrap();
        assert_eq!(sh.prompt().unwrap(), format!("[{}]$ ", cwd.display()));
    }

    #[test]
    fn kill_needs_a_pid() {
        let err = sh().kill(&[]).unwrap_err();
        assert!(matches!(err, ShellError::Builtin { name: "kill", .. }));
        let err = sh().kill(&args(&["abc"])).unwrap_err();
        assert!(err.to_string().contains("argument must be a PID"));
    }

    #[test]
    fn set_needs_an_assignment() {
        assert!(matches!(
            sh().set(&[]),
            Err(ShellError::Builtin { name: "set", .. })
        ));
        assert!(sh().set(&args(&["PATH"])).is_err());
        let err = sh().set(&args(&["EDITOR=vi"])).unwrap_err();
        assert!(err.to_string().contains("only HOME and PATH"));
    }

    #[test]
    fn set_rejects_nul_bytes() {
        let before = env::var_os("PATH");
        let err = sh().set(&args(&["PATH=/bin\0/usr/bin"])).unwrap_err();
        assert!(matches!(err, ShellError::Builtin { name: "set", .. }));
        assert!(err.to_string().contains("NUL byte"));
        assert_eq!(env::var_os("PATH"), before);
    }

    #[test]
    fn cd_to_missing_directory_fails() {
        let err = sh().cd(&args(&["/definitely/not/here"])).unwrap_err();
        assert!(err.to_string().starts_with("cd: /definitely/not/here"));
    }

    #[test]
    fn help_lists_builtins() {
        let text = sh().help().unwrap();
        for name in &["cd", "exit", "quit", "jobs", "kill", "set", "help"] {
            assert!(text.contains(name));
        }
        assert!(text.contains("Sends SIGKILL signal"));
        assert!(text.contains("E.g. set PATH=/bin:/usr/bin"));
    }
}
