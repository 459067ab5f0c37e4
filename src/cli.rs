extern crate nix;

use nix::unistd;
use std::io::{self, BufRead, BufReader, Read, Write};
use tracing::debug;

use crate::common::*;
use crate::config::Config;
use crate::exec;
use crate::parser;
use crate::rsh::Rsh;
use crate::sh::Shell;
use crate::signal::{self, SigchldBlock};

/// fd 0 read without std's own buffer, so the run loop can tell whether a
/// line is already waiting before it sleeps in poll.
struct RawStdin;

impl Read for RawStdin {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        unistd::read(libc::STDIN_FILENO, buf).map_err(|e| match e.as_errno() {
            Some(errno) => io::Error::from_raw_os_error(errno as i32),
            None => io::Error::new(io::ErrorKind::Other, e),
        })
    }
}

pub struct Cli {
    sh: Rsh,
    stdin: BufReader<RawStdin>,
    // SIGCHLD stays blocked outside of `signal::await_input`
    _gate: SigchldBlock,
}

impl Cli {
    pub fn new(config: Config) -> CliResult<Cli> {
        signal::install_reaper(config.emit_prompt)?;
        let gate = SigchldBlock::new().map_err(|e| match e {
            ShellError::Sys(_, e) => ShellError::Signal(e),
            e => e,
        })?;
        Ok(Cli {
            sh: Rsh::new(config),
            stdin: BufReader::new(RawStdin),
            _gate: gate,
        })
    }

    fn dispatch(&mut self, line: &str) -> CliResult<Flow> {
        let pipeline = parser::parse(line)?;
        debug!(stages = pipeline.stages.len(), background = pipeline.background, "parsed");
        exec::execute(&mut self.sh, &pipeline)
    }

    /// Reads raw bytes up to a newline. Bytes that are not UTF-8 are
    /// replaced rather than failing the read.
    fn read_line(&mut self, buf: &mut Vec<u8>) -> CliResult<usize> {
        signal::await_input(libc::STDIN_FILENO, !self.stdin.buffer().is_empty())?;
        Ok(self.stdin.read_until(b'\n', buf)?)
    }

    /// Runs until `exit`, `quit` or end of input.
    pub fn go(&mut self) {
        let mut buf = Vec::new();
        loop {
            match self.sh.prompt() {
                Ok(p) => print!("{}", p),
                Err(e) => eprintln!("quash: {}", e),
            }
            let _ = io::stdout().flush();

            buf.clear();
            match self.read_line(&mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                // the descriptor itself failed; retrying would spin
                Err(e) => {
                    eprintln!("quash: {}", e);
                    break;
                }
            }
            let text = String::from_utf8_lossy(&buf);
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            match self.dispatch(line) {
                Ok(Flow::Continue(o)) => print!("{}", o),
                Ok(Flow::Exit) => break,
                Err(e) => eprintln!("quash: {}", e),
            }
            let _ = io::stdout().flush();
        }
        let _ = io::stdout().flush();
    }
}
