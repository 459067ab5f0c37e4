use nix::unistd;

/// Settings fixed at startup. There are no flags; everything comes from the
/// environment the shell is started in.
#[derive(Debug, Clone)]
pub struct Config {
    /// Print `[cwd]$ ` before each read. Only when stdin is a terminal.
    pub emit_prompt: bool,
}

impl Config {
    pub fn from_env() -> Config {
        Config {
            emit_prompt: unistd::isatty(libc::STDIN_FILENO).unwrap_or(false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config { emit_prompt: false }
    }
}
