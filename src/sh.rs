use crate::common::*;

/// Builtin bodies. Everything here runs inside the shell process: no fork,
/// no pipes, no redirection. Each returns the text to print.
pub trait Shell {
    fn prompt(&self) -> CliResult<String>;
    fn cd(&mut self, args: &[String]) -> CliResult<String>;
    fn set(&mut self, args: &[String]) -> CliResult<String>;
    fn kill(&mut self, args: &[String]) -> CliResult<String>;
    fn list_jobs(&self) -> CliResult<String>;
    fn help(&self) -> CliResult<String>;
}
