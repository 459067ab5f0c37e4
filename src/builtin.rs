use crate::common::*;
use crate::sh::Shell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Cd,
    Set,
    Kill,
    Jobs,
    Help,
    Exit,
    Quit,
}

impl Builtin {
    pub fn classify(name: &str) -> Option<Builtin> {
        let b = match name {
            "cd" => Builtin::Cd,
            "set" => Builtin::Set,
            "kill" => Builtin::Kill,
            "jobs" => Builtin::Jobs,
            "help" => Builtin::Help,
            "exit" => Builtin::Exit,
            "quit" => Builtin::Quit,
            _ => return None,
        };
        Some(b)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Cd => "cd",
            Builtin::Set => "set",
            Builtin::Kill => "kill",
            Builtin::Jobs => "jobs",
            Builtin::Help => "help",
            Builtin::Exit => "exit",
            Builtin::Quit => "quit",
        }
    }

    /// `args` excludes the builtin's own name.
    pub fn run(self, sh: &mut dyn Shell, args: &[String]) -> CliResult<Flow> {
        let out = match self {
            Builtin::Cd => sh.cd(args)?,
            Builtin::Set => sh.set(args)?,
            Builtin::Kill => sh.kill(args)?,
            Builtin::Jobs => sh.list_jobs()?,
            Builtin::Help => sh.help()?,
            Builtin::Exit | Builtin::Quit => return Ok(Flow::Exit),
        };
        ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_round_trips_names() {
        for name in &["cd", "set", "kill", "jobs", "help", "exit", "quit"] {
            let b = Builtin::classify(name).unwrap();
            assert_eq!(b.name(), *name);
        }
    }

    #[test]
    fn classify_rejects_programs() {
        assert_eq!(Builtin::classify("ls"), None);
        assert_eq!(Builtin::classify("CD"), None);
        assert_eq!(Builtin::classify("./cd"), None);
        assert_eq!(Builtin::classify(""), None);
    }
}
