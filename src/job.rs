extern crate lazy_static;

use lazy_static::lazy_static;
use nix::unistd::Pid;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::common::*;
use crate::signal::SigchldBlock;

/// A backgrounded pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: usize,
    /// Pid of the first process forked for the pipeline.
    pub leader: Pid,
    pub description: String,
}

#[derive(Debug, Default)]
pub struct JobTable {
    next_id: usize,
    jobs: BTreeMap<usize, Job>,
}

lazy_static! {
    static ref JOBS: Mutex<JobTable> = Mutex::new(JobTable::default());
}

impl JobTable {
    /// Registers a job and returns its id. Ids are never reused.
    pub fn insert(&mut self, leader: Pid, description: String) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        self.jobs.insert(
            id,
            Job {
                id,
                leader,
                description,
            },
        );
        id
    }

    pub fn remove_leader(&mut self, pid: Pid) -> Option<Job> {
        let id = self.jobs.values().find(|job| job.leader == pid)?.id;
        self.jobs.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for job in self.jobs.values() {
            let _ = writeln!(out, "[{}]\t{}\t{}", job.id, job.leader, job.description);
        }
        out
    }
}

fn lock() -> MutexGuard<'static, JobTable> {
    JOBS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs `f` on the global table with SIGCHLD held off, so the reaper can
/// never find the lock taken.
pub fn with_jobs<R, F>(f: F) -> CliResult<R>
where
    F: FnOnce(&mut JobTable) -> R,
{
    let _block = SigchldBlock::new()?;
    let mut jobs = lock();
    Ok(f(&mut *jobs))
}

/// Called from the SIGCHLD handler only. The run loop never holds the lock
/// while the signal is deliverable.
pub fn reap_leader(pid: Pid) -> Option<Job> {
    lock().remove_leader(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_zero_and_increase() {
        let mut table = JobTable::default();
        let a = table.insert(Pid::from_raw(100), "sleep 5".to_owned());
        let b = table.insert(Pid::from_raw(200), "sleep 6".to_owned());
        assert_eq!((a, b), (0, 1));
        table.remove_leader(Pid::from_raw(100));
        table.remove_leader(Pid::from_raw(200));
        let c = table.insert(Pid::from_raw(300), "sleep 7".to_owned());
        assert_eq!(c, 2);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn remove_only_matches_leaders() {
        let mut table = JobTable::default();
        table.insert(Pid::from_raw(42), "yes | head".to_owned());
        assert_eq!(table.remove_leader(Pid::from_raw(43)), None);
        assert_eq!(table.len(), 1);

        let job = table.remove_leader(Pid::from_raw(42)).unwrap();
        assert_eq!(job.id, 0);
        assert_eq!(job.description, "yes | head");
        assert_eq!(table.len(), 0);
        assert_eq!(table.remove_leader(Pid::from_raw(42)), None);
    }

    #[test]
    fn render_lists_in_id_order() {
        let mut table = JobTable::default();
        assert_eq!(table.render(), "");
        table.insert(Pid::from_raw(11), "sleep 1".to_owned());
        table.insert(Pid::from_raw(12), "cat f | wc".to_owned());
        assert_eq!(table.render(), "[0]\t11\tsleep 1\n[1]\t12\tcat f | wc\n");
    }
}
