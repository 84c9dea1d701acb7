//! Round-robin process switching.
//!
//! Each switch saves the outgoing process's registers and calls its
//! address space's `save_state`, then loads the incoming registers (or
//! initializes them on first run) and calls `restore_state` before anything
//! of the incoming process is translated.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use super::{Pid, Process, ProcessState};
use crate::machine::Machine;
use crate::memory::FrameAllocator;
use crate::noff::OpenFile;
use crate::userprog::{AddressSpace, FatalError};

/// Owner of the machine and every user process.
pub struct Scheduler {
    machine: Machine,
    frames: Arc<FrameAllocator>,
    current: Option<Process>,
    ready: VecDeque<Process>,
}

impl Scheduler {
    /// Create a scheduler with no processes.
    pub fn new(machine: Machine, frames: Arc<FrameAllocator>) -> Self {
        Scheduler {
            machine,
            frames,
            current: None,
            ready: VecDeque::new(),
        }
    }

    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    /// Running process, if any.
    pub fn current(&self) -> Option<&Process> {
        self.current.as_ref()
    }

    /// Processes waiting to run.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Load `executable` into a new process.
    ///
    /// It starts running right away when the CPU is idle, otherwise it
    /// queues behind the ready processes.
    pub fn exec(
        &mut self,
        name: &'static str,
        executable: &(impl OpenFile + ?Sized),
    ) -> Result<Pid, FatalError> {
        let space = AddressSpace::from_executable(executable, &mut self.machine, &self.frames)?;
        let process = Process::new(name, space);
        let pid = process.pid;
        log::info!(
            target: "sched",
            "exec {} ({}, {} pages)",
            name, pid, process.space.num_pages()
        );
        if self.current.is_none() {
            self.dispatch(process);
        } else {
            self.ready.push_back(process);
        }
        Ok(pid)
    }

    /// Fork the running process.
    ///
    /// The child gets a copy of the parent's memory and of its registers as
    /// they are right now, and queues as ready. Returns `None` when nothing
    /// is running.
    pub fn fork(&mut self) -> Option<Result<Pid, FatalError>> {
        let parent = self.current.as_ref()?;
        let space = match parent.space.fork(&mut self.machine, &self.frames) {
            Ok(space) => space,
            Err(e) => return Some(Err(e)),
        };
        let mut child = Process::new(parent.name, space);
        child.user_registers = Some(*self.machine.registers());
        let pid = child.pid;
        log::info!(target: "sched", "fork {} -> {}", parent.pid, pid);
        self.ready.push_back(child);
        Some(Ok(pid))
    }

    /// Switch to the next ready process; the current one goes to the back.
    pub fn yield_now(&mut self) {
        let Some(next) = self.ready.pop_front() else {
            return;
        };
        if let Some(prev) = self.current.take() {
            let prev = self.save(prev);
            self.ready.push_back(prev);
        }
        self.dispatch(next);
    }

    /// Terminate the running process and switch to the next one.
    ///
    /// Its address space is dropped; the frames stay committed.
    pub fn exit(&mut self) -> Option<Pid> {
        let done = self.current.take()?;
        log::info!(target: "sched", "{} ({}) exited", done.pid, done.name);
        let pid = done.pid;
        drop(done);
        match self.ready.pop_front() {
            Some(next) => self.dispatch(next),
            None => self.machine.uninstall(),
        }
        Some(pid)
    }

    fn save(&mut self, mut process: Process) -> Process {
        process.user_registers = Some(*self.machine.registers());
        process.space.save_state();
        process.state = ProcessState::Ready;
        process
    }

    fn dispatch(&mut self, mut process: Process) {
        match process.user_registers.take() {
            Some(regs) => *self.machine.registers_mut() = regs,
            None => process.space.init_registers(&mut self.machine),
        }
        process.space.restore_state(&self.machine);
        process.state = ProcessState::Running;
        log::debug!(target: "sched", "switched to {} ({})", process.pid, process.name);
        self.current = Some(process);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MachineConfig;
    use crate::machine::{PC_REG, STACK_REG};
    use crate::noff::NoffBuilder;

    fn scheduler() -> Scheduler {
        let config = MachineConfig::new();
        Scheduler::new(
            Machine::new(config).unwrap(),
            Arc::new(FrameAllocator::for_machine(&config)),
        )
    }

    #[test]
    fn first_exec_runs_immediately() {
        let mut sched = scheduler();
        let image = NoffBuilder::new().with_code(0, &[0x42; 4]).build();
        let pid = sched.exec("init", &image).unwrap();

        let current = sched.current().unwrap();
        assert_eq!(current.pid, pid);
        assert_eq!(current.state, ProcessState::Running);
        assert_eq!(sched.machine().read_register(STACK_REG), 9 * 128 - 16);
        assert_eq!(sched.machine().read_word(0), Ok(0x4242_4242));
    }

    #[test]
    fn yield_swaps_registers_and_tables() {
        let mut sched = scheduler();
        let a = NoffBuilder::new().with_code(0, &[0xaa; 4]).build();
        let b = NoffBuilder::new().with_code(0, &[0xbb; 4]).build();
        let pid_a = sched.exec("a", &a).unwrap();
        let pid_b = sched.exec("b", &b).unwrap();
        assert_eq!(sched.ready_count(), 1);

        sched.machine_mut().write_register(PC_REG, 40);
        sched.yield_now();
        assert_eq!(sched.current().unwrap().pid, pid_b);
        assert_eq!(sched.machine().read_register(PC_REG), 0);
        assert_eq!(sched.machine().read_word(0), Ok(0xbbbb_bbbb));

        sched.yield_now();
        assert_eq!(sched.current().unwrap().pid, pid_a);
        assert_eq!(sched.machine().read_register(PC_REG), 40);
        assert_eq!(sched.machine().read_word(0), Ok(0xaaaa_aaaa));
    }

    #[test]
    fn fork_child_sees_parent_memory() {
        let mut sched = scheduler();
        let image = NoffBuilder::new().with_code(0, &[0; 8]).build();
        sched.exec("parent", &image).unwrap();
        sched.machine_mut().write_word(4, 77).unwrap();
        sched.machine_mut().write_register(PC_REG, 12);

        let child = sched.fork().unwrap().unwrap();
        sched.machine_mut().write_word(4, 88).unwrap();
        sched.yield_now();

        assert_eq!(sched.current().unwrap().pid, child);
        assert_eq!(sched.machine().read_register(PC_REG), 12);
        assert_eq!(sched.machine().read_word(4), Ok(77));
        assert_eq!(sched.frames().committed(), 18);
    }

    #[test]
    fn fork_without_current_is_none() {
        let mut sched = scheduler();
        assert!(sched.fork().is_none());
    }

    #[test]
    fn exit_moves_to_next() {
        let mut sched = scheduler();
        let image = NoffBuilder::new().build();
        let first = sched.exec("one", &image).unwrap();
        let second = sched.exec("two", &image).unwrap();

        assert_eq!(sched.exit(), Some(first));
        assert_eq!(sched.current().unwrap().pid, second);
        assert_eq!(sched.exit(), Some(second));
        assert!(sched.current().is_none());
        assert_eq!(sched.exit(), None);
        assert_eq!(sched.frames().committed(), 16);
    }

    #[test]
    fn last_exit_clears_translation() {
        let mut sched = scheduler();
        let image = NoffBuilder::new().with_code(0, &[0x11; 4]).build();
        sched.exec("only", &image).unwrap();
        assert_eq!(sched.machine().read_word(0), Ok(0x1111_1111));

        sched.exit();
        assert!(sched.machine().context().is_none());
        assert_eq!(sched.machine().read_word(0), Err(crate::memory::Exception::AddressError));
    }

    #[test]
    fn exec_zero_page_program() {
        let config = MachineConfig::new().with_stack_size(0);
        let mut sched = Scheduler::new(
            Machine::new(config).unwrap(),
            Arc::new(FrameAllocator::for_machine(&config)),
        );
        sched.exec("empty", &NoffBuilder::new().build()).unwrap();
        assert_eq!(sched.machine().read_register(STACK_REG), -16);
    }
}
