//! Kernel integration tests
//!
//! Runs the process subsystem on a simulated machine: every execution
//! context is an OS thread, and a context switch hands a baton from one
//! thread to the next so exactly one thread per simulated CPU makes progress.

#![cfg(test)]

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicIsize, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mlfq_api::config::{NCPU, NPROC};
use mlfq_api::hal::{AddressSpaceManager, Hardware, ResourceOwner, StackAllocator};
use mlfq_api::{Channel, Error, Pid, Platform, SchedConfig, Tick};
use mlfq_proc::Kernel;

// ============================================================================
// Simulated platform
// ============================================================================

/// CPU id used by the test thread when inspecting the kernel
const OBSERVER_CPU: usize = NCPU - 1;
/// CPU id of the simulated timer
const TIMER_CPU: usize = NCPU - 2;
/// CPU id of threads outside the process table that call `wakeup`
const DEVICE_CPU: usize = NCPU - 3;

type Program = Box<dyn FnOnce() + Send>;

thread_local! {
    static CPU: Cell<usize> = const { Cell::new(OBSERVER_CPU) };
    static STAGED: RefCell<Option<Program>> = const { RefCell::new(None) };
}

fn current_cpu() -> usize {
    CPU.with(|cpu| cpu.get())
}

fn set_cpu(id: usize) {
    CPU.with(|cpu| cpu.set(id));
}

/// Permission to run, passed between the threads backing two contexts.
/// Carries the CPU the receiver resumes on.
#[derive(Default)]
struct Baton {
    cpu: Mutex<Option<usize>>,
    cond: Condvar,
}

impl Baton {
    fn give(&self, cpu: usize) {
        *self.cpu.lock().unwrap() = Some(cpu);
        self.cond.notify_one();
    }

    fn take(&self) -> usize {
        let mut cpu = self.cpu.lock().unwrap();
        loop {
            if let Some(id) = cpu.take() {
                return id;
            }
            cpu = self.cond.wait(cpu).unwrap();
        }
    }
}

#[derive(Debug, Default)]
struct SimContext {
    baton: Option<usize>,
}

struct Sim {
    batons: Mutex<Vec<Arc<Baton>>>,
    interrupts: [AtomicBool; NCPU],
    ticks: AtomicU64,
    live_stacks: AtomicIsize,
    live_spaces: AtomicIsize,
    live_handles: AtomicIsize,
    handle_copies: AtomicU32,
    /// Fail the next `allocate_stack`
    fail_stack: AtomicBool,
    /// Fail the next `copy_address_space`
    fail_copy: AtomicBool,
}

impl Sim {
    fn new() -> Self {
        Self {
            batons: Mutex::new(Vec::new()),
            interrupts: std::array::from_fn(|_| AtomicBool::new(false)),
            ticks: AtomicU64::new(0),
            live_stacks: AtomicIsize::new(0),
            live_spaces: AtomicIsize::new(0),
            live_handles: AtomicIsize::new(0),
            handle_copies: AtomicU32::new(0),
            fail_stack: AtomicBool::new(false),
            fail_copy: AtomicBool::new(false),
        }
    }

    fn new_baton(&self) -> (usize, Arc<Baton>) {
        let mut batons = self.batons.lock().unwrap();
        let baton = Arc::new(Baton::default());
        batons.push(baton.clone());
        (batons.len() - 1, baton)
    }

    fn baton(&self, id: usize) -> Arc<Baton> {
        self.batons.lock().unwrap()[id].clone()
    }

    fn live(&self) -> (isize, isize, isize) {
        (
            self.live_stacks.load(Ordering::SeqCst),
            self.live_spaces.load(Ordering::SeqCst),
            self.live_handles.load(Ordering::SeqCst),
        )
    }
}

impl AddressSpaceManager for Sim {
    type AddressSpace = ();

    fn create_address_space(&self) -> Option<((), usize)> {
        self.live_spaces.fetch_add(1, Ordering::SeqCst);
        Some(((), 4096))
    }

    fn copy_address_space(&self, _src: &(), _size: usize) -> Option<()> {
        if self.fail_copy.swap(false, Ordering::SeqCst) {
            return None;
        }
        self.live_spaces.fetch_add(1, Ordering::SeqCst);
        Some(())
    }

    fn resize_address_space(&self, _space: &mut (), old_size: usize, delta: isize) -> Option<usize> {
        old_size.checked_add_signed(delta)
    }

    fn destroy_address_space(&self, _space: (), _size: usize) {
        self.live_spaces.fetch_sub(1, Ordering::SeqCst);
    }

    fn switch_address_space(&self, _space: Option<&()>) {}
}

impl StackAllocator for Sim {
    type Stack = ();

    fn allocate_stack(&self) -> Option<()> {
        if self.fail_stack.swap(false, Ordering::SeqCst) {
            return None;
        }
        self.live_stacks.fetch_add(1, Ordering::SeqCst);
        Some(())
    }

    fn free_stack(&self, _stack: ()) {
        self.live_stacks.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Hardware for Sim {
    type Context = SimContext;
    type TrapFrame = u64;

    fn cpu_id(&self) -> usize {
        current_cpu()
    }

    fn interrupts_enabled(&self) -> bool {
        self.interrupts[current_cpu()].load(Ordering::SeqCst)
    }

    fn enable_interrupts(&self) {
        self.interrupts[current_cpu()].store(true, Ordering::SeqCst);
    }

    fn disable_interrupts(&self) {
        self.interrupts[current_cpu()].store(false, Ordering::SeqCst);
    }

    fn wait_for_interrupt(&self) {
        thread::sleep(Duration::from_micros(100));
    }

    fn current_tick(&self) -> Tick {
        self.ticks.load(Ordering::SeqCst)
    }

    unsafe fn switch_context(&self, from: *mut SimContext, to: *const SimContext) {
        // SAFETY: the kernel passes contexts that stay valid for the switch
        let (from, to) = unsafe { (&mut *from, &*to) };
        // A scheduler loop's context gets its baton on its first switch
        let from_id = match from.baton {
            Some(id) => id,
            None => {
                let (id, _) = self.new_baton();
                from.baton = Some(id);
                id
            }
        };
        let to_id = to.baton.expect("switch to a context that was never built");
        let resume = self.baton(from_id);
        self.baton(to_id).give(current_cpu());
        set_cpu(resume.take());
    }

    fn initial_trap_frame(&self) -> u64 {
        0
    }

    fn fork_trap_frame(&self, _parent: &u64) -> u64 {
        0
    }
}

impl ResourceOwner for Sim {
    type Handles = ();

    fn root_handles(&self) {
        self.live_handles.fetch_add(1, Ordering::SeqCst);
    }

    fn duplicate_handles(&self, _handles: &()) {
        self.handle_copies.fetch_add(1, Ordering::SeqCst);
        self.live_handles.fetch_add(1, Ordering::SeqCst);
    }

    fn release_handles(&self, _handles: ()) {
        self.live_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Platform for Sim {
    fn init_context(&self, _stack: &()) -> SimContext {
        let program = STAGED
            .with(|staged| staged.borrow_mut().take())
            .expect("no program staged for new context");
        let (id, baton) = self.new_baton();
        thread::spawn(move || {
            set_cpu(baton.take());
            program();
        });
        SimContext { baton: Some(id) }
    }
}

// ============================================================================
// Machine harness
// ============================================================================

type SimKernel = &'static Kernel<Sim>;

/// A booted machine: scheduler threads plus the root program
struct Machine {
    kernel: SimKernel,
    done: Arc<AtomicBool>,
}

impl Machine {
    /// Boot with `cpus` scheduler loops; `root` runs as the root process and
    /// the machine is finished once it returns
    fn boot<F>(config: SchedConfig, cpus: usize, root: F) -> Self
    where
        F: FnOnce(SimKernel) + Send + 'static,
    {
        set_cpu(OBSERVER_CPU);
        let kernel: SimKernel = Box::leak(Box::new(Kernel::new(Sim::new(), config).unwrap()));
        let done = Arc::new(AtomicBool::new(false));

        let finished = done.clone();
        stage(Box::new(move || {
            enter(kernel);
            root(kernel);
            finished.store(true, Ordering::SeqCst);
            idle(kernel);
        }));
        kernel.user_init("init").unwrap();

        for cpu in 0..cpus {
            let done = done.clone();
            thread::spawn(move || {
                set_cpu(cpu);
                while !done.load(Ordering::SeqCst) {
                    if !kernel.schedule_once() {
                        kernel.platform().wait_for_interrupt();
                    }
                }
            });
        }
        Self { kernel, done }
    }

    /// Advance the tick counter and run the timer hook until the machine stops
    fn start_timer(&self) {
        let (kernel, done) = (self.kernel, self.done.clone());
        thread::spawn(move || {
            set_cpu(TIMER_CPU);
            while !done.load(Ordering::SeqCst) {
                kernel.platform().ticks.fetch_add(1, Ordering::SeqCst);
                kernel.on_tick();
                thread::sleep(Duration::from_micros(200));
            }
        });
    }

    fn wait_done(&self) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !self.done.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "simulated machine did not finish");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

/// First code of every new context
fn enter(kernel: SimKernel) {
    // SAFETY: called once, before anything else, on first dispatch
    unsafe { kernel.fork_return() }
}

fn leave(kernel: SimKernel) {
    kernel.exit()
}

/// Keeps the root process off the CPU once its work is done
fn idle(kernel: SimKernel) {
    loop {
        kernel.yield_now();
    }
}

fn stage(program: Program) {
    STAGED.with(|staged| *staged.borrow_mut() = Some(program));
}

/// Fork the calling process; the child runs `body` and then exits
fn spawn<F>(kernel: SimKernel, body: F) -> Result<Pid, Error>
where
    F: FnOnce(SimKernel) + Send + 'static,
{
    stage(Box::new(move || {
        enter(kernel);
        body(kernel);
        leave(kernel);
    }));
    let pid = kernel.fork();
    STAGED.with(|staged| staged.borrow_mut().take());
    pid
}

/// Shared record written by simulated processes and read by the test
struct Record<T>(Arc<Mutex<Vec<T>>>);

impl<T> Default for Record<T> {
    fn default() -> Self {
        Self(Arc::new(Mutex::new(Vec::new())))
    }
}

impl<T> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Clone> Record<T> {
    fn push(&self, value: T) {
        self.0.lock().unwrap().push(value);
    }

    fn get(&self) -> Vec<T> {
        self.0.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    /// Test fork, exit and wait release every child resource
    #[test]
    fn test_fork_wait_reaps_child() {
        let seen: Record<(Pid, Pid)> = Record::default();
        let reaped: Record<Result<Pid, Error>> = Record::default();
        let (seen_c, reaped_c) = (seen.clone(), reaped.clone());

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            let child = spawn(k, move |k| {
                seen_c.push((k.pid().unwrap(), k.parent_pid().unwrap()));
            });
            reaped_c.push(child);
            reaped_c.push(k.wait());
            reaped_c.push(k.wait());
        });
        machine.wait_done();

        let root_pid = 1;
        let reaped = reaped.get();
        let child = reaped[0].unwrap();
        assert_eq!(seen.get(), vec![(child, root_pid)]);
        assert_eq!(reaped[1], Ok(child));
        assert_eq!(reaped[2], Err(Error::NoChildren));

        let kernel = machine.kernel;
        assert_eq!(kernel.free_count(), NPROC - 1);
        assert_eq!(kernel.platform().live(), (1, 1, 1));
        assert_eq!(kernel.stats().reaped, 1);
        assert!(kernel.check_invariants().is_ok());
    }

    /// Test orphans of an exiting process are reaped by the root
    #[test]
    fn test_orphans_reparented_to_root() {
        let reaped: Record<Pid> = Record::default();
        let forked: Record<Pid> = Record::default();
        let (reaped_c, forked_c) = (reaped.clone(), forked.clone());

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            let grandchildren = forked_c.clone();
            let middle = spawn(k, move |k| {
                for _ in 0..3 {
                    let pid = spawn(k, |k| {
                        k.yield_now();
                        k.yield_now();
                    });
                    grandchildren.push(pid.unwrap());
                }
            });
            forked_c.push(middle.unwrap());
            while let Ok(pid) = k.wait() {
                reaped_c.push(pid);
            }
        });
        machine.wait_done();

        let forked: HashSet<Pid> = forked.get().into_iter().collect();
        let reaped = reaped.get();
        assert_eq!(reaped.len(), 4);
        assert_eq!(reaped.iter().copied().collect::<HashSet<_>>(), forked);
        assert_eq!(machine.kernel.free_count(), NPROC - 1);
        assert!(machine.kernel.zombie_dump().is_empty());
    }

    /// Test kill interrupts a long sleep and wait reaps the victim
    #[test]
    fn test_kill_interrupts_sleep() {
        let outcome: Record<Result<(), Error>> = Record::default();
        let reaped: Record<Result<Pid, Error>> = Record::default();
        let (outcome_c, reaped_c) = (outcome.clone(), reaped.clone());

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            let victim = spawn(k, move |k| outcome_c.push(k.sleep_ticks(Tick::MAX))).unwrap();
            while !k.sleeping_pids().contains(&victim) {
                k.yield_now();
            }
            reaped_c.push(k.kill(victim).map(|_| victim));
            reaped_c.push(k.wait());
            reaped_c.push(k.kill(victim).map(|_| victim));
        });
        machine.wait_done();

        let reaped = reaped.get();
        let victim = reaped[0].unwrap();
        assert_eq!(outcome.get(), vec![Err(Error::Killed)]);
        assert_eq!(reaped[1], Ok(victim));
        assert_eq!(reaped[2], Err(Error::NoSuchProcess(victim)));
    }

    /// Test a killed parent stops waiting for running children
    #[test]
    fn test_killed_parent_abandons_wait() {
        let result: Record<(Result<Pid, Error>, bool)> = Record::default();
        let result_c = result.clone();

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            let me = k.pid().unwrap();
            let stop = Arc::new(AtomicBool::new(false));
            let child_stop = stop.clone();
            spawn(k, move |k| {
                k.kill(me).unwrap();
                while !child_stop.load(Ordering::SeqCst) {
                    k.yield_now();
                }
            })
            .unwrap();
            let outcome = k.wait();
            result_c.push((outcome, k.killed()));
            stop.store(true, Ordering::SeqCst);
        });
        machine.wait_done();

        assert_eq!(result.get(), vec![(Err(Error::NoChildren), true)]);
    }

    /// Test a failed address-space copy leaves no child behind
    #[test]
    fn test_fork_rolls_back_failed_copy() {
        type Outcome = (Result<Pid, Error>, usize, (isize, isize, isize), bool);
        let outcome: Record<Outcome> = Record::default();
        let outcome_c = outcome.clone();

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            k.platform().fail_copy.store(true, Ordering::SeqCst);
            let failed = spawn(k, |_| {});
            outcome_c.push((
                failed,
                k.free_count(),
                k.platform().live(),
                k.check_invariants().is_ok(),
            ));
            let child = spawn(k, |_| {});
            outcome_c.push((child, k.free_count(), k.platform().live(), true));
            k.wait().unwrap();
        });
        machine.wait_done();

        let outcome = outcome.get();
        assert_eq!(outcome[0], (Err(Error::OutOfMemory), NPROC - 1, (1, 1, 1), true));
        assert!(outcome[1].0.is_ok());
        assert_eq!(outcome[1].1, NPROC - 2);

        let kernel = machine.kernel;
        assert_eq!(kernel.platform().handle_copies.load(Ordering::SeqCst), 1);
        assert_eq!(kernel.platform().live(), (1, 1, 1));
        assert!(kernel.check_invariants().is_ok());
    }

    /// Test stack exhaustion fails fork without touching the table
    #[test]
    fn test_fork_without_stack() {
        let outcome: Record<(Result<Pid, Error>, usize, (isize, isize, isize))> = Record::default();
        let outcome_c = outcome.clone();

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            k.platform().fail_stack.store(true, Ordering::SeqCst);
            let failed = spawn(k, |_| {});
            outcome_c.push((failed, k.free_count(), k.platform().live()));
            outcome_c.push((k.wait(), k.free_count(), k.platform().live()));
        });
        machine.wait_done();

        assert_eq!(
            outcome.get(),
            vec![
                (Err(Error::OutOfStacks), NPROC - 1, (1, 1, 1)),
                (Err(Error::NoChildren), NPROC - 1, (1, 1, 1)),
            ]
        );
        assert_eq!(machine.kernel.platform().handle_copies.load(Ordering::SeqCst), 0);
        assert!(machine.kernel.check_invariants().is_ok());
    }
}

#[cfg(test)]
mod sleep_tests {
    use super::*;

    const ROUNDS: u32 = 40;

    /// Test a wakeup racing with a sleeper is never lost
    #[test]
    fn test_condition_sleep_not_lost() {
        let flag: &'static spin::Mutex<u32> = Box::leak(Box::new(spin::Mutex::new(0)));
        let chan = Channel::of(flag);
        let started = Arc::new(AtomicU32::new(0));
        let reaped: Record<Pid> = Record::default();
        let (started_c, reaped_c) = (started.clone(), reaped.clone());

        let machine = Machine::boot(SchedConfig::default(), 2, move |k| {
            for round in 1..=ROUNDS {
                spawn(k, move |k| {
                    let mut guard = flag.lock();
                    while *guard < round {
                        guard = k.sleep(chan, flag, guard);
                    }
                })
                .unwrap();
                started_c.store(round, Ordering::SeqCst);
                reaped_c.push(k.wait().unwrap());
            }
        });

        let (kernel, done) = (machine.kernel, machine.done.clone());
        thread::spawn(move || {
            set_cpu(DEVICE_CPU);
            for round in 1..=ROUNDS {
                while started.load(Ordering::SeqCst) < round && !done.load(Ordering::SeqCst) {
                    thread::yield_now();
                }
                *flag.lock() = round;
                kernel.wakeup(chan);
            }
        });
        machine.wait_done();

        assert_eq!(reaped.get().len(), ROUNDS as usize);
        assert!(machine.kernel.check_invariants().is_ok());
    }

    /// Test sleep_ticks returns once enough timer ticks have passed
    #[test]
    fn test_sleep_ticks_waits_for_timer() {
        let span: Record<Tick> = Record::default();
        let span_c = span.clone();

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            let start = k.uptime();
            k.sleep_ticks(5).unwrap();
            span_c.push(k.uptime() - start);
        });
        machine.start_timer();
        machine.wait_done();

        assert!(span.get()[0] >= 5);
        assert!(machine.kernel.stats().sleeps >= 1);
    }

    /// Test a process can sleep on a channel without holding a lock
    #[test]
    fn test_sleep_on_without_lock() {
        let chan = Channel::Address(0x5000);
        let woken: Record<usize> = Record::default();
        let reaped: Record<(Pid, Result<Pid, Error>)> = Record::default();
        let (woken_c, reaped_c) = (woken.clone(), reaped.clone());

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            let ready = Arc::new(AtomicBool::new(false));
            let seen = ready.clone();
            let child = spawn(k, move |k| {
                while !seen.load(Ordering::SeqCst) {
                    k.sleep_on(chan);
                }
            })
            .unwrap();
            while !k.sleeping_pids().contains(&child) {
                k.yield_now();
            }
            ready.store(true, Ordering::SeqCst);
            woken_c.push(k.wakeup(chan));
            woken_c.push(k.wakeup(chan));
            reaped_c.push((child, k.wait()));
        });
        machine.wait_done();

        assert_eq!(woken.get(), vec![1, 0]);
        let (child, result) = reaped.get()[0];
        assert_eq!(result, Ok(child));
        assert!(machine.kernel.sleeping_pids().is_empty());
    }
}

#[cfg(test)]
mod scheduling_tests {
    use super::*;

    /// Test equal-priority processes alternate on yield
    #[test]
    fn test_yield_round_robin() {
        let trace: Record<char> = Record::default();
        let trace_c = trace.clone();

        let machine = Machine::boot(SchedConfig::default(), 1, move |k| {
            for name in ['a', 'b'] {
                let trace = trace_c.clone();
                spawn(k, move |k| {
                    for _ in 0..3 {
                        trace.push(name);
                        k.yield_now();
                    }
                })
                .unwrap();
            }
            k.wait().unwrap();
            k.wait().unwrap();
        });
        machine.wait_done();

        assert_eq!(trace.get(), vec!['a', 'b', 'a', 'b', 'a', 'b']);
    }

    /// Test many children across two CPUs are each reaped once
    #[test]
    fn test_two_cpus_reap_everything() {
        const CHILDREN: usize = 12;
        let forked: Record<Pid> = Record::default();
        let reaped: Record<Pid> = Record::default();
        let (forked_c, reaped_c) = (forked.clone(), reaped.clone());

        let machine = Machine::boot(SchedConfig::default(), 2, move |k| {
            for i in 0..CHILDREN {
                let pid = spawn(k, move |k| {
                    for _ in 0..i % 4 {
                        k.yield_now();
                    }
                })
                .unwrap();
                forked_c.push(pid);
            }
            while let Ok(pid) = k.wait() {
                reaped_c.push(pid);
            }
        });
        machine.start_timer();
        machine.wait_done();

        let reaped = reaped.get();
        let unique: HashSet<Pid> = reaped.iter().copied().collect();
        assert_eq!(reaped.len(), CHILDREN);
        assert_eq!(unique, forked.get().into_iter().collect());
        assert_eq!(machine.kernel.platform().live(), (1, 1, 1));
        assert!(machine.kernel.check_invariants().is_ok());
    }

    /// Test identity, priority and memory calls of the running process
    #[test]
    fn test_identity_and_listing() {
        let facts: Record<String> = Record::default();
        let facts_c = facts.clone();

        let config = SchedConfig::default().with_root_credentials(0, 0);
        let machine = Machine::boot(config, 1, move |k| {
            let me = k.pid().unwrap();
            facts_c.push(format!("ppid {}", k.parent_pid().unwrap() == me));
            k.set_priority(me, 2).unwrap();
            facts_c.push(format!("prio {}", k.get_priority(me).unwrap()));
            facts_c.push(format!("bad prio {:?}", k.set_priority(me, 9)));
            k.set_uid(5).unwrap();
            facts_c.push(format!("uid {} {:?}", k.uid().unwrap(), k.set_gid(40000)));
            facts_c.push(format!("grow {:?}", k.grow(8192)));

            let child = spawn(k, |k| {
                let _ = k.sleep_ticks(Tick::MAX);
            })
            .unwrap();
            while !k.sleeping_pids().contains(&child) {
                k.yield_now();
            }
            for row in k.snapshot(NPROC) {
                facts_c.push(format!("{} {} {} {}", row.pid, row.ppid, row.state, row.size));
            }
            k.kill(child).unwrap();
            k.wait().unwrap();
        });
        machine.wait_done();

        assert_eq!(
            facts.get(),
            vec![
                "ppid true".to_string(),
                "prio 2".to_string(),
                "bad prio Err(InvalidPriority(9))".to_string(),
                "uid 5 Err(InvalidCredential(40000))".to_string(),
                "grow Ok(4096)".to_string(),
                "1 1 run 12288".to_string(),
                "2 1 sleep 12288".to_string(),
            ]
        );
    }
}
