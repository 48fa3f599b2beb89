//! Runs the sampling and slew invocations on their own threads.
//!
//! Threads have no priority here. The sampling task is started first and has
//! the shorter period, both tasks hold the motor lock only for one invocation.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::TaskError;
use crate::hardware::MotorIo;
use crate::system::SmartMotors;

/// Periodic tasks a registry can hold at once.
pub const MAX_TASKS: usize = 8;

pub const SAMPLING_PRIORITY: u8 = 10;
pub const SLEW_PRIORITY: u8 = 5;

/// Refers to one spawned task. Stale once the task is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskHandle {
    slot: usize,
    generation: u32,
}

struct TaskSlot {
    name: &'static str,
    priority: u8,
    generation: u32,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

struct Slots {
    tasks: [Option<TaskSlot>; MAX_TASKS],
    generation: u32,
}

/// Fixed table of periodic tasks with cooperative cancellation.
pub struct TaskRegistry {
    slots: Mutex<Slots>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry {
            slots: Mutex::new(Slots {
                tasks: std::array::from_fn(|_| None),
                generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `body` every `period` on a new thread until stopped.
    pub fn spawn<F>(
        &self,
        name: &'static str,
        priority: u8,
        period: Duration,
        mut body: F,
    ) -> Result<TaskHandle, TaskError>
    where
        F: FnMut() + Send + 'static,
    {
        let mut slots = self.lock();
        let slot = slots
            .tasks
            .iter()
            .position(Option::is_none)
            .ok_or(TaskError::RegistryFull)?;

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let thread = thread::Builder::new().name(name.into()).spawn(move || {
            while !flag.load(Ordering::Acquire) {
                body();
                thread::park_timeout(period);
            }
        })?;

        slots.generation = slots.generation.wrapping_add(1);
        let generation = slots.generation;
        slots.tasks[slot] = Some(TaskSlot {
            name,
            priority,
            generation,
            stop,
            thread,
        });
        log::info!("Started task {} priority {} every {:?}", name, priority, period);
        Ok(TaskHandle { slot, generation })
    }

    pub fn is_running(&self, handle: TaskHandle) -> bool {
        matches!(&self.lock().tasks[handle.slot], Some(t) if t.generation == handle.generation)
    }

    /// Number of live tasks.
    pub fn running(&self) -> usize {
        self.lock().tasks.iter().flatten().count()
    }

    pub fn priority(&self, handle: TaskHandle) -> Option<u8> {
        match &self.lock().tasks[handle.slot] {
            Some(t) if t.generation == handle.generation => Some(t.priority),
            _ => None,
        }
    }

    /// Stop a task and wait for its thread to exit.
    ///
    /// A task can not stop itself, calling this from the task's own thread
    /// does nothing and returns false. A stale handle also returns false.
    pub fn stop(&self, handle: TaskHandle) -> bool {
        let task = {
            let mut slots = self.lock();
            let entry = &mut slots.tasks[handle.slot];
            match entry {
                Some(t) if t.generation == handle.generation => {
                    if t.thread.thread().id() == thread::current().id() {
                        log::warn!("Task {} can not stop itself", t.name);
                        return false;
                    }
                }
                _ => return false,
            }
            entry.take()
        };

        let Some(task) = task else {
            return false;
        };
        task.stop.store(true, Ordering::Release);
        task.thread.thread().unpark();
        if task.thread.join().is_err() {
            log::error!("Task {} panicked", task.name);
        } else {
            log::info!("Stopped task {}", task.name);
        }
        true
    }

    /// Stop every task, lowest priority first.
    pub fn stop_all(&self) {
        let mut handles: Vec<(u8, TaskHandle)> = self
            .lock()
            .tasks
            .iter()
            .enumerate()
            .filter_map(|(slot, t)| {
                t.as_ref().map(|t| {
                    (
                        t.priority,
                        TaskHandle {
                            slot,
                            generation: t.generation,
                        },
                    )
                })
            })
            .collect();
        handles.sort_by_key(|(priority, _)| *priority);
        for (_, handle) in handles {
            self.stop(handle);
        }
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        TaskRegistry::new()
    }
}

/// A [`SmartMotors`] shared with its sampling and slew tasks.
pub struct SmartMotorRuntime<H: MotorIo> {
    motors: Arc<Mutex<SmartMotors<H>>>,
    registry: Arc<TaskRegistry>,
    sampling: Option<TaskHandle>,
    slew: Option<TaskHandle>,
}

impl<H: MotorIo + Send + 'static> SmartMotorRuntime<H> {
    pub fn new(motors: SmartMotors<H>) -> Self {
        SmartMotorRuntime::with_registry(motors, Arc::new(TaskRegistry::new()))
    }

    /// Share a registry with other periodic tasks of the application.
    pub fn with_registry(motors: SmartMotors<H>, registry: Arc<TaskRegistry>) -> Self {
        SmartMotorRuntime {
            motors: Arc::new(Mutex::new(motors)),
            registry,
            sampling: None,
            slew: None,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn shared(&self) -> Arc<Mutex<SmartMotors<H>>> {
        self.motors.clone()
    }

    /// Lock the motors, a task that panicked holding the lock leaves the
    /// tables usable.
    pub fn lock(&self) -> MutexGuard<'_, SmartMotors<H>> {
        lock_motors(&self.motors)
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SmartMotors<H>) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn is_running(&self) -> bool {
        self.sampling.is_some() || self.slew.is_some()
    }

    /// Start the sampling task, then the slew task.
    pub fn run(&mut self) -> Result<(), TaskError> {
        if self.is_running() {
            return Err(TaskError::AlreadyRunning);
        }
        let timing = self.lock().timing();

        let motors = self.motors.clone();
        let sampling = self.registry.spawn(
            "smartmotor-sample",
            SAMPLING_PRIORITY,
            Duration::from_millis(timing.sample_period_ms as u64),
            move || {
                lock_motors(&motors).sample_step();
            },
        )?;

        let motors = self.motors.clone();
        let slew = self.registry.spawn(
            "smartmotor-slew",
            SLEW_PRIORITY,
            Duration::from_millis(timing.slew_period_ms as u64),
            move || lock_motors(&motors).slew_step(),
        );
        let slew = match slew {
            Ok(slew) => slew,
            Err(e) => {
                self.registry.stop(sampling);
                return Err(e);
            }
        };

        self.sampling = Some(sampling);
        self.slew = Some(slew);
        Ok(())
    }

    /// Disable both monitors, then stop both tasks and wait for them.
    pub fn stop(&mut self) {
        if !self.is_running() {
            return;
        }
        {
            let mut motors = self.lock();
            motors.disable_ptc_monitor();
            motors.disable_current_monitor();
        }
        for handle in [self.slew.take(), self.sampling.take()].into_iter().flatten() {
            self.registry.stop(handle);
        }
    }
}

impl<H: MotorIo> Drop for SmartMotorRuntime<H> {
    fn drop(&mut self) {
        for handle in [self.slew.take(), self.sampling.take()].into_iter().flatten() {
            self.registry.stop(handle);
        }
    }
}

fn lock_motors<H: MotorIo>(motors: &Mutex<SmartMotors<H>>) -> MutexGuard<'_, SmartMotors<H>> {
    motors.lock().unwrap_or_else(PoisonError::into_inner)
}
