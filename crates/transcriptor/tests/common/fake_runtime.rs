//! Scripted in-process `ContainerRuntime`.
//!
//! Each `start` consumes the next `Script` (falling back to the default one),
//! so a test decides up front how every worker behaves. Workers stay known
//! until removed, so any orchestrator sharing the runtime can wait on them.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use transcriptor::error::RuntimeError;
use transcriptor::runtime::{ContainerHandle, ContainerRuntime, ExitResult, WorkerSpec};

#[derive(Debug, Clone)]
pub enum Script {
    /// Writes `(relative path, content)` files into the output mount, exits 0.
    Succeed(Vec<(String, String)>),
    /// Exits with the given code without writing anything.
    Exit(i64),
    /// Runs until stopped or timed out.
    Hang,
    /// Sleeps, then behaves like the inner script.
    Delayed(Duration, Box<Script>),
    /// Engine refuses the container.
    RejectLaunch(String),
    /// Engine cannot be reached.
    Unavailable,
}

impl Script {
    pub fn transcript(content: &str) -> Self {
        Script::Succeed(vec![("transcript.txt".to_string(), content.to_string())])
    }

    pub fn after(delay: Duration, then: Script) -> Self {
        Script::Delayed(delay, Box::new(then))
    }
}

struct FakeWorker {
    script: Script,
    output_dir: Option<PathBuf>,
    /// Flips to true once the worker is killed. Every waiter subscribes.
    killed: watch::Sender<bool>,
    running: bool,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Script>,
    workers: HashMap<String, FakeWorker>,
    started: Vec<WorkerSpec>,
    stopped: Vec<String>,
    removed: Vec<String>,
    disconnected: bool,
}

pub struct FakeRuntime {
    default: Script,
    next_id: AtomicUsize,
    state: Mutex<State>,
}

impl FakeRuntime {
    pub fn new(default: Script) -> Self {
        Self {
            default,
            next_id: AtomicUsize::new(1),
            state: Mutex::new(State::default()),
        }
    }

    /// Queues scripts for the next launches, in order.
    pub fn push(&self, script: Script) {
        self.state.lock().unwrap().queue.push_back(script);
    }

    pub fn started(&self) -> Vec<WorkerSpec> {
        self.state.lock().unwrap().started.clone()
    }

    pub fn launches(&self) -> usize {
        self.state.lock().unwrap().started.len()
    }

    pub fn was_stopped(&self, container_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .stopped
            .iter()
            .any(|id| id == container_id)
    }

    pub fn was_removed(&self, container_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .removed
            .iter()
            .any(|id| id == container_id)
    }

    pub fn is_running(&self, container_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .workers
            .get(container_id)
            .map(|w| w.running)
            .unwrap_or(false)
    }

    pub fn running_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .workers
            .values()
            .filter(|w| w.running)
            .count()
    }

    pub fn is_disconnected(&self) -> bool {
        self.state.lock().unwrap().disconnected
    }

    fn kill(&self, handle: &ContainerHandle) {
        let mut state = self.state.lock().unwrap();
        state.stopped.push(handle.id.clone());
        if let Some(worker) = state.workers.get_mut(&handle.id) {
            worker.running = false;
            worker.killed.send_replace(true);
        }
    }

    async fn play(
        &self,
        handle: &ContainerHandle,
        script: Script,
        output_dir: Option<PathBuf>,
        mut killed: watch::Receiver<bool>,
        timeout: Duration,
    ) -> ExitResult {
        let started = tokio::time::Instant::now();
        let mut script = script;
        while let Script::Delayed(delay, then) = script {
            tokio::select! {
                _ = killed.wait_for(|k| *k) => return ExitResult::Exited { code: 137 },
                _ = tokio::time::sleep(delay) => {}
            }
            script = *then;
        }

        match script {
            Script::Succeed(files) => {
                if let Some(dir) = output_dir {
                    for (name, content) in files {
                        let path = dir.join(name);
                        if let Some(parent) = path.parent() {
                            std::fs::create_dir_all(parent).unwrap();
                        }
                        std::fs::write(path, content).unwrap();
                    }
                }
                ExitResult::Exited { code: 0 }
            }
            Script::Exit(code) => ExitResult::Exited { code },
            Script::Hang => {
                let left = timeout.saturating_sub(started.elapsed());
                tokio::select! {
                    _ = killed.wait_for(|k| *k) => ExitResult::Exited { code: 137 },
                    _ = tokio::time::sleep(left) => {
                        self.kill(handle);
                        ExitResult::TimedOut
                    }
                }
            }
            Script::Delayed(..) | Script::RejectLaunch(_) | Script::Unavailable => {
                ExitResult::Failed("never started".to_string())
            }
        }
    }

    fn finish(&self, container_id: &str) {
        if let Some(worker) = self.state.lock().unwrap().workers.get_mut(container_id) {
            worker.running = false;
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn start(&self, spec: &WorkerSpec) -> Result<ContainerHandle, RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let script = state.queue.pop_front().unwrap_or_else(|| self.default.clone());

        match script {
            Script::RejectLaunch(reason) => return Err(RuntimeError::LaunchRejected(reason)),
            Script::Unavailable => {
                return Err(RuntimeError::Unavailable("engine offline".to_string()))
            }
            _ => {}
        }

        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let output_dir = spec
            .mounts
            .iter()
            .find(|m| !m.read_only)
            .map(|m| m.host_path.clone());

        state.started.push(spec.clone());
        state.workers.insert(
            id.clone(),
            FakeWorker {
                script,
                output_dir,
                killed: watch::channel(false).0,
                running: true,
            },
        );
        Ok(ContainerHandle::new(id))
    }

    async fn await_completion(&self, handle: &ContainerHandle, timeout: Duration) -> ExitResult {
        let worker = {
            let state = self.state.lock().unwrap();
            state
                .workers
                .get(&handle.id)
                .map(|w| (w.script.clone(), w.output_dir.clone(), w.killed.subscribe()))
        };
        let Some((script, output_dir, killed)) = worker else {
            return ExitResult::Unknown;
        };

        let result = self.play(handle, script, output_dir, killed, timeout).await;
        self.finish(&handle.id);
        result
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.kill(handle);
        Ok(())
    }

    async fn remove(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        if self.is_running(&handle.id) {
            self.kill(handle);
        }
        let mut state = self.state.lock().unwrap();
        if state.workers.remove(&handle.id).is_some() {
            state.removed.push(handle.id.clone());
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        !self.state.lock().unwrap().disconnected
    }

    async fn disconnect(&self) {
        self.state.lock().unwrap().disconnected = true;
    }
}
