//! In-memory container runtime for tests and dry runs.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::commands;
use crate::error::{DriverError, DriverResult};
use crate::runtime::ContainerRuntime;
use crate::types::*;

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    spec: ContainerSpec,
    running: bool,
    health: ContainerHealth,
    stats: ResourceStats,
    files: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
struct FakeExec {
    running: bool,
    exit_code: Option<i64>,
}

/// One recorded exec call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecCall {
    pub container: String,
    pub cmd: Vec<String>,
    pub mode: ExecMode,
    pub privileged: bool,
}

#[derive(Default)]
struct FakeState {
    containers: BTreeMap<String, FakeContainer>,
    next_id: u64,
    images: HashSet<String>,
    pulled: Vec<String>,
    pull_failures: HashSet<String>,
    unreachable: bool,
    create_failures: HashMap<String, u32>,
    start_failures: HashMap<String, u32>,
    inspect_failures: HashMap<String, u32>,
    remove_failures: HashMap<String, u32>,
    exec_failures: HashMap<String, u32>,
    startup_health: HashMap<String, ContainerHealth>,
    execs: HashMap<String, FakeExec>,
    exec_log: Vec<ExecCall>,
    calls: HashMap<&'static str, usize>,
}

impl FakeState {
    fn record(&mut self, op: &'static str) -> DriverResult<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.unreachable {
            return Err(DriverError::Unreachable("fake runtime offline".into()));
        }
        Ok(())
    }

    fn key_of(&self, container: &str) -> DriverResult<String> {
        if self.containers.contains_key(container) {
            return Ok(container.to_string());
        }
        self.containers
            .iter()
            .find(|(_, c)| c.id == container)
            .map(|(name, _)| name.clone())
            .ok_or_else(|| DriverError::NotFound(format!("no such container: {container}")))
    }

    fn container_mut(&mut self, container: &str) -> DriverResult<&mut FakeContainer> {
        let key = self.key_of(container)?;
        self.containers
            .get_mut(&key)
            .ok_or_else(|| DriverError::NotFound(format!("no such container: {container}")))
    }

    fn health_after_start(&self, name: &str) -> ContainerHealth {
        self.startup_health
            .get(name)
            .copied()
            .unwrap_or(ContainerHealth::Healthy)
    }

    fn take_failure(failures: &mut HashMap<String, u32>, key: &str) -> bool {
        match failures.get_mut(key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

/// Container runtime that keeps everything in memory.
///
/// Supports fault injection per container name and records every call so
/// tests can assert on what the control plane asked for. Exec understands
/// the shapes in [`commands`]: `cat`, `tail -n` and heredoc appends operate
/// on a per-container file map; anything else succeeds with no output.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- seeding ---

    pub fn add_image(&self, image: &str) {
        self.state().images.insert(image.to_string());
    }

    /// Insert an existing container as if created earlier.
    pub fn seed_container(&self, spec: ContainerSpec, running: bool) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("fake{:08x}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                id: id.clone(),
                spec,
                running,
                health: ContainerHealth::None,
                stats: ResourceStats::default(),
                files: BTreeMap::new(),
            },
        );
        id
    }

    pub fn write_file(&self, container: &str, path: &str, content: &str) {
        if let Ok(c) = self.state().container_mut(container) {
            c.files.insert(path.to_string(), content.to_string());
        }
    }

    pub fn set_health(&self, container: &str, health: ContainerHealth) {
        if let Ok(c) = self.state().container_mut(container) {
            c.health = health;
        }
    }

    pub fn set_stats(&self, container: &str, stats: ResourceStats) {
        if let Ok(c) = self.state().container_mut(container) {
            c.stats = stats;
        }
    }

    /// Health a container with a health check reports after each start or
    /// restart. Defaults to healthy.
    pub fn set_startup_health(&self, name: &str, health: ContainerHealth) {
        self.state().startup_health.insert(name.to_string(), health);
    }

    pub fn set_running(&self, container: &str, running: bool) {
        if let Ok(c) = self.state().container_mut(container) {
            c.running = running;
        }
    }

    /// Finish a detached execution with `exit_code`.
    pub fn finish_exec(&self, exec_id: &str, exit_code: i64) {
        if let Some(exec) = self.state().execs.get_mut(exec_id) {
            exec.running = false;
            exec.exit_code = Some(exit_code);
        }
    }

    // --- fault injection ---

    /// Every call fails as if the daemon were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn fail_create(&self, name: &str, times: u32) {
        self.state().create_failures.insert(name.to_string(), times);
    }

    pub fn fail_start(&self, name: &str, times: u32) {
        self.state().start_failures.insert(name.to_string(), times);
    }

    pub fn fail_inspect(&self, name: &str, times: u32) {
        self.state().inspect_failures.insert(name.to_string(), times);
    }

    pub fn fail_remove(&self, name: &str, times: u32) {
        self.state().remove_failures.insert(name.to_string(), times);
    }

    /// The next `times` execs in `name` exit with status 1.
    pub fn fail_exec(&self, name: &str, times: u32) {
        self.state().exec_failures.insert(name.to_string(), times);
    }

    pub fn fail_pull(&self, image: &str) {
        self.state().pull_failures.insert(image.to_string());
    }

    // --- observation ---

    pub fn has_container(&self, name: &str) -> bool {
        self.state().containers.contains_key(name)
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state().containers.keys().cloned().collect()
    }

    pub fn container_id(&self, name: &str) -> Option<String> {
        self.state().containers.get(name).map(|c| c.id.clone())
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state().containers.get(name).is_some_and(|c| c.running)
    }

    pub fn spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state().containers.get(name).map(|c| c.spec.clone())
    }

    pub fn file(&self, container: &str, path: &str) -> Option<String> {
        let state = self.state();
        let key = state.key_of(container).ok()?;
        state.containers.get(&key)?.files.get(path).cloned()
    }

    /// How many times `op` was called, failed calls included.
    pub fn calls(&self, op: &str) -> usize {
        self.state().calls.get(op).copied().unwrap_or(0)
    }

    pub fn exec_log(&self) -> Vec<ExecCall> {
        self.state().exec_log.clone()
    }

    pub fn pulled_images(&self) -> Vec<String> {
        self.state().pulled.clone()
    }

    fn run_exec(
        &self,
        container: &str,
        cmd: &[String],
        mode: ExecMode,
        privileged: bool,
    ) -> DriverResult<ExecOutcome> {
        let mut state = self.state();
        state.record("exec")?;
        let key = state.key_of(container)?;
        state.exec_log.push(ExecCall {
            container: key.clone(),
            cmd: cmd.to_vec(),
            mode,
            privileged,
        });

        state.next_id += 1;
        let exec_id = format!("exec{:08x}", state.next_id);

        let running = state.containers.get(&key).is_some_and(|c| c.running);
        if !running {
            return Err(DriverError::Api(format!("container {key} is not running")));
        }

        if FakeState::take_failure(&mut state.exec_failures, &key) {
            state.execs.insert(
                exec_id,
                FakeExec {
                    running: false,
                    exit_code: Some(1),
                },
            );
            return Err(DriverError::NonZeroExit {
                code: 1,
                output: "injected failure".into(),
            });
        }

        if mode == ExecMode::Detached {
            state.execs.insert(
                exec_id.clone(),
                FakeExec {
                    running: true,
                    exit_code: None,
                },
            );
            return Ok(ExecOutcome::Started { exec_id });
        }

        let target = state.container_mut(&key)?;
        let output = match cmd {
            [program, path] if program == "cat" => match target.files.get(path) {
                Some(content) => content.clone(),
                None => {
                    return Err(DriverError::NonZeroExit {
                        code: 1,
                        output: format!("cat: {path}: No such file or directory"),
                    });
                }
            },
            [program, flag, n, path] if program == "tail" && flag == "-n" => {
                let n: usize = n.parse().unwrap_or(10);
                let content = target.files.get(path).cloned().unwrap_or_default();
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(n);
                lines[start..].join("\n")
            }
            _ => {
                if let Some((path, text)) = commands::parse_append(cmd) {
                    let file = target.files.entry(path.to_string()).or_default();
                    file.push_str(text);
                    file.push('\n');
                }
                String::new()
            }
        };

        state.execs.insert(
            exec_id.clone(),
            FakeExec {
                running: false,
                exit_code: Some(0),
            },
        );
        Ok(match mode {
            ExecMode::CaptureOutput => ExecOutcome::Output { exec_id, output },
            _ => ExecOutcome::Started { exec_id },
        })
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, spec: &ContainerSpec) -> DriverResult<String> {
        let mut state = self.state();
        state.record("create")?;
        if FakeState::take_failure(&mut state.create_failures, &spec.name) {
            return Err(DriverError::Api(format!("injected create failure for {}", spec.name)));
        }
        if state.containers.contains_key(&spec.name) {
            return Err(DriverError::Api(format!(
                "conflict: container name {} already in use",
                spec.name
            )));
        }
        drop(state);
        Ok(self.seed_container(spec.clone(), false))
    }

    async fn start(&self, container: &str) -> DriverResult<()> {
        let mut state = self.state();
        state.record("start")?;
        let key = state.key_of(container)?;
        if FakeState::take_failure(&mut state.start_failures, &key) {
            return Err(DriverError::Api(format!("injected start failure for {key}")));
        }
        let health = state.health_after_start(&key);
        let c = state.container_mut(&key)?;
        c.running = true;
        if c.spec.healthcheck.is_some() {
            c.health = health;
        }
        Ok(())
    }

    async fn stop(&self, container: &str) -> DriverResult<()> {
        let mut state = self.state();
        state.record("stop")?;
        state.container_mut(container)?.running = false;
        Ok(())
    }

    async fn restart(&self, container: &str) -> DriverResult<()> {
        let mut state = self.state();
        state.record("restart")?;
        let key = state.key_of(container)?;
        let health = state.health_after_start(&key);
        let c = state.container_mut(&key)?;
        c.running = true;
        if c.spec.healthcheck.is_some() {
            c.health = health;
        }
        Ok(())
    }

    async fn remove(&self, container: &str, force: bool) -> DriverResult<()> {
        let mut state = self.state();
        state.record("remove")?;
        let key = state.key_of(container)?;
        if FakeState::take_failure(&mut state.remove_failures, &key) {
            return Err(DriverError::Api(format!("injected remove failure for {key}")));
        }
        let running = state.containers.get(&key).is_some_and(|c| c.running);
        if running && !force {
            return Err(DriverError::Api(format!(
                "cannot remove running container {key}"
            )));
        }
        state.containers.remove(&key);
        Ok(())
    }

    async fn container_exists(&self, name: &str) -> DriverResult<bool> {
        let mut state = self.state();
        state.record("container_exists")?;
        Ok(state.containers.contains_key(name))
    }

    async fn inspect(&self, container: &str) -> DriverResult<ContainerState> {
        let mut state = self.state();
        state.record("inspect")?;
        let key = state.key_of(container)?;
        if FakeState::take_failure(&mut state.inspect_failures, &key) {
            return Err(DriverError::Api(format!("injected inspect failure for {key}")));
        }
        let c = state.container_mut(&key)?;
        Ok(ContainerState {
            id: c.id.clone(),
            running: c.running,
            health: c.health,
            working_dir: c.spec.working_dir.clone(),
            published_port: c.spec.ports.first().map(|p| p.host_port),
        })
    }

    async fn stats(&self, container: &str) -> DriverResult<ResourceStats> {
        let mut state = self.state();
        state.record("stats")?;
        let c = state.container_mut(container)?;
        if !c.running {
            return Ok(ResourceStats::default());
        }
        Ok(c.stats)
    }

    async fn exec(
        &self,
        container: &str,
        cmd: &[String],
        mode: ExecMode,
    ) -> DriverResult<ExecOutcome> {
        self.run_exec(container, cmd, mode, false)
    }

    async fn exec_privileged(&self, container: &str, cmd: &[String]) -> DriverResult<ExecOutcome> {
        self.run_exec(container, cmd, ExecMode::Blocking, true)
    }

    async fn exec_status(&self, exec_id: &str) -> DriverResult<ExecStatus> {
        let mut state = self.state();
        state.record("exec_status")?;
        state
            .execs
            .get(exec_id)
            .map(|e| ExecStatus {
                running: e.running,
                exit_code: e.exit_code,
            })
            .ok_or_else(|| DriverError::NotFound(format!("no such exec: {exec_id}")))
    }

    async fn list_images(&self) -> DriverResult<Vec<String>> {
        let mut state = self.state();
        state.record("list_images")?;
        let mut images: Vec<String> = state.images.iter().cloned().collect();
        images.sort();
        Ok(images)
    }

    async fn pull_image(&self, image: &str) -> DriverResult<()> {
        let mut state = self.state();
        state.record("pull_image")?;
        if state.pull_failures.contains(image) {
            return Err(DriverError::Api(format!("pull access denied for {image}")));
        }
        state.images.insert(image.to_string());
        state.pulled.push(image.to_string());
        Ok(())
    }
}
