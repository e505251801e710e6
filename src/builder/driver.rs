//! The build driver.
//!
//! Walks the resolved order with a bounded pool of worker threads. A node is
//! dispatched once every dependency in the build set is built; the ready
//! queue is drained in build-order position, so with one worker the driver
//! follows the build order exactly. A failed node takes its transitive
//! dependents down with it while unrelated branches continue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use petgraph::graph::NodeIndex;

use crate::builder::collaborator::{BuildFailure, BuildRequest, BuiltDependency, NodeBuilder};
use crate::builder::events::{BuildEvent, EventSink};
use crate::builder::report::{BuildReport, NodeReport, NodeStatus};
use crate::core::dependency::DepKind;
use crate::core::node::NodeKind;
use crate::resolver::distribution::Assembly;
use crate::resolver::platform::ResolvedGraph;
use crate::util::config::RunConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cause recorded for nodes dropped because the build was cancelled.
pub const CANCELLED: &str = "cancelled";

struct Job<'a> {
    index: NodeIndex,
    request: BuildRequest<'a>,
}

struct Outcome {
    index: NodeIndex,
    result: Result<PathBuf, BuildFailure>,
    duration: Duration,
}

/// Drives the build of a resolved graph through a [`NodeBuilder`].
pub struct BuildDriver<'a> {
    graph: &'a ResolvedGraph,
    builder: &'a dyn NodeBuilder,
    config: &'a RunConfig,
    cancel: Arc<AtomicBool>,
    libraries: HashMap<NodeIndex, PathBuf>,
    assemblies: HashMap<NodeIndex, Assembly>,
    events: Option<&'a dyn EventSink>,
    progress: bool,
}

impl<'a> BuildDriver<'a> {
    pub fn new(
        graph: &'a ResolvedGraph,
        builder: &'a dyn NodeBuilder,
        config: &'a RunConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        BuildDriver {
            graph,
            builder,
            config,
            cancel,
            libraries: HashMap::new(),
            assemblies: HashMap::new(),
            events: None,
            progress: false,
        }
    }

    /// Verified paths of the libraries in the build set.
    pub fn with_libraries(mut self, libraries: HashMap<NodeIndex, PathBuf>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Assembled content of the distributions in the build set.
    pub fn with_assemblies(mut self, assemblies: HashMap<NodeIndex, Assembly>) -> Self {
        self.assemblies = assemblies;
        self
    }

    pub fn with_events(mut self, events: &'a dyn EventSink) -> Self {
        self.events = Some(events);
        self
    }

    /// Show a progress bar for multi-node builds.
    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn emit(&self, event: BuildEvent) {
        if let Some(events) = self.events {
            events.emit(&event);
        }
    }

    /// Build `targets` and everything they depend on.
    ///
    /// Cancellation stops dispatching: queued nodes are skipped and running
    /// nodes that fail afterwards are interrupted. A fatal collaborator
    /// failure cancels the same way; the run is reported interrupted only if
    /// it cut a running node short, otherwise it is a partial failure.
    pub fn run(&self, targets: &[NodeIndex]) -> BuildReport {
        let start = Instant::now();
        let set = self.graph.closure(targets);
        let total = set.len();
        let members: HashSet<NodeIndex> = set.iter().copied().collect();

        self.emit(BuildEvent::started(self.graph.platform().to_string(), total));
        tracing::info!(
            "Building {} node(s) for {} with {} job(s)",
            total,
            self.graph.platform(),
            self.config.jobs
        );

        let mut state = Schedule::new(self.graph, &set, &members);

        let pb = if self.progress && total > 1 {
            let pb = ProgressBar::new(total as u64);
            if let Ok(style) =
                ProgressStyle::default_bar().template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let workers = self.config.jobs.max(1).min(total.max(1));
        let cancel: &AtomicBool = &self.cancel;
        let mut interrupted = false;

        let (job_tx, job_rx) = mpsc::channel::<Job<'_>>();
        let (result_tx, result_rx) = mpsc::channel::<Outcome>();
        let job_rx = Mutex::new(job_rx);
        let job_rx_ref = &job_rx;

        std::thread::scope(|s| {
            for _ in 0..workers {
                let tx = result_tx.clone();
                s.spawn(move || loop {
                    let job = match job_rx_ref.lock().unwrap_or_else(PoisonError::into_inner).recv() {
                        Ok(job) => job,
                        Err(_) => break,
                    };
                    let started = Instant::now();
                    let result = self.builder.build(&job.request);
                    let outcome = Outcome {
                        index: job.index,
                        result,
                        duration: started.elapsed(),
                    };
                    if tx.send(outcome).is_err() {
                        break;
                    }
                });
            }
            drop(result_tx);

            let mut in_flight = 0usize;
            let mut stopping = false;

            loop {
                if !stopping && cancel.load(Ordering::SeqCst) {
                    stopping = true;
                    interrupted = !state.fatal;
                    tracing::warn!("Build cancelled, waiting for {} running node(s)", in_flight);
                    self.emit(BuildEvent::diagnostic("warning", "build cancelled"));
                }

                while !stopping && in_flight < workers {
                    let Some(index) = state.next_ready() else { break };
                    let node = self.graph.node(index);

                    if node.kind() == NodeKind::Library {
                        let status = match self.libraries.get(&index) {
                            Some(path) => NodeStatus::Built {
                                artifact: path.clone(),
                            },
                            None => NodeStatus::Failed {
                                message: "library was not verified".to_string(),
                            },
                        };
                        self.finish(&mut state, index, status, None, pb.as_ref());
                        continue;
                    }

                    tracing::debug!("Dispatching {}", node.label);
                    self.emit(BuildEvent::NodeStarted {
                        label: node.label.clone(),
                        kind: node.kind(),
                    });
                    let request = self.request(index, &state.artifacts, cancel);
                    if job_tx.send(Job { index, request }).is_err() {
                        break;
                    }
                    in_flight += 1;
                }

                if in_flight == 0 {
                    break;
                }

                let outcome = match result_rx.recv_timeout(POLL_INTERVAL) {
                    Ok(outcome) => outcome,
                    Err(mpsc::RecvTimeoutError::Timeout) => continue,
                    Err(mpsc::RecvTimeoutError::Disconnected) => break,
                };
                in_flight -= 1;

                let status = match outcome.result {
                    Ok(artifact) => NodeStatus::Built { artifact },
                    Err(_) if stopping || cancel.load(Ordering::SeqCst) && !state.fatal => {
                        NodeStatus::Interrupted
                    }
                    Err(failure) => {
                        if failure.fatal {
                            tracing::error!(
                                "{} failed fatally, cancelling the build: {}",
                                self.graph.node(outcome.index).label,
                                failure.message
                            );
                            state.fatal = true;
                            cancel.store(true, Ordering::SeqCst);
                        }
                        NodeStatus::Failed {
                            message: failure.message,
                        }
                    }
                };
                self.finish(&mut state, outcome.index, status, Some(outcome.duration), pb.as_ref());
            }

            drop(job_tx);
        });

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        // A fatal failure that cut running nodes short interrupts the run too.
        interrupted |= state
            .status
            .values()
            .any(|status| matches!(status, NodeStatus::Interrupted));

        let nodes = set
            .iter()
            .map(|&index| {
                let node = self.graph.node(index);
                let status = state.status.remove(&index).unwrap_or_else(|| NodeStatus::Skipped {
                    cause: CANCELLED.to_string(),
                });
                NodeReport {
                    label: node.label.clone(),
                    kind: node.kind(),
                    status,
                }
            })
            .collect();

        let report = BuildReport {
            nodes,
            interrupted,
            duration: start.elapsed(),
        };
        self.emit(BuildEvent::finished(&report));
        report
    }

    /// Record the terminal status of `index` and release or skip its
    /// dependents.
    fn finish(
        &self,
        state: &mut Schedule,
        index: NodeIndex,
        status: NodeStatus,
        duration: Option<Duration>,
        pb: Option<&ProgressBar>,
    ) {
        let node = self.graph.node(index);
        let report = NodeReport {
            label: node.label.clone(),
            kind: node.kind(),
            status: status.clone(),
        };

        match &status {
            NodeStatus::Built { artifact } => {
                tracing::debug!("Built {} -> {}", node.label, artifact.display());
                state.artifacts.insert(index, artifact.clone());
                state.release(index);
            }
            NodeStatus::Failed { message } => {
                tracing::warn!("Failed to build {}: {}", node.label, message);
                for skipped in state.skip_dependents(index, &node.label) {
                    let node = self.graph.node(skipped);
                    self.emit(BuildEvent::NodeFinished {
                        node: NodeReport {
                            label: node.label.clone(),
                            kind: node.kind(),
                            status: NodeStatus::Skipped {
                                cause: report.label.clone(),
                            },
                        },
                        duration_ms: None,
                    });
                    if let Some(pb) = pb {
                        pb.inc(1);
                    }
                }
            }
            NodeStatus::Skipped { .. } | NodeStatus::Interrupted => {}
        }

        state.status.insert(index, status);
        self.emit(BuildEvent::NodeFinished {
            node: report,
            duration_ms: duration.map(|d| d.as_millis() as u64),
        });
        if let Some(pb) = pb {
            pb.set_message(node.label.clone());
            pb.inc(1);
        }
    }

    fn request<'r>(
        &'r self,
        index: NodeIndex,
        artifacts: &HashMap<NodeIndex, PathBuf>,
        cancel: &'r AtomicBool,
    ) -> BuildRequest<'r> {
        let node = self.graph.node(index);
        let built = |dep: NodeIndex, kind: DepKind| {
            artifacts.get(&dep).map(|artifact| BuiltDependency {
                label: self.graph.node(dep).label.clone(),
                kind,
                artifact: artifact.clone(),
            })
        };

        let direct: Vec<BuiltDependency> = self
            .graph
            .dependencies(index)
            .into_iter()
            .filter_map(|(dep, kind)| built(dep, kind))
            .collect();
        let generated_roots = direct
            .iter()
            .filter(|d| d.kind.is_generated())
            .map(|d| d.artifact.clone())
            .collect();

        let (output, dependencies) = match self.assemblies.get(&index) {
            Some(assembly) => {
                let mut packaged: Vec<BuiltDependency> = assembly
                    .artifacts
                    .iter()
                    .filter_map(|a| self.graph.find(&a.label))
                    .filter_map(|dep| built(dep, DepKind::Member))
                    .collect();
                packaged.extend(direct.into_iter().filter(|d| d.kind == DepKind::Distribution));
                (assembly.output_path.clone(), packaged)
            }
            None => {
                let output = match &node.output {
                    Some(path) => node.suite_dir.join(path),
                    None if node.kind() == NodeKind::Distribution => {
                        self.config.output_dir.join("dists").join(node.name())
                    }
                    None => self.config.output_dir.join(&node.suite).join(node.name()),
                };
                (output, direct)
            }
        };

        BuildRequest {
            node,
            output,
            dependencies,
            generated_roots,
            platform: self.graph.platform(),
            cancel,
        }
    }
}

/// Scheduling state, owned by the dispatching thread.
struct Schedule {
    remaining: HashMap<NodeIndex, usize>,
    dependents: HashMap<NodeIndex, Vec<NodeIndex>>,
    position: HashMap<NodeIndex, usize>,
    ready: BinaryHeap<Reverse<(usize, usize)>>,
    status: HashMap<NodeIndex, NodeStatus>,
    artifacts: HashMap<NodeIndex, PathBuf>,
    fatal: bool,
}

impl Schedule {
    fn new(graph: &ResolvedGraph, set: &[NodeIndex], members: &HashSet<NodeIndex>) -> Self {
        let mut schedule = Schedule {
            remaining: HashMap::new(),
            dependents: HashMap::new(),
            position: HashMap::new(),
            ready: BinaryHeap::new(),
            status: HashMap::new(),
            artifacts: HashMap::new(),
            fatal: false,
        };

        for &index in set {
            let deps: HashSet<NodeIndex> = graph
                .dependencies(index)
                .into_iter()
                .map(|(d, _)| d)
                .filter(|d| members.contains(d))
                .collect();
            for &dep in &deps {
                schedule.dependents.entry(dep).or_default().push(index);
            }
            schedule.remaining.insert(index, deps.len());
            schedule.position.insert(index, graph.position(index));
            if deps.is_empty() {
                schedule.push_ready(index);
            }
        }
        schedule
    }

    fn push_ready(&mut self, index: NodeIndex) {
        let position = self.position.get(&index).copied().unwrap_or(usize::MAX);
        self.ready.push(Reverse((position, index.index())));
    }

    fn next_ready(&mut self) -> Option<NodeIndex> {
        self.ready
            .pop()
            .map(|Reverse((_, index))| NodeIndex::new(index))
    }

    /// `index` is built: dependents waiting only on it become ready.
    fn release(&mut self, index: NodeIndex) {
        let dependents = self.dependents.get(&index).cloned().unwrap_or_default();
        for dependent in dependents {
            if let Some(count) = self.remaining.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    self.push_ready(dependent);
                }
            }
        }
    }

    /// Mark every transitive dependent of the failed `index` skipped.
    fn skip_dependents(&mut self, index: NodeIndex, cause: &str) -> Vec<NodeIndex> {
        let mut skipped = Vec::new();
        let mut queue: VecDeque<NodeIndex> = VecDeque::from([index]);
        while let Some(node) = queue.pop_front() {
            for &dependent in self.dependents.get(&node).into_iter().flatten() {
                if self.status.contains_key(&dependent) {
                    continue;
                }
                self.status.insert(
                    dependent,
                    NodeStatus::Skipped {
                        cause: cause.to_string(),
                    },
                );
                skipped.push(dependent);
                queue.push_back(dependent);
            }
        }
        skipped
    }
}
