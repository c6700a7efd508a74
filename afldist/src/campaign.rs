use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc, Arc,
    },
    thread,
};

use crate::{
    command::{build_worker_command, WorkerCommand},
    config::CampaignConfig,
    constants::{CAMPAIGN_SCOPE, WORKER_JOIN_POLL_INTERVAL},
    error::Result,
    events::{EventSink, Severity},
    policy::{assign_workers, Role, WorkerSpec},
    resolve::ensure_exists,
    supervisor::{SupervisionResult, WorkerExit, WorkerOutcome, WorkerProxy, WorkerSupervisor},
};

/// A validated campaign: every worker spec and command is built before the
/// first process is spawned.
#[derive(Debug)]
pub struct FuzzingCampaign {
    workers: Vec<(WorkerSpec, WorkerCommand)>,
    config: CampaignConfig,
    sink: Arc<dyn EventSink>,
}

impl FuzzingCampaign {
    pub fn new(config: CampaignConfig, sink: Arc<dyn EventSink>) -> Result<FuzzingCampaign> {
        for tool in [&config.toolchain.affinity_tool, &config.toolchain.afl_fuzz] {
            if tool.is_absolute() {
                ensure_exists(tool, "binary")?;
            }
        }

        let workers = assign_workers(config.num_instances, Arc::clone(&config.cmdline))?
            .into_iter()
            .map(|spec| {
                let cmd = build_worker_command(&spec, &config.fuzz_args, &config.toolchain)?;
                Ok((spec, cmd))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FuzzingCampaign {
            workers,
            config,
            sink,
        })
    }

    pub fn workers(&self) -> impl Iterator<Item = &(WorkerSpec, WorkerCommand)> {
        self.workers.iter()
    }

    pub fn output_dir(&self) -> &Path {
        &self.config.fuzz_args.output_dir
    }

    /// Start one supervisor thread per worker. The coordinator is started
    /// first, contributors follow by increasing CPU id.
    pub fn start(self) -> RunningCampaign {
        self.sink.emit(
            Severity::Warning,
            CAMPAIGN_SCOPE,
            &format!(
                "Starting {} afl-fuzz instances in distributed mode",
                self.workers.len()
            ),
        );

        let (tx, rx) = mpsc::channel();
        let mut proxies = Vec::with_capacity(self.workers.len());
        let mut unstarted = Vec::new();

        for (idx, (spec, cmd)) in self.workers.into_iter().enumerate() {
            if idx > 0 && !self.config.start_delay.is_zero() {
                thread::sleep(self.config.start_delay);
            }

            let supervisor = WorkerSupervisor::new(
                spec.clone(),
                cmd.clone(),
                self.config.env.clone(),
                Arc::clone(&self.sink),
            );
            match supervisor.start(tx.clone()) {
                Ok(proxy) => proxies.push(proxy),
                Err(err) => {
                    self.sink.emit(
                        Severity::Critical,
                        CAMPAIGN_SCOPE,
                        &format!(
                            "Failed to start supervisor thread for {}: {}",
                            spec.instance_name(),
                            err
                        ),
                    );
                    let result = SupervisionResult {
                        scope: spec.instance_name().to_owned(),
                        command: cmd,
                        exit: WorkerExit::SpawnFailed(err.to_string()),
                        fatal_marker: false,
                    };
                    unstarted.push(WorkerOutcome { spec, result });
                }
            }
        }

        RunningCampaign {
            proxies,
            results: rx,
            sink: self.sink,
            unstarted,
        }
    }

    /// Start the campaign and block until all workers terminated.
    pub fn run(self, termination_flag: Option<Arc<AtomicBool>>) -> CampaignReport {
        self.start().wait(termination_flag)
    }
}

/// A campaign whose supervisor threads are running.
#[derive(Debug)]
pub struct RunningCampaign {
    proxies: Vec<WorkerProxy>,
    results: mpsc::Receiver<WorkerOutcome>,
    sink: Arc<dyn EventSink>,
    /// Outcomes of workers whose supervisor thread could not be created.
    unstarted: Vec<WorkerOutcome>,
}

impl RunningCampaign {
    /// Block until every supervisor thread has finished. A raised
    /// `termination_flag` is only reported; the workers get the signal
    /// through their process group and are still joined.
    pub fn wait(self, termination_flag: Option<Arc<AtomicBool>>) -> CampaignReport {
        let mut termination_reported = false;
        while !self.proxies.iter().all(WorkerProxy::is_finished) {
            if !termination_reported {
                if let Some(flag) = termination_flag.as_ref() {
                    if flag.load(Ordering::SeqCst) {
                        self.sink.emit(
                            Severity::Warning,
                            CAMPAIGN_SCOPE,
                            "Termination requested, waiting for workers",
                        );
                        termination_reported = true;
                    }
                }
            }
            thread::sleep(WORKER_JOIN_POLL_INTERVAL);
        }

        for proxy in self.proxies {
            let name = proxy.name().to_owned();
            if let Err(err) = proxy.join() {
                self.sink
                    .emit(Severity::Critical, CAMPAIGN_SCOPE, &format!("{}: {:#}", name, err));
            }
        }

        let mut outcomes = self.results.try_iter().collect::<Vec<_>>();
        outcomes.extend(self.unstarted);
        outcomes.sort_by_key(|o| o.spec.cpu_id());

        CampaignReport { outcomes }
    }
}

/// Aggregated outcomes of a campaign, ordered by CPU id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignReport {
    pub outcomes: Vec<WorkerOutcome>,
}

impl CampaignReport {
    pub fn coordinator(&self) -> Option<&WorkerOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.spec.role() == Role::Coordinator)
    }

    pub fn failed(&self) -> impl Iterator<Item = &WorkerOutcome> {
        self.outcomes.iter().filter(|o| !o.result.is_success())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed().next().is_none()
    }
}
