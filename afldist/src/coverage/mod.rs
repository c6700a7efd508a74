//! Coverage pipeline: afl-cov collects coverage of the campaign's queue
//! while a report server waits for, and then serves, the rendered report.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::anyhow;

use crate::{
    config::CoverageConfig,
    constants::{REPORT_SERVER_SCOPE, WORKER_JOIN_POLL_INTERVAL},
    error::{OrchestratorError, Result},
    events::{EventSink, Severity},
    resolve::ensure_exists,
    supervisor::SupervisionResult,
};

mod collector;
mod server;

pub use collector::{build_collector_command, compose_coverage_command, CoverageCollector};
pub use server::{BoundReportServer, ReportServer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageReport {
    pub collector: SupervisionResult,
}

#[derive(Debug)]
pub struct CoverageCoordinator {
    config: CoverageConfig,
    sink: Arc<dyn EventSink>,
}

impl CoverageCoordinator {
    pub fn new(config: CoverageConfig, sink: Arc<dyn EventSink>) -> Result<CoverageCoordinator> {
        if config.toolchain.afl_cov.is_absolute() {
            ensure_exists(&config.toolchain.afl_cov, "afl-cov binary")?;
        }
        ensure_exists(&config.fuzz_out, "fuzzing output directory")?;
        ensure_exists(&config.cov_dir, "coverage build directory")?;
        Ok(CoverageCoordinator { config, sink })
    }

    pub fn config(&self) -> &CoverageConfig {
        &self.config
    }

    /// Run afl-cov and the report server concurrently and join both.
    ///
    /// Fails right away if afl-cov aborted during startup. A server that
    /// failed to bind is reported but does not stop the collector. Since the
    /// server never terminates on its own, this only returns early on errors.
    pub fn run(self) -> Result<CoverageReport> {
        let server = ReportServer::from_config(&self.config, Arc::clone(&self.sink));
        let mut server_handle = Some(
            thread::Builder::new()
                .name("report-server".to_owned())
                .spawn(move || server.run())?,
        );

        let collector = CoverageCollector::new(&self.config, Arc::clone(&self.sink));
        let collector_handle = thread::Builder::new()
            .name("afl-cov".to_owned())
            .spawn(move || collector.run())?;

        while !collector_handle.is_finished() {
            if server_handle.as_ref().map_or(false, JoinHandle::is_finished) {
                if let Some(handle) = server_handle.take() {
                    self.report_server_exit(handle);
                }
            }
            thread::sleep(WORKER_JOIN_POLL_INTERVAL);
        }

        let collector = collector_handle
            .join()
            .map_err(|_| anyhow!("afl-cov supervisor thread panicked"))??;

        if let Some(handle) = server_handle {
            self.report_server_exit(handle);
        }

        Ok(CoverageReport { collector })
    }

    fn report_server_exit(&self, handle: JoinHandle<Result<()>>) {
        let err = match handle.join() {
            Ok(Ok(())) => return,
            Ok(Err(err)) => err,
            Err(_) => OrchestratorError::Other(anyhow!("Report server thread panicked")),
        };
        self.sink.emit(Severity::Critical, REPORT_SERVER_SCOPE, &err.to_string());
    }
}
