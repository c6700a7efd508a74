//! CPU affinity and role assignment of the workers of a campaign.
//!
//! Worker `0` is always the master (afl-fuzz `-M`) and runs the exploitation
//! schedule. All other workers are slaves (`-S`) whose power schedule is
//! picked round-robin by CPU id, as recommended by AFL++'s
//! `docs/power_schedules.md`.

use std::{fmt, sync::Arc};

use crate::error::{OrchestratorError, Result};

/// CPU id reserved for the master instance.
pub const MASTER_CPU_ID: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// afl-fuzz master instance (`-M`). Exactly one per campaign.
    Coordinator,
    /// afl-fuzz slave instance (`-S`).
    Contributor,
}

impl Role {
    pub fn flag(self) -> &'static str {
        match self {
            Role::Coordinator => "-M",
            Role::Contributor => "-S",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Role::Coordinator => "master",
            Role::Contributor => "slave",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PowerSchedule {
    Exploit,
    Coe,
    Fast,
    Explore,
}

/// Schedules handed out to contributors, indexed by `cpu_id % len`.
pub const CONTRIBUTOR_SCHEDULES: [PowerSchedule; 3] =
    [PowerSchedule::Coe, PowerSchedule::Fast, PowerSchedule::Explore];

impl PowerSchedule {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerSchedule::Exploit => "exploit",
            PowerSchedule::Coe => "coe",
            PowerSchedule::Fast => "fast",
            PowerSchedule::Explore => "explore",
        }
    }

    pub fn for_role(role: Role, cpu_id: usize) -> PowerSchedule {
        match role {
            Role::Coordinator => PowerSchedule::Exploit,
            Role::Contributor => CONTRIBUTOR_SCHEDULES[cpu_id % CONTRIBUTOR_SCHEDULES.len()],
        }
    }
}

impl fmt::Display for PowerSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity and launch parameters of a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    cpu_id: usize,
    role: Role,
    schedule: PowerSchedule,
    instance_name: String,
    cmdline: Arc<[String]>,
}

impl WorkerSpec {
    /// Create the spec of the worker pinned to `cpu_id`. The master's CPU id
    /// is reserved, thus requesting it for a contributor (or any other CPU
    /// for the coordinator) is refused.
    pub fn new(cpu_id: usize, role: Role, cmdline: Arc<[String]>) -> Result<WorkerSpec> {
        match (role, cpu_id) {
            (Role::Contributor, MASTER_CPU_ID) => {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "CPU id {} is reserved for the master instance",
                    MASTER_CPU_ID
                )))
            }
            (Role::Coordinator, id) if id != MASTER_CPU_ID => {
                return Err(OrchestratorError::InvalidConfig(format!(
                    "The master instance must run on CPU {}, not on CPU {}",
                    MASTER_CPU_ID, id
                )))
            }
            _ => (),
        }

        Ok(WorkerSpec {
            cpu_id,
            role,
            schedule: PowerSchedule::for_role(role, cpu_id),
            instance_name: instance_name(cpu_id),
            cmdline,
        })
    }

    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn schedule(&self) -> PowerSchedule {
        self.schedule
    }

    /// Name passed to afl-fuzz via `-M`/`-S`, also used as log scope.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn cmdline(&self) -> &[String] {
        &self.cmdline
    }
}

pub fn instance_name(cpu_id: usize) -> String {
    format!("fuzz_{:02}", cpu_id)
}

/// Assign CPUs `0..num_instances` to the workers of a campaign. The
/// returned specs are ordered by CPU id, thus the coordinator comes first.
pub fn assign_workers(num_instances: usize, cmdline: Arc<[String]>) -> Result<Vec<WorkerSpec>> {
    if num_instances < 1 {
        return Err(OrchestratorError::InvalidConfig(
            "At least one afl-fuzz instance is required".to_owned(),
        ));
    }

    (0..num_instances)
        .map(|cpu_id| {
            let role = if cpu_id == MASTER_CPU_ID {
                Role::Coordinator
            } else {
                Role::Contributor
            };
            WorkerSpec::new(cpu_id, role, Arc::clone(&cmdline))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use super::*;

    fn cmdline() -> Arc<[String]> {
        vec!["/targets/png-fuzz/readpng".to_owned(), "@@".to_owned()].into()
    }

    #[test]
    fn test_single_instance_is_master() {
        let specs = assign_workers(1, cmdline()).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].role(), Role::Coordinator);
        assert_eq!(specs[0].schedule(), PowerSchedule::Exploit);
        assert_eq!(specs[0].instance_name(), "fuzz_00");
    }

    #[test]
    fn test_assignment_invariants() {
        for n in 1..=17 {
            let specs = assign_workers(n, cmdline()).unwrap();
            assert_eq!(specs.len(), n);

            let coordinators = specs
                .iter()
                .filter(|s| s.role() == Role::Coordinator)
                .collect::<Vec<_>>();
            assert_eq!(coordinators.len(), 1);
            assert_eq!(coordinators[0].cpu_id(), MASTER_CPU_ID);

            let cpu_ids: HashSet<_> = specs.iter().map(|s| s.cpu_id()).collect();
            assert_eq!(cpu_ids, (0..n).collect());

            for spec in specs.iter().filter(|s| s.role() == Role::Contributor) {
                let expected = [PowerSchedule::Coe, PowerSchedule::Fast, PowerSchedule::Explore]
                    [spec.cpu_id() % 3];
                assert_eq!(spec.schedule(), expected);
            }
        }
    }

    #[test]
    fn test_schedule_order_for_four_instances() {
        let schedules = assign_workers(4, cmdline())
            .unwrap()
            .iter()
            .map(|s| s.schedule().as_str())
            .collect::<Vec<_>>();
        assert_eq!(schedules, vec!["exploit", "fast", "explore", "coe"]);
    }

    #[test]
    fn test_zero_instances_is_invalid() {
        let err = assign_workers(0, cmdline()).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));
    }

    #[test]
    fn test_reserved_cpu_id() {
        let err = WorkerSpec::new(0, Role::Contributor, cmdline()).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));

        let err = WorkerSpec::new(3, Role::Coordinator, cmdline()).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidConfig(_)));

        let spec = WorkerSpec::new(12, Role::Contributor, cmdline()).unwrap();
        assert_eq!(spec.instance_name(), "fuzz_12");
        assert_eq!(spec.cmdline()[1], "@@");
    }
}
