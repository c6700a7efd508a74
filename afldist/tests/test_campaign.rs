mod common;

use std::{
    collections::HashSet,
    path::Path,
    sync::{atomic::AtomicBool, Arc},
};

use afldist::{
    campaign::FuzzingCampaign,
    config::{CampaignConfig, FuzzArgs},
    constants::CAMPAIGN_SCOPE,
    events::{RecordingSink, Severity},
    policy::{PowerSchedule, Role},
};

use common::{serial, stub_toolchain};

fn campaign_config(dir: &Path, num_instances: usize, afl_fuzz_body: &str) -> CampaignConfig {
    let mut config = CampaignConfig::new(
        num_instances,
        FuzzArgs::new(dir.join("corpus"), dir.join("out")),
        vec!["/bin/true".to_owned(), "@@".to_owned()],
    );
    config.toolchain = stub_toolchain(dir, afl_fuzz_body);
    config
}

#[test]
fn test_campaign_of_four_workers() {
    let _guard = serial();
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = campaign_config(
        tmp_dir.path(),
        4,
        "#!/bin/sh\n\
         echo \"[*] Entering queue cycle 1.\"\n\
         echo \"[*] Fuzzing test case #0 (10 total, 0 uniq crashes found)\"\n\
         exit 0\n",
    );

    let sink = Arc::new(RecordingSink::new());
    let report = FuzzingCampaign::new(config, sink.clone())
        .unwrap()
        .run(None);

    assert_eq!(report.outcomes.len(), 4);
    assert!(report.all_succeeded());

    let cpu_ids: HashSet<_> = report.outcomes.iter().map(|o| o.spec.cpu_id()).collect();
    assert_eq!(cpu_ids, (0..4).collect());

    let coordinators = report
        .outcomes
        .iter()
        .filter(|o| o.spec.role() == Role::Coordinator)
        .count();
    assert_eq!(coordinators, 1);
    assert_eq!(report.coordinator().unwrap().spec.cpu_id(), 0);

    let schedules = report
        .outcomes
        .iter()
        .map(|o| o.spec.schedule())
        .collect::<Vec<_>>();
    assert_eq!(
        schedules,
        vec![
            PowerSchedule::Exploit,
            PowerSchedule::Fast,
            PowerSchedule::Explore,
            PowerSchedule::Coe
        ]
    );

    // Each worker's output is logged under its own scope, in order.
    for outcome in &report.outcomes {
        let events = sink.events_for(outcome.spec.instance_name());
        let cycle = events
            .iter()
            .position(|e| e.text == "[*] Entering queue cycle 1.")
            .unwrap();
        let summary = events
            .iter()
            .position(|e| e.text.contains("10 total"))
            .unwrap();
        assert!(cycle < summary);
        assert_eq!(events[cycle].severity, Severity::Info);
        assert_eq!(events[summary].severity, Severity::Info);
        assert!(!events.iter().any(|e| e.severity == Severity::Critical));
        assert!(!outcome.result.fatal_marker);
        assert_eq!(outcome.result.exit_code(), Some(0));
    }
}

#[test]
fn test_non_zero_exit_is_reported_once() {
    let _guard = serial();
    let tmp_dir = tempfile::tempdir().unwrap();
    // $2 is the instance name passed via -M/-S.
    let config = campaign_config(
        tmp_dir.path(),
        3,
        "#!/bin/sh\n\
         if [ \"$2\" = \"fuzz_01\" ]; then\n\
             exit 7\n\
         fi\n\
         exit 0\n",
    );

    let sink = Arc::new(RecordingSink::new());
    let report = FuzzingCampaign::new(config, sink.clone())
        .unwrap()
        .run(None);
    assert_eq!(report.outcomes.len(), 3);

    let failed = report.failed().collect::<Vec<_>>();
    assert_eq!(failed.len(), 1);
    let failed = failed[0];
    assert_eq!(failed.spec.instance_name(), "fuzz_01");
    assert_eq!(failed.result.exit_code(), Some(7));
    assert!(failed.result.failure().is_some());

    let critical = sink
        .events_for("fuzz_01")
        .into_iter()
        .filter(|e| e.severity == Severity::Critical)
        .collect::<Vec<_>>();
    assert_eq!(critical.len(), 1);
    assert!(critical[0].text.contains('7'));
    assert!(critical[0]
        .text
        .contains(&failed.result.command.to_string()));

    for sibling in ["fuzz_00", "fuzz_02"] {
        assert!(!sink
            .events_for(sibling)
            .iter()
            .any(|e| e.severity == Severity::Critical));
    }
    for outcome in report.outcomes.iter().filter(|o| o.spec.cpu_id() != 1) {
        assert_eq!(outcome.result.exit_code(), Some(0));
    }
}

#[test]
fn test_fatal_abort_sets_marker() {
    let _guard = serial();
    let tmp_dir = tempfile::tempdir().unwrap();
    let config = campaign_config(
        tmp_dir.path(),
        1,
        "#!/bin/sh\n\
         echo \"[-] PROGRAM ABORT : No instrumentation detected\"\n\
         echo \"         Location : check_binary(), src/afl-fuzz-init.c:2350\"\n\
         exit 1\n",
    );

    let sink = Arc::new(RecordingSink::new());
    let report = FuzzingCampaign::new(config, sink.clone())
        .unwrap()
        .run(None);

    let outcome = report.coordinator().unwrap();
    assert!(outcome.result.fatal_marker);
    assert_eq!(outcome.result.exit_code(), Some(1));

    let events = sink.events_for("fuzz_00");
    let abort = events
        .iter()
        .find(|e| e.text.starts_with("[-] PROGRAM ABORT"))
        .unwrap();
    assert_eq!(abort.severity, Severity::Critical);
    // Location line as well as the exit report.
    assert_eq!(
        events
            .iter()
            .filter(|e| e.severity == Severity::Critical)
            .count(),
        3
    );
}

#[test]
fn test_workers_get_controlled_environment() {
    let _guard = serial();
    let tmp_dir = tempfile::tempdir().unwrap();
    let mut config = campaign_config(
        tmp_dir.path(),
        1,
        "#!/bin/sh\n\
         echo \"env: $AFL_NO_AFFINITY $AFL_SKIP_CPUFREQ ${HOME:-unset}\"\n",
    );
    config.env = vec![
        ("AFL_SKIP_CPUFREQ".to_owned(), "1".to_owned()),
        ("AFL_NO_AFFINITY".to_owned(), "0".to_owned()),
    ];

    let sink = Arc::new(RecordingSink::new());
    let report = FuzzingCampaign::new(config, sink.clone())
        .unwrap()
        .run(None);
    assert!(report.all_succeeded());

    let env_line = sink
        .events_for("fuzz_00")
        .into_iter()
        .find(|e| e.text.starts_with("env:"))
        .unwrap();
    assert_eq!(env_line.text, "env: 1 1 unset");
    assert_eq!(env_line.severity, Severity::Debug);
}

#[test]
fn test_missing_engine_binary_is_reported() {
    let _guard = serial();
    let tmp_dir = tempfile::tempdir().unwrap();
    let mut config = campaign_config(tmp_dir.path(), 2, "#!/bin/sh\nexit 0\n");
    // Passes validation since it is not absolute, but can not be spawned.
    config.toolchain.affinity_tool = "no-such-taskset-binary".into();

    let sink = Arc::new(RecordingSink::new());
    let report = FuzzingCampaign::new(config, sink.clone())
        .unwrap()
        .run(None);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.failed().count(), 2);
    assert!(report.outcomes.iter().all(|o| o.result.exit_code().is_none()));
}

#[test]
fn test_termination_request_is_reported_once() {
    let _guard = serial();
    let tmp_dir = tempfile::tempdir().unwrap();
    // PATH is not forwarded to the workers.
    let config = campaign_config(
        tmp_dir.path(),
        2,
        "#!/bin/sh\n\
         /bin/sleep 1\n\
         echo \"[*] Entering queue cycle 1.\"\n\
         exit 0\n",
    );

    let sink = Arc::new(RecordingSink::new());
    let flag = Arc::new(AtomicBool::new(true));
    let report = FuzzingCampaign::new(config, sink.clone())
        .unwrap()
        .run(Some(flag));

    let warnings = sink
        .events_for(CAMPAIGN_SCOPE)
        .into_iter()
        .filter(|e| e.text.starts_with("Termination requested"))
        .collect::<Vec<_>>();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].severity, Severity::Warning);

    // The workers were still joined and ran to completion.
    assert_eq!(report.outcomes.len(), 2);
    assert!(report.all_succeeded());
    for outcome in &report.outcomes {
        assert!(sink
            .events_for(outcome.spec.instance_name())
            .iter()
            .any(|e| e.text == "[*] Entering queue cycle 1."));
    }
}
