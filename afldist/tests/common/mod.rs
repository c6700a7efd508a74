#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use afldist::config::Toolchain;

static SPAWN_LOCK: Mutex<()> = Mutex::new(());

/// Serializes tests that write and then execute scripts. Executing a script
/// while a concurrent fork still holds a write handle fails with ETXTBSY.
pub fn serial() -> MutexGuard<'static, ()> {
    SPAWN_LOCK.lock().unwrap_or_else(|err| err.into_inner())
}

/// Stand-in for taskset that drops `-c <cpu>` and runs the rest.
pub const TASKSET_STUB: &str = "#!/bin/sh\nshift 2\nexec \"$@\"\n";

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Toolchain whose afl-fuzz runs `afl_fuzz_body` as a shell script.
pub fn stub_toolchain(dir: &Path, afl_fuzz_body: &str) -> Toolchain {
    Toolchain {
        affinity_tool: write_script(dir, "taskset", TASKSET_STUB),
        afl_fuzz: write_script(dir, "afl-fuzz", afl_fuzz_body),
        afl_cov: write_script(dir, "afl-cov", "#!/bin/sh\nexit 0\n"),
    }
}
