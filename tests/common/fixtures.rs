//! Test fixture creation
//!
//! Lays out a playbook directory, an inventory directory and a fake
//! `ansible-playbook` executable in a temporary directory.

use super::constants::*;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Paths of a prepared fixture tree.
pub struct Fixture {
    _dir: TempDir,
    pub playbook_dir: PathBuf,
    pub inventory_dir: PathBuf,
    pub default_inventory: PathBuf,
    pub job_storage_dir: PathBuf,
    pub engine_binary: PathBuf,
}

/// Stand-in for `ansible-playbook`. The playbook is the last argument;
/// playbooks named `failing*` end with a failed recap and exit code 2.
const FAKE_ENGINE: &str = r#"#!/bin/sh
for arg in "$@"; do playbook="$arg"; done
echo "PLAY [all] *****"
echo "TASK [Gathering Facts] *****"
case "$playbook" in
  *failing*)
    echo "fatal: [web1]: FAILED! => {\"msg\": \"task failed\"}"
    echo ""
    echo "PLAY RECAP *****"
    echo "web1                       : ok=1    changed=0    unreachable=0    failed=1    skipped=0    rescued=0    ignored=0"
    echo "task failed" >&2
    exit 2
    ;;
  *)
    echo "ok: [web1]"
    echo "changed: [web1]"
    echo ""
    echo "PLAY RECAP *****"
    echo "web1                       : ok=2    changed=1    unreachable=0    failed=0    skipped=0    rescued=0    ignored=0"
    exit 0
    ;;
esac
"#;

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(unix)]
fn write_engine(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    write_file(path, FAKE_ENGINE)?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn write_engine(path: &Path) -> Result<()> {
    write_file(path, FAKE_ENGINE)
}

/// Creates the fixture tree used by [`super::TestServer`].
pub fn create_fixture() -> Result<Fixture> {
    let dir = TempDir::new()?;
    let root = dir.path().to_path_buf();

    let playbook_dir = root.join("playbooks");
    let inventory_dir = root.join("inventory");
    let job_storage_dir = root.join("jobs");
    let engine_binary = root.join("bin").join("ansible-playbook");

    write_file(&playbook_dir.join(PLAYBOOK_OK), "- hosts: all\n")?;
    write_file(&playbook_dir.join(PLAYBOOK_FAILING), "- hosts: all\n")?;
    write_file(&playbook_dir.join(PLAYBOOK_NESTED), "- hosts: all\n")?;
    write_file(&playbook_dir.join(NOT_A_PLAYBOOK), "# playbooks\n")?;

    let default_inventory = inventory_dir.join("hosts");
    write_file(&default_inventory, "[web]\nweb1\n")?;
    write_file(&inventory_dir.join(INVENTORY_STAGING), "[web]\nstaging1\n")?;

    fs::create_dir_all(&job_storage_dir)?;
    write_engine(&engine_binary)?;

    Ok(Fixture {
        _dir: dir,
        playbook_dir,
        inventory_dir,
        default_inventory,
        job_storage_dir,
        engine_binary,
    })
}
