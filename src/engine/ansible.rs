//! Engine backed by the `ansible-playbook` command line tool.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

use super::recap::{parse_recap, parse_task_events, TaskEvent};
use super::{EngineError, EngineFlags, EngineResult, EngineStatus, ExecutionRequest, PlaybookEngine};

const ENV_DIR: &str = "env";
const EXTRAVARS_FILE: &str = "extravars";
const ARTIFACTS_DIR: &str = "artifacts";

pub struct AnsiblePlaybookEngine {
    binary: PathBuf,
}

impl AnsiblePlaybookEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Build the argument list, without the binary itself.
    fn build_args(
        request: &ExecutionRequest,
        extravars: Option<&Path>,
    ) -> Result<Vec<String>, EngineError> {
        let options = &request.options;
        let mut args = vec![
            "-i".to_string(),
            request.inventory.display().to_string(),
            "--forks".to_string(),
            options.forks.to_string(),
        ];

        if options.verbosity > 0 {
            args.push(format!("-{}", "v".repeat(options.verbosity as usize)));
        }
        if let Some(extravars) = extravars {
            args.push("--extra-vars".to_string());
            args.push(format!("@{}", extravars.display()));
        }
        if let Some(limit) = &options.limit {
            args.push("--limit".to_string());
            args.push(limit.clone());
        }
        if let Some(tags) = options.tags.as_ref().filter(|t| !t.is_empty()) {
            args.push("--tags".to_string());
            args.push(tags.join(","));
        }
        if let Some(skip_tags) = options.skip_tags.as_ref().filter(|t| !t.is_empty()) {
            args.push("--skip-tags".to_string());
            args.push(skip_tags.join(","));
        }
        if let Some(cmdline) = &options.cmdline {
            let tokens = shlex::split(cmdline)
                .ok_or_else(|| EngineError::InvalidCmdline(cmdline.clone()))?;
            args.extend(tokens);
        }

        args.push(request.playbook.display().to_string());
        Ok(args)
    }

    fn write_extravars(request: &ExecutionRequest) -> Result<Option<PathBuf>, EngineError> {
        if request.extra_vars.is_empty() {
            return Ok(None);
        }
        let env_dir = request.work_dir.join(ENV_DIR);
        fs::create_dir_all(&env_dir)?;
        let path = env_dir.join(EXTRAVARS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&request.extra_vars)?)?;
        Ok(Some(path))
    }

    fn audit_string(&self, args: &[String]) -> String {
        let binary = self.binary.display().to_string();
        let words: Vec<&str> = std::iter::once(binary.as_str())
            .chain(args.iter().map(String::as_str))
            .collect();
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }
}

fn filter_events(events: Vec<TaskEvent>, flags: EngineFlags) -> Vec<TaskEvent> {
    events
        .into_iter()
        .map(|mut event| {
            if flags.omit_event_data || (flags.only_failed_event_data && !event.is_failure()) {
                event.data = None;
            }
            event
        })
        .collect()
}

fn write_artifacts(work_dir: &Path, result: &EngineResult) -> Result<(), EngineError> {
    let dir = work_dir.join(ARTIFACTS_DIR);
    fs::create_dir_all(&dir)?;
    fs::write(dir.join("stdout"), &result.stdout)?;
    fs::write(dir.join("stderr"), &result.stderr)?;
    fs::write(dir.join("rc"), result.rc.to_string())?;
    fs::write(dir.join("command"), &result.command)?;

    let mut events = fs::File::create(dir.join("job_events.jsonl"))?;
    for event in &result.events {
        serde_json::to_writer(&mut events, event)?;
        events.write_all(b"\n")?;
    }
    Ok(())
}

impl PlaybookEngine for AnsiblePlaybookEngine {
    fn run(&self, request: &ExecutionRequest) -> Result<EngineResult, EngineError> {
        fs::create_dir_all(&request.work_dir)?;
        // The process runs inside the work dir, so paths under it must be absolute
        let request = &ExecutionRequest {
            work_dir: fs::canonicalize(&request.work_dir)?,
            ..request.clone()
        };
        let extravars = Self::write_extravars(request)?;
        let args = Self::build_args(request, extravars.as_deref())?;
        let command = self.audit_string(&args);

        debug!("[{}] Running: {}", request.job_id, command);
        let output = Command::new(&self.binary)
            .args(&args)
            .current_dir(&request.work_dir)
            .env("ANSIBLE_NOCOLOR", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| EngineError::Spawn {
                binary: self.binary.display().to_string(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        // Killed by a signal
        let rc = output.status.code().unwrap_or(-1);

        if !request.flags.suppress_output {
            for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
                info!("[{}] {}", request.job_id, line);
            }
            for line in stderr.lines().filter(|l| !l.trim().is_empty()) {
                warn!("[{}] {}", request.job_id, line);
            }
        }

        let result = EngineResult {
            status: if output.status.success() {
                EngineStatus::Successful
            } else {
                EngineStatus::Failed
            },
            rc,
            stats: parse_recap(&stdout),
            events: filter_events(parse_task_events(&stdout), request.flags),
            stdout,
            stderr,
            command,
        };

        write_artifacts(&request.work_dir, &result)?;
        Ok(result)
    }
}
