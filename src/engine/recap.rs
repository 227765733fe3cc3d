//! Parsing of `ansible-playbook` console output.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const RECAP_HEADER: &str = "PLAY RECAP";

/// Recap counter name -> stats key.
const RECAP_KEYS: &[(&str, &str)] = &[
    ("ok", "ok"),
    ("changed", "changed"),
    ("unreachable", "dark"),
    ("failed", "failures"),
    ("skipped", "skipped"),
    ("rescued", "rescued"),
    ("ignored", "ignored"),
];

const EVENT_KINDS: &[&str] = &["ok", "changed", "skipping", "failed", "fatal", "unreachable"];

/// Parse the `PLAY RECAP` block into per-host statistics.
///
/// The result always has every stats key. Hosts with a zero count are left out
/// of that key; every host listed in the recap appears under `processed`.
pub fn parse_recap(stdout: &str) -> Value {
    let mut stats: BTreeMap<&str, Map<String, Value>> = RECAP_KEYS
        .iter()
        .map(|(_, key)| (*key, Map::new()))
        .collect();
    stats.insert("processed", Map::new());

    let recap_lines = stdout
        .lines()
        .skip_while(|line| !line.starts_with(RECAP_HEADER))
        .skip(1)
        .take_while(|line| !line.trim().is_empty());

    for line in recap_lines {
        let Some((host, counters)) = line.split_once(" : ") else {
            continue;
        };
        let host = host.trim();
        if host.is_empty() {
            continue;
        }

        for counter in counters.split_whitespace() {
            let Some((name, count)) = counter.split_once('=') else {
                continue;
            };
            let Some((_, key)) = RECAP_KEYS.iter().find(|(recap, _)| *recap == name) else {
                continue;
            };
            let count: u64 = count.parse().unwrap_or(0);
            if count > 0 {
                if let Some(per_host) = stats.get_mut(key) {
                    per_host.insert(host.to_string(), json!(count));
                }
            }
        }
        if let Some(processed) = stats.get_mut("processed") {
            processed.insert(host.to_string(), json!(1));
        }
    }

    Value::Object(
        stats
            .into_iter()
            .map(|(key, per_host)| (key.to_string(), Value::Object(per_host)))
            .collect(),
    )
}

/// One per-host task result line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEvent {
    pub event: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl TaskEvent {
    pub fn is_failure(&self) -> bool {
        matches!(self.event.as_str(), "failed" | "fatal" | "unreachable")
    }
}

/// Extract task result lines such as `changed: [web1] => {...}`.
pub fn parse_task_events(stdout: &str) -> Vec<TaskEvent> {
    stdout.lines().filter_map(parse_event_line).collect()
}

fn parse_event_line(line: &str) -> Option<TaskEvent> {
    let (kind, rest) = line.split_once(": [")?;
    if !EVENT_KINDS.contains(&kind) {
        return None;
    }
    let (host, tail) = rest.split_once(']')?;
    let data = tail
        .split_once("=> ")
        .map(|(_, data)| data.trim().to_string())
        .filter(|data| !data.is_empty());

    Some(TaskEvent {
        event: kind.to_string(),
        host: host.to_string(),
        data,
    })
}
