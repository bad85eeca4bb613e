//! Status snapshots: structured per-instance info and its flattened
//! key/value form.
//!
//! Flattened keys are dotted paths prefixed with the instance name, e.g.
//! `n1.my_node_info.virtual_ipv4`. Absent values flatten to `""`.

use crate::instance::{InstanceName, InstanceState, NetworkInstance};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// One flattened attribute of one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InfoRecord {
    pub key: String,
    pub value: String,
}

impl InfoRecord {
    fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Addressing details of the local node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeInfo {
    pub virtual_ipv4: Option<String>,
    pub hostname: Option<String>,
}

/// Point-in-time snapshot of one instance.
///
/// Field order is the flattened key order.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceInfo {
    #[serde(skip)]
    pub instance_name: InstanceName,
    pub instance_id: Uuid,
    pub running: bool,
    pub state: InstanceState,
    pub network_name: String,
    pub my_node_info: NodeInfo,
    pub peer_count: usize,
    pub listener_count: usize,
    pub port_forward_count: usize,
    pub tun_fd: Option<i32>,
    pub heartbeats: u64,
    pub uptime_secs: i64,
    pub error_msg: Option<String>,
}

impl InstanceInfo {
    /// Snapshot a running instance.
    pub fn capture(instance: &NetworkInstance) -> Self {
        let config = instance.config();
        let status = instance.status();
        let error_msg = instance
            .exited_unexpectedly()
            .then(|| "instance task exited unexpectedly".to_string());

        Self {
            instance_name: config.instance_name.clone(),
            instance_id: config.instance_id,
            running: instance.is_running(),
            state: status.state,
            network_name: config.network_identity.network_name.clone(),
            my_node_info: NodeInfo {
                virtual_ipv4: config.ipv4.map(|ip| ip.addr.to_string()),
                hostname: config.hostname.clone(),
            },
            peer_count: config.peers.len(),
            listener_count: config.listeners.len(),
            port_forward_count: config.port_forwards.len(),
            tun_fd: instance.tunnel().map(|t| t.raw()),
            heartbeats: status.heartbeats,
            uptime_secs: (chrono::Utc::now() - instance.created_at()).num_seconds(),
            error_msg,
        }
    }

    /// Flatten into dotted key/value records.
    pub fn records(&self) -> Vec<InfoRecord> {
        let mut out = Vec::new();
        match serde_json::to_value(self) {
            Ok(value) => flatten(self.instance_name.as_str(), &value, &mut out),
            Err(e) => {
                tracing::warn!(instance = %self.instance_name, error = %e, "Failed to serialize instance info");
            }
        }
        out
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut Vec<InfoRecord>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten(&format!("{prefix}.{key}"), child, out);
            }
        }
        Value::Array(items) => {
            for (i, child) in items.iter().enumerate() {
                flatten(&format!("{prefix}.{i}"), child, out);
            }
        }
        Value::Null => out.push(InfoRecord::new(prefix, "")),
        Value::String(s) => out.push(InfoRecord::new(prefix, s.as_str())),
        other => out.push(InfoRecord::new(prefix, other.to_string())),
    }
}

/// Flatten snapshots in order and keep at most `max_records` records.
///
/// Truncation is record-granular, so the last instance may be cut mid-way.
pub fn flatten_truncated(infos: &[InstanceInfo], max_records: usize) -> Vec<InfoRecord> {
    if max_records == 0 {
        return Vec::new();
    }
    infos
        .iter()
        .flat_map(InstanceInfo::records)
        .take(max_records)
        .collect()
}

/// Liveness check over flattened records.
///
/// Records are read in order and the last `running` and `error_msg` keys
/// win, so with several instances the one flattened last decides. Alive
/// means: the final `running` is truthy, some `virtual_ipv4` key has a real
/// value, and the final `error_msg` is blank.
pub struct Liveness;

impl Liveness {
    /// Evaluate a set of records.
    pub fn evaluate(records: &[InfoRecord]) -> bool {
        let mut running = None;
        let mut has_ip = false;
        let mut error: Option<&str> = None;

        for record in records {
            let key = record.key.to_lowercase();
            if key_is(&key, "running") {
                running = Some(is_truthy(&record.value));
            }
            if key.contains("virtual_ipv4") && !is_blank(&record.value) {
                has_ip = true;
            }
            if key_is(&key, "error_msg") {
                error = Some(record.value.as_str());
            }
        }

        running == Some(true) && has_ip && error.map_or(true, is_blank)
    }
}

fn key_is(key: &str, name: &str) -> bool {
    key == name || key.ends_with(&format!(".{name}"))
}

fn is_blank(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.eq_ignore_ascii_case("null")
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(name: &str) -> InstanceInfo {
        InstanceInfo {
            instance_name: InstanceName::new(name).unwrap(),
            instance_id: Uuid::nil(),
            running: true,
            state: InstanceState::Running,
            network_name: "net".into(),
            my_node_info: NodeInfo {
                virtual_ipv4: Some("10.144.144.1".into()),
                hostname: None,
            },
            peer_count: 2,
            listener_count: 3,
            port_forward_count: 0,
            tun_fd: Some(42),
            heartbeats: 5,
            uptime_secs: 9,
            error_msg: None,
        }
    }

    #[test]
    fn test_records_are_prefixed_and_ordered() {
        let records = info("n1").records();
        let keys: Vec<_> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "n1.instance_id",
                "n1.running",
                "n1.state",
                "n1.network_name",
                "n1.my_node_info.virtual_ipv4",
                "n1.my_node_info.hostname",
                "n1.peer_count",
                "n1.listener_count",
                "n1.port_forward_count",
                "n1.tun_fd",
                "n1.heartbeats",
                "n1.uptime_secs",
                "n1.error_msg",
            ]
        );
        assert_eq!(records[1].value, "true");
        assert_eq!(records[2].value, "running");
        assert_eq!(records[4].value, "10.144.144.1");
        assert_eq!(records[5].value, "");
        assert_eq!(records[9].value, "42");
    }

    #[test]
    fn test_truncation_keeps_earlier_records() {
        let infos = vec![info("a"), info("b")];
        let per_instance = infos[0].records().len();

        assert!(flatten_truncated(&infos, 0).is_empty());

        let cut = flatten_truncated(&infos, per_instance + 2);
        assert_eq!(cut.len(), per_instance + 2);
        assert!(cut[..per_instance].iter().all(|r| r.key.starts_with("a.")));
        assert_eq!(cut[per_instance].key, "b.instance_id");

        let all = flatten_truncated(&infos, 1000);
        assert_eq!(all.len(), per_instance * 2);
    }

    #[test]
    fn test_liveness_healthy_instance() {
        assert!(Liveness::evaluate(&info("n1").records()));
    }

    #[test]
    fn test_liveness_requires_ip_and_running() {
        let mut no_ip = info("n1");
        no_ip.my_node_info.virtual_ipv4 = None;
        assert!(!Liveness::evaluate(&no_ip.records()));

        let mut stopped = info("n1");
        stopped.running = false;
        assert!(!Liveness::evaluate(&stopped.records()));

        assert!(!Liveness::evaluate(&[]));
    }

    #[test]
    fn test_liveness_rejects_error_message() {
        let mut failed = info("n1");
        failed.error_msg = Some("tun closed".into());
        assert!(!Liveness::evaluate(&failed.records()));

        let literal_null = vec![
            InfoRecord::new("running", "YES"),
            InfoRecord::new("my_node_info.virtual_ipv4", "10.0.0.2"),
            InfoRecord::new("error_msg", "null"),
        ];
        assert!(Liveness::evaluate(&literal_null));
    }

    #[test]
    fn test_liveness_last_running_key_wins() {
        let records = vec![
            InfoRecord::new("a.running", "true"),
            InfoRecord::new("a.my_node_info.virtual_ipv4", "10.144.144.2"),
            InfoRecord::new("b.running", "false"),
        ];
        assert!(!Liveness::evaluate(&records));

        let recovered = vec![
            InfoRecord::new("a.running", "false"),
            InfoRecord::new("a.error_msg", "tun closed"),
            InfoRecord::new("b.running", "true"),
            InfoRecord::new("b.my_node_info.virtual_ipv4", "10.144.144.3"),
            InfoRecord::new("b.error_msg", ""),
        ];
        assert!(Liveness::evaluate(&recovered));
    }
}
