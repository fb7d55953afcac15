//! Display formatting for CLI output
//!
//! SBIO pattern: Pure functions that format data for display

use super::commands::KubeconfigCheck;
use crate::cluster::types::{wire_name, Cluster};
use crate::config::GatewayConfig;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();
    push_row(&mut output, headers.iter().map(|h| h.to_uppercase()), &widths);
    for row in rows {
        push_row(&mut output, row.into_iter(), &widths);
    }
    output
}

fn push_row(output: &mut String, cells: impl Iterator<Item = String>, widths: &[usize]) {
    let mut line = String::new();
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            line.push_str("   ");
        }
        match widths.get(i) {
            Some(width) => line.push_str(&format!("{:width$}", cell, width = width)),
            None => line.push_str(&cell),
        }
    }
    output.push_str(line.trim_end());
    output.push('\n');
}

// ============================================================================
// Cluster display
// ============================================================================

/// Format cluster list for display
pub fn format_cluster_list(clusters: &[Cluster]) -> String {
    let headers = &["NAME", "PROVIDER", "TYPE", "VERSION", "STATE", "NODES"];
    let rows: Vec<Vec<String>> = clusters
        .iter()
        .map(|c| {
            let nodes = &c.status.node_summary;
            vec![
                c.metadata.name.clone(),
                wire_name(&c.spec.provider),
                c.spec.type_.as_ref().map(wire_name).unwrap_or_default(),
                c.status.kubernetes_version.clone(),
                wire_name(&c.status.state),
                if nodes.total_num < 0 {
                    "?".to_string()
                } else {
                    format!("{}/{}", nodes.ready_num, nodes.total_num)
                },
            ]
        })
        .collect();

    format_table(headers, rows)
}

// ============================================================================
// Validation display
// ============================================================================

pub fn format_kubeconfig_check(check: &KubeconfigCheck) -> String {
    let mut output = String::from("✓ Kubeconfig is valid\n");
    output.push_str(&format!("  Server:  {}\n", check.server));
    if let Some(ref context) = check.context {
        output.push_str(&format!("  Context: {}\n", context));
    }
    if let Some(ref version) = check.version {
        output.push_str(&format!("  Version: {}\n", version));
    }
    output
}

/// Summary of a loaded gateway config
pub fn format_config_summary(config: &GatewayConfig) -> String {
    let mut output = String::from("✓ Config is valid\n\n");
    output.push_str(&format!(
        "Listen:      {}:{}\n",
        config.server.bind, config.server.port
    ));
    output.push_str(&format!(
        "Fan-out:     {}s per call, {}s deadline, {} concurrent\n",
        config.fanout.call_timeout_secs, config.fanout.deadline_secs, config.fanout.concurrency
    ));
    output.push_str(&format!(
        "Health:      every {}s, unhealthy after {} failures\n",
        config.health.interval_secs, config.health.failure_threshold
    ));
    output.push_str(&format!(
        "Prometheus:  {}\n",
        config.prometheus.as_deref().unwrap_or("(per cluster)")
    ));
    output.push_str(&format!("\nClusters ({}):\n", config.clusters.len()));
    for cluster in &config.clusters {
        output.push_str(&format!(
            "  - {} [{}] {}\n",
            cluster.name,
            cluster.type_.as_deref().unwrap_or("?"),
            cluster.kubeconfig_path
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::types::{ClusterState, ClusterType, ResourceSummary};
    use crate::resources::meta::ObjectMeta;

    #[test]
    fn test_format_table_empty() {
        assert_eq!(format_table(&["name"], vec![]), "No resources found.\n");
    }

    #[test]
    fn test_format_table_aligns_columns() {
        let output = format_table(
            &["name", "state"],
            vec![
                vec!["a".into(), "RUNNING".into()],
                vec!["longer-name".into(), "UNHEALTH".into()],
            ],
        );
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines[0], "NAME          STATE");
        assert_eq!(lines[1], "a             RUNNING");
        assert_eq!(lines[2], "longer-name   UNHEALTH");
    }

    #[test]
    fn test_format_cluster_list() {
        let mut cluster = Cluster {
            metadata: ObjectMeta::named("prod-1"),
            ..Default::default()
        };
        cluster.spec.type_ = Some(ClusterType::Nvidia);
        cluster.status.kubernetes_version = "v1.28.3".into();
        cluster.status.state = ClusterState::Unhealth;
        cluster.status.node_summary = ResourceSummary {
            total_num: -1,
            ready_num: -1,
        };

        let output = format_cluster_list(&[cluster]);
        assert!(output.contains("prod-1"));
        assert!(output.contains("NVIDIA"));
        assert!(output.contains("UNHEALTH"));
        assert!(output.contains('?'));
    }

    #[test]
    fn test_format_config_summary() {
        let config = crate::config::parse_config(
            "prometheus: http://prom:9090\nclusters:\n  - name: prod-1\n    type: NVIDIA\n    kubeconfigPath: ~/kube/prod\n",
        )
        .unwrap();
        let output = format_config_summary(&config);
        assert!(output.contains("http://prom:9090"));
        assert!(output.contains("prod-1 [NVIDIA] ~/kube/prod"));
    }
}
