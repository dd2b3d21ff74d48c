//! YAML and text rendering for the CLI

use crate::reconcile::{EntryOutcome, Operation, ReconcileReport};
use crate::vm::AttachedDevice;
use anyhow::{Context, Result};
use clap::ValueEnum;
use common::HostDevice;
use serde::Serialize;
use std::fmt::Write;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Text,
}

/// An attachment joined with what the host knows about its device
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedDeviceView {
    pub connected_name: String,
    pub qom_tree_path: String,
    pub other_path: String,
    pub bus_and_port: String,
    /// Empty when the device is no longer plugged into the host
    pub vid_pid: String,
    pub product: String,
}

/// Join attachments against the host scan by `busAndPort`
pub fn connected_views(attached: &[AttachedDevice], inventory: &[HostDevice]) -> Vec<ConnectedDeviceView> {
    attached
        .iter()
        .map(|a| {
            let host = inventory.iter().find(|d| d.bus_and_port() == a.bus_and_port);
            ConnectedDeviceView {
                connected_name: a.generated_id.clone(),
                qom_tree_path: a.tree_path.clone(),
                other_path: a.host_link_path.clone(),
                bus_and_port: a.bus_and_port.clone(),
                vid_pid: host.map(|d| d.vid_pid.clone()).unwrap_or_default(),
                product: host.map(|d| d.product.clone()).unwrap_or_default(),
            }
        })
        .collect()
}

pub fn to_yaml<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_yaml::to_string(value).context("Failed to render YAML")
}

pub fn render_devices(devices: &[HostDevice], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => to_yaml(devices),
        OutputFormat::Text => {
            if devices.is_empty() {
                return Ok("No USB devices found.\n".to_string());
            }
            let mut out = format!("Found {} USB device(s):\n\n", devices.len());
            for d in devices {
                let _ = writeln!(
                    out,
                    "  {:<10} {}  dev {:>3}  {}",
                    d.bus_and_port(),
                    d.vid_pid,
                    d.address_id,
                    if d.product.is_empty() { "Unknown Product" } else { d.product.as_str() }
                );
            }
            Ok(out)
        }
    }
}

pub fn render_connected(views: &[ConnectedDeviceView], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => to_yaml(views),
        OutputFormat::Text => {
            if views.is_empty() {
                return Ok("No passthrough USB devices attached.\n".to_string());
            }
            let mut out = String::new();
            for v in views {
                let identity = if v.vid_pid.is_empty() { "not on host" } else { v.vid_pid.as_str() };
                let _ = writeln!(
                    out,
                    "  {:<12} {:<10} {}  {}",
                    v.connected_name, v.bus_and_port, identity, v.product
                );
            }
            Ok(out)
        }
    }
}

/// One line per plan entry, then unreachable and excluded VMs
pub fn render_report(report: &ReconcileReport) -> String {
    let mut out = String::new();
    for e in &report.entries {
        let op = match e.entry.operation {
            Operation::Attach => "attach",
            Operation::Detach => "detach",
        };
        let _ = writeln!(
            out,
            "{:<6} {:<8} VM {:<10} {}: {}",
            op,
            e.entry.slot,
            e.entry.vm_id,
            e.entry.device_label(),
            e.outcome
        );
    }
    if report.entries.is_empty() {
        out.push_str("Nothing to do\n");
    }
    for vm in &report.unreachable {
        let _ = writeln!(out, "VM {} unreachable", vm);
    }
    for vm in &report.excluded {
        let _ = writeln!(out, "VM {} excluded (attachments unreadable)", vm);
    }
    let failed = report
        .entries
        .iter()
        .filter(|e| matches!(e.outcome, EntryOutcome::AttachFailed(_)))
        .count();
    if failed > 0 {
        let _ = writeln!(out, "{} attach(es) failed", failed);
    }
    let unassigned = report.count(&EntryOutcome::Unassigned);
    if unassigned > 0 {
        let _ = writeln!(out, "{} selected device(s) not moved, no free slot", unassigned);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::test_utils::create_mock_host_device;

    fn attached(id: &str, bus_and_port: &str) -> AttachedDevice {
        AttachedDevice {
            generated_id: id.to_string(),
            tree_path: "/machine/q35/pcie.0/usb/usb-bus.0/child[0]".to_string(),
            host_link_path: format!("/machine/peripheral/{}", id),
            bus_and_port: bus_and_port.to_string(),
        }
    }

    #[test]
    fn test_connected_views_join_by_position() {
        let inventory = vec![create_mock_host_device("2", "1.1", "1a2b:3c4d")];
        let views = connected_views(
            &[attached("auto_0", "2-1.1"), attached("auto_1", "9-9")],
            &inventory,
        );
        assert_eq!(views[0].vid_pid, "1a2b:3c4d");
        assert_eq!(views[1].vid_pid, "");
    }

    #[test]
    fn test_connected_yaml_keys() {
        let views = connected_views(&[attached("auto_0", "2-1.1")], &[]);
        let yaml = render_connected(&views, OutputFormat::Yaml).unwrap();
        for key in ["connectedName", "qomTreePath", "otherPath", "busAndPort", "vidPid", "product"] {
            assert!(yaml.contains(key), "missing {} in {}", key, yaml);
        }
    }

    #[test]
    fn test_devices_yaml_is_camel_case() {
        let yaml = render_devices(&[create_mock_host_device("1", "2", "dead:beef")], OutputFormat::Yaml)
            .unwrap();
        assert!(yaml.contains("vidPid"));
        assert!(yaml.contains("dead:beef"));
        assert!(yaml.contains("portPath"));
    }

    #[test]
    fn test_empty_report() {
        let report = ReconcileReport::default();
        assert_eq!(render_report(&report), "Nothing to do\n");
    }

    #[test]
    fn test_report_lists_unassigned_devices() {
        use crate::reconcile::{AttachmentPlanEntry, ReportEntry, SlotName};

        let entry = |port: &str| AttachmentPlanEntry {
            operation: Operation::Attach,
            vm_id: "101".to_string(),
            slot: SlotName::for_index(0),
            device: Some(create_mock_host_device("1", port, "1a2b:0001")),
        };
        let report = ReconcileReport {
            entries: vec![
                ReportEntry {
                    entry: entry("1"),
                    outcome: EntryOutcome::Attached,
                },
                ReportEntry {
                    entry: entry("2"),
                    outcome: EntryOutcome::Unassigned,
                },
            ],
            ..ReconcileReport::default()
        };

        let text = render_report(&report);
        let line = text.lines().nth(1).unwrap();
        assert!(line.contains("1a2b:0001 @ 1-2"));
        assert!(line.ends_with(": not moved, no free slot"));
        assert!(text.ends_with("1 selected device(s) not moved, no free slot\n"));
    }
}
