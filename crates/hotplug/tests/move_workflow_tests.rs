//! Detect-and-move workflow, end to end
//!
//! Scans a fake sysfs tree, locates the destination VM from the detect
//! device's position, then reconciles fake VMs.

use common::test_utils::{binding, spec, specs};
use hotplug::HotplugError;
use hotplug::reconcile::{ReconcileOptions, Reconciler};
use hotplug::test_utils::{CallLog, FakeVm};
use hotplug::trigger::{bound_vm_ids, locate_target};
use hotplug::usb::SysfsScanner;
use hotplug::vm::{Introspector, VmEndpoint};
use std::fs;
use std::path::Path;
use std::time::Duration;

fn plug(root: &Path, name: &str, vid_pid: &str, product: &str) {
    let (vid, pid) = vid_pid.split_once(':').unwrap();
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("idVendor"), format!("{}\n", vid)).unwrap();
    fs::write(dir.join("idProduct"), format!("{}\n", pid)).unwrap();
    fs::write(dir.join("devnum"), "5\n").unwrap();
    fs::write(dir.join("product"), format!("{}\n", product)).unwrap();
}

#[tokio::test]
async fn test_kvm_switch_moves_devices_to_active_vm() {
    let sysfs = tempfile::tempdir().unwrap();
    plug(sysfs.path(), "5-2.1.2", "046d:c52b", "Unifying Receiver");
    plug(sysfs.path(), "3-1", "1a2b:3c4d", "Gamepad");
    plug(sysfs.path(), "3-2", "feed:0001", "Headset");
    fs::create_dir_all(sysfs.path().join("usb3")).unwrap();

    let inventory = SysfsScanner::new(sysfs.path()).scan().unwrap();
    assert_eq!(inventory.len(), 3);

    let bindings = vec![binding("100:5-2.1.1"), binding("101:5-2.1.2")];
    let log = CallLog::new();
    let mut vms: Vec<VmEndpoint<FakeVm>> = bound_vm_ids(&bindings)
        .into_iter()
        .map(|id| {
            let vm = if id == "100" {
                FakeVm::new(&id, &log)
                    .with_device("auto_0", 3, "1")
                    .with_device("auto_1", 3, "2")
            } else {
                FakeVm::new(&id, &log)
            };
            VmEndpoint::connected(id, vm)
        })
        .collect();

    let target = locate_target(&spec("046d:c52b"), &bindings, &inventory, |id| {
        vms.iter().any(|vm| vm.vm_id == id && vm.is_live())
    })
    .unwrap();
    assert_eq!(target, "101");

    let reconciler = Reconciler::new(
        Introspector::default(),
        ReconcileOptions {
            reverse_match: false,
            detach_settle: Duration::ZERO,
            attach_settle: Duration::ZERO,
        },
    );
    reconciler
        .reconcile(&specs(&["1a2b:3c4d", "feed:"]), &mut vms, &target, &inventory)
        .await
        .unwrap();

    let detached: Vec<_> = log
        .detaches()
        .iter()
        .map(|c| (c.vm_id.clone(), c.device_id().unwrap().to_string()))
        .collect();
    assert_eq!(
        detached,
        vec![
            ("100".to_string(), "auto_0".to_string()),
            ("100".to_string(), "auto_1".to_string()),
        ]
    );
    let attached: Vec<_> = log
        .attaches()
        .iter()
        .map(|c| {
            (
                c.device_id().unwrap().to_string(),
                c.command.argument_str("hostport").unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        attached,
        vec![
            ("auto_0".to_string(), "1".to_string()),
            ("auto_1".to_string(), "2".to_string()),
        ]
    );
}

#[test]
fn test_unreadable_topology_aborts_before_vm_contact() {
    let sysfs = tempfile::tempdir().unwrap();
    let dir = sysfs.path().join("1-1");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("idVendor"), "1a2b\n").unwrap();

    let err = SysfsScanner::new(sysfs.path()).scan().unwrap_err();
    assert!(matches!(err, HotplugError::ScanUnavailable { .. }));
}

#[test]
fn test_detect_device_absent() {
    let sysfs = tempfile::tempdir().unwrap();
    plug(sysfs.path(), "3-1", "1a2b:3c4d", "Gamepad");
    let inventory = SysfsScanner::new(sysfs.path()).scan().unwrap();

    let err = locate_target(&spec("046d:c52b"), &[binding("100:5-2.1.1")], &inventory, |_| true)
        .unwrap_err();
    assert!(matches!(err, HotplugError::DetectDeviceNotFound(_)));
}
