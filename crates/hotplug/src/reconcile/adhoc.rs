//! One-off attach and detach
//!
//! Ad-hoc attachments get random `hotplug_<n>` identifiers so they can
//! never be mistaken for a reconciler slot (`auto_<i>`).

use super::EntryOutcome;
use crate::error::{HotplugError, Result};
use crate::vm::{ControlChannel, Introspector, commands};
use common::{HostDevice, TargetDeviceSpec};
use rand::Rng;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, warn};

pub const ADHOC_PREFIX: &str = "hotplug_";

/// Identifiers are drawn from `hotplug_0` .. `hotplug_8191`
pub const ADHOC_ID_SPACE: u32 = 8192;

const RANDOM_ATTEMPTS: usize = 32;

/// Result of one ad-hoc attach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdhocAttach {
    pub device: HostDevice,
    /// Identifier used, `None` when nothing was sent
    pub id: Option<String>,
    pub outcome: EntryOutcome,
}

/// Pick an identifier not in `taken`
///
/// Random first, then the lowest free one, so a crowded VM still gets an
/// id. `None` only when the whole space is used.
pub fn pick_free_id<R: Rng>(rng: &mut R, taken: &HashSet<String>) -> Option<String> {
    let make = |n: u32| format!("{}{}", ADHOC_PREFIX, n);
    for _ in 0..RANDOM_ATTEMPTS {
        let id = make(rng.random_range(0..ADHOC_ID_SPACE));
        if !taken.contains(&id) {
            return Some(id);
        }
    }
    (0..ADHOC_ID_SPACE).map(make).find(|id| !taken.contains(id))
}

/// Attach every host device matching any of `specs` to the VM behind
/// `channel`
///
/// Devices the VM already holds are skipped. Per-device failures are
/// logged and reported; only a failure to read the VM's current
/// attachments aborts.
pub async fn attach_matching<C, R>(
    channel: &mut C,
    introspector: &Introspector,
    specs: &[TargetDeviceSpec],
    inventory: &[HostDevice],
    settle: Duration,
    rng: &mut R,
) -> Result<Vec<AdhocAttach>>
where
    C: ControlChannel,
    R: Rng,
{
    let vm_id = channel.vm_id().to_string();
    let snapshot = introspector.snapshot(channel).await?;
    let mut taken: HashSet<String> = snapshot.iter().map(|d| d.generated_id.clone()).collect();
    let mut held: HashSet<String> = snapshot.iter().map(|d| d.bus_and_port.clone()).collect();
    let mut results = Vec::new();

    for spec in specs {
        for device in inventory.iter().filter(|d| spec.matches(d)) {
            if held.contains(&device.bus_and_port()) {
                info!("{} is already attached to VM {}", device, vm_id);
                results.push(AdhocAttach {
                    device: device.clone(),
                    id: None,
                    outcome: EntryOutcome::AlreadyAttached,
                });
                continue;
            }

            let Some(id) = pick_free_id(rng, &taken) else {
                warn!("No free identifier left on VM {} for {}", vm_id, device);
                results.push(AdhocAttach {
                    device: device.clone(),
                    id: None,
                    outcome: EntryOutcome::AttachFailed("no free identifier".to_string()),
                });
                continue;
            };
            taken.insert(id.clone());

            tokio::time::sleep(settle).await;
            info!("Attaching {} to VM {} as {}", device, vm_id, id);
            let outcome =
                match commands::device_add(channel, &id, &device.bus_id, &device.port_path).await {
                    Ok(()) => {
                        held.insert(device.bus_and_port());
                        EntryOutcome::Attached
                    }
                    Err(e) => {
                        let reason = e.to_string();
                        warn!(
                            "{}",
                            HotplugError::AttachFailed {
                                vm_id: vm_id.clone(),
                                slot: id.clone(),
                                device: device.to_string(),
                                source: Box::new(e),
                            }
                        );
                        EntryOutcome::AttachFailed(reason)
                    }
                };
            results.push(AdhocAttach {
                device: device.clone(),
                id: Some(id),
                outcome,
            });
        }
    }

    Ok(results)
}

/// Detach devices by identifier
///
/// An identifier the VM does not have is logged and reported as
/// [`EntryOutcome::AlreadyAbsent`]; any other failure aborts.
pub async fn detach_named<C: ControlChannel>(
    channel: &mut C,
    ids: &[String],
) -> Result<Vec<(String, EntryOutcome)>> {
    let vm_id = channel.vm_id().to_string();
    let mut results = Vec::with_capacity(ids.len());
    for id in ids {
        info!("Detaching {} from VM {}", id, vm_id);
        let outcome = match commands::device_del(channel, id).await {
            Ok(()) => EntryOutcome::Detached,
            Err(e) if e.is_not_found_for(id) => {
                info!("{} is not attached to VM {}", id, vm_id);
                EntryOutcome::AlreadyAbsent
            }
            Err(e) => {
                return Err(HotplugError::DetachFailed {
                    vm_id,
                    slot: id.clone(),
                    source: Box::new(e),
                });
            }
        };
        results.push((id.clone(), outcome));
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CallLog, FakeVm};
    use common::test_utils::{create_mock_host_device, specs};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_pick_free_id_avoids_taken() {
        let mut rng = StdRng::seed_from_u64(7);
        let taken: HashSet<String> = (0..ADHOC_ID_SPACE - 1)
            .map(|n| format!("{}{}", ADHOC_PREFIX, n))
            .collect();
        let id = pick_free_id(&mut rng, &taken).unwrap();
        assert_eq!(id, format!("{}{}", ADHOC_PREFIX, ADHOC_ID_SPACE - 1));
    }

    #[test]
    fn test_pick_free_id_exhausted() {
        let mut rng = StdRng::seed_from_u64(7);
        let taken: HashSet<String> = (0..ADHOC_ID_SPACE)
            .map(|n| format!("{}{}", ADHOC_PREFIX, n))
            .collect();
        assert!(pick_free_id(&mut rng, &taken).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_matching_uses_adhoc_ids() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log).with_device("auto_0", 1, "1");
        let inventory = vec![
            create_mock_host_device("1", "1", "1a2b:0001"),
            create_mock_host_device("1", "2", "1a2b:0002"),
        ];
        let mut rng = StdRng::seed_from_u64(1);

        let results = attach_matching(
            &mut vm,
            &Introspector::default(),
            &specs(&["1a2b:"]),
            &inventory,
            Duration::from_secs(5),
            &mut rng,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].outcome, EntryOutcome::AlreadyAttached);
        assert_eq!(results[1].outcome, EntryOutcome::Attached);
        let id = results[1].id.clone().unwrap();
        assert!(id.starts_with(ADHOC_PREFIX));

        let attaches = log.attaches();
        assert_eq!(attaches.len(), 1);
        assert_eq!(attaches[0].device_id(), Some(id.as_str()));
        assert_eq!(attaches[0].command.argument_str("hostport"), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attach_failure_is_reported_not_fatal() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log).with_fault(
            "device_add",
            Some("1"),
            "GenericError",
            "failed to open host usb device 1:1",
        );
        let inventory = vec![
            create_mock_host_device("1", "1", "1a2b:0001"),
            create_mock_host_device("2", "2", "1a2b:0002"),
        ];
        let mut rng = StdRng::seed_from_u64(3);

        let results = attach_matching(
            &mut vm,
            &Introspector::default(),
            &specs(&["1a2b:"]),
            &inventory,
            Duration::ZERO,
            &mut rng,
        )
        .await
        .unwrap();

        assert!(matches!(results[0].outcome, EntryOutcome::AttachFailed(_)));
        assert_eq!(results[1].outcome, EntryOutcome::Attached);
    }

    #[tokio::test]
    async fn test_detach_named() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log).with_device("hotplug_3", 1, "1");
        let ids = vec!["hotplug_3".to_string(), "hotplug_4".to_string()];

        let results = detach_named(&mut vm, &ids).await.unwrap();
        assert_eq!(results[0].1, EntryOutcome::Detached);
        assert_eq!(results[1].1, EntryOutcome::AlreadyAbsent);
        assert!(vm.attached_ids().is_empty());
    }

    #[tokio::test]
    async fn test_detach_named_other_failure_is_fatal() {
        let log = CallLog::new();
        let mut vm = FakeVm::new("100", &log)
            .with_device("hotplug_3", 1, "1")
            .with_fault("device_del", None, "GenericError", "bus busy");

        let err = detach_named(&mut vm, &["hotplug_3".to_string()]).await.unwrap_err();
        assert!(matches!(err, HotplugError::DetachFailed { .. }));
    }
}
