mod common;

use common::{Harness, nic_id, public_ip_id};
use std::sync::Arc;
use vmflow_cloud::{OperationContext, PublicIpAddressId};
use vmflow_compute::model::{NetworkInterface, NetworkInterfaceReference, NetworkProfile};
use vmflow_compute::testing::{CallKind, FakeCloud};
use vmflow_compute::{ConnectionResolver, PowerState};

fn profile(ids: &[String]) -> NetworkProfile {
    NetworkProfile {
        network_interfaces: ids
            .iter()
            .map(|id| NetworkInterfaceReference {
                id: id.clone(),
                properties: None,
            })
            .collect(),
    }
}

fn public_ip(cloud: &FakeCloud, name: &str, address: Option<&str>) -> String {
    let id = public_ip_id(name);
    cloud.insert_public_ip(&PublicIpAddressId::parse(&id).unwrap(), address);
    id
}

#[tokio::test]
async fn test_missing_public_ip_does_not_fail_resolution() {
    let cloud = Arc::new(FakeCloud::new());
    let found = public_ip(&cloud, "pip-a", Some("52.10.0.1"));
    let missing = public_ip_id("pip-gone");

    cloud.insert_interface(NetworkInterface::with_addresses(
        &nic_id("nic-a"),
        [("10.0.0.4", Some(found.as_str()))],
    ));
    cloud.insert_interface(NetworkInterface::with_addresses(
        &nic_id("nic-b"),
        [("10.0.1.4", Some(missing.as_str()))],
    ));

    let resolver = ConnectionResolver::new(cloud.clone());
    let info = resolver
        .resolve(
            Some(&profile(&[nic_id("nic-a"), nic_id("nic-b")])),
            &OperationContext::background(),
        )
        .await;

    assert_eq!(info.private_addresses, vec!["10.0.0.4", "10.0.1.4"]);
    assert_eq!(info.public_addresses, vec!["52.10.0.1"]);
    assert_eq!(info.primary_public_address, "52.10.0.1");
    assert_eq!(info.reachable_address(), Some("52.10.0.1"));
}

#[tokio::test]
async fn test_unallocated_dynamic_ip_contributes_nothing() {
    let cloud = Arc::new(FakeCloud::new());
    let pending = public_ip(&cloud, "pip-dynamic", None);
    cloud.insert_interface(NetworkInterface::with_addresses(
        &nic_id("nic-a"),
        [("10.0.0.4", Some(pending.as_str()))],
    ));

    let info = ConnectionResolver::new(cloud.clone())
        .resolve(
            Some(&profile(&[nic_id("nic-a")])),
            &OperationContext::background(),
        )
        .await;

    assert_eq!(info.primary_private_address, "10.0.0.4");
    assert!(info.public_addresses.is_empty());
    assert_eq!(info.reachable_address(), Some("10.0.0.4"));
}

#[tokio::test]
async fn test_malformed_and_unknown_interfaces_are_skipped() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.insert_interface(NetworkInterface::with_addresses(
        &nic_id("nic-a"),
        [("10.0.0.4", None)],
    ));

    let ids = vec![
        "/subscriptions/s/providers/Microsoft.Network/networkInterfaces/broken".to_string(),
        nic_id("nic-unknown"),
        nic_id("nic-a"),
    ];
    let info = ConnectionResolver::new(cloud.clone())
        .resolve(Some(&profile(&ids)), &OperationContext::background())
        .await;

    assert_eq!(info.private_addresses, vec!["10.0.0.4"]);
    let lookups = cloud
        .calls()
        .iter()
        .filter(|c| c.kind() == CallKind::GetInterface)
        .count();
    assert_eq!(lookups, 2);
}

#[tokio::test]
async fn test_failing_lookup_contributes_nothing() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.insert_interface(NetworkInterface::with_addresses(
        &nic_id("nic-a"),
        [("10.0.0.4", None)],
    ));
    cloud.fail_on(CallKind::GetInterface, Some(500), "InternalServerError");

    let info = ConnectionResolver::new(cloud.clone())
        .resolve(
            Some(&profile(&[nic_id("nic-a")])),
            &OperationContext::background(),
        )
        .await;

    assert!(info.is_empty());
}

#[tokio::test]
async fn test_no_network_profile_is_empty() {
    let cloud = Arc::new(FakeCloud::new());
    let info = ConnectionResolver::new(cloud)
        .resolve(None, &OperationContext::background())
        .await;
    assert!(info.is_empty());
}

#[tokio::test]
async fn test_read_includes_connection_info() {
    let h = Harness::new();
    let (id, _) = h.existing("web-1", PowerState::Running);
    h.attach_interface("web-1", "10.0.0.4", Some(("web-1-pip", Some("20.30.40.50"))));

    let state = h
        .reconciler
        .read(&id, &OperationContext::background())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(state.connection.primary_private_address, "10.0.0.4");
    assert_eq!(state.connection.primary_public_address, "20.30.40.50");
}
