mod common;

use common::{Harness, fast_poll};
use std::collections::BTreeMap;
use std::time::Duration;
use vmflow_cloud::OperationContext;
use vmflow_compute::testing::{CallKind, RemoteCall};
use vmflow_compute::{ExtensionReconciler, PowerState, VirtualMachineExtensionConfig};

fn extension_reconciler(h: &Harness) -> ExtensionReconciler {
    ExtensionReconciler::new(h.cloud.clone(), h.cloud.clone(), h.reconciler.locks().clone())
        .with_poll_config(fast_poll())
}

fn custom_script(vm_name: &str, h: &Harness) -> VirtualMachineExtensionConfig {
    VirtualMachineExtensionConfig {
        name: "bootstrap".to_string(),
        virtual_machine_id: h.vm_id(vm_name).to_string(),
        publisher: "Microsoft.Azure.Extensions".to_string(),
        extension_type: "CustomScript".to_string(),
        type_handler_version: "2.1".to_string(),
        auto_upgrade_minor_version: true,
        force_update_tag: None,
        settings: Some(serde_json::json!({ "commandToExecute": "cloud-init status --wait" })),
        protected_settings: Some(serde_json::json!({ "storageAccountKey": "secret" })),
        tags: BTreeMap::new(),
    }
}

#[tokio::test]
async fn test_extension_inherits_machine_location() {
    let h = Harness::new();
    h.existing("web-1", PowerState::Running);
    let extensions = extension_reconciler(&h);
    let config = custom_script("web-1", &h);

    let installed = extensions
        .reconcile_create_or_update(&config, &OperationContext::background())
        .await
        .unwrap();

    assert_eq!(installed.location.as_deref(), Some("westeurope"));
    let props = installed.properties.unwrap();
    assert_eq!(props.provisioning_state.as_deref(), Some("Succeeded"));
    assert_eq!(props.protected_settings, None);
    assert_eq!(
        h.cloud.mutating_calls(),
        vec![RemoteCall::CreateOrUpdateExtension("bootstrap".to_string())]
    );
}

#[tokio::test]
async fn test_extension_on_missing_machine_fails() {
    let h = Harness::new();
    let extensions = extension_reconciler(&h);

    let err = extensions
        .reconcile_create_or_update(&custom_script("ghost", &h), &OperationContext::background())
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(h.cloud.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_read_is_none_when_machine_or_extension_is_gone() {
    let h = Harness::new();
    h.existing("web-1", PowerState::Running);
    let extensions = extension_reconciler(&h);
    let ctx = OperationContext::background();

    let on_ghost = custom_script("ghost", &h).extension_id().unwrap();
    assert!(extensions.read(&on_ghost, &ctx).await.unwrap().is_none());
    assert!(!h.cloud.calls().iter().any(|c| c.kind() == CallKind::GetExtension));

    let not_installed = custom_script("web-1", &h).extension_id().unwrap();
    assert!(extensions.read(&not_installed, &ctx).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delete_removes_the_extension() {
    let h = Harness::new();
    h.existing("web-1", PowerState::Running);
    let extensions = extension_reconciler(&h);
    let ctx = OperationContext::background();
    let config = custom_script("web-1", &h);
    let id = config.extension_id().unwrap();

    extensions
        .reconcile_create_or_update(&config, &ctx)
        .await
        .unwrap();
    assert!(h.cloud.extension(&id).is_some());

    extensions.reconcile_delete(&id, &ctx).await.unwrap();
    assert!(h.cloud.extension(&id).is_none());
    assert!(extensions.read(&id, &ctx).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_extension_waits_for_machine_update() {
    let h = Harness::new();
    let (id, last_known) = h.existing("web-1", PowerState::Running);
    h.cloud.set_latency(Duration::from_millis(20));
    let extensions = extension_reconciler(&h);
    let ctx = OperationContext::background();

    let mut desired = last_known.clone();
    desired.os_disk.disk_size_gb = Some(128);
    let config = custom_script("web-1", &h);

    let (update, install) = tokio::join!(
        h.reconciler
            .reconcile_update(&id, &desired, &last_known, &ctx),
        extensions.reconcile_create_or_update(&config, &ctx),
    );
    update.unwrap();
    install.unwrap();

    let kinds: Vec<_> = h.cloud.mutating_calls().iter().map(RemoteCall::kind).collect();
    assert_eq!(
        kinds,
        vec![
            CallKind::PowerOff,
            CallKind::Update,
            CallKind::Start,
            CallKind::CreateOrUpdateExtension,
        ]
    );
}
