use crate::IdKind;
use colored::Colorize;
use vmflow_cloud::{
    NetworkInterfaceId, PublicIpAddressId, ResourceId, ResourceIdentity,
    VirtualMachineExtensionId, VirtualMachineId,
};

pub fn handle(path: &str, kind: Option<IdKind>) -> anyhow::Result<()> {
    match kind {
        None => print_generic(&ResourceId::parse(path)?),
        Some(IdKind::Vm) => print_typed(VirtualMachineId::parse(path)?.identity()),
        Some(IdKind::Extension) => {
            print_typed(VirtualMachineExtensionId::parse(path)?.identity())
        }
        Some(IdKind::Nic) => print_typed(NetworkInterfaceId::parse(path)?.identity()),
        Some(IdKind::PublicIp) => print_typed(PublicIpAddressId::parse(path)?.identity()),
    }
    Ok(())
}

fn row(label: &str, value: &str) {
    println!("  {:<16} {}", format!("{label}:"), value.cyan());
}

fn print_generic(id: &ResourceId) {
    println!("{}", id.to_string().bold());
    row("subscription", id.subscription_id());
    row("resource group", id.resource_group());
    row("provider", id.provider().unwrap_or("-"));
    for (collection, name) in id.segments() {
        row(collection, name);
    }
}

fn print_typed(identity: &ResourceIdentity) {
    let id = identity.resource_id();
    println!("{}", identity.to_string().bold());
    row("kind", identity.kind().display);
    row("subscription", identity.subscription_id());
    row("resource group", identity.resource_group());
    row("provider", id.provider().unwrap_or("-"));
    if let Some(parent) = identity.parent_name() {
        row("parent", parent);
    }
    row("name", identity.name());
    row("lock key", &identity.lock_key());
}
