//! Scene tree access: finding, creating, navigating and rearranging nodes.

use types::abi::{NodeCreate, NodeOp, SpatialOp};
use types::{HostError, ObjectGraph, ObjectId, Variant};
use vm::Machine;

use super::{expect_int, expect_name, expect_object, read_name, sysargs, SyscallResult};
use crate::engine::SandboxCore;
use crate::error::SandboxError;
use crate::global::Config;
use crate::guest_variant::{GuestStdVector, GuestVariant};

pub(super) fn sys_get_node<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (addr, path, len): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_LOOKUP);
    let base = if addr == 0 { core.tree_base } else { core.resolve(addr)? };
    if base.is_null() {
        log::error!("get_node: no tree base to resolve from");
        return Err(SandboxError::NullObject);
    }
    let path = read_name(machine, path, len)?;

    let found = match core.host.get_node(base, &path) {
        Ok(node) => core.admit(node)?,
        Err(HostError::NodeNotFound(_)) => {
            log::warn!("get_node: '{path}' not found from {base}");
            ObjectId::NULL
        }
        Err(err) => return Err(err.into()),
    };
    machine.set_result(found.address());
    Ok(())
}

pub(super) fn sys_node_create<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (kind, class, class_len, name, name_len): (u32, u32, u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_LOOKUP);
    let kind = NodeCreate::from_u32(kind)
        .ok_or_else(|| SandboxError::InvalidArgument(format!("node_create: unknown kind {kind}")))?;
    let class = match kind {
        NodeCreate::ClassDb => read_name(machine, class, class_len)?,
        NodeCreate::Node => "Node".to_owned(),
        NodeCreate::Node2D => "Node2D".to_owned(),
        NodeCreate::Node3D => "Node3D".to_owned(),
    };
    core.guard.check_class(&class)?;
    let name = read_name(machine, name, name_len)?;

    let object = core.host.create_object(&class)?;
    if !name.is_empty() {
        core.host.set_name(object, &name)?;
    }
    core.objects.scope(object)?;
    machine.set_result(object.address());
    Ok(())
}

pub(super) fn sys_node<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    let (op, addr, gv): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_OBJECT_CALL);
    let op = NodeOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("node: unknown operation {op}")))?;
    let node = core.resolve(addr)?;

    match op {
        NodeOp::GetName => {
            let name = core.host.name(node)?;
            core.write_variant(machine, gv, &Variant::String(name))
        }
        NodeOp::SetName => {
            let name = expect_name(&core.read_variant(machine, gv)?)?;
            Ok(core.host.set_name(node, &name)?)
        }
        NodeOp::GetPath => {
            let path = core.host.path(node)?;
            core.write_variant(machine, gv, &Variant::NodePath(path))
        }
        NodeOp::GetParent => {
            let parent = core.host.parent(node)?;
            let value = if parent.is_null() { Variant::Nil } else { Variant::Object(core.admit(parent)?) };
            core.write_variant(machine, gv, &value)
        }
        NodeOp::QueueFree => {
            if node == core.self_object {
                log::error!("node: the sandbox cannot free its own object");
                return Err(SandboxError::InvalidArgument("queue_free on the sandbox itself".into()));
            }
            Ok(core.host.queue_free(node)?)
        }
        NodeOp::Duplicate => {
            let copy = core.host.duplicate(node)?;
            let copy = core.admit(copy)?;
            core.write_variant(machine, gv, &Variant::Object(copy))
        }
        NodeOp::GetChildCount => {
            let count = core.host.children(node)?.len();
            core.write_variant(machine, gv, &Variant::Int(count as i64))
        }
        NodeOp::GetChild => {
            let index = expect_int(&core.read_variant(machine, gv)?)?;
            let children = core.host.children(node)?;
            let child = usize::try_from(index).ok().and_then(|i| children.get(i).copied());
            let value = match child {
                Some(child) => Variant::Object(core.admit(child)?),
                None => Variant::Nil,
            };
            core.write_variant(machine, gv, &value)
        }
        NodeOp::AddChild | NodeOp::AddChildDeferred => {
            let child = expect_object(core, &core.read_variant(machine, gv)?)?;
            Ok(core.host.add_child(node, child, op == NodeOp::AddChildDeferred)?)
        }
        NodeOp::AddSibling | NodeOp::AddSiblingDeferred => {
            let sibling = expect_object(core, &core.read_variant(machine, gv)?)?;
            Ok(core.host.add_sibling(node, sibling, op == NodeOp::AddSiblingDeferred)?)
        }
        NodeOp::RemoveChild | NodeOp::RemoveChildDeferred => {
            let child = expect_object(core, &core.read_variant(machine, gv)?)?;
            Ok(core.host.remove_child(node, child, op == NodeOp::RemoveChildDeferred)?)
        }
        NodeOp::MoveChild => {
            let vars = core.read_variants(machine, gv, 2)?;
            let child = expect_object(core, &vars[0])?;
            Ok(core.host.move_child(node, child, expect_int(&vars[1])?)?)
        }
        NodeOp::GetChildren => {
            let children = core.host.children(node)?;
            // All or nothing: a denied child must not leave its siblings scoped.
            for &child in &children {
                core.guard.check_object(&core.host, child)?;
            }
            let mut bytes = Vec::with_capacity(children.len() * 8);
            for child in children {
                let child = core.admit(child)?;
                bytes.extend_from_slice(&(child.address() as u64).to_le_bytes());
            }
            GuestStdVector::write(&mut machine.memory, &mut machine.arena, gv, &bytes)
        }
        NodeOp::AddToGroup => {
            let group = expect_name(&core.read_variant(machine, gv)?)?;
            Ok(core.host.add_to_group(node, &group)?)
        }
        NodeOp::RemoveFromGroup => {
            let group = expect_name(&core.read_variant(machine, gv)?)?;
            Ok(core.host.remove_from_group(node, &group)?)
        }
        NodeOp::IsInGroup => {
            let group = expect_name(&core.read_variant(machine, gv)?)?;
            let member = core.host.is_in_group(node, &group)?;
            GuestVariant::from_bool(member).write(&mut machine.memory, gv)
        }
        NodeOp::Reparent => {
            let parent = expect_object(core, &core.read_variant(machine, gv)?)?;
            Ok(core.host.reparent(node, parent)?)
        }
    }
}

fn spatial<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine, class: &str) -> SyscallResult {
    let (op, addr, gv): (u32, u32, u32) = sysargs(machine);
    machine.penalize(Config::PENALTY_SPATIAL);
    let op = SpatialOp::from_u32(op).ok_or_else(|| SandboxError::InvalidArgument(format!("{class}: unknown operation {op}")))?;
    let node = core.resolve(addr)?;
    if !core.host.is_class(node, class) {
        let actual = core.host.class_name(node)?;
        log::error!("{node} is a {actual}, not a {class}");
        return Err(SandboxError::TypeMismatch { expected: class.to_owned(), actual });
    }

    let (property, write) = match op {
        SpatialOp::GetPosition => ("position", false),
        SpatialOp::SetPosition => ("position", true),
        SpatialOp::GetRotation => ("rotation", false),
        SpatialOp::SetRotation => ("rotation", true),
        SpatialOp::GetScale => ("scale", false),
        SpatialOp::SetScale => ("scale", true),
    };
    core.guard.check_property(node, property, write)?;
    if write {
        let value = core.read_variant(machine, gv)?;
        Ok(core.host.set_property(node, property, value)?)
    } else {
        let value = core.host.get_property(node, property)?;
        core.write_variant(machine, gv, &value)
    }
}

pub(super) fn sys_node2d<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    spatial(core, machine, "Node2D")
}

pub(super) fn sys_node3d<H: ObjectGraph>(core: &mut SandboxCore<H>, machine: &mut Machine) -> SyscallResult {
    spatial(core, machine, "Node3D")
}

#[cfg(test)]
mod tests {
    use scene::Scene;
    use types::abi::NodeOp;
    use vm::Register;

    use super::sys_node;
    use crate::{Sandbox, SandboxConfig, SandboxError};

    #[test]
    fn denied_child_leaves_its_siblings_unscoped() {
        let mut scene = Scene::new();
        scene.register_class("Forbidden", "Node", vec![]);
        let parent = scene.add_node(scene.root(), "Node", "Parent").unwrap();
        let first = scene.add_node(parent, "Node2D", "First").unwrap();
        let last = scene.add_node(parent, "Forbidden", "Last").unwrap();

        let mut sandbox = Sandbox::new(scene, SandboxConfig::default()).unwrap();
        sandbox.set_class_allowed(Some(Box::new(|class: &str| class != "Forbidden"))).unwrap();
        sandbox.core.objects.scope(parent).unwrap();

        let cpu = &mut sandbox.machine.cpu;
        cpu.set(Register::A0, NodeOp::GetChildren as u32);
        cpu.set(Register::A1, parent.address());
        cpu.set(Register::A2, 0);
        let err = sys_node(&mut sandbox.core, &mut sandbox.machine).unwrap_err();
        assert!(matches!(err, SandboxError::PermissionDenied(_)));
        assert!(!sandbox.core.objects.contains(first));
        assert!(!sandbox.core.objects.contains(last));
        assert_eq!(sandbox.core.objects.len(), 1);
    }
}
