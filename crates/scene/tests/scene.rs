use std::rc::Rc;

use scene::{HostMethod, Scene};
use types::{Callable, HostError, ObjectGraph, ObjectId, Variant, Vector2};

fn tree() -> (Scene, ObjectId, ObjectId, ObjectId) {
    let mut scene = Scene::new();
    let root = scene.root();
    let main = scene.add_node(root, "Node", "Main").unwrap();
    let player = scene.add_node(main, "Node2D", "Player").unwrap();
    let sandbox = scene.add_node(main, "Sandbox", "Sandbox").unwrap();
    (scene, main, player, sandbox)
}

#[test]
fn test_node_paths() {
    println!("=== Testing node path resolution ===");
    let (scene, main, player, sandbox) = tree();

    assert_eq!(scene.get_node(sandbox, "../Player").unwrap(), player);
    assert_eq!(scene.get_node(sandbox, "..").unwrap(), main);
    assert_eq!(scene.get_node(sandbox, ".").unwrap(), sandbox);
    assert_eq!(scene.get_node(sandbox, "/root/Main/Player").unwrap(), player);
    assert_eq!(scene.get_node(main, "Player").unwrap(), player);
    assert!(matches!(scene.get_node(sandbox, "../Missing"), Err(HostError::NodeNotFound(_))));
    assert!(matches!(scene.get_node(scene.root(), ".."), Err(HostError::NodeNotFound(_))));
    println!("✓ relative and absolute paths resolve");

    assert_eq!(scene.path(player).unwrap(), "/root/Main/Player");
    assert_eq!(scene.parent(player).unwrap(), main);
    assert_eq!(scene.children(main).unwrap(), vec![player, sandbox]);
    println!("✓ path, parent and children agree");
}

#[test]
fn test_properties_and_methods() {
    println!("=== Testing properties and methods ===");
    let (mut scene, _, player, _) = tree();

    assert_eq!(scene.get_property(player, "position").unwrap(), Variant::Vector2(Vector2::ZERO));
    scene.set_property(player, "position", Variant::Vector2(Vector2::new(3.0, 4.0))).unwrap();
    assert_eq!(scene.get_property(player, "position").unwrap(), Variant::Vector2(Vector2::new(3.0, 4.0)));
    assert!(matches!(scene.set_property(player, "health", Variant::Int(1)), Err(HostError::NoSuchProperty { .. })));
    scene.define_property(player, "health", Variant::Int(100)).unwrap();
    assert_eq!(scene.call_method(player, "get", &[Variant::from("health")]).unwrap(), Variant::Int(100));
    println!("✓ properties read and write");

    assert_eq!(scene.call_method(player, "get_class", &[]).unwrap(), Variant::String("Node2D".into()));
    assert_eq!(scene.call_method(player, "is_class", &[Variant::from("Node")]).unwrap(), Variant::Bool(true));
    assert!(scene.is_class(player, "Node"));
    assert!(!scene.is_class(player, "Node3D"));
    assert!(matches!(scene.call_method(player, "explode", &[]), Err(HostError::NoSuchMethod { .. })));
    println!("✓ builtin methods answer");

    let damage: HostMethod =
        Rc::new(|_: ObjectId, args: &[Variant]| Variant::Int(args.first().and_then(Variant::as_int).unwrap_or(0) * 2));
    scene.register_class("Enemy", "Node2D", vec![("damage", damage)]);
    let enemy = scene.create_object("Enemy").unwrap();
    assert_eq!(scene.call_method(enemy, "damage", &[Variant::Int(21)]).unwrap(), Variant::Int(42));
    assert!(scene.method_list(enemy).unwrap().contains(&"damage".to_string()));
    assert_eq!(scene.calls().last(), Some(&(enemy, "damage".to_string())));
    assert!(matches!(scene.create_object("Nope"), Err(HostError::UnknownClass(_))));
    println!("✓ registered host methods dispatch");
}

#[test]
fn test_tree_mutation() {
    println!("=== Testing tree mutation ===");
    let (mut scene, main, player, sandbox) = tree();

    let extra = scene.create_object("Node").unwrap();
    scene.add_sibling(player, extra, false).unwrap();
    assert_eq!(scene.children(main).unwrap(), vec![player, extra, sandbox]);
    scene.move_child(main, extra, -1).unwrap();
    assert_eq!(scene.children(main).unwrap(), vec![player, sandbox, extra]);
    assert!(scene.move_child(main, extra, 3).is_err());
    println!("✓ add_sibling and move_child");

    scene.reparent(extra, player).unwrap();
    assert_eq!(scene.parent(extra).unwrap(), player);
    assert!(scene.reparent(main, extra).is_err());
    scene.remove_child(player, extra, false).unwrap();
    assert!(scene.parent(extra).unwrap().is_null());
    println!("✓ reparent and remove_child");

    let deferred = scene.create_object("Node").unwrap();
    scene.add_child(main, deferred, true).unwrap();
    assert!(scene.parent(deferred).unwrap().is_null());
    scene.process(0.0);
    assert_eq!(scene.parent(deferred).unwrap(), main);
    println!("✓ deferred add_child applies on process");

    scene.queue_free(player).unwrap();
    assert!(scene.exists(player));
    scene.process(0.0);
    assert!(!scene.exists(player));
    assert!(!scene.children(main).unwrap().contains(&player));
    assert!(scene.queue_free(scene.root()).is_err());
    println!("✓ queue_free removes the node after process");
}

#[test]
fn test_duplicate_is_deep() {
    let (mut scene, main, player, _) = tree();
    let child = scene.add_node(player, "Node", "Weapon").unwrap();
    scene.add_to_group(player, "players").unwrap();

    let copy = scene.duplicate(player).unwrap();
    assert_ne!(copy, player);
    assert!(scene.parent(copy).unwrap().is_null());
    assert!(scene.is_in_group(copy, "players").unwrap());
    let copied_children = scene.children(copy).unwrap();
    assert_eq!(copied_children.len(), 1);
    assert_ne!(copied_children[0], child);
    assert_eq!(scene.name(copied_children[0]).unwrap(), "Weapon");

    scene.add_child(main, copy, false).unwrap();
    assert_eq!(scene.children(main).unwrap().len(), 3);
}

#[test]
fn test_signals() {
    println!("=== Testing signals ===");
    let (mut scene, _, player, sandbox) = tree();
    let on_hit: HostMethod = Rc::new(|_: ObjectId, _: &[Variant]| Variant::Nil);
    scene.register_class("Listener", "Node", vec![("on_hit", on_hit)]);
    let listener = scene.add_node(player, "Listener", "Listener").unwrap();
    scene.add_user_signal(player, "hit").unwrap();

    let host_target = Callable::method(listener, "on_hit");
    scene.connect(player, "hit", host_target.clone()).unwrap();
    let guest_target = Callable::guest(sandbox, 0x10040);
    scene.connect(player, "hit", guest_target.clone()).unwrap();
    assert!(matches!(
        scene.connect(player, "missing", host_target.clone()),
        Err(HostError::NoSuchSignal { .. })
    ));

    scene.call_method(player, "emit_signal", &[Variant::from("hit"), Variant::Int(5)]).unwrap();
    assert_eq!(scene.calls().last(), Some(&(listener, "on_hit".to_string())));
    let pending = scene.process(0.0);
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].callable, guest_target);
    assert_eq!(pending[0].args, vec![Variant::Int(5)]);
    println!("✓ host targets run now, guest targets are handed back");

    scene.disconnect(player, "hit", &guest_target).unwrap();
    assert!(scene.disconnect(player, "hit", &guest_target).is_err());
    scene.emit_signal(player, "hit", &[]).unwrap();
    assert!(scene.process(0.0).is_empty());
    println!("✓ disconnect stops delivery");
}

#[test]
fn test_timers() {
    println!("=== Testing timers ===");
    let (mut scene, _, _, sandbox) = tree();
    let callback = Callable::guest(sandbox, 0x10100).bind([Variant::PackedByteArray(vec![7; 32])]);

    let once = scene.create_timer(0.5, true, callback.clone()).unwrap();
    assert_eq!(scene.parent(once).unwrap(), scene.root());
    assert!(scene.process(0.25).is_empty());
    let fired = scene.process(0.25);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].args, vec![Variant::Object(once)]);
    assert!(scene.process(1.0).is_empty());
    println!("✓ one-shot timer fires once");

    let repeating = scene.create_timer(0.1, false, callback).unwrap();
    assert_eq!(scene.process(0.1).len(), 1);
    assert_eq!(scene.process(0.1).len(), 1);
    scene.stop_timer(repeating).unwrap();
    assert!(scene.process(0.1).is_empty());
    assert!(scene.stop_timer(scene.root()).is_err());
    assert!(scene.create_timer(f64::NAN, true, Callable::guest(sandbox, 0)).is_err());
    println!("✓ repeating timer fires until stopped");
}

#[test]
fn test_singletons_resources_and_output() {
    let mut scene = Scene::new();
    let engine = scene.singleton("Engine").unwrap();
    assert_eq!(scene.class_name(engine).unwrap(), "Engine");
    assert!(scene.singleton("Nope").is_none());

    scene.register_resource("res://level.tres", Variant::PackedByteArray(vec![1, 2, 3]));
    assert_eq!(scene.load("res://level.tres").unwrap(), Variant::PackedByteArray(vec![1, 2, 3]));
    assert!(matches!(scene.load("res://missing.tres"), Err(HostError::ResourceNotFound(_))));

    assert!(!scene.is_editor());
    scene.set_editor(true);
    assert!(scene.is_editor());

    scene.print("hello");
    assert_eq!(scene.printed(), &["hello".to_string()]);
    scene.pretty_print();
}

#[test]
fn test_deferred_calls() {
    let (mut scene, _, player, _) = tree();
    scene.call_deferred(player, "set", vec![Variant::from("rotation"), Variant::Float(1.5)]).unwrap();
    assert_eq!(scene.get_property(player, "rotation").unwrap(), Variant::Float(0.0));
    scene.process(0.016);
    assert_eq!(scene.get_property(player, "rotation").unwrap(), Variant::Float(1.5));
}
