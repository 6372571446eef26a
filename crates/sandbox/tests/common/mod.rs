#![allow(dead_code)]

use guest::ProgramBuilder;
use sandbox::{Sandbox, SandboxConfig};
use scene::Scene;
use types::ObjectId;

/// A scene with `Main` under the root, the sandbox node and a plain
/// `Target` node next to it, and a `Forbidden` node of its own class.
pub struct World {
    pub scene: Scene,
    pub main: ObjectId,
    pub sandbox: ObjectId,
    pub target: ObjectId,
    pub forbidden: ObjectId,
}

pub fn world() -> World {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut scene = Scene::new();
    scene.register_class("Forbidden", "Node", vec![]);
    let root = scene.root();
    let main = scene.add_node(root, "Node", "Main").unwrap();
    let sandbox = scene.add_node(main, "Sandbox", "Sandbox").unwrap();
    let target = scene.add_node(main, "Node2D", "Target").unwrap();
    let forbidden = scene.add_node(main, "Forbidden", "Forbidden").unwrap();
    World { scene, main, sandbox, target, forbidden }
}

pub fn test_config() -> SandboxConfig {
    SandboxConfig { run_main: false, ..SandboxConfig::default() }
}

/// Loads `program` into a sandbox running for the `Sandbox` node, with
/// relative paths starting there too.
pub fn load(world: World, program: &ProgramBuilder, config: SandboxConfig) -> Sandbox<Scene> {
    let World { scene, sandbox: node, .. } = world;
    let mut sandbox = Sandbox::new(scene, config).unwrap();
    sandbox.set_self_object(node).unwrap();
    sandbox.set_tree_base(node).unwrap();
    sandbox.load_program(&program.build_elf().unwrap()).unwrap();
    sandbox
}
