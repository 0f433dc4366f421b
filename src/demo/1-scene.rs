// Copyright © 2022
// Author: Antonio Caggiano <info@antoniocaggiano.eu>
// SPDX-License-Identifier: MIT

use vks::*;

pub fn main() {
    env_logger::init();

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("Usage: 1-scene <scene.gltf>");
            std::process::exit(1);
        }
    };

    let ctx = Ctx::builder().debug(true).build();
    let dev = Dev::new(&ctx);

    let mut scene = Loader::new()
        .load(&dev, &path)
        .expect("Failed to load scene");

    let mut lights = LightCollector::new();
    scene.update(&mut lights);

    println!(
        "{}: {} nodes, {} meshes, {} primitives, {} materials, {} directional and {} point lights",
        path,
        scene.nodes.len(),
        scene.meshes.len(),
        scene.primitives.len(),
        scene.materials.len(),
        lights.directional.len(),
        lights.point.len()
    );

    drop(scene);
    dev.wait();
}
