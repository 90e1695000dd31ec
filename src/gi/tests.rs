//! End-to-end pass sequences on the software backend

use super::*;
use crate::core::config::VctConfig;
use crate::core::types::{UVec3, Vec3, Vec4};
use crate::gi::software::cone::ConeVolume;
use crate::scene::{Camera, CameraMatrices, DirectionalLight, SceneBoundsTracker, StaticMesh};
use crate::voxel::brick::{channels, face_sample, pack_channels, rounded_mean, sample_coord};
use crate::voxel::indirect::{IndirectArgsRecord, level_slot};
use crate::voxel::svo::Face;
use crate::voxel::{Axis, BrickTarget, NodeIndex, OctreeNode};

const GREY: Vec4 = Vec4::new(0.8, 0.8, 0.8, 1.0);

fn small_config(height: u32) -> VctConfig {
    VctConfig {
        octree_height: height,
        octree_buffer_res: 16,
        brick_buffer_res: 21,
        fragment_capacity: 1 << 14,
        cone_tracing_res: [32, 32],
        ..Default::default()
    }
}

/// Cube of half-size 5 at the origin; with 1.5 padding the grid spans
/// [-6.5, 6.5].
fn cube_scene() -> (StaticMesh, SceneBoundsTracker) {
    let mesh = StaticMesh::cube(Vec3::ZERO, 5.0, GREY);
    let mut bounds = SceneBoundsTracker::new(1.5);
    bounds.add_mesh(&mesh);
    (mesh, bounds)
}

fn built_cube(config: VctConfig) -> (VoxelConeTracer<SoftwareBackend>, StaticMesh) {
    let (mesh, mut bounds) = cube_scene();
    let mut tracer = VoxelConeTracer::new(config, SoftwareBackend::new);
    tracer
        .voxelize_static_scene(std::slice::from_ref(&mesh), &mut bounds)
        .unwrap();
    (tracer, mesh)
}

fn shadow_for(tracer: &VoxelConeTracer<SoftwareBackend>, mesh: &StaticMesh, light: &DirectionalLight) -> HostShadowMap {
    let cube = tracer.grid().unwrap().bounds();
    let camera = CameraMatrices::for_directional_light(light, &cube);
    HostShadowMap::render(std::slice::from_ref(mesh), camera, 128, 128)
}

fn leaf_at(backend: &SoftwareBackend, node_count: u32, leaf: UVec3) -> NodeIndex {
    backend.snapshot(node_count).find_leaf(leaf * 2).unwrap()
}

#[test]
fn test_cube_octree_shape() {
    let (tracer, _) = built_cube(small_config(3));
    assert!(!tracer.needs_voxelization());

    let grid = tracer.grid().unwrap();
    assert_eq!(grid.origin(), Vec3::splat(-6.5));
    assert!((grid.voxel_size() - 1.625).abs() < 1e-6);
    assert_eq!(tracer.node_count(), 73);

    let backend = tracer.backend().unwrap();
    let snapshot = backend.snapshot(tracer.node_count());
    let sizes: Vec<usize> = snapshot.levels().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![1, 8, 64]);

    let opacity = backend.bricks(BrickTarget::Opacity);
    let (mut shell, mut interior) = (0, 0);
    for lz in 0..4 {
        for ly in 0..4 {
            for lx in 0..4 {
                let leaf = leaf_at(backend, tracer.node_count(), UVec3::new(lx, ly, lz));
                let node = snapshot.node(leaf).unwrap();
                if [lx, ly, lz].iter().any(|&c| c == 0 || c == 3) {
                    assert!(node.fragment().is_some(), "shell leaf {lx},{ly},{lz} has no fragment");
                    assert!(opacity.is_occupied(leaf.get()));
                    shell += 1;
                } else {
                    assert_eq!(node.data, 0);
                    assert!(!opacity.is_occupied(leaf.get()));
                    interior += 1;
                }
            }
        }
    }
    assert_eq!((shell, interior), (56, 8));
}

#[test]
fn test_allocated_nodes_are_reachable() {
    let (tracer, _) = built_cube(small_config(3));
    let snapshot = tracer.backend().unwrap().snapshot(tracer.node_count());

    let mut reached: Vec<u32> = snapshot.levels().into_iter().flatten().map(NodeIndex::get).collect();
    reached.sort_unstable();
    assert_eq!(reached, (0..tracer.node_count()).collect::<Vec<_>>());
    assert!(snapshot.asymmetric_neighbors().is_empty());

    let root = snapshot.node(NodeIndex(0)).unwrap();
    let base = root.children().unwrap();
    let first = snapshot.node(base).unwrap();
    assert_eq!(first.neighbor(Face::PosX), Some(base.offset(1)));
    assert_eq!(first.neighbor(Face::NegX), None);
}

#[test]
fn test_every_fragment_reaches_its_leaf() {
    for height in 3..=5 {
        let config = VctConfig {
            octree_buffer_res: 128,
            brick_buffer_res: 81,
            ..small_config(height)
        };
        let (tracer, _) = built_cube(config);
        let backend = tracer.backend().unwrap();
        let snapshot = backend.snapshot(tracer.node_count());
        let fragments = backend.fragments();
        assert!(!fragments.is_empty());

        for fragment in fragments {
            let voxel = fragment.voxel();
            let leaf = snapshot
                .find_leaf(voxel)
                .unwrap_or_else(|| panic!("height {height}: voxel {voxel} has no leaf"));
            let attached = snapshot
                .node(leaf)
                .and_then(OctreeNode::fragment)
                .unwrap_or_else(|| panic!("height {height}: leaf of {voxel} has no fragment"));
            // Leaves cover 2x2x2 voxels.
            assert_eq!(fragments[attached as usize].voxel() >> 1, voxel >> 1);
        }
    }
}

#[test]
fn test_rebuild_is_byte_identical() {
    let (a, _) = built_cube(small_config(3));
    let (b, _) = built_cube(small_config(3));

    let bytes_a = a.backend().unwrap().snapshot(a.node_count()).to_bytes().unwrap();
    let bytes_b = b.backend().unwrap().snapshot(b.node_count()).to_bytes().unwrap();
    assert_eq!(bytes_a, bytes_b);
    assert_eq!(
        a.backend().unwrap().bricks(BrickTarget::Opacity),
        b.backend().unwrap().bricks(BrickTarget::Opacity)
    );
}

#[test]
fn test_voxelize_runs_once() {
    let (mut tracer, mesh) = built_cube(small_config(3));
    let mut bounds = SceneBoundsTracker::new(1.5);
    bounds.add_mesh(&mesh);
    tracer.voxelize_static_scene(&[mesh], &mut bounds).unwrap();

    let stats = tracer.backend().unwrap().stats();
    assert_eq!(stats.builds, 1);
    assert_eq!(stats.readbacks, 1);
    assert!(!bounds.is_frozen());
}

#[test]
fn test_node_overflow_is_bounded() {
    // Height 4 needs 65 subdivisions (521 nodes); the arena holds 256.
    let (tracer, _) = built_cube(small_config(4));
    assert_eq!(tracer.node_count(), 521);

    let backend = tracer.backend().unwrap();
    assert_eq!(backend.stats().dropped_subdivisions, 34);
    for node in backend.nodes() {
        assert!(node.child == 0 || node.child + 8 <= 256, "child base {} past capacity", node.child);
    }
}

#[test]
fn test_face_samples_shared_after_filtering() {
    let (tracer, _) = built_cube(small_config(3));
    let backend = tracer.backend().unwrap();
    let opacity = backend.bricks(BrickTarget::Opacity);
    let a = leaf_at(backend, tracer.node_count(), UVec3::new(1, 3, 1));
    let b = leaf_at(backend, tracer.node_count(), UVec3::new(2, 3, 1));

    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(
                opacity.load(a.get(), face_sample(Axis::X, 2, i, j)),
                opacity.load(b.get(), face_sample(Axis::X, 0, i, j))
            );
        }
    }
}

#[test]
fn test_axis_average_on_hand_built_arena() {
    let mut backend = SoftwareBackend::new(&small_config(2)).unwrap();
    backend.clear_octree().unwrap();

    let nodes = backend.nodes_mut();
    nodes[0].child = 1;
    nodes[1].data = 1;
    nodes[2].data = 1;
    nodes[1].neighbors[Face::PosX.slot()] = 2;
    nodes[2].neighbors[Face::NegX.slot()] = 1;
    // Node 3 has no content, so its pair with node 4 is skipped.
    nodes[4].data = 1;
    nodes[3].neighbors[Face::PosX.slot()] = 4;
    nodes[4].neighbors[Face::NegX.slot()] = 3;
    backend.set_record(level_slot(1), IndirectArgsRecord::for_count(8, 1));

    let high = pack_channels([10, 20, 30, 255]);
    let low = pack_channels([11, 20, 0, 0]);
    let volume = backend.volume_mut(BrickTarget::Opacity);
    for i in 0..3 {
        for j in 0..3 {
            volume.store(1, face_sample(Axis::X, 2, i, j), high);
            volume.store(2, face_sample(Axis::X, 0, i, j), low);
            volume.store(3, face_sample(Axis::X, 2, i, j), high);
            volume.store(4, face_sample(Axis::X, 0, i, j), low);
        }
    }

    backend.average_along_axis(BrickTarget::Opacity, Axis::X, 1).unwrap();

    let volume = backend.bricks(BrickTarget::Opacity);
    let mean = rounded_mean(&[high, low]);
    assert_eq!(channels(mean), [11, 20, 15, 128]);
    for i in 0..3 {
        for j in 0..3 {
            assert_eq!(volume.load(1, face_sample(Axis::X, 2, i, j)), mean);
            assert_eq!(volume.load(2, face_sample(Axis::X, 0, i, j)), mean);
            assert_eq!(volume.load(3, face_sample(Axis::X, 2, i, j)), high);
            assert_eq!(volume.load(4, face_sample(Axis::X, 0, i, j)), low);
        }
    }
}

/// Distinct value per child and sample.
fn child_sample(octant: u32, p: u32) -> u32 {
    pack_channels([octant * 30 + p, 200 - octant * 20, (octant * 7 + p * 3) % 256, 255])
}

/// Root with 8 children whose irradiance bricks hold [`child_sample`].
fn root_with_distinct_children() -> SoftwareBackend {
    let mut backend = SoftwareBackend::new(&small_config(2)).unwrap();
    backend.clear_octree().unwrap();
    backend.nodes_mut()[0].child = 1;

    let volume = backend.volume_mut(BrickTarget::Irradiance);
    for octant in 0..8 {
        for p in 0..27 {
            volume.store(1 + octant, sample_coord(p), child_sample(octant, p));
        }
    }
    backend
}

fn sample_index(q: UVec3) -> u32 {
    q.x + q.y * 3 + q.z * 9
}

fn expected_corners() -> Vec<(UVec3, u32)> {
    let mut corners = Vec::new();
    for z in [0, 2] {
        for y in [0, 2] {
            for x in [0, 2] {
                let q = UVec3::new(x, y, z);
                let children: Vec<u32> = (0..8).map(|o| child_sample(o, sample_index(q))).collect();
                corners.push((q, rounded_mean(&children)));
            }
        }
    }
    corners
}

#[test]
fn test_gather_means_child_corners() {
    let mut backend = root_with_distinct_children();
    backend.gather_from_low_level(BrickTarget::Irradiance, 0).unwrap();
    let volume = backend.bricks(BrickTarget::Irradiance);

    for (q, want) in expected_corners() {
        assert_eq!(channels(volume.load(0, q)), channels(want), "corner {q}");
    }

    // The centre sample takes each child's corner nearest the parent centre.
    let centre: Vec<u32> = (0..8)
        .map(|o| {
            let near = UVec3::new(2 - 2 * (o & 1), 2 - 2 * ((o >> 1) & 1), 2 - 2 * ((o >> 2) & 1));
            child_sample(o, sample_index(near))
        })
        .collect();
    assert_eq!(volume.load(0, UVec3::ONE), rounded_mean(&centre));
}

#[test]
fn test_isolated_parent_keeps_gathered_corners() {
    let mut backend = root_with_distinct_children();
    backend.gather_from_low_level(BrickTarget::Irradiance, 0).unwrap();
    for axis in [Axis::X, Axis::Y, Axis::Z] {
        backend.average_along_axis(BrickTarget::Irradiance, axis, 0).unwrap();
    }

    let volume = backend.bricks(BrickTarget::Irradiance);
    for (q, want) in expected_corners() {
        assert_eq!(volume.load(0, q), want, "corner {q}");
    }
}

#[test]
fn test_connect_nodes_keeps_highest_fragment() {
    let mut backend = SoftwareBackend::new(&small_config(2)).unwrap();
    backend.clear_octree().unwrap();
    backend.nodes_mut()[0].child = 1;
    let fragments = backend.fragments_mut();
    fragments[0] = crate::voxel::VoxelFragment::new(UVec3::new(0, 0, 0), GREY, Vec3::Y);
    fragments[1] = crate::voxel::VoxelFragment::new(UVec3::new(1, 1, 0), GREY, Vec3::Y);
    fragments[2] = crate::voxel::VoxelFragment::new(UVec3::new(3, 0, 0), GREY, Vec3::Y);
    backend.set_record(0, IndirectArgsRecord::for_count(3, 0));

    backend.connect_nodes_to_voxels().unwrap();
    let nodes = backend.nodes();
    assert_eq!(nodes[1].fragment(), Some(1));
    assert_eq!(nodes[2].fragment(), Some(2));
    assert_eq!(nodes[3], OctreeNode::empty());
}

#[test]
fn test_not_ready_tracer_is_noop() {
    let config = VctConfig {
        octree_height: 1,
        ..small_config(3)
    };
    let mut tracer = VoxelConeTracer::new(config, SoftwareBackend::new);
    assert!(!tracer.is_ready());

    let (mesh, mut bounds) = cube_scene();
    tracer.voxelize_static_scene(&[mesh], &mut bounds).unwrap();
    assert!(tracer.needs_voxelization());
    assert!(!bounds.is_frozen());
    assert!(tracer.clear().is_empty());
}

#[test]
fn test_light_injection_is_cached() {
    let (mut tracer, mesh) = built_cube(small_config(3));
    let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE);
    let shadow = shadow_for(&tracer, &mesh, &light);

    assert!(tracer.needs_process_light(&light));
    assert!(tracer.update_lighting(&light, &shadow).unwrap());
    assert!(!tracer.needs_process_light(&light));
    assert!(!tracer.update_lighting(&light, &shadow).unwrap());
    tracer.process_shadow_map(&light, &shadow).unwrap();
    assert_eq!(tracer.backend().unwrap().stats().injections, 1);

    let warmer = DirectionalLight::new(Vec3::NEG_Y, Vec3::new(1.0, 0.9, 0.8));
    let tilted = DirectionalLight::new(Vec3::new(0.2, -1.0, 0.0), warmer.color);
    let placed = tilted.with_placement(Vec3::new(0.0, 10.0, 0.0), 0.0);
    let wider = placed.with_placement(placed.position, 20.0);
    for (i, changed) in [warmer, tilted, placed, wider].iter().enumerate() {
        assert!(tracer.needs_process_light(changed));
        assert!(tracer.update_lighting(changed, &shadow).unwrap());
        let stats = tracer.backend().unwrap().stats();
        assert_eq!(stats.injections, 2 + i as u32);
        assert_eq!(stats.lit_averages, 2 + i as u32);
    }

    assert!(!tracer.update_lighting(&wider, &shadow).unwrap());
    assert_eq!(tracer.backend().unwrap().stats().injections, 5);
}

#[test]
fn test_lighting_before_voxelization_is_noop() {
    let mut tracer = VoxelConeTracer::new(small_config(3), SoftwareBackend::new);
    let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE);
    let (mesh, _) = cube_scene();
    let camera = CameraMatrices::for_directional_light(&light, &crate::math::Aabb::new(Vec3::splat(-6.5), Vec3::splat(6.5)));
    let shadow = HostShadowMap::render(&[mesh], camera, 16, 16);

    assert!(!tracer.update_lighting(&light, &shadow).unwrap());
    tracer.process_shadow_map(&light, &shadow).unwrap();
    assert_eq!(tracer.backend().unwrap().stats().injections, 0);
    assert!(tracer.needs_process_light(&light));
}

#[test]
fn test_irradiance_top_lit_bottom_dark() {
    let (mut tracer, mesh) = built_cube(small_config(3));
    let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE);
    let shadow = shadow_for(&tracer, &mesh, &light);
    tracer.update_lighting(&light, &shadow).unwrap();

    let backend = tracer.backend().unwrap();
    let irradiance = backend.bricks(BrickTarget::Irradiance);
    for lz in 1..3 {
        for lx in 1..3 {
            let leaf = leaf_at(backend, tracer.node_count(), UVec3::new(lx, 3, lz));
            let [r, g, b, a] = channels(irradiance.load(leaf.get(), UVec3::ONE));
            assert!(r > 150 && g > 150 && b > 150, "top leaf {lx},{lz} too dark: {r} {g} {b}");
            assert!(a > 200, "top leaf {lx},{lz} barely covered: {a}");
            assert!(backend.lit()[leaf.as_usize()] > 0);
        }
    }
    for lz in 0..4 {
        for lx in 0..4 {
            let leaf = leaf_at(backend, tracer.node_count(), UVec3::new(lx, 0, lz));
            for sample in irradiance.brick(leaf.get()) {
                assert_eq!(channels(sample)[..3], [0, 0, 0], "bottom leaf {lx},{lz} lit");
            }
        }
    }
}

#[test]
fn test_cones_see_occluders_and_light() {
    let (mut tracer, mesh) = built_cube(small_config(3));
    let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE);
    let shadow = shadow_for(&tracer, &mesh, &light);
    tracer.update_lighting(&light, &shadow).unwrap();
    tracer.cone_settings_mut().world_cone_offset = 0.0;

    let grid = *tracer.grid().unwrap();
    let camera = Camera::look_at(Vec3::new(0.0, 0.0, 20.0), Vec3::ZERO, Vec3::Y, 1.0).matrices();
    let params = ConeTraceParams::new(
        tracer.cone_settings(),
        &camera,
        glam::UVec2::splat(32),
        glam::UVec2::splat(32),
        &grid,
        tracer.config().bricks_per_axis(),
    );
    let backend = tracer.backend().unwrap();
    let volume = ConeVolume {
        nodes: backend.nodes(),
        opacity: backend.bricks(BrickTarget::Opacity),
        irradiance: backend.bricks(BrickTarget::Irradiance),
    };

    // Just outside the +X face, looking back into the cube
    let blocked = volume.trace(&params, Vec3::new(6.0, 0.0, 0.0), Vec3::NEG_X);
    assert!(blocked.w < 0.8, "visibility {}", blocked.w);

    // Above the lit top face, looking down at it
    let lit = volume.trace(&params, Vec3::new(0.0, 6.0, 0.0), Vec3::NEG_Y);
    assert!(lit.x > 0.0 && lit.y > 0.0 && lit.z > 0.0, "no irradiance gathered: {lit}");
}

#[test]
fn test_cone_tracing_frame() {
    let (mut tracer, mesh) = built_cube(small_config(3));
    let light = DirectionalLight::new(Vec3::NEG_Y, Vec3::ONE);
    let shadow = shadow_for(&tracer, &mesh, &light);
    tracer.update_lighting(&light, &shadow).unwrap();
    tracer.cone_settings_mut().world_cone_offset = 0.5;

    let camera = Camera::look_at(Vec3::new(0.0, 8.0, 18.0), Vec3::ZERO, Vec3::Y, 1.0).matrices();
    let frame = HostFrame::render(std::slice::from_ref(&mesh), camera, 64, 64);
    tracer.voxel_cone_tracing(&frame).unwrap();

    let backend = tracer.backend().unwrap();
    assert_eq!(backend.output_size(), glam::UVec2::new(32, 32));
    let output = backend.output();
    assert_eq!(output.len(), 32 * 32);
    assert_eq!(output[0], Vec4::new(0.0, 0.0, 0.0, 1.0));
    let center = output[16 * 32 + 16];
    assert!(center.is_finite());
    assert!((0.0..=1.0).contains(&center.w));
    assert_eq!(backend.stats().cone_traces, 1);
}

#[test]
fn test_debug_draw_counts() {
    let (mut tracer, _) = built_cube(small_config(3));
    let camera = Camera::look_at(Vec3::new(0.0, 8.0, 18.0), Vec3::ZERO, Vec3::Y, 1.0).matrices();
    let fragments = tracer.backend().unwrap().fragment_count() as usize;
    assert!(fragments >= 6 * 36);

    let mut cubes = Vec::new();
    tracer.draw_buffers(DebugDrawMode::Voxels, &camera, &mut cubes).unwrap();
    assert_eq!(cubes.len(), fragments);
    assert!(cubes.iter().all(|c| (c.size - 1.625).abs() < 1e-6));
    assert!(cubes.iter().all(|c| (c.color - GREY).abs().max_element() < 0.01));

    // Debug level 7 clamps to the leaf level
    tracer.draw_buffers(DebugDrawMode::Bricks, &camera, &mut cubes).unwrap();
    assert_eq!(cubes.len(), fragments);
    assert!(cubes.iter().all(|c| (c.size - 3.25).abs() < 1e-5));
}

#[test]
fn test_clear_releases_backend() {
    let (mut tracer, _) = built_cube(small_config(3));
    assert!(tracer.clear().is_empty());
    assert!(!tracer.is_ready());
    assert!(tracer.needs_voxelization());
    assert_eq!(tracer.node_count(), 0);
}

#[test]
fn test_height_nine_neighbors_symmetric() {
    let config = VctConfig {
        octree_height: 9,
        octree_buffer_res: 64,
        brick_buffer_res: 48,
        ..small_config(9)
    };
    // A small quad straddling the grid center, inside a 203-unit grid
    let quad = StaticMesh::quad(
        [
            Vec3::new(-0.5, 0.1, -0.5),
            Vec3::new(-0.5, 0.1, 0.5),
            Vec3::new(0.5, 0.1, 0.5),
            Vec3::new(0.5, 0.1, -0.5),
        ],
        GREY,
    );
    let mut bounds = SceneBoundsTracker::new(1.5);
    bounds.add_vertex(Vec3::splat(-100.0));
    bounds.add_vertex(Vec3::splat(100.0));

    let mut tracer = VoxelConeTracer::new(config, SoftwareBackend::new);
    tracer.voxelize_static_scene(&[quad], &mut bounds).unwrap();

    let snapshot = tracer.backend().unwrap().snapshot(tracer.node_count());
    let levels = snapshot.levels();
    assert_eq!(levels.len(), 9);
    assert!(levels.iter().all(|l| !l.is_empty()));
    assert!(snapshot.asymmetric_neighbors().is_empty());

    // The four leaves around the center line link to each other across octets.
    let linked = levels[8]
        .iter()
        .filter(|&&n| snapshot.node(n).and_then(|node| node.neighbor(Face::PosX)).is_some())
        .count();
    assert!(linked > 0);
}
