//! Integration tests for the skinned mesh baker.
//!
//! Every test runs against the CPU backend and, when an adapter exists, wgpu.
//! Both backends must produce the same maps.
//!
//! ```bash
//! cargo test --test bake_tests
//! ```

mod common;

use common::{assert_vec3_near, read_floats, BackendKind, DriftingRow, TestContext};
use glam::Vec3;
use rstest::rstest;
use skinned_mesh_baker::backend::{BufferDescriptor, BufferUsage};
use skinned_mesh_baker::pipeline::TransferKernel;
use skinned_mesh_baker::{
    BackendError, ComputeBackend, SkinnedSource, Transform, WgpuBackend,
};

const EPS: f32 = 1e-3;

macro_rules! context_or_skip {
    ($kind:expr, $optimal:expr) => {
        match TestContext::with_mode($kind, $optimal) {
            Some(ctx) => ctx,
            None => {
                eprintln!("Backend {:?} not available, skipping", $kind);
                return;
            }
        }
    };
}

// ============================================================================
// Layout Tests
// ============================================================================

/// Source k's vertices land right after sources 0..k in both the vertex
/// buffers and the maps.
#[rstest]
#[case::cpu(BackendKind::Cpu)]
#[case::wgpu(BackendKind::Wgpu)]
fn test_offsets_accumulate_across_sources(#[case] kind: BackendKind) {
    let mut ctx = context_or_skip!(kind, false);

    let a = DriftingRow::new(3).with_origin(Vec3::new(0.0, 10.0, 0.0));
    let b = DriftingRow::new(5).with_origin(Vec3::new(0.0, 20.0, 0.0));
    let sources: [&dyn SkinnedSource; 2] = [&a, &b];
    ctx.initialize(&sources);
    assert_eq!(ctx.baker.vertex_count(), 8);

    ctx.step(&sources, 1.0 / 60.0);

    // Just-sampled data now sits in the previous buffer.
    let flat = ctx.previous_positions();
    for i in 0..3 {
        assert_eq!(&flat[i * 3..i * 3 + 3], &a.local_position(i).to_array());
    }
    for i in 0..5 {
        let base = (3 + i) * 3;
        assert_eq!(&flat[base..base + 3], &b.local_position(i).to_array());
    }

    let positions = ctx.position_map();
    assert_vec3_near(ctx.vertex(&positions, 2), a.local_position(2), EPS);
    assert_vec3_near(ctx.vertex(&positions, 3), b.local_position(0), EPS);
    assert_vec3_near(ctx.vertex(&positions, 7), b.local_position(4), EPS);
}

/// Vertex `i` is read back from pixel `(i % 256, i / 256)`.
#[rstest]
#[case::cpu(BackendKind::Cpu)]
#[case::wgpu(BackendKind::Wgpu)]
fn test_addressing_round_trip(#[case] kind: BackendKind) {
    let mut ctx = context_or_skip!(kind, true);

    let row = DriftingRow::new(600);
    ctx.initialize(&[&row]);
    let layout = ctx.baker.map_layout().unwrap();
    assert_eq!((layout.width, layout.height), (256, 8));

    ctx.step(&[&row], 1.0 / 30.0);

    let positions = ctx.position_map();
    for i in 0..600u32 {
        let (x, y) = (i % 256, i / 256);
        assert_eq!(positions.texel(x, y)[0], i as f32, "vertex {i}");
        assert_eq!(positions.texel(x, y)[3], 1.0);
    }
    // Unused pixels stay untouched
    assert_eq!(positions.texel(600 % 256, 600 / 256), [0.0; 4]);
}

// ============================================================================
// Velocity Tests
// ============================================================================

/// Nothing moved yet, so the first step writes zero velocity in either mode,
/// even though the non-optimal previous buffer starts out zeroed.
#[rstest]
#[case::cpu_non_optimal(BackendKind::Cpu, false)]
#[case::cpu_optimal(BackendKind::Cpu, true)]
#[case::wgpu_non_optimal(BackendKind::Wgpu, false)]
#[case::wgpu_optimal(BackendKind::Wgpu, true)]
fn test_first_frame_velocity_is_zero(#[case] kind: BackendKind, #[case] optimal: bool) {
    let mut ctx = context_or_skip!(kind, optimal);

    let mut row = DriftingRow::new(16)
        .with_origin(Vec3::new(5.0, 5.0, 5.0))
        .with_drift(Vec3::X);
    row.transform = Transform::from_position(Vec3::new(0.0, 3.0, 0.0));
    ctx.initialize(&[&row]);

    row.advance(0.1);
    ctx.step(&[&row], 0.1);

    let velocity = ctx.velocity_map();
    for i in 0..16 {
        assert_eq!(ctx.vertex(&velocity, i), Vec3::ZERO, "vertex {i}");
    }
}

/// Vertices drifting in local space report their drift as velocity.
#[rstest]
#[case::cpu_non_optimal(BackendKind::Cpu, false)]
#[case::cpu_optimal(BackendKind::Cpu, true)]
#[case::wgpu_non_optimal(BackendKind::Wgpu, false)]
#[case::wgpu_optimal(BackendKind::Wgpu, true)]
fn test_steady_drift_velocity(#[case] kind: BackendKind, #[case] optimal: bool) {
    let mut ctx = context_or_skip!(kind, optimal);
    let dt = 0.5;

    let mut row = DriftingRow::new(10).with_drift(Vec3::new(2.0, 0.0, -1.0));
    ctx.initialize(&[&row]);

    for _ in 0..3 {
        ctx.step(&[&row], dt);
        row.advance(dt);
    }

    let velocity = ctx.velocity_map();
    for i in 0..10 {
        assert_vec3_near(ctx.vertex(&velocity, i), row.drift, EPS);
    }
}

/// Root motion shows up in velocity even when the mesh itself is static.
#[rstest]
#[case::cpu_non_optimal(BackendKind::Cpu, false)]
#[case::cpu_optimal(BackendKind::Cpu, true)]
#[case::wgpu_non_optimal(BackendKind::Wgpu, false)]
#[case::wgpu_optimal(BackendKind::Wgpu, true)]
fn test_root_motion_velocity(#[case] kind: BackendKind, #[case] optimal: bool) {
    let mut ctx = context_or_skip!(kind, optimal);
    let dt = 0.25;

    let mut row = DriftingRow::new(4);
    ctx.initialize(&[&row]);

    ctx.step(&[&row], dt);
    row.transform.translate(Vec3::new(0.0, 0.0, 1.0));
    ctx.step(&[&row], dt);

    let velocity = ctx.velocity_map();
    let positions = ctx.position_map();
    for i in 0..4 {
        assert_vec3_near(ctx.vertex(&velocity, i), Vec3::new(0.0, 0.0, 4.0), EPS);
        assert_vec3_near(
            ctx.vertex(&positions, i),
            Vec3::new(i as f32, 0.0, 1.0),
            EPS,
        );
    }

    let root = ctx.baker.root_transform().unwrap();
    assert_eq!(root.previous, row.transform.matrix());
}

/// A zero frame time yields zero velocity, never inf or NaN.
#[rstest]
#[case::cpu(BackendKind::Cpu)]
#[case::wgpu(BackendKind::Wgpu)]
fn test_zero_dt_is_degenerate_frame(#[case] kind: BackendKind) {
    let mut ctx = context_or_skip!(kind, false);

    let mut row = DriftingRow::new(4).with_drift(Vec3::ONE);
    ctx.initialize(&[&row]);
    ctx.step(&[&row], 0.1);
    row.advance(0.1);
    ctx.step(&[&row], 0.0);

    let velocity = ctx.velocity_map();
    for i in 0..4 {
        assert_eq!(ctx.vertex(&velocity, i), Vec3::ZERO);
    }
}

/// Normals are rotated by the root and renormalized.
#[rstest]
#[case::cpu(BackendKind::Cpu)]
#[case::wgpu(BackendKind::Wgpu)]
fn test_normals_follow_root_rotation(#[case] kind: BackendKind) {
    let mut ctx = context_or_skip!(kind, true);

    let mut row = DriftingRow::new(2);
    row.transform.rotate_axis(Vec3::Z, std::f32::consts::FRAC_PI_2);
    ctx.initialize(&[&row]);
    ctx.step(&[&row], 1.0 / 60.0);

    let normals = ctx.normal_map();
    assert_vec3_near(ctx.vertex(&normals, 1), Vec3::new(-1.0, 0.0, 0.0), EPS);
}

// ============================================================================
// Double Buffer Tests
// ============================================================================

/// The previous buffer always holds exactly the last frame's samples, and the
/// two buffers trade places every frame.
#[rstest]
#[case::cpu(BackendKind::Cpu)]
#[case::wgpu(BackendKind::Wgpu)]
fn test_swap_lags_by_one_frame(#[case] kind: BackendKind) {
    let mut ctx = context_or_skip!(kind, false);

    let mut row = DriftingRow::new(3).with_drift(Vec3::Y);
    ctx.initialize(&[&row]);

    let first = ctx.baker.current_position_buffer().unwrap();
    let second = ctx.baker.previous_position_buffer().unwrap();

    for frame in 0..5 {
        ctx.step(&[&row], 1.0);

        let expected_previous = if frame % 2 == 0 { first } else { second };
        assert_eq!(ctx.baker.previous_position_buffer(), Some(expected_previous));

        let flat = ctx.previous_positions();
        for i in 0..3 {
            assert_eq!(&flat[i * 3..i * 3 + 3], &row.local_position(i).to_array());
        }
        row.advance(1.0);
    }
}

/// The previous buffer exists exactly when optimal mode is off; repeating the
/// current mode allocates nothing.
#[test]
fn test_mode_toggle_invariant() {
    let mut ctx = TestContext::with_mode(BackendKind::Cpu, false).unwrap();
    let row = DriftingRow::new(32);
    ctx.initialize(&[&row]);

    let live = |ctx: &TestContext| ctx.backend.as_cpu().map(|b| b.live_buffers()).unwrap();
    let before = live(&ctx);
    assert!(ctx.baker.previous_position_buffer().is_some());

    ctx.set_optimal_mode(false);
    assert_eq!(live(&ctx), before);

    ctx.set_optimal_mode(true);
    assert!(ctx.baker.previous_position_buffer().is_none());
    assert_eq!(live(&ctx), before - 1);

    ctx.set_optimal_mode(true);
    assert_eq!(live(&ctx), before - 1);

    ctx.set_optimal_mode(false);
    assert!(ctx.baker.previous_position_buffer().is_some());
    assert_eq!(live(&ctx), before);
}

/// Switching mode mid-run keeps velocity correct: into optimal mode the
/// position map already holds last frame, out of it the fresh previous buffer
/// costs one zero-velocity frame.
#[rstest]
#[case::cpu(BackendKind::Cpu)]
#[case::wgpu(BackendKind::Wgpu)]
fn test_mode_switch_mid_run(#[case] kind: BackendKind) {
    let mut ctx = context_or_skip!(kind, false);
    let dt = 0.5;
    let mut row = DriftingRow::new(8).with_drift(Vec3::new(0.0, 4.0, 0.0));
    ctx.initialize(&[&row]);

    ctx.step(&[&row], dt);
    row.advance(dt);

    ctx.set_optimal_mode(true);
    ctx.step(&[&row], dt);
    row.advance(dt);
    let velocity = ctx.velocity_map();
    assert_vec3_near(ctx.vertex(&velocity, 5), row.drift, EPS);

    ctx.set_optimal_mode(false);
    ctx.step(&[&row], dt);
    row.advance(dt);
    let velocity = ctx.velocity_map();
    assert_eq!(ctx.vertex(&velocity, 5), Vec3::ZERO);

    ctx.step(&[&row], dt);
    let velocity = ctx.velocity_map();
    assert_vec3_near(ctx.vertex(&velocity, 5), row.drift, EPS);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

/// No sources: nothing is allocated and stepping does nothing.
#[rstest]
#[case::cpu(BackendKind::Cpu)]
#[case::wgpu(BackendKind::Wgpu)]
fn test_zero_sources_are_inert(#[case] kind: BackendKind) {
    let mut ctx = context_or_skip!(kind, false);

    ctx.initialize(&[]);
    assert_eq!(ctx.baker.vertex_count(), 0);
    assert!(ctx.baker.position_map().is_none());

    ctx.step(&[], 1.0 / 60.0);
    ctx.teardown();

    if let Some(cpu) = ctx.backend.as_cpu() {
        assert_eq!(cpu.dispatch_count(), 0);
        assert_eq!(cpu.live_textures(), 0);
    }
}

/// Teardown releases everything, including when the previous buffer was
/// never allocated, and tolerates repeated calls.
#[rstest]
#[case::non_optimal(false)]
#[case::optimal(true)]
fn test_teardown_releases_all(#[case] optimal: bool) {
    let mut ctx = TestContext::with_mode(BackendKind::Cpu, optimal).unwrap();
    let row = DriftingRow::new(100);
    ctx.initialize(&[&row]);
    ctx.step(&[&row], 1.0 / 60.0);

    ctx.teardown();
    ctx.teardown();
    assert!(!ctx.baker.is_initialized());

    let cpu = ctx.backend.as_cpu().unwrap();
    assert_eq!(cpu.live_buffers(), 0);
    assert_eq!(cpu.live_textures(), 0);
    assert_eq!(cpu.live_bindings(), 0);

    // Stepping after teardown is a no-op
    ctx.step(&[&row], 1.0 / 60.0);
}

/// A second initialize replaces every resource of the first.
#[test]
fn test_reinitialize_replaces_resources() {
    let mut ctx = TestContext::with_mode(BackendKind::Cpu, false).unwrap();
    let small = DriftingRow::new(10);
    let large = DriftingRow::new(3000);

    ctx.initialize(&[&small]);
    let live = ctx.backend.as_cpu().unwrap().live_buffers();
    ctx.initialize(&[&large]);

    assert_eq!(ctx.baker.vertex_count(), 3000);
    assert_eq!(ctx.baker.map_layout().unwrap().height, 16);
    assert_eq!(ctx.backend.as_cpu().unwrap().live_buffers(), live);
}

/// The wgpu backend matches the host evaluation texel for texel.
#[test]
fn test_backends_agree() {
    let Some(mut gpu) = TestContext::with_mode(BackendKind::Wgpu, false) else {
        eprintln!("Backend Wgpu not available, skipping");
        return;
    };
    let mut cpu = TestContext::with_mode(BackendKind::Cpu, false).unwrap();

    let mut row = DriftingRow::new(300).with_drift(Vec3::new(0.5, 1.0, 0.0));
    row.transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0));
    gpu.initialize(&[&row]);
    cpu.initialize(&[&row]);

    for _ in 0..3 {
        gpu.step(&[&row], 0.25);
        cpu.step(&[&row], 0.25);
        row.advance(0.25);
        row.transform.translate(Vec3::new(0.1, 0.0, 0.0));
    }

    let (g, c) = (gpu.position_map(), cpu.position_map());
    let (gv, cv) = (gpu.velocity_map(), cpu.velocity_map());
    for i in 0..300 {
        assert_vec3_near(gpu.vertex(&g, i), cpu.vertex(&c, i), EPS);
        assert_vec3_near(gpu.vertex(&gv, i), cpu.vertex(&cv, i), 1e-2);
    }
}

// ============================================================================
// Backend Error Tests
// ============================================================================

/// A wgpu buffer past the device limit comes back as an error and leaves the
/// backend usable.
#[test]
fn test_wgpu_oversized_buffer_is_an_error() {
    let Ok(mut backend) = WgpuBackend::new() else {
        eprintln!("Backend Wgpu not available, skipping");
        return;
    };
    let limit = backend.device().limits().max_buffer_size;
    let err = backend
        .create_buffer(&BufferDescriptor {
            label: Some("oversized".into()),
            size: limit + wgpu::COPY_BUFFER_ALIGNMENT,
            usage: BufferUsage::STORAGE,
        })
        .unwrap_err();
    assert!(
        matches!(
            err,
            BackendError::BufferCreationFailed(_) | BackendError::OutOfMemory
        ),
        "unexpected error {err:?}"
    );

    let buffer = backend
        .create_buffer(&BufferDescriptor::vec3_storage("after failure", 1))
        .unwrap();
    backend.destroy_buffer(buffer);
}

// ============================================================================
// Shader Tests
// ============================================================================

/// Both kernel variants parse and validate as WGSL.
#[rstest]
#[case::non_optimal(TransferKernel::NonOptimal)]
#[case::optimal(TransferKernel::Optimal)]
fn test_kernel_wgsl_validates(#[case] kernel: TransferKernel) {
    let source = kernel.shader_source();
    let module = naga::front::wgsl::parse_str(&source)
        .unwrap_or_else(|e| panic!("{}: {}", kernel.entry_point(), e.emit_to_string(&source)));

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .unwrap_or_else(|e| panic!("{}: {:?}", kernel.entry_point(), e));

    assert!(module
        .entry_points
        .iter()
        .any(|ep| ep.name == kernel.entry_point()
            && ep.stage == naga::ShaderStage::Compute
            && ep.workgroup_size == [8, 8, 1]));
}

/// Readback helper sanity check against a hand-written buffer.
#[test]
fn test_read_floats_helper() {
    let mut ctx = TestContext::with_mode(BackendKind::Cpu, true).unwrap();
    let row = DriftingRow::new(2).with_origin(Vec3::splat(7.0));
    ctx.initialize(&[&row]);
    ctx.step(&[&row], 0.1);

    let current = ctx.baker.current_position_buffer().unwrap();
    let flat = read_floats(ctx.backend.as_dyn_mut(), current);
    assert_eq!(&flat[..6], &[7.0, 7.0, 7.0, 8.0, 7.0, 7.0]);
}
