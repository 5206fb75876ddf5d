//! Headless baking probe
//!
//! Drives the baker with a procedural waving cloth for a fixed number of
//! frames and logs the fastest vertex of each frame.
//!
//! ```bash
//! cargo run --bin bake_probe -- [--cpu] [--optimal] [--frames N]
//! cargo run --bin bake_probe -- --help
//! ```

use clap::Parser;
use glam::{Mat4, Quat, Vec3};
use skinned_mesh_baker::{
    profile_plot, Backend, BackendType, BakedMesh, BakerConfig, SkinnedMeshBaker, SkinnedSource,
    Transform,
};

const GRID: usize = 64;
const FRAME_TIME: f32 = 1.0 / 60.0;

/// A square cloth whose vertices ride a travelling sine wave while its root
/// circles the origin.
struct WavingCloth {
    time: f32,
    amplitude: f32,
}

impl WavingCloth {
    fn root(&self) -> Transform {
        let angle = self.time * 0.5;
        Transform::from_position_rotation(
            Vec3::new(angle.cos() * 4.0, 0.0, angle.sin() * 4.0),
            Quat::from_rotation_y(-angle),
        )
    }
}

impl SkinnedSource for WavingCloth {
    fn world_transform(&self) -> Mat4 {
        self.root().matrix()
    }

    fn vertex_count(&self) -> usize {
        GRID * GRID
    }

    fn bake_into(&self, mesh: &mut BakedMesh) {
        let (positions, normals) = mesh.write(GRID * GRID);
        let step = 1.0 / (GRID - 1) as f32;
        for (i, (p, n)) in positions.iter_mut().zip(normals.iter_mut()).enumerate() {
            let u = (i % GRID) as f32 * step;
            let v = (i / GRID) as f32 * step;
            let phase = u * std::f32::consts::TAU * 2.0 - self.time * 3.0;
            *p = Vec3::new(u - 0.5, self.amplitude * phase.sin(), v - 0.5);
            let slope = self.amplitude * std::f32::consts::TAU * 2.0 * phase.cos();
            *n = Vec3::new(-slope, 1.0, 0.0);
        }
    }
}

/// Skinned mesh baking probe arguments.
#[derive(Parser, Debug)]
#[command(
    name = "bake_probe",
    about = "Bakes a procedural waving cloth for a fixed number of frames",
    version
)]
struct Args {
    /// Evaluate the kernels on the CPU instead of a wgpu adapter.
    #[arg(long)]
    cpu: bool,

    /// Derive velocity from last frame's position map.
    #[arg(long)]
    optimal: bool,

    /// Number of frames to bake before exiting.
    #[arg(long, default_value_t = 120)]
    frames: u32,
}

impl Args {
    fn backend_type(&self) -> BackendType {
        if self.cpu {
            BackendType::Cpu
        } else {
            BackendType::Wgpu
        }
    }
}

fn create_backend(backend_type: BackendType) -> Backend {
    match Backend::new(backend_type) {
        Ok(backend) => backend,
        Err(e) => {
            log::warn!("{:?} backend unavailable ({}), using CPU backend", backend_type, e);
            Backend::Cpu(skinned_mesh_baker::CpuBackend::new())
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting bake probe");
    log::info!("Baker version: {}", skinned_mesh_baker::VERSION);

    let args = Args::parse();
    let mut backend = create_backend(args.backend_type());
    log::info!("Using {} backend", backend.as_dyn().name());

    let mut baker = SkinnedMeshBaker::new(BakerConfig {
        optimal_mode: args.optimal,
        label: "Bake Probe".to_string(),
        ..Default::default()
    })?;

    let mut cloth = WavingCloth {
        time: 0.0,
        amplitude: 0.1,
    };
    baker.initialize(backend.as_dyn_mut(), &[&cloth])?;

    for frame in 0..args.frames {
        cloth.time += FRAME_TIME;
        baker.step(backend.as_dyn_mut(), &[&cloth], FRAME_TIME)?;

        if let Some(map) = baker.velocity_map() {
            let velocity = backend.as_dyn_mut().read_texture(map.handle)?;
            let max_speed = velocity
                .texels
                .iter()
                .take(baker.vertex_count())
                .map(|t| Vec3::new(t[0], t[1], t[2]).length())
                .fold(0.0f32, f32::max);
            profile_plot!("max_speed", max_speed);
            log::info!("Frame {:3}: max speed {:.3} m/s", frame, max_speed);
        }
        skinned_mesh_baker::frame_mark!();
    }

    baker.teardown(backend.as_dyn_mut());
    log::info!("Done");
    Ok(())
}
