//! Baker lifecycle: initialize, step once per frame, teardown

use crate::backend::traits::*;
use crate::backend::{CpuBackend, WgpuBackend};
use crate::pipeline::{frame_rate, MeshSampler, TransferInputs, TransferStage};
use crate::profile_scope;
use crate::resources::{MapLayout, MapTexture, OutputMaps, PositionBufferPair};
use crate::scene::{RootTransform, SkinnedSource};
use crate::{BackendType, BakerConfig, BakerError};

/// Backend wrapper to pick an implementation at runtime
pub enum Backend {
    Wgpu(WgpuBackend),
    Cpu(CpuBackend),
}

impl Backend {
    /// Create a backend, blocking until a wgpu device is ready
    pub fn new(backend_type: BackendType) -> BackendResult<Self> {
        match backend_type {
            BackendType::Wgpu => Ok(Backend::Wgpu(WgpuBackend::new()?)),
            BackendType::Cpu => Ok(Backend::Cpu(CpuBackend::new())),
        }
    }

    /// Async backend creation
    pub async fn new_async(backend_type: BackendType) -> BackendResult<Self> {
        match backend_type {
            BackendType::Wgpu => Ok(Backend::Wgpu(WgpuBackend::new_async().await?)),
            BackendType::Cpu => Ok(Backend::Cpu(CpuBackend::new())),
        }
    }

    pub fn backend_type(&self) -> BackendType {
        match self {
            Backend::Wgpu(_) => BackendType::Wgpu,
            Backend::Cpu(_) => BackendType::Cpu,
        }
    }

    pub fn as_dyn(&self) -> &dyn ComputeBackend {
        match self {
            Backend::Wgpu(b) => b,
            Backend::Cpu(b) => b,
        }
    }

    pub fn as_dyn_mut(&mut self) -> &mut dyn ComputeBackend {
        match self {
            Backend::Wgpu(b) => b,
            Backend::Cpu(b) => b,
        }
    }

    /// Get the wgpu backend (if using wgpu)
    pub fn as_wgpu(&self) -> Option<&WgpuBackend> {
        match self {
            Backend::Wgpu(b) => Some(b),
            _ => None,
        }
    }

    /// Get the CPU backend (if using it)
    pub fn as_cpu(&self) -> Option<&CpuBackend> {
        match self {
            Backend::Cpu(b) => Some(b),
            _ => None,
        }
    }
}

/// GPU state that exists only between a successful initialize and teardown
struct BakerState {
    // Per-source vertex counts captured at initialization
    source_layout: Vec<usize>,
    buffers: PositionBufferPair,
    maps: OutputMaps,
    transfer: TransferStage,
    root: RootTransform,
}

impl BakerState {
    fn destroy<B: ComputeBackend + ?Sized>(self, backend: &mut B) {
        self.transfer.destroy(backend);
        self.maps.destroy(backend);
        self.buffers.destroy(backend);
    }
}

/// Bakes animated sources into position, velocity and normal maps.
///
/// The host drives it with [`initialize`](Self::initialize) once the sources
/// are known, [`step`](Self::step) once per frame and
/// [`teardown`](Self::teardown) when done. Without sources the baker stays
/// inert and every step is a no-op.
pub struct SkinnedMeshBaker {
    config: BakerConfig,
    optimal_mode: bool,
    sampler: MeshSampler,
    state: Option<BakerState>,
}

impl SkinnedMeshBaker {
    pub fn new(config: BakerConfig) -> Result<Self, BakerError> {
        config.validate()?;
        Ok(Self {
            optimal_mode: config.optimal_mode,
            config,
            sampler: MeshSampler::new(),
            state: None,
        })
    }

    /// Allocate every buffer and map for `sources`.
    ///
    /// The first source's world transform becomes the root transform, with
    /// current and previous equal. An empty source list, or one that holds no
    /// vertices, leaves the baker inert. Re-initializing releases the previous
    /// resources first.
    pub fn initialize<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        sources: &[&dyn SkinnedSource],
    ) -> Result<(), BakerError> {
        self.teardown(backend);

        let Some(primary) = sources.first() else {
            log::warn!("{}: no sources, baker stays inert", self.config.label);
            return Ok(());
        };

        let source_layout: Vec<usize> = sources.iter().map(|s| s.vertex_count()).collect();
        let total: usize = source_layout.iter().sum();
        if total == 0 {
            log::warn!("{}: sources hold no vertices, baker stays inert", self.config.label);
            return Ok(());
        }
        let vertex_count =
            u32::try_from(total).map_err(|_| BakerError::TooManyVertices(total))?;

        let layout = MapLayout::for_vertex_count(
            vertex_count,
            self.config.map_width,
            self.config.rows_multiple,
        );
        let state = self.allocate(backend, layout, source_layout)?;
        let root = primary.world_transform();
        self.state = Some(BakerState {
            root: RootTransform::new(root),
            ..state
        });
        let largest = sources.iter().map(|s| s.vertex_count()).max().unwrap_or(0);
        self.sampler = MeshSampler::with_capacity(largest);

        log::info!(
            "{}: baking {} vertices from {} sources into {}x{} maps ({} mode)",
            self.config.label,
            total,
            sources.len(),
            layout.width,
            layout.height,
            if self.optimal_mode { "optimal" } else { "non-optimal" }
        );
        Ok(())
    }

    fn allocate<B: ComputeBackend + ?Sized>(
        &self,
        backend: &mut B,
        layout: MapLayout,
        source_layout: Vec<usize>,
    ) -> Result<BakerState, BakerError> {
        let label = self.config.label.as_str();
        let buffers = PositionBufferPair::create(
            backend,
            layout.vertex_count as usize,
            self.optimal_mode,
            label,
        )?;

        let mut maps = match OutputMaps::create(backend, layout, label) {
            Ok(maps) => maps,
            Err(e) => {
                buffers.destroy(backend);
                return Err(e.into());
            }
        };
        if let Err(e) = maps.set_history(backend, self.optimal_mode) {
            maps.destroy(backend);
            buffers.destroy(backend);
            return Err(e.into());
        }

        let transfer = match TransferStage::create(backend, label) {
            Ok(stage) => stage,
            Err(e) => {
                maps.destroy(backend);
                buffers.destroy(backend);
                return Err(e.into());
            }
        };

        Ok(BakerState {
            source_layout,
            buffers,
            maps,
            transfer,
            root: RootTransform::default(),
        })
    }

    /// Advance one frame of `dt` seconds.
    ///
    /// Samples every source into the current buffers, runs the transfer and
    /// rotates the buffers and root transform for the next frame. `sources`
    /// must be the list given to [`initialize`](Self::initialize).
    pub fn step<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        sources: &[&dyn SkinnedSource],
        dt: f32,
    ) -> Result<(), BakerError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };

        let unchanged = sources.len() == state.source_layout.len()
            && sources
                .iter()
                .zip(&state.source_layout)
                .all(|(s, &count)| s.vertex_count() == count);
        if !unchanged {
            return Err(BakerError::SourceLayoutChanged {
                expected: state.source_layout.iter().sum(),
                actual: sources.iter().map(|s| s.vertex_count()).sum(),
            });
        }

        backend.begin_frame();

        {
            profile_scope!("bake_mesh");
            let mut offset = 0;
            for source in sources {
                match self.sampler.bake(backend, *source, offset, &state.buffers) {
                    Ok(count) => offset += count,
                    Err(e) => {
                        backend.end_frame();
                        return Err(e);
                    }
                }
            }
        }

        if let Some(primary) = sources.first() {
            state.root.set_current(primary.world_transform());
        }

        let rate = if state.buffers.history_ready() {
            let rate = frame_rate(dt);
            if rate == 0.0 {
                log::warn!(
                    "{}: degenerate frame time {}, velocity forced to zero",
                    self.config.label,
                    dt
                );
            }
            rate
        } else {
            0.0
        };

        let inputs = TransferInputs {
            transform: state.root.current,
            old_transform: state.root.previous,
            frame_rate: rate,
        };
        let result = state
            .transfer
            .transfer(backend, &state.buffers, &state.maps, &inputs);
        backend.end_frame();
        result?;

        state.buffers.rotate();
        state.root.commit();
        Ok(())
    }

    /// Switch between deriving velocity from the previous position map
    /// (`true`) and from an explicit previous-position buffer (`false`).
    ///
    /// Takes effect on the next step. Setting the current mode is a no-op.
    pub fn set_optimal_mode<B: ComputeBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        enabled: bool,
    ) -> Result<(), BakerError> {
        if let Some(state) = self.state.as_mut() {
            // Allocate before releasing so a failure leaves the old mode intact.
            let changed = if enabled {
                state.maps.set_history(backend, true)?;
                match state.buffers.set_mode(backend, true) {
                    Ok(changed) => changed,
                    Err(e) => {
                        state.maps.set_history(backend, false)?;
                        return Err(e.into());
                    }
                }
            } else {
                let changed = state.buffers.set_mode(backend, false)?;
                state.maps.set_history(backend, false)?;
                changed
            };
            if changed {
                state.transfer.invalidate(backend);
            }
        }
        self.optimal_mode = enabled;
        Ok(())
    }

    /// Release every GPU resource and the transient mesh.
    ///
    /// Safe to call repeatedly and on a baker that never initialized.
    pub fn teardown<B: ComputeBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(state) = self.state.take() {
            state.destroy(backend);
            log::info!("{}: released baking resources", self.config.label);
        }
        self.sampler.release();
    }

    pub fn config(&self) -> &BakerConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn optimal_mode(&self) -> bool {
        self.state
            .as_ref()
            .map_or(self.optimal_mode, |s| s.buffers.is_optimal())
    }

    /// Total vertices across all sources, zero while inert
    pub fn vertex_count(&self) -> usize {
        self.state
            .as_ref()
            .map_or(0, |s| s.maps.layout.vertex_count as usize)
    }

    pub fn map_layout(&self) -> Option<MapLayout> {
        self.state.as_ref().map(|s| s.maps.layout)
    }

    /// World-space positions, `Rgba32Float`
    pub fn position_map(&self) -> Option<MapTexture> {
        self.state.as_ref().map(|s| s.maps.position)
    }

    /// Per-second velocities, `Rgba16Float`
    pub fn velocity_map(&self) -> Option<MapTexture> {
        self.state.as_ref().map(|s| s.maps.velocity)
    }

    /// Unit world-space normals, `Rgba16Float`
    pub fn normal_map(&self) -> Option<MapTexture> {
        self.state.as_ref().map(|s| s.maps.normal)
    }

    pub fn root_transform(&self) -> Option<RootTransform> {
        self.state.as_ref().map(|s| s.root)
    }

    /// The buffer the next step samples into
    pub fn current_position_buffer(&self) -> Option<BufferHandle> {
        self.state.as_ref().map(|s| s.buffers.current())
    }

    /// Last frame's positions, `None` in optimal mode
    pub fn previous_position_buffer(&self) -> Option<BufferHandle> {
        self.state.as_ref().and_then(|s| s.buffers.previous())
    }
}
