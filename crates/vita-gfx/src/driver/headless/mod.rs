//! In-process implementation of the driver contract.
//!
//! Enforces the ordering rules the hardware driver enforces (scene nesting,
//! mapped-before-use, programs released before their registration) and
//! reports violations with the same status codes. Fault injection and a call
//! log make failure paths and sequencing testable.

mod display;
mod memory;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::display::DisplayQueue;
use crate::driver::{
    code, BlockId, ColorSurface, ContextHandle, ContextParams, DepthStencilSurface, DeviceAddress,
    DisplayData, DriverError, DriverResult, FragmentProgramHandle, GpuDriver, HostHeap, HostPtr,
    IndexFormat, InitializeParams, MemBlockKind, MemoryAttribs, MultisampleMode,
    OutputRegisterFormat, ParameterCategory, PatcherHandle, PatcherParams, PrimitiveType,
    ProgramId, Region, RenderTargetHandle, RenderTargetParams, SyncObjectHandle, UniformBuffer,
    UsseRegion, VertexAttribute, VertexProgramHandle, VertexStream,
};
use crate::shader::{ProgramParameter, ShaderBinary, ShaderStage};

pub use display::HeadlessDisplay;
use memory::{BlockStore, MappedAs};

/// Smallest host memory a context accepts.
const MIN_CONTEXT_HOST_MEM: usize = 2048;
/// Largest render target edge.
const MAX_TARGET_DIMENSION: u32 = 4096;
/// Host heap bytes charged per patched program.
const PROGRAM_HOST_COST: usize = 256;
/// Address range uniform reservations are handed out from.
const UNIFORM_BASE: u64 = 0xF000_0000;

/// Work counters accumulated since the driver was created.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct HeadlessStats {
    pub scenes: u64,
    pub draws: u64,
    pub heartbeats: u64,
    pub queued_flips: u64,
    pub uniform_writes: u64,
}

#[derive(Debug, Default)]
struct ContextState {
    in_scene: bool,
    vertex_program: Option<VertexProgramHandle>,
    fragment_program: Option<FragmentProgramHandle>,
    streams: BTreeMap<u32, DeviceAddress>,
}

struct Registration {
    binary: Arc<ShaderBinary>,
    host: HostPtr,
}

struct PatcherState {
    host_heap: Arc<dyn HostHeap>,
    programs: HashMap<ProgramId, Registration>,
    vertex_programs: HashMap<VertexProgramHandle, (ProgramId, HostPtr)>,
    fragment_programs: HashMap<FragmentProgramHandle, (ProgramId, HostPtr)>,
}

impl PatcherState {
    fn uses(&self, id: ProgramId) -> bool {
        self.vertex_programs.values().any(|(p, _)| *p == id)
            || self.fragment_programs.values().any(|(p, _)| *p == id)
    }

    fn is_empty(&self) -> bool {
        self.programs.is_empty() && self.vertex_programs.is_empty() && self.fragment_programs.is_empty()
    }
}

struct Fault {
    operation: &'static str,
    skip: usize,
    code: i32,
}

/// Simulated GPU driver and kernel memory service.
pub struct HeadlessDriver {
    memory: BlockStore,
    queue: Option<DisplayQueue>,
    next_handle: u32,
    contexts: HashMap<ContextHandle, ContextState>,
    render_targets: HashSet<RenderTargetHandle>,
    sync_objects: HashSet<SyncObjectHandle>,
    patchers: HashMap<PatcherHandle, PatcherState>,
    uniforms: HashMap<String, Vec<f32>>,
    stats: HeadlessStats,
    faults: RefCell<Vec<Fault>>,
    calls: RefCell<Vec<&'static str>>,
}

impl std::fmt::Debug for HeadlessDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessDriver").field("stats", &self.stats).finish_non_exhaustive()
    }
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self {
            memory: BlockStore::default(),
            queue: None,
            next_handle: 1,
            contexts: HashMap::new(),
            render_targets: HashSet::new(),
            sync_objects: HashSet::new(),
            patchers: HashMap::new(),
            uniforms: HashMap::new(),
            stats: HeadlessStats::default(),
            faults: RefCell::new(Vec::new()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Makes the next call to `operation` fail with `code`.
    ///
    /// Faults are one-shot and consumed in the order they were added.
    pub fn fail_next(&mut self, operation: &'static str, code: i32) {
        self.fail_after(operation, 0, code);
    }

    /// Lets `skip` calls to `operation` through, then fails the next one.
    pub fn fail_after(&mut self, operation: &'static str, skip: usize, code: i32) {
        self.faults.get_mut().push(Fault { operation, skip, code });
    }

    /// Entry points called so far, in order.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&mut self) {
        self.calls.get_mut().clear();
    }

    #[inline]
    pub fn stats(&self) -> HeadlessStats {
        self.stats
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.queue.is_some()
    }

    /// Kernel blocks allocated and not yet freed.
    pub fn live_block_count(&self) -> usize {
        self.memory.len()
    }

    pub fn live_block_bytes(&self) -> usize {
        self.memory.bytes()
    }

    pub fn live_object_count(&self) -> usize {
        self.contexts.len() + self.render_targets.len() + self.sync_objects.len() + self.patchers.len()
    }

    /// Copy of device memory, if the range lies inside one live block.
    pub fn read_memory(&self, address: DeviceAddress, len: usize) -> Option<Vec<u8>> {
        self.memory.read(address, len).map(<[u8]>::to_vec)
    }

    /// Last values written to the uniform called `name`.
    pub fn uniform(&self, name: &str) -> Option<&[f32]> {
        self.uniforms.get(name).map(Vec::as_slice)
    }

    /// Flips queued and not yet retired; zero before initialization.
    pub fn pending_flips(&self) -> usize {
        self.queue.as_ref().map_or(0, DisplayQueue::pending)
    }

    pub fn flip_high_water_mark(&self) -> usize {
        self.queue.as_ref().map_or(0, DisplayQueue::high_water_mark)
    }

    fn enter(&self, operation: &'static str) -> DriverResult<()> {
        self.calls.borrow_mut().push(operation);
        let mut faults = self.faults.borrow_mut();
        let Some(pos) = faults.iter().position(|f| f.operation == operation) else {
            return Ok(());
        };
        if faults[pos].skip > 0 {
            faults[pos].skip -= 1;
            return Ok(());
        }
        let code = faults.remove(pos).code;
        log::debug!("injected fault: {operation} -> {code:#010x}");
        Err(DriverError::new(operation, code))
    }

    fn next_handle(&mut self) -> u32 {
        let handle = self.next_handle;
        self.next_handle += 1;
        handle
    }

    fn require_initialized(&self, operation: &'static str) -> DriverResult<&DisplayQueue> {
        self.queue
            .as_ref()
            .ok_or(DriverError::new(operation, code::UNINITIALIZED))
    }

    fn context_mut(&mut self, operation: &'static str, context: ContextHandle) -> DriverResult<&mut ContextState> {
        self.contexts
            .get_mut(&context)
            .ok_or(DriverError::new(operation, code::INVALID_VALUE))
    }

    fn patcher_mut(&mut self, operation: &'static str, patcher: PatcherHandle) -> DriverResult<&mut PatcherState> {
        self.patchers
            .get_mut(&patcher)
            .ok_or(DriverError::new(operation, code::INVALID_VALUE))
    }

    fn check_region(&self, operation: &'static str, region: &Region) -> DriverResult<()> {
        match self.memory.find_data(region.address, u64::from(region.size)) {
            Some(_) if region.size > 0 => Ok(()),
            _ => Err(DriverError::new(operation, code::INVALID_POINTER)),
        }
    }

    fn check_usse(&self, operation: &'static str, region: &UsseRegion, as_: MappedAs) -> DriverResult<()> {
        match self.memory.find_mapped(region.address, u64::from(region.size), as_) {
            Some(_) if region.size > 0 => Ok(()),
            _ => Err(DriverError::new(operation, code::INVALID_POINTER)),
        }
    }

    fn check_color_surface(&self, operation: &'static str, color: &ColorSurface) -> DriverResult<()> {
        if color.width == 0 || color.height == 0 || color.stride_in_pixels < color.width {
            return Err(DriverError::new(operation, code::INVALID_VALUE));
        }
        let len = u64::from(color.stride_in_pixels)
            * u64::from(color.height)
            * u64::from(color.format.bytes_per_pixel());
        if self.memory.find_data(color.data, len).is_none() {
            return Err(DriverError::new(operation, code::INVALID_POINTER));
        }
        Ok(())
    }

    fn vertex_program_exists(&self, program: VertexProgramHandle) -> bool {
        self.patchers.values().any(|p| p.vertex_programs.contains_key(&program))
    }

    fn fragment_program_exists(&self, program: FragmentProgramHandle) -> bool {
        self.patchers.values().any(|p| p.fragment_programs.contains_key(&program))
    }
}

impl Drop for HeadlessDriver {
    fn drop(&mut self) {
        for (name, kind) in self.memory.names() {
            log::warn!("headless driver dropped with live block \"{name}\" ({kind})");
        }
        if self.queue.is_some() {
            log::warn!("headless driver dropped while initialized");
        }
    }
}

impl GpuDriver for HeadlessDriver {
    // ── kernel memory ────────────────────────────────────────────────────

    fn alloc_mem_block(&mut self, name: &str, kind: MemBlockKind, size: u32) -> DriverResult<BlockId> {
        self.enter("alloc_mem_block")?;
        self.memory.alloc(name, kind, size)
    }

    fn mem_block_base(&self, block: BlockId) -> DriverResult<DeviceAddress> {
        self.enter("mem_block_base")?;
        self.memory.base(block)
    }

    fn free_mem_block(&mut self, block: BlockId) -> DriverResult<()> {
        self.enter("free_mem_block")?;
        let display_busy = self.pending_flips() > 0;
        self.memory.free(block, display_busy)
    }

    // ── GPU mapping ──────────────────────────────────────────────────────

    fn map_memory(&mut self, base: DeviceAddress, size: u32, attribs: MemoryAttribs) -> DriverResult<()> {
        self.enter("map_memory")?;
        if attribs.is_empty() {
            return Err(DriverError::new("map_memory", code::INVALID_VALUE));
        }
        self.memory.map("map_memory", base, size, MappedAs::Data(attribs))
    }

    fn unmap_memory(&mut self, base: DeviceAddress) -> DriverResult<()> {
        self.enter("unmap_memory")?;
        self.memory
            .unmap("unmap_memory", base, |m| matches!(m, MappedAs::Data(_)))
    }

    fn map_vertex_usse_memory(&mut self, base: DeviceAddress, size: u32) -> DriverResult<u32> {
        self.enter("map_vertex_usse_memory")?;
        self.memory
            .map_usse("map_vertex_usse_memory", base, size, MappedAs::VertexUsse)
    }

    fn unmap_vertex_usse_memory(&mut self, base: DeviceAddress) -> DriverResult<()> {
        self.enter("unmap_vertex_usse_memory")?;
        self.memory
            .unmap("unmap_vertex_usse_memory", base, |m| m == MappedAs::VertexUsse)
    }

    fn map_fragment_usse_memory(&mut self, base: DeviceAddress, size: u32) -> DriverResult<u32> {
        self.enter("map_fragment_usse_memory")?;
        self.memory
            .map_usse("map_fragment_usse_memory", base, size, MappedAs::FragmentUsse)
    }

    fn unmap_fragment_usse_memory(&mut self, base: DeviceAddress) -> DriverResult<()> {
        self.enter("unmap_fragment_usse_memory")?;
        self.memory
            .unmap("unmap_fragment_usse_memory", base, |m| m == MappedAs::FragmentUsse)
    }

    fn write_memory(&mut self, address: DeviceAddress, bytes: &[u8]) -> DriverResult<()> {
        self.enter("write_memory")?;
        self.memory.write(address, bytes)
    }

    fn fill_memory(&mut self, address: DeviceAddress, len: u32, word: u32) -> DriverResult<()> {
        self.enter("fill_memory")?;
        self.memory.fill(address, len, word)
    }

    // ── lifecycle ────────────────────────────────────────────────────────

    fn initialize(&mut self, params: InitializeParams) -> DriverResult<()> {
        self.enter("initialize")?;
        if self.queue.is_some() {
            return Err(DriverError::new("initialize", code::ALREADY_INITIALIZED));
        }
        if params.parameter_buffer_size == 0 || params.parameter_buffer_size % 4096 != 0 {
            return Err(DriverError::new("initialize", code::INVALID_VALUE));
        }

        let queue = DisplayQueue::new(
            params.display_queue_max_pending_count as usize,
            params.display_queue_callback,
        )
        .map_err(|err| {
            log::error!("spawning display queue thread failed: {err}");
            DriverError::new("initialize", code::DRIVER)
        })?;
        self.queue = Some(queue);
        Ok(())
    }

    fn terminate(&mut self) -> DriverResult<()> {
        self.enter("terminate")?;
        self.require_initialized("terminate")?;
        if self.live_object_count() > 0 {
            log::warn!(
                "terminate with live objects: {} contexts, {} render targets, {} sync objects, {} patchers",
                self.contexts.len(),
                self.render_targets.len(),
                self.sync_objects.len(),
                self.patchers.len()
            );
            return Err(DriverError::new("terminate", code::DRIVER));
        }
        // Dropping the queue drains any flips still outstanding.
        self.queue = None;
        Ok(())
    }

    fn create_context(&mut self, params: &ContextParams) -> DriverResult<ContextHandle> {
        const OP: &str = "create_context";
        self.enter(OP)?;
        self.require_initialized(OP)?;
        if params.host_mem_size < MIN_CONTEXT_HOST_MEM {
            return Err(DriverError::new(OP, code::INVALID_VALUE));
        }
        self.check_region(OP, &params.vdm_ring_buffer)?;
        self.check_region(OP, &params.vertex_ring_buffer)?;
        self.check_region(OP, &params.fragment_ring_buffer)?;
        self.check_usse(OP, &params.fragment_usse_ring_buffer, MappedAs::FragmentUsse)?;
        if let Some(vertex_usse) = &params.vertex_usse_ring_buffer {
            self.check_usse(OP, vertex_usse, MappedAs::VertexUsse)?;
        }

        let handle = ContextHandle(self.next_handle());
        self.contexts.insert(handle, ContextState::default());
        Ok(handle)
    }

    fn destroy_context(&mut self, context: ContextHandle) -> DriverResult<()> {
        self.enter("destroy_context")?;
        let state = self.context_mut("destroy_context", context)?;
        if state.in_scene {
            return Err(DriverError::new("destroy_context", code::WITHIN_SCENE));
        }
        self.contexts.remove(&context);
        Ok(())
    }

    fn create_render_target(&mut self, params: &RenderTargetParams) -> DriverResult<RenderTargetHandle> {
        self.enter("create_render_target")?;
        let valid_dim = |d: u32| d > 0 && d <= MAX_TARGET_DIMENSION;
        if !valid_dim(params.width) || !valid_dim(params.height) || params.scenes_per_frame == 0 {
            return Err(DriverError::new("create_render_target", code::INVALID_VALUE));
        }
        let handle = RenderTargetHandle(self.next_handle());
        self.render_targets.insert(handle);
        Ok(handle)
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) -> DriverResult<()> {
        self.enter("destroy_render_target")?;
        if !self.render_targets.remove(&target) {
            return Err(DriverError::new("destroy_render_target", code::INVALID_VALUE));
        }
        Ok(())
    }

    fn color_surface_init(&mut self, surface: &ColorSurface) -> DriverResult<()> {
        self.enter("color_surface_init")?;
        self.check_color_surface("color_surface_init", surface)
    }

    fn depth_stencil_surface_init(&mut self, surface: &DepthStencilSurface) -> DriverResult<()> {
        const OP: &str = "depth_stencil_surface_init";
        self.enter(OP)?;
        for data in std::iter::once(surface.depth_data).chain(surface.stencil_data) {
            if data.0 % 16 != 0 {
                return Err(DriverError::new(OP, code::INVALID_ALIGNMENT));
            }
            if self.memory.find_data(data, 4).is_none() {
                return Err(DriverError::new(OP, code::INVALID_POINTER));
            }
        }
        Ok(())
    }

    fn sync_object_create(&mut self) -> DriverResult<SyncObjectHandle> {
        self.enter("sync_object_create")?;
        let handle = SyncObjectHandle(self.next_handle());
        self.sync_objects.insert(handle);
        Ok(handle)
    }

    fn sync_object_destroy(&mut self, sync: SyncObjectHandle) -> DriverResult<()> {
        self.enter("sync_object_destroy")?;
        if !self.sync_objects.remove(&sync) {
            return Err(DriverError::new("sync_object_destroy", code::INVALID_VALUE));
        }
        Ok(())
    }

    // ── scenes & presentation ────────────────────────────────────────────

    fn begin_scene(
        &mut self,
        context: ContextHandle,
        target: RenderTargetHandle,
        fragment_sync: SyncObjectHandle,
        color: &ColorSurface,
        depth: &DepthStencilSurface,
    ) -> DriverResult<()> {
        const OP: &str = "begin_scene";
        self.enter(OP)?;
        if !self.render_targets.contains(&target) || !self.sync_objects.contains(&fragment_sync) {
            return Err(DriverError::new(OP, code::INVALID_VALUE));
        }
        self.check_color_surface(OP, color)?;
        if self.memory.find_data(depth.depth_data, 4).is_none() {
            return Err(DriverError::new(OP, code::INVALID_POINTER));
        }

        let state = self.context_mut(OP, context)?;
        if state.in_scene {
            return Err(DriverError::new(OP, code::WITHIN_SCENE));
        }
        state.in_scene = true;
        Ok(())
    }

    fn end_scene(&mut self, context: ContextHandle) -> DriverResult<()> {
        self.enter("end_scene")?;
        let state = self.context_mut("end_scene", context)?;
        if !state.in_scene {
            return Err(DriverError::new("end_scene", code::NOT_WITHIN_SCENE));
        }
        state.in_scene = false;
        self.stats.scenes += 1;
        Ok(())
    }

    fn pad_heartbeat(&mut self, color: &ColorSurface, sync: SyncObjectHandle) -> DriverResult<()> {
        self.enter("pad_heartbeat")?;
        if !self.sync_objects.contains(&sync) {
            return Err(DriverError::new("pad_heartbeat", code::INVALID_VALUE));
        }
        self.check_color_surface("pad_heartbeat", color)?;
        self.stats.heartbeats += 1;
        Ok(())
    }

    fn display_queue_add_entry(
        &mut self,
        old_sync: SyncObjectHandle,
        new_sync: SyncObjectHandle,
        data: DisplayData,
    ) -> DriverResult<()> {
        const OP: &str = "display_queue_add_entry";
        self.enter(OP)?;
        if !self.sync_objects.contains(&old_sync) || !self.sync_objects.contains(&new_sync) {
            return Err(DriverError::new(OP, code::INVALID_VALUE));
        }
        self.require_initialized(OP)?
            .add_entry(old_sync, new_sync, data)
            .map_err(|_| DriverError::new(OP, code::DRIVER))?;
        self.stats.queued_flips += 1;
        Ok(())
    }

    fn display_queue_finish(&mut self) -> DriverResult<()> {
        self.enter("display_queue_finish")?;
        self.require_initialized("display_queue_finish")?.finish();
        Ok(())
    }

    fn finish(&mut self, context: ContextHandle) -> DriverResult<()> {
        self.enter("finish")?;
        self.context_mut("finish", context)?;
        Ok(())
    }

    // ── shader patcher ───────────────────────────────────────────────────

    fn program_check(&self, binary: &ShaderBinary) -> DriverResult<()> {
        self.enter("program_check")?;
        if !binary.verify() {
            return Err(DriverError::new("program_check", code::INVALID_PROGRAM));
        }
        Ok(())
    }

    fn shader_patcher_create(&mut self, params: PatcherParams) -> DriverResult<PatcherHandle> {
        const OP: &str = "shader_patcher_create";
        self.enter(OP)?;
        self.require_initialized(OP)?;
        self.check_region(OP, &params.buffer)?;
        self.check_usse(OP, &params.vertex_usse, MappedAs::VertexUsse)?;
        self.check_usse(OP, &params.fragment_usse, MappedAs::FragmentUsse)?;

        let handle = PatcherHandle(self.next_handle());
        self.patchers.insert(
            handle,
            PatcherState {
                host_heap: params.host_heap,
                programs: HashMap::new(),
                vertex_programs: HashMap::new(),
                fragment_programs: HashMap::new(),
            },
        );
        Ok(handle)
    }

    fn shader_patcher_destroy(&mut self, patcher: PatcherHandle) -> DriverResult<()> {
        self.enter("shader_patcher_destroy")?;
        let state = self.patcher_mut("shader_patcher_destroy", patcher)?;
        if !state.is_empty() {
            return Err(DriverError::new("shader_patcher_destroy", code::PROGRAM_IN_USE));
        }
        self.patchers.remove(&patcher);
        Ok(())
    }

    fn shader_patcher_register_program(
        &mut self,
        patcher: PatcherHandle,
        binary: Arc<ShaderBinary>,
    ) -> DriverResult<ProgramId> {
        const OP: &str = "shader_patcher_register_program";
        self.enter(OP)?;
        if !binary.verify() {
            return Err(DriverError::new(OP, code::INVALID_PROGRAM));
        }
        let id = ProgramId(self.next_handle());
        let state = self.patcher_mut(OP, patcher)?;
        let host = state
            .host_heap
            .allocate(binary.code().len().max(1))
            .ok_or(DriverError::new(OP, code::OUT_OF_MEMORY))?;
        state.programs.insert(id, Registration { binary, host });
        Ok(id)
    }

    fn shader_patcher_unregister_program(&mut self, patcher: PatcherHandle, id: ProgramId) -> DriverResult<()> {
        const OP: &str = "shader_patcher_unregister_program";
        self.enter(OP)?;
        let state = self.patcher_mut(OP, patcher)?;
        if state.uses(id) {
            return Err(DriverError::new(OP, code::PROGRAM_IN_USE));
        }
        let registration = state
            .programs
            .remove(&id)
            .ok_or(DriverError::new(OP, code::INVALID_VALUE))?;
        state.host_heap.free(registration.host);
        Ok(())
    }

    fn shader_patcher_program_from_id(&self, patcher: PatcherHandle, id: ProgramId) -> Option<Arc<ShaderBinary>> {
        self.enter("shader_patcher_program_from_id").ok()?;
        let state = self.patchers.get(&patcher)?;
        state.programs.get(&id).map(|r| Arc::clone(&r.binary))
    }

    fn shader_patcher_create_vertex_program(
        &mut self,
        patcher: PatcherHandle,
        id: ProgramId,
        attributes: &[VertexAttribute],
        streams: &[VertexStream],
    ) -> DriverResult<VertexProgramHandle> {
        const OP: &str = "shader_patcher_create_vertex_program";
        self.enter(OP)?;
        let handle = VertexProgramHandle(self.next_handle());
        let state = self.patcher_mut(OP, patcher)?;
        let binary = &state
            .programs
            .get(&id)
            .ok_or(DriverError::new(OP, code::INVALID_VALUE))?
            .binary;
        if binary.stage() != ShaderStage::Vertex {
            return Err(DriverError::new(OP, code::INVALID_PROGRAM));
        }
        if streams.is_empty() {
            return Err(DriverError::new(OP, code::INVALID_VALUE));
        }
        for attr in attributes {
            let bound = binary.parameters().iter().any(|p| {
                p.category == ParameterCategory::Attribute && p.resource_index == attr.reg_index
            });
            if !bound || usize::from(attr.stream_index) >= streams.len() {
                return Err(DriverError::new(OP, code::INVALID_VALUE));
            }
        }

        let host = state
            .host_heap
            .allocate(PROGRAM_HOST_COST)
            .ok_or(DriverError::new(OP, code::OUT_OF_MEMORY))?;
        state.vertex_programs.insert(handle, (id, host));
        Ok(handle)
    }

    fn shader_patcher_create_fragment_program(
        &mut self,
        patcher: PatcherHandle,
        id: ProgramId,
        _output_format: OutputRegisterFormat,
        _multisample_mode: MultisampleMode,
        vertex_program: Option<ProgramId>,
    ) -> DriverResult<FragmentProgramHandle> {
        const OP: &str = "shader_patcher_create_fragment_program";
        self.enter(OP)?;
        let handle = FragmentProgramHandle(self.next_handle());
        let state = self.patcher_mut(OP, patcher)?;
        let registration = state
            .programs
            .get(&id)
            .ok_or(DriverError::new(OP, code::INVALID_VALUE))?;
        if registration.binary.stage() != ShaderStage::Fragment {
            return Err(DriverError::new(OP, code::INVALID_PROGRAM));
        }
        if let Some(vertex) = vertex_program {
            if !state.programs.contains_key(&vertex) {
                return Err(DriverError::new(OP, code::INVALID_VALUE));
            }
        }

        let host = state
            .host_heap
            .allocate(PROGRAM_HOST_COST)
            .ok_or(DriverError::new(OP, code::OUT_OF_MEMORY))?;
        state.fragment_programs.insert(handle, (id, host));
        Ok(handle)
    }

    fn shader_patcher_release_vertex_program(
        &mut self,
        patcher: PatcherHandle,
        program: VertexProgramHandle,
    ) -> DriverResult<()> {
        const OP: &str = "shader_patcher_release_vertex_program";
        self.enter(OP)?;
        let state = self.patcher_mut(OP, patcher)?;
        let (_, host) = state
            .vertex_programs
            .remove(&program)
            .ok_or(DriverError::new(OP, code::INVALID_VALUE))?;
        state.host_heap.free(host);
        Ok(())
    }

    fn shader_patcher_release_fragment_program(
        &mut self,
        patcher: PatcherHandle,
        program: FragmentProgramHandle,
    ) -> DriverResult<()> {
        const OP: &str = "shader_patcher_release_fragment_program";
        self.enter(OP)?;
        let state = self.patcher_mut(OP, patcher)?;
        let (_, host) = state
            .fragment_programs
            .remove(&program)
            .ok_or(DriverError::new(OP, code::INVALID_VALUE))?;
        state.host_heap.free(host);
        Ok(())
    }

    // ── draw state ───────────────────────────────────────────────────────

    fn set_vertex_program(&mut self, context: ContextHandle, program: VertexProgramHandle) -> DriverResult<()> {
        self.enter("set_vertex_program")?;
        if !self.vertex_program_exists(program) {
            return Err(DriverError::new("set_vertex_program", code::INVALID_PROGRAM));
        }
        self.context_mut("set_vertex_program", context)?.vertex_program = Some(program);
        Ok(())
    }

    fn set_fragment_program(&mut self, context: ContextHandle, program: FragmentProgramHandle) -> DriverResult<()> {
        self.enter("set_fragment_program")?;
        if !self.fragment_program_exists(program) {
            return Err(DriverError::new("set_fragment_program", code::INVALID_PROGRAM));
        }
        self.context_mut("set_fragment_program", context)?.fragment_program = Some(program);
        Ok(())
    }

    fn set_vertex_stream(&mut self, context: ContextHandle, stream_index: u32, data: DeviceAddress) -> DriverResult<()> {
        self.enter("set_vertex_stream")?;
        if self.memory.find_data(data, 1).is_none() {
            return Err(DriverError::new("set_vertex_stream", code::INVALID_POINTER));
        }
        self.context_mut("set_vertex_stream", context)?
            .streams
            .insert(stream_index, data);
        Ok(())
    }

    fn reserve_vertex_default_uniform_buffer(&mut self, context: ContextHandle) -> DriverResult<UniformBuffer> {
        const OP: &str = "reserve_vertex_default_uniform_buffer";
        self.enter(OP)?;
        let state = self.context_mut(OP, context)?;
        if !state.in_scene {
            return Err(DriverError::new(OP, code::NOT_WITHIN_SCENE));
        }
        let program = state
            .vertex_program
            .ok_or(DriverError::new(OP, code::NULL_PROGRAM))?;
        Ok(UniformBuffer(DeviceAddress(UNIFORM_BASE + u64::from(program.0) * 0x100)))
    }

    fn set_uniform_data_f(
        &mut self,
        buffer: UniformBuffer,
        parameter: &ProgramParameter,
        component_offset: u32,
        values: &[f32],
    ) -> DriverResult<()> {
        const OP: &str = "set_uniform_data_f";
        self.enter(OP)?;
        if buffer.0.is_null() {
            return Err(DriverError::new(OP, code::INVALID_POINTER));
        }
        let end = component_offset as usize + values.len();
        if parameter.category != ParameterCategory::Uniform || end > parameter.component_count as usize {
            return Err(DriverError::new(OP, code::INVALID_VALUE));
        }

        let slot = self
            .uniforms
            .entry(parameter.name.clone())
            .or_insert_with(|| vec![0.0; parameter.component_count as usize]);
        slot.resize(parameter.component_count as usize, 0.0);
        slot[component_offset as usize..end].copy_from_slice(values);
        self.stats.uniform_writes += 1;
        Ok(())
    }

    fn draw(
        &mut self,
        context: ContextHandle,
        primitive: PrimitiveType,
        index_format: IndexFormat,
        index_data: DeviceAddress,
        index_count: u32,
    ) -> DriverResult<()> {
        const OP: &str = "draw";
        self.enter(OP)?;
        if index_count == 0 {
            return Err(DriverError::new(OP, code::INVALID_VALUE));
        }
        let len = u64::from(index_count) * u64::from(index_format.size());
        if self.memory.find_data(index_data, len).is_none() {
            return Err(DriverError::new(OP, code::INVALID_POINTER));
        }

        let state = self.context_mut(OP, context)?;
        if !state.in_scene {
            return Err(DriverError::new(OP, code::NOT_WITHIN_SCENE));
        }
        if state.vertex_program.is_none() || state.fragment_program.is_none() {
            return Err(DriverError::new(OP, code::NULL_PROGRAM));
        }
        if state.streams.is_empty() {
            return Err(DriverError::new(OP, code::INVALID_VALUE));
        }
        log::trace!("draw {primitive:?}: {index_count} {index_format:?} indices");
        self.stats.draws += 1;
        Ok(())
    }
}
