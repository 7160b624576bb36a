use std::collections::BTreeMap;
use std::sync::Arc;

use crate::driver::{
    AttributeFormat, FragmentProgramHandle, GpuDriver, HostHeap, MemBlockKind, MemoryAttribs,
    MultisampleMode, OutputRegisterFormat, ParameterCategory, PatcherHandle, PatcherParams,
    ProgramId, Region, UsseRegion, VertexAttribute, VertexProgramHandle, VertexStream,
};
use crate::error::{GraphicsError, Result, ShaderError};
use crate::memory::{DeviceAllocator, MemoryBlock};

use super::binary::{ProgramParameter, ShaderBinary};
use super::host_heap::TrackingHostHeap;
use super::stream::{StreamCache, VertexStreamType};

/// Sizes of the three regions a patcher is built on.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct PatcherSizes {
    pub buffer: u32,
    pub vertex_usse: u32,
    pub fragment_usse: u32,
}

impl Default for PatcherSizes {
    fn default() -> Self {
        Self {
            buffer: 64 * 1024,
            vertex_usse: 64 * 1024,
            fragment_usse: 64 * 1024,
        }
    }
}

/// A binary registered with the patcher.
#[derive(Debug, Clone)]
pub struct ProgramRegistration {
    id: ProgramId,
    binary: Arc<ShaderBinary>,
}

impl ProgramRegistration {
    #[inline]
    pub fn id(&self) -> ProgramId {
        self.id
    }

    #[inline]
    pub fn binary(&self) -> &Arc<ShaderBinary> {
        &self.binary
    }

    #[inline]
    pub fn label(&self) -> &str {
        self.binary.label()
    }
}

/// Where a named vertex attribute is read from.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AttributeLayout {
    pub stream_index: u16,
    pub offset: u16,
    pub format: AttributeFormat,
    pub component_count: u8,
}

/// One attribute name paired with its layout slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct AttributeBinding<'a> {
    pub name: &'a str,
    pub layout: AttributeLayout,
}

impl<'a> AttributeBinding<'a> {
    pub fn new(name: &'a str, layout: AttributeLayout) -> Self {
        Self { name, layout }
    }
}

/// Driver shader patcher, the memory it runs on and every program it made.
///
/// Registrations must all be unregistered before the patcher is destroyed.
/// [`unregister_all`](Self::unregister_all) releases the patched programs
/// first, then the registrations.
#[derive(Debug)]
pub struct ShaderPatcher {
    handle: PatcherHandle,
    host_heap: Arc<TrackingHostHeap>,
    buffer: MemoryBlock,
    vertex_usse: MemoryBlock,
    fragment_usse: MemoryBlock,
    registrations: BTreeMap<ProgramId, Arc<ShaderBinary>>,
    vertex_programs: Vec<VertexProgramHandle>,
    fragment_programs: Vec<FragmentProgramHandle>,
    streams: StreamCache,
    output_format: OutputRegisterFormat,
    multisample_mode: MultisampleMode,
}

impl ShaderPatcher {
    /// Allocates the patcher's three regions and creates the driver object.
    ///
    /// `output_format` and `multisample_mode` are applied to every fragment
    /// program this patcher creates.
    pub fn create<D: GpuDriver + ?Sized>(
        allocator: &mut DeviceAllocator,
        driver: &mut D,
        sizes: &PatcherSizes,
        output_format: OutputRegisterFormat,
        multisample_mode: MultisampleMode,
    ) -> Result<Self> {
        let buffer = allocator.allocate(driver, MemBlockKind::UserRwUncache, sizes.buffer, 4, MemoryAttribs::RW)?;
        let vertex_usse = match allocator.allocate_vertex_usse(driver, sizes.vertex_usse) {
            Ok(block) => block,
            Err(err) => {
                allocator.release(driver, buffer.id());
                return Err(err.into());
            }
        };
        let fragment_usse = match allocator.allocate_fragment_usse(driver, sizes.fragment_usse) {
            Ok(block) => block,
            Err(err) => {
                allocator.release(driver, vertex_usse.id());
                allocator.release(driver, buffer.id());
                return Err(err.into());
            }
        };

        let host_heap = Arc::new(TrackingHostHeap::new());
        let params = PatcherParams {
            host_heap: Arc::clone(&host_heap) as Arc<dyn HostHeap>,
            buffer: Region {
                address: buffer.base(),
                size: buffer.size(),
            },
            vertex_usse: usse_region(&vertex_usse),
            fragment_usse: usse_region(&fragment_usse),
        };

        let handle = match driver.shader_patcher_create(params) {
            Ok(handle) => handle,
            Err(err) => {
                log::error!("shader patcher creation failed: {err}");
                for block in [fragment_usse, vertex_usse, buffer] {
                    allocator.release(driver, block.id());
                }
                return Err(err.into());
            }
        };
        log::debug!(
            "shader patcher created: {handle} (buffer {} bytes, vertex USSE {} bytes, fragment USSE {} bytes)",
            buffer.size(),
            vertex_usse.size(),
            fragment_usse.size()
        );

        Ok(Self {
            handle,
            host_heap,
            buffer,
            vertex_usse,
            fragment_usse,
            registrations: BTreeMap::new(),
            vertex_programs: Vec::new(),
            fragment_programs: Vec::new(),
            streams: StreamCache::new(),
            output_format,
            multisample_mode,
        })
    }

    #[inline]
    pub fn handle(&self) -> PatcherHandle {
        self.handle
    }

    /// Host heap backing the driver's bookkeeping.
    #[inline]
    pub fn host_heap(&self) -> &TrackingHostHeap {
        &self.host_heap
    }

    #[inline]
    pub fn registration_count(&self) -> usize {
        self.registrations.len()
    }

    /// Vertex and fragment programs not yet released.
    #[inline]
    pub fn program_count(&self) -> usize {
        self.vertex_programs.len() + self.fragment_programs.len()
    }

    /// Checks the binary, then registers it.
    ///
    /// Registering the same binary twice yields two registrations; avoid it.
    pub fn register_program<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        binary: Arc<ShaderBinary>,
    ) -> Result<ProgramRegistration> {
        if !binary.verify() {
            log::warn!("program '{}' failed checksum verification", binary.label());
            return Err(ShaderError::ChecksumMismatch {
                label: binary.label().to_owned(),
            }
            .into());
        }
        driver
            .program_check(&binary)
            .map_err(|source| ShaderError::ProgramCheck {
                label: binary.label().to_owned(),
                source,
            })?;

        let id = driver.shader_patcher_register_program(self.handle, Arc::clone(&binary))?;
        log::debug!("registered program '{}' ({:?}) as {id}", binary.label(), binary.stage());
        self.registrations.insert(id, Arc::clone(&binary));
        Ok(ProgramRegistration { id, binary })
    }

    /// Unregisters one program. Programs patched from it must be released first.
    pub fn unregister_program<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        registration: &ProgramRegistration,
    ) -> Result<()> {
        if !self.registrations.contains_key(&registration.id) {
            return Err(ShaderError::UnknownRegistration(registration.id).into());
        }
        driver.shader_patcher_unregister_program(self.handle, registration.id)?;
        self.registrations.remove(&registration.id);
        log::debug!("unregistered program '{}' ({})", registration.label(), registration.id);
        Ok(())
    }

    /// Selects the stream type subsequent vertex programs are created for.
    pub fn set_stream_type(&mut self, ty: VertexStreamType) -> VertexStream {
        log::debug!("vertex stream type set to {ty:?}");
        self.streams.set_current(ty)
    }

    /// Stream descriptor for `ty`, creating it on first use.
    pub fn stream(&mut self, ty: VertexStreamType) -> VertexStream {
        self.streams.get_or_create(ty)
    }

    /// Reflection lookup of a parameter by name, through the driver's copy of
    /// the registered binary.
    pub fn program_parameter<D: GpuDriver + ?Sized>(
        &self,
        driver: &D,
        registration: &ProgramRegistration,
        name: &str,
    ) -> Result<ProgramParameter> {
        let binary = driver
            .shader_patcher_program_from_id(self.handle, registration.id)
            .ok_or(ShaderError::UnknownRegistration(registration.id))?;
        match binary.find_parameter(name) {
            Some(param) => Ok(param.clone()),
            None => {
                log::warn!("program '{}' has no parameter '{name}'", binary.label());
                Err(ShaderError::AttributeNotFound {
                    program: binary.label().to_owned(),
                    name: name.to_owned(),
                }
                .into())
            }
        }
    }

    /// Creates a vertex program for the active stream type.
    ///
    /// Each binding's name is resolved to the register the compiler assigned
    /// it. Names that are missing or that are not attributes fail the call.
    pub fn create_vertex_program<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        registration: &ProgramRegistration,
        bindings: &[AttributeBinding<'_>],
    ) -> Result<VertexProgramHandle> {
        let Some((stream_type, stream)) = self.streams.current() else {
            log::warn!("vertex program '{}' requested before a stream type was set", registration.label());
            return Err(ShaderError::StreamTypeNotSet.into());
        };
        let binary = driver
            .shader_patcher_program_from_id(self.handle, registration.id)
            .ok_or(ShaderError::UnknownRegistration(registration.id))?;

        log::debug!(
            "creating vertex program from '{}' with {} attribute(s), stream {stream_type:?} (stride {}, {:?})",
            binary.label(),
            bindings.len(),
            stream.stride,
            stream.index_source
        );

        let attributes = bindings
            .iter()
            .map(|binding| resolve_attribute(&binary, binding))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let handle = driver.shader_patcher_create_vertex_program(self.handle, registration.id, &attributes, &[stream])?;
        log::debug!("vertex program created: {handle}");
        self.vertex_programs.push(handle);
        Ok(handle)
    }

    /// Creates a fragment program using the configured output format and
    /// multisample mode.
    pub fn create_fragment_program<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        registration: &ProgramRegistration,
        paired_vertex: Option<&ProgramRegistration>,
    ) -> Result<FragmentProgramHandle> {
        if !self.registrations.contains_key(&registration.id) {
            return Err(ShaderError::UnknownRegistration(registration.id).into());
        }
        log::debug!(
            "creating fragment program from '{}' (output {:?}, {:?}, paired with {})",
            registration.label(),
            self.output_format,
            self.multisample_mode,
            paired_vertex.map_or("nothing", ProgramRegistration::label)
        );

        let handle = driver.shader_patcher_create_fragment_program(
            self.handle,
            registration.id,
            self.output_format,
            self.multisample_mode,
            paired_vertex.map(ProgramRegistration::id),
        )?;
        log::debug!("fragment program created: {handle}");
        self.fragment_programs.push(handle);
        Ok(handle)
    }

    pub fn release_vertex_program<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        program: VertexProgramHandle,
    ) -> Result<()> {
        driver.shader_patcher_release_vertex_program(self.handle, program)?;
        self.vertex_programs.retain(|p| *p != program);
        log::debug!("released vertex program {program}");
        Ok(())
    }

    pub fn release_fragment_program<D: GpuDriver + ?Sized>(
        &mut self,
        driver: &mut D,
        program: FragmentProgramHandle,
    ) -> Result<()> {
        driver.shader_patcher_release_fragment_program(self.handle, program)?;
        self.fragment_programs.retain(|p| *p != program);
        log::debug!("released fragment program {program}");
        Ok(())
    }

    /// Releases every live program, then unregisters every registration.
    ///
    /// Keeps going past failures and returns the first one.
    pub fn unregister_all<D: GpuDriver + ?Sized>(&mut self, driver: &mut D) -> Result<()> {
        let mut first_err: Option<GraphicsError> = None;

        for program in std::mem::take(&mut self.fragment_programs) {
            if let Err(err) = driver.shader_patcher_release_fragment_program(self.handle, program) {
                log::warn!("releasing {program} failed: {err}");
                first_err.get_or_insert(err.into());
            }
        }
        for program in std::mem::take(&mut self.vertex_programs) {
            if let Err(err) = driver.shader_patcher_release_vertex_program(self.handle, program) {
                log::warn!("releasing {program} failed: {err}");
                first_err.get_or_insert(err.into());
            }
        }

        let count = self.registrations.len();
        for (id, binary) in std::mem::take(&mut self.registrations) {
            if let Err(err) = driver.shader_patcher_unregister_program(self.handle, id) {
                log::warn!("unregistering '{}' ({id}) failed: {err}", binary.label());
                first_err.get_or_insert(err.into());
            }
        }
        log::debug!("unregistered {count} program(s)");

        first_err.map_or(Ok(()), Err)
    }

    /// Destroys the patcher and frees its regions.
    ///
    /// Destroying with registrations still live is an invariant violation: it
    /// is reported as [`GraphicsError::InvariantViolation`] after the
    /// leftovers have been unregistered and the teardown completed anyway.
    pub fn destroy<D: GpuDriver + ?Sized>(mut self, allocator: &mut DeviceAllocator, driver: &mut D) -> Result<()> {
        let mut outcome = Ok(());

        if !self.registrations.is_empty() || self.program_count() > 0 {
            let msg = format!(
                "shader patcher {} destroyed with {} registration(s) and {} program(s) still live",
                self.handle,
                self.registrations.len(),
                self.program_count()
            );
            log::error!("{msg}");
            if let Err(err) = self.unregister_all(driver) {
                log::warn!("cleanup before patcher destroy failed: {err}");
            }
            outcome = Err(GraphicsError::InvariantViolation(msg));
        }

        if let Err(err) = driver.shader_patcher_destroy(self.handle) {
            log::warn!("destroying {} failed: {err}", self.handle);
            if outcome.is_ok() {
                outcome = Err(err.into());
            }
        }

        for block in [self.fragment_usse, self.vertex_usse, self.buffer] {
            allocator.release(driver, block.id());
        }

        let leaked = self.host_heap.live_allocations();
        if leaked > 0 {
            log::warn!("patcher host heap still holds {leaked} allocation(s)");
        }
        outcome
    }
}

fn usse_region(block: &MemoryBlock) -> UsseRegion {
    UsseRegion {
        address: block.base(),
        size: block.size(),
        offset: block.usse_offset().unwrap_or(0),
    }
}

fn resolve_attribute(binary: &ShaderBinary, binding: &AttributeBinding<'_>) -> std::result::Result<VertexAttribute, ShaderError> {
    let Some(param) = binary.find_parameter(binding.name) else {
        log::warn!("attribute '{}' not found in '{}'", binding.name, binary.label());
        return Err(ShaderError::AttributeNotFound {
            program: binary.label().to_owned(),
            name: binding.name.to_owned(),
        });
    };
    if param.category != ParameterCategory::Attribute {
        log::warn!(
            "'{}' in '{}' is a {:?}, not an attribute",
            binding.name,
            binary.label(),
            param.category
        );
        return Err(ShaderError::NotAnAttribute {
            program: binary.label().to_owned(),
            name: binding.name.to_owned(),
            category: param.category,
        });
    }

    let layout = binding.layout;
    log::debug!(
        "  attribute '{}' -> reg {} (stream {}, offset {}, {}x {:?})",
        binding.name,
        param.resource_index,
        layout.stream_index,
        layout.offset,
        layout.component_count,
        layout.format
    );
    Ok(VertexAttribute {
        stream_index: layout.stream_index,
        offset: layout.offset,
        format: layout.format,
        component_count: layout.component_count,
        reg_index: param.resource_index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{code, HeadlessDriver};
    use crate::shader::ShaderStage;
    use crate::test_support::initialized_driver;

    fn vertex_binary() -> Arc<ShaderBinary> {
        Arc::new(ShaderBinary::new(
            "color_v",
            ShaderStage::Vertex,
            b"color_v".to_vec(),
            vec![
                ProgramParameter::attribute("aPosition", 0, 3),
                ProgramParameter::attribute("aColor", 1, 4),
                ProgramParameter::uniform("wvp", 0, 16),
            ],
        ))
    }

    fn fragment_binary() -> Arc<ShaderBinary> {
        Arc::new(ShaderBinary::new("color_f", ShaderStage::Fragment, b"color_f".to_vec(), vec![]))
    }

    fn position() -> AttributeLayout {
        AttributeLayout {
            stream_index: 0,
            offset: 0,
            format: AttributeFormat::F32,
            component_count: 3,
        }
    }

    fn color() -> AttributeLayout {
        AttributeLayout {
            stream_index: 0,
            offset: 12,
            format: AttributeFormat::U8N,
            component_count: 4,
        }
    }

    fn patcher(driver: &mut HeadlessDriver, alloc: &mut DeviceAllocator) -> ShaderPatcher {
        ShaderPatcher::create(
            alloc,
            driver,
            &PatcherSizes::default(),
            OutputRegisterFormat::Uchar4,
            MultisampleMode::None,
        )
        .unwrap()
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[test]
    fn create_allocates_three_regions() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let p = patcher(&mut driver, &mut alloc);
        assert_eq!(alloc.live_count(), 3);

        p.destroy(&mut alloc, &mut driver).unwrap();
        assert_eq!(driver.live_block_count(), 0);
        driver.terminate().unwrap();
    }

    #[test]
    fn failed_create_frees_regions() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        driver.fail_next("shader_patcher_create", code::OUT_OF_MEMORY);

        let err = ShaderPatcher::create(
            &mut alloc,
            &mut driver,
            &PatcherSizes::default(),
            OutputRegisterFormat::Uchar4,
            MultisampleMode::None,
        )
        .unwrap_err();
        assert!(matches!(err, GraphicsError::Driver(e) if e.code == code::OUT_OF_MEMORY));
        assert_eq!(driver.live_block_count(), 0);
        driver.terminate().unwrap();
    }

    #[test]
    fn unregister_all_then_destroy_is_clean() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);

        let v = p.register_program(&mut driver, vertex_binary()).unwrap();
        let f = p.register_program(&mut driver, fragment_binary()).unwrap();
        p.set_stream_type(VertexStreamType::BasicIndex16);
        p.create_vertex_program(
            &mut driver,
            &v,
            &[AttributeBinding::new("aPosition", position()), AttributeBinding::new("aColor", color())],
        )
        .unwrap();
        p.create_fragment_program(&mut driver, &f, Some(&v)).unwrap();
        assert!(p.host_heap().live_allocations() > 0);

        p.unregister_all(&mut driver).unwrap();
        assert_eq!(p.registration_count(), 0);
        assert_eq!(p.program_count(), 0);
        assert_eq!(p.host_heap().live_allocations(), 0);

        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }

    #[test]
    fn destroy_with_live_registrations_is_reported() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);
        p.register_program(&mut driver, vertex_binary()).unwrap();

        let err = p.destroy(&mut alloc, &mut driver).unwrap_err();
        assert!(matches!(err, GraphicsError::InvariantViolation(_)));
        // The teardown still completed.
        assert_eq!(driver.live_block_count(), 0);
        driver.terminate().unwrap();
    }

    // ── registration ──────────────────────────────────────────────────────

    #[test]
    fn tampered_binary_is_not_registered() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);

        let good = vertex_binary();
        let bad = Arc::new(ShaderBinary::from_parts(
            good.label(),
            good.stage(),
            b"patched".to_vec(),
            good.parameters().to_vec(),
            good.checksum(),
        ));
        let err = p.register_program(&mut driver, bad).unwrap_err();
        assert!(matches!(err, GraphicsError::Shader(ShaderError::ChecksumMismatch { .. })));
        assert_eq!(p.registration_count(), 0);

        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }

    #[test]
    fn driver_program_check_failure_is_typed() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);
        driver.fail_next("program_check", code::INVALID_PROGRAM);

        let err = p.register_program(&mut driver, vertex_binary()).unwrap_err();
        assert!(matches!(err, GraphicsError::Shader(ShaderError::ProgramCheck { .. })));

        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }

    #[test]
    fn unregister_in_any_order() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);

        let a = p.register_program(&mut driver, vertex_binary()).unwrap();
        let b = p.register_program(&mut driver, fragment_binary()).unwrap();
        p.unregister_program(&mut driver, &b).unwrap();
        p.unregister_program(&mut driver, &a).unwrap();
        assert!(matches!(
            p.unregister_program(&mut driver, &a),
            Err(GraphicsError::Shader(ShaderError::UnknownRegistration(_)))
        ));

        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }

    // ── program creation ──────────────────────────────────────────────────

    #[test]
    fn vertex_program_needs_a_stream_type() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);
        let v = p.register_program(&mut driver, vertex_binary()).unwrap();

        let err = p
            .create_vertex_program(&mut driver, &v, &[AttributeBinding::new("aPosition", position())])
            .unwrap_err();
        assert_eq!(err, GraphicsError::Shader(ShaderError::StreamTypeNotSet));

        p.unregister_all(&mut driver).unwrap();
        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }

    #[test]
    fn unknown_and_non_attribute_names_fail() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);
        let v = p.register_program(&mut driver, vertex_binary()).unwrap();
        p.set_stream_type(VertexStreamType::BasicIndex16);

        let err = p
            .create_vertex_program(&mut driver, &v, &[AttributeBinding::new("aNormal", position())])
            .unwrap_err();
        assert!(matches!(err, GraphicsError::Shader(ShaderError::AttributeNotFound { ref name, .. }) if name == "aNormal"));

        let err = p
            .create_vertex_program(&mut driver, &v, &[AttributeBinding::new("wvp", position())])
            .unwrap_err();
        assert!(matches!(
            err,
            GraphicsError::Shader(ShaderError::NotAnAttribute { category: ParameterCategory::Uniform, .. })
        ));
        assert_eq!(p.program_count(), 0);

        p.unregister_all(&mut driver).unwrap();
        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }

    #[test]
    fn explicit_release_before_unregister() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);
        let v = p.register_program(&mut driver, vertex_binary()).unwrap();
        let f = p.register_program(&mut driver, fragment_binary()).unwrap();
        p.set_stream_type(VertexStreamType::BasicIndex16);

        let vp = p
            .create_vertex_program(&mut driver, &v, &[AttributeBinding::new("aPosition", position())])
            .unwrap();
        let fp = p.create_fragment_program(&mut driver, &f, Some(&v)).unwrap();

        // The driver refuses to drop a registration that still has programs.
        let err = p.unregister_program(&mut driver, &v).unwrap_err();
        assert!(matches!(err, GraphicsError::Driver(e) if e.code == code::PROGRAM_IN_USE));

        p.release_vertex_program(&mut driver, vp).unwrap();
        p.release_fragment_program(&mut driver, fp).unwrap();
        p.unregister_program(&mut driver, &v).unwrap();
        p.unregister_program(&mut driver, &f).unwrap();

        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }

    #[test]
    fn failed_release_keeps_the_program_for_teardown() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);
        let v = p.register_program(&mut driver, vertex_binary()).unwrap();
        let f = p.register_program(&mut driver, fragment_binary()).unwrap();
        p.set_stream_type(VertexStreamType::BasicIndex16);

        let vp = p
            .create_vertex_program(
                &mut driver,
                &v,
                &[AttributeBinding::new("aPosition", position()), AttributeBinding::new("aColor", color())],
            )
            .unwrap();
        let fp = p.create_fragment_program(&mut driver, &f, Some(&v)).unwrap();

        driver.fail_next("shader_patcher_release_vertex_program", code::DRIVER);
        assert!(p.release_vertex_program(&mut driver, vp).is_err());
        assert_eq!(p.program_count(), 2);

        driver.fail_next("shader_patcher_release_fragment_program", code::DRIVER);
        assert!(p.release_fragment_program(&mut driver, fp).is_err());
        assert_eq!(p.program_count(), 2);

        // Teardown still reaches both programs, so the registrations can go.
        p.unregister_all(&mut driver).unwrap();
        assert_eq!(p.program_count(), 0);
        assert_eq!(p.registration_count(), 0);
        p.destroy(&mut alloc, &mut driver).unwrap();
        assert_eq!(alloc.live_count(), 0);
        driver.terminate().unwrap();
    }

    #[test]
    fn parameter_lookup_goes_through_the_driver() {
        let mut driver = initialized_driver();
        let mut alloc = DeviceAllocator::new();
        let mut p = patcher(&mut driver, &mut alloc);
        let v = p.register_program(&mut driver, vertex_binary()).unwrap();

        let wvp = p.program_parameter(&driver, &v, "wvp").unwrap();
        assert_eq!(wvp.category, ParameterCategory::Uniform);
        assert_eq!(wvp.component_count, 16);
        assert!(p.program_parameter(&driver, &v, "uMissing").is_err());

        p.unregister_all(&mut driver).unwrap();
        p.destroy(&mut alloc, &mut driver).unwrap();
        driver.terminate().unwrap();
    }
}
