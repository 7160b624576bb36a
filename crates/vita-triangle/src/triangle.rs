//! Two triangles: a full-screen one drawn with the clear shaders and a
//! vertex-colored one that spins once a second at 60 fps.

use std::f32::consts::TAU;
use std::mem::{size_of, size_of_val};

use anyhow::{ensure, Context, Result};
use log::{debug, info};

use vita_gfx::color;
use vita_gfx::driver::{
    AttributeFormat, FragmentProgramHandle, GpuDriver, IndexFormat, MemBlockKind, MemoryAttribs,
    ParameterCategory, PrimitiveType, VertexProgramHandle,
};
use vita_gfx::graphics::{DISPLAY_HEIGHT, DISPLAY_WIDTH};
use vita_gfx::memory::MemoryBlock;
use vita_gfx::shader::{
    AttributeBinding, AttributeLayout, BasicVertex, ClearVertex, ProgramParameter,
    ProgramRegistration, VertexStreamType,
};
use vita_gfx::Graphics;

use crate::shaders;

const CLEAR_VERTICES: [ClearVertex; 3] = [
    ClearVertex { x: -1.0, y: -1.0 },
    ClearVertex { x: 3.0, y: -1.0 },
    ClearVertex { x: -1.0, y: 3.0 },
];

const BASIC_VERTICES: [BasicVertex; 3] = [
    BasicVertex { x: -0.5, y: -0.5, z: 0.0, color: color::RED },
    BasicVertex { x: 0.5, y: -0.5, z: 0.0, color: color::GREEN },
    BasicVertex { x: -0.5, y: 0.5, z: 0.0, color: color::BLUE },
];

const INDICES: [u16; 3] = [0, 1, 2];

struct Pipeline {
    vertex: VertexProgramHandle,
    fragment: FragmentProgramHandle,
}

/// Geometry uploaded to uncached user memory.
struct Mesh {
    vertices: MemoryBlock,
    indices: MemoryBlock,
}

impl Mesh {
    fn upload<D: GpuDriver, V: bytemuck::Pod>(gfx: &mut Graphics<D>, vertices: &[V]) -> Result<Self> {
        let vertex_block = gfx.allocate(
            MemBlockKind::UserRwUncache,
            size_of_val(vertices) as u32,
            4,
            MemoryAttribs::READ,
        )?;
        let index_block = match gfx.allocate(
            MemBlockKind::UserRwUncache,
            size_of_val(&INDICES) as u32,
            size_of::<u16>() as u32,
            MemoryAttribs::READ,
        ) {
            Ok(block) => block,
            Err(e) => {
                gfx.release(vertex_block.id());
                return Err(e.into());
            }
        };

        let mesh = Mesh { vertices: vertex_block, indices: index_block };
        let written = gfx.write(mesh.vertices.base(), vertices);
        let written = written.and_then(|()| gfx.write(mesh.indices.base(), &INDICES));
        if let Err(e) = written {
            mesh.release(gfx);
            return Err(e.into());
        }
        Ok(mesh)
    }

    fn draw<D: GpuDriver>(&self, gfx: &mut Graphics<D>) -> Result<()> {
        gfx.set_vertex_stream(0, self.vertices.base())?;
        gfx.draw(
            PrimitiveType::Triangles,
            IndexFormat::U16,
            self.indices.base(),
            INDICES.len() as u32,
        )?;
        Ok(())
    }

    fn release<D: GpuDriver>(self, gfx: &mut Graphics<D>) {
        gfx.release(self.indices.id());
        gfx.release(self.vertices.id());
    }
}

pub struct Triangle {
    registrations: Vec<ProgramRegistration>,
    clear: Pipeline,
    color: Pipeline,
    clear_mesh: Mesh,
    color_mesh: Mesh,
    wvp: ProgramParameter,
    rotation: f32,
    wvp_data: [f32; 16],
}

impl Triangle {
    /// Registers both shader pairs, builds their programs and uploads the
    /// geometry.
    ///
    /// Anything left behind on failure is reclaimed by [`Graphics::shutdown`].
    pub fn init<D: GpuDriver>(gfx: &mut Graphics<D>) -> Result<Self> {
        info!("initializing triangle");

        let clear_v = gfx.register_program(shaders::clear_vertex()).context("register clear_v")?;
        let clear_f = gfx.register_program(shaders::clear_fragment()).context("register clear_f")?;
        let color_v = gfx.register_program(shaders::color_vertex()).context("register color_v")?;
        let color_f = gfx.register_program(shaders::color_fragment()).context("register color_f")?;

        gfx.set_stream_type(VertexStreamType::ClearIndex16);
        let clear = Pipeline {
            vertex: gfx.create_vertex_program(
                &clear_v,
                &[AttributeBinding::new("aPosition", layout(0, AttributeFormat::F32, 2))],
            )?,
            fragment: gfx.create_fragment_program(&clear_f, Some(&clear_v))?,
        };

        gfx.set_stream_type(VertexStreamType::BasicIndex16);
        let color = Pipeline {
            vertex: gfx.create_vertex_program(
                &color_v,
                &[
                    AttributeBinding::new("aPosition", layout(0, AttributeFormat::F32, 3)),
                    AttributeBinding::new("aColor", layout(12, AttributeFormat::U8N, 4)),
                ],
            )?,
            fragment: gfx.create_fragment_program(&color_f, Some(&color_v))?,
        };

        let wvp = gfx.program_parameter(&color_v, "wvp")?;
        ensure!(
            wvp.category == ParameterCategory::Uniform,
            "wvp in {} is a {:?}, expected a uniform",
            color_v.label(),
            wvp.category
        );
        debug!("wvp at resource index {}", wvp.resource_index);

        let clear_mesh = Mesh::upload(gfx, &CLEAR_VERTICES).context("upload clear triangle")?;
        let color_mesh = match Mesh::upload(gfx, &BASIC_VERTICES) {
            Ok(mesh) => mesh,
            Err(e) => {
                clear_mesh.release(gfx);
                return Err(e.context("upload color triangle"));
            }
        };

        Ok(Self {
            registrations: vec![clear_v, clear_f, color_v, color_f],
            clear,
            color,
            clear_mesh,
            color_mesh,
            wvp,
            rotation: 0.0,
            wvp_data: rotation_matrix(0.0),
        })
    }

    /// Advances the rotation by one frame's worth.
    pub fn update(&mut self) {
        self.rotation += TAU / 60.0;
        if self.rotation > TAU {
            self.rotation -= TAU;
        }
        self.wvp_data = rotation_matrix(self.rotation);
    }

    pub fn draw<D: GpuDriver>(&self, gfx: &mut Graphics<D>) -> Result<()> {
        gfx.set_vertex_program(self.clear.vertex)?;
        gfx.set_fragment_program(self.clear.fragment)?;
        self.clear_mesh.draw(gfx)?;

        gfx.set_vertex_program(self.color.vertex)?;
        gfx.set_fragment_program(self.color.fragment)?;
        gfx.set_vertex_program_constants(&self.wvp, 0, &self.wvp_data)?;
        self.color_mesh.draw(gfx)
    }

    /// Releases programs, registrations and geometry.
    pub fn cleanup<D: GpuDriver>(self, gfx: &mut Graphics<D>) -> Result<()> {
        info!("cleaning up triangle");

        gfx.release_vertex_program(self.clear.vertex)?;
        gfx.release_fragment_program(self.clear.fragment)?;
        gfx.release_vertex_program(self.color.vertex)?;
        gfx.release_fragment_program(self.color.fragment)?;
        for registration in self.registrations.iter().rev() {
            gfx.unregister_program(registration)?;
        }

        self.color_mesh.release(gfx);
        self.clear_mesh.release(gfx);
        Ok(())
    }

    #[inline]
    pub fn rotation(&self) -> f32 {
        self.rotation
    }
}

fn layout(offset: u16, format: AttributeFormat, component_count: u8) -> AttributeLayout {
    AttributeLayout { stream_index: 0, offset, format, component_count }
}

/// Z-axis rotation with the x axis squeezed by the display aspect ratio.
fn rotation_matrix(angle: f32) -> [f32; 16] {
    let aspect = DISPLAY_WIDTH as f32 / DISPLAY_HEIGHT as f32;
    let (s, c) = angle.sin_cos();

    #[rustfmt::skip]
    let m = [
        c / aspect,  s,   0.0, 0.0,
        -s / aspect, c,   0.0, 0.0,
        0.0,         0.0, 1.0, 0.0,
        0.0,         0.0, 0.0, 1.0,
    ];
    m
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_at_zero_scaled_by_aspect() {
        let m = rotation_matrix(0.0);
        assert!((m[0] - 544.0 / 960.0).abs() < 1e-6);
        assert_eq!(m[1], 0.0);
        assert_eq!(m[5], 1.0);
        assert_eq!(m[10], 1.0);
        assert_eq!(m[15], 1.0);
    }

    #[test]
    fn quarter_turn() {
        let m = rotation_matrix(TAU / 4.0);
        assert!(m[0].abs() < 1e-6);
        assert!((m[1] - 1.0).abs() < 1e-6);
        assert!((m[4] + 544.0 / 960.0).abs() < 1e-6);
    }
}
