//! Format and mode enumerations passed through to the driver.

/// Color surface format. Must match the display pixel format.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ColorFormat {
    A8B8G8R8,
}

impl ColorFormat {
    #[inline]
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            ColorFormat::A8B8G8R8 => 4,
        }
    }
}

/// Pixel format understood by the OS display service.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PixelFormat {
    A8B8G8R8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ColorSurfaceType {
    Linear,
    Tiled,
    Swizzled,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ColorSurfaceScale {
    None,
    MsaaDownscale,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OutputRegisterSize {
    Bits32,
    Bits64,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum OutputRegisterFormat {
    Uchar4,
    Half4,
    Float,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DepthStencilFormat {
    S8D24,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DepthStencilSurfaceType {
    Linear,
    Tiled,
}

/// Anti-aliasing mode shared by the render target, the surfaces and
/// fragment program creation.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum MultisampleMode {
    #[default]
    None,
    X2,
    X4,
}

impl MultisampleMode {
    /// Multipliers applied to the depth buffer as `(samples, stride)`.
    ///
    /// 4x doubles both row length and row count; 2x doubles only the row count.
    #[inline]
    pub const fn depth_factors(self) -> (u32, u32) {
        match self {
            MultisampleMode::None => (1, 1),
            MultisampleMode::X2 => (2, 1),
            MultisampleMode::X4 => (4, 2),
        }
    }

    #[inline]
    pub const fn color_scale(self) -> ColorSurfaceScale {
        match self {
            MultisampleMode::None => ColorSurfaceScale::None,
            _ => ColorSurfaceScale::MsaaDownscale,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum PrimitiveType {
    Triangles,
    TriangleStrip,
    TriangleFan,
    Lines,
    Points,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IndexFormat {
    U16,
    U32,
}

impl IndexFormat {
    #[inline]
    pub const fn size(self) -> u32 {
        match self {
            IndexFormat::U16 => 2,
            IndexFormat::U32 => 4,
        }
    }
}

/// How a vertex stream is indexed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IndexSource {
    Index16,
    Index32,
    Instance16,
    Instance32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AttributeFormat {
    F32,
    F16,
    U8,
    U8N,
    S16N,
}

impl AttributeFormat {
    #[inline]
    pub const fn component_size(self) -> u32 {
        match self {
            AttributeFormat::F32 => 4,
            AttributeFormat::F16 | AttributeFormat::S16N => 2,
            AttributeFormat::U8 | AttributeFormat::U8N => 1,
        }
    }
}

/// Reflection category of a program parameter.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ParameterCategory {
    Attribute,
    Uniform,
    Sampler,
    UniformBuffer,
}

/// When a frame buffer change takes effect on the display.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SetBufMode {
    Immediate,
    NextFrame,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_factors_per_mode() {
        assert_eq!(MultisampleMode::None.depth_factors(), (1, 1));
        assert_eq!(MultisampleMode::X2.depth_factors(), (2, 1));
        assert_eq!(MultisampleMode::X4.depth_factors(), (4, 2));
    }

    #[test]
    fn msaa_selects_downscale() {
        assert_eq!(MultisampleMode::None.color_scale(), ColorSurfaceScale::None);
        assert_eq!(MultisampleMode::X4.color_scale(), ColorSurfaceScale::MsaaDownscale);
    }
}
