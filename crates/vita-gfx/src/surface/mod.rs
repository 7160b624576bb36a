//! Render target and the surfaces scenes draw into.
//!
//! The render target is scheduling geometry only. Color storage belongs to
//! the display chain; the single depth/stencil surface is shared by every
//! scene.

mod depth;
mod render_target;

pub use depth::{DepthStencilBuffer, DepthStencilLayout};
pub use render_target::RenderTarget;

/// Tile dimensions the depth/stencil surface is rounded to.
pub const TILE_SIZE_X: u32 = 32;
pub const TILE_SIZE_Y: u32 = 32;

/// Minimum alignment of color surface data.
pub const COLOR_SURFACE_ALIGNMENT: u32 = 4;
/// Minimum alignment of depth/stencil surface data.
pub const DEPTHSTENCIL_SURFACE_ALIGNMENT: u32 = 16;
