//! Shader programs the demo registers.
//!
//! The Cg sources under `shaders/` are carried as the program code; the
//! reflection tables below mirror what the shader compiler reports for them.

use std::sync::Arc;

use vita_gfx::shader::{ProgramParameter, ShaderBinary, ShaderStage};

pub fn clear_vertex() -> Arc<ShaderBinary> {
    Arc::new(ShaderBinary::new(
        "clear_v",
        ShaderStage::Vertex,
        include_bytes!("../shaders/clear_v.cg").as_slice(),
        vec![ProgramParameter::attribute("aPosition", 0, 2)],
    ))
}

pub fn clear_fragment() -> Arc<ShaderBinary> {
    Arc::new(ShaderBinary::new(
        "clear_f",
        ShaderStage::Fragment,
        include_bytes!("../shaders/clear_f.cg").as_slice(),
        vec![ProgramParameter::uniform("uClearColor", 0, 4)],
    ))
}

pub fn color_vertex() -> Arc<ShaderBinary> {
    Arc::new(ShaderBinary::new(
        "color_v",
        ShaderStage::Vertex,
        include_bytes!("../shaders/color_v.cg").as_slice(),
        vec![
            ProgramParameter::attribute("aPosition", 0, 3),
            ProgramParameter::attribute("aColor", 1, 4),
            ProgramParameter::uniform("wvp", 0, 16),
        ],
    ))
}

pub fn color_fragment() -> Arc<ShaderBinary> {
    Arc::new(ShaderBinary::new(
        "color_f",
        ShaderStage::Fragment,
        include_bytes!("../shaders/color_f.cg").as_slice(),
        Vec::new(),
    ))
}
