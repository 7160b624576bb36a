use std::fmt;

use crate::driver::ParameterCategory;

/// Pipeline stage a compiled program targets.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Reflection entry for one program parameter.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProgramParameter {
    pub name: String,
    pub category: ParameterCategory,
    /// Register or buffer slot assigned by the shader compiler.
    pub resource_index: u16,
    pub component_count: u32,
}

impl ProgramParameter {
    pub fn attribute(name: impl Into<String>, resource_index: u16, component_count: u32) -> Self {
        Self {
            name: name.into(),
            category: ParameterCategory::Attribute,
            resource_index,
            component_count,
        }
    }

    pub fn uniform(name: impl Into<String>, resource_index: u16, component_count: u32) -> Self {
        Self {
            name: name.into(),
            category: ParameterCategory::Uniform,
            resource_index,
            component_count,
        }
    }
}

/// Compiled shader program together with its reflection table.
///
/// The checksum covers the microcode and the reflection table. It is computed
/// when the binary is produced and verified before the binary is registered.
#[derive(Clone, Eq, PartialEq)]
pub struct ShaderBinary {
    label: String,
    stage: ShaderStage,
    code: Vec<u8>,
    parameters: Vec<ProgramParameter>,
    checksum: [u8; 32],
}

impl ShaderBinary {
    /// Builds a binary and seals it with a fresh checksum.
    pub fn new(
        label: impl Into<String>,
        stage: ShaderStage,
        code: impl Into<Vec<u8>>,
        parameters: Vec<ProgramParameter>,
    ) -> Self {
        let label = label.into();
        let code = code.into();
        let checksum = structural_checksum(stage, &code, &parameters);
        Self { label, stage, code, parameters, checksum }
    }

    /// Reassembles a binary whose checksum was stored alongside it.
    pub fn from_parts(
        label: impl Into<String>,
        stage: ShaderStage,
        code: impl Into<Vec<u8>>,
        parameters: Vec<ProgramParameter>,
        checksum: [u8; 32],
    ) -> Self {
        Self {
            label: label.into(),
            stage,
            code: code.into(),
            parameters,
            checksum,
        }
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    #[inline]
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    #[inline]
    pub fn parameters(&self) -> &[ProgramParameter] {
        &self.parameters
    }

    #[inline]
    pub fn checksum(&self) -> [u8; 32] {
        self.checksum
    }

    /// Returns `true` if the stored checksum matches the binary's contents.
    pub fn verify(&self) -> bool {
        structural_checksum(self.stage, &self.code, &self.parameters) == self.checksum
    }

    pub fn find_parameter(&self, name: &str) -> Option<&ProgramParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }
}

impl fmt::Debug for ShaderBinary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderBinary")
            .field("label", &self.label)
            .field("stage", &self.stage)
            .field("code_len", &self.code.len())
            .field("parameters", &self.parameters)
            .finish()
    }
}

fn structural_checksum(stage: ShaderStage, code: &[u8], parameters: &[ProgramParameter]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&[stage as u8]);
    hasher.update(&(code.len() as u64).to_le_bytes());
    hasher.update(code);
    for p in parameters {
        hasher.update(p.name.as_bytes());
        hasher.update(&[0, p.category as u8]);
        hasher.update(&p.resource_index.to_le_bytes());
        hasher.update(&p.component_count.to_le_bytes());
    }
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ShaderBinary {
        ShaderBinary::new(
            "color_v",
            ShaderStage::Vertex,
            b"void main() {}".to_vec(),
            vec![
                ProgramParameter::attribute("aPosition", 0, 3),
                ProgramParameter::uniform("wvp", 0, 16),
            ],
        )
    }

    #[test]
    fn fresh_binary_verifies() {
        assert!(sample().verify());
    }

    #[test]
    fn tampered_code_fails_verification() {
        let b = sample();
        let tampered = ShaderBinary::from_parts(
            b.label(),
            b.stage(),
            b"void main() { discard; }".to_vec(),
            b.parameters().to_vec(),
            b.checksum(),
        );
        assert!(!tampered.verify());
    }

    #[test]
    fn tampered_reflection_fails_verification() {
        let b = sample();
        let mut params = b.parameters().to_vec();
        params[0].resource_index = 4;
        let tampered = ShaderBinary::from_parts(b.label(), b.stage(), b.code().to_vec(), params, b.checksum());
        assert!(!tampered.verify());
    }

    #[test]
    fn find_parameter_by_name() {
        let b = sample();
        assert_eq!(b.find_parameter("wvp").map(|p| p.component_count), Some(16));
        assert!(b.find_parameter("aColor").is_none());
    }
}
