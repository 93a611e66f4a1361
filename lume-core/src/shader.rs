use naga::back::spv;

use crate::{LumeError, LumeResult};

/// Parses and validates WGSL, then lowers it to SPIR-V words.
pub fn compile_wgsl(source: &str) -> LumeResult<Vec<u32>> {
    let module = naga::front::wgsl::Frontend::new()
        .parse(source)
        .map_err(|e| LumeError::ShaderCompilationFailed(format!("WGSL parse error: {}", e.emit_to_string(source))))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| LumeError::ShaderCompilationFailed(format!("Naga validation error: {:?}", e)))?;

    let write_options = spv::Options::default();
    spv::write_vec(&module, &info, &write_options, None)
        .map_err(|e| LumeError::ShaderCompilationFailed(format!("SPIR-V write error: {:?}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_minimal_compute_shader() {
        let src = "@compute @workgroup_size(64) fn main(@builtin(global_invocation_id) id: vec3<u32>) {}";
        let words = compile_wgsl(src).unwrap();
        assert_eq!(words[0], 0x0723_0203);
    }

    #[test]
    fn reports_parse_errors() {
        let err = compile_wgsl("fn main( {").unwrap_err();
        assert!(matches!(err, LumeError::ShaderCompilationFailed(_)));
    }
}
