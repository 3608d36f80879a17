use std::{env, fs, path::PathBuf};

// (file, kind) for every stage embedded in the crate.
const STAGES: [(&str, shaderc::ShaderKind); 4] = [
    ("phong.vert", shaderc::ShaderKind::Vertex),
    ("phong.frag", shaderc::ShaderKind::Fragment),
    ("unlit.vert", shaderc::ShaderKind::Vertex),
    ("unlit.frag", shaderc::ShaderKind::Fragment),
];

fn main() {
    let out = PathBuf::from(env::var("OUT_DIR").unwrap());
    let dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap()).join("shaders");

    let comp = shaderc::Compiler::new().unwrap();
    let mut opts = shaderc::CompileOptions::new().unwrap();
    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_0 as u32,
    );
    opts.set_optimization_level(shaderc::OptimizationLevel::Performance);

    // Shared declarations (uniform blocks, push constants) live in common.glsl.
    let include_dir = dir.clone();
    opts.set_include_callback(move |name, _ty, _from, _depth| {
        let path = include_dir.join(name);
        let content = fs::read_to_string(&path).map_err(|e| format!("{}: {e}", path.display()))?;
        Ok(shaderc::ResolvedInclude {
            resolved_name: path.display().to_string(),
            content,
        })
    });
    println!("cargo:rerun-if-changed={}", dir.join("common.glsl").display());

    for (file, kind) in STAGES {
        let path = dir.join(file);
        println!("cargo:rerun-if-changed={}", path.display());
        let src = fs::read_to_string(&path).unwrap();
        let spv = comp
            .compile_into_spirv(&src, kind, file, "main", Some(&opts))
            .unwrap();
        fs::write(out.join(format!("{file}.spv")), spv.as_binary_u8()).unwrap();
    }

    println!("cargo:rerun-if-changed=build.rs");
}
