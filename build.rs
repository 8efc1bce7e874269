// Build script to compile GLSL shaders to SPIR-V
//
// Only the stages WGSL cannot express live in GLSL. Output goes to OUT_DIR
// and is embedded with `glsl_spirv!`. Without glslc an empty file is written
// instead and the samples needing it are skipped at runtime.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const GLSL_SHADERS: &[&str] = &[
    "subpass_composition.frag",
    "specialization.frag",
    "tessellation.vert",
    "tessellation.tesc",
    "pn_triangles.tese",
    "passthrough.tese",
];

fn main() {
    println!("cargo:rerun-if-changed=shaders/");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("cargo sets OUT_DIR"));

    // Compile shaders using glslc (part of Vulkan SDK)
    for name in GLSL_SHADERS {
        let input = Path::new("shaders").join(name);
        let output = out_dir.join(format!("{}.spv", name));
        println!("cargo:rerun-if-changed={}", input.display());
        compile_shader(&input, &output);
    }
}

fn compile_shader(input: &Path, output: &Path) {
    let result = Command::new("glslc")
        .arg("--target-env=vulkan1.2")
        .arg(input)
        .arg("-o")
        .arg(output)
        .status();

    match result {
        Ok(status) if status.success() => {}
        Ok(status) => {
            println!(
                "cargo:warning=Failed to compile {}: exit code {:?}",
                input.display(),
                status.code()
            );
            write_placeholder(output);
        }
        Err(e) => {
            println!(
                "cargo:warning=glslc not found ({}), {} will not be available",
                e,
                input.display()
            );
            write_placeholder(output);
        }
    }
}

fn write_placeholder(output: &Path) {
    fs::write(output, b"").expect("failed to write shader placeholder");
}
