//! stackc compiler: orchestrates module compilation.
//!
//! ```text
//! .wasm bytes → decode (wasmparser) → per-function CompilationContext → CompiledModule
//! ```
//!
//! One [`CompilationContext`] is used per module so helper routines are
//! shared by every function. Failing functions either abort the module or
//! are collected, depending on [`ErrorPolicy`].

pub mod artifact;
pub mod decode;
pub mod error;
pub mod options;

use std::sync::Arc;

use stackc_codegen::{AssembledCode, Assembler, CodegenResult, CompilationContext};
use stackc_types::{ModuleTables, Signature};
use tracing::{debug, warn};

pub use artifact::{module_hash, CompiledFunction, CompiledHelper, CompiledModule};
pub use decode::{decode_module, DecodedModule, FunctionBody, MAX_FUNCTION_LOCALS};
pub use error::{CompileError, CompileErrors, CompileResult, FunctionError, MAX_ERRORS};
pub use options::{CompileOptions, ErrorPolicy};

/// Decode and compile a binary module.
pub fn compile_wasm(bytes: &[u8], options: &CompileOptions) -> CompileResult<CompiledModule> {
    let hash = module_hash(bytes);
    debug!(target: "stackc::compiler", bytes = bytes.len(), hash = %hash, "compiling module");

    let decoded = decode_module(bytes)?;
    let mut module = compile_module(Arc::new(decoded.tables), &decoded.bodies, options)?;
    module.module_hash = hash;
    Ok(module)
}

/// Compile pre-decoded function bodies against shared module tables.
pub fn compile_module(
    tables: Arc<ModuleTables>,
    bodies: &[FunctionBody],
    options: &CompileOptions,
) -> CompileResult<CompiledModule> {
    let mut ctx = CompilationContext::new(Arc::clone(&tables))
        .with_helper_routines(options.materialize_helpers);
    let mut functions = Vec::with_capacity(bodies.len());
    let mut errors = CompileErrors::with_limit(options.max_errors);

    for body in bodies {
        let signature = tables.signature(body.type_index).cloned().ok_or_else(|| {
            CompileError::Decode(format!(
                "function {} refers to unknown type {}",
                body.index, body.type_index
            ))
        })?;

        match compile_body(&mut ctx, &signature, body) {
            Ok(code) => {
                debug!(
                    target: "stackc::compiler",
                    function = body.index,
                    ops = code.ops.len(),
                    "compiled function"
                );
                functions.push(CompiledFunction {
                    index: body.index,
                    signature: Signature::clone(&signature),
                    code,
                });
            }
            Err(source) => match options.error_policy {
                ErrorPolicy::Abort => {
                    return Err(CompileError::Function {
                        index: body.index,
                        source,
                    })
                }
                ErrorPolicy::Continue => {
                    warn!(
                        target: "stackc::compiler",
                        function = body.index,
                        error = %source,
                        "skipping function"
                    );
                    errors.push_error(body.index, source);
                }
            },
        }
    }

    let helpers: Vec<CompiledHelper> = ctx.into_routines().into_iter().map(CompiledHelper::from).collect();
    debug!(
        target: "stackc::compiler",
        functions = functions.len(),
        helpers = helpers.len(),
        failed = errors.total_errors,
        "module compiled"
    );
    Ok(CompiledModule {
        module_hash: String::new(),
        functions,
        helpers,
        errors,
    })
}

fn compile_body(
    ctx: &mut CompilationContext<Assembler>,
    signature: &Arc<Signature>,
    body: &FunctionBody,
) -> CodegenResult<AssembledCode> {
    let emitter = Assembler::new(signature.params());
    ctx.compile_function(emitter, Arc::clone(signature), &body.locals, &body.instructions)?
        .finish()
}
