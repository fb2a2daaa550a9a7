//! Binary front end.
//!
//! Decodes a `.wasm` module with `wasmparser` into [`ModuleTables`] and one
//! [`FunctionBody`] per defined function. Only the MVP numeric instruction
//! set is accepted; anything else is reported as [`CompileError::Unsupported`].

use stackc_codegen::{
    BinaryOp, CompareOp, ConvertOp, Instruction, LoadOp, MemArg, StoreOp, UnaryOp,
};
use stackc_types::{
    BlockType, CallTarget, MemoryDescriptor, ModuleTables, Signature, TableDescriptor, ValueKind,
};
use wasmparser::{Operator, Parser, Payload, TypeRef, ValType};

use crate::error::{CompileError, CompileResult};

/// Upper bound on parameters plus declared locals of one function.
pub const MAX_FUNCTION_LOCALS: u32 = 50_000;

/// A decoded function body, ready for the code generator.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionBody {
    /// Module-wide function index (imports first).
    pub index: u32,
    pub type_index: u32,
    /// Declared body locals, expanded (parameters excluded).
    pub locals: Vec<ValueKind>,
    /// Instructions including the final `end`.
    pub instructions: Vec<Instruction>,
}

/// Everything the driver needs from a binary module.
#[derive(Debug, Clone, Default)]
pub struct DecodedModule {
    pub tables: ModuleTables,
    pub bodies: Vec<FunctionBody>,
}

/// Decode a binary module.
pub fn decode_module(bytes: &[u8]) -> CompileResult<DecodedModule> {
    let mut tables = ModuleTables::new();
    let mut imported_functions = 0u32;
    let mut defined_types: Vec<u32> = Vec::new();
    let mut bodies = Vec::new();

    for payload in Parser::new(0).parse_all(bytes) {
        match payload? {
            Payload::TypeSection(reader) => {
                for func_type in reader.into_iter_err_on_gc_types() {
                    let func_type = func_type?;
                    let params = value_kinds(func_type.params())?;
                    let results = value_kinds(func_type.results())?;
                    tables.add_type(Signature::new(params, results));
                }
            }
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import?;
                    match import.ty {
                        TypeRef::Func(type_index) => {
                            add_function(&mut tables, type_index, CallTarget::Import(imported_functions))?;
                            imported_functions += 1;
                        }
                        TypeRef::Global(global) => {
                            tables.add_global(value_kind(global.content_type)?, global.mutable);
                        }
                        TypeRef::Memory(memory) => set_memory(&mut tables, memory.initial, memory.maximum)?,
                        TypeRef::Table(table) => set_table(&mut tables, table.initial, table.maximum)?,
                        _ => {
                            return Err(CompileError::Unsupported(format!(
                                "import {}::{}",
                                import.module, import.name
                            )))
                        }
                    }
                }
            }
            Payload::FunctionSection(reader) => {
                for type_index in reader {
                    let type_index = type_index?;
                    let defined = defined_types.len() as u32;
                    add_function(&mut tables, type_index, CallTarget::Defined(defined))?;
                    defined_types.push(type_index);
                }
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let table = table?;
                    set_table(&mut tables, table.ty.initial, table.ty.maximum)?;
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    let memory = memory?;
                    set_memory(&mut tables, memory.initial, memory.maximum)?;
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let global = global?;
                    tables.add_global(value_kind(global.ty.content_type)?, global.ty.mutable);
                }
            }
            Payload::CodeSectionEntry(body) => {
                let defined = bodies.len();
                let type_index = *defined_types.get(defined).ok_or_else(|| {
                    CompileError::Decode(format!("code entry {defined} has no function declaration"))
                })?;

                let params = tables
                    .signature(type_index)
                    .map_or(0, |signature| signature.params().len() as u32);
                let mut total = params;
                let mut locals = Vec::new();
                for group in body.get_locals_reader()? {
                    let (count, ty) = group?;
                    total = total
                        .checked_add(count)
                        .filter(|total| *total <= MAX_FUNCTION_LOCALS)
                        .ok_or_else(|| {
                            CompileError::Decode(format!(
                                "function {} declares more than {MAX_FUNCTION_LOCALS} locals",
                                imported_functions as usize + defined
                            ))
                        })?;
                    let kind = value_kind(ty)?;
                    locals.extend(std::iter::repeat(kind).take(count as usize));
                }

                let mut instructions = Vec::new();
                for op in body.get_operators_reader()? {
                    instructions.push(translate(&op?)?);
                }

                bodies.push(FunctionBody {
                    index: imported_functions + defined as u32,
                    type_index,
                    locals,
                    instructions,
                });
            }
            _ => {}
        }
    }

    if bodies.len() != defined_types.len() {
        return Err(CompileError::Decode(format!(
            "{} function(s) declared but {} bod(ies) present",
            defined_types.len(),
            bodies.len()
        )));
    }
    Ok(DecodedModule { tables, bodies })
}

fn add_function(tables: &mut ModuleTables, type_index: u32, target: CallTarget) -> CompileResult<()> {
    tables
        .add_function(type_index, target)
        .map(|_| ())
        .ok_or_else(|| CompileError::Decode(format!("function refers to unknown type {type_index}")))
}

fn set_memory(tables: &mut ModuleTables, minimum_pages: u64, maximum_pages: Option<u64>) -> CompileResult<()> {
    if tables.memory.is_some() {
        return Err(CompileError::Unsupported("multiple memories".into()));
    }
    tables.memory = Some(MemoryDescriptor {
        minimum_pages,
        maximum_pages,
    });
    Ok(())
}

fn set_table(tables: &mut ModuleTables, minimum: u64, maximum: Option<u64>) -> CompileResult<()> {
    if tables.table.is_some() {
        return Err(CompileError::Unsupported("multiple tables".into()));
    }
    tables.table = Some(TableDescriptor { minimum, maximum });
    Ok(())
}

fn value_kind(ty: ValType) -> CompileResult<ValueKind> {
    match ty {
        ValType::I32 => Ok(ValueKind::I32),
        ValType::I64 => Ok(ValueKind::I64),
        ValType::F32 => Ok(ValueKind::F32),
        ValType::F64 => Ok(ValueKind::F64),
        other => Err(CompileError::Unsupported(format!("value type {other:?}"))),
    }
}

fn value_kinds(types: &[ValType]) -> CompileResult<Vec<ValueKind>> {
    types.iter().map(|ty| value_kind(*ty)).collect()
}

fn block_type(ty: wasmparser::BlockType) -> CompileResult<BlockType> {
    match ty {
        wasmparser::BlockType::Empty => Ok(BlockType::Empty),
        wasmparser::BlockType::Type(ty) => Ok(BlockType::Value(value_kind(ty)?)),
        wasmparser::BlockType::FuncType(index) => Err(CompileError::Unsupported(format!(
            "multi-value block type {index}"
        ))),
    }
}

fn memarg(memarg: wasmparser::MemArg) -> CompileResult<MemArg> {
    if memarg.memory != 0 {
        return Err(CompileError::Unsupported(format!("memory index {}", memarg.memory)));
    }
    Ok(MemArg::new(u32::from(memarg.align), memarg.offset))
}

// ══════════════════════════════════════════════════════════════════════════════
// Operator translation
// ══════════════════════════════════════════════════════════════════════════════

fn translate(op: &Operator<'_>) -> CompileResult<Instruction> {
    use ValueKind::{F32, F64, I32, I64};

    let load = |op: LoadOp, arg: &wasmparser::MemArg| -> CompileResult<Instruction> {
        Ok(Instruction::Load {
            op,
            memarg: memarg(*arg)?,
        })
    };
    let store = |op: StoreOp, arg: &wasmparser::MemArg| -> CompileResult<Instruction> {
        Ok(Instruction::Store {
            op,
            memarg: memarg(*arg)?,
        })
    };
    let unary = |kind, op| Ok(Instruction::Unary { kind, op });
    let binary = |kind, op| Ok(Instruction::Binary { kind, op });
    let compare = |kind, op| Ok(Instruction::Compare { kind, op });
    let convert = |op| Ok(Instruction::Convert { op });

    match op {
        // ── Control ──
        Operator::Unreachable => Ok(Instruction::Unreachable),
        Operator::Nop => Ok(Instruction::Nop),
        Operator::Block { blockty } => Ok(Instruction::Block {
            block_type: block_type(*blockty)?,
        }),
        Operator::Loop { blockty } => Ok(Instruction::Loop {
            block_type: block_type(*blockty)?,
        }),
        Operator::If { blockty } => Ok(Instruction::If {
            block_type: block_type(*blockty)?,
        }),
        Operator::Else => Ok(Instruction::Else),
        Operator::End => Ok(Instruction::End),
        Operator::Br { relative_depth } => Ok(Instruction::Br {
            depth: *relative_depth,
        }),
        Operator::BrIf { relative_depth } => Ok(Instruction::BrIf {
            depth: *relative_depth,
        }),
        Operator::BrTable { targets } => Ok(Instruction::BrTable {
            targets: targets.targets().collect::<Result<Vec<_>, _>>()?,
            default: targets.default(),
        }),
        Operator::Return => Ok(Instruction::Return),
        Operator::Call { function_index } => Ok(Instruction::Call {
            function_index: *function_index,
        }),
        Operator::CallIndirect {
            type_index,
            table_index,
        } => {
            if *table_index != 0 {
                return Err(CompileError::Unsupported(format!("table index {table_index}")));
            }
            Ok(Instruction::CallIndirect {
                type_index: *type_index,
            })
        }

        // ── Parametric ──
        Operator::Drop => Ok(Instruction::Drop),
        Operator::Select => Ok(Instruction::Select),

        // ── Variables ──
        Operator::LocalGet { local_index } => Ok(Instruction::LocalGet { index: *local_index }),
        Operator::LocalSet { local_index } => Ok(Instruction::LocalSet { index: *local_index }),
        Operator::LocalTee { local_index } => Ok(Instruction::LocalTee { index: *local_index }),
        Operator::GlobalGet { global_index } => Ok(Instruction::GlobalGet {
            index: *global_index,
        }),
        Operator::GlobalSet { global_index } => Ok(Instruction::GlobalSet {
            index: *global_index,
        }),

        // ── Memory ──
        Operator::I32Load { memarg } => load(LoadOp::I32Load, memarg),
        Operator::I64Load { memarg } => load(LoadOp::I64Load, memarg),
        Operator::F32Load { memarg } => load(LoadOp::F32Load, memarg),
        Operator::F64Load { memarg } => load(LoadOp::F64Load, memarg),
        Operator::I32Load8S { memarg } => load(LoadOp::I32Load8S, memarg),
        Operator::I32Load8U { memarg } => load(LoadOp::I32Load8U, memarg),
        Operator::I32Load16S { memarg } => load(LoadOp::I32Load16S, memarg),
        Operator::I32Load16U { memarg } => load(LoadOp::I32Load16U, memarg),
        Operator::I64Load8S { memarg } => load(LoadOp::I64Load8S, memarg),
        Operator::I64Load8U { memarg } => load(LoadOp::I64Load8U, memarg),
        Operator::I64Load16S { memarg } => load(LoadOp::I64Load16S, memarg),
        Operator::I64Load16U { memarg } => load(LoadOp::I64Load16U, memarg),
        Operator::I64Load32S { memarg } => load(LoadOp::I64Load32S, memarg),
        Operator::I64Load32U { memarg } => load(LoadOp::I64Load32U, memarg),
        Operator::I32Store { memarg } => store(StoreOp::I32Store, memarg),
        Operator::I64Store { memarg } => store(StoreOp::I64Store, memarg),
        Operator::F32Store { memarg } => store(StoreOp::F32Store, memarg),
        Operator::F64Store { memarg } => store(StoreOp::F64Store, memarg),
        Operator::I32Store8 { memarg } => store(StoreOp::I32Store8, memarg),
        Operator::I32Store16 { memarg } => store(StoreOp::I32Store16, memarg),
        Operator::I64Store8 { memarg } => store(StoreOp::I64Store8, memarg),
        Operator::I64Store16 { memarg } => store(StoreOp::I64Store16, memarg),
        Operator::I64Store32 { memarg } => store(StoreOp::I64Store32, memarg),
        Operator::MemorySize { mem: 0 } => Ok(Instruction::MemorySize),
        Operator::MemoryGrow { mem: 0 } => Ok(Instruction::MemoryGrow),

        // ── Constants ──
        Operator::I32Const { value } => Ok(Instruction::I32Const { value: *value }),
        Operator::I64Const { value } => Ok(Instruction::I64Const { value: *value }),
        Operator::F32Const { value } => Ok(Instruction::F32Const { bits: value.bits() }),
        Operator::F64Const { value } => Ok(Instruction::F64Const { bits: value.bits() }),

        // ── i32 ──
        Operator::I32Eqz => Ok(Instruction::Eqz { kind: I32 }),
        Operator::I32Eq => compare(I32, CompareOp::Eq),
        Operator::I32Ne => compare(I32, CompareOp::Ne),
        Operator::I32LtS => compare(I32, CompareOp::LtS),
        Operator::I32LtU => compare(I32, CompareOp::LtU),
        Operator::I32GtS => compare(I32, CompareOp::GtS),
        Operator::I32GtU => compare(I32, CompareOp::GtU),
        Operator::I32LeS => compare(I32, CompareOp::LeS),
        Operator::I32LeU => compare(I32, CompareOp::LeU),
        Operator::I32GeS => compare(I32, CompareOp::GeS),
        Operator::I32GeU => compare(I32, CompareOp::GeU),
        Operator::I32Clz => unary(I32, UnaryOp::Clz),
        Operator::I32Ctz => unary(I32, UnaryOp::Ctz),
        Operator::I32Popcnt => unary(I32, UnaryOp::Popcnt),
        Operator::I32Add => binary(I32, BinaryOp::Add),
        Operator::I32Sub => binary(I32, BinaryOp::Sub),
        Operator::I32Mul => binary(I32, BinaryOp::Mul),
        Operator::I32DivS => binary(I32, BinaryOp::DivS),
        Operator::I32DivU => binary(I32, BinaryOp::DivU),
        Operator::I32RemS => binary(I32, BinaryOp::RemS),
        Operator::I32RemU => binary(I32, BinaryOp::RemU),
        Operator::I32And => binary(I32, BinaryOp::And),
        Operator::I32Or => binary(I32, BinaryOp::Or),
        Operator::I32Xor => binary(I32, BinaryOp::Xor),
        Operator::I32Shl => binary(I32, BinaryOp::Shl),
        Operator::I32ShrS => binary(I32, BinaryOp::ShrS),
        Operator::I32ShrU => binary(I32, BinaryOp::ShrU),
        Operator::I32Rotl => binary(I32, BinaryOp::Rotl),
        Operator::I32Rotr => binary(I32, BinaryOp::Rotr),

        // ── i64 ──
        Operator::I64Eqz => Ok(Instruction::Eqz { kind: I64 }),
        Operator::I64Eq => compare(I64, CompareOp::Eq),
        Operator::I64Ne => compare(I64, CompareOp::Ne),
        Operator::I64LtS => compare(I64, CompareOp::LtS),
        Operator::I64LtU => compare(I64, CompareOp::LtU),
        Operator::I64GtS => compare(I64, CompareOp::GtS),
        Operator::I64GtU => compare(I64, CompareOp::GtU),
        Operator::I64LeS => compare(I64, CompareOp::LeS),
        Operator::I64LeU => compare(I64, CompareOp::LeU),
        Operator::I64GeS => compare(I64, CompareOp::GeS),
        Operator::I64GeU => compare(I64, CompareOp::GeU),
        Operator::I64Clz => unary(I64, UnaryOp::Clz),
        Operator::I64Ctz => unary(I64, UnaryOp::Ctz),
        Operator::I64Popcnt => unary(I64, UnaryOp::Popcnt),
        Operator::I64Add => binary(I64, BinaryOp::Add),
        Operator::I64Sub => binary(I64, BinaryOp::Sub),
        Operator::I64Mul => binary(I64, BinaryOp::Mul),
        Operator::I64DivS => binary(I64, BinaryOp::DivS),
        Operator::I64DivU => binary(I64, BinaryOp::DivU),
        Operator::I64RemS => binary(I64, BinaryOp::RemS),
        Operator::I64RemU => binary(I64, BinaryOp::RemU),
        Operator::I64And => binary(I64, BinaryOp::And),
        Operator::I64Or => binary(I64, BinaryOp::Or),
        Operator::I64Xor => binary(I64, BinaryOp::Xor),
        Operator::I64Shl => binary(I64, BinaryOp::Shl),
        Operator::I64ShrS => binary(I64, BinaryOp::ShrS),
        Operator::I64ShrU => binary(I64, BinaryOp::ShrU),
        Operator::I64Rotl => binary(I64, BinaryOp::Rotl),
        Operator::I64Rotr => binary(I64, BinaryOp::Rotr),

        // ── f32 ──
        Operator::F32Eq => compare(F32, CompareOp::Eq),
        Operator::F32Ne => compare(F32, CompareOp::Ne),
        Operator::F32Lt => compare(F32, CompareOp::Lt),
        Operator::F32Gt => compare(F32, CompareOp::Gt),
        Operator::F32Le => compare(F32, CompareOp::Le),
        Operator::F32Ge => compare(F32, CompareOp::Ge),
        Operator::F32Abs => unary(F32, UnaryOp::Abs),
        Operator::F32Neg => unary(F32, UnaryOp::Neg),
        Operator::F32Ceil => unary(F32, UnaryOp::Ceil),
        Operator::F32Floor => unary(F32, UnaryOp::Floor),
        Operator::F32Trunc => unary(F32, UnaryOp::Trunc),
        Operator::F32Nearest => unary(F32, UnaryOp::Nearest),
        Operator::F32Sqrt => unary(F32, UnaryOp::Sqrt),
        Operator::F32Add => binary(F32, BinaryOp::Add),
        Operator::F32Sub => binary(F32, BinaryOp::Sub),
        Operator::F32Mul => binary(F32, BinaryOp::Mul),
        Operator::F32Div => binary(F32, BinaryOp::Div),
        Operator::F32Min => binary(F32, BinaryOp::Min),
        Operator::F32Max => binary(F32, BinaryOp::Max),
        Operator::F32Copysign => binary(F32, BinaryOp::Copysign),

        // ── f64 ──
        Operator::F64Eq => compare(F64, CompareOp::Eq),
        Operator::F64Ne => compare(F64, CompareOp::Ne),
        Operator::F64Lt => compare(F64, CompareOp::Lt),
        Operator::F64Gt => compare(F64, CompareOp::Gt),
        Operator::F64Le => compare(F64, CompareOp::Le),
        Operator::F64Ge => compare(F64, CompareOp::Ge),
        Operator::F64Abs => unary(F64, UnaryOp::Abs),
        Operator::F64Neg => unary(F64, UnaryOp::Neg),
        Operator::F64Ceil => unary(F64, UnaryOp::Ceil),
        Operator::F64Floor => unary(F64, UnaryOp::Floor),
        Operator::F64Trunc => unary(F64, UnaryOp::Trunc),
        Operator::F64Nearest => unary(F64, UnaryOp::Nearest),
        Operator::F64Sqrt => unary(F64, UnaryOp::Sqrt),
        Operator::F64Add => binary(F64, BinaryOp::Add),
        Operator::F64Sub => binary(F64, BinaryOp::Sub),
        Operator::F64Mul => binary(F64, BinaryOp::Mul),
        Operator::F64Div => binary(F64, BinaryOp::Div),
        Operator::F64Min => binary(F64, BinaryOp::Min),
        Operator::F64Max => binary(F64, BinaryOp::Max),
        Operator::F64Copysign => binary(F64, BinaryOp::Copysign),

        // ── Conversions ──
        Operator::I32WrapI64 => convert(ConvertOp::I32WrapI64),
        Operator::I32TruncF32S => convert(ConvertOp::I32TruncF32S),
        Operator::I32TruncF32U => convert(ConvertOp::I32TruncF32U),
        Operator::I32TruncF64S => convert(ConvertOp::I32TruncF64S),
        Operator::I32TruncF64U => convert(ConvertOp::I32TruncF64U),
        Operator::I64ExtendI32S => convert(ConvertOp::I64ExtendI32S),
        Operator::I64ExtendI32U => convert(ConvertOp::I64ExtendI32U),
        Operator::I64TruncF32S => convert(ConvertOp::I64TruncF32S),
        Operator::I64TruncF32U => convert(ConvertOp::I64TruncF32U),
        Operator::I64TruncF64S => convert(ConvertOp::I64TruncF64S),
        Operator::I64TruncF64U => convert(ConvertOp::I64TruncF64U),
        Operator::F32ConvertI32S => convert(ConvertOp::F32ConvertI32S),
        Operator::F32ConvertI32U => convert(ConvertOp::F32ConvertI32U),
        Operator::F32ConvertI64S => convert(ConvertOp::F32ConvertI64S),
        Operator::F32ConvertI64U => convert(ConvertOp::F32ConvertI64U),
        Operator::F32DemoteF64 => convert(ConvertOp::F32DemoteF64),
        Operator::F64ConvertI32S => convert(ConvertOp::F64ConvertI32S),
        Operator::F64ConvertI32U => convert(ConvertOp::F64ConvertI32U),
        Operator::F64ConvertI64S => convert(ConvertOp::F64ConvertI64S),
        Operator::F64ConvertI64U => convert(ConvertOp::F64ConvertI64U),
        Operator::F64PromoteF32 => convert(ConvertOp::F64PromoteF32),
        Operator::I32ReinterpretF32 => convert(ConvertOp::I32ReinterpretF32),
        Operator::I64ReinterpretF64 => convert(ConvertOp::I64ReinterpretF64),
        Operator::F32ReinterpretI32 => convert(ConvertOp::F32ReinterpretI32),
        Operator::F64ReinterpretI64 => convert(ConvertOp::F64ReinterpretI64),

        other => Err(CompileError::Unsupported(format!("operator {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_decodes_to_empty_tables() {
        let bytes = b"\0asm\x01\0\0\0";
        let decoded = decode_module(bytes).unwrap();
        assert!(decoded.bodies.is_empty());
        assert!(decoded.tables.types.is_empty());
        assert!(decoded.tables.memory.is_none());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            decode_module(b"not wasm"),
            Err(CompileError::Decode(_))
        ));
    }

    /// `() -> ()` with one body declaring `count` i32 locals (LEB128 bytes).
    fn module_with_locals(count: &[u8]) -> Vec<u8> {
        let mut body = vec![0x01];
        body.extend_from_slice(count);
        body.extend_from_slice(&[0x7f, 0x0b]);

        let mut bytes = b"\0asm\x01\0\0\0".to_vec();
        bytes.extend_from_slice(&[0x01, 0x04, 0x01, 0x60, 0x00, 0x00]);
        bytes.extend_from_slice(&[0x03, 0x02, 0x01, 0x00]);
        bytes.extend_from_slice(&[0x0a, body.len() as u8 + 2, 0x01, body.len() as u8]);
        bytes.extend_from_slice(&body);
        bytes
    }

    #[test]
    fn declared_locals_are_expanded() {
        let decoded = decode_module(&module_with_locals(&[0x03])).unwrap();
        assert_eq!(decoded.bodies[0].locals, vec![ValueKind::I32; 3]);
    }

    #[test]
    fn huge_local_count_is_rejected_before_allocation() {
        let bytes = module_with_locals(&[0xff, 0xff, 0xff, 0xff, 0x0f]);
        assert!(matches!(decode_module(&bytes), Err(CompileError::Decode(_))));
    }

    #[test]
    fn local_limit_is_inclusive() {
        // 50_000 = 0xd0 0x86 0x03 in LEB128.
        let decoded = decode_module(&module_with_locals(&[0xd0, 0x86, 0x03])).unwrap();
        assert_eq!(decoded.bodies[0].locals.len(), MAX_FUNCTION_LOCALS as usize);
        assert!(matches!(
            decode_module(&module_with_locals(&[0xd1, 0x86, 0x03])),
            Err(CompileError::Decode(_))
        ));
    }

    #[test]
    fn value_types_map_to_kinds() {
        assert_eq!(value_kind(ValType::F64).unwrap(), ValueKind::F64);
        assert!(matches!(
            value_kind(ValType::V128),
            Err(CompileError::Unsupported(_))
        ));
    }
}
