use crate::error::AnalysisError;
use crate::ir::{Constant, ConstantPool, Instruction, LoadableConstant, MemberRef, Operand};
use crate::opcodes;

type DecodeResult<T> = std::result::Result<T, AnalysisError>;

/// Decode a method body into instructions, in program order.
///
/// Every byte must belong to a recognized instruction and every constant pool
/// reference must resolve to the kind of entry its opcode expects.
pub(crate) fn decode(code: &[u8], pool: &ConstantPool) -> DecodeResult<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let instruction = decode_one(code, offset, pool)?;
        offset += instruction.length as usize;
        instructions.push(instruction);
    }
    Ok(instructions)
}

fn decode_one(code: &[u8], offset: usize, pool: &ConstantPool) -> DecodeResult<Instruction> {
    let opcode = code[offset];
    let at = offset as u32;
    let (opcode, length, operand) = match opcode {
        opcodes::WIDE => wide(code, offset)?,
        _ => {
            let (length, operand) = decode_operands(code, offset, opcode, pool)?;
            (opcode, length, operand)
        }
    };
    Ok(Instruction {
        offset: at,
        opcode,
        length,
        operand,
    })
}

fn decode_operands(
    code: &[u8],
    offset: usize,
    opcode: u8,
    pool: &ConstantPool,
) -> DecodeResult<(u32, Operand)> {
    let at = offset as u32;
    let decoded = match opcode {
        opcodes::NOP..=opcodes::DCONST_1 => (1, Operand::None),
        opcodes::BIPUSH => (2, Operand::Int(read_u8(code, offset + 1)? as i8 as i32)),
        opcodes::SIPUSH => (3, Operand::Int(read_i16(code, offset + 1)? as i32)),
        opcodes::LDC => {
            let index = read_u8(code, offset + 1)? as u16;
            (2, Operand::Constant(loadable(pool, index, false, at)?))
        }
        opcodes::LDC_W => {
            let index = read_u16(code, offset + 1)?;
            (3, Operand::Constant(loadable(pool, index, false, at)?))
        }
        opcodes::LDC2_W => {
            let index = read_u16(code, offset + 1)?;
            (3, Operand::Constant(loadable(pool, index, true, at)?))
        }
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            (2, Operand::Local(read_u8(code, offset + 1)? as u16))
        }
        opcodes::ILOAD_0..=opcodes::SALOAD
        | opcodes::ISTORE_0..=opcodes::LXOR
        | opcodes::I2L..=opcodes::DCMPG
        | opcodes::IRETURN..=opcodes::RETURN
        | opcodes::ARRAYLENGTH
        | opcodes::ATHROW
        | opcodes::MONITORENTER
        | opcodes::MONITOREXIT => (1, Operand::None),
        opcodes::IINC => (
            3,
            Operand::Increment {
                local: read_u8(code, offset + 1)? as u16,
                delta: read_u8(code, offset + 2)? as i8 as i16,
            },
        ),
        opcodes::IFEQ..=opcodes::JSR | opcodes::IFNULL | opcodes::IFNONNULL => {
            let relative = read_i16(code, offset + 1)? as i32;
            (3, Operand::Branch(branch_target(code, offset, relative)?))
        }
        opcodes::GOTO_W | opcodes::JSR_W => {
            let relative = read_i32(code, offset + 1)?;
            (5, Operand::Branch(branch_target(code, offset, relative)?))
        }
        opcodes::TABLESWITCH => tableswitch(code, offset)?,
        opcodes::LOOKUPSWITCH => lookupswitch(code, offset)?,
        opcodes::GETSTATIC..=opcodes::PUTFIELD => {
            let index = read_u16(code, offset + 1)?;
            (3, Operand::Field(member(pool, index, at)?))
        }
        opcodes::INVOKEVIRTUAL..=opcodes::INVOKESTATIC => {
            let index = read_u16(code, offset + 1)?;
            (3, Operand::Method(member(pool, index, at)?))
        }
        opcodes::INVOKEINTERFACE => {
            let index = read_u16(code, offset + 1)?;
            read_u16(code, offset + 3)?;
            (5, Operand::Method(member(pool, index, at)?))
        }
        opcodes::INVOKEDYNAMIC => {
            let index = read_u16(code, offset + 1)?;
            read_u16(code, offset + 3)?;
            let (name, descriptor) = match pool.get(index) {
                Some(Constant::InvokeDynamic {
                    name_and_type_index,
                }) => pool.name_and_type(*name_and_type_index),
                _ => None,
            }
            .ok_or_else(|| bad_reference(at, index, "invokedynamic"))?;
            (
                5,
                Operand::InvokeDynamic {
                    name: name.to_string(),
                    descriptor: descriptor.to_string(),
                },
            )
        }
        opcodes::NEW | opcodes::ANEWARRAY | opcodes::CHECKCAST | opcodes::INSTANCEOF => {
            let index = read_u16(code, offset + 1)?;
            (3, Operand::Class(class(pool, index, at)?))
        }
        opcodes::NEWARRAY => {
            let atype = read_u8(code, offset + 1)?;
            if !(opcodes::T_BOOLEAN..=opcodes::T_LONG).contains(&atype) {
                return Err(AnalysisError::malformed(
                    at,
                    format!("invalid newarray element type {atype}"),
                ));
            }
            (2, Operand::ArrayType(atype))
        }
        opcodes::MULTIANEWARRAY => {
            let index = read_u16(code, offset + 1)?;
            let dimensions = read_u8(code, offset + 3)?;
            if dimensions == 0 {
                return Err(AnalysisError::malformed(at, "multianewarray with zero dimensions"));
            }
            (
                4,
                Operand::MultiArray {
                    class: class(pool, index, at)?,
                    dimensions,
                },
            )
        }
        other => {
            return Err(AnalysisError::malformed(
                at,
                format!("unrecognized opcode 0x{other:02x}"),
            ));
        }
    };
    Ok(decoded)
}

/// `wide` is reported under the opcode it modifies, with the full length.
fn wide(code: &[u8], offset: usize) -> DecodeResult<(u8, u32, Operand)> {
    let modified = read_u8(code, offset + 1)?;
    let local = read_u16(code, offset + 2)?;
    match modified {
        opcodes::IINC => {
            let delta = read_i16(code, offset + 4)?;
            Ok((modified, 6, Operand::Increment { local, delta }))
        }
        opcodes::ILOAD..=opcodes::ALOAD | opcodes::ISTORE..=opcodes::ASTORE | opcodes::RET => {
            Ok((modified, 4, Operand::Local(local)))
        }
        other => Err(AnalysisError::malformed(
            offset as u32,
            format!("wide cannot modify {}", opcodes::mnemonic(other)),
        )),
    }
}

fn tableswitch(code: &[u8], offset: usize) -> DecodeResult<(u32, Operand)> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let low = read_i32(code, base + 4)?;
    let high = read_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|span| span.checked_add(1))
        .filter(|count| *count > 0)
        .ok_or_else(|| {
            AnalysisError::malformed(offset as u32, format!("invalid tableswitch range {low}..={high}"))
        })? as usize;
    let mut targets = Vec::with_capacity(count.min(code.len() / 4));
    let mut cursor = base + 12;
    for _ in 0..count {
        targets.push(branch_target(code, offset, read_i32(code, cursor)?)?);
        cursor += 4;
    }
    let operand = Operand::Switch {
        default: branch_target(code, offset, default)?,
        targets,
    };
    Ok(((cursor - offset) as u32, operand))
}

fn lookupswitch(code: &[u8], offset: usize) -> DecodeResult<(u32, Operand)> {
    let base = offset + 1 + padding(offset);
    let default = read_i32(code, base)?;
    let npairs = read_i32(code, base + 4)?;
    if npairs < 0 {
        return Err(AnalysisError::malformed(
            offset as u32,
            format!("negative lookupswitch pair count {npairs}"),
        ));
    }
    let mut targets = Vec::with_capacity((npairs as usize).min(code.len() / 8));
    let mut cursor = base + 8;
    for _ in 0..npairs {
        read_i32(code, cursor)?;
        targets.push(branch_target(code, offset, read_i32(code, cursor + 4)?)?);
        cursor += 8;
    }
    let operand = Operand::Switch {
        default: branch_target(code, offset, default)?,
        targets,
    };
    Ok(((cursor - offset) as u32, operand))
}

/// Switch operands are 4-byte aligned relative to the start of the method body.
fn padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn branch_target(code: &[u8], offset: usize, relative: i32) -> DecodeResult<u32> {
    let target = offset as i64 + relative as i64;
    if target < 0 || target >= code.len() as i64 {
        return Err(AnalysisError::malformed(
            offset as u32,
            format!("branch target {target} outside method body"),
        ));
    }
    Ok(target as u32)
}

fn loadable(
    pool: &ConstantPool,
    index: u16,
    wide_value: bool,
    offset: u32,
) -> DecodeResult<LoadableConstant> {
    let constant = match (pool.get(index), wide_value) {
        (Some(Constant::Long(value)), true) => Some(LoadableConstant::Long(*value)),
        (Some(Constant::Double(value)), true) => Some(LoadableConstant::Double(*value)),
        (_, true) => None,
        (Some(Constant::Integer(value)), false) => Some(LoadableConstant::Int(*value)),
        (Some(Constant::Float(value)), false) => Some(LoadableConstant::Float(*value)),
        (Some(Constant::String { string_index }), false) => pool
            .utf8(*string_index)
            .map(|value| LoadableConstant::String(value.to_string())),
        (Some(Constant::Class { .. }), false) => pool
            .class_name(index)
            .map(|name| LoadableConstant::Class(name.to_string())),
        (Some(Constant::MethodType { descriptor_index }), false) => pool
            .utf8(*descriptor_index)
            .map(|descriptor| LoadableConstant::MethodType(descriptor.to_string())),
        (Some(Constant::MethodHandle), false) => Some(LoadableConstant::MethodHandle),
        (
            Some(Constant::Dynamic {
                name_and_type_index,
            }),
            false,
        ) => pool
            .name_and_type(*name_and_type_index)
            .map(|(_, descriptor)| LoadableConstant::Dynamic(descriptor.to_string())),
        _ => None,
    };
    constant.ok_or_else(|| bad_reference(offset, index, if wide_value { "ldc2_w" } else { "ldc" }))
}

fn member(pool: &ConstantPool, index: u16, offset: u32) -> DecodeResult<MemberRef> {
    pool.member_ref(index)
        .ok_or_else(|| bad_reference(offset, index, "member reference"))
}

fn class(pool: &ConstantPool, index: u16, offset: u32) -> DecodeResult<String> {
    pool.class_name(index)
        .map(str::to_string)
        .ok_or_else(|| bad_reference(offset, index, "class reference"))
}

fn bad_reference(offset: u32, index: u16, expected: &str) -> AnalysisError {
    AnalysisError::malformed(
        offset,
        format!("constant pool index {index} is not a valid {expected}"),
    )
}

fn read_u8(code: &[u8], offset: usize) -> DecodeResult<u8> {
    code.get(offset)
        .copied()
        .ok_or_else(|| truncated(offset))
}

fn read_u16(code: &[u8], offset: usize) -> DecodeResult<u16> {
    let bytes = code.get(offset..offset + 2).ok_or_else(|| truncated(offset))?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn read_i16(code: &[u8], offset: usize) -> DecodeResult<i16> {
    Ok(read_u16(code, offset)? as i16)
}

fn read_i32(code: &[u8], offset: usize) -> DecodeResult<i32> {
    let bytes = code.get(offset..offset + 4).ok_or_else(|| truncated(offset))?;
    Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn truncated(offset: usize) -> AnalysisError {
    AnalysisError::malformed(offset as u32, "truncated instruction")
}
