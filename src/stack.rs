use std::collections::BTreeMap;

use crate::descriptor::{
    array_element, class_to_descriptor, is_category2, is_primitive, parse_method_descriptor,
};
use crate::error::AnalysisError;
use crate::ir::{Instruction, LoadableConstant, Method, Operand};
use crate::opcodes;

const OBJECT: &str = "Ljava/lang/Object;";
const THROWABLE: &str = "Ljava/lang/Throwable;";
/// Not a real descriptor; `jsr` pushes a value no field can hold.
const RETURN_ADDRESS: &str = "R";

type SimulationResult<T> = std::result::Result<T, AnalysisError>;

/// A literal value proven to be on the stack.
#[allow(dead_code)]
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Literal {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Class(String),
    Null,
}

/// Where a stack value came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Origin {
    Immediate,
    NewArray,
    NewObject,
    Local(u16),
    Field,
    Invocation,
    ArrayElement,
    Computed,
    CaughtException,
    ReturnAddress,
}

/// Statically known shape of one operand stack entry.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct AbstractValue {
    pub(crate) signature: String,
    /// Only set when the value cannot differ at runtime.
    pub(crate) constant: Option<Literal>,
    #[allow(dead_code)]
    pub(crate) born_at: u32,
    pub(crate) origin: Origin,
}

impl AbstractValue {
    fn new(signature: impl Into<String>, origin: Origin, born_at: u32) -> Self {
        Self {
            signature: signature.into(),
            constant: None,
            born_at,
            origin,
        }
    }

    fn with_constant(mut self, constant: Literal) -> Self {
        self.constant = Some(constant);
        self
    }

    pub(crate) fn is_category2(&self) -> bool {
        is_category2(&self.signature)
    }

    pub(crate) fn int_constant(&self) -> Option<i32> {
        match self.constant {
            Some(Literal::Int(value)) => Some(value),
            _ => None,
        }
    }

    fn slots(&self) -> usize {
        if self.is_category2() { 2 } else { 1 }
    }
}

/// Read-only view of the operand stack, indexed from the top.
#[derive(Clone, Copy, Debug)]
pub(crate) struct StackView<'a> {
    values: &'a [AbstractValue],
}

impl<'a> StackView<'a> {
    pub(crate) fn new(values: &'a [AbstractValue]) -> Self {
        Self { values }
    }

    pub(crate) fn depth(&self) -> usize {
        self.values.len()
    }

    /// `item(0)` is the top of the stack.
    pub(crate) fn item(&self, index: usize) -> Option<&'a AbstractValue> {
        let len = self.values.len();
        if index >= len {
            return None;
        }
        self.values.get(len - 1 - index)
    }

    /// Depth in JVM slots, where long and double count twice.
    pub(crate) fn slots(&self) -> usize {
        self.values.iter().map(AbstractValue::slots).sum()
    }
}

/// Facts gathered while replaying one method.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct SimulationSummary {
    pub(crate) instruction_count: usize,
    pub(crate) peak_slots: usize,
    pub(crate) final_depth: usize,
}

/// Replay `instructions` once, calling `on_step` with the stack before and after each one.
///
/// Stack states are never merged. An instruction that cannot be reached by
/// fallthrough starts from the stack and locals recorded by the first forward
/// branch to it, from the caught exception when it starts a handler, or empty
/// with parameter-seeded locals. At join points every constant is forgotten,
/// and a stack entry or local whose signature differs between the incoming
/// states is widened to what the opcode alone guarantees.
pub(crate) fn simulate<F>(
    class_name: &str,
    method: &Method,
    instructions: &[Instruction],
    mut on_step: F,
) -> SimulationResult<SimulationSummary>
where
    F: FnMut(&Instruction, StackView<'_>, StackView<'_>),
{
    let mut machine = StackMachine::new(class_name, method)?;
    let incoming = incoming_edges(method, instructions);
    let mut summary = SimulationSummary::default();
    let mut pre = Vec::new();
    let mut previous_ends_flow = false;

    for inst in instructions {
        machine.enter(inst.offset, previous_ends_flow);
        if incoming.get(&inst.offset).copied().unwrap_or(0) > 1 {
            machine.forget_constants();
        }
        pre.clone_from(&machine.stack);
        machine.apply(inst)?;
        machine.record_branch_entries(inst);

        let post = StackView::new(&machine.stack);
        summary.peak_slots = summary.peak_slots.max(post.slots());
        on_step(inst, StackView::new(&pre), post);

        summary.instruction_count += 1;
        previous_ends_flow = ends_flow(inst.opcode);
    }
    summary.final_depth = machine.stack.len();
    Ok(summary)
}

/// Count control-flow edges into each instruction, including method entry and handlers.
fn incoming_edges(method: &Method, instructions: &[Instruction]) -> BTreeMap<u32, usize> {
    let mut incoming = BTreeMap::new();
    if let Some(first) = instructions.first() {
        *incoming.entry(first.offset).or_insert(0) += 1;
    }
    for pair in instructions.windows(2) {
        if !ends_flow(pair[0].opcode) {
            *incoming.entry(pair[1].offset).or_insert(0) += 1;
        }
    }
    for inst in instructions {
        for target in inst.branch_targets() {
            *incoming.entry(target).or_insert(0) += 1;
        }
    }
    for handler in &method.exception_handlers {
        *incoming.entry(handler.handler_pc).or_insert(0) += 1;
    }
    incoming
}

/// Opcodes after which the next instruction is not reached by fallthrough.
fn ends_flow(opcode: u8) -> bool {
    matches!(
        opcode,
        opcodes::GOTO
            | opcodes::GOTO_W
            | opcodes::JSR
            | opcodes::JSR_W
            | opcodes::RET
            | opcodes::TABLESWITCH
            | opcodes::LOOKUPSWITCH
            | opcodes::IRETURN..=opcodes::RETURN
            | opcodes::ATHROW
    )
}

/// Stack and local signatures recorded for a branch target.
#[derive(Clone, Debug)]
struct Frame {
    stack: Vec<AbstractValue>,
    locals: Vec<Option<String>>,
}

/// Widen every signature in `stack` and `locals` that `other` disagrees with.
fn widen(stack: &mut [AbstractValue], locals: &mut [Option<String>], other: &Frame) {
    for (value, incoming) in stack.iter_mut().zip(&other.stack) {
        if value.signature != incoming.signature {
            value.signature = join_signature(&value.signature, &incoming.signature).to_string();
        }
    }
    for (index, local) in locals.iter_mut().enumerate() {
        let incoming = other.locals.get(index).and_then(|signature| signature.as_deref());
        if local.as_deref() != incoming {
            *local = None;
        }
    }
}

fn join_signature<'a>(current: &'a str, incoming: &str) -> &'a str {
    let int_like = |signature: &str| matches!(signature, "I" | "Z" | "B" | "C" | "S");
    if !is_primitive(current) && !is_primitive(incoming) {
        OBJECT
    } else if int_like(current) && int_like(incoming) {
        "I"
    } else {
        current
    }
}

/// Abstract operand stack and local signatures for the method being replayed.
struct StackMachine {
    stack: Vec<AbstractValue>,
    locals: Vec<Option<String>>,
    parameters: Vec<Option<String>>,
    entries: BTreeMap<u32, Frame>,
    handlers: BTreeMap<u32, String>,
}

impl StackMachine {
    fn new(class_name: &str, method: &Method) -> SimulationResult<Self> {
        let descriptor = parse_method_descriptor(&method.descriptor)
            .map_err(|err| AnalysisError::malformed(0, format!("{err:#}")))?;
        let mut locals = Vec::new();
        if !method.access.is_static {
            locals.push(Some(class_to_descriptor(class_name)));
        }
        for parameter in descriptor.parameters {
            let wide = is_category2(&parameter);
            locals.push(Some(parameter));
            if wide {
                locals.push(None);
            }
        }

        let mut handlers = BTreeMap::new();
        for handler in &method.exception_handlers {
            let caught = handler
                .catch_type
                .as_deref()
                .map(class_to_descriptor)
                .unwrap_or_else(|| THROWABLE.to_string());
            handlers.entry(handler.handler_pc).or_insert(caught);
        }

        Ok(Self {
            stack: Vec::new(),
            parameters: locals.clone(),
            locals,
            entries: BTreeMap::new(),
            handlers,
        })
    }

    fn enter(&mut self, offset: u32, unreachable_by_fallthrough: bool) {
        let recorded = self.entries.remove(&offset);
        if let Some(caught) = self.handlers.get(&offset) {
            self.stack.clear();
            self.stack
                .push(AbstractValue::new(caught.clone(), Origin::CaughtException, offset));
            self.locals.clone_from(&self.parameters);
            return;
        }
        match (recorded, unreachable_by_fallthrough) {
            (Some(entry), true) => {
                self.stack = entry.stack;
                self.locals = entry.locals;
            }
            (None, true) => {
                self.stack.clear();
                self.locals.clone_from(&self.parameters);
            }
            (Some(entry), false) => widen(&mut self.stack, &mut self.locals, &entry),
            (None, false) => {}
        }
    }

    fn forget_constants(&mut self) {
        for value in &mut self.stack {
            value.constant = None;
        }
    }

    fn record_branch_entries(&mut self, inst: &Instruction) {
        for target in inst.branch_targets() {
            if target > inst.offset {
                self.record_entry(target);
            }
        }
    }

    /// The first record for a target keeps its stack; later ones only widen signatures.
    fn record_entry(&mut self, target: u32) {
        let current = Frame {
            stack: self.stack.clone(),
            locals: self.locals.clone(),
        };
        match self.entries.get_mut(&target) {
            Some(entry) => widen(&mut entry.stack, &mut entry.locals, &current),
            None => {
                self.entries.insert(target, current);
            }
        }
    }

    fn require(&self, inst: &Instruction, required: usize) -> SimulationResult<()> {
        if self.stack.len() < required {
            return Err(AnalysisError::StackUnderflow {
                offset: inst.offset,
                mnemonic: opcodes::mnemonic(inst.opcode),
                required,
                available: self.stack.len(),
            });
        }
        Ok(())
    }

    fn pop(&mut self, inst: &Instruction) -> SimulationResult<AbstractValue> {
        self.require(inst, 1)?;
        self.stack.pop().ok_or_else(|| AnalysisError::StackUnderflow {
            offset: inst.offset,
            mnemonic: opcodes::mnemonic(inst.opcode),
            required: 1,
            available: 0,
        })
    }

    fn pop_n(&mut self, inst: &Instruction, count: usize) -> SimulationResult<Vec<AbstractValue>> {
        self.require(inst, count)?;
        let split = self.stack.len() - count;
        Ok(self.stack.split_off(split))
    }

    fn peek(&self, index: usize) -> Option<&AbstractValue> {
        StackView::new(&self.stack).item(index)
    }

    fn push(&mut self, value: AbstractValue) {
        self.stack.push(value);
    }

    fn push_new(&mut self, signature: impl Into<String>, origin: Origin, at: u32) {
        self.push(AbstractValue::new(signature, origin, at));
    }

    fn apply(&mut self, inst: &Instruction) -> SimulationResult<()> {
        let at = inst.offset;
        let opcode = inst.opcode;
        match opcode {
            opcodes::NOP => {}
            opcodes::ACONST_NULL => self.push(
                AbstractValue::new(OBJECT, Origin::Immediate, at).with_constant(Literal::Null),
            ),
            opcodes::ICONST_M1..=opcodes::ICONST_5 => {
                let value = opcode as i32 - opcodes::ICONST_0 as i32;
                self.push(
                    AbstractValue::new("I", Origin::Immediate, at).with_constant(Literal::Int(value)),
                );
            }
            opcodes::LCONST_0 | opcodes::LCONST_1 => {
                let value = (opcode - opcodes::LCONST_0) as i64;
                self.push(
                    AbstractValue::new("J", Origin::Immediate, at)
                        .with_constant(Literal::Long(value)),
                );
            }
            opcodes::FCONST_0..=opcodes::FCONST_2 => {
                let value = (opcode - opcodes::FCONST_0) as f32;
                self.push(
                    AbstractValue::new("F", Origin::Immediate, at)
                        .with_constant(Literal::Float(value)),
                );
            }
            opcodes::DCONST_0 | opcodes::DCONST_1 => {
                let value = (opcode - opcodes::DCONST_0) as f64;
                self.push(
                    AbstractValue::new("D", Origin::Immediate, at)
                        .with_constant(Literal::Double(value)),
                );
            }
            opcodes::BIPUSH | opcodes::SIPUSH => {
                let value = int_operand(inst)?;
                self.push(
                    AbstractValue::new("I", Origin::Immediate, at).with_constant(Literal::Int(value)),
                );
            }
            opcodes::LDC | opcodes::LDC_W | opcodes::LDC2_W => self.load_constant(inst)?,
            opcodes::ILOAD..=opcodes::ALOAD => {
                let local = local_operand(inst)?;
                self.load_local(opcode - opcodes::ILOAD, local, at);
            }
            opcodes::ILOAD_0..=opcodes::ALOAD_3 => {
                let relative = opcode - opcodes::ILOAD_0;
                self.load_local(relative / 4, (relative % 4) as u16, at);
            }
            opcodes::IALOAD..=opcodes::SALOAD => {
                self.pop(inst)?;
                let array = self.pop(inst)?;
                let element = array_load_signature(opcode, &array.signature);
                self.push_new(element, Origin::ArrayElement, at);
            }
            opcodes::ISTORE..=opcodes::ASTORE => {
                let local = local_operand(inst)?;
                let value = self.pop(inst)?;
                self.store_local(local, value);
            }
            opcodes::ISTORE_0..=opcodes::ASTORE_3 => {
                let local = ((opcode - opcodes::ISTORE_0) % 4) as u16;
                let value = self.pop(inst)?;
                self.store_local(local, value);
            }
            opcodes::IASTORE..=opcodes::SASTORE => {
                self.pop_n(inst, 3)?;
            }
            opcodes::POP => {
                self.pop(inst)?;
            }
            opcodes::POP2 => {
                let count = self.top_form(inst)?;
                self.pop_n(inst, count)?;
            }
            opcodes::DUP => self.duplicate(inst, 1, 0)?,
            opcodes::DUP_X1 => self.duplicate(inst, 1, 1)?,
            opcodes::DUP_X2 => {
                self.require(inst, 2)?;
                let skip = self.form_at(1);
                self.duplicate(inst, 1, skip)?;
            }
            opcodes::DUP2 => {
                let take = self.top_form(inst)?;
                self.duplicate(inst, take, 0)?;
            }
            opcodes::DUP2_X1 => {
                let take = self.top_form(inst)?;
                self.duplicate(inst, take, 1)?;
            }
            opcodes::DUP2_X2 => {
                let take = self.top_form(inst)?;
                self.require(inst, take + 1)?;
                let skip = self.form_at(take);
                self.duplicate(inst, take, skip)?;
            }
            opcodes::SWAP => {
                let mut pair = self.pop_n(inst, 2)?;
                pair.swap(0, 1);
                self.stack.extend(pair);
            }
            opcodes::IADD..=opcodes::DREM => {
                self.pop_n(inst, 2)?;
                self.push_new(numeric_signature(opcode - opcodes::IADD), Origin::Computed, at);
            }
            opcodes::INEG..=opcodes::DNEG => {
                self.pop(inst)?;
                self.push_new(numeric_signature(opcode - opcodes::INEG), Origin::Computed, at);
            }
            opcodes::ISHL..=opcodes::LXOR => {
                self.pop_n(inst, 2)?;
                let signature = if (opcode - opcodes::ISHL) % 2 == 0 { "I" } else { "J" };
                self.push_new(signature, Origin::Computed, at);
            }
            opcodes::IINC => {}
            opcodes::I2L..=opcodes::I2S => {
                self.pop(inst)?;
                self.push_new(conversion_signature(opcode), Origin::Computed, at);
            }
            opcodes::LCMP..=opcodes::DCMPG => {
                self.pop_n(inst, 2)?;
                self.push_new("I", Origin::Computed, at);
            }
            opcodes::IFEQ..=opcodes::IFLE | opcodes::IFNULL | opcodes::IFNONNULL => {
                self.pop(inst)?;
            }
            opcodes::IF_ICMPEQ..=opcodes::IF_ACMPNE => {
                self.pop_n(inst, 2)?;
            }
            opcodes::GOTO | opcodes::GOTO_W | opcodes::RET => {}
            opcodes::JSR | opcodes::JSR_W => {
                // The subroutine returns to the next instruction with the stack as it is now.
                let resume = inst.offset + inst.length;
                self.record_entry(resume);
                self.push_new(RETURN_ADDRESS, Origin::ReturnAddress, at);
            }
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => {
                self.pop(inst)?;
            }
            opcodes::IRETURN..=opcodes::ARETURN | opcodes::ATHROW => {
                self.pop(inst)?;
            }
            opcodes::RETURN => {}
            opcodes::GETSTATIC | opcodes::GETFIELD => {
                let field = field_descriptor(inst)?;
                if opcode == opcodes::GETFIELD {
                    self.pop(inst)?;
                }
                self.push_new(field, Origin::Field, at);
            }
            opcodes::PUTSTATIC => {
                self.pop(inst)?;
            }
            opcodes::PUTFIELD => {
                self.pop_n(inst, 2)?;
            }
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEDYNAMIC => self.invoke(inst)?,
            opcodes::NEW => {
                let class = class_operand(inst)?;
                self.push_new(class_to_descriptor(class), Origin::NewObject, at);
            }
            opcodes::NEWARRAY | opcodes::ANEWARRAY => {
                let count = self.pop(inst)?;
                let signature = match &inst.operand {
                    Operand::ArrayType(atype) => format!("[{}", primitive_for_array_type(*atype)),
                    Operand::Class(class) => format!("[{}", class_to_descriptor(class)),
                    _ => return Err(unexpected_operand(inst)),
                };
                let mut array = AbstractValue::new(signature, Origin::NewArray, at);
                // The length of a fresh array is fixed once the count is known.
                if let Some(length) = count.int_constant().filter(|length| *length >= 0) {
                    array = array.with_constant(Literal::Int(length));
                }
                self.push(array);
            }
            opcodes::ARRAYLENGTH => {
                self.pop(inst)?;
                self.push_new("I", Origin::Computed, at);
            }
            opcodes::CHECKCAST => {
                let class = class_operand(inst)?;
                let value = self.pop(inst)?;
                self.push(AbstractValue {
                    signature: class_to_descriptor(class),
                    constant: None,
                    born_at: at,
                    origin: value.origin,
                });
            }
            opcodes::INSTANCEOF => {
                self.pop(inst)?;
                self.push_new("I", Origin::Computed, at);
            }
            opcodes::MONITORENTER | opcodes::MONITOREXIT => {
                self.pop(inst)?;
            }
            opcodes::MULTIANEWARRAY => {
                let Operand::MultiArray { class, dimensions } = &inst.operand else {
                    return Err(unexpected_operand(inst));
                };
                self.pop_n(inst, *dimensions as usize)?;
                self.push_new(class_to_descriptor(class), Origin::NewArray, at);
            }
            other => {
                return Err(AnalysisError::malformed(
                    at,
                    format!("cannot simulate opcode 0x{other:02x}"),
                ));
            }
        }
        Ok(())
    }

    fn load_constant(&mut self, inst: &Instruction) -> SimulationResult<()> {
        let Operand::Constant(constant) = &inst.operand else {
            return Err(unexpected_operand(inst));
        };
        let at = inst.offset;
        let value = match constant {
            LoadableConstant::Int(value) => {
                AbstractValue::new("I", Origin::Immediate, at).with_constant(Literal::Int(*value))
            }
            LoadableConstant::Float(value) => AbstractValue::new("F", Origin::Immediate, at)
                .with_constant(Literal::Float(*value)),
            LoadableConstant::Long(value) => {
                AbstractValue::new("J", Origin::Immediate, at).with_constant(Literal::Long(*value))
            }
            LoadableConstant::Double(value) => AbstractValue::new("D", Origin::Immediate, at)
                .with_constant(Literal::Double(*value)),
            LoadableConstant::String(value) => {
                AbstractValue::new("Ljava/lang/String;", Origin::Immediate, at)
                    .with_constant(Literal::String(value.clone()))
            }
            LoadableConstant::Class(name) => {
                AbstractValue::new("Ljava/lang/Class;", Origin::Immediate, at)
                    .with_constant(Literal::Class(name.clone()))
            }
            LoadableConstant::MethodType(_) => {
                AbstractValue::new("Ljava/lang/invoke/MethodType;", Origin::Immediate, at)
            }
            LoadableConstant::MethodHandle => {
                AbstractValue::new("Ljava/lang/invoke/MethodHandle;", Origin::Immediate, at)
            }
            // Dynamic constants run a bootstrap method, so only the type is known.
            LoadableConstant::Dynamic(descriptor) => {
                AbstractValue::new(descriptor.clone(), Origin::Invocation, at)
            }
        };
        self.push(value);
        Ok(())
    }

    /// `kind` is 0..=4 for i, l, f, d, a.
    fn load_local(&mut self, kind: u8, local: u16, at: u32) {
        let fallback = match kind {
            0 => "I",
            1 => "J",
            2 => "F",
            3 => "D",
            _ => OBJECT,
        };
        let known = self
            .locals
            .get(local as usize)
            .and_then(|signature| signature.as_deref())
            .filter(|signature| local_matches_kind(signature, kind));
        let signature = known.unwrap_or(fallback).to_string();
        self.push_new(signature, Origin::Local(local), at);
    }

    fn store_local(&mut self, local: u16, value: AbstractValue) {
        let index = local as usize;
        let wide = value.is_category2();
        let needed = index + if wide { 2 } else { 1 };
        if self.locals.len() < needed {
            self.locals.resize(needed, None);
        }
        if index > 0 {
            // A wide value in the slot below is clobbered by this store.
            if let Some(below) = self.locals[index - 1].as_deref() {
                if is_category2(below) {
                    self.locals[index - 1] = None;
                }
            }
        }
        self.locals[index] = Some(value.signature);
        if wide {
            self.locals[index + 1] = None;
        }
    }

    /// Number of stack values forming the top two slots: 1 for a wide value, 2 otherwise.
    fn top_form(&self, inst: &Instruction) -> SimulationResult<usize> {
        self.require(inst, 1)?;
        let take = self.form_at(0);
        self.require(inst, take)?;
        Ok(take)
    }

    fn form_at(&self, index: usize) -> usize {
        match self.peek(index) {
            Some(value) if value.is_category2() => 1,
            _ => 2,
        }
    }

    /// Copy the top `take` values and insert the copies below the next `skip` values.
    fn duplicate(&mut self, inst: &Instruction, take: usize, skip: usize) -> SimulationResult<()> {
        let mut moved = self.pop_n(inst, take + skip)?;
        let top = moved.split_off(skip);
        for value in &top {
            let mut copy = value.clone();
            copy.born_at = inst.offset;
            self.stack.push(copy);
        }
        self.stack.extend(moved);
        self.stack.extend(top);
        Ok(())
    }

    fn invoke(&mut self, inst: &Instruction) -> SimulationResult<()> {
        let (descriptor, has_receiver) = match &inst.operand {
            Operand::Method(member) => (
                member.descriptor.as_str(),
                inst.opcode != opcodes::INVOKESTATIC,
            ),
            Operand::InvokeDynamic { descriptor, .. } => (descriptor.as_str(), false),
            _ => return Err(unexpected_operand(inst)),
        };
        let parsed = parse_method_descriptor(descriptor)
            .map_err(|err| AnalysisError::malformed(inst.offset, format!("{err:#}")))?;
        let arguments = parsed.parameters.len() + usize::from(has_receiver);
        self.pop_n(inst, arguments)?;
        if let Some(return_type) = parsed.return_type {
            self.push_new(return_type, Origin::Invocation, inst.offset);
        }
        Ok(())
    }
}

fn local_matches_kind(signature: &str, kind: u8) -> bool {
    match kind {
        0 => matches!(signature, "I" | "Z" | "B" | "C" | "S"),
        1 => signature == "J",
        2 => signature == "F",
        3 => signature == "D",
        _ => !is_primitive(signature),
    }
}

/// Result type for the add..rem and neg families, which cycle i, l, f, d.
fn numeric_signature(relative: u8) -> &'static str {
    match relative % 4 {
        0 => "I",
        1 => "J",
        2 => "F",
        _ => "D",
    }
}

fn conversion_signature(opcode: u8) -> &'static str {
    match opcode {
        opcodes::L2I | opcodes::F2I | opcodes::D2I => "I",
        opcodes::I2L | opcodes::F2L | opcodes::D2L => "J",
        opcodes::I2F | opcodes::L2F | opcodes::D2F => "F",
        opcodes::I2D | opcodes::L2D | opcodes::F2D => "D",
        opcodes::I2B => "B",
        opcodes::I2C => "C",
        _ => "S",
    }
}

fn array_load_signature(opcode: u8, array: &str) -> String {
    let fallback = match opcode {
        opcodes::IALOAD => "I",
        opcodes::LALOAD => "J",
        opcodes::FALOAD => "F",
        opcodes::DALOAD => "D",
        opcodes::BALOAD if array == "[Z" => "Z",
        opcodes::BALOAD => "B",
        opcodes::CALOAD => "C",
        opcodes::SALOAD => "S",
        _ => OBJECT,
    };
    if opcode == opcodes::AALOAD {
        if let Some(element) = array_element(array).filter(|element| !is_primitive(element)) {
            return element.to_string();
        }
    }
    fallback.to_string()
}

fn primitive_for_array_type(atype: u8) -> &'static str {
    match atype {
        opcodes::T_BOOLEAN => "Z",
        opcodes::T_CHAR => "C",
        opcodes::T_FLOAT => "F",
        opcodes::T_DOUBLE => "D",
        opcodes::T_BYTE => "B",
        opcodes::T_SHORT => "S",
        opcodes::T_INT => "I",
        _ => "J",
    }
}

fn int_operand(inst: &Instruction) -> SimulationResult<i32> {
    match inst.operand {
        Operand::Int(value) => Ok(value),
        _ => Err(unexpected_operand(inst)),
    }
}

fn local_operand(inst: &Instruction) -> SimulationResult<u16> {
    match inst.operand {
        Operand::Local(local) => Ok(local),
        _ => Err(unexpected_operand(inst)),
    }
}

fn field_descriptor(inst: &Instruction) -> SimulationResult<String> {
    match &inst.operand {
        Operand::Field(field) => Ok(field.descriptor.clone()),
        _ => Err(unexpected_operand(inst)),
    }
}

fn class_operand(inst: &Instruction) -> SimulationResult<&str> {
    match &inst.operand {
        Operand::Class(class) => Ok(class),
        _ => Err(unexpected_operand(inst)),
    }
}

fn unexpected_operand(inst: &Instruction) -> AnalysisError {
    AnalysisError::malformed(
        inst.offset,
        format!("unexpected operand for {}", opcodes::mnemonic(inst.opcode)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::ir::ConstantPool;
    use crate::test_harness::{
        PoolBuilder, catch_all, index_bytes, instance_access, method_with, static_access,
    };

    /// Replays `method` and returns the post-stack signatures and constants after each step.
    fn trace(
        method: &Method,
        pool: &ConstantPool,
    ) -> SimulationResult<Vec<Vec<(String, Option<Literal>)>>> {
        let instructions = decode(&method.bytecode, pool).expect("decode");
        let mut steps = Vec::new();
        simulate("com/example/App", method, &instructions, |_, _, post| {
            let mut values = Vec::new();
            for index in 0..post.depth() {
                let value = post.item(index).expect("value in range");
                values.push((value.signature.clone(), value.constant.clone()));
            }
            steps.push(values);
        })?;
        Ok(steps)
    }

    fn static_method(code: Vec<u8>) -> Method {
        method_with("run", "()V", static_access(), code)
    }

    #[test]
    fn immediate_pushes_carry_constants() {
        let method = static_method(vec![
            opcodes::ICONST_M1,
            opcodes::BIPUSH,
            42,
            opcodes::LCONST_1,
            opcodes::ACONST_NULL,
            opcodes::RETURN,
        ]);

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        let last = &steps[3];
        assert_eq!(last[0], (OBJECT.to_string(), Some(Literal::Null)));
        assert_eq!(last[1], ("J".to_string(), Some(Literal::Long(1))));
        assert_eq!(last[2], ("I".to_string(), Some(Literal::Int(42))));
        assert_eq!(last[3], ("I".to_string(), Some(Literal::Int(-1))));
    }

    #[test]
    fn pool_constants_are_known() {
        let mut pool = PoolBuilder::new();
        let answer = pool.integer(1_000_000);
        let big = pool.long(1 << 40);
        let greeting = pool.string("hello");
        let pool = pool.build();
        let [i0, i1] = index_bytes(answer);
        let [l0, l1] = index_bytes(big);
        let [_, s1] = index_bytes(greeting);
        let method = static_method(vec![
            opcodes::LDC_W,
            i0,
            i1,
            opcodes::LDC2_W,
            l0,
            l1,
            opcodes::LDC,
            s1,
            opcodes::RETURN,
        ]);

        let steps = trace(&method, &pool).expect("simulate");

        let last = &steps[2];
        assert_eq!(
            last[0],
            (
                "Ljava/lang/String;".to_string(),
                Some(Literal::String("hello".to_string()))
            )
        );
        assert_eq!(last[1], ("J".to_string(), Some(Literal::Long(1 << 40))));
        assert_eq!(last[2], ("I".to_string(), Some(Literal::Int(1_000_000))));
    }

    #[test]
    fn computed_values_have_no_constant() {
        let mut pool = PoolBuilder::new();
        let field = pool.field_ref("com/example/App", "COUNT", "I");
        let call = pool.method_ref("java/lang/Math", "abs", "(I)I");
        let pool = pool.build();
        let [f0, f1] = index_bytes(field);
        let [c0, c1] = index_bytes(call);
        let method = static_method(vec![
            opcodes::ICONST_1,
            opcodes::ICONST_2,
            opcodes::IADD,
            opcodes::GETSTATIC,
            f0,
            f1,
            opcodes::INVOKESTATIC,
            c0,
            c1,
            opcodes::RETURN,
        ]);

        let steps = trace(&method, &pool).expect("simulate");

        assert_eq!(steps[2], vec![("I".to_string(), None)]);
        assert_eq!(steps[3][0], ("I".to_string(), None));
        assert_eq!(steps[4][0], ("I".to_string(), None));
        assert_eq!(steps[4].len(), 2);
    }

    #[test]
    fn underflow_is_reported_not_clamped() {
        let method = static_method(vec![opcodes::ICONST_1, opcodes::IADD, opcodes::RETURN]);

        let error = trace(&method, &ConstantPool::default()).expect_err("must underflow");

        assert_eq!(
            error,
            AnalysisError::StackUnderflow {
                offset: 1,
                mnemonic: "iadd",
                required: 2,
                available: 1,
            }
        );
    }

    #[test]
    fn fresh_arrays_remember_constant_length() {
        let mut pool = PoolBuilder::new();
        let int_array = pool.class("[I");
        let pool = pool.build();
        let [a0, a1] = index_bytes(int_array);
        let method = static_method(vec![
            opcodes::ICONST_3,
            opcodes::NEWARRAY,
            opcodes::T_INT,
            opcodes::POP,
            opcodes::ICONST_1,
            opcodes::ANEWARRAY,
            a0,
            a1,
            opcodes::POP,
            opcodes::ILOAD_0,
            opcodes::NEWARRAY,
            opcodes::T_LONG,
            opcodes::RETURN,
        ]);

        let steps = trace(&method, &pool).expect("simulate");

        assert_eq!(steps[1][0], ("[I".to_string(), Some(Literal::Int(3))));
        assert_eq!(steps[4][0], ("[[I".to_string(), Some(Literal::Int(1))));
        assert_eq!(steps[7][0], ("[J".to_string(), None));
    }

    #[test]
    fn wide_values_follow_dup2_and_pop2_forms() {
        let method = static_method(vec![
            opcodes::LCONST_0,
            opcodes::DUP2,
            opcodes::POP2,
            opcodes::ICONST_1,
            opcodes::ICONST_2,
            opcodes::DUP2_X2,
            opcodes::POP2,
            opcodes::POP2,
            opcodes::POP2,
            opcodes::RETURN,
        ]);

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        let signatures = |index: usize| -> Vec<String> {
            steps[index].iter().map(|(signature, _)| signature.clone()).collect()
        };
        assert_eq!(signatures(1), vec!["J", "J"]);
        // Two ints over a long: both ints are copied below the long.
        assert_eq!(signatures(5), vec!["I", "I", "J", "I", "I"]);
        assert_eq!(signatures(6), vec!["J", "I", "I"]);
        assert_eq!(signatures(7), vec!["I", "I"]);
        assert!(steps[8].is_empty());
    }

    #[test]
    fn dup_x1_and_swap_move_existing_values() {
        let method = static_method(vec![
            opcodes::ICONST_1,
            opcodes::ICONST_2,
            opcodes::DUP_X1,
            opcodes::SWAP,
            opcodes::RETURN,
        ]);

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        let constants: Vec<Option<Literal>> =
            steps[3].iter().map(|(_, constant)| constant.clone()).collect();
        assert_eq!(
            constants,
            vec![
                Some(Literal::Int(1)),
                Some(Literal::Int(2)),
                Some(Literal::Int(2))
            ]
        );
    }

    #[test]
    fn parameters_seed_local_signatures() {
        let method = method_with(
            "run",
            "(J[ILjava/lang/String;)V",
            instance_access(),
            vec![
                opcodes::ALOAD_0,
                opcodes::LLOAD_1,
                opcodes::ALOAD_3,
                opcodes::ALOAD,
                4,
                opcodes::RETURN,
            ],
        );

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        let signatures: Vec<&str> = steps[3].iter().map(|(sig, _)| sig.as_str()).collect();
        assert_eq!(
            signatures,
            vec!["Ljava/lang/String;", "[I", "J", "Lcom/example/App;"]
        );
    }

    #[test]
    fn stores_update_local_signatures_without_constants() {
        let method = static_method(vec![
            opcodes::ICONST_5,
            opcodes::NEWARRAY,
            opcodes::T_BYTE,
            opcodes::ASTORE_1,
            opcodes::ALOAD_1,
            opcodes::RETURN,
        ]);

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        assert_eq!(steps[3], vec![("[B".to_string(), None)]);
    }

    #[test]
    fn conditional_join_forgets_constants() {
        // iload_0; ifeq L; iconst_1; goto J; L: iconst_2; J: istore_1; return
        let method = method_with(
            "pick",
            "(Z)V",
            static_access(),
            vec![
                opcodes::ILOAD_0,
                opcodes::IFEQ,
                0,
                7,
                opcodes::ICONST_1,
                opcodes::GOTO,
                0,
                4,
                opcodes::ICONST_2,
                opcodes::ISTORE_1,
                opcodes::RETURN,
            ],
        );

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        // The else branch starts from the state recorded at ifeq.
        assert_eq!(steps[4], vec![("I".to_string(), Some(Literal::Int(2)))]);
        assert!(steps[5].is_empty());
    }

    #[test]
    fn join_point_drops_constant_from_entry_stack() {
        // iconst_1; iload_0; ifeq J; nop; J: istore_1; return
        let method = method_with(
            "join",
            "(I)V",
            static_access(),
            vec![
                opcodes::ICONST_1,
                opcodes::ILOAD_0,
                opcodes::IFEQ,
                0,
                4,
                opcodes::NOP,
                opcodes::ISTORE_1,
                opcodes::RETURN,
            ],
        );
        let instructions = decode(&method.bytecode, &ConstantPool::default()).expect("decode");
        let mut pre_at_join = None;

        simulate("com/example/App", &method, &instructions, |inst, pre, _| {
            if inst.offset == 6 {
                pre_at_join = pre.item(0).cloned();
            }
        })
        .expect("simulate");

        let value = pre_at_join.expect("value at join");
        assert_eq!(value.signature, "I");
        assert_eq!(value.constant, None);
    }

    #[test]
    fn exception_handler_starts_with_caught_value() {
        // try { nop } catch (Throwable t) { astore_0 } ; return
        let mut method = static_method(vec![
            opcodes::NOP,
            opcodes::GOTO,
            0,
            4,
            opcodes::ASTORE_0,
            opcodes::RETURN,
        ]);
        method.exception_handlers.push(catch_all(0, 1, 4));

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        assert_eq!(steps.len(), 4);
        assert!(steps[2].is_empty());
    }

    #[test]
    fn join_widens_locals_stored_with_different_types() {
        // x = c ? ints : text; load x
        let method = method_with(
            "pick",
            "(Z[ILjava/lang/String;)V",
            static_access(),
            vec![
                opcodes::ILOAD_0,
                opcodes::IFEQ,
                0,
                8,
                opcodes::ALOAD_1,
                opcodes::ASTORE_3,
                opcodes::GOTO,
                0,
                5,
                opcodes::ALOAD_2,
                opcodes::ASTORE_3,
                opcodes::ALOAD_3,
                opcodes::POP,
                opcodes::RETURN,
            ],
        );

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        assert_eq!(steps[7], vec![(OBJECT.to_string(), None)]);
    }

    #[test]
    fn join_widens_stack_entries_pushed_with_different_types() {
        // push c ? ints : text; pop
        let method = method_with(
            "pick",
            "(Z[ILjava/lang/String;)V",
            static_access(),
            vec![
                opcodes::ILOAD_0,
                opcodes::IFEQ,
                0,
                7,
                opcodes::ALOAD_1,
                opcodes::GOTO,
                0,
                4,
                opcodes::ALOAD_2,
                opcodes::POP,
                opcodes::RETURN,
            ],
        );
        let instructions = decode(&method.bytecode, &ConstantPool::default()).expect("decode");
        let mut pre_at_join = None;

        simulate("com/example/App", &method, &instructions, |inst, pre, _| {
            if inst.offset == 9 {
                pre_at_join = pre.item(0).map(|value| value.signature.clone());
            }
        })
        .expect("simulate");

        assert_eq!(pre_at_join.as_deref(), Some(OBJECT));
    }

    #[test]
    fn branch_target_uses_locals_of_its_own_branch() {
        // if (c) { x = ints; return; } load x
        let method = method_with(
            "pick",
            "(Z[ILjava/lang/String;)V",
            static_access(),
            vec![
                opcodes::ILOAD_0,
                opcodes::IFEQ,
                0,
                6,
                opcodes::ALOAD_1,
                opcodes::ASTORE_3,
                opcodes::RETURN,
                opcodes::ALOAD_3,
                opcodes::POP,
                opcodes::RETURN,
            ],
        );

        let steps = trace(&method, &ConstantPool::default()).expect("simulate");

        // Slot 3 was never stored on the path through ifeq.
        assert_eq!(steps[5], vec![(OBJECT.to_string(), None)]);
    }

    #[test]
    fn balanced_method_ends_empty_within_peak() {
        let mut pool = PoolBuilder::new();
        let print = pool.method_ref("java/io/PrintStream", "println", "(J)V");
        let out = pool.field_ref("java/lang/System", "out", "Ljava/io/PrintStream;");
        let pool = pool.build();
        let [o0, o1] = index_bytes(out);
        let [p0, p1] = index_bytes(print);
        let mut method = static_method(vec![
            opcodes::GETSTATIC,
            o0,
            o1,
            opcodes::LCONST_1,
            opcodes::INVOKEVIRTUAL,
            p0,
            p1,
            opcodes::RETURN,
        ]);
        // What javac declares for System.out.println(1L).
        method.max_stack = 3;
        let instructions = decode(&method.bytecode, &pool).expect("decode");

        let summary =
            simulate("com/example/App", &method, &instructions, |_, _, _| {}).expect("simulate");

        assert_eq!(summary.instruction_count, 4);
        assert_eq!(summary.final_depth, 0);
        assert_eq!(summary.peak_slots, 3);
        assert!(summary.peak_slots <= usize::from(method.max_stack));
    }

    #[test]
    fn replay_is_deterministic() {
        let method = static_method(vec![
            opcodes::ICONST_2,
            opcodes::NEWARRAY,
            opcodes::T_INT,
            opcodes::ARRAYLENGTH,
            opcodes::POP,
            opcodes::RETURN,
        ]);

        let first = trace(&method, &ConstantPool::default()).expect("simulate");
        let second = trace(&method, &ConstantPool::default()).expect("simulate");

        assert_eq!(first, second);
        assert_eq!(first[2], vec![("I".to_string(), None)]);
    }
}
