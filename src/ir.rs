#![allow(dead_code)]

/// Intermediate representation for a parsed JVM class.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) methods: Vec<Method>,
}

/// Intermediate representation for a method and its raw bytecode.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) bytecode: Vec<u8>,
    pub(crate) max_stack: u16,
    pub(crate) exception_handlers: Vec<ExceptionHandler>,
}

impl Method {
    pub(crate) fn id(&self) -> MethodId {
        MethodId {
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
        }
    }

    pub(crate) fn is_static_initializer(&self) -> bool {
        self.access.is_static && self.name == "<clinit>"
    }
}

/// Method access flags used for rule filtering and local seeding.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct MethodAccess {
    pub(crate) is_public: bool,
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_native: bool,
}

/// Exception handler metadata from the Code attribute.
#[derive(Clone, Debug)]
pub(crate) struct ExceptionHandler {
    pub(crate) start_pc: u32,
    pub(crate) end_pc: u32,
    pub(crate) handler_pc: u32,
    pub(crate) catch_type: Option<String>,
}

/// Name and descriptor identifying a method inside its class.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub(crate) struct MethodId {
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

impl MethodId {
    /// `com/example/App.run()V`, the form used in logs and SARIF locations.
    pub(crate) fn qualified(&self, class_name: &str) -> String {
        format!("{class_name}.{}{}", self.name, self.descriptor)
    }
}

/// Constant pool entries the decoder needs to resolve operands.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Constant {
    Unusable,
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class { name_index: u16 },
    String { string_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle,
    MethodType { descriptor_index: u16 },
    Dynamic { name_and_type_index: u16 },
    InvokeDynamic { name_and_type_index: u16 },
}

/// Owned constant pool, indexed the way the class file indexes it (slot 0 unused).
#[derive(Clone, Debug, Default)]
pub(crate) struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub(crate) fn new(entries: Vec<Constant>) -> Self {
        Self { entries }
    }

    pub(crate) fn get(&self, index: u16) -> Option<&Constant> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize)
    }

    pub(crate) fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Utf8(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Option<&str> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => None,
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> Option<(&str, &str)> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Some((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => None,
        }
    }

    /// Resolve a field or method reference into owner, name and descriptor.
    pub(crate) fn member_ref(&self, index: u16) -> Option<MemberRef> {
        let (class_index, name_and_type_index) = match self.get(index)? {
            Constant::FieldRef {
                class_index,
                name_and_type_index,
            }
            | Constant::MethodRef {
                class_index,
                name_and_type_index,
            }
            | Constant::InterfaceMethodRef {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index),
            _ => return None,
        };
        let owner = self.class_name(class_index)?;
        let (name, descriptor) = self.name_and_type(name_and_type_index)?;
        Some(MemberRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        })
    }
}

/// Symbolic reference to a field or method.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) length: u32,
    pub(crate) operand: Operand,
}

/// Decoded operand payload, with constant pool references already resolved.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    None,
    Int(i32),
    Local(u16),
    Increment { local: u16, delta: i16 },
    Branch(u32),
    Switch { default: u32, targets: Vec<u32> },
    Constant(LoadableConstant),
    Field(MemberRef),
    Method(MemberRef),
    InvokeDynamic { name: String, descriptor: String },
    Class(String),
    ArrayType(u8),
    MultiArray { class: String, dimensions: u8 },
}

/// Value loaded by `ldc`, `ldc_w` and `ldc2_w`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum LoadableConstant {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    String(String),
    Class(String),
    MethodType(String),
    MethodHandle,
    Dynamic(String),
}

impl Instruction {
    pub(crate) fn branch_targets(&self) -> Vec<u32> {
        match &self.operand {
            Operand::Branch(target) => vec![*target],
            Operand::Switch { default, targets } => {
                let mut all = Vec::with_capacity(targets.len() + 1);
                all.push(*default);
                all.extend(targets.iter().copied());
                all
            }
            _ => Vec::new(),
        }
    }

    pub(crate) fn method_ref(&self) -> Option<&MemberRef> {
        match &self.operand {
            Operand::Method(member) => Some(member),
            _ => None,
        }
    }
}
