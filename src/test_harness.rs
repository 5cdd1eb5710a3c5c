use std::collections::HashMap;

use crate::ir::{Constant, ConstantPool, ExceptionHandler, Method, MethodAccess};

/// Builds constant pools for hand-assembled test bytecode, deduplicating entries.
#[derive(Default)]
pub(crate) struct PoolBuilder {
    entries: Vec<Constant>,
    utf8: HashMap<String, u16>,
}

impl PoolBuilder {
    pub(crate) fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            utf8: HashMap::new(),
        }
    }

    fn push(&mut self, constant: Constant) -> u16 {
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        index
    }

    pub(crate) fn utf8(&mut self, value: &str) -> u16 {
        if let Some(index) = self.utf8.get(value) {
            return *index;
        }
        let index = self.push(Constant::Utf8(value.to_string()));
        self.utf8.insert(value.to_string(), index);
        index
    }

    pub(crate) fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.push(Constant::Class { name_index })
    }

    pub(crate) fn integer(&mut self, value: i32) -> u16 {
        self.push(Constant::Integer(value))
    }

    pub(crate) fn long(&mut self, value: i64) -> u16 {
        self.push(Constant::Long(value))
    }

    pub(crate) fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        self.push(Constant::String { string_index })
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.push(Constant::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(Constant::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub(crate) fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.push(Constant::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    pub(crate) fn build(self) -> ConstantPool {
        ConstantPool::new(self.entries)
    }
}

pub(crate) fn instance_access() -> MethodAccess {
    MethodAccess {
        is_public: true,
        is_static: false,
        is_abstract: false,
        is_native: false,
    }
}

pub(crate) fn static_access() -> MethodAccess {
    MethodAccess {
        is_static: true,
        ..instance_access()
    }
}

pub(crate) fn method_with(
    name: &str,
    descriptor: &str,
    access: MethodAccess,
    bytecode: Vec<u8>,
) -> Method {
    Method {
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        access,
        bytecode,
        max_stack: 16,
        exception_handlers: Vec::new(),
    }
}

pub(crate) fn catch_all(start_pc: u32, end_pc: u32, handler_pc: u32) -> ExceptionHandler {
    ExceptionHandler {
        start_pc,
        end_pc,
        handler_pc,
        catch_type: None,
    }
}

/// Big-endian bytes of a constant pool index, for splicing into bytecode.
pub(crate) fn index_bytes(index: u16) -> [u8; 2] {
    index.to_be_bytes()
}
