use anyhow::{Context, Result};

/// Parameter and return types of a method descriptor, as field descriptors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct MethodDescriptor {
    pub(crate) parameters: Vec<String>,
    /// `None` for `V`.
    pub(crate) return_type: Option<String>,
}

pub(crate) fn parse_method_descriptor(descriptor: &str) -> Result<MethodDescriptor> {
    let rest = descriptor
        .strip_prefix('(')
        .with_context(|| format!("method descriptor must start with '(': {descriptor}"))?;
    let close = rest
        .find(')')
        .with_context(|| format!("unterminated parameter list: {descriptor}"))?;
    let (mut params, return_part) = (&rest[..close], &rest[close + 1..]);

    let mut parameters = Vec::new();
    while !params.is_empty() {
        let len = field_descriptor_len(params)
            .with_context(|| format!("invalid parameter in {descriptor}"))?;
        parameters.push(params[..len].to_string());
        params = &params[len..];
    }

    let return_type = if return_part == "V" {
        None
    } else {
        let len = field_descriptor_len(return_part)
            .with_context(|| format!("invalid return type in {descriptor}"))?;
        if len != return_part.len() {
            anyhow::bail!("trailing characters after return type: {descriptor}");
        }
        Some(return_part.to_string())
    };

    Ok(MethodDescriptor {
        parameters,
        return_type,
    })
}

/// Length in bytes of the leading field descriptor of `input`.
fn field_descriptor_len(input: &str) -> Result<usize> {
    let bytes = input.as_bytes();
    let mut index = 0;
    while bytes.get(index) == Some(&b'[') {
        index += 1;
    }
    match bytes.get(index) {
        Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => Ok(index + 1),
        Some(b'L') => {
            let end = input[index..]
                .find(';')
                .with_context(|| format!("unterminated class type: {input}"))?;
            if end == 1 {
                anyhow::bail!("empty class name: {input}");
            }
            Ok(index + end + 1)
        }
        Some(other) => anyhow::bail!("unexpected descriptor character '{}'", *other as char),
        None => anyhow::bail!("missing field type: {input}"),
    }
}

/// Whether a descriptor names a primitive (non-reference) type.
pub(crate) fn is_primitive(signature: &str) -> bool {
    matches!(
        signature,
        "B" | "C" | "D" | "F" | "I" | "J" | "S" | "Z"
    )
}

/// Long and double values take two slots on the JVM operand stack.
pub(crate) fn is_category2(signature: &str) -> bool {
    matches!(signature, "J" | "D")
}

/// Element type of an array descriptor, if it is one.
pub(crate) fn array_element(signature: &str) -> Option<&str> {
    signature.strip_prefix('[')
}

/// Turn an internal class name, as found in `CONSTANT_Class`, into a field descriptor.
/// Array classes are already written in descriptor form.
pub(crate) fn class_to_descriptor(internal_name: &str) -> String {
    if internal_name.starts_with('[') {
        internal_name.to_string()
    } else {
        format!("L{internal_name};")
    }
}
