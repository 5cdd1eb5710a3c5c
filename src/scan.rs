use std::fs;
use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use jclassfile::attributes::Attribute;
use jclassfile::class_file::{self, ClassFile};
use jclassfile::constant_pool::ConstantPool as RawConstant;
use log::{info, warn};
use serde_json::Value;
use serde_sarif::sarif::{Artifact, ArtifactLocation, ArtifactRoles};
use zip::ZipArchive;

use crate::ir::{Class, Constant, ConstantPool, ExceptionHandler, Method, MethodAccess};

const ACC_PUBLIC: u16 = 0x0001;
const ACC_STATIC: u16 = 0x0008;
const ACC_NATIVE: u16 = 0x0100;
const ACC_ABSTRACT: u16 = 0x0400;

/// Parsed classes plus the SARIF artifacts they were read from.
pub(crate) struct ScanOutput {
    pub(crate) classes: Vec<Class>,
    pub(crate) artifacts: Vec<Artifact>,
}

impl ScanOutput {
    pub(crate) fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn method_count(&self) -> usize {
        self.classes.iter().map(|class| class.methods.len()).sum()
    }
}

/// Load every class reachable from `input`: a `.class` file, a `.jar`, or a directory.
pub(crate) fn scan_inputs(input: &Path) -> Result<ScanOutput> {
    if !input.exists() {
        anyhow::bail!("input not found: {}", input.display());
    }
    let mut output = ScanOutput {
        classes: Vec::new(),
        artifacts: Vec::new(),
    };
    scan_path(input, true, &mut output)?;
    if output.classes.is_empty() {
        anyhow::bail!("no parseable class files under {}", input.display());
    }
    info!(
        "loaded {} classes ({} methods) from {}",
        output.class_count(),
        output.method_count(),
        input.display()
    );
    Ok(output)
}

fn scan_path(path: &Path, is_input: bool, output: &mut ScanOutput) -> Result<()> {
    if path.is_dir() {
        return scan_dir(path, output);
    }

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
    let roles = if is_input {
        Some(vec![
            serde_json::to_value(ArtifactRoles::AnalysisTarget)
                .context("failed to serialize artifact role")?,
        ])
    } else {
        None
    };

    match extension {
        "class" if is_module_info(&path.to_string_lossy()) => Ok(()),
        "class" => scan_class_file(path, is_input, roles, output),
        "jar" => scan_jar_file(path, roles, output),
        _ if is_input => anyhow::bail!("unsupported input file: {}", path.display()),
        _ => Ok(()),
    }
}

fn scan_dir(path: &Path, output: &mut ScanOutput) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(path)
        .with_context(|| format!("failed to read directory {}", path.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", path.display()))?;
        entries.push(entry.path());
    }

    // Directory listings come back in platform order.
    entries.sort_by(|a, b| path_key(a).cmp(&path_key(b)));

    for entry in entries {
        if entry.is_dir() {
            scan_dir(&entry, output)?;
        } else {
            scan_path(&entry, false, output)?;
        }
    }

    Ok(())
}

fn scan_class_file(
    path: &Path,
    is_input: bool,
    roles: Option<Vec<Value>>,
    output: &mut ScanOutput,
) -> Result<()> {
    let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let class = match load_class(&data) {
        Ok(class) => class,
        Err(err) if is_input => {
            return Err(err.context(format!("failed to parse {}", path.display())));
        }
        Err(err) => {
            warn!("skipping {}: {err:#}", path.display());
            return Ok(());
        }
    };
    output.classes.push(class);
    push_artifact(path_to_uri(path), data.len() as u64, None, roles, output);
    Ok(())
}

fn scan_jar_file(path: &Path, roles: Option<Vec<Value>>, output: &mut ScanOutput) -> Result<()> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut archive =
        ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))?;

    let jar_len = fs::metadata(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .len();
    let jar_index = push_artifact(path_to_uri(path), jar_len, None, roles, output);

    let mut entry_names = Vec::new();
    for index in 0..archive.len() {
        let entry = match archive.by_index(index) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("skipping entry {index} of {}: {err}", path.display());
                continue;
            }
        };
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if name.ends_with(".class") && !is_module_info(&name) {
            entry_names.push(name);
        }
    }

    entry_names.sort();

    for name in entry_names {
        let data = match read_entry(&mut archive, &name) {
            Ok(data) => data,
            Err(err) => {
                warn!("skipping {}:{}: {err:#}", path.display(), name);
                continue;
            }
        };
        match load_class(&data) {
            Ok(class) => {
                output.classes.push(class);
                let entry_uri = jar_entry_uri(path, &name);
                push_artifact(entry_uri, data.len() as u64, Some(jar_index), None, output);
            }
            Err(err) => warn!("skipping {}:{}: {err:#}", path.display(), name),
        }
    }

    Ok(())
}

fn read_entry(archive: &mut ZipArchive<fs::File>, name: &str) -> Result<Vec<u8>> {
    let mut entry = archive.by_name(name).context("failed to open entry")?;
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .context("failed to read entry")?;
    Ok(data)
}

fn is_module_info(name: &str) -> bool {
    name.ends_with("module-info.class")
}

/// Parse class file bytes into the analysis model.
pub(crate) fn load_class(data: &[u8]) -> Result<Class> {
    let parsed = class_file::parse(data).context("invalid class file")?;
    convert_class(&parsed)
}

fn convert_class(parsed: &ClassFile) -> Result<Class> {
    let constant_pool = convert_pool(parsed.constant_pool());
    let name = constant_pool
        .class_name(parsed.this_class())
        .context("this_class does not name a class")?
        .to_string();

    let mut methods = Vec::new();
    for info in parsed.methods() {
        let method_name = constant_pool
            .utf8(info.name_index())
            .with_context(|| format!("{name}: method name is not a UTF-8 constant"))?
            .to_string();
        let descriptor = constant_pool
            .utf8(info.descriptor_index())
            .with_context(|| format!("{name}.{method_name}: descriptor is not a UTF-8 constant"))?
            .to_string();
        let flags = info.access_flags().bits();
        let access = MethodAccess {
            is_public: flags & ACC_PUBLIC != 0,
            is_static: flags & ACC_STATIC != 0,
            is_abstract: flags & ACC_ABSTRACT != 0,
            is_native: flags & ACC_NATIVE != 0,
        };

        let mut method = Method {
            name: method_name,
            descriptor,
            access,
            bytecode: Vec::new(),
            max_stack: 0,
            exception_handlers: Vec::new(),
        };
        for attribute in info.attributes() {
            if let Attribute::Code {
                max_stack,
                code,
                exception_table,
                ..
            } = attribute
            {
                method.max_stack = *max_stack;
                method.bytecode = code.clone();
                method.exception_handlers = exception_table
                    .iter()
                    .map(|record| ExceptionHandler {
                        start_pc: u32::from(record.start_pc()),
                        end_pc: u32::from(record.end_pc()),
                        handler_pc: u32::from(record.handler_pc()),
                        catch_type: match record.catch_type() {
                            0 => None,
                            index => constant_pool.class_name(index).map(str::to_string),
                        },
                    })
                    .collect();
            }
        }
        methods.push(method);
    }

    Ok(Class {
        name,
        constant_pool,
        methods,
    })
}

/// Entries the analysis never reads (modules, packages, method handles)
/// keep their slot but carry no data.
fn convert_pool(raw: &[RawConstant]) -> ConstantPool {
    let mut entries = Vec::with_capacity(raw.len() + 1);
    if !matches!(raw.first(), Some(RawConstant::Empty)) {
        entries.push(Constant::Unusable);
    }
    for constant in raw {
        let converted = match constant {
            RawConstant::Utf8 { value } => Constant::Utf8(value.clone()),
            RawConstant::Integer { value } => Constant::Integer(*value),
            RawConstant::Float { value } => Constant::Float(*value),
            RawConstant::Long { value } => Constant::Long(*value),
            RawConstant::Double { value } => Constant::Double(*value),
            RawConstant::Class { name_index } => Constant::Class {
                name_index: *name_index,
            },
            RawConstant::String { string_index } => Constant::String {
                string_index: *string_index,
            },
            RawConstant::Fieldref {
                class_index,
                name_and_type_index,
            } => Constant::FieldRef {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            },
            RawConstant::Methodref {
                class_index,
                name_and_type_index,
            } => Constant::MethodRef {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            },
            RawConstant::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => Constant::InterfaceMethodRef {
                class_index: *class_index,
                name_and_type_index: *name_and_type_index,
            },
            RawConstant::NameAndType {
                name_index,
                descriptor_index,
            } => Constant::NameAndType {
                name_index: *name_index,
                descriptor_index: *descriptor_index,
            },
            RawConstant::MethodHandle { .. } => Constant::MethodHandle,
            RawConstant::MethodType { descriptor_index } => Constant::MethodType {
                descriptor_index: *descriptor_index,
            },
            RawConstant::Dynamic {
                name_and_type_index,
                ..
            } => Constant::Dynamic {
                name_and_type_index: *name_and_type_index,
            },
            RawConstant::InvokeDynamic {
                name_and_type_index,
                ..
            } => Constant::InvokeDynamic {
                name_and_type_index: *name_and_type_index,
            },
            _ => Constant::Unusable,
        };
        entries.push(converted);
    }
    ConstantPool::new(entries)
}

/// Push an artifact and return its index for parent linkage (e.g., JAR entries).
fn push_artifact(
    uri: String,
    len: u64,
    parent_index: Option<i64>,
    roles: Option<Vec<Value>>,
    output: &mut ScanOutput,
) -> i64 {
    let location = ArtifactLocation::builder().uri(uri).build();
    let artifact = match (parent_index, roles) {
        (Some(parent_index), Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .roles(roles)
            .build(),
        (Some(parent_index), None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .parent_index(parent_index)
            .build(),
        (None, Some(roles)) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .roles(roles)
            .build(),
        (None, None) => Artifact::builder()
            .location(location)
            .length(len as i64)
            .build(),
    };
    let index = output.artifacts.len() as i64;
    output.artifacts.push(artifact);
    index
}

fn path_to_uri(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn jar_entry_uri(jar_path: &Path, entry_name: &str) -> String {
    format!("jar:{}!/{}", jar_path.to_string_lossy(), entry_name)
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes;
    use std::io::Write;
    use tempfile::tempdir;
    use zip::ZipWriter;
    use zip::write::SimpleFileOptions;

    /// Assemble a minimal Java 8 class file with one public method `run()V`.
    fn class_bytes(name: &str, code: &[u8]) -> Vec<u8> {
        fn utf8(out: &mut Vec<u8>, value: &str) {
            out.push(1);
            out.extend_from_slice(&(value.len() as u16).to_be_bytes());
            out.extend_from_slice(value.as_bytes());
        }
        fn class(out: &mut Vec<u8>, name_index: u16) {
            out.push(7);
            out.extend_from_slice(&name_index.to_be_bytes());
        }

        let mut out = Vec::new();
        out.extend_from_slice(&0xCAFE_BABE_u32.to_be_bytes());
        out.extend_from_slice(&0_u16.to_be_bytes());
        out.extend_from_slice(&52_u16.to_be_bytes());

        out.extend_from_slice(&8_u16.to_be_bytes());
        utf8(&mut out, name);
        class(&mut out, 1);
        utf8(&mut out, "java/lang/Object");
        class(&mut out, 3);
        utf8(&mut out, "run");
        utf8(&mut out, "()V");
        utf8(&mut out, "Code");

        out.extend_from_slice(&0x0021_u16.to_be_bytes());
        out.extend_from_slice(&2_u16.to_be_bytes());
        out.extend_from_slice(&4_u16.to_be_bytes());
        out.extend_from_slice(&0_u16.to_be_bytes());
        out.extend_from_slice(&0_u16.to_be_bytes());

        out.extend_from_slice(&1_u16.to_be_bytes());
        out.extend_from_slice(&ACC_PUBLIC.to_be_bytes());
        out.extend_from_slice(&5_u16.to_be_bytes());
        out.extend_from_slice(&6_u16.to_be_bytes());
        out.extend_from_slice(&1_u16.to_be_bytes());
        out.extend_from_slice(&7_u16.to_be_bytes());
        let attribute_len = 2 + 2 + 4 + code.len() as u32 + 2 + 2;
        out.extend_from_slice(&attribute_len.to_be_bytes());
        out.extend_from_slice(&2_u16.to_be_bytes());
        out.extend_from_slice(&1_u16.to_be_bytes());
        out.extend_from_slice(&(code.len() as u32).to_be_bytes());
        out.extend_from_slice(code);
        out.extend_from_slice(&0_u16.to_be_bytes());
        out.extend_from_slice(&0_u16.to_be_bytes());

        out.extend_from_slice(&0_u16.to_be_bytes());
        out
    }

    fn trivial_body() -> Vec<u8> {
        vec![opcodes::ICONST_1, opcodes::POP, opcodes::RETURN]
    }

    #[test]
    fn loads_methods_from_class_file() {
        let dir = tempdir().expect("create temp dir");
        let class_path = dir.path().join("Sample.class");
        fs::write(&class_path, class_bytes("com/example/Sample", &trivial_body()))
            .expect("write class file");

        let result = scan_inputs(&class_path).expect("scan class");

        assert_eq!(result.class_count(), 1);
        assert_eq!(result.artifacts.len(), 1);
        let class = &result.classes[0];
        assert_eq!(class.name, "com/example/Sample");
        assert_eq!(class.methods.len(), 1);
        let method = &class.methods[0];
        assert_eq!(method.name, "run");
        assert_eq!(method.descriptor, "()V");
        assert!(method.access.is_public);
        assert!(!method.access.is_static);
        assert_eq!(method.max_stack, 2);
        assert_eq!(method.bytecode, trivial_body());
    }

    #[test]
    fn scan_inputs_rejects_invalid_class_file() {
        let dir = tempdir().expect("create temp dir");
        let class_path = dir.path().join("bad.class");
        fs::write(&class_path, b"nope").expect("write test class");

        let result = scan_inputs(&class_path);

        assert!(result.is_err());
    }

    #[test]
    fn rejects_missing_and_unsupported_inputs() {
        let dir = tempdir().expect("create temp dir");
        let text_path = dir.path().join("notes.txt");
        fs::write(&text_path, b"hello").expect("write text file");

        assert!(scan_inputs(&dir.path().join("missing.class")).is_err());
        assert!(scan_inputs(&text_path).is_err());
    }

    #[test]
    fn walks_directories_in_sorted_order_and_skips_bad_files() {
        let dir = tempdir().expect("create temp dir");
        let nested = dir.path().join("com").join("example");
        fs::create_dir_all(&nested).expect("create package dirs");
        fs::write(
            nested.join("B.class"),
            class_bytes("com/example/B", &trivial_body()),
        )
        .expect("write B");
        fs::write(
            nested.join("A.class"),
            class_bytes("com/example/A", &trivial_body()),
        )
        .expect("write A");
        fs::write(nested.join("Broken.class"), b"nope").expect("write broken");
        fs::write(nested.join("module-info.class"), b"ignored").expect("write module-info");
        fs::write(dir.path().join("README.md"), b"docs").expect("write readme");

        let result = scan_inputs(dir.path()).expect("scan directory");

        let names: Vec<&str> = result
            .classes
            .iter()
            .map(|class| class.name.as_str())
            .collect();
        assert_eq!(names, vec!["com/example/A", "com/example/B"]);
    }

    #[test]
    fn reads_jar_entries_and_links_them_to_the_jar() {
        let dir = tempdir().expect("create temp dir");
        let jar_path = dir.path().join("sample.jar");
        let file = fs::File::create(&jar_path).expect("create jar");
        let mut writer = ZipWriter::new(file);
        writer
            .start_file("com/example/Second.class", SimpleFileOptions::default())
            .expect("start entry");
        writer
            .write_all(&class_bytes("com/example/Second", &trivial_body()))
            .expect("write entry");
        writer
            .start_file("com/example/First.class", SimpleFileOptions::default())
            .expect("start entry");
        writer
            .write_all(&class_bytes("com/example/First", &trivial_body()))
            .expect("write entry");
        writer
            .start_file("com/example/Corrupt.class", SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(b"nope").expect("write entry");
        writer
            .start_file("META-INF/MANIFEST.MF", SimpleFileOptions::default())
            .expect("start entry");
        writer
            .write_all(b"Manifest-Version: 1.0\n")
            .expect("write entry");
        writer.finish().expect("finish jar");

        let result = scan_inputs(&jar_path).expect("scan jar");

        let names: Vec<&str> = result
            .classes
            .iter()
            .map(|class| class.name.as_str())
            .collect();
        assert_eq!(names, vec!["com/example/First", "com/example/Second"]);
        assert_eq!(result.artifacts.len(), 3);
        let first_uri = result
            .artifacts
            .first()
            .and_then(|artifact| artifact.location.as_ref())
            .and_then(|location| location.uri.as_ref())
            .cloned()
            .expect("artifact uri");
        assert!(first_uri.ends_with("sample.jar"));
        assert_eq!(result.artifacts[1].parent_index, Some(0));
    }

    #[test]
    fn jar_without_classes_is_an_error() {
        let dir = tempdir().expect("create temp dir");
        let jar_path = dir.path().join("empty.jar");
        let file = fs::File::create(&jar_path).expect("create jar");
        let mut writer = ZipWriter::new(file);
        writer
            .start_file("META-INF/MANIFEST.MF", SimpleFileOptions::default())
            .expect("start entry");
        writer
            .write_all(b"Manifest-Version: 1.0\n")
            .expect("write entry");
        writer.finish().expect("finish jar");

        assert!(scan_inputs(&jar_path).is_err());
    }
}
