use anyhow::{Context, Result, bail};

use crate::ir::{CallSite, ClassKind, ClassRecord, MethodRecord};

const MAGIC: u32 = 0xCAFE_BABE;
const ACC_INTERFACE: u16 = 0x0200;

const INVOKEVIRTUAL: u8 = 0xb6;
const INVOKESPECIAL: u8 = 0xb7;
const INVOKESTATIC: u8 = 0xb8;
const INVOKEINTERFACE: u8 = 0xb9;
const INVOKEDYNAMIC: u8 = 0xba;

/// Bootstrap whose call sites are synthetic string concatenation; never a
/// real dispatch target.
const CONCAT_BOOTSTRAP: &str = "makeConcatWithConstants";

/// Check the 4-byte class file signature without parsing further.
pub(crate) fn has_class_magic(data: &[u8]) -> bool {
    data.len() >= 4 && u32::from_be_bytes([data[0], data[1], data[2], data[3]]) == MAGIC
}

/// Parse class file bytes into a [`ClassRecord`].
///
/// Only the metadata the analysis consumes is decoded: names, kind,
/// superclass, interfaces, and per-method annotations plus call sites. Any
/// structural defect is an error for this entry alone; the caller decides
/// whether to skip it.
pub(crate) fn parse_class(data: &[u8]) -> Result<ClassRecord> {
    let mut reader = Reader::new(data);
    if reader.u32()? != MAGIC {
        bail!("invalid class file magic");
    }
    let _minor = reader.u16()?;
    let _major = reader.u16()?;

    let pool = ConstantPool::parse(&mut reader).context("parse constant pool")?;

    let access_flags = reader.u16()?;
    let this_class = reader.u16()?;
    let super_class = reader.u16()?;
    let name = pool.class_name(this_class).context("resolve class name")?;
    let super_name = if super_class == 0 {
        None
    } else {
        Some(pool.class_name(super_class).context("resolve super class name")?)
    };

    let interface_count = reader.u16()? as usize;
    let mut interfaces = Vec::with_capacity(interface_count);
    for _ in 0..interface_count {
        let index = reader.u16()?;
        interfaces.push(pool.class_name(index).context("resolve interface name")?);
    }

    skip_fields(&mut reader).context("skip field table")?;
    let raw_methods = parse_methods(&mut reader, &pool).context("parse method table")?;
    let bootstraps = parse_class_attributes(&mut reader, &pool).context("parse class attributes")?;

    let mut methods = Vec::with_capacity(raw_methods.len());
    for raw in raw_methods {
        let calls = match &raw.code {
            Some(code) => extract_calls(code, &pool, &bootstraps)
                .with_context(|| format!("parse bytecode of {}.{}", name, raw.name))?,
            None => Vec::new(),
        };
        methods.push(MethodRecord {
            name: raw.name,
            descriptor: raw.descriptor,
            annotations: raw.annotations,
            calls,
        });
    }

    let kind = if access_flags & ACC_INTERFACE != 0 {
        ClassKind::Interface
    } else {
        ClassKind::Class
    };

    Ok(ClassRecord {
        name,
        kind,
        super_name,
        interfaces,
        methods,
    })
}

/// Cursor over class file bytes with bounds-checked big-endian reads.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn u8(&mut self) -> Result<u8> {
        let byte = *self
            .data
            .get(self.offset)
            .context("class file out of bounds")?;
        self.offset += 1;
        Ok(byte)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .context("class file out of bounds")?;
        let slice = self
            .data
            .get(self.offset..end)
            .context("class file out of bounds")?;
        self.offset = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<()> {
        self.bytes(len)?;
        Ok(())
    }
}

/// Constant pool entries the analysis needs; everything else is `Other`.
enum Constant {
    Utf8(String),
    Class { name_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { reference_index: u16 },
    InvokeDynamic { bootstrap_index: u16, name_and_type_index: u16 },
    Other,
}

struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    fn parse(reader: &mut Reader) -> Result<Self> {
        let count = reader.u16()? as usize;
        let mut entries = Vec::with_capacity(count);
        // Index 0 is unused by the format.
        entries.push(Constant::Other);
        while entries.len() < count {
            let tag = reader.u8()?;
            let entry = match tag {
                1 => {
                    let len = reader.u16()? as usize;
                    let bytes = reader.bytes(len)?;
                    Constant::Utf8(String::from_utf8_lossy(bytes).into_owned())
                }
                7 => Constant::Class {
                    name_index: reader.u16()?,
                },
                // invokeinterface call sites carry InterfaceMethodref; both
                // shapes resolve identically here.
                10 | 11 => Constant::MethodRef {
                    class_index: reader.u16()?,
                    name_and_type_index: reader.u16()?,
                },
                12 => Constant::NameAndType {
                    name_index: reader.u16()?,
                    descriptor_index: reader.u16()?,
                },
                15 => {
                    let _kind = reader.u8()?;
                    Constant::MethodHandle {
                        reference_index: reader.u16()?,
                    }
                }
                18 => Constant::InvokeDynamic {
                    bootstrap_index: reader.u16()?,
                    name_and_type_index: reader.u16()?,
                },
                3 | 4 | 9 | 17 => {
                    reader.skip(4)?;
                    Constant::Other
                }
                8 | 16 | 19 | 20 => {
                    reader.skip(2)?;
                    Constant::Other
                }
                5 | 6 => {
                    // Longs and doubles occupy two pool slots.
                    reader.skip(8)?;
                    entries.push(Constant::Other);
                    Constant::Other
                }
                _ => bail!("unsupported constant pool tag: {tag}"),
            };
            entries.push(entry);
        }
        Ok(Self { entries })
    }

    fn get(&self, index: u16) -> Result<&Constant> {
        self.entries
            .get(index as usize)
            .context("constant pool index out of bounds")
    }

    fn utf8(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Utf8(value) => Ok(value.clone()),
            _ => bail!("expected utf8 constant at index {index}"),
        }
    }

    fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => bail!("expected class constant at index {index}"),
        }
    }

    /// Resolve a Methodref-shaped entry to its `(owner, name)` pair.
    fn method_ref(&self, index: u16) -> Result<(String, String)> {
        let Constant::MethodRef {
            class_index,
            name_and_type_index,
        } = self.get(index)?
        else {
            bail!("expected method reference at index {index}");
        };
        let owner = self.class_name(*class_index).context("resolve call owner")?;
        let Constant::NameAndType { name_index, .. } = self.get(*name_and_type_index)? else {
            bail!("expected name-and-type at index {name_and_type_index}");
        };
        let name = self.utf8(*name_index).context("resolve call name")?;
        Ok((owner, name))
    }

    /// `(owner, name)` behind a MethodHandle entry, when it points at a
    /// method reference at all (field handles do not).
    fn handle_target(&self, index: u16) -> Option<(String, String)> {
        match self.get(index).ok()? {
            Constant::MethodHandle { reference_index } => self.method_ref(*reference_index).ok(),
            _ => None,
        }
    }
}

/// Method metadata before call-site extraction (the bootstrap table needed
/// for invokedynamic arrives only after the method table).
struct RawMethod {
    name: String,
    descriptor: String,
    annotations: Vec<String>,
    code: Option<Vec<u8>>,
}

/// One entry of the BootstrapMethods class attribute.
struct BootstrapEntry {
    method_ref: u16,
    arguments: Vec<u16>,
}

fn skip_fields(reader: &mut Reader) -> Result<()> {
    let count = reader.u16()?;
    for _ in 0..count {
        reader.skip(6)?;
        skip_attributes(reader)?;
    }
    Ok(())
}

fn skip_attributes(reader: &mut Reader) -> Result<()> {
    let count = reader.u16()?;
    for _ in 0..count {
        reader.skip(2)?;
        let length = reader.u32()? as usize;
        reader.skip(length)?;
    }
    Ok(())
}

fn parse_methods(reader: &mut Reader, pool: &ConstantPool) -> Result<Vec<RawMethod>> {
    let count = reader.u16()? as usize;
    let mut methods = Vec::with_capacity(count);
    for _ in 0..count {
        let _access_flags = reader.u16()?;
        let name = pool.utf8(reader.u16()?).context("resolve method name")?;
        let descriptor = pool
            .utf8(reader.u16()?)
            .context("resolve method descriptor")?;

        let mut annotations = Vec::new();
        let mut code = None;
        let attribute_count = reader.u16()?;
        for _ in 0..attribute_count {
            let attribute_name = pool.utf8(reader.u16()?).context("resolve attribute name")?;
            let length = reader.u32()? as usize;
            match attribute_name.as_str() {
                "Code" => {
                    let _max_stack = reader.u16()?;
                    let _max_locals = reader.u16()?;
                    let code_length = reader.u32()? as usize;
                    code = Some(reader.bytes(code_length)?.to_vec());
                    let exception_count = reader.u16()? as usize;
                    reader.skip(exception_count * 8)?;
                    skip_attributes(reader)?;
                }
                "RuntimeVisibleAnnotations" => {
                    let annotation_count = reader.u16()?;
                    for _ in 0..annotation_count {
                        annotations.push(read_annotation(reader, pool)?);
                    }
                }
                _ => reader.skip(length)?,
            }
        }

        methods.push(RawMethod {
            name,
            descriptor,
            annotations,
            code,
        });
    }
    Ok(methods)
}

/// Read one annotation structure and return its type descriptor; element
/// values are skipped structurally.
fn read_annotation(reader: &mut Reader, pool: &ConstantPool) -> Result<String> {
    let type_index = reader.u16()?;
    let pair_count = reader.u16()?;
    for _ in 0..pair_count {
        let _element_name = reader.u16()?;
        skip_element_value(reader, pool)?;
    }
    pool.utf8(type_index).context("resolve annotation type")
}

fn skip_element_value(reader: &mut Reader, pool: &ConstantPool) -> Result<()> {
    let tag = reader.u8()?;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' | b's' | b'c' => reader.skip(2)?,
        b'e' => reader.skip(4)?,
        b'@' => {
            read_annotation(reader, pool)?;
        }
        b'[' => {
            let count = reader.u16()?;
            for _ in 0..count {
                skip_element_value(reader, pool)?;
            }
        }
        _ => bail!("unsupported annotation element tag: {}", tag as char),
    }
    Ok(())
}

/// Class-level attributes: only BootstrapMethods is decoded.
fn parse_class_attributes(reader: &mut Reader, pool: &ConstantPool) -> Result<Vec<BootstrapEntry>> {
    let mut bootstraps = Vec::new();
    let count = reader.u16()?;
    for _ in 0..count {
        let attribute_name = pool.utf8(reader.u16()?).context("resolve attribute name")?;
        let length = reader.u32()? as usize;
        if attribute_name == "BootstrapMethods" {
            let entry_count = reader.u16()? as usize;
            for _ in 0..entry_count {
                let method_ref = reader.u16()?;
                let argument_count = reader.u16()? as usize;
                let mut arguments = Vec::with_capacity(argument_count);
                for _ in 0..argument_count {
                    arguments.push(reader.u16()?);
                }
                bootstraps.push(BootstrapEntry {
                    method_ref,
                    arguments,
                });
            }
        } else {
            reader.skip(length)?;
        }
    }
    Ok(bootstraps)
}

/// Walk bytecode and collect call sites in instruction order.
fn extract_calls(
    code: &[u8],
    pool: &ConstantPool,
    bootstraps: &[BootstrapEntry],
) -> Result<Vec<CallSite>> {
    let mut calls = Vec::new();
    let mut offset = 0usize;
    while offset < code.len() {
        let opcode = code[offset];
        let width = opcode_width(code, offset)?;
        if width == 0 || offset + width > code.len() {
            bail!("invalid instruction length at offset {offset}");
        }
        match opcode {
            INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC | INVOKEINTERFACE => {
                let index = operand_u16(code, offset + 1)?;
                let (owner, name) = pool.method_ref(index).context("resolve call site")?;
                calls.push(CallSite::Direct { owner, name });
            }
            INVOKEDYNAMIC => {
                let index = operand_u16(code, offset + 1)?;
                calls.push(resolve_dynamic_site(pool, bootstraps, index));
            }
            _ => {}
        }
        offset += width;
    }
    Ok(calls)
}

/// Map an invokedynamic constant to the implementation handle its bootstrap
/// carries. Concatenation bootstraps and shapes without a method handle in
/// argument position 1 stay opaque.
fn resolve_dynamic_site(
    pool: &ConstantPool,
    bootstraps: &[BootstrapEntry],
    index: u16,
) -> CallSite {
    let Ok(Constant::InvokeDynamic {
        bootstrap_index, ..
    }) = pool.get(index)
    else {
        return CallSite::Opaque;
    };
    let Some(entry) = bootstraps.get(*bootstrap_index as usize) else {
        return CallSite::Opaque;
    };
    match pool.handle_target(entry.method_ref) {
        Some((_, bootstrap_name)) if bootstrap_name == CONCAT_BOOTSTRAP => {
            return CallSite::Opaque;
        }
        Some(_) => {}
        None => return CallSite::Opaque,
    }
    let Some(&argument) = entry.arguments.get(1) else {
        return CallSite::Opaque;
    };
    match pool.handle_target(argument) {
        Some((owner, name)) => CallSite::Dynamic { owner, name },
        None => CallSite::Opaque,
    }
}

fn operand_u16(code: &[u8], offset: usize) -> Result<u16> {
    let slice = code
        .get(offset..offset + 2)
        .context("bytecode operand out of bounds")?;
    Ok(u16::from_be_bytes([slice[0], slice[1]]))
}

fn operand_i32(code: &[u8], offset: usize) -> Result<i32> {
    let slice = code
        .get(offset..offset + 4)
        .context("bytecode operand out of bounds")?;
    Ok(i32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

/// Instruction width in bytes, including the opcode itself.
fn opcode_width(code: &[u8], offset: usize) -> Result<usize> {
    let opcode = code[offset];
    let width = match opcode {
        0x00..=0x0f => 1,
        0x10 => 2,
        0x11 => 3,
        0x12 => 2,
        0x13 | 0x14 => 3,
        0x15..=0x19 => 2,
        0x1a..=0x35 => 1,
        0x36..=0x3a => 2,
        0x3b..=0x83 => 1,
        0x84 => 3,
        0x85..=0x98 => 1,
        0x99..=0xa8 => 3,
        0xa9 => 2,
        0xaa => tableswitch_width(code, offset)?,
        0xab => lookupswitch_width(code, offset)?,
        0xac..=0xb1 => 1,
        0xb2..=0xb5 => 3,
        INVOKEVIRTUAL | INVOKESPECIAL | INVOKESTATIC => 3,
        INVOKEINTERFACE | INVOKEDYNAMIC => 5,
        0xbb => 3,
        0xbc => 2,
        0xbd => 3,
        0xbe | 0xbf => 1,
        0xc0 | 0xc1 => 3,
        0xc2 | 0xc3 => 1,
        0xc4 => wide_width(code, offset)?,
        0xc5 => 4,
        0xc6 | 0xc7 => 3,
        0xc8 | 0xc9 => 5,
        0xca => 1,
        _ => bail!("unsupported opcode 0x{opcode:02x}"),
    };
    Ok(width)
}

fn switch_padding(offset: usize) -> usize {
    (4 - ((offset + 1) % 4)) % 4
}

fn tableswitch_width(code: &[u8], offset: usize) -> Result<usize> {
    let padding = switch_padding(offset);
    let base = offset + 1 + padding;
    let low = operand_i32(code, base + 4)?;
    let high = operand_i32(code, base + 8)?;
    let count = high
        .checked_sub(low)
        .and_then(|value| value.checked_add(1))
        .filter(|value| *value >= 0)
        .context("invalid tableswitch range")?;
    Ok(1 + padding + 12 + (count as usize) * 4)
}

fn lookupswitch_width(code: &[u8], offset: usize) -> Result<usize> {
    let padding = switch_padding(offset);
    let base = offset + 1 + padding;
    let pairs = operand_i32(code, base + 4)?;
    if pairs < 0 {
        bail!("invalid lookupswitch pair count");
    }
    Ok(1 + padding + 8 + (pairs as usize) * 8)
}

fn wide_width(code: &[u8], offset: usize) -> Result<usize> {
    let widened = code
        .get(offset + 1)
        .copied()
        .context("missing widened opcode")?;
    if widened == 0x84 { Ok(6) } else { Ok(4) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::ClassFileBuilder;

    #[test]
    fn parses_names_kind_and_interfaces() {
        let bytes = ClassFileBuilder::new("app/Service", "app/Base")
            .implements(&["app/Worker"])
            .finish();

        let record = parse_class(&bytes).expect("parse class");

        assert_eq!(record.name, "app/Service");
        assert_eq!(record.kind, ClassKind::Class);
        assert_eq!(record.super_name.as_deref(), Some("app/Base"));
        assert_eq!(record.interfaces, vec!["app/Worker".to_string()]);
    }

    #[test]
    fn interface_flag_sets_kind() {
        let bytes = ClassFileBuilder::interface("app/Worker").finish();

        let record = parse_class(&bytes).expect("parse interface");

        assert!(record.is_interface());
        assert_eq!(record.kind, ClassKind::Interface);
    }

    #[test]
    fn extracts_direct_call_sites_in_order() {
        let mut builder = ClassFileBuilder::new("app/Controller", "java/lang/Object");
        let first = builder.method_ref("app/Service", "process", "()V");
        let second = builder.method_ref("app/Repo", "find", "()V");
        let code = [
            vec![0xb8, (first >> 8) as u8, first as u8],
            vec![0xb8, (second >> 8) as u8, second as u8],
            vec![0xb1],
        ]
        .concat();
        builder.method("handle", "()V", code);
        let bytes = builder.finish();

        let record = parse_class(&bytes).expect("parse class");
        let method = &record.methods[0];

        assert_eq!(
            method.calls,
            vec![
                CallSite::Direct {
                    owner: "app/Service".to_string(),
                    name: "process".to_string(),
                },
                CallSite::Direct {
                    owner: "app/Repo".to_string(),
                    name: "find".to_string(),
                },
            ]
        );
    }

    #[test]
    fn methods_without_code_have_no_calls() {
        let mut builder = ClassFileBuilder::interface("app/Worker");
        builder.abstract_method("run", "()V");
        let bytes = builder.finish();

        let record = parse_class(&bytes).expect("parse interface");

        assert_eq!(record.methods.len(), 1);
        assert!(record.methods[0].calls.is_empty());
    }

    #[test]
    fn reads_visible_annotation_descriptors() {
        let mut builder = ClassFileBuilder::new("app/Controller", "java/lang/Object");
        builder.annotated_method("handle", "()V", vec![0xb1], &["Lapp/web/GetMapping;"]);
        let bytes = builder.finish();

        let record = parse_class(&bytes).expect("parse class");

        assert_eq!(
            record.methods[0].annotations,
            vec!["Lapp/web/GetMapping;".to_string()]
        );
    }

    #[test]
    fn resolves_invokedynamic_through_bootstrap_handle() {
        let mut builder = ClassFileBuilder::new("app/Controller", "java/lang/Object");
        let indy = builder.invoke_dynamic(
            "java/lang/invoke/LambdaMetafactory",
            "metafactory",
            "app/Controller",
            "lambda$handle$0",
        );
        let code = vec![0xba, (indy >> 8) as u8, indy as u8, 0, 0, 0xb1];
        builder.method("handle", "()V", code);
        let bytes = builder.finish();

        let record = parse_class(&bytes).expect("parse class");

        assert_eq!(
            record.methods[0].calls,
            vec![CallSite::Dynamic {
                owner: "app/Controller".to_string(),
                name: "lambda$handle$0".to_string(),
            }]
        );
    }

    #[test]
    fn concat_bootstrap_is_opaque() {
        let mut builder = ClassFileBuilder::new("app/Controller", "java/lang/Object");
        let indy = builder.invoke_dynamic(
            "java/lang/invoke/StringConcatFactory",
            "makeConcatWithConstants",
            "app/Controller",
            "irrelevant",
        );
        let code = vec![0xba, (indy >> 8) as u8, indy as u8, 0, 0, 0xb1];
        builder.method("handle", "()V", code);
        let bytes = builder.finish();

        let record = parse_class(&bytes).expect("parse class");

        assert_eq!(record.methods[0].calls, vec![CallSite::Opaque]);
    }

    #[test]
    fn truncated_class_is_an_error() {
        let bytes = ClassFileBuilder::new("app/Service", "java/lang/Object").finish();

        let result = parse_class(&bytes[..bytes.len() / 2]);

        assert!(result.is_err());
    }

    #[test]
    fn magic_check_rejects_other_files() {
        assert!(!has_class_magic(b"PK\x03\x04rest-of-a-zip"));
        assert!(!has_class_magic(b"\xca\xfe"));
        assert!(has_class_magic(&[0xca, 0xfe, 0xba, 0xbe, 0, 0]));
    }
}
