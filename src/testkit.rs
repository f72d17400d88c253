//! Builders for synthetic class files and archives used across unit tests.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;

const ACC_PUBLIC: u16 = 0x0001;
const ACC_INTERFACE: u16 = 0x0200;
const ACC_ABSTRACT: u16 = 0x0400;

/// Minimal class file writer: just enough of the format for the reader and
/// the resolution logic under test.
pub(crate) struct ClassFileBuilder {
    pool: Vec<CpEntry>,
    access: u16,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    methods: Vec<MethodSpec>,
    bootstraps: Vec<(u16, Vec<u16>)>,
    code_attr: u16,
    annotations_attr: u16,
    bootstraps_attr: u16,
}

struct MethodSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Option<Vec<u8>>,
    annotation_types: Vec<u16>,
}

enum CpEntry {
    Utf8(String),
    Class(u16),
    NameAndType(u16, u16),
    MethodRef(u16, u16),
    MethodHandle(u8, u16),
    InvokeDynamic(u16, u16),
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        Self::with_access(class_name, Some(super_name), ACC_PUBLIC | 0x0020)
    }

    pub(crate) fn interface(name: &str) -> Self {
        Self::with_access(name, Some("java/lang/Object"), ACC_INTERFACE | ACC_ABSTRACT)
    }

    fn with_access(class_name: &str, super_name: Option<&str>, access: u16) -> Self {
        let mut builder = Self {
            pool: Vec::new(),
            access,
            this_class: 0,
            super_class: 0,
            interfaces: Vec::new(),
            methods: Vec::new(),
            bootstraps: Vec::new(),
            code_attr: 0,
            annotations_attr: 0,
            bootstraps_attr: 0,
        };
        builder.code_attr = builder.utf8("Code");
        builder.annotations_attr = builder.utf8("RuntimeVisibleAnnotations");
        builder.bootstraps_attr = builder.utf8("BootstrapMethods");
        builder.this_class = builder.class(class_name);
        builder.super_class = match super_name {
            Some(name) => builder.class(name),
            None => 0,
        };
        builder
    }

    pub(crate) fn implements(mut self, interfaces: &[&str]) -> Self {
        for name in interfaces {
            let index = self.class(name);
            self.interfaces.push(index);
        }
        self
    }

    pub(crate) fn utf8(&mut self, value: &str) -> u16 {
        self.pool.push(CpEntry::Utf8(value.to_string()));
        self.pool.len() as u16
    }

    pub(crate) fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.pool.push(CpEntry::Class(name_index));
        self.pool.len() as u16
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.pool
            .push(CpEntry::NameAndType(name_index, descriptor_index));
        self.pool.len() as u16
    }

    pub(crate) fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(owner);
        let name_and_type = self.name_and_type(name, descriptor);
        self.pool.push(CpEntry::MethodRef(class_index, name_and_type));
        self.pool.len() as u16
    }

    /// invokestatic instruction bytes against a fresh method reference.
    pub(crate) fn call(&mut self, owner: &str, name: &str) -> Vec<u8> {
        let index = self.method_ref(owner, name, "()V");
        vec![0xb8, (index >> 8) as u8, index as u8]
    }

    /// Register a bootstrap entry and return an InvokeDynamic pool index
    /// whose second static argument is a handle on `impl_owner.impl_name`.
    pub(crate) fn invoke_dynamic(
        &mut self,
        bootstrap_owner: &str,
        bootstrap_name: &str,
        impl_owner: &str,
        impl_name: &str,
    ) -> u16 {
        let bootstrap_ref = self.method_ref(
            bootstrap_owner,
            bootstrap_name,
            "(Ljava/lang/invoke/MethodHandles$Lookup;)Ljava/lang/invoke/CallSite;",
        );
        self.pool.push(CpEntry::MethodHandle(6, bootstrap_ref));
        let bootstrap_handle = self.pool.len() as u16;

        let impl_ref = self.method_ref(impl_owner, impl_name, "()V");
        self.pool.push(CpEntry::MethodHandle(6, impl_ref));
        let impl_handle = self.pool.len() as u16;

        let filler = self.utf8("()V");
        let entry_index = self.bootstraps.len() as u16;
        self.bootstraps
            .push((bootstrap_handle, vec![filler, impl_handle, filler]));

        let name_and_type = self.name_and_type(impl_name, "()V");
        self.pool
            .push(CpEntry::InvokeDynamic(entry_index, name_and_type));
        self.pool.len() as u16
    }

    pub(crate) fn method(&mut self, name: &str, descriptor: &str, code: Vec<u8>) {
        self.push_method(ACC_PUBLIC, name, descriptor, Some(code), &[]);
    }

    pub(crate) fn abstract_method(&mut self, name: &str, descriptor: &str) {
        self.push_method(ACC_PUBLIC | ACC_ABSTRACT, name, descriptor, None, &[]);
    }

    pub(crate) fn annotated_method(
        &mut self,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        annotations: &[&str],
    ) {
        self.push_method(ACC_PUBLIC, name, descriptor, Some(code), annotations);
    }

    pub(crate) fn annotated_abstract_method(
        &mut self,
        name: &str,
        descriptor: &str,
        annotations: &[&str],
    ) {
        self.push_method(
            ACC_PUBLIC | ACC_ABSTRACT,
            name,
            descriptor,
            None,
            annotations,
        );
    }

    fn push_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Option<Vec<u8>>,
        annotations: &[&str],
    ) {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        let annotation_types = annotations
            .iter()
            .map(|annotation| self.utf8(annotation))
            .collect();
        self.methods.push(MethodSpec {
            access,
            name_index,
            descriptor_index,
            code,
            annotation_types,
        });
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFE_BABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.pool.len() + 1) as u16);
        for entry in &self.pool {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut bytes, *interface);
        }
        write_u16(&mut bytes, 0); // fields
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            let mut attribute_count = 0;
            if method.code.is_some() {
                attribute_count += 1;
            }
            if !method.annotation_types.is_empty() {
                attribute_count += 1;
            }
            write_u16(&mut bytes, attribute_count);
            if let Some(code) = &method.code {
                write_u16(&mut bytes, self.code_attr);
                write_u32(&mut bytes, 12 + code.len() as u32);
                write_u16(&mut bytes, 8); // max_stack
                write_u16(&mut bytes, 8); // max_locals
                write_u32(&mut bytes, code.len() as u32);
                bytes.extend_from_slice(code);
                write_u16(&mut bytes, 0); // exception table
                write_u16(&mut bytes, 0); // code attributes
            }
            if !method.annotation_types.is_empty() {
                write_u16(&mut bytes, self.annotations_attr);
                write_u32(&mut bytes, 2 + 4 * method.annotation_types.len() as u32);
                write_u16(&mut bytes, method.annotation_types.len() as u16);
                for annotation in &method.annotation_types {
                    write_u16(&mut bytes, *annotation);
                    write_u16(&mut bytes, 0); // element value pairs
                }
            }
        }
        if self.bootstraps.is_empty() {
            write_u16(&mut bytes, 0);
        } else {
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, self.bootstraps_attr);
            let length: u32 = 2 + self
                .bootstraps
                .iter()
                .map(|(_, arguments)| 4 + 2 * arguments.len() as u32)
                .sum::<u32>();
            write_u32(&mut bytes, length);
            write_u16(&mut bytes, self.bootstraps.len() as u16);
            for (method_ref, arguments) in &self.bootstraps {
                write_u16(&mut bytes, *method_ref);
                write_u16(&mut bytes, arguments.len() as u16);
                for argument in arguments {
                    write_u16(&mut bytes, *argument);
                }
            }
        }
        bytes
    }
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodHandle(kind, reference_index) => {
                bytes.push(15);
                bytes.push(*kind);
                write_u16(bytes, *reference_index);
            }
            CpEntry::InvokeDynamic(bootstrap_index, name_and_type) => {
                bytes.push(18);
                write_u16(bytes, *bootstrap_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

/// Write an in-memory archive with the given entry names and contents.
pub(crate) fn jar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start archive entry");
        writer.write_all(data).expect("write archive entry");
    }
    writer.finish().expect("finish archive").into_inner()
}
