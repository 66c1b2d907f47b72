//! In-process class file builder for tests.

use crate::assemble::{AssembleContext, assemble_method};
use crate::classfile::pool::ConstantPool;
use crate::classfile::{ACC_ABSTRACT, ACC_PUBLIC, ACC_STATIC, AttributeInfo, ClassFile, MemberInfo};
use crate::descriptor::MethodDescriptor;
use crate::hierarchy::DefaultHierarchy;
use crate::ir::{Handler, Insn, MethodBody};

const ACC_SUPER: u16 = 0x0020;

struct MethodSpec {
    name: String,
    descriptor: String,
    access: u16,
    insns: Option<Vec<Insn>>,
    handlers: Vec<Handler>,
}

pub(crate) struct ClassBuilder {
    name: String,
    super_name: String,
    major_version: u16,
    fields: Vec<(String, String, u16)>,
    methods: Vec<MethodSpec>,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            super_name: "java/lang/Object".to_string(),
            major_version: 52,
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub(crate) fn super_class(mut self, name: &str) -> Self {
        self.super_name = name.to_string();
        self
    }

    pub(crate) fn version(mut self, major_version: u16) -> Self {
        self.major_version = major_version;
        self
    }

    pub(crate) fn field(mut self, name: &str, descriptor: &str, access: u16) -> Self {
        self.fields
            .push((name.to_string(), descriptor.to_string(), access));
        self
    }

    pub(crate) fn method(self, name: &str, descriptor: &str, access: u16, insns: Vec<Insn>) -> Self {
        self.method_with_handlers(name, descriptor, access, insns, Vec::new())
    }

    pub(crate) fn method_with_handlers(
        mut self,
        name: &str,
        descriptor: &str,
        access: u16,
        insns: Vec<Insn>,
        handlers: Vec<Handler>,
    ) -> Self {
        self.methods.push(MethodSpec {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
            insns: Some(insns),
            handlers,
        });
        self
    }

    pub(crate) fn abstract_method(mut self, name: &str, descriptor: &str) -> Self {
        self.methods.push(MethodSpec {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access: ACC_PUBLIC | ACC_ABSTRACT,
            insns: None,
            handlers: Vec::new(),
        });
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut pool = ConstantPool::new();
        let this_class = pool.add_class(&self.name).expect("this class");
        let super_class = pool.add_class(&self.super_name).expect("super class");
        let hierarchy = DefaultHierarchy::new();

        let fields = self
            .fields
            .iter()
            .map(|(name, descriptor, access)| MemberInfo {
                access_flags: *access,
                name_index: pool.add_utf8(name).expect("field name"),
                descriptor_index: pool.add_utf8(descriptor).expect("field descriptor"),
                attributes: Vec::new(),
            })
            .collect();

        let mut methods = Vec::new();
        for spec in self.methods {
            let name_index = pool.add_utf8(&spec.name).expect("method name");
            let descriptor_index = pool.add_utf8(&spec.descriptor).expect("method descriptor");
            let mut attributes = Vec::new();
            if let Some(insns) = spec.insns {
                let descriptor = MethodDescriptor::parse(&spec.descriptor).expect("descriptor");
                let body = MethodBody {
                    insns,
                    handlers: spec.handlers,
                    line_numbers: Vec::new(),
                    local_variables: Vec::new(),
                    local_variable_types: Vec::new(),
                    max_locals: 0,
                    next_label: 1 << 20,
                };
                let context = AssembleContext {
                    owner: &self.name,
                    name: &spec.name,
                    descriptor: &descriptor,
                    is_static: spec.access & ACC_STATIC != 0,
                    major_version: self.major_version,
                    hierarchy: &hierarchy,
                };
                let code = assemble_method(&body, &mut pool, &context).expect("assemble fixture");
                attributes.push(AttributeInfo {
                    name_index: pool.add_utf8("Code").expect("Code"),
                    info: code.to_bytes(),
                });
            }
            methods.push(MemberInfo {
                access_flags: spec.access,
                name_index,
                descriptor_index,
                attributes,
            });
        }

        ClassFile {
            minor_version: 0,
            major_version: self.major_version,
            constant_pool: pool,
            access_flags: ACC_PUBLIC | ACC_SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields,
            methods,
            attributes: Vec::new(),
        }
        .to_bytes()
    }
}

/// Decoded instructions of one method in a built or rewritten class.
pub(crate) fn method_insns(bytes: &[u8], name: &str) -> Vec<Insn> {
    method_code(bytes, name).0
}

/// Decoded instructions plus the raw Code attribute of one method.
pub(crate) fn method_code(bytes: &[u8], name: &str) -> (Vec<Insn>, crate::classfile::code::CodeAttribute) {
    let class = ClassFile::parse(bytes).expect("parse class");
    let method = class
        .methods
        .iter()
        .find(|method| class.member_name(method).expect("name") == name)
        .expect("method present");
    let index = class
        .find_attribute(&method.attributes, "Code")
        .expect("Code attribute");
    let code = crate::classfile::code::CodeAttribute::parse(&method.attributes[index].info)
        .expect("parse Code");
    let body = crate::decode::decode_method(&code, &class.constant_pool).expect("decode");
    (body.insns, code)
}

/// Names of the Code sub-attributes of one method.
pub(crate) fn code_attribute_names(bytes: &[u8], name: &str) -> Vec<String> {
    let class = ClassFile::parse(bytes).expect("parse class");
    let (_, code) = method_code(bytes, name);
    code.attributes
        .iter()
        .map(|attribute| class.constant_pool.utf8(attribute.name_index).expect("attribute name"))
        .collect()
}
