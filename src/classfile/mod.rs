//! Structural reader and writer for the JVM class file format.
//!
//! Only the pieces the rewriter touches are decoded; every other attribute is kept
//! as raw bytes and written back unchanged.

use anyhow::{Context, Result};

pub(crate) mod code;
pub(crate) mod pool;

use pool::ConstantPool;

const MAGIC: u32 = 0xCAFE_BABE;

pub(crate) const ACC_PUBLIC: u16 = 0x0001;
pub(crate) const ACC_STATIC: u16 = 0x0008;
pub(crate) const ACC_NATIVE: u16 = 0x0100;
pub(crate) const ACC_INTERFACE: u16 = 0x0200;
pub(crate) const ACC_ABSTRACT: u16 = 0x0400;

/// Attribute kept as its name index plus raw payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct AttributeInfo {
    pub(crate) name_index: u16,
    pub(crate) info: Vec<u8>,
}

/// Field or method entry.
#[derive(Clone, Debug)]
pub(crate) struct MemberInfo {
    pub(crate) access_flags: u16,
    pub(crate) name_index: u16,
    pub(crate) descriptor_index: u16,
    pub(crate) attributes: Vec<AttributeInfo>,
}

#[derive(Clone, Debug)]
pub(crate) struct ClassFile {
    pub(crate) minor_version: u16,
    pub(crate) major_version: u16,
    pub(crate) constant_pool: ConstantPool,
    pub(crate) access_flags: u16,
    pub(crate) this_class: u16,
    pub(crate) super_class: u16,
    pub(crate) interfaces: Vec<u16>,
    pub(crate) fields: Vec<MemberInfo>,
    pub(crate) methods: Vec<MemberInfo>,
    pub(crate) attributes: Vec<AttributeInfo>,
}

impl ClassFile {
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut offset = 0usize;
        let magic = read_u32(data, &mut offset).context("read magic")?;
        if magic != MAGIC {
            anyhow::bail!("not a class file (magic 0x{:08x})", magic);
        }
        let minor_version = read_u16(data, &mut offset)?;
        let major_version = read_u16(data, &mut offset)?;
        let constant_pool =
            ConstantPool::parse(data, &mut offset).context("parse constant pool")?;
        let access_flags = read_u16(data, &mut offset)?;
        let this_class = read_u16(data, &mut offset)?;
        let super_class = read_u16(data, &mut offset)?;
        let interface_count = read_u16(data, &mut offset)?;
        let mut interfaces = Vec::with_capacity(interface_count as usize);
        for _ in 0..interface_count {
            interfaces.push(read_u16(data, &mut offset)?);
        }
        let fields = parse_members(data, &mut offset).context("parse fields")?;
        let methods = parse_members(data, &mut offset).context("parse methods")?;
        let attributes = parse_attributes(data, &mut offset).context("parse class attributes")?;
        if offset != data.len() {
            anyhow::bail!("{} trailing bytes after class file", data.len() - offset);
        }
        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32(&mut out, MAGIC);
        write_u16(&mut out, self.minor_version);
        write_u16(&mut out, self.major_version);
        self.constant_pool.write(&mut out);
        write_u16(&mut out, self.access_flags);
        write_u16(&mut out, self.this_class);
        write_u16(&mut out, self.super_class);
        write_u16(&mut out, self.interfaces.len() as u16);
        for interface in &self.interfaces {
            write_u16(&mut out, *interface);
        }
        write_members(&mut out, &self.fields);
        write_members(&mut out, &self.methods);
        write_attributes(&mut out, &self.attributes);
        out
    }

    pub(crate) fn name(&self) -> Result<String> {
        self.constant_pool
            .class_name(self.this_class)
            .context("resolve this_class")
    }

    pub(crate) fn super_name(&self) -> Result<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool
            .class_name(self.super_class)
            .map(Some)
            .context("resolve super_class")
    }

    pub(crate) fn is_interface(&self) -> bool {
        self.access_flags & ACC_INTERFACE != 0
    }

    pub(crate) fn member_name(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.name_index)
    }

    pub(crate) fn member_descriptor(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.descriptor_index)
    }

    /// Position of the named attribute in `attributes`, if present.
    pub(crate) fn find_attribute(&self, attributes: &[AttributeInfo], name: &str) -> Option<usize> {
        attributes.iter().position(|attribute| {
            self.constant_pool
                .utf8(attribute.name_index)
                .map(|value| value == name)
                .unwrap_or(false)
        })
    }
}

fn parse_members(data: &[u8], offset: &mut usize) -> Result<Vec<MemberInfo>> {
    let count = read_u16(data, offset)?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let access_flags = read_u16(data, offset)?;
        let name_index = read_u16(data, offset)?;
        let descriptor_index = read_u16(data, offset)?;
        let attributes = parse_attributes(data, offset)?;
        members.push(MemberInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }
    Ok(members)
}

fn write_members(out: &mut Vec<u8>, members: &[MemberInfo]) {
    write_u16(out, members.len() as u16);
    for member in members {
        write_u16(out, member.access_flags);
        write_u16(out, member.name_index);
        write_u16(out, member.descriptor_index);
        write_attributes(out, &member.attributes);
    }
}

pub(crate) fn parse_attributes(data: &[u8], offset: &mut usize) -> Result<Vec<AttributeInfo>> {
    let count = read_u16(data, offset)?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = read_u16(data, offset)?;
        let len = read_u32(data, offset)? as usize;
        let info = read_bytes(data, offset, len)?.to_vec();
        attributes.push(AttributeInfo { name_index, info });
    }
    Ok(attributes)
}

pub(crate) fn write_attributes(out: &mut Vec<u8>, attributes: &[AttributeInfo]) {
    write_u16(out, attributes.len() as u16);
    for attribute in attributes {
        write_u16(out, attribute.name_index);
        write_u32(out, attribute.info.len() as u32);
        out.extend_from_slice(&attribute.info);
    }
}

pub(crate) fn read_bytes<'a>(data: &'a [u8], offset: &mut usize, len: usize) -> Result<&'a [u8]> {
    let end = offset
        .checked_add(len)
        .filter(|end| *end <= data.len())
        .with_context(|| format!("unexpected end of data at offset {}", offset))?;
    let bytes = &data[*offset..end];
    *offset = end;
    Ok(bytes)
}

pub(crate) fn read_u8(data: &[u8], offset: &mut usize) -> Result<u8> {
    Ok(read_bytes(data, offset, 1)?[0])
}

pub(crate) fn read_u16(data: &[u8], offset: &mut usize) -> Result<u16> {
    let bytes = read_bytes(data, offset, 2)?;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn read_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let bytes = read_bytes(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

pub(crate) fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

pub(crate) fn write_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn write_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}
