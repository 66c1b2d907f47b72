use anyhow::{Context, Result};

use crate::classfile::{
    AttributeInfo, parse_attributes, read_bytes, read_u16, read_u32, write_attributes,
    write_u16, write_u32,
};

/// Exception table row with raw bytecode offsets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ExceptionEntry {
    pub(crate) start_pc: u16,
    pub(crate) end_pc: u16,
    pub(crate) handler_pc: u16,
    pub(crate) catch_type: u16,
}

/// Decoded `Code` attribute payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CodeAttribute {
    pub(crate) max_stack: u16,
    pub(crate) max_locals: u16,
    pub(crate) code: Vec<u8>,
    pub(crate) exception_table: Vec<ExceptionEntry>,
    pub(crate) attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub(crate) fn parse(info: &[u8]) -> Result<Self> {
        let mut offset = 0usize;
        let max_stack = read_u16(info, &mut offset)?;
        let max_locals = read_u16(info, &mut offset)?;
        let code_len = read_u32(info, &mut offset)? as usize;
        let code = read_bytes(info, &mut offset, code_len)
            .context("read bytecode")?
            .to_vec();
        let table_len = read_u16(info, &mut offset)?;
        let mut exception_table = Vec::with_capacity(table_len as usize);
        for _ in 0..table_len {
            exception_table.push(ExceptionEntry {
                start_pc: read_u16(info, &mut offset)?,
                end_pc: read_u16(info, &mut offset)?,
                handler_pc: read_u16(info, &mut offset)?,
                catch_type: read_u16(info, &mut offset)?,
            });
        }
        let attributes = parse_attributes(info, &mut offset).context("parse code attributes")?;
        Ok(Self {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.code.len() + 32);
        write_u16(&mut out, self.max_stack);
        write_u16(&mut out, self.max_locals);
        write_u32(&mut out, self.code.len() as u32);
        out.extend_from_slice(&self.code);
        write_u16(&mut out, self.exception_table.len() as u16);
        for entry in &self.exception_table {
            write_u16(&mut out, entry.start_pc);
            write_u16(&mut out, entry.end_pc);
            write_u16(&mut out, entry.handler_pc);
            write_u16(&mut out, entry.catch_type);
        }
        write_attributes(&mut out, &self.attributes);
        out
    }
}
