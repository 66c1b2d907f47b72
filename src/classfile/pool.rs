use std::collections::HashMap;

use anyhow::{Context, Result};

use crate::classfile::{read_bytes, read_u8, read_u16, read_u32, write_u8, write_u16, write_u32};
use crate::error::WeaveError;

/// One constant pool slot. Utf8 entries keep their raw modified UTF-8 bytes so an
/// unchanged pool serializes back byte-for-byte.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) enum PoolEntry {
    Unusable,
    Utf8(Vec<u8>),
    Integer(i32),
    Float(u32),
    Long(i64),
    Double(u64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl PoolEntry {
    fn is_wide(&self) -> bool {
        matches!(self, PoolEntry::Long(_) | PoolEntry::Double(_))
    }
}

/// Resolved field or method reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct MemberRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) interface: bool,
}

/// Constant pool with append-only, deduplicating insertion.
///
/// Existing indices never move, so attributes copied verbatim from the input stay
/// valid after new entries are added.
#[derive(Clone, Debug)]
pub(crate) struct ConstantPool {
    entries: Vec<PoolEntry>,
    lookup: Option<HashMap<PoolEntry, u16>>,
}

impl ConstantPool {
    pub(crate) fn new() -> Self {
        Self {
            entries: vec![PoolEntry::Unusable],
            lookup: None,
        }
    }

    pub(crate) fn parse(data: &[u8], offset: &mut usize) -> Result<Self> {
        let count = read_u16(data, offset)?;
        let mut entries = Vec::with_capacity(count as usize);
        entries.push(PoolEntry::Unusable);
        let mut index = 1u16;
        while index < count {
            let tag = read_u8(data, offset)?;
            let entry = match tag {
                1 => {
                    let len = read_u16(data, offset)? as usize;
                    PoolEntry::Utf8(read_bytes(data, offset, len)?.to_vec())
                }
                3 => PoolEntry::Integer(read_u32(data, offset)? as i32),
                4 => PoolEntry::Float(read_u32(data, offset)?),
                5 => {
                    let high = read_u32(data, offset)? as u64;
                    let low = read_u32(data, offset)? as u64;
                    PoolEntry::Long(((high << 32) | low) as i64)
                }
                6 => {
                    let high = read_u32(data, offset)? as u64;
                    let low = read_u32(data, offset)? as u64;
                    PoolEntry::Double((high << 32) | low)
                }
                7 => PoolEntry::Class {
                    name_index: read_u16(data, offset)?,
                },
                8 => PoolEntry::String {
                    string_index: read_u16(data, offset)?,
                },
                9 => PoolEntry::Fieldref {
                    class_index: read_u16(data, offset)?,
                    name_and_type_index: read_u16(data, offset)?,
                },
                10 => PoolEntry::Methodref {
                    class_index: read_u16(data, offset)?,
                    name_and_type_index: read_u16(data, offset)?,
                },
                11 => PoolEntry::InterfaceMethodref {
                    class_index: read_u16(data, offset)?,
                    name_and_type_index: read_u16(data, offset)?,
                },
                12 => PoolEntry::NameAndType {
                    name_index: read_u16(data, offset)?,
                    descriptor_index: read_u16(data, offset)?,
                },
                15 => PoolEntry::MethodHandle {
                    reference_kind: read_u8(data, offset)?,
                    reference_index: read_u16(data, offset)?,
                },
                16 => PoolEntry::MethodType {
                    descriptor_index: read_u16(data, offset)?,
                },
                17 => PoolEntry::Dynamic {
                    bootstrap_method_attr_index: read_u16(data, offset)?,
                    name_and_type_index: read_u16(data, offset)?,
                },
                18 => PoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index: read_u16(data, offset)?,
                    name_and_type_index: read_u16(data, offset)?,
                },
                19 => PoolEntry::Module {
                    name_index: read_u16(data, offset)?,
                },
                20 => PoolEntry::Package {
                    name_index: read_u16(data, offset)?,
                },
                _ => anyhow::bail!("unsupported constant pool tag {} at index {}", tag, index),
            };
            let wide = entry.is_wide();
            entries.push(entry);
            if wide {
                entries.push(PoolEntry::Unusable);
                index += 1;
            }
            index += 1;
        }
        Ok(Self {
            entries,
            lookup: None,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>) {
        write_u16(out, self.entries.len() as u16);
        for entry in &self.entries {
            match entry {
                PoolEntry::Unusable => {}
                PoolEntry::Utf8(bytes) => {
                    write_u8(out, 1);
                    write_u16(out, bytes.len() as u16);
                    out.extend_from_slice(bytes);
                }
                PoolEntry::Integer(value) => {
                    write_u8(out, 3);
                    write_u32(out, *value as u32);
                }
                PoolEntry::Float(bits) => {
                    write_u8(out, 4);
                    write_u32(out, *bits);
                }
                PoolEntry::Long(value) => {
                    write_u8(out, 5);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                PoolEntry::Double(bits) => {
                    write_u8(out, 6);
                    out.extend_from_slice(&bits.to_be_bytes());
                }
                PoolEntry::Class { name_index } => {
                    write_u8(out, 7);
                    write_u16(out, *name_index);
                }
                PoolEntry::String { string_index } => {
                    write_u8(out, 8);
                    write_u16(out, *string_index);
                }
                PoolEntry::Fieldref {
                    class_index,
                    name_and_type_index,
                } => {
                    write_u8(out, 9);
                    write_u16(out, *class_index);
                    write_u16(out, *name_and_type_index);
                }
                PoolEntry::Methodref {
                    class_index,
                    name_and_type_index,
                } => {
                    write_u8(out, 10);
                    write_u16(out, *class_index);
                    write_u16(out, *name_and_type_index);
                }
                PoolEntry::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                } => {
                    write_u8(out, 11);
                    write_u16(out, *class_index);
                    write_u16(out, *name_and_type_index);
                }
                PoolEntry::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    write_u8(out, 12);
                    write_u16(out, *name_index);
                    write_u16(out, *descriptor_index);
                }
                PoolEntry::MethodHandle {
                    reference_kind,
                    reference_index,
                } => {
                    write_u8(out, 15);
                    write_u8(out, *reference_kind);
                    write_u16(out, *reference_index);
                }
                PoolEntry::MethodType { descriptor_index } => {
                    write_u8(out, 16);
                    write_u16(out, *descriptor_index);
                }
                PoolEntry::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    write_u8(out, 17);
                    write_u16(out, *bootstrap_method_attr_index);
                    write_u16(out, *name_and_type_index);
                }
                PoolEntry::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                } => {
                    write_u8(out, 18);
                    write_u16(out, *bootstrap_method_attr_index);
                    write_u16(out, *name_and_type_index);
                }
                PoolEntry::Module { name_index } => {
                    write_u8(out, 19);
                    write_u16(out, *name_index);
                }
                PoolEntry::Package { name_index } => {
                    write_u8(out, 20);
                    write_u16(out, *name_index);
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get(&self, index: u16) -> Result<&PoolEntry> {
        match self.entries.get(index as usize) {
            Some(PoolEntry::Unusable) | None => {
                anyhow::bail!("invalid constant pool index {}", index)
            }
            Some(entry) => Ok(entry),
        }
    }

    pub(crate) fn utf8(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            PoolEntry::Utf8(bytes) => {
                decode_modified_utf8(bytes).with_context(|| format!("decode utf8 entry {index}"))
            }
            _ => anyhow::bail!("constant pool entry {} is not utf8", index),
        }
    }

    /// Exact text of a Utf8 entry, or `None` when it cannot be held in a `String`.
    pub(crate) fn utf8_exact(&self, index: u16) -> Result<Option<String>> {
        match self.get(index)? {
            PoolEntry::Utf8(bytes) => decode_modified_utf8_exact(bytes)
                .with_context(|| format!("decode utf8 entry {index}")),
            _ => anyhow::bail!("constant pool entry {} is not utf8", index),
        }
    }

    pub(crate) fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            PoolEntry::Class { name_index } => self.utf8(*name_index),
            _ => anyhow::bail!("constant pool entry {} is not a class", index),
        }
    }

    pub(crate) fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            PoolEntry::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => anyhow::bail!("constant pool entry {} is not a name and type", index),
        }
    }

    pub(crate) fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (class_index, name_and_type_index, interface) = match self.get(index)? {
            PoolEntry::Fieldref {
                class_index,
                name_and_type_index,
            }
            | PoolEntry::Methodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, false),
            PoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            } => (*class_index, *name_and_type_index, true),
            _ => anyhow::bail!("constant pool entry {} is not a member reference", index),
        };
        let owner = self.class_name(class_index).context("resolve member owner")?;
        let (name, descriptor) = self
            .name_and_type(name_and_type_index)
            .context("resolve member name and type")?;
        Ok(MemberRef {
            owner,
            name,
            descriptor,
            interface,
        })
    }

    /// Descriptor of the name-and-type referenced by a dynamic or invokedynamic entry.
    pub(crate) fn dynamic_descriptor(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            PoolEntry::Dynamic {
                name_and_type_index,
                ..
            }
            | PoolEntry::InvokeDynamic {
                name_and_type_index,
                ..
            } => Ok(self.name_and_type(*name_and_type_index)?.1),
            _ => anyhow::bail!("constant pool entry {} is not dynamic", index),
        }
    }

    fn add(&mut self, entry: PoolEntry) -> Result<u16> {
        let entries = &self.entries;
        let lookup = self.lookup.get_or_insert_with(|| {
            let mut map = HashMap::new();
            for (index, existing) in entries.iter().enumerate() {
                if *existing != PoolEntry::Unusable {
                    map.entry(existing.clone()).or_insert(index as u16);
                }
            }
            map
        });
        if let Some(index) = lookup.get(&entry) {
            return Ok(*index);
        }
        let slots = if entry.is_wide() { 2 } else { 1 };
        if self.entries.len() + slots > u16::MAX as usize {
            return Err(WeaveError::ConstantPoolOverflow.into());
        }
        let index = self.entries.len() as u16;
        lookup.insert(entry.clone(), index);
        let wide = entry.is_wide();
        self.entries.push(entry);
        if wide {
            self.entries.push(PoolEntry::Unusable);
        }
        Ok(index)
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> Result<u16> {
        let bytes = encode_modified_utf8(value);
        if bytes.len() > u16::MAX as usize {
            anyhow::bail!("utf8 constant exceeds 65535 bytes");
        }
        self.add(PoolEntry::Utf8(bytes))
    }

    pub(crate) fn add_class(&mut self, name: &str) -> Result<u16> {
        let name_index = self.add_utf8(name)?;
        self.add(PoolEntry::Class { name_index })
    }

    pub(crate) fn add_string(&mut self, value: &str) -> Result<u16> {
        let string_index = self.add_utf8(value)?;
        self.add(PoolEntry::String { string_index })
    }

    pub(crate) fn add_integer(&mut self, value: i32) -> Result<u16> {
        self.add(PoolEntry::Integer(value))
    }

    pub(crate) fn add_float(&mut self, value: f32) -> Result<u16> {
        self.add(PoolEntry::Float(value.to_bits()))
    }

    pub(crate) fn add_long(&mut self, value: i64) -> Result<u16> {
        self.add(PoolEntry::Long(value))
    }

    pub(crate) fn add_double(&mut self, value: f64) -> Result<u16> {
        self.add(PoolEntry::Double(value.to_bits()))
    }

    pub(crate) fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.add_utf8(name)?;
        let descriptor_index = self.add_utf8(descriptor)?;
        self.add(PoolEntry::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub(crate) fn add_field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        self.add(PoolEntry::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    pub(crate) fn add_method_ref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
        interface: bool,
    ) -> Result<u16> {
        let class_index = self.add_class(owner)?;
        let name_and_type_index = self.add_name_and_type(name, descriptor)?;
        if interface {
            self.add(PoolEntry::InterfaceMethodref {
                class_index,
                name_and_type_index,
            })
        } else {
            self.add(PoolEntry::Methodref {
                class_index,
                name_and_type_index,
            })
        }
    }
}

/// Decode the JVM's modified UTF-8 (NUL as `C0 80`, supplementary characters as
/// surrogate pairs). Unpaired surrogates become U+FFFD.
pub(crate) fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    Ok(String::from_utf16_lossy(&utf16_units(bytes)?))
}

/// Like [`decode_modified_utf8`], but `None` when the bytes hold an unpaired
/// surrogate and so have no exact `String` form.
pub(crate) fn decode_modified_utf8_exact(bytes: &[u8]) -> Result<Option<String>> {
    Ok(String::from_utf16(&utf16_units(bytes)?).ok())
}

fn utf16_units(bytes: &[u8]) -> Result<Vec<u16>> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut index = 0usize;
    while index < bytes.len() {
        let first = bytes[index] as u16;
        if first & 0x80 == 0 {
            units.push(first);
            index += 1;
        } else if first & 0xE0 == 0xC0 {
            let second = *bytes.get(index + 1).context("truncated utf8 sequence")? as u16;
            units.push(((first & 0x1F) << 6) | (second & 0x3F));
            index += 2;
        } else if first & 0xF0 == 0xE0 {
            let second = *bytes.get(index + 1).context("truncated utf8 sequence")? as u16;
            let third = *bytes.get(index + 2).context("truncated utf8 sequence")? as u16;
            units.push(((first & 0x0F) << 12) | ((second & 0x3F) << 6) | (third & 0x3F));
            index += 3;
        } else {
            anyhow::bail!("invalid modified utf8 byte 0x{:02x}", first);
        }
    }
    Ok(units)
}

pub(crate) fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push((0xC0 | ((unit >> 6) & 0x1F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
            _ => {
                out.push((0xE0 | ((unit >> 12) & 0x0F)) as u8);
                out.push((0x80 | ((unit >> 6) & 0x3F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modified_utf8_encodes_nul_and_supplementary_characters() {
        let value = "a\0\u{1F600}é";
        let encoded = encode_modified_utf8(value);

        assert_eq!(&encoded[0..3], &[b'a', 0xC0, 0x80]);
        assert_eq!(encoded.len(), 1 + 2 + 6 + 2);
        assert_eq!(decode_modified_utf8(&encoded).expect("decode"), value);
    }

    #[test]
    fn unpaired_surrogate_has_no_exact_string() {
        let lone_high = [0xED, 0xA0, 0x80];
        let mut pool = ConstantPool::new();
        let index = pool.add(PoolEntry::Utf8(lone_high.to_vec())).expect("add");

        assert_eq!(decode_modified_utf8(&lone_high).expect("decode"), "\u{FFFD}");
        assert_eq!(pool.utf8_exact(index).expect("exact"), None);
        let plain = pool.add_utf8("plain").expect("add");
        assert_eq!(pool.utf8_exact(plain).expect("exact").as_deref(), Some("plain"));
    }

    #[test]
    fn add_deduplicates_existing_entries() {
        let mut pool = ConstantPool::new();
        let first = pool.add_method_ref("a/B", "run", "()V", false).expect("add");
        let second = pool.add_method_ref("a/B", "run", "()V", false).expect("add");
        let interface = pool.add_method_ref("a/B", "run", "()V", true).expect("add");

        assert_eq!(first, second);
        assert_ne!(first, interface);
        let member = pool.member_ref(interface).expect("member");
        assert_eq!(member.owner, "a/B");
        assert!(member.interface);
    }

    #[test]
    fn wide_entries_take_two_slots() {
        let mut pool = ConstantPool::new();
        let long = pool.add_long(7).expect("add long");
        let next = pool.add_integer(1).expect("add int");

        assert_eq!(long, 1);
        assert_eq!(next, 3);
        assert!(pool.get(2).is_err());
    }

    #[test]
    fn parse_and_write_round_trip() {
        let mut pool = ConstantPool::new();
        pool.add_double(1.5).expect("double");
        pool.add_string("hello").expect("string");
        pool.add_field_ref("a/B", "count", "I").expect("field");
        let mut bytes = Vec::new();
        pool.write(&mut bytes);

        let mut offset = 0;
        let parsed = ConstantPool::parse(&bytes, &mut offset).expect("parse");
        let mut rewritten = Vec::new();
        parsed.write(&mut rewritten);

        assert_eq!(offset, bytes.len());
        assert_eq!(bytes, rewritten);
        assert_eq!(parsed.len(), pool.len());
    }
}
