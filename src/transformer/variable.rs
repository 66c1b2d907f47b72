use anyhow::{Context, Result};

use super::{CodeWriter, MethodScope, MethodTransformer, PassState};
use crate::descriptor::{TypeDescriptor, synthesize_descriptor};
use crate::error::WeaveError;
use crate::ir::Insn;
use crate::opcodes;
use crate::request::{HookRef, VariableAt};

/// Passes a parameter at entry, or values being stored to locals, through a hook.
#[derive(Clone, Debug)]
pub(crate) struct VariableTransformer {
    hook: HookRef,
    at: VariableAt,
    ordinal: Option<usize>,
    index: Option<u16>,
    variable_type: Option<TypeDescriptor>,
    args_only: bool,
    capture_self: bool,
}

/// Settings of a variable modification besides its hook.
#[derive(Clone, Debug)]
pub(crate) struct VariableOptions {
    pub(crate) at: VariableAt,
    pub(crate) ordinal: Option<usize>,
    pub(crate) index: Option<u16>,
    pub(crate) variable_descriptor: Option<String>,
    pub(crate) args_only: bool,
    pub(crate) capture_self: bool,
}

impl VariableTransformer {
    pub(crate) fn new(hook: HookRef, options: VariableOptions) -> Result<Self> {
        let variable_type = match options.variable_descriptor.as_deref() {
            None | Some("") => None,
            Some(descriptor) => Some(
                TypeDescriptor::parse(descriptor)
                    .with_context(|| format!("variable descriptor for hook {}", hook.name))?,
            ),
        };
        Ok(Self {
            hook,
            at: options.at,
            ordinal: options.ordinal,
            index: options.index,
            variable_type,
            args_only: options.args_only,
            capture_self: options.capture_self,
        })
    }

    fn hook_descriptor(&self, scope: &MethodScope<'_>, value: &TypeDescriptor) -> String {
        let receiver = self.capture_self.then_some(scope.owner);
        synthesize_descriptor(receiver, [value], value.descriptor())
    }

    fn emit_hook(&self, writer: &mut CodeWriter, descriptor: &str) {
        writer.emit(Insn::invoke_static(
            &self.hook.owner,
            &self.hook.name,
            descriptor,
        ));
    }
}

impl MethodTransformer for VariableTransformer {
    fn before_code(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
    ) -> Result<()> {
        if self.at != VariableAt::Head || state.applied {
            return Ok(());
        }
        if !self.args_only {
            return Err(WeaveError::HeadRequiresArgsOnly(scope.id()).into());
        }
        let invalid_ordinal = || WeaveError::InvalidArgumentOrdinal {
            ordinal: self.ordinal,
            method: scope.id(),
        };
        let ordinal = self.ordinal.ok_or_else(invalid_ordinal)?;
        let parameter = scope
            .descriptor
            .parameters()
            .get(ordinal)
            .ok_or_else(invalid_ordinal)?;
        let slot = scope
            .descriptor
            .parameter_slot(ordinal, scope.is_static())
            .ok_or_else(invalid_ordinal)?;
        if self.capture_self {
            if scope.is_static() {
                return Err(WeaveError::CaptureSelfOnStatic(scope.id()).into());
            }
            writer.emit(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: 0,
            });
        }
        writer.emit(parameter.emit_load(slot));
        self.emit_hook(writer, &self.hook_descriptor(scope, parameter));
        writer.emit(parameter.emit_store(slot));
        state.applied = true;
        Ok(())
    }

    fn transform_var_insn(
        &self,
        scope: &MethodScope<'_>,
        state: &mut PassState,
        writer: &mut CodeWriter,
        opcode: u8,
        slot: u16,
    ) -> Result<bool> {
        if self.at != VariableAt::Store || !opcodes::is_store(opcode) {
            return Ok(false);
        }
        if let Some(variable_type) = &self.variable_type {
            if !variable_type.accepts_store(opcode) {
                return Ok(false);
            }
        }
        if self.index.is_some_and(|index| index != slot) {
            return Ok(false);
        }
        let occurrence = state.occurrences;
        state.occurrences += 1;
        if self.ordinal.is_some_and(|ordinal| ordinal != occurrence) {
            return Ok(false);
        }

        let value = self
            .variable_type
            .clone()
            .unwrap_or_else(|| TypeDescriptor::for_var_opcode(opcode));
        if self.capture_self {
            if scope.is_static() {
                return Err(WeaveError::CaptureSelfOnStatic(scope.id()).into());
            }
            if value.size() != 1 {
                return Err(WeaveError::CaptureSelfWideValue {
                    descriptor: value.descriptor().to_string(),
                    method: scope.id(),
                }
                .into());
            }
            writer.emit(Insn::Var {
                opcode: opcodes::ALOAD,
                slot: 0,
            });
            writer.emit(Insn::Simple(opcodes::SWAP));
        }
        self.emit_hook(writer, &self.hook_descriptor(scope, &value));
        writer.emit(Insn::Var { opcode, slot });
        Ok(true)
    }
}
