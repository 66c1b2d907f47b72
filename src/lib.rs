//! Bytecode weaving for JVM class files: static hook calls injected at method
//! entry and returns, around calls, in place of calls and field accesses, and
//! around constants and local variable stores.

pub mod callback;
pub mod config;
pub mod descriptor;
pub mod dispatch;
pub mod error;
pub mod hierarchy;
pub mod logging;
pub mod mapping;
pub mod registry;
pub mod report;
pub mod request;
pub mod scan;

mod assemble;
mod cfg;
mod classfile;
mod decode;
mod frames;
mod ir;
mod opcodes;
mod pipeline;
mod transformer;

#[cfg(test)]
mod fixtures;

pub use callback::CallbackLayout;
pub use dispatch::ClassDispatchTable;
pub use error::WeaveError;
pub use registry::{RegistryBuilder, TransformRegistry};
pub use request::{ClassDefinition, DeclarationSource, ModificationRequest};
