//! Explicit configuration for compilation and for codec passes.

use crate::bitstream::{BitOrder, Endianness};
use crate::custom::{CustomFieldType, CustomTypes};
use std::sync::Arc;

/// Which unresolved expression names may be treated as external references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExternalFields {
    /// Any name not declared in the script.
    #[default]
    Any,
    /// Only the listed names.
    Only(Vec<String>),
    /// No externals; unresolved names are reference errors.
    None,
}

impl ExternalFields {
    pub fn allows(&self, name: &str) -> bool {
        match self {
            ExternalFields::Any => true,
            ExternalFields::Only(names) => names.iter().any(|n| n == name),
            ExternalFields::None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompileOptions {
    /// Byte order of multi-byte fields without a `<` / `>` prefix.
    pub default_byte_order: Endianness,
    pub externals: ExternalFields,
    /// Handlers for type names beyond the built-in ones.
    pub custom_types: CustomTypes,
}

impl CompileOptions {
    pub fn with_byte_order(mut self, order: Endianness) -> Self {
        self.default_byte_order = order;
        self
    }

    pub fn with_externals(mut self, externals: ExternalFields) -> Self {
        self.externals = externals;
        self
    }

    pub fn with_custom_type(mut self, handler: Arc<dyn CustomFieldType>) -> Self {
        self.custom_types.push(handler);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecOptions {
    pub bit_order: BitOrder,
    /// Stop reading (and return the tree so far) when the stream ends right
    /// before a value-holding field. Writing stops where the values run out.
    pub skip_remaining_fields_if_eof: bool,
    /// Treat negative computed array lengths and skip counts as zero instead of failing.
    pub negative_expression_result_as_zero: bool,
}

impl CodecOptions {
    pub fn with_bit_order(mut self, order: BitOrder) -> Self {
        self.bit_order = order;
        self
    }

    pub fn skip_remaining_fields_if_eof(mut self, on: bool) -> Self {
        self.skip_remaining_fields_if_eof = on;
        self
    }

    pub fn negative_expression_result_as_zero(mut self, on: bool) -> Self {
        self.negative_expression_result_as_zero = on;
        self
    }
}
