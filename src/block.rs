//! Compiled Block: the flat, immutable representation of a layout script.

use crate::bitstream::Endianness;
use crate::custom::{CustomFieldType, CustomTypes};
use crate::error::Position;
use crate::expr::Evaluator;
use std::fmt;
use std::sync::Arc;

/// Identity of one declared, named field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedFieldInfo {
    /// Dotted path through enclosing named structures, e.g. `header.len`.
    pub path: String,
    pub name: String,
    /// Index of the field's descriptor in the block.
    pub offset: usize,
}

impl NamedFieldInfo {
    pub fn new(path: impl Into<String>, name: impl Into<String>, offset: usize) -> Self {
        NamedFieldInfo {
            path: path.into(),
            name: name.into(),
            offset,
        }
    }
}

impl fmt::Display for NamedFieldInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

/// Type tag of a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Bool,
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Long,
    Float,
    Double,
    Bit,
    /// `stringj`: length-prefixed UTF-8 text.
    Str,
    /// A registered custom type; index into [`CompiledBlock::custom_fields`].
    Custom(usize),
    /// `align:n`: skip to a multiple of n bytes.
    Align,
    /// `skip:n`: skip n bytes.
    Skip,
    /// `val:(expr)`: computed value, no stream representation.
    Val,
    /// `reset$$`: reset stream counters.
    ResetCounter,
    StructStart,
    StructEnd,
}

impl FieldKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        Some(match name {
            "bool" => FieldKind::Bool,
            "byte" => FieldKind::Byte,
            "ubyte" => FieldKind::UByte,
            "short" => FieldKind::Short,
            "ushort" => FieldKind::UShort,
            "int" => FieldKind::Int,
            "uint" => FieldKind::UInt,
            "long" => FieldKind::Long,
            "floatj" => FieldKind::Float,
            "doublej" => FieldKind::Double,
            "bit" => FieldKind::Bit,
            "stringj" => FieldKind::Str,
            "align" => FieldKind::Align,
            "skip" => FieldKind::Skip,
            "val" => FieldKind::Val,
            "reset$$" => FieldKind::ResetCounter,
            _ => return None,
        })
    }

    pub fn type_name(self) -> &'static str {
        match self {
            FieldKind::Bool => "bool",
            FieldKind::Byte => "byte",
            FieldKind::UByte => "ubyte",
            FieldKind::Short => "short",
            FieldKind::UShort => "ushort",
            FieldKind::Int => "int",
            FieldKind::UInt => "uint",
            FieldKind::Long => "long",
            FieldKind::Float => "floatj",
            FieldKind::Double => "doublej",
            FieldKind::Bit => "bit",
            FieldKind::Str => "stringj",
            FieldKind::Custom(_) => "custom",
            FieldKind::Align => "align",
            FieldKind::Skip => "skip",
            FieldKind::Val => "val",
            FieldKind::ResetCounter => "reset$$",
            FieldKind::StructStart => "{",
            FieldKind::StructEnd => "}",
        }
    }

    /// Fields that carry a value readable as an integer (and so can be referenced by expressions).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldKind::Bool
                | FieldKind::Byte
                | FieldKind::UByte
                | FieldKind::Short
                | FieldKind::UShort
                | FieldKind::Int
                | FieldKind::UInt
                | FieldKind::Long
                | FieldKind::Bit
                | FieldKind::Val
        )
    }

    /// Directives that produce no node in the field tree.
    pub fn is_directive(self) -> bool {
        matches!(self, FieldKind::Align | FieldKind::Skip | FieldKind::ResetCounter)
    }

    /// Declarations that take one value from the stream, or from the supplied
    /// values on write.
    pub fn holds_value(self) -> bool {
        !self.is_directive() && !matches!(self, FieldKind::Val | FieldKind::StructStart | FieldKind::StructEnd)
    }

    /// Width in bits of one element, for fixed-size kinds.
    pub fn fixed_bits(self) -> Option<u32> {
        Some(match self {
            FieldKind::Bool | FieldKind::Byte | FieldKind::UByte => 8,
            FieldKind::Short | FieldKind::UShort => 16,
            FieldKind::Int | FieldKind::UInt | FieldKind::Float => 32,
            FieldKind::Long | FieldKind::Double => 64,
            _ => return None,
        })
    }
}

/// Numeric parameter of a descriptor: bit width, alignment, skip count or `val` expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    None,
    Constant(u32),
    /// Index into [`CompiledBlock::evaluators`].
    Expr(usize),
}

/// Array length mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayLen {
    Constant(u32),
    /// Index into [`CompiledBlock::evaluators`].
    Expr(usize),
    /// Read until the stream is exhausted; only legal for the last declaration.
    Unbounded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub kind: FieldKind,
    pub byte_order: Endianness,
    pub param: Param,
    pub array: Option<ArrayLen>,
    /// Index into [`CompiledBlock::named_fields`].
    pub named: Option<usize>,
    /// For `StructStart` the index of its `StructEnd`, and the reverse.
    pub pair: Option<usize>,
    pub position: Position,
}

/// A declaration of a custom type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomDecl {
    pub type_name: String,
    /// Index of the handler in the block's registered custom types.
    pub handler: usize,
}

/// An evaluator attached to the descriptor at `descriptor`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachedEvaluator {
    pub descriptor: usize,
    pub evaluator: Evaluator,
}

/// The compiler's output. Immutable; share it freely across threads and passes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledBlock {
    pub(crate) source: String,
    pub(crate) descriptors: Vec<Descriptor>,
    pub(crate) named_fields: Vec<Arc<NamedFieldInfo>>,
    pub(crate) evaluators: Vec<AttachedEvaluator>,
    pub(crate) custom_fields: Vec<CustomDecl>,
    pub(crate) custom_types: CustomTypes,
}

impl CompiledBlock {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub fn named_fields(&self) -> &[Arc<NamedFieldInfo>] {
        &self.named_fields
    }

    pub fn evaluators(&self) -> &[AttachedEvaluator] {
        &self.evaluators
    }

    pub fn evaluator(&self, index: usize) -> &Evaluator {
        &self.evaluators[index].evaluator
    }

    /// Evaluators attached to one descriptor.
    pub fn evaluators_for(&self, descriptor: usize) -> impl Iterator<Item = &Evaluator> {
        self.evaluators
            .iter()
            .filter(move |a| a.descriptor == descriptor)
            .map(|a| &a.evaluator)
    }

    pub fn custom_fields(&self) -> &[CustomDecl] {
        &self.custom_fields
    }

    /// Handler and declaration behind a [`FieldKind::Custom`] index.
    pub fn custom_field(&self, index: usize) -> Option<(&CustomDecl, &dyn CustomFieldType)> {
        let decl = self.custom_fields.get(index)?;
        let handler = self.custom_types.get(decl.handler)?;
        Some((decl, handler.as_ref()))
    }

    /// Script type name of a descriptor, custom names included.
    pub fn type_name(&self, descriptor: &Descriptor) -> &str {
        match descriptor.kind {
            FieldKind::Custom(i) => self
                .custom_fields
                .get(i)
                .map(|c| c.type_name.as_str())
                .unwrap_or("custom"),
            kind => kind.type_name(),
        }
    }

    pub fn find_field_by_path(&self, path: &str) -> Option<&Arc<NamedFieldInfo>> {
        self.named_fields.iter().find(|f| f.path == path)
    }

    pub fn named_info(&self, descriptor: &Descriptor) -> Option<&Arc<NamedFieldInfo>> {
        descriptor.named.map(|i| &self.named_fields[i])
    }

    /// True if any descriptor has a dynamic width or length.
    pub fn has_var_fields(&self) -> bool {
        !self.evaluators.is_empty()
    }
}
