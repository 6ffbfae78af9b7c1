//! Per-pass map of numeric field values, plus the external value hook.

use crate::block::{CompiledBlock, NamedFieldInfo};
use crate::error::{Error, Result};
use crate::expr::Evaluator;
use std::collections::HashMap;

/// Supplies values for names an expression could not resolve among declared fields.
pub trait ExternalValueResolver {
    fn resolve(&self, name: &str, block: &CompiledBlock, evaluator: &Evaluator) -> Option<i64>;
}

impl<F> ExternalValueResolver for F
where
    F: Fn(&str, &CompiledBlock, &Evaluator) -> Option<i64>,
{
    fn resolve(&self, name: &str, block: &CompiledBlock, evaluator: &Evaluator) -> Option<i64> {
        self(name, block, evaluator)
    }
}

impl ExternalValueResolver for HashMap<String, i64> {
    fn resolve(&self, name: &str, _block: &CompiledBlock, _evaluator: &Evaluator) -> Option<i64> {
        self.get(name).copied()
    }
}

/// Numeric values produced so far in one pass, indexed by descriptor offset.
/// Lives for exactly one read or write pass.
pub struct NamedNumericFieldMap<'a> {
    values: Vec<Option<i64>>,
    resolver: Option<&'a dyn ExternalValueResolver>,
}

impl<'a> NamedNumericFieldMap<'a> {
    pub fn new(block: &CompiledBlock, resolver: Option<&'a dyn ExternalValueResolver>) -> Self {
        NamedNumericFieldMap {
            values: vec![None; block.descriptors().len()],
            resolver,
        }
    }

    pub fn get(&self, field: &NamedFieldInfo) -> Option<i64> {
        self.values.get(field.offset).copied().flatten()
    }

    pub fn put(&mut self, field: &NamedFieldInfo, value: i64) {
        if let Some(slot) = self.values.get_mut(field.offset) {
            *slot = Some(value);
        }
    }

    /// Ask the caller's resolver for `name`.
    pub fn external_value(&self, name: &str, block: &CompiledBlock, evaluator: &Evaluator) -> Result<i64> {
        let resolver = self.resolver.ok_or_else(|| {
            Error::Structural(format!("no external value resolver for '{}'", name))
        })?;
        resolver
            .resolve(name, block, evaluator)
            .ok_or_else(|| Error::Structural(format!("external field '{}' is not resolved", name)))
    }
}
