//! Lower script tokens into a [`CompiledBlock`].

use crate::block::{ArrayLen, AttachedEvaluator, CompiledBlock, CustomDecl, Descriptor, FieldKind, NamedFieldInfo, Param};
use crate::bitstream::Endianness;
use crate::config::CompileOptions;
use crate::error::{Error, Position, Result};
use crate::expr::{compile_expression, Evaluator};
use crate::tokenizer::{tokenize, ArraySize, Token, TokenKind, TypeExtra};
use std::collections::HashSet;
use std::sync::Arc;

/// Compile a script with default options (big endian, any external names).
pub fn compile(source: &str) -> Result<CompiledBlock> {
    compile_with(source, &CompileOptions::default())
}

pub fn compile_with(source: &str, options: &CompileOptions) -> Result<CompiledBlock> {
    let tokens = tokenize(source)?;
    let mut compiler = Compiler::new(options, declared_paths(&tokens));
    for token in &tokens {
        compiler.token(token)?;
    }
    compiler.finish(source)
}

/// Every path the script declares, in any scope.
fn declared_paths(tokens: &[Token]) -> HashSet<String> {
    let mut out = HashSet::new();
    let mut prefixes: Vec<String> = Vec::new();
    for t in tokens {
        let prefix = prefixes.last().cloned().unwrap_or_default();
        match &t.kind {
            TokenKind::Field { name: Some(name), .. } => {
                out.insert(join_path(&prefix, name));
            }
            TokenKind::Field { .. } => {}
            TokenKind::StructStart { name, .. } => {
                let next = match name {
                    Some(name) => {
                        let path = join_path(&prefix, name);
                        out.insert(path.clone());
                        path
                    }
                    None => prefix,
                };
                prefixes.push(next);
            }
            TokenKind::StructEnd => {
                prefixes.pop();
            }
        }
    }
    out
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn path_matches(path: &str, name: &str) -> bool {
    path == name || (path.len() > name.len() && path.ends_with(name) && path.as_bytes()[path.len() - name.len() - 1] == b'.')
}

struct Scope {
    /// Path prefix for children; empty at top level and inside anonymous structures at top level.
    prefix: String,
    start: usize,
    /// This structure or an enclosing one is repeated.
    arrayed: bool,
    unbounded: bool,
    position: Position,
}

struct Compiler<'o> {
    options: &'o CompileOptions,
    all_paths: HashSet<String>,
    descriptors: Vec<Descriptor>,
    named: Vec<Arc<NamedFieldInfo>>,
    /// Parallel to `named`: field holds a single numeric value.
    numeric: Vec<bool>,
    paths: HashSet<String>,
    evaluators: Vec<AttachedEvaluator>,
    custom_fields: Vec<CustomDecl>,
    scopes: Vec<Scope>,
    /// Position of an unbounded array; nothing may be declared after it.
    unbounded_at: Option<Position>,
}

impl<'o> Compiler<'o> {
    fn new(options: &'o CompileOptions, all_paths: HashSet<String>) -> Self {
        Compiler {
            options,
            all_paths,
            descriptors: Vec::new(),
            named: Vec::new(),
            numeric: Vec::new(),
            paths: HashSet::new(),
            evaluators: Vec::new(),
            custom_fields: Vec::new(),
            scopes: Vec::new(),
            unbounded_at: None,
        }
    }

    fn prefix(&self) -> &str {
        self.scopes.last().map(|s| s.prefix.as_str()).unwrap_or("")
    }

    fn in_arrayed_scope(&self) -> bool {
        self.scopes.last().map(|s| s.arrayed).unwrap_or(false)
    }

    fn token(&mut self, token: &Token) -> Result<()> {
        match &token.kind {
            TokenKind::Field {
                byte_order,
                type_name,
                extra,
                array,
                name,
            } => {
                self.check_after_unbounded(token.position)?;
                self.field(token.position, *byte_order, type_name, extra.as_ref(), array.as_ref(), name.as_deref())
            }
            TokenKind::StructStart { name, array } => {
                self.check_after_unbounded(token.position)?;
                self.struct_start(token.position, name.as_deref(), array.as_ref())
            }
            TokenKind::StructEnd => self.struct_end(token.position),
        }
    }

    fn check_after_unbounded(&self, position: Position) -> Result<()> {
        match self.unbounded_at {
            Some(at) => Err(Error::syntax(
                format!("unbounded array at {} must be the last field, found another declaration", at),
                position,
            )),
            None => Ok(()),
        }
    }

    fn field(
        &mut self,
        position: Position,
        byte_order: Option<Endianness>,
        type_name: &str,
        extra: Option<&TypeExtra>,
        array: Option<&ArraySize>,
        name: Option<&str>,
    ) -> Result<()> {
        let kind = match FieldKind::from_type_name(type_name) {
            Some(kind) => kind,
            None => self.custom_kind(type_name, extra.is_some(), array.is_some(), position)?,
        };
        let index = self.descriptors.len();

        if kind.is_directive() {
            if array.is_some() {
                return Err(Error::syntax(format!("'{}' cannot be an array", type_name), position));
            }
            if name.is_some() {
                return Err(Error::syntax(format!("'{}' cannot have a name", type_name), position));
            }
        }
        if kind == FieldKind::Val {
            if array.is_some() {
                return Err(Error::syntax("'val' cannot be an array", position));
            }
            if name.is_none() {
                return Err(Error::syntax("'val' field must have a name", position));
            }
        }

        let param = self.param(kind, extra, index, position)?;
        let array = self.array_len(array, index, position)?;
        let named = match name {
            Some(name) => Some(self.declare(name, index, kind.is_numeric() && array.is_none(), position)?),
            None => None,
        };

        self.descriptors.push(Descriptor {
            kind,
            byte_order: byte_order.unwrap_or(self.options.default_byte_order),
            param,
            array,
            named,
            pair: None,
            position,
        });
        Ok(())
    }

    fn custom_kind(&mut self, type_name: &str, has_extra: bool, is_array: bool, position: Position) -> Result<FieldKind> {
        let options = self.options;
        let types = &options.custom_types;
        let handler = types
            .find(type_name)
            .ok_or_else(|| Error::syntax(format!("unknown type '{}'", type_name), position))?;
        if !types.get(handler).is_some_and(|h| h.is_allowed(type_name, has_extra, is_array)) {
            return Err(Error::syntax(
                format!("type '{}' does not accept this declaration", type_name),
                position,
            ));
        }
        self.custom_fields.push(CustomDecl {
            type_name: type_name.to_string(),
            handler,
        });
        Ok(FieldKind::Custom(self.custom_fields.len() - 1))
    }

    fn param(&mut self, kind: FieldKind, extra: Option<&TypeExtra>, index: usize, position: Position) -> Result<Param> {
        let type_name = kind.type_name();
        let constant = |n: i64| -> Result<Param> {
            match kind {
                FieldKind::Bit if !(1..=8).contains(&n) => Err(Error::syntax(
                    format!("bit width must be within 1..=8, got {}", n),
                    position,
                )),
                FieldKind::Align if n < 1 => Err(Error::syntax("alignment must be positive", position)),
                FieldKind::Skip if n < 0 => Err(Error::syntax("skip count must not be negative", position)),
                FieldKind::Val => Ok(Param::Constant(n as u32)),
                _ => u32::try_from(n)
                    .map(Param::Constant)
                    .map_err(|_| Error::syntax(format!("'{}' parameter {} out of range", type_name, n), position)),
            }
        };
        match (kind, extra) {
            (FieldKind::Bit | FieldKind::Align | FieldKind::Skip, None) => Ok(Param::Constant(1)),
            (FieldKind::Val, None) => Err(Error::syntax("'val' needs an expression, e.g. val:(a+b)", position)),
            (
                FieldKind::Bit | FieldKind::Align | FieldKind::Skip | FieldKind::Val | FieldKind::Custom(_),
                Some(TypeExtra::Number(n)),
            ) => {
                constant(*n as i64)
            }
            (
                FieldKind::Bit | FieldKind::Align | FieldKind::Skip | FieldKind::Val | FieldKind::Custom(_),
                Some(TypeExtra::Expression(text)),
            ) => {
                let evaluator = self.expression(text, position)?;
                match evaluator.as_constant() {
                    // val keeps its expression: its value may be negative
                    Some(_) if kind == FieldKind::Val => Ok(Param::Expr(self.attach(index, evaluator))),
                    Some(n) => constant(n),
                    None => Ok(Param::Expr(self.attach(index, evaluator))),
                }
            }
            (_, Some(_)) => Err(Error::syntax(format!("type '{}' takes no parameter", type_name), position)),
            (_, None) => Ok(Param::None),
        }
    }

    fn array_len(&mut self, array: Option<&ArraySize>, index: usize, position: Position) -> Result<Option<ArrayLen>> {
        match array {
            None => Ok(None),
            Some(ArraySize::Unbounded) => {
                if self.in_arrayed_scope() {
                    return Err(Error::syntax(
                        "unbounded array cannot be placed inside a repeated structure",
                        position,
                    ));
                }
                self.unbounded_at = Some(position);
                Ok(Some(ArrayLen::Unbounded))
            }
            Some(ArraySize::Expression(text)) => {
                let evaluator = self.expression(text, position)?;
                match evaluator.as_constant() {
                    Some(n) => u32::try_from(n)
                        .map(|n| Some(ArrayLen::Constant(n)))
                        .map_err(|_| Error::syntax(format!("invalid array size {}", n), position)),
                    None => Ok(Some(ArrayLen::Expr(self.attach(index, evaluator)))),
                }
            }
        }
    }

    fn attach(&mut self, descriptor: usize, evaluator: Evaluator) -> usize {
        self.evaluators.push(AttachedEvaluator { descriptor, evaluator });
        self.evaluators.len() - 1
    }

    fn expression(&self, text: &str, position: Position) -> Result<Evaluator> {
        let mut resolve = |name: &str, explicit_external: bool| self.resolve_name(name, explicit_external, position);
        compile_expression(text, position, &mut resolve)
    }

    fn resolve_name(&self, name: &str, explicit_external: bool, position: Position) -> Result<Evaluator> {
        if explicit_external {
            return self.external(name, position);
        }
        if let Some(index) = self.lookup_declared(name, position)? {
            if !self.numeric[index] {
                return Err(Error::reference(
                    format!("field '{}' is not a single numeric value", self.named[index].path),
                    position,
                ));
            }
            return Ok(Evaluator::Field(index));
        }
        if self.all_paths.iter().any(|p| path_matches(p, name)) {
            return Err(Error::reference(
                format!("field '{}' is referenced before it is declared", name),
                position,
            ));
        }
        self.external(name, position)
    }

    fn external(&self, name: &str, position: Position) -> Result<Evaluator> {
        if self.options.externals.allows(name) {
            Ok(Evaluator::External(name.to_string()))
        } else {
            Err(Error::reference(format!("unknown field '{}'", name), position))
        }
    }

    /// Resolve among fields declared so far: innermost scope first, then the
    /// shortest path ending with `name`.
    fn lookup_declared(&self, name: &str, position: Position) -> Result<Option<usize>> {
        for scope in self.scopes.iter().rev() {
            if scope.prefix.is_empty() {
                continue;
            }
            let path = join_path(&scope.prefix, name);
            if let Some(i) = self.named.iter().position(|f| f.path == path) {
                return Ok(Some(i));
            }
        }
        if let Some(i) = self.named.iter().position(|f| f.path == name) {
            return Ok(Some(i));
        }
        let candidates: Vec<usize> = (0..self.named.len())
            .filter(|&i| path_matches(&self.named[i].path, name))
            .collect();
        let Some(shortest) = candidates.iter().map(|&i| self.named[i].path.len()).min() else {
            return Ok(None);
        };
        let best: Vec<usize> = candidates
            .into_iter()
            .filter(|&i| self.named[i].path.len() == shortest)
            .collect();
        if best.len() > 1 {
            let paths: Vec<&str> = best.iter().map(|&i| self.named[i].path.as_str()).collect();
            return Err(Error::reference(
                format!("ambiguous field '{}': {}", name, paths.join(", ")),
                position,
            ));
        }
        Ok(best.first().copied())
    }

    fn declare(&mut self, name: &str, offset: usize, numeric: bool, position: Position) -> Result<usize> {
        let path = join_path(self.prefix(), name);
        if !self.paths.insert(path.clone()) {
            return Err(Error::syntax(format!("duplicate field path '{}'", path), position));
        }
        self.named.push(Arc::new(NamedFieldInfo::new(path, name, offset)));
        self.numeric.push(numeric);
        Ok(self.named.len() - 1)
    }

    fn struct_start(&mut self, position: Position, name: Option<&str>, array: Option<&ArraySize>) -> Result<()> {
        let index = self.descriptors.len();
        let array = self.array_len(array, index, position)?;
        let unbounded = array == Some(ArrayLen::Unbounded);
        if unbounded {
            // checked again once the structure closes
            self.unbounded_at = None;
        }
        let named = match name {
            Some(name) => Some(self.declare(name, index, false, position)?),
            None => None,
        };
        let prefix = match named {
            Some(i) => self.named[i].path.clone(),
            None => self.prefix().to_string(),
        };
        let arrayed = array.is_some() || self.in_arrayed_scope();
        self.descriptors.push(Descriptor {
            kind: FieldKind::StructStart,
            byte_order: self.options.default_byte_order,
            param: Param::None,
            array,
            named,
            pair: None,
            position,
        });
        self.scopes.push(Scope {
            prefix,
            start: index,
            arrayed,
            unbounded,
            position,
        });
        Ok(())
    }

    fn struct_end(&mut self, position: Position) -> Result<()> {
        let scope = self
            .scopes
            .pop()
            .ok_or_else(|| Error::syntax("unmatched '}'", position))?;
        let index = self.descriptors.len();
        self.descriptors[scope.start].pair = Some(index);
        let named = self.descriptors[scope.start].named;
        self.descriptors.push(Descriptor {
            kind: FieldKind::StructEnd,
            byte_order: self.options.default_byte_order,
            param: Param::None,
            array: None,
            named,
            pair: Some(scope.start),
            position,
        });
        if scope.unbounded {
            self.unbounded_at = Some(scope.position);
        }
        Ok(())
    }

    fn finish(self, source: &str) -> Result<CompiledBlock> {
        if let Some(scope) = self.scopes.last() {
            return Err(Error::syntax("structure is not closed", scope.position));
        }
        log::debug!(
            "compiled layout: {} descriptors, {} named fields, {} evaluators",
            self.descriptors.len(),
            self.named.len(),
            self.evaluators.len()
        );
        Ok(CompiledBlock {
            source: source.to_string(),
            descriptors: self.descriptors,
            named_fields: self.named,
            evaluators: self.evaluators,
            custom_fields: self.custom_fields,
            custom_types: self.options.custom_types.clone(),
        })
    }
}
