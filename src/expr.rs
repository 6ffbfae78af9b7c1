//! Integer expressions for dynamic bit widths and array lengths.
//!
//! An [`Evaluator`] is a small tagged tree: leaves are constants, references to
//! earlier numeric fields, external names and the stream counter `$`; inner
//! nodes are unary/binary operators. Evaluation is eager and happens when the
//! dependent field is reached during a pass.

use crate::block::{CompiledBlock, NamedFieldInfo};
use crate::error::{Error, Position, Result};
use crate::field_map::NamedNumericFieldMap;
use crate::tokenizer::{syntax_error_from_pest, Rule, ScriptParser};
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    And,
    Xor,
    Or,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "~",
        }
    }

    fn apply(self, v: i64) -> i64 {
        match self {
            UnaryOp::Neg => v.wrapping_neg(),
            UnaryOp::Not => !v,
        }
    }
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::And => "&",
            BinaryOp::Xor => "^",
            BinaryOp::Or => "|",
        }
    }

    fn apply(self, l: i64, r: i64) -> Result<i64> {
        Ok(match self {
            BinaryOp::Add => l.wrapping_add(r),
            BinaryOp::Sub => l.wrapping_sub(r),
            BinaryOp::Mul => l.wrapping_mul(r),
            BinaryOp::Div | BinaryOp::Rem if r == 0 => {
                return Err(Error::Arithmetic(format!("{} by zero", self.name())))
            }
            BinaryOp::Div => l.wrapping_div(r),
            BinaryOp::Rem => l.wrapping_rem(r),
            BinaryOp::Shl => l.wrapping_shl((r & 63) as u32),
            BinaryOp::Shr => l.wrapping_shr((r & 63) as u32),
            BinaryOp::And => l & r,
            BinaryOp::Xor => l ^ r,
            BinaryOp::Or => l | r,
        })
    }

    fn name(self) -> &'static str {
        match self {
            BinaryOp::Div => "division",
            BinaryOp::Rem => "modulo",
            _ => self.symbol(),
        }
    }
}

/// Pseudo-variables an expression can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Special {
    /// `$`: bytes consumed or produced so far in the pass.
    StreamCounter,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    Constant(i64),
    /// Index into the block's named fields; always an earlier numeric field.
    Field(usize),
    /// Name supplied by the caller's resolver at run time.
    External(String),
    StreamCounter,
    Unary(UnaryOp, Box<Evaluator>),
    Binary(BinaryOp, Box<Evaluator>, Box<Evaluator>),
}

/// Receives expression items in a fixed pre-order: an operator before its operands.
pub trait ExpressionVisitor {
    fn visit_start(&mut self) {}
    /// Exactly one of `named` and `external` is set.
    fn visit_field(&mut self, named: Option<&NamedFieldInfo>, external: Option<&str>);
    fn visit_special(&mut self, special: Special);
    fn visit_constant(&mut self, _value: i64) {}
    fn visit_unary(&mut self, _op: UnaryOp) {}
    fn visit_binary(&mut self, _op: BinaryOp) {}
    fn visit_end(&mut self) {}
}

impl Evaluator {
    /// Evaluate against the numeric values of the current pass.
    pub fn eval(&self, block: &CompiledBlock, fields: &NamedNumericFieldMap<'_>, stream_counter: u64) -> Result<i64> {
        self.eval_node(self, block, fields, stream_counter)
    }

    fn eval_node(
        &self,
        root: &Evaluator,
        block: &CompiledBlock,
        fields: &NamedNumericFieldMap<'_>,
        stream_counter: u64,
    ) -> Result<i64> {
        match self {
            Evaluator::Constant(v) => Ok(*v),
            Evaluator::Field(index) => {
                let info = &block.named_fields()[*index];
                fields.get(info).ok_or_else(|| {
                    Error::Arithmetic(format!("field '{}' has no numeric value yet", info.path))
                })
            }
            Evaluator::External(name) => fields.external_value(name, block, root),
            Evaluator::StreamCounter => Ok(stream_counter as i64),
            Evaluator::Unary(op, inner) => Ok(op.apply(inner.eval_node(root, block, fields, stream_counter)?)),
            Evaluator::Binary(op, l, r) => {
                let l = l.eval_node(root, block, fields, stream_counter)?;
                let r = r.eval_node(root, block, fields, stream_counter)?;
                op.apply(l, r)
            }
        }
    }

    pub fn as_constant(&self) -> Option<i64> {
        match self {
            Evaluator::Constant(v) => Some(*v),
            _ => None,
        }
    }

    /// Walk all items, wrapped in `visit_start`/`visit_end`.
    pub fn visit_items(&self, block: &CompiledBlock, visitor: &mut dyn ExpressionVisitor) {
        visitor.visit_start();
        self.visit_node(block, visitor);
        visitor.visit_end();
    }

    fn visit_node(&self, block: &CompiledBlock, visitor: &mut dyn ExpressionVisitor) {
        match self {
            Evaluator::Constant(v) => visitor.visit_constant(*v),
            Evaluator::Field(index) => visitor.visit_field(Some(&block.named_fields()[*index]), None),
            Evaluator::External(name) => visitor.visit_field(None, Some(name)),
            Evaluator::StreamCounter => visitor.visit_special(Special::StreamCounter),
            Evaluator::Unary(op, inner) => {
                visitor.visit_unary(*op);
                inner.visit_node(block, visitor);
            }
            Evaluator::Binary(op, l, r) => {
                visitor.visit_binary(*op);
                l.visit_node(block, visitor);
                r.visit_node(block, visitor);
            }
        }
    }

    /// Fully parenthesized text of the expression, rebuilt through [`ExpressionVisitor`].
    pub fn render(&self, block: &CompiledBlock) -> String {
        let mut printer = ExpressionPrinter::default();
        self.visit_items(block, &mut printer);
        printer.out
    }
}

#[derive(Default)]
struct ExpressionPrinter {
    stack: Vec<(String, usize, Vec<String>)>,
    out: String,
}

impl ExpressionPrinter {
    fn leaf(&mut self, text: String) {
        let mut text = text;
        loop {
            match self.stack.last_mut() {
                None => {
                    self.out = text;
                    return;
                }
                Some((op, arity, operands)) => {
                    operands.push(text);
                    if operands.len() < *arity {
                        return;
                    }
                    text = if *arity == 1 {
                        format!("{}{}", op, operands[0])
                    } else {
                        format!("({} {} {})", operands[0], op, operands[1])
                    };
                    self.stack.pop();
                }
            }
        }
    }
}

impl ExpressionVisitor for ExpressionPrinter {
    fn visit_field(&mut self, named: Option<&NamedFieldInfo>, external: Option<&str>) {
        let text = match (named, external) {
            (Some(info), _) => info.path.clone(),
            (None, Some(name)) => format!("${}", name),
            (None, None) => String::new(),
        };
        self.leaf(text);
    }

    fn visit_special(&mut self, special: Special) {
        match special {
            Special::StreamCounter => self.leaf("$$".to_string()),
        }
    }

    fn visit_constant(&mut self, value: i64) {
        self.leaf(value.to_string());
    }

    fn visit_unary(&mut self, op: UnaryOp) {
        self.stack.push((op.symbol().to_string(), 1, Vec::new()));
    }

    fn visit_binary(&mut self, op: BinaryOp) {
        self.stack.push((op.symbol().to_string(), 2, Vec::new()));
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

// ==================== Parsing ====================

/// Resolves a name met in an expression. The flag is set for explicit `$name` externals.
pub(crate) type NameResolver<'r> = dyn FnMut(&str, bool) -> Result<Evaluator> + 'r;

fn pratt() -> &'static PrattParser<Rule> {
    static PRATT: OnceLock<PrattParser<Rule>> = OnceLock::new();
    PRATT.get_or_init(|| {
        PrattParser::new()
            .op(Op::infix(Rule::bor, Assoc::Left))
            .op(Op::infix(Rule::bxor, Assoc::Left))
            .op(Op::infix(Rule::band, Assoc::Left))
            .op(Op::infix(Rule::shl, Assoc::Left) | Op::infix(Rule::shr, Assoc::Left))
            .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
            .op(Op::infix(Rule::mul, Assoc::Left) | Op::infix(Rule::div, Assoc::Left) | Op::infix(Rule::rem, Assoc::Left))
            .op(Op::prefix(Rule::neg) | Op::prefix(Rule::pos) | Op::prefix(Rule::bnot))
    })
}

/// Parse expression text into an evaluator, folding constant sub-expressions.
/// `position` is the location of the enclosing token, used for error reports.
pub(crate) fn compile_expression(text: &str, position: Position, resolve: &mut NameResolver<'_>) -> Result<Evaluator> {
    let mut pairs = ScriptParser::parse(Rule::expression, text).map_err(|e| {
        let inner = syntax_error_from_pest(e);
        let column = inner.position().map(|p| p.column).unwrap_or(0);
        Error::syntax(
            format!("in expression '{}' at column {}: {}", text, column, strip_prefix(&inner)),
            position,
        )
    })?;
    let expression = pairs
        .next()
        .ok_or_else(|| Error::syntax(format!("empty expression '{}'", text), position))?;
    let expr = expression
        .into_inner()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or_else(|| Error::syntax(format!("empty expression '{}'", text), position))?;
    build_expr(expr.into_inner(), position, resolve)
}

fn strip_prefix(e: &Error) -> String {
    match e {
        Error::Syntax { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

fn build_expr(pairs: Pairs<Rule>, position: Position, resolve: &mut NameResolver<'_>) -> Result<Evaluator> {
    pratt()
        .map_primary(|p| build_primary(p, position, &mut *resolve))
        .map_prefix(|op, rhs| {
            let rhs = rhs?;
            match op.as_rule() {
                Rule::neg => Ok(fold_unary(UnaryOp::Neg, rhs)),
                Rule::bnot => Ok(fold_unary(UnaryOp::Not, rhs)),
                _ => Ok(rhs),
            }
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::add => BinaryOp::Add,
                Rule::sub => BinaryOp::Sub,
                Rule::mul => BinaryOp::Mul,
                Rule::div => BinaryOp::Div,
                Rule::rem => BinaryOp::Rem,
                Rule::shl => BinaryOp::Shl,
                Rule::shr => BinaryOp::Shr,
                Rule::band => BinaryOp::And,
                Rule::bxor => BinaryOp::Xor,
                _ => BinaryOp::Or,
            };
            fold_binary(op, lhs?, rhs?, position)
        })
        .parse(pairs)
}

fn build_primary(pair: Pair<Rule>, position: Position, resolve: &mut NameResolver<'_>) -> Result<Evaluator> {
    let text = pair.as_str();
    match pair.as_rule() {
        Rule::number => text
            .parse::<i64>()
            .map(Evaluator::Constant)
            .map_err(|_| Error::syntax(format!("invalid number '{}'", text), position)),
        Rule::hex_number => i64::from_str_radix(&text[2..], 16)
            .map(Evaluator::Constant)
            .map_err(|_| Error::syntax(format!("invalid hex number '{}'", text), position)),
        Rule::counter => Ok(Evaluator::StreamCounter),
        Rule::external_ref => resolve(&text[1..], true),
        Rule::field_ref => resolve(text, false),
        Rule::expr => build_expr(pair.into_inner(), position, &mut *resolve),
        other => Err(Error::syntax(format!("unexpected {:?} in expression", other), position)),
    }
}

fn fold_unary(op: UnaryOp, operand: Evaluator) -> Evaluator {
    match operand {
        Evaluator::Constant(v) => Evaluator::Constant(op.apply(v)),
        other => Evaluator::Unary(op, Box::new(other)),
    }
}

fn fold_binary(op: BinaryOp, l: Evaluator, r: Evaluator, position: Position) -> Result<Evaluator> {
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && r.as_constant() == Some(0) {
        return Err(Error::syntax(format!("{} by constant zero", op.name()), position));
    }
    match (&l, &r) {
        (Evaluator::Constant(a), Evaluator::Constant(b)) => Ok(Evaluator::Constant(op.apply(*a, *b)?)),
        _ => Ok(Evaluator::Binary(op, Box::new(l), Box::new(r))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use std::collections::HashMap;

    fn constant(text: &str) -> Result<Evaluator> {
        let mut no_names = |name: &str, _: bool| -> Result<Evaluator> {
            Err(Error::reference(format!("unknown '{}'", name), Position::default()))
        };
        compile_expression(text, Position::default(), &mut no_names)
    }

    fn external(text: &str) -> Evaluator {
        let mut all_external = |name: &str, _: bool| -> Result<Evaluator> { Ok(Evaluator::External(name.to_string())) };
        compile_expression(text, Position::default(), &mut all_external).unwrap()
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(constant("1 + 2 * 3").unwrap(), Evaluator::Constant(7));
        assert_eq!(constant("(1 + 2) * 3").unwrap(), Evaluator::Constant(9));
        assert_eq!(constant("10 - 3 - 2").unwrap(), Evaluator::Constant(5));
        assert_eq!(constant("-2 * 3").unwrap(), Evaluator::Constant(-6));
        assert_eq!(constant("7 % 4 + 100 / 10").unwrap(), Evaluator::Constant(13));
        assert_eq!(constant("1 << 4 | 1").unwrap(), Evaluator::Constant(17));
        assert_eq!(constant("0x10 & ~1").unwrap(), Evaluator::Constant(16));
        assert_eq!(constant("--3").unwrap(), Evaluator::Constant(3));
    }

    #[test]
    fn literal_zero_divisor_is_rejected() {
        assert!(matches!(constant("4 / 0"), Err(Error::Syntax { .. })));
        assert!(matches!(constant("4 % (2 - 2)"), Err(Error::Syntax { .. })));
        let mut ext = |name: &str, _: bool| -> Result<Evaluator> { Ok(Evaluator::External(name.to_string())) };
        assert!(compile_expression("a / 0", Position::default(), &mut ext).is_err());
    }

    #[test]
    fn malformed_expressions() {
        assert!(matches!(constant("(1 + 2"), Err(Error::Syntax { .. })));
        assert!(matches!(constant("1 +"), Err(Error::Syntax { .. })));
        assert!(matches!(constant("12a"), Err(Error::Syntax { .. })));
        assert!(matches!(constant("a"), Err(Error::Reference { .. })));
    }

    #[test]
    fn runtime_division_by_zero_fails_every_time() {
        let block = compile("byte [ext] data;").unwrap();
        let eval = external("10 / d");
        let mut values = HashMap::new();
        values.insert("d".to_string(), 0i64);
        let map = NamedNumericFieldMap::new(&block, Some(&values));
        for _ in 0..2 {
            assert!(matches!(eval.eval(&block, &map, 0), Err(Error::Arithmetic(_))));
        }
        values.insert("d".to_string(), 5i64);
        let map = NamedNumericFieldMap::new(&block, Some(&values));
        assert_eq!(eval.eval(&block, &map, 0).unwrap(), 2);
        assert_eq!(eval.eval(&block, &map, 0).unwrap(), 2);
    }

    #[test]
    fn stream_counter_reads_position() {
        let block = compile("byte a;").unwrap();
        let map = NamedNumericFieldMap::new(&block, None);
        assert_eq!(external("$ + 1").eval(&block, &map, 4).unwrap(), 5);
        assert_eq!(external("$$ * 2").eval(&block, &map, 4).unwrap(), 8);
    }

    #[derive(Default)]
    struct Recorder(Vec<String>);

    impl ExpressionVisitor for Recorder {
        fn visit_start(&mut self) {
            self.0.push("start".into());
        }
        fn visit_field(&mut self, named: Option<&NamedFieldInfo>, external: Option<&str>) {
            match (named, external) {
                (Some(n), None) => self.0.push(format!("field:{}", n.path)),
                (None, Some(e)) => self.0.push(format!("ext:{}", e)),
                _ => self.0.push("invalid".into()),
            }
        }
        fn visit_special(&mut self, _special: Special) {
            self.0.push("counter".into());
        }
        fn visit_binary(&mut self, op: BinaryOp) {
            self.0.push(op.symbol().into());
        }
        fn visit_end(&mut self) {
            self.0.push("end".into());
        }
    }

    #[test]
    fn visitor_walks_in_pre_order() {
        let block = compile("byte n; byte [n * ext + $] data;").unwrap();
        let eval = block.evaluators_for(1).next().unwrap();
        let mut rec = Recorder::default();
        eval.visit_items(&block, &mut rec);
        assert_eq!(rec.0, vec!["start", "+", "*", "field:n", "ext:ext", "counter", "end"]);
        assert_eq!(eval.render(&block), "((n * $ext) + $$)");
    }
}
