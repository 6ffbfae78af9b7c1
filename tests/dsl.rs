//! DSL tests: syntax (compile success/failure), name resolution, determinism,
//! expression introspection.

use binlayout::{
    compile, compile_with, tokenize, ArrayLen, BinaryOp, BitInput, BitOutput, CompileOptions, CustomField,
    CustomFieldType, Error, Evaluator, ExpressionVisitor, ExternalFields, FieldKind, NamedFieldInfo, Param, Special,
    TokenKind, Value,
};
use std::sync::Arc;

fn syntax_error(src: &str) -> Error {
    match compile(src) {
        Err(e @ Error::Syntax { .. }) => e,
        other => panic!("expected syntax error for {:?}, got {:?}", src, other.map(|_| ())),
    }
}

fn reference_error(src: &str) -> Error {
    match compile(src) {
        Err(e @ Error::Reference { .. }) => e,
        other => panic!("expected reference error for {:?}, got {:?}", src, other.map(|_| ())),
    }
}

// ==================== Syntax: valid scripts ====================

#[test]
fn empty_script_compiles_to_empty_block() {
    let block = compile("  // nothing here\n").expect("compile");
    assert!(block.descriptors().is_empty());
    assert!(block.named_fields().is_empty());
}

#[test]
fn every_type_name_is_accepted() {
    let src = r#"
bool a; byte b; ubyte c; short d; ushort e; int f; uint g; long h;
floatj i; doublej j; bit k; bit:7 l; stringj s;
align; align:4; skip; skip:2; reset$$; val:(b + 1) m;
"#;
    let block = compile(src).expect("compile");
    let kinds: Vec<FieldKind> = block.descriptors().iter().map(|d| d.kind).collect();
    assert_eq!(
        kinds,
        [
            FieldKind::Bool,
            FieldKind::Byte,
            FieldKind::UByte,
            FieldKind::Short,
            FieldKind::UShort,
            FieldKind::Int,
            FieldKind::UInt,
            FieldKind::Long,
            FieldKind::Float,
            FieldKind::Double,
            FieldKind::Bit,
            FieldKind::Bit,
            FieldKind::Str,
            FieldKind::Align,
            FieldKind::Align,
            FieldKind::Skip,
            FieldKind::Skip,
            FieldKind::ResetCounter,
            FieldKind::Val,
        ]
    );
    assert_eq!(block.descriptors()[10].param, Param::Constant(1));
    assert_eq!(block.descriptors()[11].param, Param::Constant(7));
    assert_eq!(block.descriptors()[13].param, Param::Constant(1));
}

#[test]
fn anonymous_structures_add_no_path_segment() {
    let block = compile("{ byte a; inner { byte b; } } byte [inner.b] c;").expect("compile");
    assert!(block.find_field_by_path("a").is_some());
    assert!(block.find_field_by_path("inner.b").is_some());
    assert_eq!(block.descriptors()[0].named, None);
}

#[test]
fn hex_literals_and_bitwise_operators() {
    let block = compile("byte [0x10 >> 2 | 1] a; byte [(3 & ~1) ^ 0x4] b;").expect("compile");
    assert_eq!(block.descriptors()[0].array, Some(ArrayLen::Constant(5)));
    assert_eq!(block.descriptors()[1].array, Some(ArrayLen::Constant(6)));
}

#[test]
fn arithmetic_precedence_in_array_sizes() {
    let block = compile("byte [2 + 3 * 4] a; byte [-2 + 10 % 4 * 3] b; byte [(2 + 3) * 4] c;").expect("compile");
    let sizes: Vec<_> = block.descriptors().iter().map(|d| d.array).collect();
    assert_eq!(
        sizes,
        [Some(ArrayLen::Constant(14)), Some(ArrayLen::Constant(4)), Some(ArrayLen::Constant(20))]
    );
}

// ==================== Syntax: invalid scripts ====================

#[test]
fn unknown_type_reports_position() {
    let err = syntax_error("byte a;\n  word b;");
    let pos = err.position().expect("position");
    assert_eq!((pos.line, pos.column), (2, 3));
}

/// Scalar-only custom type: `var` with an optional `:n` width in bits.
struct ScalarVar;

impl CustomFieldType for ScalarVar {
    fn type_names(&self) -> &[&str] {
        &["var"]
    }

    fn is_allowed(&self, _type_name: &str, _has_extra: bool, is_array: bool) -> bool {
        !is_array
    }

    fn read(&self, input: &mut dyn BitInput, field: &CustomField<'_>) -> binlayout::Result<Value> {
        Ok(Value::Long(input.read_bits(field.extra.unwrap_or(8) as u32)? as i64))
    }

    fn write(&self, output: &mut dyn BitOutput, field: &CustomField<'_>, value: &Value) -> binlayout::Result<()> {
        output.write_bits(value.as_i64().unwrap_or(0) as u64, field.extra.unwrap_or(8) as u32)
    }
}

#[test]
fn custom_types_extend_the_type_names() {
    syntax_error("var a;");

    let options = CompileOptions::default().with_custom_type(Arc::new(ScalarVar));
    let block = compile_with("byte n; var:(n) a; var b;", &options).expect("compile");
    assert_eq!(block.descriptors()[1].kind, FieldKind::Custom(0));
    assert_eq!(block.descriptors()[2].kind, FieldKind::Custom(1));
    assert!(matches!(block.descriptors()[1].param, Param::Expr(_)));
    assert_eq!(block.type_name(&block.descriptors()[2]), "var");
    assert_eq!(block.custom_fields().len(), 2);

    let err = compile_with("var [2] a;", &options).unwrap_err();
    assert!(matches!(err, Error::Syntax { .. }));
}

#[test]
fn brace_errors() {
    syntax_error("}");
    syntax_error("a { byte x; } }");
    let err = syntax_error("a {\n b { byte x; }\n");
    assert_eq!(err.position().map(|p| p.line), Some(1));
}

#[test]
fn duplicate_paths() {
    syntax_error("byte a; int a;");
    syntax_error("s { byte a; byte a; }");
    syntax_error("s { byte a; } s { byte b; }");
    // same short name in different structures is fine
    compile("s { byte a; } t { byte a; }").expect("compile");
    // anonymous structures share their parent's namespace
    syntax_error("byte a; { byte a; }");
}

#[test]
fn malformed_tokens() {
    syntax_error("byte a");
    syntax_error("byte [3 a;");
    syntax_error("bit:(1+ x;");
    syntax_error("byte [1 +] a;");
    syntax_error("byte [(1] a;");
    syntax_error("bit:2x a;");
}

#[test]
fn invalid_type_parameters() {
    syntax_error("bit:9 a;");
    syntax_error("bit:(2*5) a;");
    syntax_error("byte:2 a;");
    syntax_error("align:0;");
    syntax_error("val x;");
    syntax_error("val:(1);");
    syntax_error("align a;");
    syntax_error("reset$$ [2];");
}

#[test]
fn literal_zero_divisor_is_rejected_at_compile_time() {
    syntax_error("byte [10 / 0] a;");
    syntax_error("byte n; byte [n % (2 - 2)] a;");
}

// ==================== Name resolution ====================

#[test]
fn forward_and_unknown_references() {
    reference_error("byte [later] a; byte later;");
    reference_error("s { byte [t.x] a; } t { byte x; }");
    let deny = CompileOptions::default().with_externals(ExternalFields::None);
    assert!(matches!(compile_with("byte [missing] a;", &deny), Err(Error::Reference { .. })));
}

#[test]
fn ambiguous_short_name() {
    let err = reference_error("a { byte len; } b { byte len; } byte [len] data;");
    assert!(err.to_string().contains("a.len"), "{}", err);
    // the full path disambiguates
    compile("a { byte len; } b { byte len; } byte [b.len] data;").expect("compile");
}

#[test]
fn only_scalar_numeric_fields_can_be_referenced() {
    reference_error("byte [2] arr; byte [arr] x;");
    reference_error("s { byte a; } byte [s] x;");
    reference_error("floatj f; byte [f] x;");
    compile("bool b; bit:2 k; val:(k+1) v; byte [b + k + v] x;").expect("compile");
}

#[test]
fn resolved_references_use_field_indices() {
    let block = compile("byte n; hdr { <ushort len; } byte [len - n] body;").expect("compile");
    let body = block.find_field_by_path("body").expect("body").offset;
    let eval = block.evaluators_for(body).next().expect("evaluator");
    match eval {
        Evaluator::Binary(BinaryOp::Sub, l, r) => {
            assert_eq!(**l, Evaluator::Field(2));
            assert_eq!(**r, Evaluator::Field(0));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(block.named_fields()[2].path, "hdr.len");
}

// ==================== Unbounded arrays ====================

#[test]
fn unbounded_array_must_be_the_last_declaration() {
    compile("byte a; byte [_] rest;").expect("compile");
    compile("outer { inner { bit:4 [_] rest; } }").expect("compile");
    syntax_error("byte [_] rest; byte a;");
    syntax_error("s { byte [_] rest; byte a; }");
    syntax_error("s { byte [_] rest; } byte a;");
    syntax_error("s { byte [_] rest; } t { }");
    syntax_error("byte [_] a; byte [_] b;");
}

#[test]
fn unbounded_array_rejected_inside_repeated_structure() {
    syntax_error("s [2] { byte [_] rest; }");
    syntax_error("s [_] { t { byte [_] rest; } }");
    compile("s [_] { byte a; <ushort b; }").expect("compile");
}

// ==================== Determinism ====================

#[test]
fn compiling_twice_gives_identical_blocks() {
    let src = r#"
byte count;
items [count] {
  bit:3 kind;
  bit:(kind + 1) width;
  byte [width * 2] data;
}
val:(count * 2) doubled;
byte [$ + doubled] rest;
"#;
    let a = compile(src).expect("compile");
    let b = compile(src).expect("compile");
    assert_eq!(a, b);
    let offsets: Vec<usize> = a.named_fields().iter().map(|f| f.offset).collect();
    assert_eq!(offsets, [0, 1, 2, 3, 4, 6, 7]);
}

// ==================== Tokens and expression visitor ====================

#[test]
fn tokens_keep_expression_text_opaque() {
    let tokens = tokenize("<int:(a+b) [x*(y+1)] v;").expect("tokenize");
    match &tokens[0].kind {
        TokenKind::Field { type_name, name, .. } => {
            assert_eq!(type_name, "int");
            assert_eq!(name.as_deref(), Some("v"));
        }
        other => panic!("unexpected {:?}", other),
    }
    // the compiler, not the tokenizer, rejects parameters on int
    syntax_error("<int:(a+b) [x*(y+1)] v;");
}

#[derive(Default)]
struct Collect {
    fields: Vec<String>,
    externals: Vec<String>,
    counters: usize,
    constants: Vec<i64>,
}

impl ExpressionVisitor for Collect {
    fn visit_field(&mut self, named: Option<&NamedFieldInfo>, external: Option<&str>) {
        if let Some(info) = named {
            self.fields.push(info.path.clone());
        }
        if let Some(name) = external {
            self.externals.push(name.to_string());
        }
    }

    fn visit_special(&mut self, special: Special) {
        assert_eq!(special, Special::StreamCounter);
        self.counters += 1;
    }

    fn visit_constant(&mut self, value: i64) {
        self.constants.push(value);
    }
}

#[test]
fn visitor_sees_every_leaf() {
    let block = compile("hdr { byte n; } byte [(hdr.n + $limit) * 2 - $] data;").expect("compile");
    let eval = block.evaluators_for(3).next().expect("evaluator");
    let mut c = Collect::default();
    eval.visit_items(&block, &mut c);
    assert_eq!(c.fields, ["hdr.n"]);
    assert_eq!(c.externals, ["limit"]);
    assert_eq!(c.counters, 1);
    assert_eq!(c.constants, [2]);
    assert_eq!(eval.render(&block), "(((hdr.n + $limit) * 2) - $$)");
}
