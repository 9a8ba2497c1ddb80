use indoc::{formatdoc, indoc};
use pascal::{
    ast::Type,
    codegen::ENTRY_POINT,
    error::Diagnostics,
    ir::{EvalError, Machine, Module, Value},
    lex::Lexer,
    parse::{self, ParserError},
    semantic::SemanticError,
    source,
};
use pretty_assertions::assert_eq;

fn compile(text: &str) -> Module {
    let program = pascal::load(text.as_bytes(), "test.pas").unwrap_or_else(|error| panic!("{}", error));
    pascal::compile(&program).unwrap_or_else(|error| panic!("{}", Diagnostics::from(error)))
}

/// Runs the program, then reads the final values of some globals.
fn globals(text: &str, names: &[&str]) -> Vec<Value> {
    let module = compile(text);
    let mut machine = Machine::new(&module);

    assert_eq!(machine.call(ENTRY_POINT, &[]), Ok(Some(Value::I32(0))));
    names
        .iter()
        .map(|name| machine.global(name).unwrap_or_else(|| panic!("no global `{}`", name)))
        .collect()
}

fn semantic_error(text: &str) -> SemanticError {
    let program = pascal::load(text.as_bytes(), "test.pas").unwrap_or_else(|error| panic!("{}", error));
    pascal::compile(&program).unwrap_err().into_inner()
}

fn parser_error(text: &str) -> ParserError {
    let (start, stream) = source::consume(text.as_bytes(), "test.pas");
    parse::parse(Lexer::new(start, stream)).unwrap_err().into_inner()
}

#[test]
fn arithmetic_precedence() {
    let text = indoc! {"
        var x, y, z: integer;
        begin
          x := 2 + 3 * 4;
          y := -2 + 3;
          z := -(2 + 3) * 2 mod 4
        end.
    "};

    assert_eq!(
        globals(text, &["x", "y", "z"]),
        [Value::I32(14), Value::I32(-5), Value::I32(-2)]
    );
}

#[test]
fn real_division_of_integers() {
    let text = "const c = 5; var r: real; begin r := c / 2; end.";
    assert_eq!(globals(text, &["r"]), [Value::F64(2.5)]);
}

#[test]
fn real_literals() {
    let text = indoc! {"
        var a, b, c: real;
        begin
          a := 1.5E2;
          b := 25E-1;
          c := 0.125
        end.
    "};

    assert_eq!(
        globals(text, &["a", "b", "c"]),
        [Value::F64(150.0), Value::F64(2.5), Value::F64(0.125)]
    );
}

#[test]
fn implicit_conversions() {
    let text = indoc! {"
        var i, j: integer; r, s: real; c: char; b, t: Boolean;
        begin
          r := 3.75;
          i := r;
          b := 3;
          j := b;
          s := i / 2;
          c := 65;
          t := 1 < 1.5
        end.
    "};

    assert_eq!(
        globals(text, &["i", "b", "j", "s", "c", "t"]),
        [
            Value::I32(3),
            Value::Bool(true),
            Value::I32(1),
            Value::F64(1.5),
            Value::I8(65),
            Value::Bool(true),
        ]
    );
}

#[test]
fn for_loop_iteration_counts() {
    let text = indoc! {"
        var i, n, empty, once, down, none: integer;
        begin
          n := 0; for i := 5 to 3 do n := n + 1; empty := n;
          n := 0; for i := 3 to 3 do n := n + 1; once := n;
          n := 0; for i := 10 downto 1 do n := n + 1; down := n;
          n := 0; for i := 1 downto 10 do n := n + 1; none := n
        end.
    "};

    assert_eq!(
        globals(text, &["empty", "once", "down", "none"]),
        [Value::I32(0), Value::I32(1), Value::I32(10), Value::I32(0)]
    );
}

#[test]
fn for_loop_bound_is_evaluated_every_iteration() {
    let text = indoc! {"
        var i, n, count: integer;
        begin
          n := 10;
          count := 0;
          for i := 1 to n do
          begin
            n := n - 1;
            count := count + 1
          end
        end.
    "};

    assert_eq!(globals(text, &["count", "i"]), [Value::I32(5), Value::I32(6)]);
}

#[test]
fn while_tests_first_and_repeat_tests_last() {
    let text = indoc! {"
        var w, r, k: integer;
        begin
          w := 0;
          r := 0;
          while false do w := w + 1;
          repeat r := r + 1 until true;

          k := 0;
          repeat k := k + 1 until k >= 5
        end.
    "};

    assert_eq!(
        globals(text, &["w", "r", "k"]),
        [Value::I32(0), Value::I32(1), Value::I32(5)]
    );
}

#[test]
fn repeat_runs_like_body_then_while() {
    for start in [0, 9, 10, 25] {
        let text = formatdoc! {"
            var i, j, a, b: integer;
            begin
              i := {start};
              a := 0;
              repeat
                i := i + 3;
                a := a + 1
              until i >= 10;

              j := {start};
              b := 0;
              begin j := j + 3; b := b + 1 end;
              while j < 10 do
                begin j := j + 3; b := b + 1 end
            end.
        ", start = start};

        let values = globals(&text, &["i", "a", "j", "b"]);
        assert_eq!(values[0], values[2], "start = {}", start);
        assert_eq!(values[1], values[3], "start = {}", start);

        let expected = if start == 0 { 4 } else { 1 };
        assert_eq!(values[1], Value::I32(expected), "start = {}", start);
    }
}

#[test]
fn if_without_else() {
    let text = indoc! {"
        var a, b: integer;
        begin
          a := 1;
          b := 1;
          if a = 2 then a := 10;
          if b = 1 then b := 20 else b := 30
        end.
    "};

    assert_eq!(globals(text, &["a", "b"]), [Value::I32(1), Value::I32(20)]);
}

#[test]
fn recursion() {
    let text = indoc! {"
        program factorial;
        var result: integer;

        function fact(n: integer): integer;
        begin
          if n <= 1 then fact := 1 else fact := n * fact(n - 1)
        end;

        begin
          result := fact(10)
        end.
    "};

    let module = compile(text);
    assert_eq!(module.name, "factorial");

    let mut machine = Machine::new(&module);
    assert_eq!(machine.call("fact", &[Value::I32(5)]), Ok(Some(Value::I32(120))));

    machine.call(ENTRY_POINT, &[]).unwrap();
    assert_eq!(machine.global("result"), Some(Value::I32(3628800)));
}

#[test]
fn reference_parameters() {
    let text = indoc! {"
        var a, b, c: integer;

        procedure swap(var x, y: integer);
        var t: integer;
        begin
          t := x;
          x := y;
          y := t
        end;

        procedure bump(var n: integer);
        begin n := n + 10 end;

        procedure twice(var n: integer);
        begin
          bump(n);
          bump(n)
        end;

        begin
          a := 1;
          b := 2;
          c := 3;
          swap(a, b);
          twice(c)
        end.
    "};

    assert_eq!(
        globals(text, &["a", "b", "c"]),
        [Value::I32(2), Value::I32(1), Value::I32(23)]
    );
}

#[test]
fn nested_functions_see_globals_and_constants() {
    let text = indoc! {"
        var g: integer;

        function outer(n: integer): integer;
        const k = 100;

          function inner(m: integer): integer;
          begin inner := m + k + g end;

        begin
          outer := inner(n)
        end;

        begin
          g := 5;
          g := outer(1)
        end.
    "};

    assert_eq!(globals(text, &["g", "program.outer.k"]), [Value::I32(106), Value::I32(100)]);
}

#[test]
fn a_function_named_main_is_not_the_entry_point() {
    let text = indoc! {"
        var r: integer;
        function main: integer;
        begin main := 7 end;
        begin r := main() end.
    "};

    assert_eq!(globals(text, &["r"]), [Value::I32(7)]);
}

#[test]
fn names_ignore_case() {
    let text = "VAR Total: Integer; BEGIN total := 1; TOTAL := Total + 1 END.";
    assert_eq!(globals(text, &["Total"]), [Value::I32(2)]);
}

#[test]
fn division_by_zero_fails_at_runtime() {
    let module = compile("var x, y: integer; begin x := 1 div y end.");
    let mut machine = Machine::new(&module);
    assert_eq!(machine.call(ENTRY_POINT, &[]), Err(EvalError::DivisionByZero));
}

#[test]
fn call_errors() {
    let decls = indoc! {"
        var a: integer; r: real;
        procedure p(x: integer); begin end;
        procedure swap(var x, y: integer); begin end;
    "};

    let error = |body: &str| semantic_error(&format!("{} begin {} end.", decls, body));

    assert!(matches!(
        error("p(1, 2)"),
        SemanticError::ArityMismatch {
            expected: 1,
            found: 2,
            ..
        }
    ));

    assert!(matches!(error("swap(a, 1)"), SemanticError::IllegalReferenceArgument(_)));
    assert!(matches!(
        error("swap(a, r)"),
        SemanticError::IllegalCast {
            from: Type::Real,
            to: Type::Integer
        }
    ));
    assert!(matches!(error("foo(1)"), SemanticError::UndeclaredFunction(_)));
    assert!(matches!(error("a := b"), SemanticError::UndeclaredIdentifier(_)));
}

#[test]
fn redeclarations_are_parse_errors() {
    assert!(matches!(
        parser_error("var x: integer; x: real; begin end."),
        ParserError::Redeclaration(_)
    ));

    assert!(matches!(
        parser_error("procedure p(a, a: integer); begin end; begin end."),
        ParserError::Redeclaration(_)
    ));
}

#[test]
fn semantic_diagnostics_point_at_the_name() {
    let text = indoc! {"
        begin
          foo(1)
        end.
    "};

    let program = pascal::load(text.as_bytes(), "test.pas").unwrap_or_else(|error| panic!("{}", error));
    let error = pascal::compile(&program).unwrap_err();

    assert_eq!(
        Diagnostics::from(error).to_string(),
        indoc! {"
            error: Undeclared function `foo`
             --> test.pas:2:3
              |
            2 |   foo(1)
              |   ^

            Build failed with 1 error
        "}
    );
}
