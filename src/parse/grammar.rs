use winnow::ascii::{Caseless, dec_int, digit1, till_line_ending};
use winnow::combinator::{alt, cut_err, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::error::{ContextError, ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use crate::types::{Ast, Definition, Program, Value, call, custom, list};

fn expected(what: &'static str) -> StrContext {
    StrContext::Expected(StrContextValue::Description(what))
}

// -- Whitespace & comments --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    repeat(
        0..,
        alt((
            take_while(1.., |c: char| c.is_whitespace()).void(),
            ('#', till_line_ending).void(),
        )),
    )
    .parse_next(input)
}

// -- Identifiers & keywords -------------------------------------------------

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// A feature or function name. Function names may carry a package prefix.
fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., |c: char| is_ident_char(c) || c == '.'),
    )
        .take()
        .parse_next(input)
}

fn keyword<'i>(kw: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(Caseless(kw), not(one_of(is_ident_char)))
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    '"'.parse_next(input)?;
    let mut out = String::new();
    loop {
        match any.parse_next(input)? {
            '"' => return Ok(out),
            '\\' => out.push(escape.parse_next(input)?),
            c => out.push(c),
        }
    }
}

fn escape(input: &mut &str) -> ModalResult<char> {
    match any.parse_next(input)? {
        'n' => Ok('\n'),
        't' => Ok('\t'),
        'r' => Ok('\r'),
        '0' => Ok('\0'),
        'u' => delimited('{', take_while(1..=6, |c: char| c.is_ascii_hexdigit()), '}')
            .verify_map(|hex: &str| u32::from_str_radix(hex, 16).ok().and_then(char::from_u32))
            .context(expected("unicode escape"))
            .parse_next(input),
        other => Ok(other),
    }
}

fn float_literal(input: &mut &str) -> ModalResult<f64> {
    let exponent = || (one_of(['e', 'E']), opt(one_of(['+', '-'])), digit1);
    (
        opt('-'),
        digit1,
        alt((('.', digit1, opt(exponent())).void(), exponent().void())),
    )
        .take()
        .try_map(str::parse::<f64>)
        .parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<Value> {
    alt((float_literal.map(Value::Float), dec_int::<_, i64, _>.map(Value::Int))).parse_next(input)
}

// -- Expressions (precedence: OR < AND < NOT < equality < primary) -----------

fn list_literal(input: &mut &str) -> ModalResult<Ast> {
    delimited(
        '[',
        separated(0.., expr, (ws, ',')),
        (ws, opt(','), ws, ']'),
    )
    .map(list)
    .parse_next(input)
}

/// Everything up to the `)` closing an already opened call, with nested
/// parentheses and string literals skipped over.
fn raw_call_source<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in input.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' => depth += 1,
            ')' if depth == 0 => {
                let raw = &input[..offset];
                *input = &input[offset + 1..];
                return Ok(raw);
            }
            ')' => depth -= 1,
            _ => {}
        }
    }
    Err(ErrMode::from_input(input).cut())
}

fn call_or_feature(input: &mut &str) -> ModalResult<Ast> {
    let name = ident.parse_next(input)?;
    if opt((ws, '(')).parse_next(input)?.is_none() {
        return Ok(match name {
            "true" => Ast::Constant(Value::Bool(true)),
            "false" => Ast::Constant(Value::Bool(false)),
            "null" => Ast::Constant(Value::Null),
            _ => Ast::Feature(name.to_owned()),
        });
    }

    // Arguments that are not an expression list are custom syntax.
    let checkpoint = input.checkpoint();
    let args: Result<Vec<Ast>, _> =
        terminated(separated(0.., expr, (ws, ',')), (ws, ')')).parse_next(input);
    match args {
        Ok(args) => Ok(call(name, args)),
        Err(ErrMode::Backtrack(_)) => {
            input.reset(&checkpoint);
            let source = raw_call_source.parse_next(input)?;
            Ok(custom(name, source.trim()))
        }
        Err(err) => Err(err),
    }
}

fn primary(input: &mut &str) -> ModalResult<Ast> {
    ws.parse_next(input)?;
    alt((
        delimited('(', expr, (ws, ')')),
        string_literal.map(|s| Ast::Constant(Value::String(s))),
        number.map(Ast::Constant),
        list_literal,
        call_or_feature,
    ))
    .context(expected("expression"))
    .parse_next(input)
}

fn equality(input: &mut &str) -> ModalResult<Ast> {
    let left = primary(input)?;
    let op = opt(preceded(ws, alt(("==", "!=")))).parse_next(input)?;
    let Some(op) = op else {
        return Ok(left);
    };
    let right = primary(input)?;
    let eq = call("eq", vec![left, right]);
    Ok(if op == "!=" { call("not", vec![eq]) } else { eq })
}

fn unary(input: &mut &str) -> ModalResult<Ast> {
    ws.parse_next(input)?;
    if opt(keyword("NOT")).parse_next(input)?.is_some() {
        let inner = unary(input)?;
        Ok(call("not", vec![inner]))
    } else {
        equality(input)
    }
}

fn and_expr(input: &mut &str) -> ModalResult<Ast> {
    let first = unary(input)?;
    let rest: Vec<Ast> = repeat(0.., preceded((ws, keyword("AND")), unary)).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, next| call("and", vec![acc, next])))
}

fn or_expr(input: &mut &str) -> ModalResult<Ast> {
    let first = and_expr(input)?;
    let rest: Vec<Ast> = repeat(0.., preceded((ws, keyword("OR")), and_expr)).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, next| call("or", vec![acc, next])))
}

fn expr(input: &mut &str) -> ModalResult<Ast> {
    ws.parse_next(input)?;
    or_expr(input)
}

// -- Definitions ------------------------------------------------------------

fn statement_calls(input: &mut &str) -> ModalResult<Vec<Ast>> {
    separated(1.., expr, (ws, ','))
        .context(expected("statement call"))
        .parse_next(input)
}

fn end_of_definition(input: &mut &str) -> ModalResult<()> {
    cut_err((ws, ';').void())
        .context(expected("`;`"))
        .parse_next(input)
}

fn let_def(input: &mut &str) -> ModalResult<Definition> {
    keyword("LET").parse_next(input)?;
    let name = cut_err(preceded(ws, ident))
        .context(expected("feature name"))
        .parse_next(input)?;
    cut_err((ws, ":="))
        .context(expected("`:=`"))
        .parse_next(input)?;
    let expr = cut_err(expr).parse_next(input)?;
    end_of_definition(input)?;
    Ok(Definition::Let {
        name: name.to_owned(),
        expr,
    })
}

fn when_def(input: &mut &str) -> ModalResult<Definition> {
    keyword("WHEN").parse_next(input)?;
    let condition = cut_err(expr).parse_next(input)?;
    cut_err((ws, keyword("THEN")))
        .context(expected("THEN"))
        .parse_next(input)?;
    let calls = cut_err(statement_calls).parse_next(input)?;
    end_of_definition(input)?;
    Ok(Definition::When {
        condition: Some(condition),
        calls,
    })
}

fn execute_def(input: &mut &str) -> ModalResult<Definition> {
    keyword("EXECUTE").parse_next(input)?;
    let calls = cut_err(statement_calls).parse_next(input)?;
    end_of_definition(input)?;
    Ok(Definition::When {
        condition: None,
        calls,
    })
}

// -- Top-level parser -------------------------------------------------------

pub fn program(input: &mut &str) -> ModalResult<Program> {
    let definitions = repeat(0.., preceded(ws, alt((let_def, when_def, execute_def))))
        .parse_next(input)?;
    ws.parse_next(input)?;
    Ok(Program { definitions })
}
