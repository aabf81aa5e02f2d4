//! 表达式语法（优先级由低到高）：
//!
//! ```text
//! expr        := conjunction (("or" | "||") conjunction)*
//! conjunction := negation (("and" | "&&") negation)*
//! negation    := ("not" | "!") negation | comparison
//! comparison  := additive (cmp_op additive)*        // a < b < c 即 a < b and b < c
//! additive    := term (("+" | "-") term)*
//! term        := unary (("*" | "/" | "%") unary)*
//! unary       := ("-" | "+") unary | power
//! power       := primary (("**" | "^") unary)?       // 右结合，-x**2 == -(x**2)
//! primary     := number | bool | ident | ident "(" args ")" | "(" expr ")"
//! ```
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag,
    character::complete::{alpha1, alphanumeric1, char, digit0, digit1, multispace0, one_of, satisfy},
    combinator::{all_consuming, cut, map, map_opt, not, opt, recognize, value, verify},
    error::{ErrorKind, ParseError},
    multi::{many0_count, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::expr::ExpressionError;
use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::builtins::Builtin;

/// 括号、函数参数、一元运算与乘方的最大嵌套层数。
pub const MAX_NESTING: usize = 32;

/// 源码的最大字节数。运算符链折叠成树，树深随长度增长。
pub const MAX_SOURCE_LEN: usize = 1024;

const KEYWORDS: &[&str] = &["and", "or", "not", "true", "false", "True", "False"];

static FORBIDDEN_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(import|lambda|exec|eval|open|compile|globals|locals|getattr|setattr|__\w*)\b")
        .expect("forbidden word pattern")
});

static ATTRIBUTE_ACCESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[A-Za-z_][A-Za-z0-9_]*|\))\s*\.\s*[A-Za-z_]").expect("attribute pattern")
});

type PResult<'a, T> = IResult<&'a str, T, ParseFault<'a>>;

/// 附带可选语义原因（未知函数、参数个数）的 nom 错误。
#[derive(Debug)]
pub(crate) struct ParseFault<'a> {
    input: &'a str,
    reason: Option<ExpressionError>,
}

impl<'a> ParseFault<'a> {
    fn explained(input: &'a str, reason: ExpressionError) -> Self {
        Self {
            input,
            reason: Some(reason),
        }
    }
}

impl<'a> ParseError<&'a str> for ParseFault<'a> {
    fn from_error_kind(input: &'a str, _kind: ErrorKind) -> Self {
        Self {
            input,
            reason: None,
        }
    }

    fn append(_input: &'a str, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    fn or(self, other: Self) -> Self {
        match (&self.reason, &other.reason) {
            (Some(_), _) => self,
            (None, Some(_)) => other,
            (None, None) if other.input.len() < self.input.len() => other,
            (None, None) => self,
        }
    }
}

pub(crate) fn parse(source: &str) -> Result<Expr, ExpressionError> {
    if source.trim().is_empty() {
        return Err(ExpressionError::Empty);
    }
    if source.len() > MAX_SOURCE_LEN {
        return Err(ExpressionError::TooLong {
            length: source.len(),
            limit: MAX_SOURCE_LEN,
        });
    }
    reject_forbidden(source)?;

    match all_consuming(|i| expression(i, 0)).parse(source) {
        Ok((_, expr)) => Ok(expr),
        Err(nom::Err::Error(fault)) | Err(nom::Err::Failure(fault)) => {
            Err(fault.reason.unwrap_or_else(|| ExpressionError::Syntax {
                expression: source.to_string(),
                offset: source.len() - fault.input.len(),
            }))
        }
        Err(nom::Err::Incomplete(_)) => Err(ExpressionError::Syntax {
            expression: source.to_string(),
            offset: source.len(),
        }),
    }
}

fn reject_forbidden(source: &str) -> Result<(), ExpressionError> {
    if let Some(found) = FORBIDDEN_WORD.find(source) {
        return Err(ExpressionError::Forbidden(found.as_str().to_string()));
    }
    if ATTRIBUTE_ACCESS.is_match(source) {
        return Err(ExpressionError::Forbidden("attribute access".into()));
    }
    if source.contains('[') || source.contains(']') {
        return Err(ExpressionError::Forbidden("subscript".into()));
    }
    if source.contains(';') {
        return Err(ExpressionError::Forbidden("statement separator".into()));
    }
    Ok(())
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn ws<'a, O, P>(inner: P) -> impl Parser<&'a str, Output = O, Error = ParseFault<'a>>
where
    P: Parser<&'a str, Output = O, Error = ParseFault<'a>>,
{
    delimited(multispace0, inner, multispace0)
}

fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = ParseFault<'a>> {
    terminated(tag(word), not(satisfy(is_ident_char)))
}

fn nesting(input: &str, depth: usize) -> Result<(), nom::Err<ParseFault<'_>>> {
    if depth > MAX_NESTING {
        return Err(nom::Err::Failure(ParseFault::explained(
            input,
            ExpressionError::TooDeep { limit: MAX_NESTING },
        )));
    }
    Ok(())
}

fn expression(input: &str, depth: usize) -> PResult<'_, Expr> {
    nesting(input, depth)?;
    fold_left(
        input,
        |i| conjunction(i, depth),
        value(BinaryOp::Or, ws(alt((keyword("or"), tag("||"))))),
    )
}

fn conjunction(input: &str, depth: usize) -> PResult<'_, Expr> {
    fold_left(
        input,
        |i| negation(i, depth),
        value(BinaryOp::And, ws(alt((keyword("and"), tag("&&"))))),
    )
}

fn negation(input: &str, depth: usize) -> PResult<'_, Expr> {
    nesting(input, depth)?;
    let bang = terminated(tag("!"), not(char('=')));
    alt((
        map(
            preceded(ws(alt((keyword("not"), bang))), |i| negation(i, depth + 1)),
            |operand| Expr::unary(UnaryOp::Not, operand),
        ),
        |i| comparison(i, depth),
    ))
    .parse(input)
}

fn comparison_op(input: &str) -> PResult<'_, BinaryOp> {
    ws(alt((
        value(BinaryOp::Eq, tag("==")),
        value(BinaryOp::Ne, tag("!=")),
        value(BinaryOp::Le, tag("<=")),
        value(BinaryOp::Ge, tag(">=")),
        value(BinaryOp::Lt, tag("<")),
        value(BinaryOp::Gt, tag(">")),
    )))
    .parse(input)
}

fn comparison(input: &str, depth: usize) -> PResult<'_, Expr> {
    let (mut rest, first) = additive(input, depth)?;
    let mut links: Vec<(BinaryOp, Expr)> = Vec::new();
    loop {
        match comparison_op(rest) {
            Ok((after_op, op)) => {
                let (after_rhs, rhs) = cut(|i| additive(i, depth)).parse(after_op)?;
                links.push((op, rhs));
                rest = after_rhs;
            }
            Err(nom::Err::Error(_)) => break,
            Err(e) => return Err(e),
        }
    }

    // a < b <= c  ==>  (a < b) and (b <= c)
    let mut lhs = first;
    let mut chained: Option<Expr> = None;
    for (op, rhs) in links {
        let link = Expr::binary(op, lhs, rhs.clone());
        chained = Some(match chained {
            Some(acc) => Expr::binary(BinaryOp::And, acc, link),
            None => link,
        });
        lhs = rhs;
    }
    Ok((rest, chained.unwrap_or(lhs)))
}

fn additive(input: &str, depth: usize) -> PResult<'_, Expr> {
    fold_left(
        input,
        |i| term(i, depth),
        ws(alt((
            value(BinaryOp::Add, char('+')),
            value(BinaryOp::Sub, char('-')),
        ))),
    )
}

fn term(input: &str, depth: usize) -> PResult<'_, Expr> {
    fold_left(
        input,
        |i| unary(i, depth),
        ws(alt((
            value(BinaryOp::Mul, terminated(char('*'), not(char('*')))),
            value(BinaryOp::Div, char('/')),
            value(BinaryOp::Rem, char('%')),
        ))),
    )
}

fn unary(input: &str, depth: usize) -> PResult<'_, Expr> {
    nesting(input, depth)?;
    alt((
        map(preceded(ws(char('-')), |i| unary(i, depth + 1)), |operand| {
            Expr::unary(UnaryOp::Neg, operand)
        }),
        preceded(ws(char('+')), |i| unary(i, depth + 1)),
        |i| power(i, depth),
    ))
    .parse(input)
}

fn power(input: &str, depth: usize) -> PResult<'_, Expr> {
    let (rest, base) = primary(input, depth)?;
    let (rest, exponent) = opt(preceded(
        ws(alt((tag("**"), tag("^")))),
        cut(|i| unary(i, depth + 1)),
    ))
    .parse(rest)?;
    let expr = match exponent {
        Some(exponent) => Expr::binary(BinaryOp::Pow, base, exponent),
        None => base,
    };
    Ok((rest, expr))
}

fn primary(input: &str, depth: usize) -> PResult<'_, Expr> {
    ws(alt((
        number,
        boolean,
        |i| call_or_variable(i, depth),
        delimited(char('('), |i| expression(i, depth + 1), cut(char(')'))),
    )))
    .parse(input)
}

fn number(input: &str) -> PResult<'_, Expr> {
    map_opt(
        recognize(pair(
            alt((
                recognize(pair(digit1, opt(pair(char('.'), digit0)))),
                recognize(pair(char('.'), digit1)),
            )),
            opt((one_of("eE"), opt(one_of("+-")), digit1)),
        )),
        |text: &str| text.parse::<f64>().ok().map(Expr::Number),
    )
    .parse(input)
}

fn boolean(input: &str) -> PResult<'_, Expr> {
    alt((
        value(Expr::Bool(true), alt((keyword("true"), keyword("True")))),
        value(Expr::Bool(false), alt((keyword("false"), keyword("False")))),
    ))
    .parse(input)
}

fn identifier(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))
    .parse(input)
}

fn call_or_variable(input: &str, depth: usize) -> PResult<'_, Expr> {
    let (rest, name) = verify(identifier, |name: &str| !KEYWORDS.contains(&name)).parse(input)?;

    let after_open = match ws(char('(')).parse(rest) {
        Ok((after_open, _)) => after_open,
        Err(nom::Err::Error(_)) => return Ok((rest, Expr::Variable(name.to_string()))),
        Err(e) => return Err(e),
    };

    let (rest, args) = cut(terminated(
        separated_list0(ws(char(',')), |i| expression(i, depth + 1)),
        ws(char(')')),
    ))
    .parse(after_open)?;

    let Some(builtin) = Builtin::lookup(name) else {
        return Err(nom::Err::Failure(ParseFault::explained(
            input,
            ExpressionError::UnknownFunction(name.to_string()),
        )));
    };
    if !builtin.arity().accepts(args.len()) {
        return Err(nom::Err::Failure(ParseFault::explained(
            input,
            ExpressionError::Arity {
                function: builtin.name(),
                expected: builtin.arity(),
                found: args.len(),
            },
        )));
    }
    Ok((rest, Expr::Call(builtin, args)))
}

/// 解析 `operand (operator operand)*` 并左结合折叠。
fn fold_left<'a, F>(
    input: &'a str,
    operand: F,
    mut operator: impl Parser<&'a str, Output = BinaryOp, Error = ParseFault<'a>>,
) -> PResult<'a, Expr>
where
    F: Fn(&'a str) -> PResult<'a, Expr> + Copy,
{
    let (mut rest, mut acc) = operand(input)?;
    loop {
        match operator.parse(rest) {
            Ok((after_op, op)) => {
                let (after_rhs, rhs) = cut(operand).parse(after_op)?;
                acc = Expr::binary(op, acc, rhs);
                rest = after_rhs;
            }
            Err(nom::Err::Error(_)) => return Ok((rest, acc)),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(source: &str) -> String {
        parse(source).unwrap().to_string()
    }

    #[test]
    fn precedence_follows_arithmetic_conventions() {
        assert_eq!(shape("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(shape("10 - 4 - 3"), "((10 - 4) - 3)");
        assert_eq!(shape("-x ** 2"), "(-(x ** 2))");
        assert_eq!(shape("2 ** 3 ** 2"), "(2 ** (3 ** 2))");
        assert_eq!(shape("2 ^ -1"), "(2 ** (-1))");
        assert_eq!(shape("(1 + 2) * 3"), "((1 + 2) * 3)");
    }

    #[test]
    fn boolean_operators_bind_looser_than_comparisons() {
        assert_eq!(shape("a > 1 and b < 2"), "((a > 1) and (b < 2))");
        assert_eq!(shape("not a == b"), "(not (a == b))");
        assert_eq!(shape("a || b && c"), "(a or (b and c))");
        assert_eq!(shape("!flag"), "(not flag)");
        assert_eq!(shape("True or False"), "(true or false)");
    }

    #[test]
    fn comparisons_chain() {
        assert_eq!(shape("0 < x <= 5"), "((0 < x) and (x <= 5))");
    }

    #[test]
    fn numbers_accept_exponents_and_leading_dots() {
        assert_eq!(parse("1.5e-3").unwrap(), Expr::Number(1.5e-3));
        assert_eq!(parse(".25").unwrap(), Expr::Number(0.25));
        assert_eq!(parse("3.").unwrap(), Expr::Number(3.0));
    }

    #[test]
    fn keywords_need_word_boundaries() {
        assert_eq!(shape("notify + order"), "(notify + order)");
        assert_eq!(shape("android"), "android");
    }

    #[test]
    fn calls_resolve_against_the_builtin_table() {
        assert_eq!(shape("min(a, b, 3)"), "min(a, b, 3)");
        assert_eq!(
            parse("system(1)"),
            Err(ExpressionError::UnknownFunction("system".into()))
        );
        assert!(matches!(
            parse("hill(S, 1)"),
            Err(ExpressionError::Arity {
                function: "hill",
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn forbidden_constructs_are_rejected_before_parsing() {
        for source in [
            "__import__('os')",
            "x.real",
            "x[0]",
            "lambda: 1",
            "eval(1)",
            "a; b",
        ] {
            assert!(
                matches!(parse(source), Err(ExpressionError::Forbidden(_))),
                "{source} should be forbidden"
            );
        }
    }

    #[test]
    fn syntax_errors_report_an_offset() {
        match parse("1 + * 2") {
            Err(ExpressionError::Syntax { offset, .. }) => assert!(offset >= 2),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(parse("(1 + 2"), Err(ExpressionError::Syntax { .. })));
        assert!(matches!(parse("1 2"), Err(ExpressionError::Syntax { .. })));
        assert_eq!(parse("   "), Err(ExpressionError::Empty));
    }

    #[test]
    fn nesting_is_bounded() {
        let within = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(parse(&within).unwrap(), Expr::Number(1.0));

        let too_deep = [
            format!("{}1{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1)),
            format!("{}1", "-".repeat(MAX_NESTING + 1)),
            format!("{}true", "not ".repeat(MAX_NESTING + 1)),
            format!("{}1", "2 ** ".repeat(MAX_NESTING + 1)),
            format!("{}1{}", "abs(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1)),
        ];
        for source in &too_deep {
            assert_eq!(
                parse(source),
                Err(ExpressionError::TooDeep { limit: MAX_NESTING }),
                "{source}"
            );
        }
    }

    #[test]
    fn oversized_sources_are_rejected_before_parsing() {
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert!(matches!(parse(&parens), Err(ExpressionError::TooLong { .. })));
        assert!(matches!(
            parse(&format!("{}1", "-".repeat(10_000))),
            Err(ExpressionError::TooLong { .. })
        ));

        let chain = format!("1{}", " + 1".repeat(200));
        assert!(chain.len() <= MAX_SOURCE_LEN);
        let expr = parse(&chain).unwrap();
        assert_eq!(
            crate::expr::eval::evaluate(&expr, &crate::expr::NoBindings),
            Ok(crate::expr::Value::Number(201.0))
        );
    }
}
