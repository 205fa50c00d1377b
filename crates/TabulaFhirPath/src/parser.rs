//! Parser for the SQL-on-FHIR FHIRPath dialect.
//!
//! ViewDefinitions use a restricted slice of FHIRPath: path navigation,
//! indexing, a fixed set of functions, literals, and the boolean/comparison
//! operators that appear in `where` predicates. This parser accepts exactly
//! that slice and produces an [`Expression`] AST; anything outside the
//! dialect (arithmetic, unions, type operators, quantities) is a parse
//! error, which surfaces long before any resource is touched.
//!
//! Expressions are parsed once, when a ViewDefinition is validated, and the
//! AST is reused for every resource evaluation.
//!
//! ## Literal syntax
//!
//! - Strings: `'text with \'escapes\''`
//! - Numbers: `42` (integer), `3.14` (decimal)
//! - Booleans: `true`, `false`
//! - Dates: `@2024-01-15`, `@2024-01`, `@2024`
//! - DateTimes: `@2024-01-15T14:30:00Z`, `@2024-01-15T14:30:00-05:00`
//! - Times: `@T14:30:00`, `@T14:30:00.123`
//! - Empty: `{}`
//!
//! Comments (`// ...` and `/* ... */`) are accepted and ignored.

use chumsky::Parser;
use chumsky::error::Rich;
use chumsky::prelude::*;
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

/// A literal value in a FHIRPath expression.
///
/// Date, dateTime and time literals keep their lexical form: the dialect
/// only ever compares them textually (ISO 8601 ordering is lexical at equal
/// precision), so there is nothing to gain from eager decomposition.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// The empty collection, `{}`.
    Null,
    Boolean(bool),
    /// Single-quoted string with escapes resolved.
    String(String),
    /// Decimal number (with a decimal point).
    Number(Decimal),
    /// Integer number (without a decimal point).
    Integer(i64),
    /// Date literal such as `@2022-01-01`, stored without the `@`.
    Date(String),
    /// DateTime literal such as `@2022-01-01T12:00:00Z`, stored without the `@`.
    DateTime(String),
    /// Time literal such as `@T12:00:00`, stored without the `@T`.
    Time(String),
}

/// A parsed FHIRPath expression in the SQL-on-FHIR dialect.
///
/// The tree preserves operator precedence from the grammar; evaluation is a
/// straightforward recursive walk.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// A basic term (literal, invocation, constant, parenthesized expression).
    Term(Term),
    /// A member access or function call on the result of another expression,
    /// e.g. `code.coding.first()`.
    Invocation(Box<Expression>, Invocation),
    /// An indexer expression, e.g. `name[0]`.
    Indexer(Box<Expression>, Box<Expression>),
    /// A comparison (`<`, `<=`, `>`, `>=`).
    Inequality(Box<Expression>, String, Box<Expression>),
    /// An equality test (`=`, `!=`).
    Equality(Box<Expression>, String, Box<Expression>),
    /// Logical conjunction.
    And(Box<Expression>, Box<Expression>),
    /// Logical disjunction.
    Or(Box<Expression>, Box<Expression>),
}

/// The leaves of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// Member access, function call, or `$this` at the head of a path.
    Invocation(Invocation),
    /// A literal value.
    Literal(Literal),
    /// An environment constant reference, e.g. `%threshold`. ViewDefinition
    /// constants are substituted before parsing, so reaching one of these at
    /// evaluation time means the variable must come from the context.
    ExternalConstant(String),
    /// A parenthesized sub-expression.
    Parenthesized(Box<Expression>),
}

/// The ways something can be invoked on a context or a preceding value.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// Property access by name, e.g. `subject`.
    Member(String),
    /// Function call with arguments, e.g. `where(use = 'official')`.
    Function(String, Vec<Expression>),
    /// The current focus item, `$this`.
    This,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "{{}}"),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::String(s) => write!(f, "'{}'", s),
            Literal::Number(d) => write!(f, "{}", d),
            Literal::Integer(n) => write!(f, "{}", n),
            Literal::Date(d) => write!(f, "@{}", d),
            Literal::DateTime(dt) => write!(f, "@{}", dt),
            Literal::Time(t) => write!(f, "@T{}", t),
        }
    }
}

/// Checks the calendar validity of a date lexeme that already matched the
/// YYYY(-MM(-DD)?)? shape. Partial dates only need a month range check; full
/// dates go through chrono so Feb 30 and friends are rejected.
fn valid_date_lexeme(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    match parts.len() {
        1 => true,
        2 => matches!(parts[1].parse::<u32>(), Ok(m) if (1..=12).contains(&m)),
        3 => chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        _ => false,
    }
}

/// Parser that matches a custom whitespace including comments
fn custom_padded<'src, T, P>(
    parser: P,
) -> impl Parser<'src, &'src str, T, extra::Err<Rich<'src, char>>> + Clone
where
    P: Parser<'src, &'src str, T, extra::Err<Rich<'src, char>>> + Clone,
    T: Clone,
{
    let ws_or_comment = choice((
        text::whitespace().at_least(1).ignored(),
        // Single-line comment: // ... newline or EOF
        just("//")
            .then(any().and_is(text::newline().or(end()).not()).repeated())
            .ignored(),
        // Multi-line comment: /* ... */
        just("/*")
            .then(any().and_is(just("*/").not()).repeated())
            .then(just("*/"))
            .ignored(),
    ))
    .repeated()
    .ignored();

    ws_or_comment
        .then(parser)
        .map(|(_, result)| result)
        .then_ignore(ws_or_comment)
}

/// Creates a parser for dialect expressions.
///
/// The returned parser consumes an entire input string and produces the
/// [`Expression`] AST, or a detailed [`Rich`] error for out-of-dialect or
/// malformed input.
pub fn parser<'src>()
-> impl Parser<'src, &'src str, Expression, extra::Err<Rich<'src, char>>> + Clone + 'src {
    // Escape sequences within string literals: standard escapes plus \uXXXX.
    let esc = just('\\').ignore_then(choice((
        just('`').to('`'),
        just('\'').to('\''),
        just('\\').to('\\'),
        just('/').to('/'),
        just('f').to('\u{000C}'),
        just('n').to('\n'),
        just('r').to('\r'),
        just('t').to('\t'),
        just('"').to('"'),
        just('u').ignore_then(
            any()
                .filter(|c: &char| c.is_ascii_hexdigit())
                .repeated()
                .exactly(4)
                .collect::<String>()
                .try_map(
                    |digits: String, span| match u32::from_str_radix(&digits, 16) {
                        Ok(code) => match char::from_u32(code) {
                            Some(c) => Ok(c),
                            None => Err(Rich::custom(span, "Invalid Unicode code point")),
                        },
                        Err(_) => Err(Rich::custom(span, "Invalid hex digits")),
                    },
                ),
        ),
    )));

    macro_rules! padded {
        ($p:expr) => {
            custom_padded($p)
        };
    }

    // LITERAL PARSERS

    // The empty collection: {}
    let null = just('{').then(just('}')).to(Literal::Null);

    // Booleans must be tried before identifiers to avoid ambiguity.
    let boolean = choice((
        text::keyword("true").to(Literal::Boolean(true)),
        text::keyword("false").to(Literal::Boolean(false)),
    ))
    .boxed();

    // String literals: 'text' with escape sequences.
    let string = just('\'')
        .ignore_then(none_of("\\\'").or(esc).repeated().collect::<String>())
        .then_ignore(just('\''))
        .map(Literal::String)
        .boxed();

    // Integer literals; the dialect has no unary minus, so these are always
    // unsigned lexically.
    let integer = any()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .collect::<String>()
        .try_map(|digits: String, span| match i64::from_str(&digits) {
            Ok(n) => Ok(Literal::Integer(n)),
            Err(_) => Err(Rich::custom(span, format!("Invalid integer: {}", digits))),
        });
    let integer = padded!(integer);

    // Decimal literals: <digits>.<digits>
    let number = any()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(1)
        .collect::<String>()
        .then(just('.'))
        .then(
            any()
                .filter(|c: &char| c.is_ascii_digit())
                .repeated()
                .at_least(1)
                .collect::<String>(),
        )
        .try_map(|((i, _), d), span| {
            let num_str = format!("{}.{}", i, d);
            match Decimal::from_str(&num_str) {
                Ok(decimal) => Ok(Literal::Number(decimal)),
                Err(_) => Err(Rich::custom(span, format!("Invalid number: {}", num_str))),
            }
        })
        .padded();

    // Time component: HH(:mm(:ss(.sss)?)?)?
    let time_format = any()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .at_least(2)
        .at_most(2)
        .collect::<String>()
        .then(
            just(':')
                .ignore_then(
                    any()
                        .filter(|c: &char| c.is_ascii_digit())
                        .repeated()
                        .at_least(2)
                        .at_most(2)
                        .collect::<String>(),
                )
                .then(
                    just(':')
                        .ignore_then(
                            any()
                                .filter(|c: &char| c.is_ascii_digit())
                                .repeated()
                                .at_least(2)
                                .at_most(2)
                                .collect::<String>(),
                        )
                        .then(
                            just('.')
                                .ignore_then(
                                    any()
                                        .filter(|c: &char| c.is_ascii_digit())
                                        .repeated()
                                        .at_least(1)
                                        .at_most(3)
                                        .collect::<String>(),
                                )
                                .or_not(),
                        )
                        .or_not(),
                )
                .or_not(),
        )
        .map(|(hours, rest_opt)| {
            let mut result = hours;
            if let Some((minutes, seconds_part)) = rest_opt {
                result.push(':');
                result.push_str(&minutes);
                if let Some((seconds, milliseconds)) = seconds_part {
                    result.push(':');
                    result.push_str(&seconds);
                    if let Some(ms) = milliseconds {
                        result.push('.');
                        result.push_str(&ms);
                    }
                }
            }
            result
        });

    // Timezone: 'Z' or (+|-)HH:mm
    let timezone_format = just('Z')
        .to("Z".to_string())
        .or(one_of("+-")
            .map(|c: char| c.to_string())
            .then(
                any()
                    .filter(|c: &char| c.is_ascii_digit())
                    .repeated()
                    .at_most(2)
                    .at_least(2)
                    .collect::<String>(),
            )
            .then(just(':'))
            .then(
                any()
                    .filter(|c: &char| c.is_ascii_digit())
                    .repeated()
                    .at_most(2)
                    .at_least(2)
                    .collect::<String>(),
            )
            .map(|(((sign, hour), _), min)| format!("{}{}:{}", sign, hour, min)));

    // Date component: YYYY(-MM(-DD)?)?
    let date_format_str = any()
        .filter(|c: &char| c.is_ascii_digit())
        .repeated()
        .exactly(4)
        .collect::<String>()
        .then(
            just('-')
                .ignore_then(
                    any()
                        .filter(|c: &char| c.is_ascii_digit())
                        .repeated()
                        .exactly(2)
                        .collect::<String>()
                        .then(
                            just('-')
                                .ignore_then(
                                    any()
                                        .filter(|c: &char| c.is_ascii_digit())
                                        .repeated()
                                        .exactly(2)
                                        .collect::<String>(),
                                )
                                .or_not(),
                        ),
                )
                .or_not(),
        )
        .map(|(year, month_part)| {
            let mut date_str = year;
            if let Some((month_str, day_part)) = month_part {
                date_str.push('-');
                date_str.push_str(&month_str);
                if let Some(day_str) = day_part {
                    date_str.push('-');
                    date_str.push_str(&day_str);
                }
            }
            date_str
        })
        .boxed();

    // DateTime: @Date T Time [Timezone]
    let datetime_literal = just('@')
        .ignore_then(date_format_str.clone())
        .then_ignore(just('T'))
        .then(time_format.clone())
        .then(timezone_format.clone().or_not())
        .try_map(|((date_str, time_str), tz_opt), span| {
            if !valid_date_lexeme(&date_str) {
                return Err(Rich::custom(
                    span,
                    format!("Invalid date in datetime literal: {}", date_str),
                ));
            }
            let full_str = if let Some(tz) = tz_opt {
                format!("{}T{}{}", date_str, time_str, tz)
            } else {
                format!("{}T{}", date_str, time_str)
            };
            Ok(Literal::DateTime(full_str))
        });

    // Partial DateTime: @Date T
    let partial_datetime_literal = just('@')
        .ignore_then(date_format_str.clone())
        .then_ignore(just('T'))
        .try_map(|date_str, span| {
            if !valid_date_lexeme(&date_str) {
                return Err(Rich::custom(
                    span,
                    format!("Invalid date in datetime literal: {}", date_str),
                ));
            }
            Ok(Literal::DateTime(format!("{}T", date_str)))
        });

    // Time: @ T Time, strictly no timezone.
    let time_literal = just('@')
        .ignore_then(
            just('T')
                .ignore_then(time_format)
                .then(timezone_format.or_not()),
        )
        .try_map(|(time_str, tz_opt), span| {
            if tz_opt.is_some() {
                Err(Rich::custom(
                    span,
                    "Time literal cannot have a timezone offset",
                ))
            } else {
                Ok(Literal::Time(time_str))
            }
        });

    // Date: @ Date
    let date_literal = just('@')
        .ignore_then(date_format_str.clone())
        .try_map(|date_str, span| {
            if valid_date_lexeme(&date_str) {
                Ok(Literal::Date(date_str))
            } else {
                Err(Rich::custom(span, format!("Invalid date: {}", date_str)))
            }
        });

    // Specific date/time forms before the more general ones.
    let literal = choice((
        null,
        boolean,
        string,
        number,
        integer,
        padded!(datetime_literal),
        padded!(partial_datetime_literal),
        padded!(time_literal),
        padded!(date_literal),
    ))
    .map(Term::Literal);

    // IDENTIFIER: ([A-Za-z] | '_')([A-Za-z0-9] | '_')*
    let standard_identifier = any()
        .filter(|c: &char| c.is_ascii_alphabetic() || *c == '_')
        .then(
            any()
                .filter(|c: &char| c.is_ascii_alphanumeric() || *c == '_')
                .repeated()
                .collect::<Vec<_>>(),
        )
        .map(|(first, rest): (char, Vec<char>)| {
            let mut s = first.to_string();
            s.extend(rest);
            s
        })
        .padded();

    // DELIMITEDIDENTIFIER: '`' (ESC | .)*? '`'
    let delimited_identifier = just('`')
        .ignore_then(none_of("`").or(esc).repeated().collect::<String>())
        .then_ignore(just('`'))
        .padded();

    let identifier = choice((standard_identifier, delimited_identifier));

    // String parser reused for quoted external-constant names.
    let string_for_external = just('\'')
        .ignore_then(none_of("\'\\").or(esc).repeated().collect::<String>())
        .then_ignore(just('\''))
        .padded();

    // External constants: %name or %'quoted name'
    let external_constant = just('%')
        .ignore_then(choice((identifier.clone(), string_for_external)))
        .map(Term::ExternalConstant)
        .padded();

    recursive(|expr| {
        // Atom: literals, constants, function calls, identifiers, $this,
        // parenthesized expressions.
        let atom = choice((
            literal.clone().map(Expression::Term).boxed(),
            external_constant.clone().map(Expression::Term).boxed(),
            // Function call: identifier(...) - tried before the bare identifier.
            identifier
                .clone()
                .then(
                    expr.clone()
                        .separated_by(just(',').padded())
                        .allow_trailing()
                        .collect::<Vec<_>>()
                        .delimited_by(just('(').padded(), just(')').padded()),
                )
                .map(|(name, params)| {
                    Expression::Term(Term::Invocation(Invocation::Function(name, params)))
                })
                .boxed(),
            choice((
                identifier.clone().map(Invocation::Member),
                just("$this").to(Invocation::This),
            ))
            .map(Term::Invocation)
            .map(Expression::Term)
            .boxed(),
            expr.clone()
                .boxed()
                .delimited_by(just('(').padded(), just(')').padded())
                .map(|inner| Expression::Term(Term::Parenthesized(Box::new(inner))))
                .boxed(),
        ))
        .padded();

        // Postfix operators: . (member/function invocation) and [] (indexer)
        let postfix_op = choice((
            just('.')
                .ignore_then(
                    identifier.clone().then(
                        expr.clone()
                            .boxed()
                            .separated_by(just(',').padded())
                            .allow_trailing()
                            .collect::<Vec<_>>()
                            .delimited_by(just('(').padded(), just(')').padded())
                            .or_not(),
                    ),
                )
                .map(|(name, params_opt)| {
                    let invocation = match params_opt {
                        Some(params) => Invocation::Function(name, params),
                        None => Invocation::Member(name),
                    };
                    Box::new(move |left: Expression| {
                        Expression::Invocation(Box::new(left), invocation.clone())
                    }) as Box<dyn Fn(Expression) -> Expression>
                }),
            expr.clone()
                .delimited_by(just('[').padded(), just(']').padded())
                .map(|idx| {
                    Box::new(move |left: Expression| {
                        Expression::Indexer(Box::new(left), Box::new(idx.clone()))
                    }) as Box<dyn Fn(Expression) -> Expression>
                }),
        ))
        .boxed();

        let atom_with_postfix = atom
            .clone()
            .then(postfix_op.repeated().collect::<Vec<_>>())
            .map(|(left, ops)| ops.into_iter().fold(left, |acc, op| op(acc)));

        // Comparison (<, <=, >, >=) - Left associative
        let op_ineq = choice((
            just("<=").to("<="),
            just("<").to("<"),
            just(">=").to(">="),
            just(">").to(">"),
        ))
        .padded();
        let inequality = atom_with_postfix
            .clone()
            .then(
                op_ineq
                    .then(atom_with_postfix)
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op_str, right)| {
                    Expression::Inequality(Box::new(acc), op_str.to_string(), Box::new(right))
                })
            });

        // Equality (=, !=) - Left associative
        let op_eq = choice((just("=").to("="), just("!=").to("!="))).padded();
        let equality = inequality
            .clone()
            .boxed()
            .then(
                op_eq
                    .then(inequality.clone().boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (op_str, right)| {
                    Expression::Equality(Box::new(acc), op_str.to_string(), Box::new(right))
                })
            });

        // Logical AND (and) - Left associative
        let op_and = text::keyword("and").padded();
        let logical_and = equality
            .clone()
            .boxed()
            .then(
                op_and
                    .then(equality.clone().boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (_, right)| {
                    Expression::And(Box::new(acc), Box::new(right))
                })
            });

        // Logical OR (or) - Left associative
        let op_or = text::keyword("or").padded();
        logical_and
            .clone()
            .boxed()
            .then(
                op_or
                    .then(logical_and.clone().boxed())
                    .repeated()
                    .collect::<Vec<_>>(),
            )
            .map(|(left, ops)| {
                ops.into_iter().fold(left, |acc, (_, right)| {
                    Expression::Or(Box::new(acc), Box::new(right))
                })
            })
    })
    .then_ignore(end())
}
