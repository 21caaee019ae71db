use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{alpha1, char, space0},
    combinator::{all_consuming, opt},
    multi::separated_list1,
    sequence::delimited,
};

use super::FilterError;
use crate::trace::{Category, Event, ObjectId, TaskId};

/// A parsed filter expression: clauses that must all hold
///
/// Syntax: `clause (& clause)*` where a clause is `[!]key=v1,v2` (any value
/// equal) or `[!]key~v1,v2` (any value contained).
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    /// Normalized source text, used as the filter title
    pub text: String,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub negated: bool,
    pub matcher: Matcher,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    Task(Vec<TaskId>),
    Object(Vec<ObjectId>),
    Category(Vec<Category>),
    /// Kind labels, lowercased. `contains` matches substrings.
    Kind { labels: Vec<String>, contains: bool },
    /// Any backtrace frame's source path
    File { paths: Vec<String>, contains: bool },
    /// Any backtrace frame's function name
    Function { names: Vec<String>, contains: bool },
}

impl FilterExpr {
    pub fn matches(&self, event: &Event) -> bool {
        self.clauses.iter().all(|clause| clause.matches(event))
    }
}

impl Clause {
    pub fn matches(&self, event: &Event) -> bool {
        self.matcher.matches(event) != self.negated
    }
}

impl Matcher {
    fn matches(&self, event: &Event) -> bool {
        match self {
            Matcher::Task(ids) => ids.contains(&event.task),
            Matcher::Object(ids) => event.kind.object().is_some_and(|obj| ids.contains(&obj)),
            Matcher::Category(categories) => categories.contains(&event.category),
            Matcher::Kind { labels, contains } => {
                let label = event.kind.label().to_lowercase();
                labels.iter().any(|l| text_matches(&label, l, *contains))
            }
            Matcher::File { paths, contains } => frames_match(event, |frame| {
                paths.iter().any(|p| text_matches(&frame.path, p, *contains))
            }),
            Matcher::Function { names, contains } => frames_match(event, |frame| {
                names
                    .iter()
                    .any(|n| text_matches(&frame.function, n, *contains))
            }),
        }
    }
}

fn text_matches(haystack: &str, needle: &str, contains: bool) -> bool {
    if contains {
        haystack.contains(needle)
    } else {
        haystack == needle
    }
}

fn frames_match(event: &Event, f: impl Fn(&crate::trace::Frame) -> bool) -> bool {
    event
        .backtrace
        .as_ref()
        .is_some_and(|frames| frames.iter().any(f))
}

/// Clause as read from the text, before keys and values are checked
struct RawClause<'a> {
    negated: bool,
    key: &'a str,
    contains: bool,
    values: Vec<&'a str>,
}

/// Parse a filter expression
pub fn parse_expr(input: &str) -> Result<FilterExpr, FilterError> {
    let trimmed = input.trim();
    let (_, raw) = all_consuming(parse_clauses)
        .parse(trimmed)
        .map_err(|e| FilterError::InvalidExpression(input.to_string(), e.to_string()))?;

    let clauses = raw
        .into_iter()
        .map(Clause::from_raw)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FilterExpr {
        text: trimmed.to_string(),
        clauses,
    })
}

fn parse_clauses(input: &str) -> IResult<&str, Vec<RawClause<'_>>> {
    separated_list1(delimited(space0, char('&'), space0), parse_clause).parse(input)
}

/// Parse a single clause: `!task=1,2` or `file~src/`
fn parse_clause(input: &str) -> IResult<&str, RawClause<'_>> {
    let (rest, negated) = opt(char('!')).parse(input)?;
    let (rest, key) = alpha1(rest)?;
    let (rest, op) = alt((char('='), char('~'))).parse(rest)?;
    let (rest, values) = separated_list1(char(','), parse_value).parse(rest)?;

    Ok((
        rest,
        RawClause {
            negated: negated.is_some(),
            key,
            contains: op == '~',
            values,
        },
    ))
}

fn parse_value(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != ',' && c != '&' && !c.is_whitespace()).parse(input)
}

impl Clause {
    fn from_raw(raw: RawClause<'_>) -> Result<Self, FilterError> {
        let key = raw.key.to_lowercase();

        let exact_only = matches!(key.as_str(), "task" | "object" | "category");
        if raw.contains && exact_only {
            return Err(FilterError::UnsupportedContains(key));
        }

        let matcher = match key.as_str() {
            "task" => Matcher::Task(parse_ids(&key, &raw.values)?),
            "object" => Matcher::Object(parse_ids(&key, &raw.values)?),
            "category" => Matcher::Category(
                raw.values
                    .iter()
                    .map(|v| {
                        Category::from_name(&v.to_lowercase()).ok_or_else(|| {
                            FilterError::InvalidValue {
                                key: key.clone(),
                                value: v.to_string(),
                            }
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
            "kind" => Matcher::Kind {
                labels: raw.values.iter().map(|v| v.to_lowercase()).collect(),
                contains: raw.contains,
            },
            "file" => Matcher::File {
                paths: owned(&raw.values),
                contains: raw.contains,
            },
            "function" | "fn" => Matcher::Function {
                names: owned(&raw.values),
                contains: raw.contains,
            },
            _ => return Err(FilterError::UnknownKey(raw.key.to_string())),
        };

        Ok(Clause {
            negated: raw.negated,
            matcher,
        })
    }
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn parse_ids(key: &str, values: &[&str]) -> Result<Vec<usize>, FilterError> {
    values
        .iter()
        .map(|v| {
            v.parse().map_err(|_| FilterError::InvalidValue {
                key: key.to_string(),
                value: v.to_string(),
            })
        })
        .collect()
}
