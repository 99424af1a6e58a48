//! Declarative predicates evaluated against the outcome of an operation.
//!
//! A [`Condition`] only answers whether it holds; deciding whether a mismatch is
//! retried or fatal is left to the retry drivers.
use std::{fmt, ops, sync::Arc};

use kube::api::DynamicObject;
use serde::Serialize;
use serde_json::Value;

use crate::{
    error::ClientError,
    object::{self, NamespacedName},
    path::Path,
};

/// Predicate over a client error.
pub type ErrorPredicate = Arc<dyn Fn(&ClientError) -> bool + Send + Sync>;
/// Predicate over an object tree.
pub type ValuePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
/// Predicate over the trees of every listed object.
pub type ListPredicate = Arc<dyn Fn(&[Value]) -> bool + Send + Sync>;

/// How a list length is compared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal
    Ge,
    /// Less than
    Lt,
    /// Less than or equal
    Le,
}

impl Comparison {
    fn holds(self, actual: usize, expected: usize) -> bool {
        match self {
            Comparison::Eq => actual == expected,
            Comparison::Ne => actual != expected,
            Comparison::Gt => actual > expected,
            Comparison::Ge => actual >= expected,
            Comparison::Lt => actual < expected,
            Comparison::Le => actual <= expected,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparison::Eq => "==",
            Comparison::Ne => "!=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
        })
    }
}

/// A composable predicate over objects, lists and write errors.
///
/// Error matchers ([`Condition::Succeed`], [`Condition::Fail`],
/// [`Condition::ErrorMatches`]) inspect the error of the write and count matchers
/// inspect the number of objects. Structural matchers, and any `and`/`or`/`not`
/// built only from them, must hold for every listed object: on a list,
/// `!Condition::exists(p)` means no object has `p`. [`Condition::Any`],
/// [`Condition::CountWhere`] and [`Condition::ListCustom`] look at the list as a
/// whole.
#[derive(Clone)]
pub enum Condition {
    /// The operation did not error.
    Succeed,
    /// The operation errored.
    Fail,
    /// The operation failed with an error accepted by the named predicate.
    ErrorMatches(String, ErrorPredicate),
    /// The path is present and not null.
    Exists(Path),
    /// The path is missing or null.
    Absent(Path),
    /// The value at the path equals the given value.
    Equals(Path, Value),
    /// The value at the path contains the given value.
    ///
    /// Strings contain substrings, arrays contain elements and objects contain
    /// every field of an object value.
    Contains(Path, Value),
    /// `.status.conditions` has an entry of the given type with the given status.
    HasStatusCondition {
        /// Condition type, e.g. `Ready`.
        type_: String,
        /// Expected status, e.g. `True`.
        status: String,
    },
    /// The number of objects compares to `n`.
    Count(Comparison, usize),
    /// At least one object is present.
    NotEmpty,
    /// A named predicate over the whole object tree.
    Custom(String, ValuePredicate),
    /// At least one object satisfies the condition.
    Any(Box<Condition>),
    /// Every object satisfies the condition. Holds for an empty list.
    Each(Box<Condition>),
    /// The number of objects satisfying the condition compares to `n`.
    CountWhere(Box<Condition>, Comparison, usize),
    /// A named predicate over the trees of all objects.
    ListCustom(String, ListPredicate),
    /// Every condition holds.
    And(Vec<Condition>),
    /// At least one condition holds.
    Or(Vec<Condition>),
    /// The condition does not hold.
    Not(Box<Condition>),
    /// A condition that could not be constructed. Reported before any I/O.
    Invalid(String),
}

/// Description of why a condition did not hold.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct Mismatch(String);

impl Mismatch {
    /// Wrap a description.
    pub fn new(description: impl Into<String>) -> Self {
        Self(description.into())
    }
}

#[derive(Clone, Copy)]
enum Target<'a> {
    Nothing,
    One(&'a DynamicObject),
    Many(&'a [DynamicObject]),
}

/// What a condition is evaluated against.
#[derive(Clone, Copy)]
pub struct Subject<'a> {
    target: Target<'a>,
    error: Option<&'a ClientError>,
}

impl<'a> Subject<'a> {
    /// A single object, obtained without error.
    pub fn object(obj: &'a DynamicObject) -> Self {
        Self {
            target: Target::One(obj),
            error: None,
        }
    }

    /// A list of objects, obtained without error.
    pub fn list(items: &'a [DynamicObject]) -> Self {
        Self {
            target: Target::Many(items),
            error: None,
        }
    }

    /// A failed operation.
    pub fn error(err: &'a ClientError) -> Self {
        Self {
            target: Target::Nothing,
            error: Some(err),
        }
    }

    // The objects list matchers look at. A failed operation has none.
    fn objects(&self) -> &'a [DynamicObject] {
        match self.target {
            Target::Nothing => &[],
            Target::One(obj) => std::slice::from_ref(obj),
            Target::Many(items) => items,
        }
    }

    /// The outcome of a write: the persisted object or the error.
    pub fn write(outcome: &'a Result<DynamicObject, ClientError>) -> Self {
        match outcome {
            Ok(obj) => Self::object(obj),
            Err(err) => Self::error(err),
        }
    }
}

fn parse_path(path: &str) -> Result<Path, Condition> {
    path.parse()
        .map_err(|err: crate::path::ParsePathError| Condition::Invalid(err.to_string()))
}

fn json(value: impl Serialize) -> Result<Value, Condition> {
    serde_json::to_value(value).map_err(|err| Condition::Invalid(err.to_string()))
}

impl Condition {
    /// `path` is present.
    pub fn exists(path: &str) -> Self {
        parse_path(path).map_or_else(|c| c, Condition::Exists)
    }

    /// `path` is missing.
    pub fn absent(path: &str) -> Self {
        parse_path(path).map_or_else(|c| c, Condition::Absent)
    }

    /// `path == value`
    pub fn equals(path: &str, value: impl Serialize) -> Self {
        parse_path(path)
            .and_then(|p| Ok(Condition::Equals(p, json(value)?)))
            .unwrap_or_else(|c| c)
    }

    /// `path` contains `value`.
    pub fn contains(path: &str, value: impl Serialize) -> Self {
        parse_path(path)
            .and_then(|p| Ok(Condition::Contains(p, json(value)?)))
            .unwrap_or_else(|c| c)
    }

    /// The status condition `type_` has status `status`.
    pub fn status_condition(type_: impl Into<String>, status: impl Into<String>) -> Self {
        Condition::HasStatusCondition {
            type_: type_.into(),
            status: status.into(),
        }
    }

    /// The number of objects compares to `n`.
    pub fn count(cmp: Comparison, n: usize) -> Self {
        Condition::Count(cmp, n)
    }

    /// The operation failed with an error accepted by `pred`.
    pub fn error_matches(
        name: impl Into<String>,
        pred: impl Fn(&ClientError) -> bool + Send + Sync + 'static,
    ) -> Self {
        Condition::ErrorMatches(name.into(), Arc::new(pred))
    }

    /// A named predicate over the object tree.
    pub fn custom(
        name: impl Into<String>,
        pred: impl Fn(&Value) -> bool + Send + Sync + 'static,
    ) -> Self {
        Condition::Custom(name.into(), Arc::new(pred))
    }

    /// At least one listed object satisfies `condition`.
    pub fn any(condition: Condition) -> Self {
        Condition::Any(Box::new(condition))
    }

    /// Every listed object satisfies `condition`.
    pub fn each(condition: Condition) -> Self {
        Condition::Each(Box::new(condition))
    }

    /// The number of listed objects satisfying `condition` compares to `n`.
    pub fn count_where(condition: Condition, cmp: Comparison, n: usize) -> Self {
        Condition::CountWhere(Box::new(condition), cmp, n)
    }

    /// A named predicate over the trees of every listed object.
    pub fn list_custom(
        name: impl Into<String>,
        pred: impl Fn(&[Value]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Condition::ListCustom(name.into(), Arc::new(pred))
    }

    /// Both `self` and `other` hold.
    pub fn and(self, other: Condition) -> Self {
        match self {
            Condition::And(mut all) => {
                all.push(other);
                Condition::And(all)
            }
            first => Condition::And(vec![first, other]),
        }
    }

    /// Either `self` or `other` holds.
    pub fn or(self, other: Condition) -> Self {
        match self {
            Condition::Or(mut any) => {
                any.push(other);
                Condition::Or(any)
            }
            first => Condition::Or(vec![first, other]),
        }
    }

    /// Report the first construction error found in the condition tree.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Condition::Invalid(reason) => Err(reason.clone()),
            Condition::And(all) | Condition::Or(all) => all.iter().try_for_each(Self::validate),
            Condition::Not(inner) => inner.validate(),
            Condition::Any(inner) | Condition::Each(inner) | Condition::CountWhere(inner, ..) => {
                if inner.inspects_error() {
                    return Err(format!("{self} inspects errors, which objects do not have"));
                }
                inner.validate()
            }
            _ => Ok(()),
        }
    }

    // Whether the condition is a statement about a single object.
    fn is_per_object(&self) -> bool {
        match self {
            Condition::Exists(_)
            | Condition::Absent(_)
            | Condition::Equals(..)
            | Condition::Contains(..)
            | Condition::HasStatusCondition { .. }
            | Condition::Custom(..) => true,
            Condition::Not(inner) => inner.is_per_object(),
            Condition::And(all) | Condition::Or(all) => {
                !all.is_empty() && all.iter().all(Self::is_per_object)
            }
            _ => false,
        }
    }

    fn each_object(&self, items: &[DynamicObject]) -> Result<(), Mismatch> {
        items.iter().try_for_each(|obj| {
            self.evaluate(&Subject::object(obj))
                .map_err(|m| Mismatch(format!("{}: {}", NamespacedName::of(obj), m.0)))
        })
    }

    /// Whether the condition can only hold when the operation fails.
    pub fn expects_failure(&self) -> bool {
        match self {
            Condition::Fail | Condition::ErrorMatches(..) => true,
            Condition::Not(inner) => matches!(**inner, Condition::Succeed),
            Condition::And(all) | Condition::Or(all) => all.iter().any(Self::expects_failure),
            _ => false,
        }
    }

    /// Whether any part of the condition inspects the error of the operation.
    pub fn inspects_error(&self) -> bool {
        match self {
            Condition::Succeed | Condition::Fail | Condition::ErrorMatches(..) => true,
            Condition::Not(inner) => inner.inspects_error(),
            Condition::And(all) | Condition::Or(all) => all.iter().any(Self::inspects_error),
            _ => false,
        }
    }

    /// Require the write to succeed unless the condition already says something
    /// about its error.
    pub(crate) fn for_write(self) -> Self {
        if self.inspects_error() {
            self
        } else {
            Condition::Succeed.and(self)
        }
    }

    /// Evaluate the condition.
    pub fn evaluate(&self, subject: &Subject<'_>) -> Result<(), Mismatch> {
        if let Target::Many(items) = subject.target {
            if self.is_per_object() {
                return self.each_object(items);
            }
        }
        match self {
            Condition::Succeed => match subject.error {
                None => Ok(()),
                Some(err) => Err(Mismatch(format!("expected success, got error: {err}"))),
            },
            Condition::Fail => match subject.error {
                Some(_) => Ok(()),
                None => Err(Mismatch::new(
                    "expected the operation to fail, but it succeeded",
                )),
            },
            Condition::ErrorMatches(name, pred) => match subject.error {
                Some(err) if pred(err) => Ok(()),
                Some(err) => Err(Mismatch(format!("error does not match {name}: {err}"))),
                None => Err(Mismatch(format!(
                    "expected an error matching {name}, but the operation succeeded"
                ))),
            },
            Condition::Count(cmp, n) => {
                let len = match subject.target {
                    Target::Nothing => 0,
                    Target::One(_) => 1,
                    Target::Many(items) => items.len(),
                };
                if cmp.holds(len, *n) {
                    Ok(())
                } else {
                    Err(Mismatch(format!("expected length {cmp} {n}, got {len}")))
                }
            }
            Condition::NotEmpty => match subject.target {
                Target::One(_) => Ok(()),
                Target::Many(items) if !items.is_empty() => Ok(()),
                _ => Err(Mismatch::new("expected at least one resource, got none")),
            },
            Condition::Any(inner) => {
                let items = subject.objects();
                if items.iter().any(|obj| inner.evaluate(&Subject::object(obj)).is_ok()) {
                    Ok(())
                } else {
                    Err(Mismatch(format!(
                        "none of {} objects satisfies {inner}",
                        items.len()
                    )))
                }
            }
            Condition::Each(inner) => inner.each_object(subject.objects()),
            Condition::CountWhere(inner, cmp, n) => {
                let matched = subject
                    .objects()
                    .iter()
                    .filter(|obj| inner.evaluate(&Subject::object(obj)).is_ok())
                    .count();
                if cmp.holds(matched, *n) {
                    Ok(())
                } else {
                    Err(Mismatch(format!(
                        "expected {cmp} {n} objects satisfying {inner}, got {matched}"
                    )))
                }
            }
            Condition::ListCustom(name, pred) => {
                let trees: Vec<Value> = subject.objects().iter().map(object::to_value).collect();
                if pred(&trees) {
                    Ok(())
                } else {
                    Err(Mismatch(format!("expected {name}")))
                }
            }
            Condition::And(all) => all.iter().try_for_each(|c| c.evaluate(subject)),
            Condition::Or(any) => {
                let mut mismatches = Vec::with_capacity(any.len());
                for c in any {
                    match c.evaluate(subject) {
                        Ok(()) => return Ok(()),
                        Err(m) => mismatches.push(m.0),
                    }
                }
                Err(Mismatch(format!("none of {self} held: {}", mismatches.join("; "))))
            }
            Condition::Not(inner) => match inner.evaluate(subject) {
                Ok(()) => Err(Mismatch(format!("expected {self}, but {inner} held"))),
                Err(_) => Ok(()),
            },
            Condition::Invalid(reason) => Err(Mismatch(format!("invalid condition: {reason}"))),
            structural => match subject.target {
                Target::One(obj) => structural.check_object(obj),
                Target::Many(items) => structural.each_object(items),
                Target::Nothing => Err(Mismatch(match subject.error {
                    Some(err) => format!("no object to check {self}: {err}"),
                    None => format!("no object to check {self}"),
                })),
            },
        }
    }

    fn check_object(&self, obj: &DynamicObject) -> Result<(), Mismatch> {
        let tree = object::to_value(obj);
        let found = |path: &Path| path.get(&tree).filter(|v| !v.is_null());
        let holds = match self {
            Condition::Exists(path) => found(path).is_some(),
            Condition::Absent(path) => found(path).is_none(),
            Condition::Equals(path, expected) => {
                return match found(path) {
                    Some(actual) if actual == expected => Ok(()),
                    Some(actual) => Err(Mismatch(format!("{path} is {actual}, expected {expected}"))),
                    None => Err(Mismatch(format!("{path} is missing, expected {expected}"))),
                }
            }
            Condition::Contains(path, needle) => {
                found(path).map_or(false, |haystack| contains(haystack, needle))
            }
            Condition::HasStatusCondition { type_, status } => {
                return check_status_condition(&tree, type_, status)
            }
            Condition::Custom(_, pred) => pred(&tree),
            _ => return self.evaluate(&Subject::object(obj)),
        };
        if holds {
            Ok(())
        } else {
            Err(Mismatch(format!("expected {self}")))
        }
    }
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(s), Value::String(sub)) => s.contains(sub.as_str()),
        (Value::Array(items), _) => items.contains(needle),
        (Value::Object(fields), Value::Object(expected)) => expected
            .iter()
            .all(|(key, value)| fields.get(key) == Some(value)),
        _ => false,
    }
}

fn check_status_condition(tree: &Value, type_: &str, status: &str) -> Result<(), Mismatch> {
    let conditions = tree
        .pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let entry = conditions
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(type_));
    match entry {
        None => Err(Mismatch(format!("status condition {type_} is not reported"))),
        Some(c) => {
            let actual = c.get("status").and_then(Value::as_str).unwrap_or_default();
            if actual == status {
                Ok(())
            } else {
                let reason = c.get("reason").and_then(Value::as_str).unwrap_or_default();
                let message = c.get("message").and_then(Value::as_str).unwrap_or_default();
                Err(Mismatch(format!(
                    "status condition {type_} is {actual:?}, expected {status:?} (reason: {reason:?}, message: {message:?})"
                )))
            }
        }
    }
}

impl ops::Not for Condition {
    type Output = Condition;

    fn not(self) -> Self::Output {
        Condition::Not(Box::new(self))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |f: &mut fmt::Formatter<'_>, all: &[Condition], op: &str| {
            write!(f, "(")?;
            for (i, c) in all.iter().enumerate() {
                if i > 0 {
                    write!(f, " {op} ")?;
                }
                write!(f, "{c}")?;
            }
            write!(f, ")")
        };
        match self {
            Condition::Succeed => write!(f, "succeed"),
            Condition::Fail => write!(f, "fail"),
            Condition::ErrorMatches(name, _) => write!(f, "error matching {name}"),
            Condition::Exists(path) => write!(f, "has({path})"),
            Condition::Absent(path) => write!(f, "not has({path})"),
            Condition::Equals(path, value) => write!(f, "{path} == {value}"),
            Condition::Contains(path, value) => write!(f, "{path} contains {value}"),
            Condition::HasStatusCondition { type_, status } => {
                write!(f, "condition {type_} is {status}")
            }
            Condition::Count(cmp, n) => write!(f, "length {cmp} {n}"),
            Condition::NotEmpty => write!(f, "not empty"),
            Condition::Custom(name, _) | Condition::ListCustom(name, _) => write!(f, "{name}"),
            Condition::Any(inner) => write!(f, "any({inner})"),
            Condition::Each(inner) => write!(f, "each({inner})"),
            Condition::CountWhere(inner, cmp, n) => write!(f, "count({inner}) {cmp} {n}"),
            Condition::And(all) => join(f, all, "and"),
            Condition::Or(any) => join(f, any, "or"),
            Condition::Not(inner) => write!(f, "not {inner}"),
            Condition::Invalid(reason) => write!(f, "invalid({reason})"),
        }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Condition({self})")
    }
}
