//! Dotted paths into JSON documents, e.g. `.status.conditions[0].type`.
use std::{fmt, str::FromStr};

use serde_json::{Map, Value};

/// One step of a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    /// An object key.
    Key(String),
    /// An array index.
    Index(usize),
}

/// A parsed path into a JSON tree.
///
/// Keys are separated by `.` and array indices use `[n]`. Keys containing dots can
/// be quoted: `.metadata.labels."app.kubernetes.io/name"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Path {
    segments: Vec<Segment>,
}

/// The path text could not be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid path '{path}': {reason}")]
pub struct ParsePathError {
    path: String,
    reason: &'static str,
}

impl Path {
    /// The empty path, addressing the document root.
    pub fn root() -> Self {
        Self { segments: vec![] }
    }

    /// The steps of this path.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Look up the value at this path.
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(value, |current, segment| match segment {
                Segment::Key(key) => current.as_object()?.get(key),
                Segment::Index(idx) => current.as_array()?.get(*idx),
            })
    }

    /// Set the value at this path, creating intermediate objects as needed.
    ///
    /// Arrays are never grown; setting past the end of an array fails.
    pub fn set(&self, value: &mut Value, new: Value) -> anyhow::Result<()> {
        let Some((last, parents)) = self.segments.split_last() else {
            *value = new;
            return Ok(());
        };
        let mut current = value;
        for segment in parents {
            current = step_mut(current, segment, true)
                .ok_or_else(|| anyhow::anyhow!("cannot traverse {self} at {segment:?}"))?;
        }
        match last {
            Segment::Key(key) => {
                if current.is_null() {
                    *current = Value::Object(Map::new());
                }
                let object = current
                    .as_object_mut()
                    .ok_or_else(|| anyhow::anyhow!("{self} does not address an object field"))?;
                object.insert(key.clone(), new);
            }
            Segment::Index(idx) => {
                let slot = current
                    .as_array_mut()
                    .and_then(|array| array.get_mut(*idx))
                    .ok_or_else(|| anyhow::anyhow!("{self} is out of bounds"))?;
                *slot = new;
            }
        }
        Ok(())
    }

    /// Remove the value at this path, returning it if it was present.
    pub fn remove(&self, value: &mut Value) -> Option<Value> {
        let (last, parents) = self.segments.split_last()?;
        let mut current = value;
        for segment in parents {
            current = step_mut(current, segment, false)?;
        }
        match last {
            Segment::Key(key) => current.as_object_mut()?.remove(key),
            Segment::Index(idx) => {
                let array = current.as_array_mut()?;
                (*idx < array.len()).then(|| array.remove(*idx))
            }
        }
    }
}

fn step_mut<'a>(current: &'a mut Value, segment: &Segment, create: bool) -> Option<&'a mut Value> {
    match segment {
        Segment::Key(key) => {
            if create && current.is_null() {
                *current = Value::Object(Map::new());
            }
            let object = current.as_object_mut()?;
            if create {
                Some(
                    object
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new())),
                )
            } else {
                object.get_mut(key)
            }
        }
        Segment::Index(idx) => current.as_array_mut()?.get_mut(*idx),
    }
}

impl FromStr for Path {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |reason| ParsePathError {
            path: s.to_owned(),
            reason,
        };
        let mut segments = Vec::new();
        let mut chars = s.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '.' => match chars.peek() {
                    None => {
                        // A lone "." is the root.
                        if !segments.is_empty() {
                            return Err(err("trailing '.'"));
                        }
                    }
                    Some('"') => {
                        chars.next();
                        let mut key = String::new();
                        loop {
                            match chars.next() {
                                Some('"') => break,
                                Some(c) => key.push(c),
                                None => return Err(err("unterminated quote")),
                            }
                        }
                        segments.push(Segment::Key(key));
                    }
                    Some(_) => {
                        let mut key = String::new();
                        while let Some(&c) = chars.peek() {
                            if c == '.' || c == '[' {
                                break;
                            }
                            key.push(c);
                            chars.next();
                        }
                        if key.is_empty() {
                            return Err(err("empty key"));
                        }
                        segments.push(Segment::Key(key));
                    }
                },
                '[' => {
                    let mut digits = String::new();
                    loop {
                        match chars.next() {
                            Some(']') => break,
                            Some(c) if c.is_ascii_digit() => digits.push(c),
                            Some(_) => return Err(err("index must be a non-negative integer")),
                            None => return Err(err("unterminated index")),
                        }
                    }
                    let idx = digits.parse().map_err(|_| err("empty index"))?;
                    segments.push(Segment::Index(idx));
                }
                _ => return Err(err("expected '.' or '['")),
            }
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, ".");
        }
        for segment in &self.segments {
            match segment {
                Segment::Key(key) if key.contains('.') || key.contains('[') => {
                    write!(f, ".\"{key}\"")?
                }
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}
