//! Markdown parser for flashcard files.
//!
//! # Format
//! ```markdown
//! ID: 1
//! Q: What is Rust?
//! A: A systems programming language.
//!
//! Q: Explain borrowing
//! A: Borrowing allows references without ownership.
//! Multiple lines are supported.
//! ```
//!
//! Markers are recognised only at the start of a line. Everything between
//! markers is appended verbatim to the open field, so blank lines, fenced
//! code and nested lists survive. A record without an `ID:` line (or with an
//! empty one) is pending: it has no identifier until the sync authority
//! assigns one.

use std::collections::{HashMap, HashSet};
use std::iter::Enumerate;
use std::str::Lines;

use crate::error::ParseWarning;
use crate::types::CardRecord;

/// Parse markdown content into a lazy sequence of card records.
///
/// Each item is either a complete record or a warning for a record that was
/// dropped. Items come out in file order.
pub fn parse(content: &str) -> Records<'_> {
    Records::new(content)
}

/// All records and warnings of a file, collected eagerly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFile {
    pub records: Vec<CardRecord>,
    pub warnings: Vec<ParseWarning>,
}

impl ParsedFile {
    /// Records that still need an identifier.
    pub fn pending(&self) -> impl Iterator<Item = &CardRecord> {
        self.records.iter().filter(|r| r.is_pending())
    }

    /// Records that already carry an identifier.
    pub fn identified(&self) -> impl Iterator<Item = &CardRecord> {
        self.records.iter().filter(|r| !r.is_pending())
    }
}

/// Parse the whole file, splitting records from warnings.
pub fn parse_all(content: &str) -> ParsedFile {
    let mut parsed = ParsedFile::default();
    for item in parse(content) {
        match item {
            Ok(record) => parsed.records.push(record),
            Err(warning) => parsed.warnings.push(warning),
        }
    }
    parsed
}

/// Lazy record iterator returned by [`parse`].
#[derive(Debug, Clone)]
pub struct Records<'a> {
    source: &'a str,
    lines: Enumerate<Lines<'a>>,
    current: Option<RecordBuilder<'a>>,
    seen_ids: HashSet<i64>,
}

impl<'a> Records<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            lines: source.lines().enumerate(),
            current: None,
            seen_ids: HashSet::new(),
        }
    }

    /// A fresh iterator over the same text, starting from the first line.
    pub fn restart(&self) -> Records<'a> {
        Records::new(self.source)
    }

    /// Feed one line; returns a record that the line closed, if any.
    fn feed(&mut self, line: &'a str, line_num: usize) -> Option<RecordBuilder<'a>> {
        match classify(line) {
            Line::Id(rest) => {
                let closed = self.take_current();
                self.current = Some(RecordBuilder::with_id(line_num, rest));
                closed
            }
            Line::Question(rest) => {
                let continues = self
                    .current
                    .as_ref()
                    .is_some_and(|builder| !builder.has_content());
                let closed = if continues {
                    None
                } else {
                    let closed = self.take_current();
                    self.current = Some(RecordBuilder::new(line_num));
                    closed
                };
                if let Some(builder) = self.current.as_mut() {
                    builder.open(Field::Question, rest);
                }
                closed
            }
            Line::Answer(rest) => {
                let builder = self
                    .current
                    .get_or_insert_with(|| RecordBuilder::new(line_num));
                if builder.answer_started() {
                    builder.push(line);
                } else {
                    builder.open(Field::Answer, rest);
                }
                None
            }
            Line::Text(text) => {
                if let Some(builder) = self.current.as_mut() {
                    builder.push(text);
                }
                None
            }
        }
    }

    fn take_current(&mut self) -> Option<RecordBuilder<'a>> {
        self.current.take()
    }

    fn finish(&mut self, builder: RecordBuilder<'a>) -> Result<CardRecord, ParseWarning> {
        let record = builder.build()?;
        if let Some(id) = record.id {
            if !self.seen_ids.insert(id) {
                return Err(ParseWarning::DuplicateId {
                    id,
                    line: record.line_number,
                });
            }
        }
        Ok(record)
    }
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<CardRecord, ParseWarning>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.lines.next() {
                Some((idx, line)) => {
                    if let Some(closed) = self.feed(line, idx + 1) {
                        return Some(self.finish(closed));
                    }
                }
                None => {
                    let last = self.current.take()?;
                    return Some(self.finish(last));
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Field {
    Question,
    Answer,
}

#[derive(Debug, Clone, PartialEq)]
enum IdMarker<'a> {
    Absent,
    Empty,
    Value(i64),
    Invalid(&'a str),
}

#[derive(Debug, Clone)]
struct RecordBuilder<'a> {
    start_line: usize,
    id: IdMarker<'a>,
    question: Option<String>,
    answer: Option<String>,
    field: Option<Field>,
    buffer: Vec<&'a str>,
}

impl<'a> RecordBuilder<'a> {
    fn new(start_line: usize) -> Self {
        Self {
            start_line,
            id: IdMarker::Absent,
            question: None,
            answer: None,
            field: None,
            buffer: Vec::new(),
        }
    }

    fn with_id(start_line: usize, raw: &'a str) -> Self {
        let raw = raw.trim();
        let id = if raw.is_empty() {
            IdMarker::Empty
        } else {
            raw.parse::<i64>()
                .map(IdMarker::Value)
                .unwrap_or(IdMarker::Invalid(raw))
        };
        Self {
            id,
            ..Self::new(start_line)
        }
    }

    fn has_content(&self) -> bool {
        self.field.is_some() || self.question.is_some() || self.answer.is_some()
    }

    fn answer_started(&self) -> bool {
        self.field == Some(Field::Answer) || self.answer.is_some()
    }

    fn open(&mut self, field: Field, first_line: &'a str) {
        self.flush();
        self.field = Some(field);
        self.buffer.push(first_line.trim_start());
    }

    fn push(&mut self, line: &'a str) {
        if self.field.is_some() {
            self.buffer.push(line);
        }
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let content = self.buffer.join("\n");
        self.buffer.clear();
        match self.field {
            Some(Field::Question) => self.question = Some(content),
            Some(Field::Answer) => self.answer = Some(content),
            None => {}
        }
    }

    fn build(mut self) -> Result<CardRecord, ParseWarning> {
        self.flush();
        let line = self.start_line;

        let question = non_empty(self.question).ok_or(ParseWarning::MissingQuestion { line })?;
        let answer = non_empty(self.answer).ok_or(ParseWarning::MissingAnswer { line })?;

        let (id, has_id_marker) = match self.id {
            IdMarker::Absent => (None, false),
            IdMarker::Empty => (None, true),
            IdMarker::Value(id) => (Some(id), true),
            IdMarker::Invalid(value) => {
                return Err(ParseWarning::InvalidId {
                    line,
                    value: value.to_string(),
                })
            }
        };

        Ok(CardRecord {
            id,
            question,
            answer,
            line_number: line,
            has_id_marker,
        })
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

enum Line<'a> {
    Id(&'a str),
    Question(&'a str),
    Answer(&'a str),
    Text(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    if let Some(rest) = line.strip_prefix("ID:") {
        Line::Id(rest)
    } else if let Some(rest) = line.strip_prefix("Q:") {
        Line::Question(rest)
    } else if let Some(rest) = line.strip_prefix("A:") {
        Line::Answer(rest)
    } else {
        Line::Text(line)
    }
}

/// Write assigned IDs into markdown content.
///
/// `assignments` maps a pending record's start line (1-based, as reported by
/// the parser) to its new ID. An empty `ID:` line is filled in place;
/// otherwise an `ID:` line is inserted above the record. Every other byte is
/// kept, including line endings and the final newline (or its absence).
pub fn inject_ids(content: &str, assignments: &[(usize, i64)]) -> String {
    if assignments.is_empty() {
        return content.to_string();
    }

    let mut by_line: HashMap<usize, i64> = assignments.iter().copied().collect();
    let mut result = String::with_capacity(content.len() + assignments.len() * 12);

    for (idx, raw) in content.split_inclusive('\n').enumerate() {
        let Some(id) = by_line.remove(&(idx + 1)) else {
            result.push_str(raw);
            continue;
        };

        let ending = if raw.ends_with("\r\n") {
            "\r\n"
        } else {
            "\n"
        };
        let line = raw.trim_end_matches(['\n', '\r']);

        if let Some(rest) = line.strip_prefix("ID:") {
            if rest.trim().is_empty() {
                result.push_str(&format!("ID: {id}"));
                result.push_str(&raw[line.len()..]);
                continue;
            }
        }
        result.push_str(&format!("ID: {id}{ending}"));
        result.push_str(raw);
    }

    result
}
