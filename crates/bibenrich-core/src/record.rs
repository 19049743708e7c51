//! BibTeX-style structured records and a tolerant `.bib` file reader.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

static ENTRY_HEAD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*@\s*([A-Za-z]+)\s*([{(])").unwrap());
static ENTRY_START: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*@").unwrap());
static ANY_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"@\s*[A-Za-z]+\s*[{(]").unwrap());

/// A structured bibliographic record: entry type, key, and ordered fields.
///
/// Field names are stored lowercase. A parsed field also keeps its value as
/// written (`jams`, `"A" # { B}`), so macros and concatenations are written
/// back unchanged until the field is [`set`](BibRecord::set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BibRecord {
    pub entry_type: String,
    pub key: String,
    fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    name: String,
    value: String,
    source: Option<String>,
}

impl BibRecord {
    pub fn new(entry_type: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            entry_type: entry_type.into().to_lowercase(),
            key: key.into(),
            fields: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// The value of `name` as it appeared in the parsed source, if it came
    /// from one.
    pub fn source_text(&self, name: &str) -> Option<&str> {
        let name = name.to_lowercase();
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.source.as_deref())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some_and(|v| !v.trim().is_empty())
    }

    /// Replace the value of `name`, or append it if absent.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_lowercase();
        let value = value.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(slot) => {
                slot.value = value;
                slot.source = None;
            }
            None => self.fields.push(Field {
                name,
                value,
                source: None,
            }),
        }
    }

    fn set_parsed(&mut self, name: &str, value: String, source: &str) {
        self.set(name, value);
        let name = name.to_lowercase();
        if let Some(slot) = self.fields.iter_mut().find(|f| f.name == name) {
            slot.source = Some(source.to_string());
        }
    }

    /// Builder form of [`BibRecord::set`].
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|f| (f.name.as_str(), f.value.as_str()))
    }

    /// Zero-pad the `mrnumber` field, if any.
    pub fn pad_mr_number(&mut self) {
        if let Some(mr) = self.get("mrnumber") {
            let padded = pad_mr_number(mr);
            if padded != mr {
                self.set("mrnumber", padded);
            }
        }
    }

    /// Parse the first `@type{key, ...}` entry found anywhere in `text`.
    pub fn parse_first(text: &str) -> Option<BibRecord> {
        let mut offset = 0;
        while let Some(m) = ANY_ENTRY.find(&text[offset..]) {
            let start = offset + m.start();
            if let Some((record, _)) = parse_entry(&text[start..]) {
                return Some(record);
            }
            offset = start + 1;
        }
        None
    }

    /// Render as a BibTeX entry, one field per line.
    pub fn to_bibtex(&self) -> String {
        let mut out = format!("@{}{{{},\n", self.entry_type, self.key);
        for field in &self.fields {
            match &field.source {
                Some(source) => out.push_str(&format!("  {} = {},\n", field.name, source)),
                None => out.push_str(&format!("  {} = {{{}}},\n", field.name, field.value)),
            }
        }
        out.push_str("}\n");
        out
    }
}

impl fmt::Display for BibRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_bibtex())
    }
}

/// Zero-pad the leading digit run of an MR number to seven digits.
///
/// Anything after the digits (such as a review annotation) is kept; values
/// with seven or more digits are returned unchanged.
pub fn pad_mr_number(value: &str) -> String {
    let trimmed = value.trim();
    let digits_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    if digits_end == 0 {
        return trimmed.to_string();
    }
    format!("{:0>7}{}", &trimmed[..digits_end], &trimmed[digits_end..])
}

/// One piece of a `.bib` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BibItem {
    Entry(BibRecord),
    /// Text kept byte-for-byte: comments, `@string`, `@preamble`, and
    /// anything that did not parse as an entry.
    Verbatim(String),
}

/// A whole `.bib` database that can be edited and written back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BibFile {
    pub items: Vec<BibItem>,
}

impl BibFile {
    pub fn parse(text: &str) -> Self {
        let mut items = Vec::new();
        let mut pos = 0;

        while pos < text.len() {
            let Some(start) = ENTRY_START.find_at(text, pos).map(|m| m.start()) else {
                items.push(BibItem::Verbatim(text[pos..].to_string()));
                break;
            };
            if start > pos {
                items.push(BibItem::Verbatim(text[pos..start].to_string()));
            }

            let rest = &text[start..];
            let is_special = ENTRY_HEAD.captures(rest).is_some_and(|caps| {
                matches!(
                    caps[1].to_lowercase().as_str(),
                    "string" | "preamble" | "comment"
                )
            });

            let consumed = if is_special {
                let len = block_len(rest).unwrap_or(rest.len());
                items.push(BibItem::Verbatim(rest[..len].to_string()));
                len
            } else if let Some((record, len)) = parse_entry(rest) {
                items.push(BibItem::Entry(record));
                // to_bibtex() ends with a newline; swallow the original one.
                if rest[len..].starts_with('\n') {
                    len + 1
                } else {
                    len
                }
            } else {
                // Unparseable: keep up to the next line-start '@'.
                let skip = rest.find('@').map_or(0, |i| i + 1);
                let len = ENTRY_START
                    .find_at(rest, skip)
                    .map_or(rest.len(), |m| m.start());
                items.push(BibItem::Verbatim(rest[..len].to_string()));
                len
            };
            pos = start + consumed.max(1);
        }

        Self { items }
    }

    pub fn entries(&self) -> impl Iterator<Item = &BibRecord> {
        self.items.iter().filter_map(|item| match item {
            BibItem::Entry(r) => Some(r),
            BibItem::Verbatim(_) => None,
        })
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut BibRecord> {
        self.items.iter_mut().filter_map(|item| match item {
            BibItem::Entry(r) => Some(r),
            BibItem::Verbatim(_) => None,
        })
    }
}

impl fmt::Display for BibFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            match item {
                BibItem::Entry(record) => f.write_str(&record.to_bibtex())?,
                BibItem::Verbatim(text) => f.write_str(text)?,
            }
        }
        Ok(())
    }
}

/// Length of an `@type{...}` block including its closing delimiter.
fn block_len(text: &str) -> Option<usize> {
    let caps = ENTRY_HEAD.captures(text)?;
    let open = caps.get(2)?;
    let close = if open.as_str() == "{" { '}' } else { ')' };
    let body_start = open.end();
    let mut depth = 0usize;
    for (i, c) in text[body_start..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' if depth > 0 => depth -= 1,
            c if c == close && depth == 0 => return Some(body_start + i + 1),
            _ => {}
        }
    }
    None
}

/// Parse one entry at the start of `text`. Returns the record and the
/// number of bytes consumed.
fn parse_entry(text: &str) -> Option<(BibRecord, usize)> {
    let caps = ENTRY_HEAD.captures(text)?;
    let entry_type = caps[1].to_lowercase();
    let open = caps.get(2)?;
    let close = if open.as_str() == "{" { '}' } else { ')' };

    let mut cur = Cursor {
        text,
        pos: open.end(),
    };
    cur.skip_ws();
    let key_start = cur.pos;
    while let Some(c) = cur.peek() {
        if c == ',' || c == close || c.is_whitespace() {
            break;
        }
        if c == '{' || c == '}' || c == '=' {
            return None;
        }
        cur.bump();
    }
    let key = text[key_start..cur.pos].to_string();
    let mut record = BibRecord::new(entry_type, key);

    loop {
        cur.skip_ws();
        match cur.peek()? {
            ',' => {
                cur.bump();
                continue;
            }
            c if c == close => {
                cur.bump();
                return Some((record, cur.pos));
            }
            _ => {}
        }

        let name_start = cur.pos;
        while let Some(c) = cur.peek() {
            if c.is_alphanumeric() || "_-:.+/".contains(c) {
                cur.bump();
            } else {
                break;
            }
        }
        if cur.pos == name_start {
            return None;
        }
        let name = text[name_start..cur.pos].to_string();
        cur.skip_ws();
        if cur.peek()? != '=' {
            return None;
        }
        cur.bump();

        cur.skip_ws();
        let value_start = cur.pos;
        let mut value_end;
        let mut value = String::new();
        loop {
            cur.skip_ws();
            match cur.peek()? {
                '{' => {
                    cur.bump();
                    value.push_str(cur.take_balanced('}')?);
                }
                '"' => {
                    cur.bump();
                    value.push_str(cur.take_balanced('"')?);
                }
                _ => {
                    let start = cur.pos;
                    while let Some(c) = cur.peek() {
                        if c == ',' || c == close || c == '#' || c.is_whitespace() {
                            break;
                        }
                        cur.bump();
                    }
                    if cur.pos == start {
                        return None;
                    }
                    value.push_str(&text[start..cur.pos]);
                }
            }
            value_end = cur.pos;
            cur.skip_ws();
            if cur.peek() == Some('#') {
                cur.bump();
            } else {
                break;
            }
        }
        record.set_parsed(&name, value, &text[value_start..value_end]);
    }
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Consume up to the unnested `end` delimiter and return the content
    /// before it. The delimiter itself is consumed.
    fn take_balanced(&mut self, end: char) -> Option<&'a str> {
        let start = self.pos;
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            if c == end && depth == 0 {
                let content = &self.text[start..self.pos];
                self.bump();
                return Some(content);
            }
            match c {
                '{' => depth += 1,
                '}' => depth = depth.checked_sub(1)?,
                _ => {}
            }
            self.bump();
        }
        None
    }
}
