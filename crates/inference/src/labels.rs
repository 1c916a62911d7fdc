use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Class names indexed by class id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    names: Vec<String>,
}

impl LabelTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Reads one class name per line. Trailing blank lines are ignored.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read labels from {}: {}", path.display(), e))?;

        let mut names: Vec<String> = contents.lines().map(|l| l.trim().to_string()).collect();
        while names.last().is_some_and(|n| n.is_empty()) {
            names.pop();
        }

        anyhow::ensure!(!names.is_empty(), "Labels file {} is empty", path.display());
        Ok(Self { names })
    }

    /// Parses the `names` metadata entry written by Ultralytics exports,
    /// a Python dict literal such as `{0: 'person', 1: 'bicycle'}`.
    pub fn from_ultralytics_names(raw: &str) -> anyhow::Result<Self> {
        let entries = parse_names_dict(raw)?;
        anyhow::ensure!(!entries.is_empty(), "Class name table is empty");

        let mut names = Vec::with_capacity(entries.len());
        for (expected, (id, name)) in entries.into_iter().enumerate() {
            anyhow::ensure!(
                id as usize == expected,
                "Class ids must be contiguous from 0, missing id {}",
                expected
            );
            names.push(name);
        }

        Ok(Self { names })
    }

    pub fn name(&self, class_id: u32) -> Option<&str> {
        self.names.get(class_id as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn parse_names_dict(raw: &str) -> anyhow::Result<BTreeMap<u32, String>> {
    let body = raw
        .trim()
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| anyhow::anyhow!("Class names must be a dict literal, got {:?}", raw))?;

    let mut entries = BTreeMap::new();
    let mut chars = body.chars().peekable();

    loop {
        skip_whitespace(&mut chars);
        if chars.peek().is_none() {
            break;
        }

        // keys are bare integers, or quoted ones in JSON-style exports
        let key = if matches!(chars.peek(), Some('\'' | '"')) {
            read_quoted(&mut chars)?
        } else {
            let mut digits = String::new();
            while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(c);
                chars.next();
            }
            digits
        };
        let id: u32 = key
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid class id {:?}", key))?;

        skip_whitespace(&mut chars);
        anyhow::ensure!(chars.next() == Some(':'), "Expected ':' after class id {}", id);
        skip_whitespace(&mut chars);

        let name = read_quoted(&mut chars)?;
        anyhow::ensure!(
            entries.insert(id, name).is_none(),
            "Duplicate class id {}",
            id
        );

        skip_whitespace(&mut chars);
        match chars.next() {
            Some(',') | None => {}
            Some(c) => anyhow::bail!("Unexpected character {:?} in class names", c),
        }
    }

    Ok(entries)
}

fn skip_whitespace(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
    }
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> anyhow::Result<String> {
    let quote = match chars.next() {
        Some(q @ ('\'' | '"')) => q,
        other => anyhow::bail!("Expected quoted class name, found {:?}", other),
    };

    let mut out = String::new();
    loop {
        match chars.next() {
            Some('\\') => match chars.next() {
                Some(c) => out.push(c),
                None => anyhow::bail!("Unterminated escape in class name"),
            },
            Some(c) if c == quote => return Ok(out),
            Some(c) => out.push(c),
            None => anyhow::bail!("Unterminated class name {:?}", out),
        }
    }
}
