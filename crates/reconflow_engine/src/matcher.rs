//! File classification: assign each input file to a declared side.
//!
//! Patterns match against the file's basename. A pattern is a glob by
//! default; the `re:` prefix switches to a raw regular expression. Sides are
//! tried in declaration order and the first side whose pattern set matches
//! claims the file.

use crate::error::EngineError;
use crate::schema::Schema;
use regex::Regex;
use std::path::{Path, PathBuf};

/// One compiled side pattern. Anchoring is baked into glob-derived regexes;
/// raw `re:` patterns search anywhere in the basename.
#[derive(Debug, Clone)]
pub struct Pattern(Regex);

impl Pattern {
    pub fn matches(&self, basename: &str) -> bool {
        self.0.is_match(basename)
    }
}

/// Compile a single pattern string (glob, or regex with `re:` prefix).
pub fn compile_pattern(pattern: &str) -> Result<Pattern, regex::Error> {
    if let Some(raw) = pattern.strip_prefix("re:") {
        return Ok(Pattern(Regex::new(raw)?));
    }
    Ok(Pattern(Regex::new(&glob_to_regex(pattern))?))
}

/// Translate a glob into an anchored regex. `*` matches any sequence, `?`
/// a single character; `[...]` classes pass through unchanged.
fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for c in glob.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' | ']' => out.push(c),
            '.' | '+' | '(' | ')' | '{' | '}' | '^' | '$' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('$');
    out
}

/// Classifies files into sides per the schema's pattern lists.
pub struct FileMatcher {
    sides: Vec<(String, Vec<Pattern>)>,
}

/// Files grouped by side, in side declaration order. Sides that matched no
/// file are present with an empty list.
#[derive(Debug, Clone)]
pub struct FileAssignments {
    pub by_side: Vec<(String, Vec<PathBuf>)>,
}

impl FileAssignments {
    pub fn files_for(&self, side: &str) -> &[PathBuf] {
        self.by_side
            .iter()
            .find(|(name, _)| name == side)
            .map(|(_, files)| files.as_slice())
            .unwrap_or(&[])
    }

    /// Basenames per side, for the result metadata.
    pub fn basenames(&self) -> Vec<(String, Vec<String>)> {
        self.by_side
            .iter()
            .map(|(side, files)| {
                let names = files.iter().map(|p| basename(p)).collect();
                (side.clone(), names)
            })
            .collect()
    }
}

pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

impl FileMatcher {
    /// Compile a matcher from a validated schema. Pattern compilation
    /// errors are schema errors (validation already tried them).
    pub fn new(schema: &Schema) -> Result<Self, EngineError> {
        let mut sides = Vec::with_capacity(schema.sides.len());
        for (name, spec) in &schema.sides {
            let mut patterns = Vec::with_capacity(spec.file_pattern.len());
            for pattern in &spec.file_pattern {
                let compiled = compile_pattern(pattern).map_err(|e| {
                    EngineError::SchemaInvalid(format!("side '{name}' pattern '{pattern}': {e}"))
                })?;
                patterns.push(compiled);
            }
            sides.push((name.clone(), patterns));
        }
        Ok(Self { sides })
    }

    /// Assign every file to exactly one side. The first unmatched file
    /// fails classification.
    pub fn assign(&self, files: &[PathBuf]) -> Result<FileAssignments, EngineError> {
        let mut by_side: Vec<(String, Vec<PathBuf>)> = self
            .sides
            .iter()
            .map(|(name, _)| (name.clone(), Vec::new()))
            .collect();

        for file in files {
            let name = basename(file);
            let claimed = self.sides.iter().position(|(_, patterns)| {
                patterns.iter().any(|p| p.matches(&name))
            });
            match claimed {
                Some(idx) => by_side[idx].1.push(file.clone()),
                None => return Err(EngineError::FileUnclassified(file.clone())),
            }
        }

        Ok(FileAssignments { by_side })
    }
}
