//! Batch membership
//!
//! Expands the identifiers given for a run into a flat, ordered batch:
//! - `@file` entries are listing files, replaced in place by the names they contain
//! - a numeric filename template (`img%02d.png`) with a first index and count
//!   appends one name per index
//!
//! Primary and alpha identifiers are expanded independently; they are paired
//! by position afterwards.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::info;

use crate::config::ConfigError;
use crate::error::{BatchError, BatchResult};

/// Prefix marking a listing file reference
pub const LISTING_PREFIX: char = '@';

/// Alternate template marker, accepted where `%` is awkward to type
pub const TEMPLATE_ALIAS: char = '!';

/// Longest name a template may produce
const MAX_TEMPLATE_OUTPUT: usize = 1024;

/// One source in a batch, with an optional alpha source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    pub source: String,
    pub alpha_source: Option<String>,
}

/// Numeric filename template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    pub template: String,
    /// First index substituted
    pub first: u32,
    /// Number of names to produce
    pub count: Option<u32>,
}

/// Unexpanded batch description
#[derive(Debug, Clone, Default)]
pub struct BatchSpec {
    pub inputs: Vec<String>,
    pub alpha_inputs: Vec<String>,
    pub template: Option<TemplateSpec>,
}

/// Fully expanded batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpandedBatch {
    pub sources: Vec<String>,
    pub alpha_sources: Vec<String>,
}

impl ExpandedBatch {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Batch items in order, alpha sources paired by position
    pub fn items(&self) -> Vec<BatchItem> {
        self.sources
            .iter()
            .enumerate()
            .map(|(i, source)| BatchItem {
                source: source.clone(),
                alpha_source: self.alpha_sources.get(i).cloned(),
            })
            .collect()
    }
}

/// Expand a batch description.
///
/// Template names are appended to the primary identifiers first; listing
/// files are then resolved in place for both identifier lists.
pub fn expand(spec: BatchSpec) -> BatchResult<ExpandedBatch> {
    let mut inputs = spec.inputs;

    if let Some(template) = &spec.template {
        inputs.extend(expand_template(template)?);
    }

    Ok(ExpandedBatch {
        sources: resolve_listings(inputs)?,
        alpha_sources: resolve_listings(spec.alpha_inputs)?,
    })
}

/// Replace every `@listing` entry with the names it contains, keeping order
pub fn resolve_listings(identifiers: Vec<String>) -> BatchResult<Vec<String>> {
    let mut resolved = Vec::with_capacity(identifiers.len());

    for id in identifiers {
        match id.strip_prefix(LISTING_PREFIX) {
            Some(listing) => resolved.extend(load_listing_file(Path::new(listing))?),
            None => resolved.push(id),
        }
    }

    Ok(resolved)
}

/// Read a listing file: one name per line, padding spaces and line
/// terminators trimmed, blank lines dropped
pub fn load_listing_file(path: &Path) -> BatchResult<Vec<String>> {
    let file = File::open(path).map_err(|e| BatchError::io(path, e))?;
    let reader = BufReader::new(file);

    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| BatchError::io(path, e))?;
        let name = line
            .trim_start_matches(' ')
            .trim_end_matches([' ', '\r', '\n']);
        if !name.is_empty() {
            names.push(name.to_string());
        }
    }

    info!(
        "Successfully read {} filename(s) from listing file \"{}\"",
        names.len(),
        path.display()
    );
    Ok(names)
}

/// Produce `count` names from a template, substituting `first..first+count`
pub fn expand_template(spec: &TemplateSpec) -> Result<Vec<String>, ConfigError> {
    let count = spec.count.ok_or(ConfigError::TemplateWithoutCount)?;
    if count == 0 {
        return Err(ConfigError::TemplateCountZero);
    }

    let template = spec.template.replacen(TEMPLATE_ALIAS, "%", 1);
    if !template.contains('%') {
        return Err(ConfigError::TemplateMissingMarker(spec.template.clone()));
    }

    let mut names = Vec::with_capacity(count as usize);
    for offset in 0..count {
        let index = spec.first.checked_add(offset).ok_or_else(|| ConfigError::TemplateInvalid {
            template: spec.template.clone(),
            reason: "index range overflows".to_string(),
        })?;
        let name = format_index(&template, index)?;
        if !name.is_empty() {
            names.push(name);
        }
    }

    Ok(names)
}

/// Substitute `value` into every integer conversion of a C-style template.
///
/// Supports `%d %i %u %x %X` with `- 0 + space` flags, a width, and ignored
/// `h`/`l` length modifiers; `%%` is a literal percent sign.
pub fn format_index(template: &str, value: u32) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::TemplateInvalid {
        template: template.to_string(),
        reason: reason.to_string(),
    };

    let mut out = String::with_capacity(template.len() + 8);
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            out.push('%');
            continue;
        }

        let (mut left, mut zero, mut plus, mut space) = (false, false, false, false);
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left = true,
                '0' => zero = true,
                '+' => plus = true,
                ' ' => space = true,
                _ => break,
            }
            chars.next();
        }

        let mut width = 0usize;
        while let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
            width = width * 10 + digit as usize;
            if width > MAX_TEMPLATE_OUTPUT {
                return Err(invalid("field width too large"));
            }
            chars.next();
        }

        while matches!(chars.peek(), Some('h') | Some('l')) {
            chars.next();
        }

        let (digits, signed) = match chars.next() {
            Some('d') | Some('i') => (value.to_string(), true),
            Some('u') => (value.to_string(), false),
            Some('x') => (format!("{:x}", value), false),
            Some('X') => (format!("{:X}", value), false),
            Some(other) => return Err(invalid(&format!("unsupported conversion '%{}'", other))),
            None => return Err(invalid("dangling '%' at end of template")),
        };

        let sign = match (signed, plus, space) {
            (true, true, _) => "+",
            (true, false, true) => " ",
            _ => "",
        };
        let pad = width.saturating_sub(sign.len() + digits.len());

        if left {
            out.push_str(sign);
            out.push_str(&digits);
            out.extend(std::iter::repeat(' ').take(pad));
        } else if zero {
            out.push_str(sign);
            out.extend(std::iter::repeat('0').take(pad));
            out.push_str(&digits);
        } else {
            out.extend(std::iter::repeat(' ').take(pad));
            out.push_str(sign);
            out.push_str(&digits);
        }
    }

    if out.len() > MAX_TEMPLATE_OUTPUT {
        return Err(invalid("expanded name too long"));
    }
    Ok(out)
}
