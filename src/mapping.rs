//! Asset mapping rules.
//!
//! An [`AssetMapping`] binds a file naming convention to a catalog table and
//! the column that tracks the uploaded object's URL. Rules are evaluated in
//! declared order and the first whose pattern matches a file's base name
//! wins; there is no lookup by key.

use anyhow::{bail, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::urlquote;
use crate::checksum::ChecksumType;
use crate::config::{AssetMappingConfig, Config};
use crate::error::UploadError;
use crate::models::CatalogTable;

/// Named capture groups of a successful match: group name → captured text.
pub type Captures = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(String),
}

/// A compiled asset mapping rule.
#[derive(Debug, Clone)]
pub struct AssetMapping {
    pattern: Regex,
    synapse_file_type: String,
    query_url_template: String,
    query: Vec<Segment>,
    table: CatalogTable,
    url_tracking_column: Option<String>,
    checksum_types: Vec<ChecksumType>,
}

impl AssetMapping {
    pub fn compile(cfg: &AssetMappingConfig) -> Result<Self> {
        let pattern = Regex::new(&cfg.file_pattern)?;

        let query = parse_template(&cfg.query_url_template)?;
        let groups: Vec<&str> = pattern.capture_names().flatten().collect();
        for seg in &query {
            if let Segment::Group(name) = seg {
                if !groups.contains(&name.as_str()) {
                    bail!(
                        "query_url_template references {{{}}} but file_pattern has no group named '{}'",
                        name,
                        name
                    );
                }
            }
        }

        let table = match cfg.base_record_type.as_slice() {
            [schema, table] => CatalogTable::new(schema.clone(), table.clone()),
            other => bail!(
                "base_record_type must be [schema, table], got {} element(s)",
                other.len()
            ),
        };

        if cfg.checksum_types.is_empty() {
            bail!("checksum_types must name at least one algorithm");
        }

        let url_tracking_column = cfg
            .url_tracking_column
            .clone()
            .filter(|c| !c.trim().is_empty());

        Ok(Self {
            pattern,
            synapse_file_type: cfg.synapse_file_type.clone(),
            query_url_template: cfg.query_url_template.clone(),
            query,
            table,
            url_tracking_column,
            checksum_types: cfg.checksum_types.clone(),
        })
    }

    pub fn synapse_file_type(&self) -> &str {
        &self.synapse_file_type
    }

    pub fn file_pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn query_url_template(&self) -> &str {
        &self.query_url_template
    }

    pub fn table(&self) -> &CatalogTable {
        &self.table
    }

    pub fn url_tracking_column(&self) -> Option<&str> {
        self.url_tracking_column.as_deref()
    }

    pub fn checksum_types(&self) -> &[ChecksumType] {
        &self.checksum_types
    }

    /// The hash used for store-level dedup.
    pub fn primary_checksum(&self) -> ChecksumType {
        self.checksum_types[0]
    }

    pub fn matches(&self, file_name: &str) -> bool {
        self.pattern.is_match(file_name)
    }

    /// Match a base name, returning the named groups that participated.
    pub fn match_file(&self, file_name: &str) -> Result<Captures, UploadError> {
        let caps = self
            .pattern
            .captures(file_name)
            .ok_or_else(|| UploadError::NameMismatch {
                file_name: file_name.to_string(),
                file_type: self.synapse_file_type.clone(),
            })?;
        Ok(self
            .pattern
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect())
    }

    /// Substitute captured values into the query template.
    ///
    /// Values are percent-encoded; a group that did not participate in the
    /// match renders as the empty string.
    pub fn render_query(&self, captures: &Captures) -> String {
        let mut out = String::with_capacity(self.query_url_template.len());
        for seg in &self.query {
            match seg {
                Segment::Literal(s) => out.push_str(s),
                Segment::Group(name) => {
                    if let Some(v) = captures.get(name) {
                        out.push_str(&urlquote(v));
                    }
                }
            }
        }
        out
    }
}

fn parse_template(template: &str) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        if open > 0 {
            segments.push(Segment::Literal(rest[..open].to_string()));
        }
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            bail!("unclosed '{{' in query_url_template '{}'", template);
        };
        let name = &after[..close];
        if name.is_empty() || name.contains('{') {
            bail!("malformed placeholder in query_url_template '{}'", template);
        }
        segments.push(Segment::Group(name.to_string()));
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        bail!("unmatched '}}' in query_url_template '{}'", template);
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest.to_string()));
    }
    Ok(segments)
}

/// First rule, in declared order, whose pattern matches `file_name`.
pub fn classify<'r>(rules: &'r [AssetMapping], file_name: &str) -> Option<&'r AssetMapping> {
    rules.iter().find(|r| r.matches(file_name))
}

/// The final path component as text; the whole path if it has none.
pub fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Print the configured rules in dispatch order.
pub fn list_rules(config: &Config) -> Result<()> {
    let rules = config.rules()?;
    println!(
        "{:<3} {:<16} {:<24} {:<14} {:<8} PATTERN",
        "#", "FILE TYPE", "TABLE", "URL COLUMN", "HASHES"
    );
    for (i, rule) in rules.iter().enumerate() {
        let hashes = rule
            .checksum_types()
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<3} {:<16} {:<24} {:<14} {:<8} {}",
            i + 1,
            rule.synapse_file_type(),
            rule.table().to_string(),
            rule.url_tracking_column().unwrap_or("-"),
            hashes,
            rule.file_pattern()
        );
    }
    Ok(())
}
