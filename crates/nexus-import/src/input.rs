//! JSON-lines input files
//!
//! One entity per line, with labels, types and property keys already
//! resolved to token ids:
//!
//! ```text
//! {"id": "alice", "labels": [0], "properties": {"0": "Alice", "1": 42}}
//! {"start": "alice", "end": "bob", "type": 3, "properties": {"2": [1.5, 2.0]}}
//! ```
//!
//! Blank lines are skipped and `null` property values are dropped.

use nexus_store::import::input::InputBatches;
use nexus_store::import::{Estimates, Input, InputNode, InputRelationship};
use nexus_store::property::{ArrayValue, PropertyValue};
use nexus_store::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct NodeLine {
    id: String,
    #[serde(default)]
    labels: Vec<u32>,
    #[serde(default)]
    properties: BTreeMap<u32, Value>,
}

#[derive(Debug, Deserialize)]
struct RelationshipLine {
    start: String,
    end: String,
    #[serde(rename = "type")]
    rel_type: u32,
    #[serde(default)]
    properties: BTreeMap<u32, Value>,
}

/// Convert a JSON value to a property value; `None` for `null`
pub fn property_value(value: Value) -> std::result::Result<Option<PropertyValue>, String> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => PropertyValue::Bool(b),
        Value::Number(n) => match n.as_i64() {
            Some(long) => PropertyValue::Long(long),
            None => PropertyValue::Double(n.as_f64().ok_or_else(|| format!("Unsupported number {}", n))?),
        },
        Value::String(s) => PropertyValue::String(s),
        Value::Array(items) => PropertyValue::Array(array_value(items)?),
        Value::Object(_) => return Err("Nested objects are not property values".to_string()),
    }))
}

fn array_value(items: Vec<Value>) -> std::result::Result<ArrayValue, String> {
    if items.iter().all(Value::is_boolean) {
        return Ok(ArrayValue::Bool(items.iter().filter_map(Value::as_bool).collect()));
    }
    if items.iter().all(Value::is_i64) {
        return Ok(ArrayValue::Long(items.iter().filter_map(Value::as_i64).collect()));
    }
    if items.iter().all(Value::is_number) {
        return Ok(ArrayValue::Double(items.iter().filter_map(Value::as_f64).collect()));
    }
    if items.iter().all(Value::is_string) {
        return Ok(ArrayValue::String(
            items.into_iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
        ));
    }
    Err("Array elements must all be booleans, numbers or strings".to_string())
}

fn properties(raw: BTreeMap<u32, Value>) -> std::result::Result<Vec<(u32, PropertyValue)>, String> {
    let mut properties = Vec::with_capacity(raw.len());
    for (key, value) in raw {
        if let Some(value) = property_value(value).map_err(|e| format!("property {}: {}", key, e))? {
            properties.push((key, value));
        }
    }
    Ok(properties)
}

fn parse_node(line: &str) -> std::result::Result<InputNode, String> {
    let node: NodeLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
    Ok(InputNode {
        input_id: node.id,
        labels: node.labels,
        properties: properties(node.properties)?,
    })
}

fn parse_relationship(line: &str) -> std::result::Result<InputRelationship, String> {
    let relationship: RelationshipLine = serde_json::from_str(line).map_err(|e| e.to_string())?;
    Ok(InputRelationship {
        start: relationship.start,
        end: relationship.end,
        rel_type: relationship.rel_type,
        properties: properties(relationship.properties)?,
    })
}

type LineParser<T> = fn(&str) -> std::result::Result<T, String>;

/// Batches parsed from a sequence of files, read lazily
struct LineBatches<T> {
    files: std::vec::IntoIter<PathBuf>,
    current: Option<(PathBuf, Lines<BufReader<File>>, usize)>,
    batch_size: usize,
    parse: LineParser<T>,
}

impl<T> LineBatches<T> {
    fn next_line(&mut self) -> Result<Option<T>> {
        loop {
            if self.current.is_none() {
                let Some(path) = self.files.next() else {
                    return Ok(None);
                };
                let file = File::open(&path)
                    .map_err(|e| Error::invalid_argument(format!("Cannot open {}: {}", path.display(), e)))?;
                self.current = Some((path, BufReader::new(file).lines(), 0));
            }
            let Some((path, lines, number)) = self.current.as_mut() else {
                continue;
            };
            match lines.next() {
                None => self.current = None,
                Some(line) => {
                    *number += 1;
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    let parsed = (self.parse)(&line).map_err(|e| {
                        Error::invalid_argument(format!("{}:{}: {}", path.display(), number, e))
                    })?;
                    return Ok(Some(parsed));
                }
            }
        }
    }
}

impl<T> Iterator for LineBatches<T> {
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.next_line() {
                Ok(Some(item)) => batch.push(item),
                Ok(None) => break,
                Err(e) => {
                    // stop after the first error
                    self.files = Vec::new().into_iter();
                    self.current = None;
                    return Some(Err(e));
                }
            }
        }
        (!batch.is_empty()).then_some(Ok(batch))
    }
}

fn count_lines(files: &[PathBuf]) -> u64 {
    files
        .iter()
        .filter_map(|path| File::open(path).ok())
        .map(|file| {
            BufReader::new(file)
                .lines()
                .map_while(|line| line.ok())
                .filter(|line| !line.trim().is_empty())
                .count() as u64
        })
        .sum()
}

/// Input reading node and relationship files in JSON-lines format
#[derive(Debug, Clone, Default)]
pub struct JsonLinesInput {
    node_files: Vec<PathBuf>,
    relationship_files: Vec<PathBuf>,
}

impl JsonLinesInput {
    /// Input over the given files, read in order
    pub fn new(node_files: Vec<PathBuf>, relationship_files: Vec<PathBuf>) -> Self {
        Self {
            node_files,
            relationship_files,
        }
    }

    /// Fail early on files that do not exist
    pub fn check_files(&self) -> Result<()> {
        for path in self.node_files.iter().chain(&self.relationship_files) {
            if !Path::new(path).is_file() {
                return Err(Error::invalid_argument(format!("Input file {} not found", path.display())));
            }
        }
        Ok(())
    }
}

impl Input for JsonLinesInput {
    fn nodes(&self, batch_size: usize) -> Result<InputBatches<'_, InputNode>> {
        Ok(Box::new(LineBatches {
            files: self.node_files.clone().into_iter(),
            current: None,
            batch_size: batch_size.max(1),
            parse: parse_node as LineParser<InputNode>,
        }))
    }

    fn relationships(&self, batch_size: usize) -> Result<InputBatches<'_, InputRelationship>> {
        Ok(Box::new(LineBatches {
            files: self.relationship_files.clone().into_iter(),
            current: None,
            batch_size: batch_size.max(1),
            parse: parse_relationship as LineParser<InputRelationship>,
        }))
    }

    fn estimates(&self) -> Estimates {
        Estimates {
            nodes: count_lines(&self.node_files),
            relationships: count_lines(&self.relationship_files),
            labels: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_lines(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        path
    }

    #[test]
    fn test_property_values() {
        assert_eq!(property_value(json!(null)).unwrap(), None);
        assert_eq!(property_value(json!(7)).unwrap(), Some(PropertyValue::Long(7)));
        assert_eq!(property_value(json!(0.5)).unwrap(), Some(PropertyValue::Double(0.5)));
        assert_eq!(
            property_value(json!([1, 2.5])).unwrap(),
            Some(PropertyValue::Array(ArrayValue::Double(vec![1.0, 2.5])))
        );
        assert_eq!(
            property_value(json!(["a", "b"])).unwrap(),
            Some(PropertyValue::Array(ArrayValue::String(vec!["a".to_string(), "b".to_string()])))
        );
        assert!(property_value(json!([1, "a"])).is_err());
        assert!(property_value(json!({"a": 1})).is_err());
    }

    #[test]
    fn test_batches_span_files() {
        let dir = TempDir::new().unwrap();
        let first = write_lines(
            &dir,
            "nodes-1.jsonl",
            &[r#"{"id": "a", "labels": [1], "properties": {"0": "x", "1": null}}"#, "", r#"{"id": "b"}"#],
        );
        let second = write_lines(&dir, "nodes-2.jsonl", &[r#"{"id": "c", "labels": [2, 0]}"#]);
        let input = JsonLinesInput::new(vec![first, second], Vec::new());

        let batches: Vec<Vec<InputNode>> = input.nodes(2).unwrap().map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0][0].properties, vec![(0, PropertyValue::from("x"))]);
        assert_eq!(batches[1][0].input_id, "c");
        assert_eq!(input.estimates().nodes, 3);
        assert_eq!(input.relationships(2).unwrap().count(), 0);
    }

    #[test]
    fn test_bad_line_reports_position() {
        let dir = TempDir::new().unwrap();
        let path = write_lines(
            &dir,
            "rels.jsonl",
            &[r#"{"start": "a", "end": "b", "type": 0}"#, r#"{"start": "a"}"#],
        );
        let input = JsonLinesInput::new(Vec::new(), vec![path]);
        let results: Vec<_> = input.relationships(10).unwrap().collect();
        assert_eq!(results.len(), 1);
        let message = results[0].as_ref().unwrap_err().to_string();
        assert!(message.contains("rels.jsonl:2"), "{}", message);
    }

    #[test]
    fn test_missing_file() {
        let input = JsonLinesInput::new(vec![PathBuf::from("/nonexistent/nodes.jsonl")], Vec::new());
        assert!(input.check_files().is_err());
    }
}
