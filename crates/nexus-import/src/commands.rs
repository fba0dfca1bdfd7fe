use crate::input::JsonLinesInput;
use crate::settings::{Overrides, load_config};
use anyhow::{Context, Result, bail};
use clap::Args;
use nexus_store::counts::{ANY, COUNTS_FILE, CountsStore};
use nexus_store::schema::SchemaRule;
use nexus_store::{BulkImporter, ImportSummary};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Store directory to create
    #[arg(long)]
    pub into: PathBuf,

    /// Node files, JSON lines
    #[arg(long, num_args = 1.., required = true)]
    pub nodes: Vec<PathBuf>,

    /// Relationship files, JSON lines
    #[arg(long, num_args = 1..)]
    pub relationships: Vec<PathBuf>,

    /// Schema rules as a JSON array
    #[arg(long)]
    pub schema: Option<PathBuf>,

    /// Import configuration (TOML)
    #[arg(long, env = "NEXUS_IMPORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where to write bad entries
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Worker threads per step
    #[arg(long)]
    pub processors: Option<usize>,

    /// Relationships at which a node becomes dense
    #[arg(long)]
    pub dense_node_threshold: Option<u64>,

    /// Cache memory budget in bytes
    #[arg(long)]
    pub max_memory: Option<u64>,
}

#[derive(Args, Debug)]
pub struct CountsArgs {
    /// Store directory holding counts.db
    #[arg(long)]
    pub store: PathBuf,

    /// Label id to count
    #[arg(long)]
    pub label: Option<i64>,

    /// Relationship type id to count
    #[arg(long = "type")]
    pub rel_type: Option<i64>,
}

/// Read schema rules from a JSON array
pub fn read_schema(path: &Path) -> Result<Vec<SchemaRule>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Failed to read schema file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid schema file {}", path.display()))
}

/// Run an import and return its summary
pub fn import(args: ImportArgs) -> Result<ImportSummary> {
    let overrides = Overrides {
        processors: args.processors,
        dense_node_threshold: args.dense_node_threshold,
        max_memory: args.max_memory,
    };
    let config = load_config(args.config.as_deref(), overrides)?;
    let rules = match &args.schema {
        Some(path) => read_schema(path)?,
        None => Vec::new(),
    };
    let input = JsonLinesInput::new(args.nodes, args.relationships);
    input.check_files()?;

    let mut importer = BulkImporter::new(config).with_schema(rules);
    if let Some(path) = &args.report {
        let report =
            File::create(path).with_context(|| format!("Failed to create report file {}", path.display()))?;
        importer = importer.with_report(Box::new(BufWriter::new(report)));
    }

    info!("Importing into {}", args.into.display());
    let summary = importer
        .import_into(&args.into, &input)
        .with_context(|| format!("Import into {} failed", args.into.display()))?;
    Ok(summary)
}

/// Node and relationship counts of a finished store
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CountsReport {
    pub nodes: i64,
    pub relationships: i64,
}

/// Look up counts; the label filters nodes and relationship start nodes
pub fn counts(args: &CountsArgs) -> Result<CountsReport> {
    if !args.store.join(COUNTS_FILE).is_file() {
        bail!("No {} in {}, was the import completed?", COUNTS_FILE, args.store.display());
    }
    let store = CountsStore::open(&args.store)
        .with_context(|| format!("Failed to open counts of {}", args.store.display()))?;
    let label = args.label.unwrap_or(ANY);
    let rel_type = args.rel_type.unwrap_or(ANY);
    Ok(CountsReport {
        nodes: store.node_count(label),
        relationships: store.relationship_count(label, rel_type, ANY),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap().write_all(content.as_bytes()).unwrap();
        path
    }

    fn import_args(dir: &TempDir) -> ImportArgs {
        let nodes = write(
            dir,
            "nodes.jsonl",
            concat!(
                r#"{"id": "a", "labels": [0], "properties": {"0": "alice"}}"#,
                "\n",
                r#"{"id": "b", "labels": [0, 1]}"#,
                "\n",
                r#"{"id": "c", "properties": {"0": "carol", "1": [1, 2, 3]}}"#,
                "\n",
            ),
        );
        let relationships = write(
            dir,
            "relationships.jsonl",
            concat!(
                r#"{"start": "a", "end": "b", "type": 0}"#,
                "\n",
                r#"{"start": "b", "end": "c", "type": 1, "properties": {"2": 0.5}}"#,
                "\n",
                r#"{"start": "a", "end": "missing", "type": 1}"#,
                "\n",
            ),
        );
        ImportArgs {
            into: dir.path().join("store"),
            nodes: vec![nodes],
            relationships: vec![relationships],
            schema: None,
            config: None,
            report: Some(dir.path().join("bad.log")),
            processors: Some(2),
            dense_node_threshold: None,
            max_memory: None,
        }
    }

    #[test]
    fn test_import_and_count() {
        let dir = TempDir::new().unwrap();
        let summary = import(import_args(&dir)).unwrap();
        assert_eq!(summary.nodes, 3);
        assert_eq!(summary.relationships, 2);
        assert_eq!(summary.bad_entries, 1);

        let report = fs::read_to_string(dir.path().join("bad.log")).unwrap();
        assert!(report.contains("missing"));

        let store = dir.path().join("store");
        let all = counts(&CountsArgs {
            store: store.clone(),
            label: None,
            rel_type: None,
        })
        .unwrap();
        assert_eq!(all, CountsReport { nodes: 3, relationships: 2 });

        let labelled = counts(&CountsArgs {
            store,
            label: Some(0),
            rel_type: Some(1),
        })
        .unwrap();
        assert_eq!(labelled, CountsReport { nodes: 2, relationships: 1 });
    }

    #[test]
    fn test_schema_file() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "schema.json",
            r#"[{"rule": "constraint", "id": 0, "name": "unique_name",
                 "descriptor": {"kind": "label", "label": 0, "properties": [0]},
                 "kind": {"type": "unique", "owned_index": null}}]"#,
        );
        let rules = read_schema(&path).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id(), 0);

        let bad = write(&dir, "bad.json", "{}");
        assert!(read_schema(&bad).is_err());
    }

    #[test]
    fn test_missing_input_file() {
        let dir = TempDir::new().unwrap();
        let mut args = import_args(&dir);
        args.nodes = vec![dir.path().join("nope.jsonl")];
        assert!(import(args).is_err());
    }

    #[test]
    fn test_counts_without_store() {
        let dir = TempDir::new().unwrap();
        let args = CountsArgs {
            store: dir.path().to_path_buf(),
            label: None,
            rel_type: None,
        };
        assert!(counts(&args).is_err());
    }
}
