//! Command implementations for the index admin tool.
//!
//! Handles:
//! - build: bulk-load JSONL vectors into a new snapshot
//! - search: query a snapshot and print ranked hits
//! - stats: print index statistics as JSON
//! - verify: structural audit, non-zero exit on violations

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use pattern_vector::{snapshot, IndexConfig, PatternIndex, SearchOptions};

/// One input record in the JSONL build format.
#[derive(Debug, Deserialize)]
struct BuildRecord {
    vector: Vec<f64>,
    #[serde(default)]
    metadata: Option<String>,
}

/// Initialize tracing from the CLI flag, falling back to RUST_LOG.
pub fn init_logging(level: Option<&str>) {
    use tracing_subscriber::EnvFilter;
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::from_default_env(),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Load index parameters from a TOML file, if one was given.
fn load_config_file(path: Option<&str>) -> Result<Option<IndexConfig>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = fs::read_to_string(path).with_context(|| format!("read config {path}"))?;
    let config: IndexConfig =
        toml::from_str(&raw).with_context(|| format!("parse config {path}"))?;
    Ok(Some(config))
}

/// Open an existing snapshot, deriving structural parameters from its
/// header when no config file is supplied.
fn open_existing(index: &str, config_path: Option<&str>) -> Result<PatternIndex> {
    let path = Path::new(index);
    if !path.exists() {
        bail!("index snapshot {index} not found");
    }
    let config = match load_config_file(config_path)? {
        Some(config) => config,
        None => {
            let info = snapshot::read_info(path)?;
            IndexConfig::new(info.dimension)
                .with_metric(info.metric)
                .with_connectivity(info.connectivity)
        }
    };
    Ok(PatternIndex::open(Some(path.to_path_buf()), config)?)
}

fn parse_vector(raw: &str) -> Result<Vec<f64>> {
    raw.split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid vector component {part:?}"))
        })
        .collect()
}

pub fn handle_build(
    input: &str,
    index: &str,
    dimension: Option<usize>,
    config_path: Option<&str>,
) -> Result<()> {
    let file = fs::File::open(input).with_context(|| format!("open input {input}"))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BuildRecord = serde_json::from_str(&line)
            .with_context(|| format!("{input}:{}: invalid record", line_no + 1))?;
        records.push(record);
    }
    if records.is_empty() {
        bail!("no records in {input}");
    }

    let config = match load_config_file(config_path)? {
        Some(config) => config,
        None => IndexConfig::new(dimension.unwrap_or(records[0].vector.len())),
    };

    let idx = PatternIndex::open(Some(PathBuf::from(index)), config).context("open index")?;
    let items: Vec<(Vec<f64>, Vec<u8>)> = records
        .into_iter()
        .map(|r| (r.vector, r.metadata.unwrap_or_default().into_bytes()))
        .collect();
    let total = items.len();

    let mut failed = 0usize;
    for (i, result) in idx.insert_batch(items).iter().enumerate() {
        if let Err(e) = result {
            warn!(record = i, error = %e, "insert failed");
            failed += 1;
        }
    }
    idx.close().context("flush index")?;

    info!(total, failed, "build complete");
    println!(
        "indexed {} of {} records ({} failed)",
        total - failed,
        total,
        failed
    );
    Ok(())
}

pub fn handle_search(
    index: &str,
    vector: &str,
    k: usize,
    ef: Option<usize>,
    config_path: Option<&str>,
) -> Result<()> {
    let query = parse_vector(vector)?;
    let idx = open_existing(index, config_path)?;

    let options = SearchOptions {
        ef,
        ..Default::default()
    };
    let hits = idx.search_with_options(&query, k, options)?;
    for hit in hits {
        let metadata = String::from_utf8_lossy(&hit.metadata).into_owned();
        println!(
            "{}",
            serde_json::json!({
                "id": hit.id,
                "distance": hit.distance,
                "metadata": metadata,
            })
        );
    }
    Ok(())
}

pub fn handle_stats(index: &str, config_path: Option<&str>) -> Result<()> {
    let idx = open_existing(index, config_path)?;
    println!("{}", serde_json::to_string_pretty(&idx.stats())?);
    Ok(())
}

pub fn handle_verify(index: &str, config_path: Option<&str>) -> Result<()> {
    let idx = open_existing(index, config_path)?;
    let report = idx.validate();
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_healthy() {
        bail!("index failed validation with {} issue(s)", report.issues.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("1.0, 2.5,-3").unwrap(), vec![1.0, 2.5, -3.0]);
        assert!(parse_vector("1.0,oops").is_err());
    }

    #[test]
    fn test_build_then_verify_and_search() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("vectors.jsonl");
        let index = temp.path().join("patterns.pvix");

        let mut file = fs::File::create(&input).unwrap();
        for i in 0..25 {
            let angle = i as f64 / 25.0;
            writeln!(
                file,
                r#"{{"vector": [{}, {}], "metadata": "p{}"}}"#,
                angle,
                1.0 - angle,
                i
            )
            .unwrap();
        }

        handle_build(
            input.to_str().unwrap(),
            index.to_str().unwrap(),
            None,
            None,
        )
        .unwrap();
        assert!(index.exists());

        handle_verify(index.to_str().unwrap(), None).unwrap();
        handle_search(index.to_str().unwrap(), "0.5,0.5", 3, None, None).unwrap();
        handle_stats(index.to_str().unwrap(), None).unwrap();
    }

    #[test]
    fn test_build_rejects_missing_input() {
        let temp = TempDir::new().unwrap();
        let index = temp.path().join("patterns.pvix");
        let result = handle_build("/does/not/exist.jsonl", index.to_str().unwrap(), None, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("index.toml");
        fs::write(
            &config_path,
            "dimension = 8\nmetric = \"euclidean\"\nconnectivity = 8\n",
        )
        .unwrap();

        let config = load_config_file(config_path.to_str()).unwrap().unwrap();
        assert_eq!(config.dimension, 8);
        assert_eq!(config.connectivity, 8);
    }
}
