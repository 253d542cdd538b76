//! Command-line parsing
//!
//! ```text
//! ops-fetch [--config PATH] [--file PATH] [--reference publication|application|priority]
//!           [--batch-size N] [--metrics] [NUMBER ...]
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use ops_client::ReferenceType;

pub const USAGE: &str = "usage: ops-fetch [--config PATH] [--file PATH] \
[--reference publication|application|priority] [--batch-size N] [--metrics] [NUMBER ...]";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Args {
    pub config: Option<String>,
    pub file: Option<PathBuf>,
    pub reference: ReferenceType,
    /// 0 lets the client pick the maximum
    pub batch_size: usize,
    pub metrics: bool,
    pub help: bool,
    pub numbers: Vec<String>,
}

impl Args {
    /// Parse arguments without the program name.
    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut parsed = Args::default();
        let mut iter = args.into_iter().map(Into::into);

        while let Some(arg) = iter.next() {
            let mut value = |flag: &str| {
                iter.next()
                    .with_context(|| format!("{flag} requires a value"))
            };
            match arg.as_str() {
                "--config" => parsed.config = Some(value("--config")?),
                "--file" => parsed.file = Some(PathBuf::from(value("--file")?)),
                "--reference" => parsed.reference = parse_reference(&value("--reference")?)?,
                "--batch-size" => {
                    let raw = value("--batch-size")?;
                    parsed.batch_size = raw
                        .parse()
                        .with_context(|| format!("invalid --batch-size {raw:?}"))?;
                }
                "--metrics" => parsed.metrics = true,
                "-h" | "--help" => parsed.help = true,
                flag if flag.starts_with("--") => bail!("unknown flag {flag}\n{USAGE}"),
                _ => parsed.numbers.push(arg),
            }
        }
        Ok(parsed)
    }

    /// Positional numbers followed by those read from `--file`.
    pub fn collect_numbers(&self) -> Result<Vec<String>> {
        let mut numbers = self.numbers.clone();
        if let Some(path) = &self.file {
            numbers.extend(read_numbers(path)?);
        }
        if numbers.is_empty() {
            bail!("no publication numbers given\n{USAGE}");
        }
        Ok(numbers)
    }
}

fn parse_reference(value: &str) -> Result<ReferenceType> {
    match value.to_ascii_lowercase().as_str() {
        "publication" => Ok(ReferenceType::Publication),
        "application" => Ok(ReferenceType::Application),
        "priority" => Ok(ReferenceType::Priority),
        other => bail!("unknown reference type {other:?}"),
    }
}

/// One number per line; blank lines and `#` comments are skipped.
fn read_numbers(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read numbers from {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_owned)
        .collect())
}
