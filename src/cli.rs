//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use pmcfetch_core::{AmbiguousDefault, SourcePreference};

/// Fetch open-access PDFs for PMCIDs, PMIDs and DOIs.
///
/// Identifiers come from positional arguments (comma-separated lists are
/// accepted), a CSV file, or stdin. PMIDs and DOIs are resolved to PMCIDs
/// first; every input gets a line in the JSON report.
#[derive(Parser, Debug)]
#[command(name = "pmcfetch")]
#[command(author, version, about)]
pub struct Args {
    /// Identifiers to fetch (PMCID, PMID or DOI)
    #[arg(value_name = "ID")]
    pub ids: Vec<String>,

    /// CSV file with a header row; one column holds identifiers
    #[arg(short, long, value_name = "FILE", conflicts_with = "ids")]
    pub input: Option<PathBuf>,

    /// Column of --input to read (default: ID, PMCID, DOI, PMID, then first column)
    #[arg(long, requires = "input")]
    pub column: Option<String>,

    /// Process at most this many identifiers
    #[arg(short = 'n', long, value_parser = clap::value_parser!(u64).range(1..))]
    pub limit: Option<u64>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Courtesy pause in seconds before each download
    #[arg(long, value_name = "SECONDS", value_parser = parse_delay)]
    pub delay: Option<f64>,

    /// Directory for downloaded PDFs
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Directory for the lookup and download cache
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Contact address sent to NCBI, Europe PMC and Crossref
    #[arg(long)]
    pub email: Option<String>,

    /// NCBI API key (raises the E-utilities rate limit)
    #[arg(long)]
    pub api_key: Option<String>,

    /// Service(s) used to resolve PMIDs
    #[arg(long, value_enum)]
    pub source: Option<SourceArg>,

    /// How to read bare numbers that could be PMIDs or PMCIDs
    #[arg(long, value_enum)]
    pub ambiguous_default: Option<AmbiguousArg>,

    /// Disable per-service request spacing
    #[arg(long)]
    pub no_rate_limit: bool,

    /// Add abstracts from Europe PMC to the report
    #[arg(long)]
    pub abstracts: bool,

    /// Report path (default: <output-dir>/download_results.json)
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Remove every cache entry before running
    #[arg(long)]
    pub clear_cache: bool,

    /// Remove expired cache entries before running
    #[arg(long)]
    pub prune_cache: bool,

    /// Config file (default: $XDG_CONFIG_HOME/pmcfetch/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// `--source` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    Pubmed,
    EuropePmc,
    Both,
}

impl From<SourceArg> for SourcePreference {
    fn from(value: SourceArg) -> Self {
        match value {
            SourceArg::Pubmed => Self::Pubmed,
            SourceArg::EuropePmc => Self::EuropePmc,
            SourceArg::Both => Self::Both,
        }
    }
}

/// `--ambiguous-default` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AmbiguousArg {
    Pmid,
    Pmcid,
}

impl From<AmbiguousArg> for AmbiguousDefault {
    fn from(value: AmbiguousArg) -> Self {
        match value {
            AmbiguousArg::Pmid => Self::Pmid,
            AmbiguousArg::Pmcid => Self::Pmcid,
        }
    }
}

fn parse_delay(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err("delay must be a finite number >= 0".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["pmcfetch"]).unwrap();
        assert!(args.ids.is_empty());
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert_eq!(args.concurrency, None);
        assert!(!args.no_rate_limit);
    }

    #[test]
    fn test_cli_positional_ids() {
        let args =
            Args::try_parse_from(["pmcfetch", "PMC123456", "38238491,10.1038/nature12373"])
                .unwrap();
        assert_eq!(args.ids, ["PMC123456", "38238491,10.1038/nature12373"]);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["pmcfetch", "-v"]).unwrap();
        assert_eq!(args.verbose, 1);

        let args = Args::try_parse_from(["pmcfetch", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_quiet_flag_sets_quiet() {
        let args = Args::try_parse_from(["pmcfetch", "--quiet"]).unwrap();
        assert!(args.quiet);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["pmcfetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let err = Args::try_parse_from(["pmcfetch", "--version"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["pmcfetch", "-c", "100"]).unwrap();
        assert_eq!(args.concurrency, Some(100));

        for bad in ["0", "101"] {
            let err = Args::try_parse_from(["pmcfetch", "-c", bad]).unwrap_err();
            assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        }
    }

    #[test]
    fn test_cli_delay_must_be_non_negative() {
        let args = Args::try_parse_from(["pmcfetch", "--delay", "0.25"]).unwrap();
        assert_eq!(args.delay, Some(0.25));

        let err = Args::try_parse_from(["pmcfetch", "--delay", "-1"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_column_requires_input() {
        let err = Args::try_parse_from(["pmcfetch", "--column", "DOI"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let args =
            Args::try_parse_from(["pmcfetch", "-i", "papers.csv", "--column", "DOI"]).unwrap();
        assert_eq!(args.column.as_deref(), Some("DOI"));
    }

    #[test]
    fn test_cli_input_conflicts_with_positional_ids() {
        let err = Args::try_parse_from(["pmcfetch", "PMC1", "-i", "papers.csv"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_cli_source_and_ambiguous_default_values() {
        let args = Args::try_parse_from([
            "pmcfetch",
            "--source",
            "europe-pmc",
            "--ambiguous-default",
            "pmcid",
        ])
        .unwrap();
        assert_eq!(
            args.source.map(SourcePreference::from),
            Some(SourcePreference::EuropePmc)
        );
        assert_eq!(
            args.ambiguous_default.map(AmbiguousDefault::from),
            Some(AmbiguousDefault::Pmcid)
        );
    }

    #[test]
    fn test_cli_limit_zero_rejected() {
        let err = Args::try_parse_from(["pmcfetch", "--limit", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["pmcfetch", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
