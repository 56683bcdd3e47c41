use crate::models::{BatchOptions, Layout};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "asset-dl")]
#[command(author, version, about = "Download the files of an asset with bounded concurrency", long_about = None)]
#[command(group(ArgGroup::new("input").required(true).args(["manifest", "link_file"])))]
pub struct Args {
    /// Asset file tree (JSON) to download
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Tab separated `path<TAB>url` list to download
    #[arg(short, long)]
    pub link_file: Option<PathBuf>,

    /// Output directory (prompted for when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of parallel downloads
    #[arg(short, long, default_value = "5", env = "ASSET_DL_CONCURRENCY")]
    pub concurrency: usize,

    /// Number of retry attempts on failure
    #[arg(short, long, default_value = "3", env = "ASSET_DL_RETRIES")]
    pub retries: u32,

    /// Base backoff delay in milliseconds, doubled per retry
    #[arg(long, default_value = "1000", env = "ASSET_DL_BACKOFF_MS")]
    pub backoff_ms: u64,

    /// Per-attempt timeout in seconds (0 disables)
    #[arg(long, default_value = "300", env = "ASSET_DL_TIMEOUT")]
    pub timeout: u64,

    /// Ignore the file tree and write every file into the output directory
    #[arg(long)]
    pub flatten: bool,

    /// Only download files below this folder
    #[arg(long)]
    pub prefix: Option<String>,

    /// Include nested folders below --prefix
    #[arg(long)]
    pub recursive: bool,

    /// Skip files a previous run into the same output already completed
    #[arg(long, requires = "output")]
    pub resume: bool,

    /// Print `path<TAB>url` download links instead of downloading
    #[arg(long)]
    pub shareable_links_only: bool,

    /// Asset API base url, required with --manifest
    #[arg(long, env = "ASSET_DL_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token for the asset API
    #[arg(long, env = "ASSET_DL_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// HTTP proxy (e.g., http://127.0.0.1:7890)
    #[arg(long)]
    pub proxy: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            concurrency: self.concurrency,
            max_retries: self.retries,
            backoff_base: Duration::from_millis(self.backoff_ms),
            attempt_timeout: (self.timeout > 0).then(|| Duration::from_secs(self.timeout)),
            layout: if self.flatten {
                Layout::Flatten
            } else {
                Layout::Preserve
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_map_onto_batch_options() {
        let args = Args::try_parse_from(["asset-dl", "--link-file", "links.tsv"]).unwrap();
        let options = args.batch_options();

        assert_eq!(options.concurrency, 5);
        assert_eq!(options.max_retries, 3);
        assert_eq!(options.backoff_base, Duration::from_millis(1000));
        assert_eq!(options.attempt_timeout, Some(Duration::from_secs(300)));
        assert_eq!(options.layout, Layout::Preserve);
    }

    #[test]
    fn zero_timeout_disables_it() {
        let args = Args::try_parse_from([
            "asset-dl", "-l", "links.tsv", "--timeout", "0", "--flatten",
        ])
        .unwrap();
        let options = args.batch_options();
        assert_eq!(options.attempt_timeout, None);
        assert_eq!(options.layout, Layout::Flatten);
    }

    #[test]
    fn links_only_needs_no_output() {
        let args =
            Args::try_parse_from(["asset-dl", "-m", "tree.json", "--shareable-links-only"]).unwrap();
        assert!(args.shareable_links_only);
        assert!(args.output.is_none());
    }

    #[test]
    fn resume_needs_a_known_output() {
        assert!(Args::try_parse_from(["asset-dl", "-l", "links.tsv", "--resume"]).is_err());
        assert!(Args::try_parse_from(["asset-dl", "-l", "links.tsv", "--resume", "-o", "out"]).is_ok());
    }

    #[test]
    fn an_input_is_required() {
        assert!(Args::try_parse_from(["asset-dl"]).is_err());
        assert!(
            Args::try_parse_from(["asset-dl", "-m", "tree.json", "-l", "links.tsv"]).is_err()
        );
    }
}
