pub mod commands;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "linkpeek")]
#[command(about = "Link previews and reader-mode articles for any URL", long_about = None)]
pub struct Cli {
    /// Maximum concurrent browser renders (overrides the config file)
    #[arg(short = 'j', long, global = true)]
    pub concurrency: Option<usize>,

    /// Show the browser window instead of running headless
    #[arg(long, global = true)]
    pub headed: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Fold command-line overrides into the loaded configuration
    pub fn apply(&self, config: &mut Config) {
        if let Some(n) = self.concurrency {
            config.scraper.max_concurrency = n.max(1);
        }
        if self.headed {
            config.scraper.headless = false;
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print link previews as JSON
    Preview {
        /// URLs to preview; several are processed concurrently
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the reader-mode article as JSON
    Read {
        /// URL of the article
        url: String,

        /// Print only the plain text
        #[arg(long)]
        text: bool,
    },
    /// Manage the result cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
pub enum CacheAction {
    /// Remove expired entries
    Purge,
    /// Show how many entries are stored
    Stats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_preview_with_global_flags() {
        let cli = Cli::try_parse_from(["linkpeek", "preview", "https://a.example", "https://b.example", "-j", "2"])
            .unwrap();

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.scraper.max_concurrency, 2);
        assert!(config.scraper.headless);

        match cli.command {
            Commands::Preview { urls } => assert_eq!(urls.len(), 2),
            _ => panic!("expected preview"),
        }
    }

    #[test]
    fn test_read_text_flag() {
        let cli = Cli::try_parse_from(["linkpeek", "--headed", "read", "https://a.example/post", "--text"]).unwrap();

        let mut config = Config::default();
        cli.apply(&mut config);
        assert!(!config.scraper.headless);
        assert!(matches!(cli.command, Commands::Read { text: true, .. }));
    }

    #[test]
    fn test_preview_requires_a_url() {
        assert!(Cli::try_parse_from(["linkpeek", "preview"]).is_err());
    }
}
