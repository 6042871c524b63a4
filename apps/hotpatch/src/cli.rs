use std::path::PathBuf;

use clap::Parser;

use crate::config::Settings;

#[derive(Debug, Parser)]
#[command(name = "hotpatch")]
#[command(about = "Push changed scripts and stylesheets into running pages", version)]
pub struct Cli {
    /// Directory to watch
    pub dir: PathBuf,

    /// Interface the hub listens on
    #[arg(long)]
    pub host: Option<String>,

    /// Port the hub listens on
    #[arg(long, short)]
    pub port: Option<u16>,

    /// Settings file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Glob pattern of files to push; repeat for more
    #[arg(long = "pattern")]
    pub patterns: Vec<String>,
}

impl Cli {
    /// Overrides file settings with the flags that were given.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(host) = &self.host {
            settings.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.port = port;
        }
        if !self.patterns.is_empty() {
            settings.patterns.clone_from(&self.patterns);
        }
    }
}
