use std::path::PathBuf;

use clap::{Parser, Subcommand};

use super::config::AppConfig;

/// Command-line arguments for reefid
#[derive(Parser, Debug)]
#[command(name = "reefid")]
#[command(about = "Identify marine species in photos, queueing failures for later retry")]
#[command(version)]
pub struct Args {
    /// RON configuration file
    #[arg(short, long, default_value = "reefid.ron", env = "REEFID_CONFIG")]
    pub config: PathBuf,

    /// Base URL of the identification service
    #[arg(long, env = "REEFID_SERVICE_URL")]
    pub service_url: Option<String>,

    /// Device identifier sent with every request
    #[arg(long, env = "REEFID_DEVICE_ID")]
    pub device_id: Option<String>,

    /// Directory holding pending records
    #[arg(long, env = "REEFID_STORE_DIR")]
    pub store_dir: Option<PathBuf>,

    /// Directory acting as the photo library
    #[arg(long, env = "REEFID_LIBRARY_DIR")]
    pub library_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Identify photo files, one capture after another
    Identify {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List pending items, newest first
    Pending {
        /// Include items that have since been identified
        #[arg(long)]
        all: bool,
    },
    /// Retry identification of one pending item
    Retry { asset: String },
    /// Identify several pending items in one request
    Batch {
        /// Select every unprocessed item
        #[arg(long, conflicts_with = "assets")]
        all: bool,
        assets: Vec<String>,
    },
    /// Delete pending items
    Delete {
        #[arg(required = true)]
        assets: Vec<String>,
    },
    /// Delete every item that has been identified
    ClearIdentified,
    /// Write the effective configuration to the config file
    InitConfig,
}

impl Args {
    /// Command-line and environment values win over the config file.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(url) = &self.service_url {
            config.client.base_url = url.clone();
        }
        if let Some(device_id) = &self.device_id {
            config.client.device_id = device_id.clone();
        }
        if let Some(dir) = &self.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(dir) = &self.library_dir {
            config.library_dir = dir.clone();
        }
    }
}
