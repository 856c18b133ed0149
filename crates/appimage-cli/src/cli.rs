use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "appimage-tool",
    about = "Inspect, extract and integrate AppImages",
    version,
    arg_required_else_help = true
)]
pub struct Args {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs and results as JSON
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Use a custom config file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show everything known about an AppImage
    Info {
        appimage: PathBuf,
    },

    /// Print the AppImage type
    Format {
        appimage: PathBuf,
    },

    /// Print the file size in bytes
    Size {
        appimage: PathBuf,
    },

    /// Print the MD5 digest of the whole file
    Md5 {
        appimage: PathBuf,
    },

    /// Print the offset where the embedded image begins
    Offset {
        appimage: PathBuf,
    },

    /// List files inside the AppImage
    #[clap(name = "ls", visible_alias = "list")]
    List {
        appimage: PathBuf,

        /// Directory inside the AppImage
        dir: Option<String>,

        /// Recurse into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Extract a single file from the AppImage
    Extract {
        appimage: PathBuf,

        /// Path inside the AppImage
        source: String,

        /// Destination on disk
        target: PathBuf,
    },

    /// Show whether an AppImage is integrated into the desktop
    Status {
        appimage: PathBuf,
    },

    /// Integrate an AppImage into the desktop
    Integrate {
        #[arg(required = true)]
        appimages: Vec<PathBuf>,

        /// Also integrate AppImages that would not be shown, such as terminal applications
        #[arg(short, long)]
        force: bool,
    },

    /// Remove the desktop integration of an AppImage
    #[clap(visible_alias = "remove")]
    Unintegrate {
        /// AppImage paths; they do not need to exist anymore
        #[arg(required = true)]
        appimages: Vec<PathBuf>,
    },
}
