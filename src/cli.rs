use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use freeform_ipc::{FreeformKey, MotionAction};

use crate::utils::version;

#[derive(Parser)]
#[command(author, version = version(), about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(subcommand_value_name = "SUBCOMMAND")]
#[command(subcommand_help_heading = "Subcommands")]
pub struct Cli {
    /// Path to config file (default: `$XDG_CONFIG_HOME/freeform/config.kdl`).
    ///
    /// This can also be set with the `FREEFORM_CONFIG` environment variable. If both are set,
    /// the command line argument takes precedence.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub subcommand: Option<Sub>,
}

#[derive(Subcommand)]
pub enum Sub {
    /// Communicate with the running freeform service.
    Msg {
        #[command(subcommand)]
        msg: Msg,
        /// Format output as JSON.
        #[arg(short, long)]
        json: bool,
    },
    /// Generate shell completions.
    Completions { shell: Shell },
    /// Validate the config file.
    Validate {
        /// Path to config file (default: `$XDG_CONFIG_HOME/freeform/config.kdl`).
        ///
        /// This can also be set with the `FREEFORM_CONFIG` environment variable. If both are
        /// set, the command line argument takes precedence.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum Msg {
    /// Print the version of the running service.
    Version,
    /// Check whether the host services are available.
    Ping,
    /// List freeform displays.
    Displays,
    /// Create a freeform display and print its events until interrupted.
    ///
    /// The display lives as long as this command runs.
    Create {
        /// Display name.
        #[arg(long, default_value = "freeform")]
        name: String,
        width: u32,
        height: u32,
        #[arg(long, default_value_t = 320)]
        density_dpi: u32,
        #[arg(long, default_value_t = 60.)]
        refresh_rate: f32,
        /// Render target to bind.
        #[arg(long)]
        surface: Option<String>,
        #[arg(long)]
        secure: bool,
        /// Allow the display to mirror other content.
        #[arg(long)]
        mirror: bool,
        #[arg(long)]
        decorations: bool,
        #[arg(long, default_value_t = 0)]
        user_id: i32,
    },
    /// Change the geometry of a display.
    Resize {
        handle: u64,
        width: u32,
        height: u32,
        #[arg(long, default_value_t = 320)]
        density_dpi: u32,
    },
    /// Bind a render target to a display, or detach it.
    SetSurface {
        handle: u64,
        /// Render target to bind; detaches the current one when missing.
        surface: Option<String>,
    },
    /// Tear down a display.
    Release { handle: u64 },
    /// Open an application in a freeform window.
    StartApp {
        package_name: String,
        activity_name: String,
        width: u32,
        height: u32,
        #[arg(long, default_value_t = 320)]
        density_dpi: u32,
        #[arg(long, default_value_t = 0)]
        user_id: i32,
        /// Move this existing task into the window instead of starting the activity.
        #[arg(long)]
        task_id: Option<i32>,
        /// Fire this deferred launch instead of starting the activity.
        #[arg(long)]
        pending_launch: Option<String>,
        #[arg(long)]
        resource_package: Option<String>,
        #[arg(long)]
        layout_name: Option<String>,
    },
    /// Remove the freeform window of an application.
    RemoveFreeform {
        /// Application as `package,activity,user`.
        key: FreeformKey,
    },
    /// Inject a key press or release into a display.
    InjectKey {
        display_id: u32,
        keycode: u32,
        /// Send a release instead of a press.
        #[arg(long)]
        release: bool,
    },
    /// Inject touch motion into a display.
    InjectMotion {
        display_id: u32,
        #[arg(value_enum)]
        action: MotionArg,
        x: f32,
        y: f32,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MotionArg {
    Down,
    Move,
    Up,
    Cancel,
}

impl From<MotionArg> for MotionAction {
    fn from(value: MotionArg) -> Self {
        match value {
            MotionArg::Down => MotionAction::Down,
            MotionArg::Move => MotionAction::Move,
            MotionArg::Up => MotionAction::Up,
            MotionArg::Cancel => MotionAction::Cancel,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_start_app() {
        let cli = Cli::try_parse_from([
            "freeform",
            "msg",
            "start-app",
            "org.example",
            ".Main",
            "540",
            "960",
            "--task-id",
            "12",
        ])
        .unwrap();

        let Some(Sub::Msg {
            msg: Msg::StartApp {
                package_name,
                width,
                task_id,
                density_dpi,
                ..
            },
            json: false,
        }) = cli.subcommand
        else {
            panic!("expected start-app");
        };
        assert_eq!(package_name, "org.example");
        assert_eq!(width, 540);
        assert_eq!(task_id, Some(12));
        assert_eq!(density_dpi, 320);
    }

    #[test]
    fn parses_freeform_key() {
        let cli = Cli::try_parse_from(["freeform", "msg", "remove-freeform", "org.example,.Main,10"])
            .unwrap();
        let Some(Sub::Msg {
            msg: Msg::RemoveFreeform { key },
            ..
        }) = cli.subcommand
        else {
            panic!("expected remove-freeform");
        };
        assert_eq!(key, FreeformKey::new("org.example", ".Main", 10));

        assert!(Cli::try_parse_from(["freeform", "msg", "remove-freeform", "org.example"]).is_err());
    }

    #[test]
    fn parses_completions_shell() {
        let cli = Cli::try_parse_from(["freeform", "completions", "bash"]).unwrap();
        assert!(matches!(
            cli.subcommand,
            Some(Sub::Completions { shell: Shell::Bash })
        ));
    }

    #[test]
    fn config_flag_conflicts_with_subcommand() {
        assert!(Cli::try_parse_from(["freeform", "--config", "a.kdl"]).is_ok());
        assert!(Cli::try_parse_from(["freeform", "--config", "a.kdl", "msg", "ping"]).is_err());
    }
}
