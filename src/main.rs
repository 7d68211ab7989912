#[macro_use]
extern crate tracing;

use std::env;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use calloop::EventLoop;
use clap::{CommandFactory, Parser};
use freeform::backend::Headless;
use freeform::cli::{Cli, Sub};
use freeform::display::{AdapterOptions, FreeformDisplayAdapter};
use freeform::ipc::client::handle_msg;
use freeform::ipc::IpcServer;
use freeform::service::FreeformService;
use freeform::services::ServiceGate;
use freeform::utils::{current_uid, default_config_path, version};
use freeform::window::FreeformWindowManager;
use freeform_config::Config;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "freeform=debug,freeform_config=debug";

/// How often pending display changes are pushed to the host.
const TRAVERSAL_INTERVAL: Duration = Duration::from_millis(16);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let directives = env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_owned());
    let env_filter = EnvFilter::builder().parse_lossy(directives);
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(env_filter)
        .init();

    let cli = Cli::parse();

    if let Some(subcommand) = cli.subcommand {
        match subcommand {
            Sub::Validate { config } => {
                tracy_client::Client::start();

                let (path, _) = config_path(config);
                Config::load(&path)?;
                info!("config is valid");
                return Ok(());
            }
            Sub::Completions { shell } => {
                let mut cmd = Cli::command();
                clap_complete::generate(shell, &mut cmd, "freeform", &mut io::stdout());
                return Ok(());
            }
            Sub::Msg { msg, json } => {
                handle_msg(msg, json)?;
                return Ok(());
            }
        }
    }

    tracy_client::Client::start();

    info!("starting version {}", &version());

    let (path, is_default) = config_path(cli.config);
    let config = if is_default && !path.exists() {
        debug!("no config at {path:?}, using defaults");
        Config::default()
    } else {
        Config::load(&path)
            .map_err(|err| warn!("{err:?}"))
            .unwrap_or_default()
    };

    run(config)?;
    Ok(())
}

/// Resolves the config path. The flag wins over `$FREEFORM_CONFIG`, which wins over the default.
///
/// Returns whether the path is the default one.
fn config_path(cli_path: Option<PathBuf>) -> (PathBuf, bool) {
    if let Some(path) = cli_path {
        return (path, false);
    }

    if let Some(path) = env::var_os("FREEFORM_CONFIG").filter(|path| !path.is_empty()) {
        return (PathBuf::from(path), false);
    }

    let path = default_config_path().unwrap_or_else(|| PathBuf::from("config.kdl"));
    (path, true)
}

fn run(config: Config) -> anyhow::Result<()> {
    let _span = tracy_client::span!("run");

    let mut event_loop = EventLoop::<()>::try_new().context("error creating event loop")?;
    let handle = event_loop.handle();

    // Block the signals before spawning any thread, so that threads inherit the mask.
    let signals =
        Signals::new(&[Signal::SIGINT, Signal::SIGTERM]).context("error creating signal source")?;
    let stop = event_loop.get_signal();
    handle
        .insert_source(signals, move |event, _, _| {
            info!("received {:?}, shutting down", event.signal());
            stop.stop();
        })
        .map_err(|err| err.error)
        .context("error inserting signal source")?;

    let headless = Headless::new();
    let adapter = FreeformDisplayAdapter::new(
        Arc::new(headless.clone()),
        AdapterOptions::from(&config.display),
    );

    let gate = ServiceGate::new();
    gate.spawn_poll(
        Arc::new(headless.clone()),
        config.readiness.clone(),
        |_| {
            #[cfg(feature = "systemd")]
            if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
                warn!("error notifying systemd: {err:?}");
            }

            info!("freeform service ready");
        },
    )?;

    let windows = FreeformWindowManager::new(adapter.clone(), gate.clone(), config.windows.policy);
    let privileged_uid = config.control.privileged_uid.unwrap_or_else(current_uid);
    let service = FreeformService::new(
        adapter.clone(),
        windows,
        gate,
        privileged_uid,
        config.display.default_presentation_deadline_ns,
    );
    debug!("control plane reserved to uid {privileged_uid}");

    let ipc = IpcServer::start(
        &handle,
        service,
        Arc::new(headless.clone()),
        config.control.socket_path.map(PathBuf::from),
    )?;
    ipc.export_env();

    handle
        .insert_source(Timer::from_duration(TRAVERSAL_INTERVAL), move |_, _, _| {
            if headless.traversal_requested() {
                headless.traverse(&adapter);
            }
            TimeoutAction::ToDuration(TRAVERSAL_INTERVAL)
        })
        .map_err(|err| err.error)
        .context("error inserting traversal timer")?;

    event_loop
        .run(None, &mut (), |_| ())
        .context("error running event loop")?;

    drop(ipc);
    Ok(())
}
