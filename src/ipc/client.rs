use anyhow::{anyhow, bail, Context};
use freeform_ipc::socket::Socket;
use freeform_ipc::{CreateFreeform, Display, Event, InputEvent, Request, Response, StartApp};

use crate::cli::Msg;
use crate::utils::version;

pub fn handle_msg(msg: Msg, json: bool) -> anyhow::Result<()> {
    let request = match &msg {
        Msg::Version => Request::Version,
        Msg::Ping => Request::Ping,
        Msg::Displays => Request::Displays,
        Msg::Create {
            name,
            width,
            height,
            density_dpi,
            refresh_rate,
            surface,
            secure,
            mirror,
            decorations,
            user_id,
        } => Request::CreateFreeform(CreateFreeform {
            name: name.clone(),
            width: *width,
            height: *height,
            density_dpi: *density_dpi,
            secure: *secure,
            own_content_only: !mirror,
            should_show_system_decorations: *decorations,
            surface: surface.clone(),
            refresh_rate: *refresh_rate,
            user_id: *user_id,
        }),
        Msg::Resize {
            handle,
            width,
            height,
            density_dpi,
        } => Request::ResizeFreeform {
            handle: *handle,
            width: *width,
            height: *height,
            density_dpi: *density_dpi,
        },
        Msg::SetSurface { handle, surface } => Request::SetFreeformSurface {
            handle: *handle,
            surface: surface.clone(),
        },
        Msg::Release { handle } => Request::ReleaseFreeform { handle: *handle },
        Msg::StartApp {
            package_name,
            activity_name,
            width,
            height,
            density_dpi,
            user_id,
            task_id,
            pending_launch,
            resource_package,
            layout_name,
        } => Request::StartAppInFreeform(StartApp {
            package_name: package_name.clone(),
            activity_name: activity_name.clone(),
            user_id: *user_id,
            pending_launch: pending_launch.clone(),
            task_id: *task_id,
            width: *width,
            height: *height,
            density_dpi: *density_dpi,
            secure: true,
            own_content_only: true,
            should_show_system_decorations: false,
            resource_package: resource_package.clone(),
            layout_name: layout_name.clone(),
        }),
        Msg::RemoveFreeform { key } => Request::RemoveFreeform { key: key.clone() },
        Msg::InjectKey {
            display_id,
            keycode,
            release,
        } => Request::InjectInput {
            display_id: *display_id,
            event: InputEvent::Key {
                keycode: *keycode,
                pressed: !release,
            },
        },
        Msg::InjectMotion {
            display_id,
            action,
            x,
            y,
        } => Request::InjectInput {
            display_id: *display_id,
            event: InputEvent::Motion {
                action: (*action).into(),
                x: *x,
                y: *y,
            },
        },
    };

    let mut socket = Socket::connect().context("error connecting to the freeform socket")?;

    let reply = socket
        .send(request)
        .context("error communicating with freeform")?;

    let running_version = match reply {
        Err(_) if !matches!(msg, Msg::Version) => {
            // If we got an error, it might be that the CLI is a different version from the running
            // service. Try to ask for its version to print a nicer message.
            match socket.send(Request::Version) {
                Ok(Ok(Response::Version(version))) => Some(version),
                _ => None,
            }
        }
        _ => None,
    };

    let response = reply.map_err(|err_msg| {
        if let Some(service_version) = running_version {
            let cli_version = version();
            if cli_version != service_version {
                eprintln!("Running freeform service has a different version from the freeform CLI:");
                eprintln!("Service version: {service_version}");
                eprintln!("CLI version:     {cli_version}");
                eprintln!("Did you forget to restart the service?");
                eprintln!();
            }
        }

        anyhow!(err_msg).context("freeform returned an error")
    })?;

    match msg {
        Msg::Version => {
            let Response::Version(service_version) = response else {
                bail!("unexpected response: expected Version, got {response:?}");
            };

            if json {
                println!("{}", serde_json::to_string(&serde_json::json!({
                    "cli": version(),
                    "service": service_version,
                }))?);
                return Ok(());
            }

            let cli_version = version();
            println!("Service version: {service_version}");
            println!("CLI version:     {cli_version}");
            if cli_version != service_version {
                println!();
                println!("These are different");
                println!("Did you forget to restart the service?");
            }
        }
        Msg::Ping => {
            let Response::Ping(ready) = response else {
                bail!("unexpected response: expected Ping, got {response:?}");
            };

            if json {
                println!("{}", serde_json::to_string(&ready)?);
                return Ok(());
            }

            if ready {
                println!("Host services are available");
            } else {
                println!("Host services are not available yet");
            }
        }
        Msg::Displays => {
            let Response::Displays(displays) = response else {
                bail!("unexpected response: expected Displays, got {response:?}");
            };

            if json {
                println!("{}", serde_json::to_string(&displays)?);
                return Ok(());
            }

            if displays.is_empty() {
                println!("No freeform displays.");
            }
            for display in &displays {
                print_display(display);
                println!();
            }
        }
        Msg::Create { .. } => {
            let Response::Created { handle } = response else {
                bail!("unexpected response: expected Created, got {response:?}");
            };

            if json {
                println!("{}", serde_json::to_string(&Response::Created { handle })?);
            } else {
                println!("Created display {handle}");
            }

            // The display is torn down once this connection closes, so keep it open.
            loop {
                let event = match socket.read_event() {
                    Ok(event) => event,
                    Err(err) => {
                        debug!("event stream ended: {err:?}");
                        return Ok(());
                    }
                };

                if json {
                    println!("{}", serde_json::to_string(&event)?);
                    continue;
                }

                match event {
                    Event::DisplayAdded { handle, display_id } => {
                        println!("Display {handle} added with id {display_id}");
                    }
                    Event::DisplayPaused { handle } => println!("Display {handle} paused"),
                    Event::DisplayResumed { handle } => println!("Display {handle} resumed"),
                    Event::DisplayStopped { handle } => {
                        println!("Display {handle} stopped");
                        return Ok(());
                    }
                }
            }
        }
        Msg::StartApp { .. } => {
            let Response::Started { key } = response else {
                bail!("unexpected response: expected Started, got {response:?}");
            };

            if json {
                println!("{}", serde_json::to_string(&key)?);
                return Ok(());
            }

            println!("Started {key}");
        }
        Msg::Resize { .. }
        | Msg::SetSurface { .. }
        | Msg::Release { .. }
        | Msg::RemoveFreeform { .. }
        | Msg::InjectKey { .. }
        | Msg::InjectMotion { .. } => {
            let Response::Handled = response else {
                bail!("unexpected response: expected Handled, got {response:?}");
            };
        }
    }

    Ok(())
}

fn print_display(display: &Display) {
    let Display {
        handle,
        unique_id,
        width,
        height,
        density_dpi,
        refresh_rate,
        logical_id,
        paused,
    } = display;

    println!("Display {handle} ({unique_id})");
    println!("  Size: {width}x{height} at {density_dpi} dpi, {refresh_rate:.3} Hz");
    match logical_id {
        Some(id) => println!("  Logical id: {id}"),
        None => println!("  Logical id: not assigned yet"),
    }
    if *paused {
        println!("  Paused: no render target");
    }
}
