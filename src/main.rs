//! KeySwitch — per-keyboard layout switching core.
//!
//! Remembers which input layout belongs to each physical keyboard and
//! switches the OS-wide layout the instant a different keyboard is used.
//! The settings UI talks to this process over JSON-line IPC on
//! stdin/stdout; this entry point wires the subsystems together and runs
//! the main event loop.

mod config;
mod ipc;
mod keyboards;
mod layouts;
mod platform;
mod switcher;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ipc::bridge::{emit_error, emit_event, spawn_stdin_reader};
use ipc::{CoreCommand, CoreEvent, KeyboardInfo, LayoutInfo};
use keyboards::{KeyboardRegistry, LayoutChoice};
use layouts::LayoutCatalog;
use platform::{DeviceHandle, KeyboardOs};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout is reserved for the IPC event stream.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    emit_event(&CoreEvent::Starting {});

    let (saved, first_run) = config::load_keyboards();
    if first_run {
        info!("No saved keyboard preferences, starting fresh");
    } else {
        info!(keyboards = saved.keyboards.len(), "Loaded saved keyboard preferences");
    }

    // Raw input registration is the one fatal startup error: without it
    // the core has no event source.
    let (os, mut input_rx) = platform::create()?;

    let catalog = LayoutCatalog::load(&os);
    info!(layouts = catalog.layouts().len() - 1, "Enumerated installed layouts");

    let attached = match os.list_keyboards() {
        Ok(attached) => attached,
        Err(e) => {
            warn!("Failed to enumerate attached keyboards: {}", e);
            Vec::new()
        }
    };
    let mut registry = KeyboardRegistry::load(&saved, &attached);
    registry.set_observer(|snapshot| {
        // Write-through on every committed mutation. The in-memory
        // registry stays authoritative if the write fails; the user just
        // loses the change at the next restart.
        if let Err(e) = config::save_keyboards(snapshot) {
            warn!("Failed to save keyboard preferences: {:#}", e);
        }
    });

    let mut cmd_rx = spawn_stdin_reader();

    emit_event(&CoreEvent::Ready { first_run });
    info!("KeySwitch core ready");

    loop {
        tokio::select! {
            device = input_rx.recv() => {
                match device {
                    Some(device) => handle_input_event(device, &mut registry, &catalog, &os),
                    None => {
                        warn!("Raw input listener stopped");
                        break;
                    }
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        if !handle_command(command, &mut registry, &catalog) {
                            break; // Stop command received.
                        }
                    }
                    None => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                }
            }
        }
    }

    emit_event(&CoreEvent::Stopping {});
    info!("KeySwitch core shutting down");
    Ok(())
}

/// One keystroke arrived from `device`: resolve which physical keyboard
/// that is and switch layouts if the keyboard asks for one.
fn handle_input_event(
    device: DeviceHandle,
    registry: &mut KeyboardRegistry,
    catalog: &LayoutCatalog,
    os: &dyn KeyboardOs,
) {
    // An unbound handle means the registry is about to change (new
    // keyboard, or a known one migrating to this handle).
    let was_bound = registry.find_by_handle(device).is_some();

    let keyboard = match registry.resolve_event(device, os) {
        Some(keyboard) => keyboard,
        None => return, // Transient device-query failure; event dropped.
    };
    let name = keyboard.name.clone();

    let switched = switcher::activate_for(keyboard, catalog, os);

    emit_event(&CoreEvent::KeyboardActivated { name: name.clone() });
    if let Some(layout) = switched {
        info!(keyboard = %name, layout = %layout, "Switched layout");
        emit_event(&CoreEvent::LayoutSwitched { keyboard: name, layout });
    }
    if !was_bound {
        emit_event(&CoreEvent::KeyboardList {
            keyboards: keyboard_list(registry),
        });
    }
}

/// Handle a single command from the settings UI. Returns `false` if the
/// main loop should exit.
fn handle_command(
    cmd: CoreCommand,
    registry: &mut KeyboardRegistry,
    catalog: &LayoutCatalog,
) -> bool {
    match cmd {
        CoreCommand::ListLayouts {} => {
            emit_event(&CoreEvent::LayoutList {
                layouts: catalog.layouts().iter().map(LayoutInfo::from).collect(),
            });
        }

        CoreCommand::ListKeyboards {} => {
            emit_event(&CoreEvent::KeyboardList {
                keyboards: keyboard_list(registry),
            });
        }

        CoreCommand::SetPreferredLayout { keyboard, layout } => {
            let choice = match layout {
                Some(name) => LayoutChoice::Layout(name),
                None => LayoutChoice::KeepCurrent,
            };
            if registry.set_preferred_layout(&keyboard, choice) {
                emit_event(&CoreEvent::KeyboardList {
                    keyboards: keyboard_list(registry),
                });
            } else {
                emit_error(&format!("Unknown keyboard: {}", keyboard));
            }
        }

        CoreCommand::Ping {} => emit_event(&CoreEvent::Pong {}),

        CoreCommand::Stop {} => return false,
    }
    true
}

fn keyboard_list(registry: &KeyboardRegistry) -> Vec<KeyboardInfo> {
    registry.keyboards().iter().map(KeyboardInfo::from).collect()
}
