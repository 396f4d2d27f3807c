//! Implementation of the reload command.
//!
//! Validates the configuration first so a broken file is reported here rather
//! than only in the daemon's log, then signals the daemon with SIGUSR2.

use anyhow::Result;

use crate::config;
use crate::io::instance;

pub fn handle_reload_command(debug_enabled: bool) -> Result<()> {
    log_version!();

    let Some(info) = instance::running_instance()? else {
        log_pipe!();
        log_warning!("lightkeeper is not running");
        log_indented!("Start it with `lightkeeper run`");
        log_end!();
        return Ok(());
    };

    // Validate the file the daemon will read, which may be a custom directory
    let path = match &info.config_dir {
        Some(dir) => dir.join(crate::constants::CONFIG_FILE_NAME),
        None => config::config_path()?,
    };
    if let Err(e) = config::load_from_path(&path) {
        log_error_exit!("Not reloading: configuration is invalid");
        eprintln!("{e:?}");
        std::process::exit(crate::constants::EXIT_FAILURE);
    }

    instance::send_reload_signal(info.pid)?;
    log_block_start!("Sent reload signal to lightkeeper (PID: {})", info.pid);
    if debug_enabled {
        log_pipe!();
        log_debug!("Validated {}", path.display());
    }
    log_end!();
    Ok(())
}
