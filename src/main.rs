//! Command-line entry point.
//!
//! Parses arguments, applies the global flags, then hands off to the daemon
//! coordinator or one of the one-shot commands.

use anyhow::Result;

use lightkeeper::args::{self, CliAction, ParsedArgs};
use lightkeeper::commands;
use lightkeeper::config;
use lightkeeper::logger::Log;
use lightkeeper::{Lightkeeper, log_error_standalone, time_source};

fn main() -> Result<()> {
    let parsed_args = ParsedArgs::from_env();

    match parsed_args.action {
        CliAction::ShowVersion => {
            args::display_version_info();
            Ok(())
        }
        CliAction::ShowHelp => {
            args::display_help();
            Ok(())
        }
        CliAction::ShowHelpDueToError { message } => {
            log_error_standalone!("{message}");
            args::display_help();
            std::process::exit(lightkeeper::constants::EXIT_FAILURE);
        }
        CliAction::Run {
            debug_enabled,
            config_dir,
        } => {
            init_globals(debug_enabled, config_dir)?;
            Lightkeeper::new(debug_enabled).run()
        }
        CliAction::Simulate {
            debug_enabled,
            start_time,
            end_time,
            multiplier,
            log_to_file,
            config_dir,
        } => {
            init_globals(debug_enabled, config_dir)?;
            // Times are read in the configured zone; fall back to detection
            let tz = config::load()
                .map(|loaded| loaded.settings.timezone)
                .unwrap_or_else(|_| config::detect_timezone());
            let _guard = commands::simulate::handle_simulate_command(
                &start_time,
                &end_time,
                multiplier,
                log_to_file,
                tz,
            )?;
            Lightkeeper::new(debug_enabled).simulation().run()?;
            if !time_source::simulation_ended() {
                log_error_standalone!("Simulation was interrupted");
            }
            Ok(())
        }
        CliAction::Check {
            debug_enabled,
            config_dir,
        } => {
            init_globals(debug_enabled, config_dir)?;
            commands::check::handle_check_command(debug_enabled)
        }
        CliAction::Resolve { pattern, year } => {
            commands::resolve::handle_resolve_command(&pattern, year)
        }
        CliAction::Solar {
            latitude,
            longitude,
            date,
        } => commands::solar::handle_solar_command(latitude, longitude, date.as_deref()),
        CliAction::Status { json, follow } => commands::status::handle_status_command(json, follow),
        CliAction::Play { playlist_id } => commands::playback::handle_play_command(&playlist_id),
        CliAction::StopPlaylist => commands::playback::handle_stop_playlist_command(),
        CliAction::StopAll => commands::playback::handle_stop_all_command(),
        CliAction::Reload { debug_enabled } => {
            Log::set_debug(debug_enabled);
            commands::reload::handle_reload_command(debug_enabled)
        }
        CliAction::Stop { debug_enabled } => {
            Log::set_debug(debug_enabled);
            commands::stop::handle_stop_command(debug_enabled)
        }
    }
}

fn init_globals(debug_enabled: bool, config_dir: Option<String>) -> Result<()> {
    Log::set_debug(debug_enabled);
    config::set_config_dir(config_dir)
}
