//! Command-line argument parsing.
//!
//! The first non-flag argument selects a subcommand; running with none starts
//! the daemon. `--config <dir>` and `--debug` are accepted anywhere.

/// What the command line asks for.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Run the orchestrator daemon.
    Run {
        debug_enabled: bool,
        config_dir: Option<String>,
    },
    /// Run against simulated time with the log backend.
    Simulate {
        debug_enabled: bool,
        start_time: String,
        end_time: String,
        /// 0 means fast-forward.
        multiplier: f64,
        log_to_file: bool,
        config_dir: Option<String>,
    },
    /// Validate the configuration and print a summary.
    Check {
        debug_enabled: bool,
        config_dir: Option<String>,
    },
    /// Print the concrete date of a holiday pattern.
    Resolve { pattern: String, year: Option<i32> },
    /// Print sunrise and sunset for a coordinate.
    Solar {
        latitude: f64,
        longitude: f64,
        date: Option<String>,
    },
    /// Ask the running daemon what is playing.
    Status { json: bool, follow: bool },
    Play { playlist_id: String },
    StopPlaylist,
    StopAll,
    /// Reload the running daemon's configuration.
    Reload { debug_enabled: bool },
    /// Terminate the running daemon.
    Stop { debug_enabled: bool },
    ShowHelp,
    ShowVersion,
    /// Unknown or malformed arguments; `message` explains which.
    ShowHelpDueToError { message: String },
}

/// Result of parsing command-line arguments.
pub struct ParsedArgs {
    pub action: CliAction,
}

fn error(message: impl Into<String>) -> ParsedArgs {
    ParsedArgs {
        action: CliAction::ShowHelpDueToError {
            message: message.into(),
        },
    }
}

/// Value following `flag`, if the flag is present.
fn flag_value<'a>(args: &'a [String], names: &[&str]) -> Option<Option<&'a String>> {
    args.iter()
        .position(|arg| names.contains(&arg.as_str()))
        .map(|idx| args.get(idx + 1))
}

impl ParsedArgs {
    /// Parse `args` (including the program name, as from `std::env::args()`).
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args_vec: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        if args_vec
            .iter()
            .any(|arg| arg == "--version" || arg == "-V" || arg == "-v")
        {
            return ParsedArgs {
                action: CliAction::ShowVersion,
            };
        }
        if args_vec.iter().any(|arg| arg == "--help" || arg == "-h") {
            return ParsedArgs {
                action: CliAction::ShowHelp,
            };
        }

        let debug_enabled = args_vec.iter().any(|arg| arg == "--debug" || arg == "-d");
        let config_dir = match flag_value(&args_vec, &["--config", "-c"]) {
            Some(Some(dir)) => Some(dir.clone()),
            Some(None) => return error("--config requires a directory"),
            None => None,
        };

        // Positional arguments, with global flags and their values removed
        let mut positional = Vec::new();
        let mut rest = Vec::new();
        let mut idx = 0;
        while idx < args_vec.len() {
            let arg = &args_vec[idx];
            match arg.as_str() {
                "--config" | "-c" => idx += 2,
                "--debug" | "-d" => idx += 1,
                _ => {
                    if arg.starts_with('-') && !is_number(arg) {
                        rest.push(arg.clone());
                        // Flags that take a value carry it along
                        if takes_value(arg)
                            && let Some(value) = args_vec.get(idx + 1)
                        {
                            rest.push(value.clone());
                            idx += 1;
                        }
                    } else {
                        positional.push(arg.clone());
                    }
                    idx += 1;
                }
            }
        }

        let Some(command) = positional.first().cloned() else {
            if let Some(flag) = rest.first() {
                return error(format!("Unknown option: {flag}"));
            }
            return ParsedArgs {
                action: CliAction::Run {
                    debug_enabled,
                    config_dir,
                },
            };
        };
        let operands = &positional[1..];

        let action = match command.as_str() {
            "run" => expect_no_operands(&command, operands).map(|()| CliAction::Run {
                debug_enabled,
                config_dir,
            }),
            "simulate" | "S" => parse_simulate(&rest, debug_enabled, config_dir),
            "check" => expect_no_operands(&command, operands).map(|()| CliAction::Check {
                debug_enabled,
                config_dir,
            }),
            "resolve" => parse_resolve(operands, &rest),
            "solar" => parse_solar(&rest),
            "status" => Ok(CliAction::Status {
                json: rest.iter().any(|arg| arg == "--json"),
                follow: rest.iter().any(|arg| arg == "--follow" || arg == "-f"),
            }),
            "play" => match operands {
                [playlist_id] => Ok(CliAction::Play {
                    playlist_id: playlist_id.clone(),
                }),
                _ => Err("play requires exactly one playlist id".to_string()),
            },
            "stop-playlist" => {
                expect_no_operands(&command, operands).map(|()| CliAction::StopPlaylist)
            }
            "stop-all" => expect_no_operands(&command, operands).map(|()| CliAction::StopAll),
            "reload" | "r" => expect_no_operands(&command, operands)
                .map(|()| CliAction::Reload { debug_enabled }),
            "stop" => {
                expect_no_operands(&command, operands).map(|()| CliAction::Stop { debug_enabled })
            }
            "help" => Ok(CliAction::ShowHelp),
            other => Err(format!("Unknown command: {other}")),
        };

        match action {
            Ok(action) => ParsedArgs { action },
            Err(message) => error(message),
        }
    }

    /// Parse the process's own arguments.
    pub fn from_env() -> ParsedArgs {
        Self::parse(std::env::args())
    }
}

fn takes_value(flag: &str) -> bool {
    matches!(
        flag,
        "--from" | "--to" | "--speed" | "--year" | "--lat" | "--lon" | "--date"
    )
}

fn is_number(arg: &str) -> bool {
    arg.parse::<f64>().is_ok()
}

fn expect_no_operands(command: &str, operands: &[String]) -> Result<(), String> {
    match operands.first() {
        Some(extra) => Err(format!("Unexpected argument for {command}: {extra}")),
        None => Ok(()),
    }
}

fn required<'a>(rest: &'a [String], flag: &str, command: &str) -> Result<&'a String, String> {
    match flag_value(rest, &[flag]) {
        Some(Some(value)) => Ok(value),
        Some(None) => Err(format!("{flag} requires a value")),
        None => Err(format!("{command} requires {flag}")),
    }
}

fn parse_simulate(
    rest: &[String],
    debug_enabled: bool,
    config_dir: Option<String>,
) -> Result<CliAction, String> {
    let start_time = required(rest, "--from", "simulate")?.clone();
    let end_time = required(rest, "--to", "simulate")?.clone();
    let fast_forward = rest.iter().any(|arg| arg == "--fast-forward");
    let multiplier = match flag_value(rest, &["--speed"]) {
        Some(Some(value)) => {
            let speed = value
                .parse::<f64>()
                .map_err(|_| format!("Invalid speed: {value}"))?;
            if !(speed > 0.0 && speed <= 86400.0) {
                return Err("Speed must be between 0 and 86400".to_string());
            }
            speed
        }
        Some(None) => return Err("--speed requires a value".to_string()),
        None if fast_forward => 0.0,
        None => 3600.0,
    };
    Ok(CliAction::Simulate {
        debug_enabled,
        start_time,
        end_time,
        multiplier,
        log_to_file: rest.iter().any(|arg| arg == "--log"),
        config_dir,
    })
}

fn parse_resolve(operands: &[String], rest: &[String]) -> Result<CliAction, String> {
    let [pattern] = operands else {
        return Err("resolve requires exactly one date pattern".to_string());
    };
    let year = match flag_value(rest, &["--year"]) {
        Some(Some(value)) => Some(
            value
                .parse::<i32>()
                .map_err(|_| format!("Invalid year: {value}"))?,
        ),
        Some(None) => return Err("--year requires a value".to_string()),
        None => None,
    };
    Ok(CliAction::Resolve {
        pattern: pattern.clone(),
        year,
    })
}

fn parse_solar(rest: &[String]) -> Result<CliAction, String> {
    let coordinate = |flag: &str| -> Result<f64, String> {
        let value = required(rest, flag, "solar")?;
        value
            .parse::<f64>()
            .map_err(|_| format!("Invalid value for {flag}: {value}"))
    };
    Ok(CliAction::Solar {
        latitude: coordinate("--lat")?,
        longitude: coordinate("--lon")?,
        date: required(rest, "--date", "solar").ok().cloned(),
    })
}

pub fn display_version_info() {
    log_version!();
    log_pipe!();
    println!("┗ {}", env!("CARGO_PKG_DESCRIPTION"));
}

pub fn display_help() {
    log_version!();
    log_block_start!("{}", env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!("Usage: lightkeeper [OPTIONS] [COMMAND]");
    log_block_start!("Commands:");
    log_indented!("run                     Run the orchestrator (default)");
    log_indented!("simulate --from T --to T [--speed N | --fast-forward] [--log]");
    log_indented!("                        Run against simulated time");
    log_indented!("check                   Validate the configuration");
    log_indented!("resolve <pattern> [--year N]");
    log_indented!("                        Print the date of a holiday pattern");
    log_indented!("solar --lat X --lon Y [--date YYYY-MM-DD]");
    log_indented!("                        Print sunrise and sunset");
    log_indented!("status [--json] [--follow]");
    log_indented!("                        Show what is playing");
    log_indented!("play <playlist-id>      Play a playlist");
    log_indented!("stop-playlist           Stop the playing playlist");
    log_indented!("stop-all                Stop every stream");
    log_indented!("reload                  Reload the running daemon's configuration");
    log_indented!("stop                    Terminate the running daemon");
    log_block_start!("Options:");
    log_indented!("-c, --config <dir>      Use a custom configuration directory");
    log_indented!("-d, --debug             Enable detailed debug output");
    log_indented!("-h, --help              Print help information");
    log_indented!("-V, --version           Print version information");
    log_end!();
}
