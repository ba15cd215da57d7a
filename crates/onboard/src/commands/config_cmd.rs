//! `onboard config` handlers. None of these touch the device.

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

use super::{config_file, load_config};

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config_file(global).display());
        }
        ConfigCommand::Show => {
            let config = load_config(global)?;
            print!("{}", onboard_config::render_config(&config)?);
        }
        ConfigCommand::Profiles => {
            let config = load_config(global)?;
            let default = config.default_profile.as_deref();
            let mut names: Vec<&String> = config.profiles.keys().collect();
            names.sort_unstable();
            for name in names {
                let marker = if Some(name.as_str()) == default { "*" } else { " " };
                println!("{marker} {name} ({})", config.profiles[name].host);
            }
        }
    }
    Ok(())
}
