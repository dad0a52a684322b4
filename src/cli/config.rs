//! CLI handlers for `devicelink config`.

use crate::config::{AuthPaths, ConfigStore};
use crate::error::AuthError;

use super::ConfigCommands;

pub fn handle_config(paths: &AuthPaths, command: ConfigCommands) -> Result<(), AuthError> {
    let store = ConfigStore::for_paths(paths);
    match command {
        ConfigCommands::Get { key } => match store.get_path(&key)? {
            Some(value) => println!("{value}"),
            None => println!("(unset)"),
        },
        ConfigCommands::Set { key, value } => {
            store.set_path(&key, &value)?;
            println!("{key} = {value}");
        }
        ConfigCommands::Unset { key } => {
            store.unset(key.parse()?)?;
            println!("{key} unset");
        }
    }
    Ok(())
}
