#[macro_use]
extern crate log;

mod error;
mod modules;
mod processing;
mod util;
mod worker;

#[cfg(test)]
mod test_util;

use crate::util::objects::configuration::Configuration;

use env_logger::Builder;
use fs2::FileExt;
use log::LevelFilter;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::process::exit;

fn main() {
    let args = worker::parse_arguments();

    Builder::new()
        .filter_level(worker::level_filter(args.log_level.as_str()))
        .filter_module("rumqttc", LevelFilter::Warn)
        .init();

    let config = match Configuration::resolve(&args) {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {}", err);
            exit(1);
        }
    };

    run(config);
}

fn run(config: Configuration) {
    // Ensure only one worker uses the repository from this host
    let lock_file_result = OpenOptions::new()
        .create(true) // Create file if it does not exist
        .write(true)
        .mode(0o600) // Only sets mode when creating the file...
        .open(&config.lock_file);
    let lock_file = match lock_file_result {
        Ok(file) => file,
        Err(err) => {
            error!("Could not access lock file '{}' ({})", config.lock_file.display(), err);
            exit(1);
        }
    };

    if FileExt::try_lock_exclusive(&lock_file).is_err() {
        error!("Could not acquire file lock '{}', is another worker already running?", config.lock_file.display());
        exit(2);
    }

    let result = worker::main(config);
    if let Err(error) = result.as_ref() {
        error!("Worker stopped: {}", error);
    }

    if FileExt::unlock(&lock_file).is_err() {
        error!("Releasing file lock failed");
        exit(4);
    }

    if result.is_err() {
        exit(3);
    }
}
