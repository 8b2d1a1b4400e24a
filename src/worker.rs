use crate::modules::mqtt;
use crate::modules::parser::ResultParsers;
use crate::modules::repository::{RepositoryGuard, RepositoryHandle};
use crate::processing::executor::TaskExecutor;
use crate::processing::init;
use crate::util::objects::configuration::{Arguments, Configuration};
use crate::try_result;

use argparse::{ArgumentParser, Store, StoreOption};
use log::LevelFilter;
use std::sync::Arc;

const DEFAULT_LOG_LEVEL: &str = "debug";

pub fn parse_arguments() -> Arguments {
    let mut args = Arguments {
        log_level: String::from(DEFAULT_LOG_LEVEL),
        ..Arguments::default()
    };

    {
        let mut parser = ArgumentParser::new();
        parser.set_description("Worker executing backup and remove tasks against a single restic repository");
        parser.refer(&mut args.config)
            .add_option(&["-c", "--config"], StoreOption, "Json configuration file, command line options take precedence");
        parser.refer(&mut args.log_level)
            .add_option(&["-l", "--log-level"], Store, "debug, info, warning, error (default: debug)");
        parser.refer(&mut args.source_path)
            .add_option(&["--source-path"], StoreOption, "Backup source path, containing one directory per backup name (default: /backup-source)");
        parser.refer(&mut args.repo_dir)
            .add_option(&["--repo-dir"], StoreOption, "Restic repository of backups (default: /backup-repo)");
        parser.refer(&mut args.restic_password)
            .add_option(&["--restic-password"], StoreOption, "Restic repository password");
        parser.refer(&mut args.engine)
            .add_option(&["--engine"], StoreOption, "Restic binary to call (default: restic)");
        parser.refer(&mut args.broker_host)
            .add_option(&["--broker-host"], StoreOption, "MQTT broker delivering the tasks");
        parser.refer(&mut args.broker_port)
            .add_option(&["--broker-port"], StoreOption, "MQTT broker port (default: 1883)");
        parser.refer(&mut args.broker_user)
            .add_option(&["--broker-user"], StoreOption, "MQTT user");
        parser.refer(&mut args.broker_password)
            .add_option(&["--broker-password"], StoreOption, "MQTT password");
        parser.refer(&mut args.base_topic)
            .add_option(&["--base-topic"], StoreOption, "Base of the task, result and status topics (default: restic-worker)");
        parser.refer(&mut args.threads)
            .add_option(&["--threads"], StoreOption, "Number of tasks accepted in parallel (default: 1)");
        parser.refer(&mut args.lock_file)
            .add_option(&["--lock-file"], StoreOption, "Lock file preventing a second worker on this host (default: /run/restic-worker.lock)");
        parser.parse_args_or_exit();
    }

    return args;
}

pub fn level_filter(name: &str) -> LevelFilter {
    match name.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warning" | "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info
    }
}

/**
  * Bring the repository into a usable state and serve tasks until the process is stopped.
  *
  * Nothing is received from the broker before the repository is ready.
  */
pub fn main(config: Configuration) -> Result<(), String> {
    info!("====Starting Restic Worker====");

    let handle = RepositoryHandle::new(config.engine.as_str(), config.repository.as_str(), config.password.as_str());
    let guard = Arc::new(RepositoryGuard::new(handle));

    try_result!(init::ensure_ready(&guard), "Repository is not usable");

    let parsers = ResultParsers::standard()?;
    let executor = Arc::new(TaskExecutor::new(guard, config.source_path.clone(), config.remove_timeout, parsers));

    return mqtt::serve(&config.broker, config.threads, executor);
}
