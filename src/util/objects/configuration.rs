use crate::util::io::json;
use crate::try_option;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_source_path() -> String { String::from("/backup-source") }
fn default_repository() -> String { String::from("/backup-repo") }
fn default_engine() -> String { String::from("restic") }
fn default_lock_file() -> String { String::from("/run/restic-worker.lock") }
fn default_base_topic() -> String { String::from("restic-worker") }
fn default_threads() -> usize { 1 }
fn default_remove_timeout() -> u64 { 300 }
fn default_port() -> u16 { 1883 }
fn default_qos() -> u8 { 1 }

/// Command line arguments, every value overrides the configuration file
#[derive(Default)]
pub struct Arguments {
    pub config: Option<String>,
    pub log_level: String,
    pub source_path: Option<String>,
    pub repo_dir: Option<String>,
    pub restic_password: Option<String>,
    pub engine: Option<String>,
    pub broker_host: Option<String>,
    pub broker_port: Option<u16>,
    pub broker_user: Option<String>,
    pub broker_password: Option<String>,
    pub base_topic: Option<String>,
    pub threads: Option<usize>,
    pub lock_file: Option<String>
}

/// Content of the optional json configuration file
#[derive(Deserialize, Default)]
pub struct ConfigurationFile {
    source_path: Option<String>,
    repository: Option<String>,
    password: Option<String>,
    engine: Option<String>,
    threads: Option<usize>,
    remove_timeout: Option<u64>,
    lock_file: Option<String>,
    #[serde(default)]
    broker: BrokerFile
}

#[derive(Deserialize, Default)]
struct BrokerFile {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    qos: Option<u8>,
    base_topic: Option<String>,
    client_id: Option<String>
}

pub struct Configuration {
    pub source_path: PathBuf, // Directory containing one subdirectory per backup name
    pub repository: String, // Location of the engine repository
    pub password: String, // Repository password, only handed to the engine via its environment
    pub engine: String, // Engine binary
    pub threads: usize, // Number of tasks handled in parallel (outside the repository guard)
    pub remove_timeout: Duration,
    pub lock_file: PathBuf,
    pub broker: BrokerConfiguration
}

pub struct BrokerConfiguration {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
    pub base_topic: String,
    pub client_id: String
}

impl Configuration {
    pub fn resolve(args: &Arguments) -> Result<Configuration, String> {
        let file = match args.config.as_ref() {
            Some(path) => json::from_file::<ConfigurationFile>(Path::new(path))?,
            None => ConfigurationFile::default()
        };

        return Configuration::merge(args, file);
    }

    fn merge(args: &Arguments, file: ConfigurationFile) -> Result<Configuration, String> {
        let broker = file.broker;

        let source_path = pick("--source-path", &args.source_path, file.source_path)?.unwrap_or_else(default_source_path);
        let repository = pick("--repo-dir", &args.repo_dir, file.repository)?.unwrap_or_else(default_repository);
        let password = try_option!(pick("--restic-password", &args.restic_password, file.password)?,
            "'--restic-password' is required");
        let host = try_option!(pick("--broker-host", &args.broker_host, broker.host)?,
            "'--broker-host' is required");

        let threads = args.threads.or(file.threads).unwrap_or_else(default_threads);
        if threads == 0 {
            let msg = String::from("At least one worker thread is required");
            error!("{}", msg);
            return Err(msg);
        }

        let qos = broker.qos.unwrap_or_else(default_qos);
        if qos > 2 {
            let msg = format!("Invalid MQTT QoS level {}", qos);
            error!("{}", msg);
            return Err(msg);
        }

        return Ok(Configuration {
            source_path: PathBuf::from(source_path),
            repository,
            password,
            engine: pick("--engine", &args.engine, file.engine)?.unwrap_or_else(default_engine),
            threads,
            remove_timeout: Duration::from_secs(file.remove_timeout.unwrap_or_else(default_remove_timeout)),
            lock_file: PathBuf::from(pick("--lock-file", &args.lock_file, file.lock_file)?.unwrap_or_else(default_lock_file)),
            broker: BrokerConfiguration {
                host,
                port: args.broker_port.or(broker.port).unwrap_or_else(default_port),
                user: pick("--broker-user", &args.broker_user, broker.user)?,
                password: args.broker_password.clone().or(broker.password),
                qos,
                base_topic: pick("--base-topic", &args.base_topic, broker.base_topic)?.unwrap_or_else(default_base_topic),
                client_id: broker.client_id.unwrap_or_else(random_client_id)
            }
        });
    }
}

/// Argument wins over file value, a value given explicitly must not be empty
fn pick(name: &str, arg: &Option<String>, file: Option<String>) -> Result<Option<String>, String> {
    let value = arg.clone().or(file);
    if value.as_ref().map_or(false, |value| value.is_empty()) {
        let msg = format!("'{}' must not be empty", name);
        error!("{}", msg);
        return Err(msg);
    }
    Ok(value)
}

fn random_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("restic-worker-{}", suffix)
}
