use crate::error::TaskError;
use crate::processing::executor::TaskExecutor;
use crate::util::objects::configuration::BrokerConfiguration;
use crate::util::objects::task::{Task, TaskResult};
use crate::{log_error, try_result};

use crossbeam_channel::{unbounded, Receiver, Sender};
use rumqttc::{Client, Event, LastWill, MqttOptions, Packet, QoS};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const REQUEST_CAPACITY: usize = 16;

/// Topics below the configured base topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub tasks: String, // subscription filter, one level per task type
    pub results: String,
    pub status: String
}

impl Topics {
    pub fn new(base_topic: &str) -> Topics {
        let base = base_topic.trim_end_matches('/');
        Topics {
            tasks: format!("{}/task/+", base),
            results: format!("{}/result", base),
            status: format!("{}/status", base)
        }
    }

    /// Task type of a message published on a task topic
    pub fn task_type<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let prefix = self.tasks.trim_end_matches('+');
        topic.strip_prefix(prefix).filter(|task_type| !task_type.is_empty() && !task_type.contains('/'))
    }
}

/// Handed from the event loop to the worker threads
#[derive(Debug)]
enum Work {
    Execute(Task),
    Report(TaskResult)
}

#[derive(Debug)]
enum Decoded {
    Task(Task),
    Rejected(String, TaskError),
    Unusable(String)
}

/**
  * Receive tasks from the broker and publish their results, forever.
  *
  * The connection is (re-)established by iterating the event loop; every
  * connection acknowledgement renews the subscription and the ready status.
  * Tasks are handed to `threads` worker threads, which may run concurrently
  * up to the repository guard. Results are only published from the workers,
  * the event loop itself never waits for room in the request queue.
  */
pub fn serve(config: &BrokerConfiguration, threads: usize, executor: Arc<TaskExecutor>) -> Result<(), String> {
    let topics = Topics::new(config.base_topic.as_str());
    let qos = to_qos(config.qos);
    let (mut client, mut connection) = Client::new(get_options(config, &topics, qos), REQUEST_CAPACITY);

    let sender = start_workers(threads, executor, &client, topics.results.as_str(), qos)?;

    info!("Connecting to broker {}:{} as '{}'", config.host.as_str(), config.port, config.client_id.as_str());
    for notification in connection.iter() {
        match notification {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("Connected to broker, waiting for tasks on '{}'", topics.tasks.as_str());
                log_error!(client.try_subscribe(topics.tasks.as_str(), qos));
                log_error!(client.try_publish(topics.status.as_str(), qos, true, "ready"));
            },
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                trace!("Received message on '{}'", publish.topic.as_str());
                match decode_task(&topics, publish.topic.as_str(), &publish.payload) {
                    Decoded::Task(task) => submit(&sender, Work::Execute(task))?,
                    Decoded::Rejected(task_id, err) => {
                        warn!("Rejecting task {}: {}", task_id.as_str(), err);
                        submit(&sender, Work::Report(TaskResult::failed(&task_id, &err)))?;
                    },
                    Decoded::Unusable(reason) => {
                        warn!("Dropping message on '{}': {}", publish.topic.as_str(), reason);
                    }
                }
            },
            Ok(_) => {},
            Err(err) => {
                error!("Connection to broker failed, retrying in {} seconds ({})", RECONNECT_DELAY.as_secs(), err);
                thread::sleep(RECONNECT_DELAY);
            }
        }
    }

    return Ok(());
}

/// Only the workers keep a receiver, so sending fails once all of them stopped
fn start_workers(threads: usize, executor: Arc<TaskExecutor>, client: &Client, results_topic: &str, qos: QoS) -> Result<Sender<Work>, String> {
    let (sender, receiver) = unbounded::<Work>();
    for index in 0..threads {
        let receiver = receiver.clone();
        let client = client.clone();
        let executor = executor.clone();
        let results_topic = results_topic.to_string();
        try_result!(thread::Builder::new()
            .name(format!("task-worker-{}", index))
            .spawn(move || work(receiver, executor, client, results_topic, qos)),
            "Could not start task worker thread");
    }

    return Ok(sender);
}

fn submit(sender: &Sender<Work>, work: Work) -> Result<(), String> {
    if sender.send(work).is_err() {
        let msg = String::from("All task worker threads have stopped");
        error!("{}", msg);
        return Err(msg);
    }
    Ok(())
}

fn work(receiver: Receiver<Work>, executor: Arc<TaskExecutor>, mut client: Client, results_topic: String, qos: QoS) {
    for work in receiver.iter() {
        let result = match work {
            Work::Execute(task) => executor.execute(&task),
            Work::Report(result) => result
        };
        publish_result(&mut client, results_topic.as_str(), qos, &result);
    }
}

fn publish_result(client: &mut Client, topic: &str, qos: QoS, result: &TaskResult) {
    match serde_json::to_vec(result) {
        Ok(payload) => {
            trace!("Reporting result of task {} on '{}'", result.task_id.as_str(), topic);
            if let Err(err) = client.publish(topic, qos, false, payload) {
                error!("Could not publish result of task {} ({})", result.task_id.as_str(), err);
            }
        },
        Err(err) => error!("Could not serialize result of task {} ({})", result.task_id.as_str(), err)
    }
}

fn decode_task(topics: &Topics, topic: &str, payload: &[u8]) -> Decoded {
    let task_type = match topics.task_type(topic) {
        Some(task_type) => task_type,
        None => return Decoded::Unusable(String::from("not a task topic"))
    };

    let value: Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(err) => return Decoded::Unusable(format!("payload is not json ({})", err))
    };

    let task_id = match value.get("taskId").and_then(Value::as_str) {
        Some(task_id) if !task_id.is_empty() => task_id.to_string(),
        _ => return Decoded::Unusable(String::from("payload has no taskId"))
    };

    let input_data = match value.get("inputData") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(input)) => input.clone(),
        Some(_) => return Decoded::Rejected(task_id, TaskError::InvalidField {
            field: "inputData",
            reason: String::from("expected an object")
        })
    };

    return Decoded::Task(Task { task_id, task_type: task_type.to_string(), input_data });
}

fn get_options(config: &BrokerConfiguration, topics: &Topics, qos: QoS) -> MqttOptions {
    let mut options = MqttOptions::new(config.client_id.as_str(), config.host.as_str(), config.port);
    options.set_keep_alive(KEEP_ALIVE);
    options.set_clean_session(true);

    if let Some(user) = config.user.as_ref() {
        let password = config.password.clone().unwrap_or_default();
        options.set_credentials(user.as_str(), password);
    }

    // Set last will in case of whatever failure that includes an interrupted connection
    options.set_last_will(LastWill::new(topics.status.as_str(), "offline", qos, true));

    trace!("Base topics are '{}', '{}' and '{}'", topics.tasks.as_str(), topics.results.as_str(), topics.status.as_str());
    options
}

fn to_qos(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::parser::ResultParsers;
    use crate::modules::repository::RepositoryGuard;
    use crate::test_util::FakeEngine;
    use serde_json::json;

    fn executor(engine: &FakeEngine) -> Arc<TaskExecutor> {
        let guard = Arc::new(RepositoryGuard::new(engine.handle()));
        Arc::new(TaskExecutor::new(guard, engine.source_root(), Duration::from_secs(10), ResultParsers::standard().unwrap()))
    }

    #[test]
    fn topics_below_base() {
        let topics = Topics::new("backups/worker-1/");
        assert_eq!(topics.tasks, "backups/worker-1/task/+");
        assert_eq!(topics.results, "backups/worker-1/result");
        assert_eq!(topics.status, "backups/worker-1/status");
    }

    #[test]
    fn task_type_from_topic() {
        let topics = Topics::new("restic-worker");
        assert_eq!(topics.task_type("restic-worker/task/backup"), Some("backup"));
        assert_eq!(topics.task_type("restic-worker/task/remove"), Some("remove"));
        assert_eq!(topics.task_type("restic-worker/task/"), None);
        assert_eq!(topics.task_type("restic-worker/result"), None);
        assert_eq!(topics.task_type("other/task/backup"), None);
    }

    #[test]
    fn decodes_task() {
        let topics = Topics::new("restic-worker");
        let payload = json!({"taskId": "t1", "inputData": {"backupName": "db1", "timeoutSeconds": 120}}).to_string();

        match decode_task(&topics, "restic-worker/task/backup", payload.as_bytes()) {
            Decoded::Task(task) => {
                assert_eq!(task.task_id, "t1");
                assert_eq!(task.task_type, "backup");
                assert_eq!(task.input_data["backupName"], "db1");
            },
            other => panic!("unexpected decoding: {:?}", other)
        }
    }

    #[test]
    fn missing_input_is_empty() {
        let topics = Topics::new("restic-worker");
        let payload = json!({"taskId": "t1"}).to_string();

        match decode_task(&topics, "restic-worker/task/remove", payload.as_bytes()) {
            Decoded::Task(task) => assert!(task.input_data.is_empty()),
            other => panic!("unexpected decoding: {:?}", other)
        }
    }

    #[test]
    fn malformed_input_with_id_is_rejected() {
        let topics = Topics::new("restic-worker");
        let payload = json!({"taskId": "t1", "inputData": "db1"}).to_string();

        match decode_task(&topics, "restic-worker/task/backup", payload.as_bytes()) {
            Decoded::Rejected(task_id, TaskError::InvalidField { field, .. }) => {
                assert_eq!(task_id, "t1");
                assert_eq!(field, "inputData");
            },
            other => panic!("unexpected decoding: {:?}", other)
        }
    }

    #[test]
    fn unusable_messages() {
        let topics = Topics::new("restic-worker");
        assert!(matches!(decode_task(&topics, "restic-worker/task/backup", b"{not json"), Decoded::Unusable(_)));
        assert!(matches!(decode_task(&topics, "restic-worker/task/backup", b"{\"inputData\": {}}"), Decoded::Unusable(_)));
        assert!(matches!(decode_task(&topics, "restic-worker/status", b"{\"taskId\": \"t1\"}"), Decoded::Unusable(_)));
    }

    #[test]
    fn stopped_workers_fail_submission() {
        let engine = FakeEngine::new("true");
        let (client, _connection) = Client::new(MqttOptions::new("restic-worker-test", "localhost", 1883), 1);

        let sender = start_workers(0, executor(&engine), &client, "restic-worker/result", QoS::AtLeastOnce).unwrap();
        let task = Task { task_id: String::from("t1"), task_type: String::from("backup"), input_data: Map::new() };

        assert!(submit(&sender, Work::Execute(task)).is_err());
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn qos_levels() {
        assert_eq!(to_qos(0), QoS::AtMostOnce);
        assert_eq!(to_qos(1), QoS::AtLeastOnce);
        assert_eq!(to_qos(2), QoS::ExactlyOnce);
    }
}
