//! # Task manager
//!
//! Named G-code sequences persisted in a JSON store, plus the replay glue
//! that feeds a task's lines through the controller one at a time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;

// Internal
use crate::robot::{RobotController, RobotError};
use crate::serial::SerialLink;
use comms_if::tasks::{Task, TaskFile};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Pause between replayed lines, the board needs a moment between
/// buffered commands.
const REPLAY_PAUSE: Duration = Duration::from_millis(100);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Store of named tasks backed by a JSON file.
pub struct TaskManager {
    file_path: PathBuf,
    tasks: Vec<Task>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Errors raised by the task store and replay.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Could not read the task store: {0}")]
    FileReadError(std::io::Error),

    #[error("Could not write the task store: {0}")]
    FileWriteError(std::io::Error),

    #[error("Could not parse the task store: {0}")]
    ParseError(serde_json::Error),

    #[error("No task with id {0:?}")]
    UnknownTask(String),

    #[error("A task with id {0:?} already exists")]
    DuplicateTask(String),

    #[error("Task {0:?} failed at line {1}: {2}")]
    ReplayFailed(String, usize, RobotError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TaskManager {
    /// Load the store at the given path.
    ///
    /// A missing file is an empty store, the file appears when the first
    /// task is added.
    pub fn load<P: AsRef<Path>>(file_path: P) -> Result<Self, TaskError> {
        let file_path = file_path.as_ref().to_path_buf();

        let tasks = if file_path.exists() {
            read_store(&file_path)?
        } else {
            debug!("No task store at {:?}, starting empty", file_path);
            Vec::new()
        };

        info!("{} task(s) available", tasks.len());

        Ok(Self { file_path, tasks })
    }

    /// All tasks currently in the store.
    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    /// Look a task up by id.
    pub fn get(&self, id: &str) -> Result<&Task, TaskError> {
        self.tasks
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskError::UnknownTask(id.to_string()))
    }

    /// Add a task and persist the store.
    ///
    /// The file is re-read first so tasks added by another process are
    /// not lost on save.
    pub fn add(&mut self, task: Task) -> Result<(), TaskError> {
        if self.file_path.exists() {
            self.tasks = read_store(&self.file_path)?;
        }

        if self.tasks.iter().any(|t| t.id == task.id) {
            return Err(TaskError::DuplicateTask(task.id));
        }

        info!("Adding task {:?} with {} line(s)", task.id, task.gcode.len());

        self.tasks.push(task);
        self.save()
    }

    fn save(&self) -> Result<(), TaskError> {
        let file = TaskFile {
            tasks: self.tasks.clone(),
        };

        let json = serde_json::to_string_pretty(&file).map_err(TaskError::ParseError)?;

        fs::write(&self.file_path, json).map_err(TaskError::FileWriteError)
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Replay a task's G-code lines through the controller.
///
/// Lines are sent in order with a short pause between them. The first
/// failing line aborts the replay and no later lines are sent.
pub fn run_task<L: SerialLink>(
    controller: &mut RobotController<L>,
    task: &Task,
) -> Result<(), TaskError> {
    info!("Running task {:?} with {} line(s)", task.id, task.gcode.len());

    for (index, line) in task.gcode.iter().enumerate() {
        if let Err(e) = controller.send_raw(line) {
            return Err(TaskError::ReplayFailed(task.id.clone(), index + 1, e));
        }

        thread::sleep(REPLAY_PAUSE);
    }

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn read_store(path: &Path) -> Result<Vec<Task>, TaskError> {
    let json = fs::read_to_string(path).map_err(TaskError::FileReadError)?;
    let file: TaskFile = serde_json::from_str(&json).map_err(TaskError::ParseError)?;

    Ok(file.tasks)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::robot::RobotConfig;
    use crate::serial::LinkError;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    fn temp_store_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("arm_tasks_{}_{}.json", name, std::process::id()));
        path
    }

    fn square_task() -> Task {
        Task {
            id: "square".into(),
            name: "Square sweep".into(),
            description: "Trace a square at safe height".into(),
            gcode: vec![
                "G1 X40.000 Y40.000 Z60.000 F1500.0".into(),
                "G1 X-40.000 Y40.000 Z60.000 F1500.0".into(),
                "G28".into(),
            ],
        }
    }

    /// Scripted link for replay tests. Writes land in a shared log so the
    /// test can inspect them while the controller owns the link.
    struct ScriptedLink {
        chunks: VecDeque<Vec<u8>>,
        written: Rc<RefCell<Vec<String>>>,
    }

    impl ScriptedLink {
        fn new(responses: &[&str], written: Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                chunks: responses.iter().map(|r| r.as_bytes().to_vec()).collect(),
                written,
            }
        }
    }

    impl SerialLink for ScriptedLink {
        fn open(&mut self, _device: &str, _baud: u32) -> Result<(), LinkError> {
            Ok(())
        }
        fn is_open(&self) -> bool {
            true
        }
        fn write(&mut self, data: &[u8]) -> Result<(), LinkError> {
            self.written
                .borrow_mut()
                .push(String::from_utf8_lossy(data).to_string());
            Ok(())
        }
        fn read(&mut self, _window: Duration) -> Result<Vec<u8>, LinkError> {
            Ok(self.chunks.pop_front().unwrap_or_default())
        }
        fn flush_input(&mut self) -> Result<(), LinkError> {
            Ok(())
        }
        fn close(&mut self) {}
    }

    fn powered_controller(
        responses: &[&str],
    ) -> (RobotController<ScriptedLink>, Rc<RefCell<Vec<String>>>) {
        let config = RobotConfig {
            ctrl_timeout: Duration::from_millis(50),
            move_timeout: Duration::from_millis(50),
            settle_delay: Duration::from_millis(0),
        };

        let mut all = vec!["INFO: MOTORS ENABLED\r\nOK\r\n"];
        all.extend_from_slice(responses);

        let written = Rc::new(RefCell::new(Vec::new()));

        let mut ctrl = RobotController::new(ScriptedLink::new(&all, written.clone()), config);
        ctrl.connect("/dev/ttyUSB0", 115200).unwrap();
        ctrl.enable_motors().unwrap();

        (ctrl, written)
    }

    #[test]
    fn test_store_lifecycle() {
        let path = temp_store_path("lifecycle");
        let _ = fs::remove_file(&path);

        let mut mgr = TaskManager::load(&path).unwrap();
        assert!(mgr.list().is_empty());

        mgr.add(square_task()).unwrap();
        assert_eq!(mgr.get("square").unwrap().gcode.len(), 3);

        // A second manager sees the persisted task
        let reloaded = TaskManager::load(&path).unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.get("square").unwrap().name, "Square sweep");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_duplicate_task_rejected() {
        let path = temp_store_path("duplicate");
        let _ = fs::remove_file(&path);

        let mut mgr = TaskManager::load(&path).unwrap();
        mgr.add(square_task()).unwrap();

        assert!(matches!(
            mgr.add(square_task()),
            Err(TaskError::DuplicateTask(_))
        ));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_unknown_task() {
        let path = temp_store_path("unknown");
        let _ = fs::remove_file(&path);

        let mgr = TaskManager::load(&path).unwrap();
        assert!(matches!(mgr.get("nope"), Err(TaskError::UnknownTask(_))));
    }

    #[test]
    fn test_replay_sends_every_line() {
        let (mut ctrl, written) = powered_controller(&["OK\r\n", "OK\r\n", "OK\r\n"]);

        run_task(&mut ctrl, &square_task()).unwrap();

        // Motor enable plus the three task lines
        let written = written.borrow();
        assert_eq!(written.len(), 4);
        assert_eq!(written[1], "G1 X40.000 Y40.000 Z60.000 F1500.0\r\n");
        assert_eq!(written[3], "G28\r\n");
    }

    #[test]
    fn test_replay_aborts_on_first_error() {
        let (mut ctrl, written) = powered_controller(&["OK\r\n", "ERROR: halted\r\nOK\r\n"]);

        match run_task(&mut ctrl, &square_task()) {
            Err(TaskError::ReplayFailed(id, line, RobotError::Device(message))) => {
                assert_eq!(id, "square");
                assert_eq!(line, 2);
                assert_eq!(message, "halted");
            }
            other => panic!("expected a replay failure, got {:?}", other),
        }

        // The third line never reached the wire
        assert_eq!(written.borrow().len(), 3);
    }
}
