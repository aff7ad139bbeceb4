//! # Stored task definitions
//!
//! A task is a named, ordered list of raw G-code lines which the exec can
//! replay against the arm. Tasks live in a JSON file on the exec's host.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A replayable list of G-code lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier used to select the task, unique within the store
    pub id: String,

    /// Short human readable name
    pub name: String,

    /// Longer description of what the task does
    #[serde(default)]
    pub description: String,

    /// The raw G-code lines, replayed in order
    pub gcode: Vec<String>,
}

/// On-disk shape of the task store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskFile {
    pub tasks: Vec<Task>,
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_store_format() {
        let json = r#"{
            "tasks": [
                {
                    "id": "square",
                    "name": "Square sweep",
                    "description": "Trace a square at safe height",
                    "gcode": [
                        "G1 X40.000 Y40.000 Z60.000 F1500.0",
                        "G1 X-40.000 Y40.000 Z60.000 F1500.0"
                    ]
                }
            ]
        }"#;

        let file: TaskFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.tasks.len(), 1);
        assert_eq!(file.tasks[0].id, "square");
        assert_eq!(file.tasks[0].gcode.len(), 2);
    }

    #[test]
    fn test_description_is_optional() {
        let json = r#"{"tasks": [{"id": "t", "name": "T", "gcode": ["G28"]}]}"#;

        let file: TaskFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.tasks[0].description, "");
    }
}
