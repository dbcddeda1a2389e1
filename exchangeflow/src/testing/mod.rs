//! Test doubles: mock nodes, scripted collaborators and an in-memory
//! environment wiring every collaborator.

mod environment;
mod fakes;
mod mocks;

pub use environment::{CapturedLogs, InMemoryEnvironment};
pub use fakes::{FileStoreCall, RecordingFileStore, ScriptedCatalog};
pub use mocks::{
    CancellingNode, FailingNode, PanickingNode, RecordingNode, SkippedNode, SucceedingNode,
};
