//! Shared fixtures for engine integration tests.

use std::path::PathBuf;

use strata_engine::{ConversationId, Engine, MessageIndex, Sender};

pub struct Fixture {
    pub engine: Engine,
    pub workspace: PathBuf,
    _dir: tempfile::TempDir,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = dir.path().join("workspace");
        std::fs::create_dir_all(&workspace).expect("create workspace");
        let engine = Engine::open(&dir.path().join("state")).expect("open engine");
        Self {
            engine,
            workspace,
            _dir: dir,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self._dir.path().join("state")
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.workspace.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, content).expect("write workspace file");
    }

    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.workspace.join(relative)).expect("remove workspace file");
    }

    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.workspace.join(relative)).expect("read workspace file")
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.workspace.join(relative).exists()
    }

    /// Append a user message at `timestamp_ms` and record its snapshot.
    pub fn message(&self, id: &ConversationId, content: &str, timestamp_ms: i64) -> MessageIndex {
        let index = self
            .engine
            .append_message(id, Sender::User, content, timestamp_ms)
            .expect("append message");
        self.engine.record_snapshot(id, index).expect("record snapshot");
        index
    }
}

/// The three-message conversation used across rollback/rewind tests:
///
/// - `b.txt` exists before message 1
/// - message 2 writes `a.txt = "v1\n"`
/// - message 3 writes `a.txt = "v2\n"` and deletes `b.txt`
pub fn three_message_conversation(fixture: &Fixture) -> ConversationId {
    let id = fixture
        .engine
        .create_conversation(Some(&fixture.workspace))
        .expect("create conversation");

    fixture.write("b.txt", "keep me\n");
    fixture.message(&id, "first prompt", 1_000);

    fixture.write("a.txt", "v1\n");
    fixture.message(&id, "second prompt", 2_000);

    fixture.write("a.txt", "v2\n");
    fixture.remove("b.txt");
    fixture.message(&id, "third prompt", 3_000);

    id
}

#[allow(dead_code)]
pub fn index(value: u64) -> MessageIndex {
    MessageIndex::new(value)
}
