//! Write sinks
//!
//! The write queue's worker hands every message to a [`WriteSink`]. The sink
//! decides where bytes go; the queue only guarantees FIFO delivery on one
//! thread.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use hashbrown::HashMap;

use super::record::write_header;
use super::{WriteMessage, WriteOperation};

/// Destination for queued writes. Runs on the queue's worker thread.
pub trait WriteSink: Send + 'static {
    fn write(&mut self, message: &WriteMessage) -> io::Result<()>;
}

struct OpenReplay {
    path: PathBuf,
    writer: BufWriter<File>,
}

/// One replay file per session tag.
///
/// `Create` opens `<dir>/<timestamp>-<tag>.rsr` and writes the header,
/// `Append` writes record bytes, `Close` writes the final bytes and closes
/// the file. `Abort` closes the file and deletes it.
pub struct ReplayFileSink {
    dir: PathBuf,
    open: HashMap<String, OpenReplay>,
}

impl ReplayFileSink {
    /// Sink writing into `dir`, created if missing.
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            open: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(tag: &str) -> String {
        format!("{}-{}.rsr", Utc::now().format("%Y%m%dT%H%M%S"), tag)
    }

    fn open_for(&mut self, tag: &str) -> io::Result<&mut OpenReplay> {
        self.open.get_mut(tag).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no open replay for {tag}"))
        })
    }
}

impl WriteSink for ReplayFileSink {
    fn write(&mut self, message: &WriteMessage) -> io::Result<()> {
        match message.operation {
            WriteOperation::Create => {
                if let Some(mut previous) = self.open.remove(&message.tag) {
                    tracing::warn!(tag = %message.tag, path = %previous.path.display(), "replay recreated before close");
                    previous.writer.flush()?;
                }
                let path = self.dir.join(Self::file_name(&message.tag));
                let mut writer = BufWriter::new(File::create(&path)?);
                write_header(&mut writer)?;
                writer.write_all(&message.data)?;
                tracing::debug!(tag = %message.tag, path = %path.display(), "replay created");
                self.open.insert(message.tag.clone(), OpenReplay { path, writer });
            }
            WriteOperation::Append => {
                self.open_for(&message.tag)?.writer.write_all(&message.data)?;
            }
            WriteOperation::Close => {
                // Create may have been discarded along with the rest of the session
                let Some(mut replay) = self.open.remove(&message.tag) else {
                    tracing::debug!(tag = %message.tag, "close for replay that was never opened");
                    return Ok(());
                };
                replay.writer.write_all(&message.data)?;
                replay.writer.flush()?;
                tracing::info!(tag = %message.tag, path = %replay.path.display(), "replay saved");
            }
            WriteOperation::Abort => {
                let Some(replay) = self.open.remove(&message.tag) else {
                    tracing::debug!(tag = %message.tag, "abort for replay that was never opened");
                    return Ok(());
                };
                let OpenReplay { path, writer } = replay;
                drop(writer);
                fs::remove_file(&path)?;
                tracing::info!(tag = %message.tag, path = %path.display(), "unfinished replay deleted");
            }
        }
        Ok(())
    }
}

impl Drop for ReplayFileSink {
    fn drop(&mut self) {
        for (tag, mut replay) in self.open.drain() {
            tracing::warn!(%tag, path = %replay.path.display(), "replay left unclosed");
            let _ = replay.writer.flush();
        }
    }
}

/// Collects every message in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    messages: Arc<Mutex<Vec<WriteMessage>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages written so far, in order.
    pub fn messages(&self) -> Vec<WriteMessage> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl WriteSink for MemorySink {
    fn write(&mut self, message: &WriteMessage) -> io::Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.clone());
        Ok(())
    }
}
