//! The message-file inbox.
//!
//! Other transports (Bluetooth names, Wi-Fi Direct service strings) drop
//! whole frames into the working directory as `*.lbard-message` files. We
//! present each file's contents as if it had arrived over the radio. Files
//! are never deleted here; cleanup belongs to whoever drops them in.

use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use tracing::debug;

/// File name suffix marking an inbox message.
pub const SUFFIX: &str = ".lbard-message";

/// Tracks which inbox files have already been presented, so each message is
/// drained once. A file is presented again only if it changes on disk.
#[derive(Debug, Default)]
pub struct Inbox {
    seen: HashMap<PathBuf, (SystemTime, u64)>,
}

impl Inbox {
    /// Scans `dir` and returns the contents of message files not presented
    /// yet.
    pub fn drain(&mut self, dir: &Path) -> io::Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.len() > SUFFIX.len() && n.ends_with(SUFFIX))
            {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let stamp = (
                meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                meta.len(),
            );
            if self.seen.get(&path) == Some(&stamp) {
                continue;
            }
            match fs::read(&path) {
                Ok(bytes) => {
                    debug!(path = %path.display(), len = bytes.len(), "inbox message");
                    self.seen.insert(path, stamp);
                    frames.push(bytes);
                }
                Err(err) => debug!(path = %path.display(), %err, "skipping unreadable inbox file"),
            }
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_each_message_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.lbard-message"), b"frame-a").unwrap();
        fs::write(dir.path().join("not-a-message.txt"), b"junk").unwrap();

        let mut inbox = Inbox::default();
        let frames = inbox.drain(dir.path()).unwrap();
        assert_eq!(vec![b"frame-a".to_vec()], frames);

        // a second scan has nothing new
        assert!(inbox.drain(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn changed_file_is_presented_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.lbard-message");
        fs::write(&path, b"one").unwrap();

        let mut inbox = Inbox::default();
        assert_eq!(1, inbox.drain(dir.path()).unwrap().len());

        fs::write(&path, b"longer-frame").unwrap();
        assert_eq!(
            vec![b"longer-frame".to_vec()],
            inbox.drain(dir.path()).unwrap()
        );
    }

    #[test]
    fn files_are_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keep.lbard-message");
        fs::write(&path, b"frame").unwrap();

        let mut inbox = Inbox::default();
        inbox.drain(dir.path()).unwrap();
        assert!(path.exists());
    }
}
