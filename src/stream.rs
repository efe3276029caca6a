//! Stream boundary between the compiler and whatever hosts it.
//!
//! The compiler never opens files itself. It asks a [`StreamProvider`] for a
//! reader or writer by url and quietly gives up when none is handed out.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    Read,
    Write,
}

pub enum Stream {
    Read(Box<dyn Read>),
    Write(Box<dyn Write>),
}

pub trait StreamProvider {
    /// `None` means the url cannot be served in `mode`.
    fn request_stream(&mut self, url: &str, mode: StreamMode) -> Option<Stream>;
}

/// Serves urls as paths on the local file system, optionally below a root.
#[derive(Debug, Clone, Default)]
pub struct FileStreams {
    root: Option<PathBuf>,
}

impl FileStreams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, url: &str) -> PathBuf {
        match &self.root {
            Some(root) if Path::new(url).is_relative() => root.join(url),
            _ => PathBuf::from(url),
        }
    }
}

impl StreamProvider for FileStreams {
    fn request_stream(&mut self, url: &str, mode: StreamMode) -> Option<Stream> {
        let path = self.resolve(url);
        match mode {
            StreamMode::Read => {
                let file = File::open(path).ok()?;
                Some(Stream::Read(Box::new(BufReader::new(file))))
            }
            StreamMode::Write => {
                let file = File::create(path).ok()?;
                Some(Stream::Write(Box::new(BufWriter::new(file))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("kindle-stream-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_write_then_read() {
        let dir = scratch("roundtrip");
        let mut streams = FileStreams::rooted(&dir);

        match streams.request_stream("out.bin", StreamMode::Write) {
            Some(Stream::Write(mut w)) => {
                w.write_all(b"kindle").unwrap();
                w.flush().unwrap();
            }
            _ => panic!("expected a writer"),
        }

        let mut text = String::new();
        match streams.request_stream("out.bin", StreamMode::Read) {
            Some(Stream::Read(mut r)) => {
                r.read_to_string(&mut text).unwrap();
            }
            _ => panic!("expected a reader"),
        }
        assert_eq!(text, "kindle");
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_missing_file_has_no_stream() {
        let dir = scratch("missing");
        let mut streams = FileStreams::rooted(&dir);
        assert!(streams.request_stream("nope.ks", StreamMode::Read).is_none());
        assert!(
            streams
                .request_stream("no/such/dir/out.bin", StreamMode::Write)
                .is_none()
        );
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_absolute_urls_ignore_root() {
        let streams = FileStreams::rooted("/somewhere");
        let absolute = std::env::temp_dir().join("x.ks");
        let url = absolute.to_string_lossy().into_owned();
        assert_eq!(streams.resolve(&url), absolute);
        assert_eq!(streams.resolve("x.ks"), PathBuf::from("/somewhere/x.ks"));
    }
}
