//! Durable copy of the routing collection, rewritten after every mutation so
//! the worker can restart without losing routing documents.

use crate::types::RoutingDocument;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Copy, Debug, Default, serde::Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    None,
    #[default]
    Zstd1,
    Zstd3,
}

impl Compression {
    fn level(self) -> Option<i32> {
        match self {
            Compression::None => None,
            Compression::Zstd1 => Some(1),
            Compression::Zstd3 => Some(3),
        }
    }
}

struct Codec {
    compression: Compression,
}

impl Codec {
    fn write<W: Write, T: Serialize>(&self, mut writer: W, data: &T) -> Result<(), SnapshotError> {
        match self.compression.level() {
            None => {
                serde_json::to_writer(&mut writer, data)?;
                writer.flush()?;
            }
            Some(level) => {
                let mut encoder = zstd::stream::write::Encoder::new(writer, level)?;
                serde_json::to_writer(&mut encoder, data)?;
                encoder.finish()?.flush()?;
            }
        }
        Ok(())
    }

    fn read<R: Read, T: DeserializeOwned>(&self, reader: R) -> Result<T, SnapshotError> {
        match self.compression.level() {
            None => Ok(serde_json::from_reader(reader)?),
            Some(_) => {
                let decoder = zstd::stream::read::Decoder::new(reader)?;
                Ok(serde_json::from_reader(decoder)?)
            }
        }
    }
}

pub struct SnapshotFile {
    path: PathBuf,
    codec: Codec,
}

impl SnapshotFile {
    pub fn new(base_dir: &str, filename: &str, compression: Compression) -> Self {
        SnapshotFile {
            path: Path::new(base_dir).join(filename),
            codec: Codec { compression },
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty collection.
    pub fn load(&self) -> Result<Vec<RoutingDocument>, SnapshotError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        self.codec.read(BufReader::new(file))
    }

    /// Replaces the snapshot atomically: readers see either the previous or
    /// the new file, never a partial write.
    pub fn store<'a, I>(&self, documents: I) -> Result<(), SnapshotError>
    where
        I: IntoIterator<Item = &'a RoutingDocument>,
    {
        let documents: Vec<&RoutingDocument> = documents.into_iter().collect();
        let dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        self.codec
            .write(BufWriter::new(tmp.as_file_mut()), &documents)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|err| err.error)?;

        tracing::debug!(
            path = %self.path.display(),
            documents = documents.len(),
            "stored routing snapshot"
        );
        Ok(())
    }
}
