use crate::{ReplayError, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use weir_common::types::{Batch, Point};

/// First line of every artifact file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactHeader {
    pub id: String,
    /// stream | batch | query
    pub rec_type: String,
    #[serde(default)]
    pub task: String,
}

/// One captured data element. `offset_us` is the arrival delay since the
/// previous frame; replays with the `real` clock sleep it out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactFrame {
    pub offset_us: u64,
    /// Target query node for batch frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point: Option<Point>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<Batch>,
}

/// Appends frames to a new artifact file, one JSON document per line.
pub struct ArtifactWriter {
    path: PathBuf,
    out: BufWriter<std::fs::File>,
}

impl ArtifactWriter {
    pub fn create(path: &Path, header: &ArtifactHeader) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, header).map_err(io_err)?;
        out.write_all(b"\n")?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
        })
    }

    pub fn write_frame(&mut self, frame: &ArtifactFrame) -> Result<()> {
        serde_json::to_writer(&mut self.out, frame).map_err(io_err)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }

    /// Flushes and returns the artifact size in bytes.
    pub fn finish(mut self) -> Result<i64> {
        self.out.flush()?;
        let size = std::fs::metadata(&self.path)?.len();
        Ok(size as i64)
    }
}

/// Reads an artifact back, validating the header first.
pub struct ArtifactReader {
    header: ArtifactHeader,
    lines: std::io::Lines<BufReader<std::fs::File>>,
}

impl ArtifactReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let mut lines = BufReader::new(file).lines();
        let header_line = lines
            .next()
            .ok_or_else(|| ReplayError::Corrupt("missing header".to_string()))??;
        let header: ArtifactHeader = serde_json::from_str(&header_line)
            .map_err(|e| ReplayError::Corrupt(format!("bad header: {e}")))?;
        Ok(Self { header, lines })
    }

    pub fn header(&self) -> &ArtifactHeader {
        &self.header
    }

    pub fn next_frame(&mut self) -> Result<Option<ArtifactFrame>> {
        let Some(line) = self.lines.next() else {
            return Ok(None);
        };
        let line = line?;
        if line.trim().is_empty() {
            return Ok(None);
        }
        let frame = serde_json::from_str(&line)
            .map_err(|e| ReplayError::Corrupt(format!("bad frame: {e}")))?;
        Ok(Some(frame))
    }
}

fn io_err(e: serde_json::Error) -> ReplayError {
    ReplayError::Corrupt(e.to_string())
}
