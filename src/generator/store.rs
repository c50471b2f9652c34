use std::path::{Path, PathBuf};

/// Writes realized segments into the output directory.
#[derive(Debug, Clone)]
pub struct SegmentStore {
    output_dir: PathBuf,
}

impl SegmentStore {
    /// Create the store, making sure the output directory exists.
    pub fn open(output_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;
        Ok(Self { output_dir })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Deterministic file name for a sequence number.
    pub fn path_for(&self, sequence_number: u64) -> PathBuf {
        self.output_dir.join(format!("segment_{:04}.wav", sequence_number))
    }

    /// Persist `audio` for `sequence_number` and return the final path.
    ///
    /// The bytes land in a `.part` file first and are renamed into place, so
    /// the returned path never names a partially written file.
    pub async fn persist(&self, sequence_number: u64, audio: &[u8]) -> std::io::Result<PathBuf> {
        let path = self.path_for(sequence_number);
        let partial = path.with_extension("wav.part");

        if let Err(e) = tokio::fs::write(&partial, audio).await {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }
        tokio::fs::rename(&partial, &path).await?;

        Ok(path)
    }
}
