//! Frame source that plays back still images from a directory.
//!
//! Useful for running sessions without a camera: every image file in the
//! directory is one frame, in file-name order.

use image::DynamicImage;
use presence_core::{is_image_path, FrameSource, SourceError};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;

pub struct ReplaySource {
    dir: PathBuf,
    interval: Duration,
    pending: VecDeque<PathBuf>,
    open: bool,
}

impl ReplaySource {
    pub fn new(dir: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            dir: dir.into(),
            interval,
            pending: VecDeque::new(),
            open: false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl FrameSource for ReplaySource {
    fn acquire(&mut self) -> Result<(), SourceError> {
        let read_dir = std::fs::read_dir(&self.dir)
            .map_err(|e| SourceError::Unavailable(format!("{}: {e}", self.dir.display())))?;

        let mut frames: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_path(p))
            .collect();
        frames.sort();

        tracing::info!(dir = %self.dir.display(), frames = frames.len(), "replay source opened");
        self.pending = frames.into();
        self.open = true;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<DynamicImage, SourceError> {
        if !self.open {
            return Err(SourceError::Unavailable("replay source not acquired".into()));
        }
        let path = self.pending.pop_front().ok_or(SourceError::Exhausted)?;
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        image::open(&path).map_err(|e| SourceError::CaptureFailed(format!("{}: {e}", path.display())))
    }

    fn release(&mut self) {
        if self.open {
            tracing::debug!(dir = %self.dir.display(), "replay source closed");
        }
        self.pending.clear();
        self.open = false;
    }
}
