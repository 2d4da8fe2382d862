use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// `frame_<index>.png` with a zero-padded, 1-based index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameNaming {
    pub digits: usize,
}

impl FrameNaming {
    const PREFIX: &'static str = "frame_";
    const EXTENSION: &'static str = ".png";
    const MIN_DIGITS: usize = 6;

    /// Sized with headroom so a source that yields a few more frames than probed keeps a fixed width.
    pub fn for_count(expected: u64) -> Self {
        let digits = expected.saturating_mul(2).max(1).to_string().len();
        Self { digits: digits.max(Self::MIN_DIGITS) }
    }

    pub fn pattern(&self) -> String {
        format!("{}%0{}d{}", Self::PREFIX, self.digits, Self::EXTENSION)
    }

    pub fn file_name(&self, index: u64) -> String {
        format!("{}{:0width$}{}", Self::PREFIX, index, Self::EXTENSION, width = self.digits)
    }

    pub fn parse_index(&self, file_name: &str) -> Option<u64> {
        let digits = file_name.strip_prefix(Self::PREFIX)?.strip_suffix(Self::EXTENSION)?;
        if digits.len() < self.digits || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }
}

#[derive(Clone, Debug)]
pub struct FrameSet {
    dir: PathBuf,
    naming: FrameNaming,
    indices: Vec<u64>,
}

impl FrameSet {
    pub fn scan(dir: &Path, naming: FrameNaming) -> io::Result<Self> {
        let mut indices = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let index = entry.file_name().to_str().and_then(|name| naming.parse_index(name));
            if let Some(index) = index {
                if entry.file_type()?.is_file() {
                    indices.push(index);
                }
            }
        }
        indices.sort_unstable();
        Ok(Self { dir: dir.to_path_buf(), naming, indices })
    }

    /// Cheap count used while an external tool is still writing into `dir`.
    pub fn count_in(dir: &Path, naming: FrameNaming) -> u64 {
        fs::read_dir(dir)
            .map(|entries| {
                entries
                    .filter_map(|entry| entry.ok())
                    .filter(|entry| entry.file_name().to_str().and_then(|n| naming.parse_index(n)).is_some())
                    .count() as u64
            })
            .unwrap_or(0)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn naming(&self) -> FrameNaming {
        self.naming
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn indices(&self) -> &[u64] {
        &self.indices
    }

    pub fn first_index(&self) -> Option<u64> {
        self.indices.first().copied()
    }

    pub fn path(&self, index: u64) -> PathBuf {
        self.dir.join(self.naming.file_name(index))
    }

    pub fn pattern_path(&self) -> PathBuf {
        self.dir.join(self.naming.pattern())
    }

    /// True when both sets hold exactly the same frame numbers.
    pub fn matches(&self, other: &FrameSet) -> bool {
        self.indices == other.indices
    }

    /// Indices in this set without a counterpart in `other`, then those only in `other`.
    pub fn difference(&self, other: &FrameSet) -> (Vec<u64>, Vec<u64>) {
        let missing = self.indices.iter().filter(|i| other.indices.binary_search(i).is_err()).copied().collect();
        let extra = other.indices.iter().filter(|i| self.indices.binary_search(i).is_err()).copied().collect();
        (missing, extra)
    }

    /// Pixel size of the first frame, when it is a readable image.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let first = self.first_index()?;
        match image::image_dimensions(self.path(first)) {
            Ok(dimensions) => Some(dimensions),
            Err(error) => {
                tracing::debug!(%error, dir = %self.dir.display(), "could not read frame dimensions");
                None
            }
        }
    }
}
