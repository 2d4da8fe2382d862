use crate::error::{Error, Result};

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ScaleFactor {
    X2,
    X3,
    X4,
}

impl ScaleFactor {
    pub const ALL: [ScaleFactor; 3] = [ScaleFactor::X2, ScaleFactor::X3, ScaleFactor::X4];

    pub fn factor(self) -> u32 {
        match self {
            ScaleFactor::X2 => 2,
            ScaleFactor::X3 => 3,
            ScaleFactor::X4 => 4,
        }
    }

    pub fn from_factor(factor: u32) -> Option<Self> {
        match factor {
            2 => Some(ScaleFactor::X2),
            3 => Some(ScaleFactor::X3),
            4 => Some(ScaleFactor::X4),
            _ => None,
        }
    }
}

impl fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.factor())
    }
}

impl FromStr for ScaleFactor {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        value.trim_end_matches(['x', 'X'])
            .parse::<u32>()
            .ok()
            .and_then(Self::from_factor)
            .ok_or_else(|| format!("scale must be 2, 3 or 4, got {}", value))
    }
}

/// Real-ESRGAN anime-video model bundled with one weights/parameter pair per scale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Model {
    pub scale: ScaleFactor,
}

impl Model {
    const FAMILY: &'static str = "realesr-animevideov3";

    pub fn for_scale(scale: ScaleFactor) -> Self {
        Self { scale }
    }

    /// Name handed to the engine's `-n` flag; it appends `-x<scale>` itself.
    pub fn engine_name(&self) -> &'static str {
        Self::FAMILY
    }

    pub fn id(&self) -> String {
        format!("{}-x{}", Self::FAMILY, self.scale.factor())
    }

    pub fn files(&self, models_dir: &Path) -> (PathBuf, PathBuf) {
        let id = self.id();
        (models_dir.join(format!("{}.bin", id)), models_dir.join(format!("{}.param", id)))
    }

    pub fn missing_files(&self, models_dir: &Path) -> Vec<PathBuf> {
        let (weights, params) = self.files(models_dir);
        [weights, params].into_iter()
            .filter(|path| !path.is_file())
            .collect()
    }

    pub fn ensure_present(&self, models_dir: &Path) -> Result<()> {
        let missing = self.missing_files(models_dir);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::ModelNotFound { scale: self.scale, missing })
        }
    }
}

impl fmt::Display for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn each_scale_maps_to_a_distinct_model() {
        let ids: Vec<String> = ScaleFactor::ALL.iter().map(|&s| Model::for_scale(s).id()).collect();
        assert_eq!(ids, ["realesr-animevideov3-x2", "realesr-animevideov3-x3", "realesr-animevideov3-x4"]);
    }

    #[test]
    fn parses_scale_with_or_without_suffix() {
        assert_eq!("3".parse::<ScaleFactor>(), Ok(ScaleFactor::X3));
        assert_eq!("4x".parse::<ScaleFactor>(), Ok(ScaleFactor::X4));
        assert!("1".parse::<ScaleFactor>().is_err());
        assert!("8".parse::<ScaleFactor>().is_err());
    }

    #[test]
    fn reports_every_missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let model = Model::for_scale(ScaleFactor::X2);
        let (weights, params) = model.files(dir.path());
        std::fs::write(&weights, b"weights").unwrap();

        match model.ensure_present(dir.path()) {
            Err(Error::ModelNotFound { scale, missing }) => {
                assert_eq!(scale, ScaleFactor::X2);
                assert_eq!(missing, vec![params.clone()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        std::fs::write(&params, b"params").unwrap();
        assert!(model.ensure_present(dir.path()).is_ok());
    }
}
