//! JSON loading of profiles and patches, and report writing.

use crate::error::{DetectorError, Result};
use crate::patch::{ElevationPatch, PatchDescriptor};
use crate::profile::DetectorProfile;
use serde::Serialize;
use std::fs;
use std::path::Path;

fn read_to_string(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|source| DetectorError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate a detector profile.
pub fn load_profile(path: &Path) -> Result<DetectorProfile> {
    let contents = read_to_string(path)?;
    let profile: DetectorProfile =
        serde_json::from_str(&contents).map_err(|source| DetectorError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    profile.validate()?;
    Ok(profile)
}

/// Load a patch from its JSON descriptor.
pub fn load_patch(path: &Path) -> Result<ElevationPatch> {
    let contents = read_to_string(path)?;
    let descriptor: PatchDescriptor =
        serde_json::from_str(&contents).map_err(|source| DetectorError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    ElevationPatch::try_from(descriptor)
}

/// Pretty-print `value` as JSON, creating parent directories as needed.
pub fn write_json_file<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let io_err = |source: std::io::Error| DetectorError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let json = serde_json::to_string_pretty(value).map_err(|source| DetectorError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoPoint;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("structure-detector-io-{}", std::process::id()))
            .join(name)
    }

    #[test]
    fn profile_round_trips_through_disk() {
        let path = scratch("profile.json");
        write_json_file(&path, &DetectorProfile::windmill()).unwrap();
        let loaded = load_profile(&path).unwrap();
        assert_eq!(loaded, DetectorProfile::windmill());
    }

    #[test]
    fn patch_loads_from_descriptor() {
        let patch = ElevationPatch::new(6, 4, 0.5, vec![1.0; 24], GeoPoint::new(51.0, 5.0)).unwrap();
        let path = scratch("patch.json");
        write_json_file(&path, &PatchDescriptor::from(&patch)).unwrap();
        let loaded = load_patch(&path).unwrap();
        assert_eq!((loaded.w, loaded.h), (6, 4));
        assert_eq!(loaded.center, patch.center);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_profile(Path::new("/nonexistent/profile.json")).unwrap_err();
        assert!(matches!(err, DetectorError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/profile.json"));
    }
}
