//! Turning a raw output into its validated cloud-optimized counterpart.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{CodecError, CogCodec};
use crate::naming::OutputPaths;

/// Failure to finalize a unit.
#[derive(Debug, Error)]
pub enum FinalizeError {
    /// The codec could not produce the optimized file.
    #[error("creating {path}: {source}")]
    Create {
        /// Optimized path.
        path: PathBuf,
        /// Codec error.
        #[source]
        source: CodecError,
    },

    /// The validator could not run. The unvalidated optimized file was removed.
    #[error("validating {path}: {source}")]
    Validate {
        /// Optimized path.
        path: PathBuf,
        /// Codec error.
        #[source]
        source: CodecError,
    },

    /// The optimized file failed validation and was removed.
    #[error("{summary}")]
    Invalid {
        /// Optimized path.
        path: PathBuf,
        /// Validator summary.
        summary: String,
    },

    /// Removing an intermediate file failed.
    #[error("removing {path}: {source}")]
    Io {
        /// File being removed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
}

/// Summaries of a successful finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalized {
    /// Codec summary of the create step.
    pub create_summary: String,
    /// Validator summary.
    pub validate_summary: String,
}

/// Runs create then validate, and settles which file survives.
///
/// On success only the optimized file remains. When validation fails the
/// optimized file is removed and the raw one kept for a later retry.
pub struct Finalizer<'a, C: ?Sized> {
    codec: &'a C,
    bands: &'a [usize],
}

impl<'a, C: CogCodec + ?Sized> Finalizer<'a, C> {
    /// Finalizer selecting `bands` (1-based) into the optimized file.
    pub fn new(codec: &'a C, bands: &'a [usize]) -> Self {
        Self { codec, bands }
    }

    /// Finalize one unit's outputs. The raw file must exist.
    pub fn finalize(&self, paths: &OutputPaths) -> Result<Finalized, FinalizeError> {
        let create_summary = match self.codec.create(&paths.raw, &paths.cog, self.bands) {
            Ok(summary) => summary,
            Err(source) => {
                remove_if_exists(&paths.cog)?;
                return Err(FinalizeError::Create {
                    path: paths.cog.clone(),
                    source,
                });
            }
        };

        let validation = match self.codec.validate(&paths.cog) {
            Ok(validation) => validation,
            Err(source) => {
                warn!(cog = %paths.cog.display(), error = %source, "Validator failed, keeping raw");
                remove_if_exists(&paths.cog)?;
                return Err(FinalizeError::Validate {
                    path: paths.cog.clone(),
                    source,
                });
            }
        };

        if !validation.valid {
            warn!(cog = %paths.cog.display(), summary = %validation.summary, "Validation failed, keeping raw");
            remove_if_exists(&paths.cog)?;
            return Err(FinalizeError::Invalid {
                path: paths.cog.clone(),
                summary: validation.summary,
            });
        }

        remove_if_exists(&paths.raw)?;
        debug!(cog = %paths.cog.display(), "Finalized");
        Ok(Finalized {
            create_summary,
            validate_summary: validation.summary,
        })
    }
}

/// Remove a file, treating "not found" as success.
pub(crate) fn remove_if_exists(path: &std::path::Path) -> Result<(), FinalizeError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(FinalizeError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Validation;
    use std::path::Path;
    use tempfile::TempDir;

    /// Copies the raw file and reports a fixed validation result.
    struct CopyCodec {
        valid: bool,
        fail_create: bool,
        fail_validate: bool,
    }

    impl CogCodec for CopyCodec {
        fn create(&self, raw: &Path, cog: &Path, _bands: &[usize]) -> Result<String, CodecError> {
            if self.fail_create {
                return Err(CodecError::Failed {
                    program: "copy".into(),
                    status: "exit status: 1".into(),
                    summary: "boom".into(),
                });
            }
            fs::copy(raw, cog).map_err(|source| CodecError::Spawn {
                program: "copy".into(),
                source,
            })?;
            Ok("copied".into())
        }

        fn validate(&self, _cog: &Path) -> Result<Validation, CodecError> {
            if self.fail_validate {
                return Err(CodecError::Spawn {
                    program: "validator".into(),
                    source: io::Error::new(io::ErrorKind::NotFound, "no such program"),
                });
            }
            Ok(if self.valid {
                Validation::valid("ok")
            } else {
                Validation::invalid("bad layout")
            })
        }
    }

    fn paths(dir: &TempDir) -> OutputPaths {
        let paths = OutputPaths::from_raw(dir.path().join("7_2022-06.tif"));
        fs::write(&paths.raw, b"raw").unwrap();
        paths
    }

    #[test]
    fn test_valid_removes_raw() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let codec = CopyCodec { valid: true, fail_create: false, fail_validate: false };
        let done = Finalizer::new(&codec, &[1, 2, 3, 4]).finalize(&paths).unwrap();
        assert_eq!(done.create_summary, "copied");
        assert_eq!(done.validate_summary, "ok");
        assert!(!paths.raw.exists());
        assert!(paths.cog.exists());
    }

    #[test]
    fn test_invalid_keeps_raw_only() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let codec = CopyCodec { valid: false, fail_create: false, fail_validate: false };
        let err = Finalizer::new(&codec, &[1]).finalize(&paths).unwrap_err();
        assert!(matches!(err, FinalizeError::Invalid { ref summary, .. } if summary == "bad layout"));
        assert!(paths.raw.exists());
        assert!(!paths.cog.exists());
    }

    #[test]
    fn test_create_failure_keeps_raw() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let codec = CopyCodec { valid: true, fail_create: true, fail_validate: false };
        let err = Finalizer::new(&codec, &[1]).finalize(&paths).unwrap_err();
        assert!(matches!(err, FinalizeError::Create { .. }));
        assert!(paths.raw.exists());
        assert!(!paths.cog.exists());
    }

    #[test]
    fn test_validator_error_keeps_raw_only() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let codec = CopyCodec { valid: true, fail_create: false, fail_validate: true };
        let err = Finalizer::new(&codec, &[1]).finalize(&paths).unwrap_err();
        assert!(matches!(err, FinalizeError::Validate { .. }));
        assert!(paths.raw.exists());
        assert!(!paths.cog.exists());
        assert_eq!(paths.state(), crate::naming::OutputState::RawOnly);
    }

    #[test]
    fn test_remove_missing_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(remove_if_exists(&dir.path().join("absent.tif")).is_ok());
    }
}
