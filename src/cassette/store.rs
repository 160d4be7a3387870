//! Cassette persistence: versioned load and crash-safe append.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;

use super::format::{Cassette, Interaction, SCHEMA_VERSION};
use super::matcher::normalize_args;
use crate::error::{VcrError, VcrResult};

/// Receives interactions captured from real processes.
pub trait InteractionSink: Send + Sync {
    /// Stores one captured interaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the interaction could not be persisted.
    fn append(&self, interaction: Interaction) -> VcrResult<()>;
}

/// Owns one cassette file for the lifetime of a session.
///
/// The in-memory interaction list sits behind one lock; every append is
/// written through to disk with write-temp-then-rename.
#[derive(Debug)]
pub struct CassetteStore {
    path: PathBuf,
    cassette: Mutex<Cassette>,
}

impl CassetteStore {
    /// Loads an existing cassette.
    ///
    /// # Errors
    ///
    /// Returns [`VcrError::CassetteNotFound`] if the file is missing,
    /// [`VcrError::CassetteCorrupt`] if it cannot be parsed, and
    /// [`VcrError::SchemaVersionMismatch`] for an unsupported version.
    pub fn load(path: impl Into<PathBuf>) -> VcrResult<Self> {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(VcrError::CassetteNotFound { path });
            }
            Err(e) => {
                return Err(VcrError::CassetteCorrupt {
                    path,
                    reason: e.to_string(),
                });
            }
        };
        let cassette = parse(&path, &content)?;
        tracing::debug!(
            path = %path.display(),
            interactions = cassette.interactions.len(),
            "loaded cassette"
        );
        Ok(Self {
            path,
            cassette: Mutex::new(cassette),
        })
    }

    /// Loads the cassette at `path`, or starts an empty one if it does not
    /// exist yet.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`CassetteStore::load`], except for a
    /// missing file.
    pub fn open_or_create(path: impl Into<PathBuf>) -> VcrResult<Self> {
        let path = path.into();
        match Self::load(&path) {
            Err(VcrError::CassetteNotFound { .. }) => Ok(Self::empty(path)),
            other => other,
        }
    }

    /// Starts an empty cassette at `path`. Whatever is on disk there is
    /// replaced by the first persist.
    #[must_use]
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cassette: Mutex::new(Cassette::default()),
        }
    }

    /// Location of the canonical cassette file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the stored interactions, in recorded order.
    #[must_use]
    pub fn interactions(&self) -> Vec<Arc<Interaction>> {
        let cassette = self.cassette.lock().unwrap_or_else(PoisonError::into_inner);
        cassette
            .interactions
            .iter()
            .cloned()
            .map(Arc::new)
            .collect()
    }

    /// Number of stored interactions.
    #[must_use]
    pub fn len(&self) -> usize {
        let cassette = self.cassette.lock().unwrap_or_else(PoisonError::into_inner);
        cassette.interactions.len()
    }

    /// Whether the cassette holds no interactions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the current cassette to disk atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or any filesystem step fails. The
    /// previous file is left untouched in that case.
    pub fn persist(&self) -> VcrResult<()> {
        let mut cassette = self.cassette.lock().unwrap_or_else(PoisonError::into_inner);
        cassette.recorded_at = Some(Utc::now());
        write_atomic(&self.path, &cassette)
    }
}

impl InteractionSink for CassetteStore {
    fn append(&self, mut interaction: Interaction) -> VcrResult<()> {
        if interaction.normalized_args.is_empty() {
            interaction.normalized_args = normalize_args(&interaction.args, interaction.kwargs);
        }
        let mut cassette = self.cassette.lock().unwrap_or_else(PoisonError::into_inner);
        cassette.interactions.push(interaction);
        let previous = cassette.recorded_at.replace(Utc::now());
        // Only what reached the disk stays in memory.
        if let Err(e) = write_atomic(&self.path, &cassette) {
            cassette.interactions.pop();
            cassette.recorded_at = previous;
            return Err(e);
        }
        tracing::debug!(
            path = %self.path.display(),
            interactions = cassette.interactions.len(),
            "appended interaction"
        );
        Ok(())
    }
}

fn parse(path: &Path, content: &str) -> VcrResult<Cassette> {
    let corrupt = |reason: String| VcrError::CassetteCorrupt {
        path: path.to_path_buf(),
        reason,
    };

    // Check the version before the full shape so a future layout is reported
    // as a version problem rather than as corruption.
    let raw: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| corrupt(e.to_string()))?;
    let version = match raw.get("version") {
        Some(serde_yaml::Value::String(v)) => v.clone(),
        Some(serde_yaml::Value::Number(n)) => n.to_string(),
        Some(_) => return Err(corrupt("version must be a string".into())),
        None => return Err(corrupt("missing version".into())),
    };
    if version != SCHEMA_VERSION {
        return Err(VcrError::SchemaVersionMismatch {
            path: path.to_path_buf(),
            found: version,
            expected: SCHEMA_VERSION,
        });
    }

    let cassette: Cassette =
        serde_yaml::from_value(raw).map_err(|e| corrupt(e.to_string()))?;
    if let Some((index, _)) = cassette
        .interactions
        .iter()
        .enumerate()
        .find(|(_, i)| {
            i.args.is_empty() || !i.duration.is_finite() || i.duration < 0.0
        })
    {
        return Err(corrupt(format!(
            "interaction {index} has an empty command or an invalid duration"
        )));
    }
    Ok(cassette)
}

/// Serializes `cassette` next to `path` under a unique name, then renames it
/// into place. Concurrent writers never interleave; the last rename wins.
fn write_atomic(path: &Path, cassette: &Cassette) -> VcrResult<()> {
    let yaml = serde_yaml::to_string(cassette).map_err(|e| VcrError::CassetteCorrupt {
        path: path.to_path_buf(),
        reason: format!("failed to serialize: {e}"),
    })?;

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;
    let file_name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("cassette.yaml");
    let tmp_path = parent.join(format!(
        ".{file_name}.{}.{}.tmp",
        std::process::id(),
        uuid::Uuid::new_v4()
    ));

    let written = File::create(&tmp_path).and_then(|mut file| {
        file.write_all(yaml.as_bytes())?;
        file.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp_path, path)) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::format::MatchingOptions;

    fn interaction(args: &[&str], stdout: &str) -> Interaction {
        Interaction {
            args: args.iter().map(ToString::to_string).collect(),
            normalized_args: Vec::new(),
            kwargs: MatchingOptions::default(),
            stdout: stdout.into(),
            stderr: String::new(),
            returncode: 0,
            duration: 0.25,
            pid: 4242,
        }
    }

    #[test]
    fn append_persists_in_call_order_without_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.yaml");

        let store = CassetteStore::open_or_create(&path).unwrap();
        assert!(store.is_empty());
        store.append(interaction(&["date"], "one")).unwrap();
        store.append(interaction(&["date"], "one")).unwrap();
        let with_path = interaction(&["cat", "/tmp/x/file.txt"], "two");
        store.append(with_path).unwrap();

        let reloaded = CassetteStore::load(&path).unwrap();
        let stored = reloaded.interactions();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored[0].args, ["date"]);
        assert_eq!(stored[1].args, ["date"]);
        assert_eq!(stored[2].normalized_args, ["cat", "file.txt"]);
    }

    #[test]
    fn failed_write_does_not_keep_the_interaction() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        fs::write(&blocker, "not a directory").unwrap();
        let path = blocker.join("session.yaml");
        let store = CassetteStore::empty(&path);

        assert!(store.append(interaction(&["lost"], "")).is_err());
        assert!(store.is_empty());

        fs::remove_file(&blocker).unwrap();
        store.append(interaction(&["kept"], "")).unwrap();
        let stored = CassetteStore::load(&path).unwrap().interactions();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].args, ["kept"]);
    }

    #[test]
    fn missing_file_is_not_found_for_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let err = CassetteStore::load(path).unwrap_err();
        assert!(matches!(err, VcrError::CassetteNotFound { .. }));
    }

    #[test]
    fn malformed_yaml_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        let yaml = "version: \"1.0\"\ninteractions: [ {args: [ls], returncode: nope} ]\n";
        fs::write(&path, yaml).unwrap();
        assert!(matches!(
            CassetteStore::load(&path),
            Err(VcrError::CassetteCorrupt { .. })
        ));

        fs::write(&path, ":\n  - [unbalanced").unwrap();
        assert!(matches!(
            CassetteStore::load(&path),
            Err(VcrError::CassetteCorrupt { .. })
        ));
    }

    #[test]
    fn negative_duration_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neg.yaml");
        let yaml = "version: \"1.0\"\n\
                    interactions:\n  - {args: [ls], returncode: 0, duration: -1.0}\n";
        fs::write(&path, yaml).unwrap();
        assert!(matches!(
            CassetteStore::load(&path),
            Err(VcrError::CassetteCorrupt { .. })
        ));
    }

    #[test]
    fn unsupported_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.yaml");
        let yaml = "version: \"0.3\"\ninteractions: []\n";
        fs::write(&path, yaml).unwrap();
        match CassetteStore::load(&path) {
            Err(VcrError::SchemaVersionMismatch { found, expected, .. }) => {
                assert_eq!(found, "0.3");
                assert_eq!(expected, SCHEMA_VERSION);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn interrupted_append_leaves_previous_cassette_loadable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crash.yaml");
        let store = CassetteStore::open_or_create(&path).unwrap();
        store.append(interaction(&["date"], "kept")).unwrap();

        // A writer that died before its rename leaves only a stray temp file.
        fs::write(
            dir.path().join(".crash.yaml.1.dead.tmp"),
            "version: \"1.0\"\ninteractions: [",
        )
        .unwrap();

        let reloaded = CassetteStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.interactions()[0].stdout, "kept");
    }

    #[test]
    fn no_temp_files_remain_after_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clean.yaml");
        let store = CassetteStore::empty(&path);
        store.append(interaction(&["true"], "")).unwrap();

        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["clean.yaml"]);
    }

    #[test]
    fn concurrent_writers_never_leave_a_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.yaml");

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let store = CassetteStore::empty(&path);
                    for i in 0..10 {
                        let label = format!("{n}-{i}");
                        store.append(interaction(&["echo", &label], "")).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reloaded = CassetteStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 10);
    }
}
