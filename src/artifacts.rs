//! Versioned on-disk store for the fitted preprocessor and models.
//!
//! Artifacts are written per training run. A [`RunWriter`] fills a staging
//! directory; committing renames it to `run-<generation>` and then swaps the
//! `CURRENT` manifest, so readers only ever see a complete run. A writer that
//! is dropped before commit removes its staging directory.
//!
//! Every artifact file is bincode: a small header followed by the payload.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::{Builder, NamedTempFile, TempDir};
use tracing::{debug, info, warn};

use crate::error::{AqiError, Result};
use crate::models::{ModelFamily, TrainedModel};
use crate::preprocess::PreprocessorState;

const FORMAT_VERSION: u32 = 2;
const PREPROCESSOR: &str = "preprocessor";
const MANIFEST: &str = "CURRENT";
const RUN_PREFIX: &str = "run-";
const STAGING_PREFIX: &str = ".staging-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHeader {
    pub format_version: u32,
    pub name: String,
    /// Generation of the run the artifact was written in.
    pub generation: u64,
    pub saved_at: DateTime<Utc>,
}

/// Which run is live and what it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub format_version: u32,
    /// Starts at 1 and grows by one on every committed run.
    pub generation: u64,
    pub models: Vec<ModelFamily>,
    pub committed_at: DateTime<Utc>,
}

impl RunManifest {
    pub fn has_model(&self, family: ModelFamily) -> bool {
        self.models.contains(&family)
    }
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    header: ArtifactHeader,
    payload: T,
}

/// A loaded artifact with its header.
#[derive(Debug, Clone)]
pub struct Artifact<T> {
    pub header: ArtifactHeader,
    pub payload: T,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(ArtifactStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn run_dir(&self, generation: u64) -> PathBuf {
        self.root.join(format!("{}{}", RUN_PREFIX, generation))
    }

    /// The live run, or `None` before the first commit.
    pub fn current(&self) -> Result<Option<RunManifest>> {
        let bytes = match fs::read(self.root.join(MANIFEST)) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let manifest: RunManifest = bincode::deserialize(&bytes)?;
        check_version(MANIFEST, manifest.format_version)?;
        Ok(Some(manifest))
    }

    /// Start staging the next generation.
    pub fn begin_run(&self) -> Result<RunWriter<'_>> {
        let generation = self.current()?.map_or(1, |m| m.generation + 1);
        let staging = Builder::new().prefix(STAGING_PREFIX).tempdir_in(&self.root)?;
        debug!(generation, dir = %staging.path().display(), "run staging started");
        Ok(RunWriter {
            store: self,
            generation,
            staging,
            has_preprocessor: false,
            models: Vec::new(),
        })
    }

    fn load_from<T: DeserializeOwned>(&self, manifest: &RunManifest, name: &str) -> Result<Option<Artifact<T>>> {
        let path = self.run_dir(manifest.generation).join(format!("{}.bin", name));
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let envelope: Envelope<T> = bincode::deserialize(&bytes)?;
        check_version(name, envelope.header.format_version)?;
        if envelope.header.generation != manifest.generation {
            return Err(AqiError::InvalidInput(format!(
                "artifact {} belongs to run {}, the live run is {}",
                name, envelope.header.generation, manifest.generation
            )));
        }
        Ok(Some(Artifact {
            header: envelope.header,
            payload: envelope.payload,
        }))
    }

    fn preprocessor_in(&self, manifest: &RunManifest) -> Result<Artifact<PreprocessorState>> {
        self.load_from(manifest, PREPROCESSOR)?
            .ok_or(AqiError::PreprocessorNotTrained)
    }

    fn model_in(&self, manifest: &RunManifest, family: ModelFamily) -> Result<Artifact<TrainedModel>> {
        if !manifest.has_model(family) {
            return Err(AqiError::ModelNotTrained(family));
        }
        let artifact = self
            .load_from::<TrainedModel>(manifest, family.artifact_name())?
            .ok_or(AqiError::ModelNotTrained(family))?;
        if artifact.payload.family() != family {
            return Err(AqiError::InvalidInput(format!(
                "artifact {} holds a {} model",
                family.artifact_name(),
                artifact.payload.family()
            )));
        }
        Ok(artifact)
    }

    /// Load the live preprocessor; absent means the models were never trained.
    pub fn load_preprocessor(&self) -> Result<PreprocessorState> {
        let manifest = self.current()?.ok_or(AqiError::PreprocessorNotTrained)?;
        Ok(self.preprocessor_in(&manifest)?.payload)
    }

    pub fn load_model(&self, family: ModelFamily) -> Result<Artifact<TrainedModel>> {
        let manifest = self.current()?.ok_or(AqiError::ModelNotTrained(family))?;
        self.model_in(&manifest, family)
    }

    /// Preprocessor and `family` model read from the same run.
    pub fn load_pair(&self, family: ModelFamily) -> Result<(PreprocessorState, Artifact<TrainedModel>)> {
        let manifest = self.current()?.ok_or(AqiError::PreprocessorNotTrained)?;
        let preprocessor = self.preprocessor_in(&manifest)?.payload;
        let model = self.model_in(&manifest, family)?;
        Ok((preprocessor, model))
    }

    pub fn has_model(&self, family: ModelFamily) -> bool {
        matches!(self.current(), Ok(Some(m)) if m.has_model(family))
    }

    fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let bytes = bincode::serialize(manifest)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.root.join(MANIFEST)).map_err(|e| e.error)?;
        Ok(())
    }

    /// Remove runs older than the one before `live`. The previous run stays
    /// for readers that loaded the old manifest just before the swap.
    fn prune(&self, live: u64) {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "could not list artifact directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let old = name
                .to_str()
                .and_then(|n| n.strip_prefix(RUN_PREFIX))
                .and_then(|g| g.parse::<u64>().ok())
                .is_some_and(|g| g + 1 < live);
            if old {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!(run = ?name, error = %e, "could not remove old run");
                }
            }
        }
    }
}

fn check_version(name: &str, version: u32) -> Result<()> {
    if version != FORMAT_VERSION {
        return Err(AqiError::InvalidInput(format!(
            "artifact {} has format version {}, expected {}",
            name, version, FORMAT_VERSION
        )));
    }
    Ok(())
}

/// One training run being staged. Nothing is visible until [`commit`].
///
/// [`commit`]: RunWriter::commit
#[derive(Debug)]
pub struct RunWriter<'a> {
    store: &'a ArtifactStore,
    generation: u64,
    staging: TempDir,
    has_preprocessor: bool,
    models: Vec<ModelFamily>,
}

impl RunWriter<'_> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn write<T: Serialize>(&self, name: &str, payload: &T) -> Result<ArtifactHeader> {
        let header = ArtifactHeader {
            format_version: FORMAT_VERSION,
            name: name.to_string(),
            generation: self.generation,
            saved_at: Utc::now(),
        };
        let bytes = bincode::serialize(&Envelope {
            header: header.clone(),
            payload,
        })?;
        let mut file = File::create(self.staging.path().join(format!("{}.bin", name)))?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        debug!(artifact = name, generation = self.generation, bytes = bytes.len(), "artifact staged");
        Ok(header)
    }

    pub fn save_preprocessor(&mut self, state: &PreprocessorState) -> Result<ArtifactHeader> {
        let header = self.write(PREPROCESSOR, state)?;
        self.has_preprocessor = true;
        Ok(header)
    }

    pub fn save_model(&mut self, model: &TrainedModel) -> Result<ArtifactHeader> {
        let family = model.family();
        let header = self.write(family.artifact_name(), model)?;
        if !self.models.contains(&family) {
            self.models.push(family);
        }
        Ok(header)
    }

    /// Move the staged run into place and make it the live one.
    pub fn commit(self) -> Result<RunManifest> {
        if !self.has_preprocessor {
            return Err(AqiError::InvalidInput(
                "a training run cannot be committed without a preprocessor".into(),
            ));
        }
        let target = self.store.run_dir(self.generation);
        // left over from a commit that never reached the manifest swap
        if target.exists() {
            fs::remove_dir_all(&target)?;
        }
        fs::rename(self.staging.path(), &target)?;

        let manifest = RunManifest {
            format_version: FORMAT_VERSION,
            generation: self.generation,
            models: self.models,
            committed_at: Utc::now(),
        };
        self.store.write_manifest(&manifest)?;
        info!(generation = manifest.generation, models = manifest.models.len(), "training run committed");

        self.store.prune(manifest.generation);
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FEATURE_COUNT;
    use crate::models::ModelParams;
    use ndarray::{Array1, Array2};
    use tempfile::tempdir;

    fn state() -> PreprocessorState {
        PreprocessorState {
            medians: [1.0; FEATURE_COUNT],
            means: [2.0; FEATURE_COUNT],
            stds: [0.5; FEATURE_COUNT],
            fitted_rows: 12,
        }
    }

    fn commit_state(store: &ArtifactStore, state: &PreprocessorState) -> RunManifest {
        let mut run = store.begin_run().unwrap();
        run.save_preprocessor(state).unwrap();
        run.commit().unwrap()
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn missing_artifacts_report_not_trained() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("models")).unwrap();
        assert!(matches!(store.load_preprocessor(), Err(AqiError::PreprocessorNotTrained)));
        assert!(matches!(
            store.load_model(ModelFamily::Linear),
            Err(AqiError::ModelNotTrained(ModelFamily::Linear))
        ));
        assert!(!store.has_model(ModelFamily::Linear));
        assert_eq!(store.current().unwrap(), None);
    }

    #[test]
    fn generations_increase_and_replace() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let first = commit_state(&store, &state());
        let mut changed = state();
        changed.fitted_rows = 99;
        let second = commit_state(&store, &changed);

        assert_eq!(first.generation, 1);
        assert_eq!(second.generation, 2);
        assert_eq!(store.load_preprocessor().unwrap(), changed);
        assert_eq!(entries(dir.path()), ["CURRENT", "run-1", "run-2"]);
    }

    #[test]
    fn only_the_previous_run_is_kept() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        for _ in 0..4 {
            commit_state(&store, &state());
        }
        assert_eq!(entries(dir.path()), ["CURRENT", "run-3", "run-4"]);
    }

    #[test]
    fn reloaded_model_predicts_identically() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        let x = Array2::from_shape_fn((40, FEATURE_COUNT), |(i, j)| ((i * 13 + j * 5) % 17) as f64 - 8.0);
        let y = Array1::from_shape_fn(40, |i| 3.0 * x[(i, 0)] - x[(i, 4)] + 60.0);
        let params = ModelParams::default();

        let models: Vec<TrainedModel> = ModelFamily::ALL
            .into_iter()
            .map(|family| TrainedModel::fit(family, x.view(), y.view(), &params, 42).unwrap())
            .collect();
        let mut run = store.begin_run().unwrap();
        run.save_preprocessor(&state()).unwrap();
        for model in &models {
            assert_eq!(run.save_model(model).unwrap().generation, 1);
        }
        let manifest = run.commit().unwrap();
        assert_eq!(manifest.models, ModelFamily::ALL.to_vec());

        for model in &models {
            let loaded = store.load_model(model.family()).unwrap();
            assert_eq!(loaded.header.generation, 1);
            assert_eq!(
                model.predict(x.view()).unwrap(),
                loaded.payload.predict(x.view()).unwrap()
            );
        }
    }

    #[test]
    fn uncommitted_run_changes_nothing() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        commit_state(&store, &state());

        let mut changed = state();
        changed.fitted_rows = 7;
        {
            let mut run = store.begin_run().unwrap();
            run.save_preprocessor(&changed).unwrap();
            assert_eq!(run.generation(), 2);
        }

        assert_eq!(store.current().unwrap().unwrap().generation, 1);
        assert_eq!(store.load_preprocessor().unwrap(), state());
        assert_eq!(entries(dir.path()), ["CURRENT", "run-1"]);
    }

    #[test]
    fn failed_commit_keeps_the_live_run() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        commit_state(&store, &state());

        // a plain file squatting on the next run's directory
        fs::write(dir.path().join("run-2"), b"in the way").unwrap();
        let mut changed = state();
        changed.fitted_rows = 7;
        let mut run = store.begin_run().unwrap();
        run.save_preprocessor(&changed).unwrap();
        assert!(run.commit().is_err());

        assert_eq!(store.current().unwrap().unwrap().generation, 1);
        assert_eq!(store.load_preprocessor().unwrap(), state());
        assert!(entries(dir.path()).iter().all(|n| !n.starts_with(STAGING_PREFIX)));
    }

    #[test]
    fn run_without_preprocessor_is_refused() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        assert!(store.begin_run().unwrap().commit().is_err());
        assert_eq!(store.current().unwrap(), None);
    }

    #[test]
    fn models_outside_the_manifest_are_not_trained() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        commit_state(&store, &state());
        assert!(matches!(
            store.load_pair(ModelFamily::RandomForest),
            Err(AqiError::ModelNotTrained(ModelFamily::RandomForest))
        ));
        assert!(!store.has_model(ModelFamily::RandomForest));
    }

    #[test]
    fn garbage_is_an_error() {
        let dir = tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("CURRENT"), b"nope").unwrap();
        assert!(matches!(store.load_preprocessor(), Err(AqiError::Artifact(_))));
    }
}
