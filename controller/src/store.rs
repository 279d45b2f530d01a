use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::{debug, info};

use heater_common::{
    DailyLogEntry, HeaterError, HourInput, NewProgram, PartialSettings, ProgramBook, ProgramId,
    ProgramSchedule, Result, ScheduleCell, Settings,
};

/// File-backed settings document. Cloning shares the lock.
#[derive(Clone)]
pub struct SettingsStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }

    /// Reads the document, writing the template first if there is none.
    pub async fn load(&self) -> Result<Settings> {
        let _guard = self.lock.lock().await;
        let raw = self.read_or_seed().await?;
        self.decode(&raw)
    }

    /// Merges `changes` into the stored document and returns what was read
    /// back. Nothing is written when the merge changes no byte.
    pub async fn apply(&self, changes: &PartialSettings) -> Result<Settings> {
        let _guard = self.lock.lock().await;
        let raw = self.read_or_seed().await?;
        let current = self.decode(&raw)?;

        let merged = current.merged(changes);
        let payload = merged.encode().map_err(|err| self.write_error(err.into()))?;
        if payload == raw {
            return Ok(current);
        }

        write_atomic(self.path(), &payload)
            .await
            .map_err(|err| self.write_error(err))?;
        debug!("settings written to {}", self.path.display());

        let raw = self.read_raw().await?;
        self.decode(&raw)
    }

    async fn read_or_seed(&self) -> Result<Vec<u8>> {
        let raw = self.read_raw().await?;
        if !is_blank(&raw) {
            return Ok(raw);
        }

        info!("writing settings template to {}", self.path.display());
        let template = Settings::template()
            .encode()
            .map_err(|err| self.write_error(err.into()))?;
        write_atomic(self.path(), &template)
            .await
            .map_err(|err| self.write_error(err))?;
        Ok(template)
    }

    async fn read_raw(&self) -> Result<Vec<u8>> {
        read_optional(self.path())
            .await
            .map(Option::unwrap_or_default)
            .map_err(|source| HeaterError::ConfigRead {
                path: self.path.as_ref().clone(),
                source,
            })
    }

    fn decode(&self, raw: &[u8]) -> Result<Settings> {
        Settings::decode(raw).map_err(|err| HeaterError::ConfigCorrupt {
            path: self.path.as_ref().clone(),
            reason: err.to_string(),
        })
    }

    fn write_error(&self, source: std::io::Error) -> HeaterError {
        HeaterError::ConfigWrite {
            path: self.path.as_ref().clone(),
            source,
        }
    }
}

/// File-backed program document.
#[derive(Clone)]
pub struct ProgramStore {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl ProgramStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }

    pub async fn book(&self) -> Result<ProgramBook> {
        let _guard = self.lock.lock().await;
        self.read_locked().await
    }

    pub async fn load(&self, id: ProgramId) -> Result<ProgramSchedule> {
        self.book().await?.get(id).cloned()
    }

    pub async fn ids(&self) -> Result<Vec<ProgramId>> {
        Ok(self.book().await?.ids())
    }

    pub async fn edit<D: AsRef<str>>(
        &self,
        id: ProgramId,
        days: &[D],
        hours: &[HourInput],
        value: ScheduleCell,
    ) -> Result<ProgramSchedule> {
        let _guard = self.lock.lock().await;
        let mut book = self.read_locked().await?;
        book.edit(id, days, hours, value)?;
        self.write_locked(&book).await?;
        info!("program {id} edited");
        book.get(id).cloned()
    }

    pub async fn add(&self, source: NewProgram) -> Result<ProgramId> {
        let _guard = self.lock.lock().await;
        let mut book = self.read_locked().await?;
        let id = book.add(source)?;
        self.write_locked(&book).await?;
        info!("program {id} added from {source:?}");
        Ok(id)
    }

    async fn read_locked(&self) -> Result<ProgramBook> {
        let raw = read_optional(self.path())
            .await
            .map_err(|err| self.error(err))?;

        let book = match raw {
            Some(raw) => serde_json::from_slice::<ProgramBook>(&raw).map_err(|err| self.error(err))?,
            None => ProgramBook::default(),
        };
        if !book.is_empty() {
            return Ok(book);
        }

        info!("seeding program document {}", self.path.display());
        let seeded = ProgramBook::seeded();
        self.write_locked(&seeded).await?;
        Ok(seeded)
    }

    async fn write_locked(&self, book: &ProgramBook) -> Result<()> {
        let mut payload = serde_json::to_vec_pretty(book).map_err(|err| self.error(err))?;
        payload.push(b'\n');
        write_atomic(self.path(), &payload)
            .await
            .map_err(|err| self.error(err))
    }

    fn error(&self, err: impl std::fmt::Display) -> HeaterError {
        HeaterError::ProgramStore {
            path: self.path.as_ref().clone(),
            reason: err.to_string(),
        }
    }
}

/// Append-only JSON array of finished days.
#[derive(Clone)]
pub struct DailyLog {
    path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

impl DailyLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Arc::new(path.into()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        self.path.as_ref()
    }

    pub async fn entries(&self) -> Result<Vec<DailyLogEntry>> {
        let _guard = self.lock.lock().await;
        self.read_locked().await
    }

    pub async fn append(&self, entry: DailyLogEntry) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_locked().await?;
        entries.push(entry);

        let mut payload = serde_json::to_vec_pretty(&entries).map_err(|err| self.error(err))?;
        payload.push(b'\n');
        write_atomic(self.path(), &payload)
            .await
            .map_err(|err| self.error(err))
    }

    async fn read_locked(&self) -> Result<Vec<DailyLogEntry>> {
        match read_optional(self.path()).await.map_err(|err| self.error(err))? {
            Some(raw) => serde_json::from_slice(&raw).map_err(|err| self.error(err)),
            None => Ok(Vec::new()),
        }
    }

    fn error(&self, err: impl std::fmt::Display) -> HeaterError {
        HeaterError::DailyLog {
            path: self.path.as_ref().clone(),
            reason: err.to_string(),
        }
    }
}

/// `None` when the file is missing or holds only whitespace.
async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(raw) if is_blank(&raw) => Ok(None),
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn is_blank(raw: &[u8]) -> bool {
    raw.iter().all(u8::is_ascii_whitespace)
}

/// Whole-file rewrite through a sibling temp file and a rename.
async fn write_atomic(path: &Path, payload: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, payload).await?;
    tokio::fs::rename(&tmp, path).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use heater_common::{settings::PartialMode, DayOfWeek, ElapsedTime};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn load_seeds_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings").join("settings.json");
        let store = SettingsStore::new(&path);

        let settings = store.load().await.unwrap();

        assert_eq!(settings, Settings::template());
        assert_eq!(
            tokio::fs::read(&path).await.unwrap(),
            Settings::template().encode().unwrap()
        );
    }

    #[tokio::test]
    async fn load_seeds_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, b"\n").await.unwrap();

        let settings = SettingsStore::new(&path).load().await.unwrap();
        assert_eq!(settings, Settings::template());
    }

    #[tokio::test]
    async fn corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        tokio::fs::write(&path, b"{\"mode\": ").await.unwrap();

        let err = SettingsStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, HeaterError::ConfigCorrupt { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn apply_merges_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        store.load().await.unwrap();

        let changes = PartialSettings {
            mode: Some(PartialMode {
                manual: Some(true),
                ..PartialMode::default()
            }),
            ..PartialSettings::default()
        };
        let applied = store.apply(&changes).await.unwrap();
        let reloaded = store.load().await.unwrap();

        assert!(applied.mode.manual);
        assert_eq!(applied, reloaded);
        assert_eq!(applied.mode.desired_temp, 19.5);
        assert_eq!(applied.relay, Settings::template().relay);
    }

    #[tokio::test]
    async fn apply_twice_equals_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        let changes = PartialSettings::bookkeeping(
            ElapsedTime::from_secs(42),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            Some(18.5),
        );

        let once = store.apply(&changes).await.unwrap();
        let written = tokio::fs::read(store.path()).await.unwrap();
        let twice = store.apply(&changes).await.unwrap();

        assert_eq!(once, twice);
        assert_eq!(tokio::fs::read(store.path()).await.unwrap(), written);
    }

    #[tokio::test]
    async fn no_op_apply_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        // Compact, but otherwise equal to the template.
        let compact = serde_json::to_vec(&Settings::template()).unwrap();
        tokio::fs::write(&path, &compact).await.unwrap();
        let store = SettingsStore::new(&path);

        store.apply(&PartialSettings::default()).await.unwrap();
        // Canonical formatting differs, so the first apply rewrites once.
        let canonical = tokio::fs::read(&path).await.unwrap();
        assert_ne!(canonical, compact);

        store
            .apply(&PartialSettings::relay_state(false))
            .await
            .unwrap();
        assert_eq!(tokio::fs::read(&path).await.unwrap(), canonical);
        assert!(!dir.path().join("settings.json.tmp").exists());
    }

    #[tokio::test]
    async fn program_store_seeds_and_rejects_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgramStore::new(dir.path().join("programs").join("program.json"));

        let program = store.load(ProgramId::new(0)).await.unwrap();
        assert_eq!(program, ProgramSchedule::example());
        assert!(store.path().exists());

        let err = store.load(ProgramId::new(5)).await.unwrap_err();
        assert!(matches!(err, HeaterError::ProgramNotFound(id) if id == ProgramId::new(5)));
    }

    #[tokio::test]
    async fn program_edit_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgramStore::new(dir.path().join("program.json"));

        store
            .edit(
                ProgramId::new(0),
                &["Wednesday"],
                &[HourInput::from(12)],
                ScheduleCell::Override(20.5),
            )
            .await
            .unwrap();

        let reopened = ProgramStore::new(dir.path().join("program.json"));
        let program = reopened.load(ProgramId::new(0)).await.unwrap();
        assert_eq!(
            program.value_at(DayOfWeek::Wed, 12),
            ScheduleCell::Override(20.5)
        );
    }

    #[tokio::test]
    async fn program_add_lists_new_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgramStore::new(dir.path().join("program.json"));

        let id = store
            .add(NewProgram::CopyOf(ProgramId::new(0)))
            .await
            .unwrap();

        assert_eq!(id, ProgramId::new(1));
        assert_eq!(
            store.ids().await.unwrap(),
            vec![ProgramId::new(0), ProgramId::new(1)]
        );
    }

    #[tokio::test]
    async fn corrupt_program_document_is_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.json");
        tokio::fs::write(&path, br#"{"0": {"monday": {"0": true}}}"#)
            .await
            .unwrap();

        let err = ProgramStore::new(&path)
            .load(ProgramId::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, HeaterError::ProgramStore { .. }));
    }

    #[tokio::test]
    async fn duplicate_program_ids_are_a_store_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("program.json");
        let example = serde_json::to_value(ProgramSchedule::example()).unwrap();
        let document = serde_json::json!({"1": example.clone(), "01": example});
        tokio::fs::write(&path, document.to_string()).await.unwrap();

        let err = ProgramStore::new(&path).ids().await.unwrap_err();
        assert!(matches!(err, HeaterError::ProgramStore { .. }));
    }

    #[tokio::test]
    async fn daily_log_appends_entries() {
        let dir = tempfile::tempdir().unwrap();
        let log = DailyLog::new(dir.path().join("logs").join("daily.json"));
        let first = DailyLogEntry {
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            time_elapsed: ElapsedTime::from_secs(3_600),
        };
        let second = DailyLogEntry {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            time_elapsed: ElapsedTime::ZERO,
        };

        log.append(first.clone()).await.unwrap();
        log.append(second.clone()).await.unwrap();

        assert_eq!(log.entries().await.unwrap(), vec![first, second]);
        let raw = tokio::fs::read_to_string(log.path()).await.unwrap();
        assert!(raw.contains("\"timeElapsed\": \"1:00:00\""));
    }
}
