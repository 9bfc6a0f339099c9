use std::{
    collections::HashSet,
    path::{Component, Path, PathBuf},
    sync::Mutex,
};

use async_trait::async_trait;
use ruamail_common::{Report, ReportId, internal};
use serde::Deserialize;
use tokio::{fs, io::AsyncWriteExt};

use crate::{SpoolError, ValidationError, store::ReportStore};

const REPORT_EXTENSION: &str = "ron";
const ERROR_EXTENSION: &str = "err";
const TEMP_PREFIX: &str = ".tmp_";

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// File-based report store
///
/// Each report is stored as `{id}.ron` in the spool directory. Errors recorded
/// against a report are appended, one per line, to `{id}.err` next to it.
///
/// # Security
/// - Uses atomic writes (write to temp file, then rename) to prevent corruption
/// - Rejects identifiers that are not plain file names
/// - Ignores temporary and unrelated files when scanning
#[derive(Debug)]
pub struct FileReportStore {
    path: PathBuf,
    handed_out: Mutex<HashSet<ReportId>>,
}

impl Default for FileReportStore {
    fn default() -> Self {
        Self::unchecked(PathBuf::from("/var/spool/ruamail"))
    }
}

impl Clone for FileReportStore {
    fn clone(&self) -> Self {
        Self::unchecked(self.path.clone())
    }
}

// Custom Deserialize implementation with path validation
impl<'de> Deserialize<'de> for FileReportStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileReportStoreHelper {
            path: PathBuf,
        }

        let helper = FileReportStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self::unchecked(helper.path))
    }
}

impl FileReportStore {
    fn unchecked(path: PathBuf) -> Self {
        Self {
            path,
            handed_out: Mutex::default(),
        }
    }

    /// Create a new `FileReportStore` builder
    #[must_use]
    pub fn builder() -> FileReportStoreBuilder {
        FileReportStoreBuilder::default()
    }

    /// The spool directory
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate a spool path
    ///
    /// Rejects `..` components, relative paths and system directories.
    fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentComponent(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        for prefix in SENSITIVE_PREFIXES {
            if path.starts_with(prefix) {
                return Err(ValidationError::SystemDirectory {
                    prefix,
                    path: path.display().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Create the spool directory if it does not exist
    ///
    /// Also removes temporary files left behind by an interrupted enqueue.
    ///
    /// # Errors
    /// - If the spool path cannot be created
    /// - If the path exists but is not a directory
    pub async fn init(&self) -> crate::Result<()> {
        internal!("Initialising report spool at {} ...", self.path.display());

        if !fs::try_exists(&self.path).await? {
            internal!("{:#?} does not exist, creating...", self.path);
            fs::create_dir_all(&self.path).await?;
        } else if !fs::metadata(&self.path).await?.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        let mut entries = fs::read_dir(&self.path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                fs::remove_file(entry.path()).await?;
            }
        }

        Ok(())
    }

    fn file_for(&self, id: &ReportId, extension: &str) -> crate::Result<PathBuf> {
        let name = id.as_str();
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@' | '+'));

        if valid {
            Ok(self.path.join(format!("{name}.{extension}")))
        } else {
            Err(ValidationError::InvalidId(name.to_string()).into())
        }
    }

    async fn read_report(&self, id: &ReportId) -> crate::Result<Report> {
        let text = fs::read_to_string(self.file_for(id, REPORT_EXTENSION)?).await?;
        Ok(ron::from_str(&text)?)
    }

    fn mark_handed_out(&self, id: &ReportId) -> crate::Result<bool> {
        Ok(self.handed_out.lock()?.insert(id.clone()))
    }
}

#[async_trait]
impl ReportStore for FileReportStore {
    #[tracing::instrument(level = "debug", skip(self, report), fields(id = %report.id))]
    async fn enqueue(&self, report: Report) -> crate::Result<ReportId> {
        let path = self.file_for(&report.id, REPORT_EXTENSION)?;

        if fs::try_exists(&path).await? {
            return Err(SpoolError::AlreadyExists(report.id));
        }

        let text = ron::ser::to_string_pretty(&report, ron::ser::PrettyConfig::default())?;
        let temp = self
            .path
            .join(format!("{TEMP_PREFIX}{}.{REPORT_EXTENSION}", report.id));

        fs::write(&temp, text).await?;
        fs::rename(&temp, &path).await?;

        internal!(
            level = DEBUG,
            "Queued report {} at {}",
            report.id,
            path.display()
        );

        Ok(report.id)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn next_pending(&self) -> crate::Result<Option<Report>> {
        for id in self.list().await? {
            if !self.mark_handed_out(&id)? {
                continue;
            }

            match self.read_report(&id).await {
                Ok(report) => return Ok(Some(report)),
                Err(SpoolError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(id = %id, error = %err, "Skipping unreadable report");
                }
            }
        }

        Ok(None)
    }

    #[tracing::instrument(level = "debug", skip(self, id), fields(id = %id))]
    async fn delete(&self, id: &ReportId) -> crate::Result<()> {
        let path = self.file_for(id, REPORT_EXTENSION)?;

        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(id.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        match fs::remove_file(self.file_for(id, ERROR_EXTENSION)?).await {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => return Err(err.into()),
            _ => {}
        }

        internal!(level = DEBUG, "Deleted report {id} from spool");

        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, id, message), fields(id = %id))]
    async fn record_error(&self, id: &ReportId, message: &str) -> crate::Result<()> {
        if !fs::try_exists(self.file_for(id, REPORT_EXTENSION)?).await? {
            return Err(SpoolError::NotFound(id.clone()));
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.file_for(id, ERROR_EXTENSION)?)
            .await?;

        // One annotation per line
        let line = message.replace(['\r', '\n'], " ");
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    async fn recorded_errors(&self, id: &ReportId) -> crate::Result<Vec<String>> {
        match fs::read_to_string(self.file_for(id, ERROR_EXTENSION)?).await {
            Ok(text) => Ok(text.lines().map(str::to_string).collect()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> crate::Result<Vec<ReportId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if !filename.starts_with('.')
                && let Some(stem) = filename.strip_suffix(&format!(".{REPORT_EXTENSION}"))
            {
                ids.push(ReportId::new(stem));
            }
        }

        ids.sort();

        Ok(ids)
    }
}

/// Builder for `FileReportStore`
#[derive(Debug, Default)]
pub struct FileReportStoreBuilder {
    path: PathBuf,
}

impl FileReportStoreBuilder {
    /// Set the spool directory path
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Build the final `FileReportStore`
    ///
    /// # Errors
    /// Returns an error if the path is invalid or potentially dangerous
    pub fn build(self) -> crate::Result<FileReportStore> {
        FileReportStore::validate_path(&self.path)?;
        Ok(FileReportStore::unchecked(self.path))
    }
}
