//! Size-rotated log file.
//!
//! ```text
//! write(buf) ── size + buf > max_bytes? ──► rotate:
//!                                              name.(N-1) → name.N  (name.N dropped)
//!                                              ...
//!                                              name       → name.1  (name.1.gz when compressing)
//!                                              reopen name
//!                                              drop backups older than max_age
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use flate2::Compression;
use flate2::write::GzEncoder;

/// Append-only log file rotated by size. Clones share the same file.
#[derive(Clone)]
pub struct RollingFile {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    path: PathBuf,
    max_bytes: u64,
    max_backups: usize,
    max_age: Option<Duration>,
    compress: bool,
    file: File,
    written: u64,
}

impl RollingFile {
    /// Opens (or creates) `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>, max_bytes: u64, max_backups: usize) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = open_append(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            inner: Arc::new(Mutex::new(Inner {
                path,
                max_bytes: max_bytes.max(1),
                max_backups,
                max_age: None,
                compress: false,
                file,
                written,
            })),
        })
    }

    /// Removes backups last modified more than `max_age` ago, now and after
    /// every rotation. `None` keeps them until `max_backups` pushes them out.
    pub fn with_max_age(self, max_age: Option<Duration>) -> io::Result<Self> {
        {
            let mut inner = self.lock();
            inner.max_age = max_age;
            inner.prune()?;
        }
        Ok(self)
    }

    /// Gzips rotated files as `<name>.<n>.gz`.
    #[must_use]
    pub fn with_compression(self, compress: bool) -> Self {
        self.lock().compress = compress;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn open_truncate(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

fn backup_path(path: &Path, n: usize, compressed: bool) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{n}"));
    if compressed {
        name.push(".gz");
    }
    PathBuf::from(name)
}

fn gzip(from: &Path, to: &Path) -> io::Result<()> {
    let mut src = File::open(from)?;
    let mut encoder = GzEncoder::new(File::create(to)?, Compression::default());
    io::copy(&mut src, &mut encoder)?;
    encoder.finish()?.sync_all()
}

impl Inner {
    fn backup(&self, n: usize) -> PathBuf {
        backup_path(&self.path, n, self.compress)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        if self.max_backups == 0 {
            self.file = open_truncate(&self.path)?;
        } else {
            let oldest = self.backup(self.max_backups);
            if oldest.exists() {
                fs::remove_file(&oldest)?;
            }
            for n in (1..self.max_backups).rev() {
                let from = self.backup(n);
                if from.exists() {
                    fs::rename(&from, self.backup(n + 1))?;
                }
            }
            if self.compress {
                gzip(&self.path, &self.backup(1))?;
                self.file = open_truncate(&self.path)?;
            } else {
                fs::rename(&self.path, self.backup(1))?;
                self.file = open_append(&self.path)?;
            }
            self.prune()?;
        }
        self.written = 0;
        Ok(())
    }

    fn prune(&self) -> io::Result<()> {
        let Some(cutoff) = self
            .max_age
            .and_then(|age| SystemTime::now().checked_sub(age))
        else {
            return Ok(());
        };
        for n in 1..=self.max_backups {
            let path = self.backup(n);
            match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(modified) if modified < cutoff => fs::remove_file(&path)?,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Write for RollingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        if inner.written > 0 && inner.written + buf.len() as u64 > inner.max_bytes {
            inner.rotate()?;
        }
        let n = inner.file.write(buf)?;
        inner.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.lock().file.flush()
    }
}
