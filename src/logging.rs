//src/logging.rs

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;

/// Name of the persistent run log inside the output folder.
pub const LOG_FILE: &str = "shovill.log";

/// Shared handle on the persistent run log. Cloning is cheap; every clone
/// appends to the same file.
#[derive(Clone, Debug)]
pub struct RunLog {
    path: PathBuf,
    file: Option<Arc<Mutex<File>>>,
}

impl RunLog {
    /// Open (append) the log file at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Some(Arc::new(Mutex::new(file))),
        })
    }

    /// A log that discards everything, for tests and `--check`.
    pub fn sink() -> Self {
        Self {
            path: PathBuf::new(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw text, e.g. captured tool output.
    pub fn append(&self, text: &str) {
        if let Some(file) = &self.file {
            let mut f = file.lock();
            let _ = f.write_all(text.as_bytes());
            if !text.ends_with('\n') {
                let _ = f.write_all(b"\n");
            }
        }
    }

    /// A second handle on the log file, for wiring a child's stderr straight in.
    pub fn try_clone_file(&self) -> Option<File> {
        self.file.as_ref().and_then(|f| f.lock().try_clone().ok())
    }

    fn write_bytes(&self, buf: &[u8]) {
        if let Some(file) = &self.file {
            let _ = file.lock().write_all(buf);
        }
    }
}

/// Sends every log record to stderr and to the run log.
struct Tee {
    log: RunLog,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.log.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Install the global logger. `RUST_LOG` wins over the default level.
pub fn init_logging(log: &RunLog, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_level),
    )
    .format(|buf, record| {
        writeln!(
            buf,
            "[{} {}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            record.level(),
            record.args()
        )
    })
    .target(env_logger::Target::Pipe(Box::new(Tee { log: log.clone() })))
    .try_init();
}
