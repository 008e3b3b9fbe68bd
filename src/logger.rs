use {
    crate::utils::errorfmt::ErrorFmt,
    backtrace::Backtrace,
    log::{Level, Log, Metadata, Record},
    parking_lot::Mutex,
    std::{
        cell::RefCell,
        fs::{DirBuilder, OpenOptions},
        io::{self, ErrorKind, Write},
        os::unix::fs::DirBuilderExt,
        path::{Path, PathBuf},
        sync::{
            Arc,
            atomic::{AtomicU32, Ordering::Relaxed},
        },
        time::SystemTime,
    },
};

thread_local! {
    static BUFFER: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

pub struct Logger {
    level: AtomicU32,
    path: Option<PathBuf>,
    sink: Mutex<Box<dyn Write + Send>>,
}

impl Logger {
    pub fn install_stderr(level: Level) -> Arc<Self> {
        Self::install(level, None, Box::new(io::stderr()))
    }

    /// Logs into a new file in the data directory and logs panics with a backtrace.
    pub fn install_file(level: Level) -> Arc<Self> {
        let log_dir = create_log_dir();
        let (path, file) = 'file: {
            for i in 0.. {
                let path = log_dir.join(format!(
                    "dpyctl-{}-{}.txt",
                    humantime::format_rfc3339_millis(SystemTime::now()),
                    i,
                ));
                match OpenOptions::new().write(true).create_new(true).open(&path) {
                    Ok(f) => break 'file (path, f),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                    Err(e) => fatal!("Error: Could not create log file: {}", ErrorFmt(e)),
                }
            }
            unreachable!();
        };
        std::panic::set_hook(Box::new(|p| {
            if let Some(loc) = p.location() {
                log::error!(
                    "Panic at {} line {} column {}",
                    loc.file(),
                    loc.line(),
                    loc.column()
                );
            } else {
                log::error!("Panic at unknown location");
            }
            if let Some(msg) = p.payload().downcast_ref::<&str>() {
                log::error!("Message: {}", msg);
            }
            if let Some(msg) = p.payload().downcast_ref::<String>() {
                log::error!("Message: {}", msg);
            }
            log::error!("Backtrace:\n{:?}", Backtrace::new());
        }));
        Self::install(level, Some(path), Box::new(file))
    }

    fn install(level: Level, path: Option<PathBuf>, sink: Box<dyn Write + Send>) -> Arc<Self> {
        let slf = Arc::new(Self {
            level: AtomicU32::new(level as _),
            path,
            sink: Mutex::new(sink),
        });
        let res = log::set_boxed_logger(Box::new(LogWrapper {
            logger: slf.clone(),
        }));
        if let Err(e) = res {
            eprintln!("Error: Could not install the logger: {}", e);
        }
        log::set_max_level(level.to_level_filter());
        slf
    }

    pub fn set_level(&self, level: Level) {
        self.level.store(level as _, Relaxed);
        log::set_max_level(level.to_level_filter());
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn create_log_dir() -> PathBuf {
    let mut log_dir = match dirs::data_local_dir() {
        Some(d) => d,
        None => fatal!("Error: $HOME is not set"),
    };
    log_dir.push("dpyctl");
    let res = DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(&log_dir);
    if let Err(e) = res {
        fatal!(
            "Error: Could not create log directory {}: {}",
            log_dir.display(),
            ErrorFmt(e)
        );
    }
    log_dir
}

struct LogWrapper {
    logger: Arc<Logger>,
}

impl Log for LogWrapper {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() as u32 <= self.logger.level.load(Relaxed)
    }

    fn log(&self, record: &Record) {
        if record.level() as u32 > self.logger.level.load(Relaxed) {
            return;
        }
        BUFFER.with_borrow_mut(|buffer| {
            buffer.clear();
            let now = SystemTime::now();
            let _ = if let Some(mp) = record.module_path() {
                writeln!(
                    buffer,
                    "[{} {:5} {}] {}",
                    humantime::format_rfc3339_millis(now),
                    record.level(),
                    mp,
                    record.args(),
                )
            } else {
                writeln!(
                    buffer,
                    "[{} {:5}] {}",
                    humantime::format_rfc3339_millis(now),
                    record.level(),
                    record.args(),
                )
            };
            let _ = self.logger.sink.lock().write_all(buffer);
        });
    }

    fn flush(&self) {
        let _ = self.logger.sink.lock().flush();
    }
}

