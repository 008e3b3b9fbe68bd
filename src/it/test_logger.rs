use {
    log::{Level, LevelFilter, Log, Metadata, Record},
    std::{
        cell::RefCell,
        fmt::Write as FmtWrite,
        fs::File,
        io::Write,
        sync::{
            Once,
            atomic::{AtomicUsize, Ordering},
        },
        time::SystemTime,
    },
};

static LEVEL: AtomicUsize = AtomicUsize::new(Level::Info as usize);
static INSTALL: Once = Once::new();

thread_local! {
    static FILE: RefCell<Option<File>> = const { RefCell::new(None) };
}

pub fn install() {
    INSTALL.call_once(|| {
        log::set_logger(&Logger).unwrap();
        log::set_max_level(LevelFilter::Info);
    });
}

pub fn set_level(level: Level) {
    LEVEL.store(level as usize, Ordering::Relaxed);
    log::set_max_level(level.to_level_filter());
}

/// Redirects the messages logged by this thread into `file`.
pub fn set_file(file: File) {
    FILE.set(Some(file));
}

pub fn unset_file() {
    FILE.set(None);
}

struct Logger;

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() as usize <= LEVEL.load(Ordering::Relaxed)
    }

    fn log(&self, record: &Record) {
        if record.level() as usize > LEVEL.load(Ordering::Relaxed) {
            return;
        }
        let mut buf = String::new();
        let now = SystemTime::now();
        let _ = if let Some(mp) = record.module_path() {
            writeln!(
                buf,
                "[{} {:5} {}] {}",
                humantime::format_rfc3339_millis(now),
                record.level(),
                mp,
                record.args(),
            )
        } else {
            writeln!(
                buf,
                "[{} {:5}] {}",
                humantime::format_rfc3339_millis(now),
                record.level(),
                record.args(),
            )
        };
        FILE.with_borrow_mut(|file| match file {
            Some(f) => {
                let _ = f.write_all(buf.as_bytes());
            }
            None => {
                let _ = std::io::stderr().write_all(buf.as_bytes());
            }
        });
    }

    fn flush(&self) {
        // nothing
    }
}
