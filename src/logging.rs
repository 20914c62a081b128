//! Logging backend which logs to a file in the loader's data directory, and over UDP in debug
//! builds.

use chrono::Local;
use log::{Level, Metadata, Record};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::Write,
    path::{Path, PathBuf},
    sync::Mutex,
};

/// Where debug builds mirror log messages to, for viewing off-device.
#[cfg(feature = "debug")]
const UDP_LOG_ADDR: &str = "127.0.0.1:4568";

#[derive(Clone, Copy, Serialize, Deserialize)]
enum MessageType {
    Normal,
    Error,
    Warning,
    Debug,
}

#[derive(Serialize, Deserialize)]
struct Message {
    module: String,
    msg_type: MessageType,
    string: String,
    time: String,
}

impl Message {
    #[cfg(feature = "debug")]
    fn pack(&self) -> Option<Vec<u8>> {
        let serialized = bincode::serialize::<Message>(self).ok()?;

        let mut len_bytes = Vec::from(u32::to_le_bytes((serialized.len() as u32) + 4));
        len_bytes.extend(&serialized);

        Some(len_bytes)
    }

    fn write_to_file(&self, file: &mut File) {
        let level_name = match self.msg_type {
            MessageType::Normal => "info",
            MessageType::Error => "error",
            MessageType::Warning => "warning",
            MessageType::Debug => "debug",
        };

        //      [date time] [module] [level] Text
        let _ = file.write_fmt(format_args!(
            "[{}] [{}] [{}] {}\n",
            self.time, self.module, level_name, self.string
        ));
    }
}

pub struct Logger;

impl Logger {
    fn commit(&self, record: &log::Record) {
        let msg_type = match record.level() {
            Level::Error => MessageType::Error,
            Level::Warn => MessageType::Warning,
            Level::Info => MessageType::Normal,
            Level::Debug | Level::Trace => MessageType::Debug,
        };

        // The HTTP stack is chatty and none of it is ours.
        let module_path = match record.module_path() {
            Some(path) if path.contains("mio::") || path.contains("hyper") => return,
            Some(path) if path.contains("reqwest") || path.contains("want") => return,
            Some(path) => path,
            None => return,
        };

        let message = Message {
            module: module_path
                .split("::")
                .last()
                .unwrap_or("unknown")
                .to_string(),
            msg_type,
            string: format!("{}", record.args()),
            time: Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        };

        if let Some(sender) = MSG_SENDER.get() {
            if let Ok(sender) = sender.lock() {
                let _ = sender.send(message);
            }
        }
    }
}

impl log::Log for Logger {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.commit(record);
        }
    }

    fn flush(&self) {}
}

static LOGGER: Logger = Logger;

static MSG_SENDER: OnceCell<Mutex<std::sync::mpsc::Sender<Message>>> = OnceCell::new();

static PANIC_REPORT_PATH: OnceCell<PathBuf> = OnceCell::new();

fn panic_hook(info: &std::panic::PanicInfo) {
    let backtrace = std::backtrace::Backtrace::force_capture();

    let info_dump = format!(
        "Loader panic. The host process is left running; whatever feature panicked is dead for \
         this launch.

{info}
Time: {}
Backtrace:
{backtrace}",
        Local::now()
    );

    log::error!("{info_dump}");

    if let Some(path) = PANIC_REPORT_PATH.get() {
        let _ = std::fs::write(path, info_dump);
    }
}

/// Starts the logging backend, writing into `dir`. Safe to call more than once; only the first
/// call does anything. Unlike a standalone program we never abort on panic, because the process
/// we would be aborting belongs to the host.
pub fn init(dir: &Path) {
    if MSG_SENDER.get().is_some() {
        return;
    }

    let _ = PANIC_REPORT_PATH.set(dir.join("panic.txt"));
    std::panic::set_hook(Box::new(panic_hook));

    if log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::max()))
        .is_err()
    {
        // Someone else owns the global logger (tests, usually). Their backend gets our
        // messages instead; nothing more to set up.
        return;
    }

    let mut file = match File::create(dir.join("burrow.log")) {
        Ok(file) => file,
        Err(_) => return,
    };

    let (sender, receiver) = std::sync::mpsc::channel();

    if MSG_SENDER.set(Mutex::new(sender)).is_err() {
        return;
    }

    #[cfg(feature = "debug")]
    let socket = std::net::UdpSocket::bind("0.0.0.0:0").ok();

    // Writing on a background thread keeps file/socket I/O out of the host's hook paths.
    std::thread::spawn(move || loop {
        let message = match receiver.recv() {
            Ok(message) => message,
            Err(_) => return,
        };

        message.write_to_file(&mut file);

        #[cfg(feature = "debug")]
        if let Some(socket) = &socket {
            if let Some(bin) = message.pack() {
                let _ = socket.send_to(&bin, UDP_LOG_ADDR);
            }
        }
    });
}
