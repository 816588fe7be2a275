use std::io::Write;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use tracing_subscriber::fmt::MakeWriter;

/// Writes every formatted line to stdout and fans it out to the SSE log stream.
#[derive(Clone)]
pub(crate) struct SseMakeWriter {
    pub sender: tokio::sync::broadcast::Sender<String>,
}

impl<'a> MakeWriter<'a> for SseMakeWriter {
    type Writer = SseWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SseWriter {
            sender: self.sender.clone(),
        }
    }
}

pub(crate) struct SseWriter {
    sender: tokio::sync::broadcast::Sender<String>,
}

impl Write for SseWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).to_string();
        let _ = self.sender.send(msg); // Ignored if no receivers
        std::io::stdout().write_all(buf)?;
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> {
        std::io::stdout().flush()
    }
}

/// Installs the global subscriber. With a sink, lines are also broadcast.
pub fn init(level: Level, sink: Option<tokio::sync::broadcast::Sender<String>>) {
    let builder = FmtSubscriber::builder().with_max_level(level);
    // A second init (tests, restarts) keeps the first subscriber.
    match sink {
        Some(sender) => {
            let subscriber = builder.with_writer(SseMakeWriter { sender }).finish();
            tracing::subscriber::set_global_default(subscriber).ok();
        }
        None => {
            let subscriber = builder.with_writer(std::io::stdout).finish();
            tracing::subscriber::set_global_default(subscriber).ok();
        }
    }
}
