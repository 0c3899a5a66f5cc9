use tokio::sync::broadcast;
use tracing_subscriber::fmt::MakeWriter;

pub const LOG_CHANNEL_CAPACITY: usize = 256;

/// Tees formatted log lines to stdout and a broadcast channel so the gateway
/// can stream them to `/_membrane/logs`.
#[derive(Clone)]
pub struct BroadcastMakeWriter {
    pub sender: broadcast::Sender<String>,
    pub suppress_stdout: bool,
}

impl<'a> MakeWriter<'a> for BroadcastMakeWriter {
    type Writer = BroadcastWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BroadcastWriter {
            sender: self.sender.clone(),
            suppress_stdout: self.suppress_stdout,
        }
    }
}

pub struct BroadcastWriter {
    sender: broadcast::Sender<String>,
    suppress_stdout: bool,
}

impl std::io::Write for BroadcastWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let msg = String::from_utf8_lossy(buf).trim_end().to_string();
        let _ = self.sender.send(msg); // no subscribers is fine
        if !self.suppress_stdout {
            std::io::stdout().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        if !self.suppress_stdout {
            std::io::stdout().flush()?;
        }
        Ok(())
    }
}

/// Install the global subscriber. Returns the sender log lines are broadcast on.
pub fn init(level: &str) -> anyhow::Result<broadcast::Sender<String>> {
    let (sender, _) = broadcast::channel(LOG_CHANNEL_CAPACITY);
    let level: tracing::Level = level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level '{}'", level))?;

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_ansi(false)
        .with_writer(BroadcastMakeWriter {
            sender: sender.clone(),
            suppress_stdout: false,
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(sender)
}
