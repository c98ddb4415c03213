use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    sync::{Arc, LazyLock},
    time::Duration,
};

use mailfwd_common::{Signal, internal, tracing};
use mailfwd_dispatch::{
    CompiledTable, ConfigError, DeliveryInvoker, DispatchConfig, DispatchError, DispatchOutcome,
    Dispatcher, DomainRules, LogInvoker, ResolvedDelivery, compile,
};
use mailfwd_retry::{
    DeadLetterChannel, DeadLetterEntry, DirectoryPublisher, EntryId, FileDeadLetterChannel,
    RetryConfig, RetryScheduler,
};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::inbox::Inbox;

pub const CONFIG_ENV: &str = "MAILFWD_CONFIG";

const fn default_poll_interval() -> u64 {
    5
}

fn default_inbox() -> PathBuf {
    PathBuf::from("/tmp/mailfwd/inbox")
}

fn default_dead_letter() -> PathBuf {
    PathBuf::from("/tmp/mailfwd/dead-letter")
}

/// Where the file-backed channels live
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Paths {
    /// Directory of notification envelopes waiting to be dispatched
    ///
    /// Default: `/tmp/mailfwd/inbox`
    #[serde(default = "default_inbox")]
    pub inbox: PathBuf,

    /// Directory of the file-backed dead-letter channel
    ///
    /// Default: `/tmp/mailfwd/dead-letter`
    #[serde(default = "default_dead_letter")]
    pub dead_letter: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            dead_letter: default_dead_letter(),
        }
    }
}

/// Top-level configuration, as read from `mailfwd.config.ron`
#[derive(Debug, Deserialize)]
pub struct Mailfwd {
    #[serde(alias = "domain", default)]
    pub domains: DomainRules,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub paths: Paths,
    /// How often `serve` looks for new envelopes in the inbox (in seconds)
    ///
    /// Default: 5 seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// A table written by `mailfwd compile`, used instead of compiling
    /// `domains` at startup
    #[serde(default)]
    pub compiled_table: Option<PathBuf>,
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Resolves on the first CTRL+C or SIGTERM
async fn termination() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "CTRL+C entered, finishing the current pass");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminate signal received, finishing the current pass");
        }
    };

    Ok(())
}

impl Mailfwd {
    /// Parse a RON configuration document
    ///
    /// # Errors
    ///
    /// Fails if the document is not valid RON for this structure.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(ron::from_str(content)?)
    }

    /// Read and parse the configuration at `path`
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
        })?;

        Self::parse(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config {}: {}", path.display(), e))
    }

    /// Compile the authored domain rules into the lookup table
    ///
    /// # Errors
    ///
    /// See [`mailfwd_dispatch::compile`].
    pub fn compile(&self) -> Result<CompiledTable, ConfigError> {
        compile(&self.domains)
    }

    /// The table to dispatch with
    ///
    /// Read from `compiled_table` when it is set, otherwise compiled from
    /// `domains`.
    ///
    /// # Errors
    ///
    /// Fails if the table file cannot be read or parsed, or if the domain
    /// rules do not compile.
    pub fn table(&self) -> anyhow::Result<CompiledTable> {
        let Some(path) = &self.compiled_table else {
            return Ok(self.compile()?);
        };

        if !self.domains.is_empty() {
            tracing::warn!(
                table = %path.display(),
                "Both domains and compiled_table are configured, using compiled_table"
            );
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read compiled table {}: {}", path.display(), e)
        })?;

        ron::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse compiled table {}: {}", path.display(), e))
    }

    /// Load the table and open the file-backed channels
    ///
    /// # Errors
    ///
    /// Fails if the table cannot be loaded or a channel directory cannot be
    /// opened.
    pub async fn init(&self, invoker: Arc<dyn DeliveryInvoker>) -> anyhow::Result<Runtime> {
        let table = self.table()?.into_shared();
        internal!(level = INFO, domains = table.len(), "Loaded domain table");

        let dead_letter: Arc<dyn DeadLetterChannel> = Arc::new(
            FileDeadLetterChannel::open(
                &self.paths.dead_letter,
                self.retry.visibility_timeout(),
                self.retry.retention(),
            )
            .await?,
        );
        let publisher = DirectoryPublisher::open(&self.paths.inbox).await?;

        Ok(Runtime {
            dispatcher: Dispatcher::new(&self.dispatch, table, invoker),
            scheduler: RetryScheduler::new(Arc::clone(&dead_letter), Arc::new(publisher)),
            dead_letter,
            inbox: Inbox::open(&self.paths.inbox).await?,
            retry: self.retry,
            poll_interval: Duration::from_secs(self.poll_interval_secs.max(1)),
        })
    }

    /// Run until CTRL+C or SIGTERM, then let the current pass finish
    ///
    /// # Errors
    ///
    /// Fails if initialisation fails or the signal handlers cannot be
    /// installed.
    pub async fn run(self) -> anyhow::Result<()> {
        let runtime = self.init(Arc::new(LogInvoker)).await?;

        internal!(level = INFO, "Controller running");

        let ret = runtime
            .serve_until(&SHUTDOWN_BROADCAST, termination())
            .await;

        internal!(level = INFO, "Shut down");

        ret
    }
}

/// What happened to one inbound envelope
#[derive(Debug)]
pub enum Disposition {
    Delivered(ResolvedDelivery),
    Dropped { message_id: String, reason: String },
    /// Dispatch failed in a way worth retrying; the envelope was recorded
    DeadLettered(EntryId),
    /// Dispatch failed for good; nothing was recorded
    Rejected(DispatchError),
}

/// Everything needed to process envelopes, built from a [`Mailfwd`]
#[derive(Debug)]
pub struct Runtime {
    dispatcher: Dispatcher,
    dead_letter: Arc<dyn DeadLetterChannel>,
    scheduler: RetryScheduler,
    inbox: Inbox,
    retry: RetryConfig,
    poll_interval: Duration,
}

impl Runtime {
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub fn dead_letter(&self) -> &Arc<dyn DeadLetterChannel> {
        &self.dead_letter
    }

    #[must_use]
    pub const fn inbox(&self) -> &Inbox {
        &self.inbox
    }

    /// Dispatch one envelope, recording it in the dead-letter channel when
    /// the failure is retryable
    ///
    /// # Errors
    ///
    /// Only fails if a retryable failure could not be recorded, in which case
    /// the caller still owns the envelope.
    pub async fn handle(&self, envelope: &str) -> anyhow::Result<Disposition> {
        match self.dispatcher.dispatch(envelope).await {
            Ok(DispatchOutcome::Delivered(delivery)) => Ok(Disposition::Delivered(delivery)),
            Ok(DispatchOutcome::Dropped { message_id, reason }) => {
                Ok(Disposition::Dropped { message_id, reason })
            }
            Err(e) if e.is_retryable() => {
                let entry = DeadLetterEntry::new(envelope, e.to_string());
                let id = entry.id;
                self.dead_letter.send(entry).await?;

                internal!(level = INFO, entry = %id, reason = %e, "Recorded failed dispatch for retry");
                Ok(Disposition::DeadLettered(id))
            }
            Err(e) => Ok(Disposition::Rejected(e)),
        }
    }

    /// Run the retry scheduler once
    ///
    /// # Errors
    ///
    /// Fails if the dead-letter channel cannot be read.
    pub async fn retry(&self, max_batch: Option<usize>) -> anyhow::Result<usize> {
        Ok(self
            .scheduler
            .drain(max_batch.unwrap_or(self.retry.max_batch))
            .await?)
    }

    /// Dispatch every envelope currently in the inbox, returning how many
    /// were consumed
    ///
    /// An envelope stays in the inbox if it cannot be read or its outcome
    /// could not be recorded; the rest of the pass carries on.
    ///
    /// # Errors
    ///
    /// Fails if the inbox directory cannot be listed.
    pub async fn process_inbox(&self) -> anyhow::Result<usize> {
        let mut consumed = 0;

        for item in self.inbox.pending().await? {
            let envelope = match self.inbox.read(&item).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(file = %item.display(), error = %e, "Could not read envelope, skipping");
                    continue;
                }
            };

            match self.handle(&envelope).await {
                Ok(disposition) => {
                    if let Disposition::Rejected(e) = &disposition {
                        tracing::warn!(file = %item.display(), error = %e, "Discarding envelope");
                    }
                    consumed += 1;
                    if let Err(e) = self.inbox.remove(&item).await {
                        tracing::error!(file = %item.display(), error = %e, "Could not remove consumed envelope");
                    }
                }
                Err(e) => {
                    tracing::error!(file = %item.display(), error = %e, "Could not record failed dispatch, keeping envelope");
                }
            }
        }

        Ok(consumed)
    }

    async fn poll_inbox(&self, mut shutdown: broadcast::Receiver<Signal>) {
        internal!(level = INFO, inbox = %self.inbox.path().display(), "Watching inbox");

        let mut timer = tokio::time::interval(self.poll_interval);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match self.process_inbox().await {
                        Ok(0) => {}
                        Ok(count) => tracing::info!(count, "Processed inbox"),
                        Err(e) => tracing::error!("Error processing inbox: {e}"),
                    }
                }
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) => {
                            internal!(level = INFO, "Inbox watcher received shutdown signal");
                        }
                        Err(e) => tracing::error!("Inbox watcher shutdown channel error: {e}"),
                    }
                    break;
                }
            }
        }
    }

    /// Process the inbox and drain the dead-letter channel periodically until
    /// a shutdown signal is received
    pub async fn serve(&self, shutdown: broadcast::Receiver<Signal>) {
        tokio::join!(
            self.scheduler.serve(&self.retry, shutdown.resubscribe()),
            self.poll_inbox(shutdown),
        );
    }

    /// Serve until `stop` resolves, then broadcast [`Signal::Shutdown`] on
    /// `signals` and wait for the in-flight pass to finish
    ///
    /// # Errors
    ///
    /// Whatever `stop` fails with. The loops are still stopped.
    pub async fn serve_until<F>(
        &self,
        signals: &broadcast::Sender<Signal>,
        stop: F,
    ) -> anyhow::Result<()>
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        let serving = self.serve(signals.subscribe());
        tokio::pin!(serving);

        let ret = tokio::select! {
            () = &mut serving => return Ok(()),
            r = stop => r,
        };

        if signals.send(Signal::Shutdown).is_err() {
            tracing::debug!("Serve loops already stopped");
        }
        serving.await;

        ret
    }
}

/// Find the configuration file using the following precedence:
/// 1. An explicitly given path
/// 2. `MAILFWD_CONFIG` environment variable
/// 3. ./mailfwd.config.ron (current working directory)
/// 4. /etc/mailfwd/mailfwd.config.ron (system-wide config)
///
/// # Errors
///
/// Fails if the chosen path does not exist, or if none of the defaults do.
pub fn find_config_file(explicit: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    locate_config(
        explicit,
        std::env::var_os(CONFIG_ENV),
        &[
            PathBuf::from("./mailfwd.config.ron"),
            PathBuf::from("/etc/mailfwd/mailfwd.config.ron"),
        ],
    )
}

fn locate_config(
    explicit: Option<PathBuf>,
    env: Option<OsString>,
    default_paths: &[PathBuf],
) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!("Config file does not exist: {}", path.display());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}"
    )
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Mailfwd::parse("()").unwrap();
        assert!(config.domains.is_empty());
        assert_eq!(config.dispatch, DispatchConfig::default());
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.paths, Paths::default());
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.compiled_table, None);
    }

    #[test]
    fn test_table_prefers_compiled_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.ron");

        let authored = Mailfwd::parse(include_str!("../../mailfwd.config.ron")).unwrap();
        let table = authored.compile().unwrap();
        std::fs::write(&path, ron::to_string(&table).unwrap()).unwrap();

        let config = Mailfwd::parse(&format!(
            r#"(
                domains: {{ "other.org": (fallback_addresses: ["x@gmail.com"]) }},
                compiled_table: Some("{}"),
            )"#,
            path.display()
        ))
        .unwrap();

        assert_eq!(config.table().unwrap(), table);
        assert!(config.table().unwrap().get("other.org/").is_none());
    }

    #[test]
    fn test_table_reports_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ron");
        let garbled = dir.path().join("garbled.ron");
        std::fs::write(&garbled, "{ not a table").unwrap();

        let config = Mailfwd::parse(&format!(r#"(compiled_table: Some("{}"))"#, missing.display())).unwrap();
        let err = config.table().unwrap_err();
        assert!(err.to_string().contains("Failed to read compiled table"));

        let config = Mailfwd::parse(&format!(r#"(compiled_table: Some("{}"))"#, garbled.display())).unwrap();
        let err = config.table().unwrap_err();
        assert!(err.to_string().contains("Failed to parse compiled table"));
    }

    #[test]
    fn test_config_sections() {
        let config = Mailfwd::parse(
            r#"(
                domains: {
                    "example.com": (
                        aliases: {
                            "info": (destinations: ["owner@gmail.com"]),
                        },
                        fallback_addresses: ["catchall@gmail.com"],
                    ),
                },
                dispatch: (spam_policy: DropBeforeDispatch, delivery_timeout_secs: 10),
                retry: (max_batch: 25),
                paths: (inbox: "/srv/inbox"),
            )"#,
        )
        .unwrap();

        assert_eq!(config.domains.len(), 1);
        assert_eq!(config.dispatch.delivery_timeout_secs, 10);
        assert_eq!(config.dispatch.expected_source, "aws:sns");
        assert_eq!(config.retry.max_batch, 25);
        assert_eq!(config.retry.interval_secs, 300);
        assert_eq!(config.paths.inbox, PathBuf::from("/srv/inbox"));
        assert_eq!(config.paths.dead_letter, default_dead_letter());

        let table = config.compile().unwrap();
        assert!(table.get("example.com/").is_some());
    }

    #[test]
    fn test_shipped_config_compiles() {
        let config = Mailfwd::parse(include_str!("../../mailfwd.config.ron")).unwrap();
        let table = config.compile().unwrap();

        assert_eq!(table.len(), 2);
        assert!(table.get("archive.example.net/").is_none());
        assert_eq!(
            config.dispatch.spam_policy,
            mailfwd_dispatch::SpamPolicy::DropBeforeDispatch
        );
    }

    #[test]
    fn test_locate_config_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.ron");
        let from_env = dir.path().join("env.ron");
        let default = dir.path().join("default.ron");
        for path in [&explicit, &from_env, &default] {
            std::fs::write(path, "()").unwrap();
        }
        let defaults = [dir.path().join("missing.ron"), default.clone()];

        assert_eq!(
            locate_config(Some(explicit.clone()), Some(from_env.clone().into()), &defaults).unwrap(),
            explicit
        );
        assert_eq!(
            locate_config(None, Some(from_env.clone().into()), &defaults).unwrap(),
            from_env
        );
        assert_eq!(locate_config(None, None, &defaults).unwrap(), default);
    }

    #[test]
    fn test_locate_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.ron");

        let err = locate_config(None, Some(missing.clone().into()), &[]).unwrap_err();
        assert!(err.to_string().contains("MAILFWD_CONFIG points to non-existent file"));

        let err = locate_config(None, None, &[missing]).unwrap_err();
        assert!(err.to_string().contains("No configuration file found"));
    }
}
