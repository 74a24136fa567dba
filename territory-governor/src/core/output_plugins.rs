/*!
Modular output system for delivering capture and zone lock events downstream
*/

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{error, info, warn};

use territory_database::tables::{
    region::RegionOwnership, schema::initialize_schema, zone::ZoneLockRow,
};

use crate::core::{
    config::{OutputConfig, OutputPlugin, TerminalFormat},
    error::GovernorError,
    events::{AvailabilityEvent, CaptureEvent, OutputEvent, ZoneLockEvent},
    outbound::RetryPolicy,
};

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Trait for output plugins
#[async_trait]
pub trait OutputHandler: Send {
    /// Name of the output handler
    fn name(&self) -> &'static str;

    /// Initialize the output handler (create files, connections, etc.)
    async fn initialize(&mut self) -> Result<(), HandlerError>;

    /// Handle one event; must be safe to call again with the same event
    async fn handle_event(&mut self, event: &OutputEvent) -> Result<(), HandlerError>;

    /// Cleanup/finalize the output handler
    async fn finalize(&mut self) -> Result<(), HandlerError>;
}

/// Manages multiple output handlers
pub struct OutputManager {
    handlers: Vec<Box<dyn OutputHandler>>,
}

impl OutputManager {
    pub fn new(configs: &[OutputConfig]) -> Result<Self, HandlerError> {
        let mut handlers: Vec<Box<dyn OutputHandler>> = Vec::new();

        for config in configs {
            if !config.enabled {
                continue;
            }

            let handler: Box<dyn OutputHandler> = match &config.plugin {
                OutputPlugin::Sqlite { path } => Box::new(SqliteOutputHandler::new(path.clone())),
                OutputPlugin::Json { path, pretty } => {
                    Box::new(JsonOutputHandler::new(path.clone(), *pretty))
                }
                OutputPlugin::Webhook { url, auth_token } => {
                    Box::new(WebhookOutputHandler::new(url.clone(), auth_token.clone()))
                }
                OutputPlugin::Terminal { format } => Box::new(TerminalOutputHandler::new(*format)),
            };

            handlers.push(handler);
        }

        info!("Initialized output manager with {} handlers", handlers.len());
        Ok(Self { handlers })
    }

    /// Build a manager around handlers constructed elsewhere
    pub fn with_handlers(handlers: Vec<Box<dyn OutputHandler>>) -> Self {
        Self { handlers }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Initialize all handlers
    pub async fn initialize(&mut self) -> Result<(), HandlerError> {
        for handler in &mut self.handlers {
            handler.initialize().await?;
            info!("Initialized output handler: {}", handler.name());
        }
        Ok(())
    }

    /// Send an event to every handler, retrying each one independently.
    ///
    /// Returns the handlers that gave up.
    pub async fn deliver(&mut self, event: &OutputEvent, policy: RetryPolicy) -> Vec<GovernorError> {
        let mut failures = Vec::new();
        let attempts = policy.max_attempts.max(1);

        for handler in &mut self.handlers {
            let mut attempt = 1;
            loop {
                match handler.handle_event(event).await {
                    Ok(()) => break,
                    Err(e) if attempt < attempts => {
                        warn!(
                            "Handler {} failed (attempt {}/{}): {}",
                            handler.name(),
                            attempt,
                            attempts,
                            e
                        );
                        tokio::time::sleep(policy.backoff * attempt).await;
                        attempt += 1;
                    }
                    Err(e) => {
                        let failure = GovernorError::SinkDeliveryFailure {
                            sink: handler.name(),
                            attempts,
                            reason: e.to_string(),
                        };
                        error!(world_id = event.world_id(), "{}; event dropped", failure);
                        failures.push(failure);
                        break;
                    }
                }
            }
        }
        failures
    }

    /// Finalize all handlers
    pub async fn finalize(&mut self) -> Result<(), HandlerError> {
        for handler in &mut self.handlers {
            handler.finalize().await?;
        }
        Ok(())
    }
}

/// Upserts ownership and lock rows into the territory database
pub struct SqliteOutputHandler {
    file_path: PathBuf,
    conn: Option<Connection>,
}

impl SqliteOutputHandler {
    pub fn new(file_path: PathBuf) -> Self {
        Self {
            file_path,
            conn: None,
        }
    }

    /// Captures are only accepted for enabled regions
    fn ownership_row(event: &CaptureEvent) -> RegionOwnership {
        RegionOwnership {
            region_id: event.region_id,
            world_id: event.world_id,
            enabled: true,
            owner: event.new_faction,
            outfit_id: event.outfit_id,
            owned_since: Some(event.capture_time),
            last_capture_time: event.last_capture_time,
        }
    }

    fn lock_row(event: &ZoneLockEvent) -> ZoneLockRow {
        ZoneLockRow {
            zone_id: event.zone_id,
            world_id: event.world_id,
            locked_by: event.faction,
            updated_at: event.timestamp,
        }
    }
}

#[async_trait]
impl OutputHandler for SqliteOutputHandler {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    async fn initialize(&mut self) -> Result<(), HandlerError> {
        let conn = Connection::open(&self.file_path)?;
        initialize_schema(&conn)?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn handle_event(&mut self, event: &OutputEvent) -> Result<(), HandlerError> {
        let Some(conn) = &self.conn else {
            return Err("SQLite output used before initialization".into());
        };
        match event {
            OutputEvent::Capture(capture) => Self::ownership_row(capture).upsert(conn)?,
            OutputEvent::ZoneLock(lock) => Self::lock_row(lock).upsert(conn)?,
            OutputEvent::Availability(AvailabilityEvent {
                region_id,
                world_id,
                enabled,
                ..
            }) => RegionOwnership::upsert_enabled(conn, *region_id, *world_id, *enabled)?,
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), HandlerError> {
        // SQLite auto-commits, no special finalization needed
        self.conn = None;
        Ok(())
    }
}

/// Newline-delimited JSON file output handler
pub struct JsonOutputHandler {
    file_path: PathBuf,
    pretty: bool,
    file: Option<std::fs::File>,
}

impl JsonOutputHandler {
    pub fn new(file_path: PathBuf, pretty: bool) -> Self {
        Self {
            file_path,
            pretty,
            file: None,
        }
    }
}

#[async_trait]
impl OutputHandler for JsonOutputHandler {
    fn name(&self) -> &'static str {
        "JSON"
    }

    async fn initialize(&mut self) -> Result<(), HandlerError> {
        if let Some(parent) = self.file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        self.file = Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.file_path)?,
        );
        Ok(())
    }

    async fn handle_event(&mut self, event: &OutputEvent) -> Result<(), HandlerError> {
        if let Some(ref mut file) = self.file {
            let json_str = if self.pretty {
                serde_json::to_string_pretty(event)?
            } else {
                serde_json::to_string(event)?
            };

            writeln!(file, "{}", json_str)?;
            file.flush()?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), HandlerError> {
        if let Some(ref mut file) = self.file {
            file.flush()?;
        }
        Ok(())
    }
}

/// Webhook output handler
pub struct WebhookOutputHandler {
    url: String,
    auth_token: Option<String>,
    client: reqwest::Client,
}

impl WebhookOutputHandler {
    pub fn new(url: String, auth_token: Option<String>) -> Self {
        Self {
            url,
            auth_token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl OutputHandler for WebhookOutputHandler {
    fn name(&self) -> &'static str {
        "Webhook"
    }

    async fn initialize(&mut self) -> Result<(), HandlerError> {
        reqwest::Url::parse(&self.url)?;
        Ok(())
    }

    async fn handle_event(&mut self, event: &OutputEvent) -> Result<(), HandlerError> {
        let mut request = self.client.post(&self.url);

        if let Some(ref token) = self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.json(event).send().await?;

        if !response.status().is_success() {
            return Err(format!("Webhook delivery failed: {}", response.status()).into());
        }

        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}

/// Terminal output handler
pub struct TerminalOutputHandler {
    format: TerminalFormat,
}

impl TerminalOutputHandler {
    pub fn new(format: TerminalFormat) -> Self {
        Self { format }
    }

    fn format_event(&self, event: &OutputEvent) -> String {
        match (self.format, event) {
            (TerminalFormat::Json, event) => serde_json::to_string(event)
                .unwrap_or_else(|_| "JSON serialization failed".to_string()),
            (TerminalFormat::Plain, OutputEvent::Capture(c)) => format!(
                "CAPTURE world {} region {}: {} -> {} at {}{}",
                c.world_id,
                c.region_id,
                c.old_faction,
                c.new_faction,
                c.capture_time.format("%Y-%m-%d %H:%M:%S"),
                if c.approximate { " (approx.)" } else { "" },
            ),
            (TerminalFormat::Plain, OutputEvent::ZoneLock(z)) => format!(
                "ZONE world {} zone {}: {}",
                z.world_id,
                z.zone_id,
                lock_label(z),
            ),
            (TerminalFormat::Colored, OutputEvent::Capture(c)) => format!(
                "\x1b[36m⚑ CAPTURE\x1b[0m world {} region {}: \x1b[31m{}\x1b[0m -> \x1b[32m{}\x1b[0m at {}{}",
                c.world_id,
                c.region_id,
                c.old_faction,
                c.new_faction,
                c.capture_time.format("%Y-%m-%d %H:%M:%S"),
                if c.approximate { " \x1b[33m(approx.)\x1b[0m" } else { "" },
            ),
            (TerminalFormat::Colored, OutputEvent::ZoneLock(z)) => format!(
                "\x1b[35m🔒 ZONE\x1b[0m world {} zone {}: {}",
                z.world_id,
                z.zone_id,
                lock_label(z),
            ),
            (TerminalFormat::Plain, OutputEvent::Availability(a)) => format!(
                "REGION world {} region {}: {}",
                a.world_id,
                a.region_id,
                if a.enabled { "enabled" } else { "disabled" },
            ),
            (TerminalFormat::Colored, OutputEvent::Availability(a)) => format!(
                "\x1b[33m◌ REGION\x1b[0m world {} region {}: {}",
                a.world_id,
                a.region_id,
                if a.enabled { "enabled" } else { "disabled" },
            ),
        }
    }
}

fn lock_label(event: &ZoneLockEvent) -> String {
    match event.faction {
        Some(faction) if event.locked => format!("locked by {faction}"),
        _ => "unlocked".to_string(),
    }
}

#[async_trait]
impl OutputHandler for TerminalOutputHandler {
    fn name(&self) -> &'static str {
        "Terminal"
    }

    async fn initialize(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle_event(&mut self, event: &OutputEvent) -> Result<(), HandlerError> {
        println!("{}", self.format_event(event));
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use territory_database::{Faction, tables::region::RegionOwnership};

    use super::*;
    use crate::core::signal::SourceKind;

    fn capture() -> OutputEvent {
        OutputEvent::Capture(CaptureEvent {
            region_id: 10,
            world_id: 1,
            zone_id: 2,
            old_faction: Faction::Vs,
            new_faction: Faction::Tr,
            outfit_id: Some(9),
            capture_time: Utc.timestamp_opt(1_000, 0).unwrap(),
            approximate: false,
            last_capture_time: Some(Utc.timestamp_opt(1_000, 0).unwrap()),
            source: SourceKind::PrimaryStream,
            accepted_at: Utc::now(),
        })
    }

    /// Fails a fixed number of times before succeeding
    struct Flaky {
        failures_left: u32,
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl OutputHandler for Flaky {
        fn name(&self) -> &'static str {
            "Flaky"
        }

        async fn initialize(&mut self) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn handle_event(&mut self, _event: &OutputEvent) -> Result<(), HandlerError> {
            *self.calls.lock().unwrap() += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err("sink unreachable".into());
            }
            Ok(())
        }

        async fn finalize(&mut self) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = Arc::new(Mutex::new(0));
        let mut manager = OutputManager::with_handlers(vec![Box::new(Flaky {
            failures_left: 2,
            calls: calls.clone(),
        })]);

        let failures = manager.deliver(&capture(), policy(3)).await;
        assert!(failures.is_empty());
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(Mutex::new(0));
        let mut manager = OutputManager::with_handlers(vec![Box::new(Flaky {
            failures_left: 10,
            calls: calls.clone(),
        })]);

        let failures = manager.deliver(&capture(), policy(2)).await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            failures[0],
            GovernorError::SinkDeliveryFailure { attempts: 2, .. }
        ));
        assert_eq!(*calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn sqlite_output_upserts_idempotently() {
        let path = std::env::temp_dir().join(format!(
            "territory-governor-sink-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let mut handler = SqliteOutputHandler::new(path.clone());
        handler.initialize().await.unwrap();
        handler.handle_event(&capture()).await.unwrap();
        handler.handle_event(&capture()).await.unwrap();
        handler.finalize().await.unwrap();

        let conn = Connection::open(&path).unwrap();
        let rows = RegionOwnership::load_world(&conn, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[&10].owner, Faction::Tr);
        assert_eq!(rows[&10].outfit_id, Some(9));

        drop(conn);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn sqlite_output_persists_availability() {
        let path = std::env::temp_dir().join(format!(
            "territory-governor-availability-{}.db",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);

        let disabled = OutputEvent::Availability(AvailabilityEvent {
            region_id: 10,
            world_id: 1,
            zone_id: 2,
            enabled: false,
            timestamp: Utc::now(),
        });
        let mut handler = SqliteOutputHandler::new(path.clone());
        handler.initialize().await.unwrap();
        handler.handle_event(&capture()).await.unwrap();
        handler.handle_event(&disabled).await.unwrap();
        handler.finalize().await.unwrap();

        let conn = Connection::open(&path).unwrap();
        let rows = RegionOwnership::load_world(&conn, 1).unwrap();
        assert!(!rows[&10].enabled);
        assert_eq!(rows[&10].owner, Faction::Tr);

        drop(conn);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn plain_terminal_format_marks_approximate_times() {
        let handler = TerminalOutputHandler::new(TerminalFormat::Plain);
        let mut event = capture();
        if let OutputEvent::Capture(ref mut c) = event {
            c.approximate = true;
        }
        let line = handler.format_event(&event);
        assert!(line.contains("VS -> TR"));
        assert!(line.ends_with("(approx.)"));
    }
}
