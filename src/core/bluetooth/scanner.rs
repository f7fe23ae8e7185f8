//! Bluetooth scanning for Hublink nodes
//! This module runs time-boxed scan sessions and feeds matching advertisements
//! to the session event loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{BoxStream, StreamExt};
use log::{debug, error, info};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::scanner_config::ScannerConfig;
use crate::core::bluetooth::constants::UUID_HUBLINK_SERVICE;
use crate::core::bluetooth::events::SessionEvent;
use crate::core::bluetooth::radio::{Radio, RadioHolder, RadioLease};
use crate::core::bluetooth::registry::{DeviceRegistry, Upsert};
use crate::core::bluetooth::types::{Advertisement, Discovery, ScanSession};
use crate::error::{SessionError, SessionResult};
use crate::logging::ActivityLog;

#[derive(Debug, Default)]
struct ScanState {
    current: Option<ScanSession>,
}

impl ScanState {
    /// Marks session `id` as ended. Returns false if it was not the active one.
    fn finish(&mut self, id: u64) -> bool {
        match self.current.as_mut() {
            Some(session) if session.id == id && session.active => {
                session.active = false;
                session.ended_at = Some(Utc::now());
                true
            }
            _ => false,
        }
    }
}

struct ScanTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs time-boxed discovery sessions against the radio.
pub struct BluetoothScanner {
    radio: Radio,
    registry: Arc<DeviceRegistry>,
    activity: Arc<ActivityLog>,
    events: mpsc::UnboundedSender<SessionEvent>,
    config: ScannerConfig,
    state: Arc<Mutex<ScanState>>,
    task: AsyncMutex<Option<ScanTask>>,
    next_session_id: AtomicU64,
}

impl BluetoothScanner {
    pub fn new(
        radio: Radio,
        registry: Arc<DeviceRegistry>,
        activity: Arc<ActivityLog>,
        events: mpsc::UnboundedSender<SessionEvent>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            radio,
            registry,
            activity,
            events,
            config,
            state: Arc::new(Mutex::new(ScanState::default())),
            task: AsyncMutex::new(None),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.current_session().is_some_and(|s| s.active)
    }

    /// The running session, or the last one if none is running.
    pub fn current_session(&self) -> Option<ScanSession> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current
            .clone()
    }

    /// Starts a scan session.
    ///
    /// A blank filter falls back to the configured one; a missing duration
    /// falls back to the configured scan duration.
    pub async fn start_scan(
        &self,
        name_filter: Option<&str>,
        duration: Option<Duration>,
    ) -> SessionResult<ScanSession> {
        let mut task = self.task.lock().await;
        if self.is_scanning() {
            return Err(SessionError::AlreadyScanning);
        }
        if let Some(finished) = task.take() {
            finished.cancel.cancel();
            let _ = finished.handle.await;
        }

        let name_filter = name_filter
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .unwrap_or(&self.config.name_filter)
            .to_string();
        let duration = duration.unwrap_or_else(|| self.config.scan_duration());

        let lease = self.radio.try_acquire(RadioHolder::Scanner)?;
        let scan_stream = lease
            .scan(&[UUID_HUBLINK_SERVICE])
            .await
            .map_err(|e| SessionError::AdapterUnavailable(e.to_string()))?;

        let session = ScanSession {
            id: self.next_session_id.fetch_add(1, Ordering::SeqCst),
            name_filter,
            started_at: Utc::now(),
            active: true,
            ended_at: None,
        };
        self.state.lock().unwrap_or_else(PoisonError::into_inner).current = Some(session.clone());

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Self::internal_scan_task(
            lease,
            scan_stream,
            session.clone(),
            duration,
            cancel.clone(),
            self.events.clone(),
            self.state.clone(),
            self.activity.clone(),
        ));
        *task = Some(ScanTask { cancel, handle });

        self.activity.info(
            format!(
                "Scan started (filter: '{}', {}s)",
                session.name_filter,
                duration.as_secs()
            ),
            None,
        );
        Ok(session)
    }

    #[allow(clippy::too_many_arguments)]
    async fn internal_scan_task(
        lease: RadioLease,
        mut scan_stream: BoxStream<'static, Advertisement>,
        session: ScanSession,
        duration: Duration,
        cancel_token: CancellationToken,
        events: mpsc::UnboundedSender<SessionEvent>,
        state: Arc<Mutex<ScanState>>,
        activity: Arc<ActivityLog>,
    ) {
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut expired = false;

        loop {
            tokio::select! {
                next = scan_stream.next() => {
                    let Some(advertisement) = next else {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    };
                    if !session.matches(&advertisement, &UUID_HUBLINK_SERVICE) {
                        debug!(
                            "No match for filter '{}': {:?} ({})",
                            session.name_filter, advertisement.name, advertisement.address
                        );
                        continue;
                    }
                    let event = SessionEvent::Advertisement { session_id: session.id, advertisement };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                _ = &mut deadline => {
                    expired = true;
                    break;
                }
                _ = cancel_token.cancelled() => break,
            }
        }

        // Dropping the stream ends the radio scan before the adapter is released.
        drop(scan_stream);
        drop(lease);

        let finished = state.lock().unwrap_or_else(PoisonError::into_inner).finish(session.id);
        if finished && expired {
            activity.info(format!("Scan completed after {}s", duration.as_secs()), None);
        }
    }

    /// Stops the running session. Stopping an idle scanner is not an error.
    pub async fn stop_scan(&self) -> SessionResult<()> {
        let mut task = self.task.lock().await;
        let running = task.take();
        let session_id = self.current_session().filter(|s| s.active).map(|s| s.id);

        if let Some(ScanTask { cancel, handle }) = running {
            info!("Stopping Bluetooth scan.");
            cancel.cancel();
            if let Err(e) = handle.await {
                if e.is_cancelled() {
                    info!("Scan task was cancelled successfully.");
                } else {
                    error!("Scan task finished with an unexpected join error: {:?}", e);
                }
            }
        }

        if let Some(id) = session_id {
            self.state.lock().unwrap_or_else(PoisonError::into_inner).finish(id);
            self.activity.info("Scan stopped", None);
        }
        Ok(())
    }

    /// Applies one matching advertisement to the registry.
    pub fn ingest(&self, advertisement: &Advertisement) -> Upsert {
        let discovery = Discovery::from_advertisement(advertisement, Utc::now());
        let name = discovery.name.clone();
        let outcome = self.registry.upsert(&advertisement.address, discovery);
        if outcome == Upsert::Inserted {
            self.activity.success(
                format!("Discovered {} (RSSI {} dBm)", name, advertisement.rssi.unwrap_or(0)),
                Some(&advertisement.address),
            );
        }
        outcome
    }
}
