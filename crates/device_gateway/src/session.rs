use crate::{DeviceTransport, FrameRead};
use chrono::Utc;
use common::domain::{DeviceId, DeviceRepository, SampleRepository, SensorSample};
use mailbox_router::{Mailbox, MailboxError, MailboxRouter};
use sddl::Descriptor;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Span};

/// Frame key carrying the device identifier
pub const DEVICE_ID_KEY: &str = "device_id";
/// Frame key carrying the capability descriptor
pub const DESCRIPTOR_KEY: &str = "sddl";

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Bounded wait for one inbound frame
    pub read_timeout: Duration,
    /// Bounded wait on the mailbox after each read
    pub receive_timeout: Duration,
    /// Only every Nth accepted frame is scanned for samples
    pub sample_every: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(100),
            receive_timeout: Duration::from_millis(100),
            sample_every: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session left its poll loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    Disconnected,
    TransportFault(String),
    /// The mailbox was closed from outside, e.g. the device reconnected elsewhere
    Evicted,
    Shutdown,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Disconnected => f.write_str("disconnected"),
            SessionEnd::TransportFault(reason) => write!(f, "transport fault: {}", reason),
            SessionEnd::Evicted => f.write_str("evicted"),
            SessionEnd::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// Collaborators shared by every session on a node
#[derive(Clone)]
pub struct SessionContext {
    pub router: Arc<MailboxRouter>,
    pub devices: Arc<dyn DeviceRepository>,
    pub samples: Arc<dyn SampleRepository>,
    pub config: SessionConfig,
}

/// Per-connection state machine.
///
/// Each poll cycle reads at most one frame, then checks the mailbox once,
/// both with bounded waits. The mailbox is created when the first frame
/// identifies a registered device that has a capability descriptor, and it
/// is always closed before [`DeviceSession::run`] returns.
pub struct DeviceSession<T> {
    ctx: SessionContext,
    transport: T,
    state: SessionState,
    device_id: Option<DeviceId>,
    descriptor: Option<Descriptor>,
    mailbox: Option<Mailbox>,
    accepted_frames: u64,
}

impl<T: DeviceTransport> DeviceSession<T> {
    pub fn new(ctx: SessionContext, transport: T) -> Self {
        Self {
            ctx,
            transport,
            state: SessionState::Connecting,
            device_id: None,
            descriptor: None,
            mailbox: None,
            accepted_frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device_id(&self) -> Option<&DeviceId> {
        self.device_id.as_ref()
    }

    /// Drive the session until the device leaves, the mailbox is evicted or
    /// `shutdown` fires, then tear down.
    pub async fn run(mut self, shutdown: CancellationToken) -> SessionEnd {
        let end = loop {
            if let Err(end) = self.poll_once(&shutdown).await {
                break end;
            }
        };

        self.close(&end).await;
        end
    }

    /// One poll cycle: bounded read, then bounded mailbox receive
    pub async fn poll_once(&mut self, shutdown: &CancellationToken) -> Result<(), SessionEnd> {
        let read = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(SessionEnd::Shutdown),
            read = self.transport.read_frame(self.ctx.config.read_timeout) => read,
        };

        match read {
            Ok(FrameRead::Frame(text)) => self.handle_frame(&text).await,
            Ok(FrameRead::Idle) => {}
            Ok(FrameRead::Closed) => return Err(SessionEnd::Disconnected),
            Err(e) => return Err(SessionEnd::TransportFault(e.to_string())),
        }

        self.deliver_directive(shutdown).await
    }

    async fn deliver_directive(&mut self, shutdown: &CancellationToken) -> Result<(), SessionEnd> {
        let Some(mailbox) = self.mailbox.as_mut() else {
            return Ok(());
        };

        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Err(SessionEnd::Shutdown),
            received = mailbox.receive(self.ctx.config.receive_timeout) => received,
        };

        match received {
            Ok(Some(directive)) => {
                self.transport
                    .write_frame(&directive.to_wire())
                    .await
                    .map_err(|e| SessionEnd::TransportFault(e.to_string()))?;
                debug!("directive written to device");
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(MailboxError::Closed) => Err(SessionEnd::Evicted),
        }
    }

    async fn handle_frame(&mut self, text: &str) {
        let fields = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => {
                warn!("frame is not a JSON object, skipping");
                return;
            }
            Err(e) => {
                warn!(error = %e, "malformed frame, skipping");
                return;
            }
        };

        let device_id = match fields.get(DEVICE_ID_KEY) {
            Some(Value::String(raw)) => match DeviceId::parse(raw) {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "invalid device identifier, skipping frame");
                    return;
                }
            },
            Some(_) => {
                warn!("device identifier is not a string, skipping frame");
                return;
            }
            None => {
                warn!("frame has no device identifier, skipping");
                return;
            }
        };

        let stored_descriptor = match &self.device_id {
            Some(bound) if *bound != device_id => {
                warn!(bound = %bound, claimed = %device_id, "frame names a different device, skipping");
                return;
            }
            Some(_) => None,
            None => match self.ctx.devices.get_device(&device_id).await {
                Ok(Some(device)) => device.descriptor,
                Ok(None) => {
                    warn!(device_id = %device_id, "unknown device, skipping frame");
                    return;
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "device lookup failed, skipping frame");
                    return;
                }
            },
        };

        if let Some(raw) = fields.get(DESCRIPTOR_KEY) {
            self.redeclare_descriptor(&device_id, raw).await;
        }

        if self.state == SessionState::Connecting {
            if self.descriptor.is_none() {
                self.descriptor = stored_descriptor.and_then(|raw| match Descriptor::parse(&raw) {
                    Ok(descriptor) => Some(descriptor),
                    Err(e) => {
                        warn!(device_id = %device_id, error = %e, "stored descriptor is invalid");
                        None
                    }
                });
            }
            if self.descriptor.is_none() {
                warn!(device_id = %device_id, "no capability descriptor yet, skipping frame");
                return;
            }
            if !self.activate(device_id).await {
                return;
            }
        }

        self.accepted_frames += 1;
        if self.accepted_frames % self.ctx.config.sample_every.max(1) == 0 {
            self.ingest_samples(&fields).await;
        }
    }

    /// Replace the session's descriptor and persist it; a bad declaration
    /// leaves the previous descriptor in place
    async fn redeclare_descriptor(&mut self, device_id: &DeviceId, raw: &Value) {
        let descriptor = match Descriptor::parse(raw) {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "rejected capability descriptor");
                return;
            }
        };

        if let Err(e) = self
            .ctx
            .devices
            .set_descriptor(device_id, &descriptor.to_json())
            .await
        {
            warn!(device_id = %device_id, error = %e, "failed to persist capability descriptor");
        }

        debug!(
            device_id = %device_id,
            properties = descriptor.len(),
            sensors = descriptor.sensors().count(),
            "capability descriptor attached"
        );
        self.descriptor = Some(descriptor);
    }

    async fn activate(&mut self, device_id: DeviceId) -> bool {
        match self.ctx.router.create_mailbox(&device_id).await {
            Ok(mailbox) => {
                Span::current().record("device_id", device_id.as_str());
                info!(device_id = %device_id, "device session active");
                self.mailbox = Some(mailbox);
                self.device_id = Some(device_id);
                self.state = SessionState::Active;
                true
            }
            Err(e) => {
                warn!(device_id = %device_id, error = %e, "could not create mailbox, skipping frame");
                false
            }
        }
    }

    async fn ingest_samples(&self, fields: &Map<String, Value>) {
        let (Some(device_id), Some(descriptor)) = (&self.device_id, &self.descriptor) else {
            return;
        };

        for (name, raw) in fields {
            if name == DEVICE_ID_KEY || name == DESCRIPTOR_KEY {
                continue;
            }

            let value = match descriptor
                .lookup_sensor(name)
                .and_then(|sensor| sensor.convert(raw))
            {
                Ok(value) => value,
                Err(e) => {
                    warn!(device_id = %device_id, sensor = %name, error = %e, "skipping field");
                    continue;
                }
            };

            let sample = SensorSample {
                device_id: device_id.clone(),
                sensor_name: name.clone(),
                recorded_at: Utc::now(),
                value,
            };
            if let Err(e) = self.ctx.samples.insert_sample(&sample).await {
                warn!(device_id = %device_id, sensor = %name, error = %e, "failed to store sample");
            }
        }
    }

    /// Closing: release the mailbox fleet-wide, then the transport
    async fn close(&mut self, end: &SessionEnd) {
        self.state = SessionState::Closing;

        if let Some(mailbox) = self.mailbox.take() {
            if let Err(e) = self.ctx.router.close(mailbox).await {
                warn!(error = %e, "failed to release mailbox route");
            }
        }
        self.transport.close().await;

        self.state = SessionState::Closed;
        info!(
            device_id = self.device_id.as_ref().map(|id| id.as_str()),
            accepted_frames = self.accepted_frames,
            reason = %end,
            "device session closed"
        );
    }
}
