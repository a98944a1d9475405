//! The device-control mediator.
//!
//! Sole owner of the device transport. Answers control queries arriving over
//! the control channel, validates every write before it reaches the device,
//! and coordinates flushing so that no frame produced under an old parameter
//! value is attributed to a new one.
//!
//! # Set ordering
//!
//! 1. Resolve the target (by id, or by name through the [`ControlDirectory`])
//! 2. Query the current descriptor from the device
//! 3. Reject disabled and read-only controls
//! 4. Check value shape and range
//! 5. If a flush was requested, notify every [`FlushListener`] **before**
//!    the value is applied
//! 6. Apply the value, record the update time, arm the settling drop
//! 7. Reply with the value the device reports afterwards

use crate::directory::ControlDirectory;
use crate::flush::{FlushState, FlushTracker, FrameVerdict};
use crate::validation::{self, Access};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tune_core::protocol::{
    ControlEvent, ControlReply, ControlRequest, Envelope, FlushListener, FlushSignal,
    SetControlQuery,
};
use tune_core::{
    Clock, ControlChannel, ControlDescriptor, ControlId, ControlRef, ControlValue,
    DeviceTransport, Frame, TransportError, TransportErrorKind, TuneError, TuneResult,
    ValidationError,
};

/// Mediator behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediatorConfig {
    /// Raise flushes and drop frames captured before an update.
    #[serde(default = "default_true")]
    pub drop_on_update: bool,
    /// Also drop the first fresh frame after an update.
    #[serde(default = "default_true")]
    pub drop_extra_frame: bool,
}

fn default_true() -> bool {
    true
}

impl Default for MediatorConfig {
    fn default() -> Self {
        Self {
            drop_on_update: true,
            drop_extra_frame: true,
        }
    }
}

/// Outcome of an accepted set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedSet {
    /// Descriptor the value was validated against.
    pub descriptor: ControlDescriptor,
    /// Value read back after the set.
    pub achieved: ControlValue,
    /// Whether the set raised a flush.
    pub flushing: bool,
}

/// Shared handle to a stage that must reset on flush.
pub type SharedListener = Arc<Mutex<dyn FlushListener + Send>>;

/// Answers control queries against a device it owns exclusively.
pub struct Mediator {
    transport: Box<dyn DeviceTransport>,
    clock: Arc<dyn Clock>,
    directory: ControlDirectory,
    flush: FlushTracker,
    listeners: Vec<SharedListener>,
    opened: bool,
}

impl Mediator {
    /// Mediator over an unopened transport. Call [`Mediator::start`] first.
    pub fn new(
        transport: Box<dyn DeviceTransport>,
        clock: Arc<dyn Clock>,
        config: MediatorConfig,
    ) -> Self {
        Self {
            transport,
            clock,
            directory: ControlDirectory::default(),
            flush: FlushTracker::new(config.drop_on_update, config.drop_extra_frame),
            listeners: Vec::new(),
            opened: false,
        }
    }

    /// Register a stage to be notified of flushes.
    pub fn subscribe(&mut self, listener: SharedListener) {
        self.listeners.push(listener);
    }

    /// Name index built at start.
    pub fn directory(&self) -> &ControlDirectory {
        &self.directory
    }

    /// Where the flush cycle stands.
    pub fn flush_state(&self) -> FlushState {
        self.flush.state()
    }

    /// Clock time of the last applied set.
    pub fn last_update_ns(&self) -> u64 {
        self.flush.last_update_ns()
    }

    /// Open the device (first call only), refresh the control directory and
    /// reset the update clock. Returns the number of controls reported.
    pub fn start(&mut self) -> TuneResult<usize> {
        if !self.opened {
            self.transport.open()?;
            self.opened = true;
        }
        let directory = ControlDirectory::discover(self.transport.as_mut())?;
        if directory.is_empty() {
            return Err(TransportError::new(
                self.transport.device_id(),
                TransportErrorKind::Open,
                "device reports no controls",
            )
            .into());
        }
        let count = directory.len();
        self.directory = directory;
        self.flush.reset();
        tracing::info!(
            device = self.transport.device_id(),
            controls = count,
            enabled = self.directory.list().count(),
            "mediator started"
        );
        Ok(count)
    }

    fn resolve(&self, target: &ControlRef) -> Result<ControlId, ValidationError> {
        if target.id != 0 {
            return Ok(target.id);
        }
        let name = target.name.as_deref().unwrap_or_default();
        self.directory
            .resolve(name)
            .ok_or_else(|| ValidationError::UnknownControl(name.to_string()))
    }

    /// Descriptor with the extended block when the device provides one.
    fn describe(&mut self, id: ControlId) -> TuneResult<ControlDescriptor> {
        match self.transport.query_ext_control(id) {
            Ok(descriptor) => Ok(descriptor),
            Err(err) => {
                tracing::debug!(
                    id,
                    error = %err,
                    "extended query failed, using simple descriptor"
                );
                Ok(self.transport.query_control(id)?)
            }
        }
    }

    /// Validate and apply a set.
    pub fn set_control(&mut self, query: &SetControlQuery) -> TuneResult<AppliedSet> {
        let id = self.resolve(&query.target)?;
        let mut descriptor = self.transport.query_control(id)?;
        validation::check_access(&descriptor, Access::Write)?;
        if descriptor.is_compound() {
            descriptor = self.transport.query_ext_control(id)?;
        }
        validation::validate(&descriptor, &query.value)?;

        let flushing = self.flush.begin(query.flush);
        if flushing {
            let signal = FlushSignal::new(ControlRef {
                name: Some(descriptor.name.clone()),
                id,
            });
            tracing::debug!(
                control = %descriptor.name,
                listeners = self.listeners.len(),
                "starting flush"
            );
            for listener in &self.listeners {
                listener.lock().on_flush(&signal);
            }
        }

        if let Err(err) = self.transport.set_control(id, &query.value) {
            self.flush.failed();
            tracing::warn!(
                control = %descriptor.name,
                value = %query.value,
                error = %err,
                "set failed"
            );
            return Err(err.into());
        }
        self.flush.applied(self.clock.now_ns());

        // Report what the device holds now; fall back to the request on a failed read.
        let achieved = match self.transport.get_control(id) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(control = %descriptor.name, error = %err, "read-back failed");
                query.value.clone()
            }
        };
        tracing::info!(
            control = %descriptor.name,
            requested = %query.value,
            achieved = %achieved,
            flushing,
            "control set"
        );
        Ok(AppliedSet {
            descriptor,
            achieved,
            flushing,
        })
    }

    /// Current value; compound controls yield their whole payload.
    pub fn get_control(
        &mut self,
        target: &ControlRef,
    ) -> TuneResult<(ControlDescriptor, ControlValue)> {
        let id = self.resolve(target)?;
        let descriptor = self.transport.query_control(id)?;
        validation::check_access(&descriptor, Access::Read)?;
        let value = self.transport.get_control(id)?;
        tracing::debug!(control = %descriptor.name, value = %value, "control read");
        Ok((descriptor, value))
    }

    /// Descriptor with the extended block when available.
    pub fn control_info(&mut self, target: &ControlRef) -> TuneResult<ControlDescriptor> {
        let id = self.resolve(target)?;
        self.describe(id)
    }

    fn dispatch(&mut self, request: &ControlRequest) -> TuneResult<ControlReply> {
        Ok(match request {
            ControlRequest::SetControl(query) => {
                let applied = self.set_control(query)?;
                ControlReply::SetControl {
                    target: ControlRef {
                        name: Some(applied.descriptor.name),
                        id: applied.descriptor.id,
                    },
                    achieved: applied.achieved,
                    flushing: applied.flushing,
                }
            }
            ControlRequest::GetControl(target) => {
                let (descriptor, value) = self.get_control(target)?;
                ControlReply::GetControl {
                    target: ControlRef {
                        name: Some(descriptor.name),
                        id: descriptor.id,
                    },
                    value,
                }
            }
            ControlRequest::ControlInfo(target) => {
                ControlReply::ControlInfo(self.control_info(target)?)
            }
        })
    }

    /// Answer one query envelope.
    ///
    /// Malformed requests and validation failures are logged and returned as
    /// errors; the device is left untouched in both cases.
    pub fn handle_query(&mut self, request: &Envelope) -> TuneResult<Envelope> {
        let decoded = ControlRequest::decode(request).map_err(|err| {
            tracing::warn!(request = %request, error = %err, "unable to parse control query");
            TuneError::from(err)
        })?;
        match self.dispatch(&decoded) {
            Ok(reply) => Ok(reply.encode(request.correlation)),
            Err(err) => {
                if err.is_local() {
                    tracing::warn!(
                        kind = %decoded.kind(),
                        target = %decoded.target(),
                        error = %err,
                        "control query rejected"
                    );
                }
                Err(err)
            }
        }
    }

    /// Apply a fire-and-forget set event. The achieved value is discarded.
    pub fn handle_event(&mut self, event: &Envelope) -> TuneResult<()> {
        let ControlEvent(query) = ControlEvent::decode(event).map_err(|err| {
            tracing::warn!(event = %event, error = %err, "unable to parse set-control event");
            TuneError::from(err)
        })?;
        self.set_control(&query).map(|_| ())
    }

    /// Decide whether a frame continues downstream.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameVerdict {
        let verdict = self.flush.admit(frame.timestamp_ns);
        match verdict {
            FrameVerdict::DropStale => tracing::debug!(
                sequence = frame.sequence,
                timestamp = frame.timestamp_ns,
                last_update = self.flush.last_update_ns(),
                "dropping frame captured before last update"
            ),
            FrameVerdict::DropSettling => {
                tracing::debug!(sequence = frame.sequence, "dropping extra frame after update")
            }
            FrameVerdict::Pass => {}
        }
        verdict
    }
}

impl ControlChannel for Mediator {
    fn round_trip(&mut self, request: Envelope) -> TuneResult<Envelope> {
        self.handle_query(&request)
    }

    fn send_event(&mut self, event: Envelope) -> TuneResult<()> {
        self.handle_event(&event)
    }
}

impl std::fmt::Debug for Mediator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mediator")
            .field("device", &self.transport.device_id())
            .field("controls", &self.directory.len())
            .field("flush", &self.flush)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
