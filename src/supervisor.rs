// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Serial Supervisor: owns the serial handle exclusively, frames incoming
//! bytes on `\r`, parses and translates each segment into a dispatcher
//! submission, and reconnects on I/O failure both periodically and eagerly
//! on filesystem re-creation of the device path.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::RecvTimeoutError,
    },
    time::Duration,
};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::{io::AsyncReadExt, sync::Notify};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{error, info, warn};

use crate::{
    device::Device,
    dispatcher::Dispatcher,
    liveness::Liveness,
    parser::{self, Verb},
    retry::{self, RetryKind, RetryPolicy},
    scheduler::Scheduler,
};

const RECONNECT_JOB: &str = "reconnect";
const RECONNECT_INTERVAL: Duration = Duration::from_secs(5);
const WATCH_CANCEL_POLL: Duration = Duration::from_millis(200);

pub struct SerialSupervisor {
    device_path: PathBuf,
    read_poll_timeout: Duration,
    devices: HashMap<String, Arc<Device>>,
    dispatcher: Dispatcher,
    retry_policy: RetryPolicy,
    cy_delay: Duration,
    liveness: Liveness,
    scheduler: Scheduler,
    reconnect_signal: Notify,
    /// Set while a filesystem-watch thread is blocked waiting for the device
    /// path to reappear; flipped to stop that thread once reconnection
    /// completes by any path, so it never outlives the ERROR state it was
    /// armed for.
    watch_cancel: Mutex<Option<Arc<AtomicBool>>>,
}

impl SerialSupervisor {
    pub fn new(
        device_path: PathBuf,
        read_poll_timeout: Duration,
        devices: HashMap<String, Arc<Device>>,
        dispatcher: Dispatcher,
        retry_policy: RetryPolicy,
        cy_delay: Duration,
        liveness: Liveness,
        scheduler: Scheduler,
    ) -> Self {
        SerialSupervisor {
            device_path,
            read_poll_timeout,
            devices,
            dispatcher,
            retry_policy,
            cy_delay,
            liveness,
            scheduler,
            reconnect_signal: Notify::new(),
            watch_cancel: Mutex::new(None),
        }
    }

    /// Runs the open → read → error → reconnect cycle forever. Intended to
    /// be spawned once by the Application Shell and raced against the
    /// interrupt signal.
    pub async fn run(self: Arc<Self>) {
        loop {
            self.liveness.status("Opening serial port");
            match self.open_once() {
                Ok(stream) => {
                    self.liveness.status("Serial port successfully opened");
                    self.on_reconnected().await;
                    self.read_until_error(stream).await;
                    self.liveness.status("Closing serial port");
                },
                Err(e) => {
                    error!(error = %e, path = %self.device_path.display(), "failed to open serial device");
                    self.liveness.status("Failed to open serial device");
                },
            }

            self.enter_error_state().await;
            self.reconnect_signal.notified().await;
        }
    }

    fn open_once(&self) -> std::io::Result<SerialStream> {
        tokio_serial::new(self.device_path.to_string_lossy(), 9600)
            .open_native_async()
    }

    async fn on_reconnected(&self) {
        self.scheduler.cancel(RECONNECT_JOB).await;
        self.stop_filesystem_watch();
    }

    /// Signals a still-blocked filesystem-watch thread to exit, regardless of
    /// whether reconnection was triggered by that watcher or by the periodic
    /// reconnect-poll job. A no-op if no watch is currently armed.
    fn stop_filesystem_watch(&self) {
        if let Some(cancel) = self.watch_cancel.lock().expect("watch_cancel mutex poisoned").take() {
            cancel.store(true, Ordering::Release);
        }
    }

    async fn enter_error_state(self: &Arc<Self>) {
        if !self.scheduler.is_registered(RECONNECT_JOB).await {
            let supervisor = Arc::clone(self);
            self.scheduler
                .register(
                    RECONNECT_JOB,
                    RECONNECT_INTERVAL,
                    Box::new(move || {
                        let supervisor = Arc::clone(&supervisor);
                        Box::pin(async move { supervisor.reconnect_signal.notify_one() })
                    }),
                )
                .await;
        }

        self.arm_filesystem_watch();
    }

    /// Watches the device path's parent directory for its re-creation,
    /// notifying the reconnect signal as soon as the path reappears. The
    /// watcher thread also polls a cancellation flag, so [`on_reconnected`]
    /// can stop it even when reconnection instead completes via the
    /// periodic reconnect-poll job — otherwise it would block on `rx.recv()`
    /// forever, leaking one thread per such cycle.
    fn arm_filesystem_watch(self: &Arc<Self>) {
        let Some(parent) = self.device_path.parent().map(Path::to_path_buf) else {
            return;
        };
        let target = self.device_path.clone();
        let supervisor = Arc::clone(self);

        let cancel = Arc::new(AtomicBool::new(false));
        *self.watch_cancel.lock().expect("watch_cancel mutex poisoned") = Some(cancel.clone());

        tokio::task::spawn_blocking(move || {
            let (tx, rx) = std::sync::mpsc::channel::<()>();
            let mut watcher = match RecommendedWatcher::new(
                move |res: notify::Result<Event>| {
                    if let Ok(event) = res {
                        if matches!(event.kind, EventKind::Create(_)) && event.paths.contains(&target) {
                            let _ = tx.send(());
                        }
                    }
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(e) => {
                    warn!(error = %e, "failed to create filesystem watcher for reconnect");
                    return;
                },
            };

            if let Err(e) = watcher.watch(&parent, RecursiveMode::NonRecursive) {
                warn!(error = %e, "failed to arm filesystem watch on device parent directory");
                return;
            }

            loop {
                match rx.recv_timeout(WATCH_CANCEL_POLL) {
                    Ok(()) => {
                        supervisor.reconnect_signal.notify_one();
                        return;
                    },
                    Err(RecvTimeoutError::Timeout) => {
                        if cancel.load(Ordering::Acquire) {
                            return;
                        }
                    },
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
        });
    }

    async fn read_until_error(&self, mut stream: SerialStream) {
        let mut buffer: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 256];

        loop {
            let n = match tokio::time::timeout(self.read_poll_timeout, stream.read(&mut chunk)).await {
                Ok(Ok(0)) => {
                    warn!("serial device reported EOF");
                    return;
                },
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    warn!(error = %e, "serial read failed");
                    return;
                },
                Err(_) => continue,
            };

            buffer.extend_from_slice(&chunk[..n]);
            let mut consumed = 0usize;

            for i in 0..buffer.len() {
                if buffer[i] != b'\r' {
                    continue;
                }
                let segment = String::from_utf8_lossy(&buffer[consumed..i]).into_owned();
                self.handle_segment(&segment);
                consumed = i + 1;
            }

            buffer.drain(..consumed);
        }
    }

    fn handle_segment(&self, segment: &str) {
        let command = match parser::parse(segment) {
            Ok(c) => c,
            Err(e) => {
                warn!(segment, error = %e, "dropping unparseable serial segment");
                return;
            },
        };

        match command.verb {
            Verb::Quit | Verb::Empty => {
                info!(verb = command.verb.as_str(), "ignoring quit/empty sequence");
            },
            verb @ (Verb::On | Verb::Of | Verb::Cy) => {
                let device_id = command.device_id.expect("on/of/cy always carries a device id");
                let outlet_id = command.outlet_id.expect("on/of/cy always carries an outlet id");
                self.translate_and_submit(verb, device_id, outlet_id);
            },
        }
    }

    fn translate_and_submit(&self, verb: Verb, device_id: u16, outlet_id: u16) {
        let device_key = format!("{device_id:03}");
        let outlet_key = format!("{outlet_id:03}");

        let Some(device) = self.devices.get(&device_key).cloned() else {
            error!(device = device_key, "serial command references unknown device");
            return;
        };

        let verb_str = verb.as_str();
        if device.power_states.contains_key(verb_str) {
            self.submit_set(device, outlet_key, verb_str.to_string());
            return;
        }

        if verb == Verb::Cy {
            self.synthesize_cycle(device, outlet_key);
            return;
        }

        error!(device = device_key, verb = verb_str, "device has no power state for verb");
    }

    fn submit_set(&self, device: Arc<Device>, outlet: String, verb: String) {
        let policy = self.retry_policy;
        self.dispatcher.submit(false, async move {
            let command_id = format!("{}/{}/{}", device.name, outlet, verb);
            retry::run(&device, &outlet, RetryKind::Set { verb: &verb }, policy, &command_id).await;
        });
    }

    /// Submits `of`, sleeps `cy_delay` on this independent task (not inside
    /// the dispatcher's single consumer loop), then submits `on` — so other
    /// submissions can drain through the dispatcher during the gap.
    fn synthesize_cycle(&self, device: Arc<Device>, outlet: String) {
        let dispatcher = self.dispatcher.clone();
        let policy = self.retry_policy;
        let cy_delay = self.cy_delay;

        tokio::spawn(async move {
            let of_device = device.clone();
            let of_outlet = outlet.clone();
            dispatcher.submit(false, async move {
                let command_id = format!("{}/{}/of(cy)", of_device.name, of_outlet);
                retry::run(&of_device, &of_outlet, RetryKind::Set { verb: "of" }, policy, &command_id).await;
            });

            tokio::time::sleep(cy_delay).await;

            dispatcher.submit(false, async move {
                let command_id = format!("{}/{}/on(cy)", device.name, outlet);
                retry::run(&device, &outlet, RetryKind::Set { verb: "on" }, policy, &command_id).await;
            });
        });
    }
}

#[cfg(test)]
mod tests {
    use std::{pin::Pin, sync::atomic::{AtomicUsize, Ordering}, future::Future};

    use super::*;
    use crate::transport::{SnmpOutcome, Transport};

    struct Recording(Arc<AtomicUsize>);
    impl Transport for Recording {
        fn outlet_state_get<'a>(
            &'a self,
            _outlet: &'a str,
        ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
            Box::pin(async move { SnmpOutcome::success(vec![]) })
        }

        fn outlet_state_set<'a>(
            &'a self,
            _outlet: &'a str,
            _value: i64,
        ) -> Pin<Box<dyn Future<Output = SnmpOutcome> + Send + 'a>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { SnmpOutcome::success(vec![]) })
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            per_attempt_timeout: Duration::from_millis(50),
            inter_attempt_delay: Duration::from_millis(1),
        }
    }

    fn supervisor(devices: HashMap<String, Arc<Device>>) -> Arc<SerialSupervisor> {
        Arc::new(SerialSupervisor::new(
            PathBuf::from("/dev/ttyUSB0"),
            Duration::from_millis(50),
            devices,
            Dispatcher::spawn(),
            policy(),
            Duration::from_millis(10),
            Liveness::from_env(),
            Scheduler::new(),
        ))
    }

    fn device_with_states(name: &str, hits: Arc<AtomicUsize>, states: &[(&str, i64)]) -> Arc<Device> {
        Arc::new(Device::new(
            name.to_string(),
            vec!["001".to_string()],
            states.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            Box::new(Recording(hits)),
        ))
    }

    #[tokio::test]
    async fn zero_pads_device_and_outlet_ids_before_lookup() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut devices = HashMap::new();
        devices.insert("001".to_string(), device_with_states("pdu-1", hits.clone(), &[("on", 1)]));
        let sup = supervisor(devices);

        sup.handle_segment("on 1 1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_device_id_is_dropped_without_panicking() {
        let sup = supervisor(HashMap::new());
        sup.handle_segment("on 9 9");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn quit_and_empty_segments_are_ignored() {
        let sup = supervisor(HashMap::new());
        sup.handle_segment("quit");
        sup.handle_segment("");
    }

    #[tokio::test]
    async fn cy_without_native_power_state_synthesizes_of_then_on() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut devices = HashMap::new();
        devices.insert("001".to_string(), device_with_states("pdu-2", hits.clone(), &[("on", 1), ("of", 2)]));
        let sup = supervisor(devices);

        sup.handle_segment("cy 1 1");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1, "of should have fired already");

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2, "on should fire after cy_delay");
    }
}
