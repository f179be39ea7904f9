//! Linux BLE implementation using bluer (BlueZ)
//!
//! Each catalog service is served as its own GATT application. BlueZ read,
//! write and notify callbacks are turned into [`PlatformEvent`]s; the
//! callback then waits for the emulator's `send_response` for the same
//! request id. BlueZ owns the CCCD, so notify sessions starting and stopping
//! are reported as descriptor writes of the enable/disable markers.

use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvertisementType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotifier, CharacteristicNotify,
    CharacteristicNotifyMethod, CharacteristicRead, CharacteristicReadRequest, CharacteristicWrite,
    CharacteristicWriteMethod, CharacteristicWriteRequest, ReqError, ReqResult, Service,
};
use bluer::{AdapterEvent, AdapterProperty, Address, AddressType, DeviceEvent, DeviceProperty};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::StreamExt;
use uuid::Uuid;

use super::adapter::{
    AdapterInfo, AdvertiseMode, AdvertisingParameters, BleError, Capabilities, DeviceId,
    PlatformStack,
};
use super::gatt_server::{GattStatus, LinkState, PlatformEvent};
use super::gatt_service::{
    CharacteristicDefinition, ServiceDefinition, CCCD_UUID, DISABLE_NOTIFICATION_VALUE,
    ENABLE_NOTIFICATION_VALUE,
};

/// How often an idle notify session checks whether the central unsubscribed
const NOTIFY_POLL_INTERVAL: Duration = Duration::from_millis(250);

impl From<bluer::Error> for BleError {
    fn from(err: bluer::Error) -> Self {
        BleError::PlatformError(err.to_string())
    }
}

/// State shared between the stack and the BlueZ callbacks it spawns
struct Shared {
    events: mpsc::UnboundedSender<PlatformEvent>,
    pending: Mutex<HashMap<u32, oneshot::Sender<(GattStatus, Vec<u8>)>>>,
    next_request_id: AtomicU32,
    /// Notify sessions by characteristic
    notifiers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<Vec<u8>>>>,
    /// Central attributed to notify sessions, which BlueZ does not identify
    central: Mutex<Option<DeviceId>>,
    /// Devices already linked when watching began; never treated as centrals
    preexisting: Mutex<HashSet<Address>>,
    /// Links reported to the emulator
    centrals: Mutex<HashSet<Address>>,
    mtu: Mutex<Option<u16>>,
    applications: Mutex<Vec<ApplicationHandle>>,
    advertisement: Mutex<Option<AdvertisementHandle>>,
    /// Bumped on every start/stop so a late advertise result can be discarded
    advertising_generation: AtomicU64,
    powered: AtomicBool,
}

impl Shared {
    fn emit(&self, event: PlatformEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("Platform event dropped: emulator is gone");
        }
    }

    fn register_request(&self) -> (u32, oneshot::Receiver<(GattStatus, Vec<u8>)>) {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        (request_id, rx)
    }

    async fn await_response(
        &self,
        request_id: u32,
        reply: oneshot::Receiver<(GattStatus, Vec<u8>)>,
    ) -> ReqResult<Vec<u8>> {
        match reply.await {
            Ok((status, value)) => status_to_result(status).map(|()| value),
            Err(_) => {
                self.pending.lock().remove(&request_id);
                tracing::warn!("Request {} dropped without a response", request_id);
                Err(ReqError::Failed)
            }
        }
    }

    fn observe_mtu(&self, device: &DeviceId, mtu: u16) {
        let mut current = self.mtu.lock();
        if *current != Some(mtu) {
            *current = Some(mtu);
            self.emit(PlatformEvent::MtuChanged {
                device: device.clone(),
                mtu,
            });
        }
    }

    fn current_central(&self) -> DeviceId {
        self.central
            .lock()
            .clone()
            .unwrap_or_else(|| DeviceId::new("unknown"))
    }

    async fn read(&self, characteristic: Uuid, req: CharacteristicReadRequest) -> ReqResult<Vec<u8>> {
        let device = DeviceId::new(req.device_address.to_string());
        self.observe_mtu(&device, req.mtu);

        let (request_id, reply) = self.register_request();
        self.emit(PlatformEvent::CharacteristicReadRequest {
            device,
            request_id,
            offset: req.offset,
            characteristic,
        });
        self.await_response(request_id, reply).await
    }

    async fn write(
        &self,
        characteristic: Uuid,
        value: Vec<u8>,
        req: CharacteristicWriteRequest,
    ) -> ReqResult<()> {
        let device = DeviceId::new(req.device_address.to_string());
        self.observe_mtu(&device, req.mtu);

        let (request_id, reply) = self.register_request();
        self.emit(PlatformEvent::CharacteristicWriteRequest {
            device,
            request_id,
            characteristic,
            prepared_write: req.prepare_authorize,
            response_needed: !matches!(req.op_type, bluer::gatt::WriteOp::Command),
            offset: req.offset,
            value: Some(value),
        });
        self.await_response(request_id, reply).await.map(|_| ())
    }

    /// Report a CCCD change and return the emulator's verdict
    async fn descriptor_write(&self, device: &DeviceId, characteristic: Uuid, value: [u8; 2]) -> GattStatus {
        let (request_id, reply) = self.register_request();
        self.emit(PlatformEvent::DescriptorWriteRequest {
            device: device.clone(),
            request_id,
            characteristic,
            descriptor: CCCD_UUID,
            prepared_write: false,
            response_needed: true,
            offset: 0,
            value: Some(value.to_vec()),
        });
        match reply.await {
            Ok((status, _)) => status,
            Err(_) => GattStatus::Failure,
        }
    }

    async fn notify_session(&self, characteristic: Uuid, mut notifier: CharacteristicNotifier) {
        let device = self.current_central();
        let status = self
            .descriptor_write(&device, characteristic, ENABLE_NOTIFICATION_VALUE)
            .await;
        if !status.is_success() {
            tracing::warn!("Subscription to {} refused: {}", characteristic, status);
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.notifiers.lock().insert(characteristic, tx.clone());
        tracing::debug!("Notify session for {} started", characteristic);

        loop {
            tokio::select! {
                value = rx.recv() => match value {
                    Some(value) => {
                        let result = notifier.notify(value).await;
                        let status = if result.is_ok() { GattStatus::Success } else { GattStatus::Failure };
                        self.emit(PlatformEvent::NotificationSent { device: device.clone(), status });
                        if let Err(e) = result {
                            tracing::warn!("Notification on {} failed: {}", characteristic, e);
                            break;
                        }
                    }
                    None => break,
                },
                _ = tokio::time::sleep(NOTIFY_POLL_INTERVAL) => {
                    if notifier.is_stopped() {
                        break;
                    }
                }
            }
        }

        {
            let mut notifiers = self.notifiers.lock();
            if notifiers.get(&characteristic).is_some_and(|s| s.same_channel(&tx)) {
                notifiers.remove(&characteristic);
            }
        }
        tracing::debug!("Notify session for {} ended", characteristic);
        self.descriptor_write(&device, characteristic, DISABLE_NOTIFICATION_VALUE)
            .await;
    }

    async fn on_link_changed(&self, device: &bluer::Device, connected: bool) -> Result<(), BleError> {
        let address = device.address();
        if connected {
            if self.preexisting.lock().contains(&address) {
                return Ok(());
            }
            let address_type = device.address_type().await?;
            let class = device.class().await?;
            if !is_le_link(address_type, class) {
                tracing::debug!("Ignoring classic link with {}", address);
                return Ok(());
            }
            if self.centrals.lock().insert(address) {
                self.report_link(address, true);
            }
        } else if self.preexisting.lock().remove(&address) {
            tracing::debug!("{} dropped the link it had before startup", address);
        } else if self.centrals.lock().remove(&address) {
            self.report_link(address, false);
        }
        Ok(())
    }

    fn report_link(&self, address: Address, connected: bool) {
        let device = DeviceId::new(address.to_string());
        if connected {
            {
                let mut central = self.central.lock();
                if central.is_none() {
                    *central = Some(device.clone());
                }
            }
            for new_state in [LinkState::Connecting, LinkState::Connected] {
                self.emit(PlatformEvent::ConnectionStateChanged {
                    device: device.clone(),
                    status: GattStatus::Success,
                    new_state,
                });
            }
        } else {
            {
                let mut central = self.central.lock();
                if central.as_ref() == Some(&device) {
                    *central = None;
                    *self.mtu.lock() = None;
                }
            }
            self.emit(PlatformEvent::ConnectionStateChanged {
                device,
                status: GattStatus::Success,
                new_state: LinkState::Disconnected,
            });
        }
    }
}

/// Random addresses only exist on LE; BR/EDR devices carry a Class of Device
fn is_le_link(address_type: AddressType, class: Option<u32>) -> bool {
    address_type == AddressType::LeRandom || class.is_none()
}

fn status_to_result(status: GattStatus) -> ReqResult<()> {
    match status {
        GattStatus::Success => Ok(()),
        GattStatus::ReadNotPermitted | GattStatus::WriteNotPermitted => Err(ReqError::NotPermitted),
        GattStatus::RequestNotSupported => Err(ReqError::NotSupported),
        GattStatus::InvalidOffset => Err(ReqError::InvalidOffset),
        GattStatus::InvalidAttributeLength => Err(ReqError::InvalidValueLength),
        GattStatus::Failure => Err(ReqError::Failed),
    }
}

fn advertising_interval(mode: AdvertiseMode) -> Duration {
    match mode {
        AdvertiseMode::LowPower => Duration::from_millis(1000),
        AdvertiseMode::Balanced => Duration::from_millis(250),
        AdvertiseMode::LowLatency => Duration::from_millis(100),
    }
}

/// BlueZ-backed platform stack
pub struct LinuxStack {
    adapter: bluer::Adapter,
    address: String,
    runtime: tokio::runtime::Handle,
    shared: Arc<Shared>,
}

impl LinuxStack {
    /// Open the default adapter and power it on.
    ///
    /// Must be called from within a tokio runtime; BlueZ work is spawned on it.
    pub async fn new() -> Result<(Arc<Self>, mpsc::UnboundedReceiver<PlatformEvent>), BleError> {
        let session = bluer::Session::new()
            .await
            .map_err(|e| BleError::PlatformError(format!("Failed to create BlueZ session: {}", e)))?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_e| BleError::AdapterNotAvailable)?;
        adapter
            .set_powered(true)
            .await
            .map_err(|e| BleError::PlatformError(format!("Failed to power on adapter: {}", e)))?;
        let powered = adapter.is_powered().await?;
        let address = adapter.address().await?.to_string();
        tracing::info!("Using adapter {} ({})", adapter.name(), address);

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            events: tx,
            pending: Mutex::new(HashMap::new()),
            next_request_id: AtomicU32::new(1),
            notifiers: Mutex::new(HashMap::new()),
            central: Mutex::new(None),
            preexisting: Mutex::new(HashSet::new()),
            centrals: Mutex::new(HashSet::new()),
            mtu: Mutex::new(None),
            applications: Mutex::new(Vec::new()),
            advertisement: Mutex::new(None),
            advertising_generation: AtomicU64::new(0),
            powered: AtomicBool::new(powered),
        });

        let stack = Arc::new(Self {
            adapter: adapter.clone(),
            address,
            runtime: tokio::runtime::Handle::current(),
            shared: shared.clone(),
        });

        tokio::spawn(async move {
            if let Err(e) = watch_adapter(adapter, shared).await {
                tracing::error!("Adapter watcher stopped: {}", e);
            }
        });

        Ok((stack, rx))
    }

    fn characteristic(&self, definition: &CharacteristicDefinition) -> Characteristic {
        let uuid = definition.uuid;

        let read = definition.properties.read.then(|| {
            let shared = self.shared.clone();
            CharacteristicRead {
                read: true,
                fun: Box::new(move |req: CharacteristicReadRequest| {
                    let shared = shared.clone();
                    Box::pin(async move { shared.read(uuid, req).await })
                }),
                ..Default::default()
            }
        });

        let write = definition.properties.write.then(|| {
            let shared = self.shared.clone();
            CharacteristicWrite {
                write: true,
                write_without_response: false,
                method: CharacteristicWriteMethod::Fun(Box::new(
                    move |value: Vec<u8>, req: CharacteristicWriteRequest| {
                        let shared = shared.clone();
                        Box::pin(async move { shared.write(uuid, value, req).await })
                    },
                )),
                ..Default::default()
            }
        });

        let notify = definition.properties.notify.then(|| {
            let shared = self.shared.clone();
            CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun(Box::new(move |notifier| {
                    let shared = shared.clone();
                    Box::pin(async move { shared.notify_session(uuid, notifier).await })
                })),
                ..Default::default()
            }
        });

        Characteristic {
            uuid,
            read,
            write,
            notify,
            ..Default::default()
        }
    }
}

async fn watch_adapter(adapter: bluer::Adapter, shared: Arc<Shared>) -> Result<(), BleError> {
    for address in adapter.device_addresses().await? {
        spawn_device_watcher(adapter.clone(), address, shared.clone(), true);
    }

    let events = adapter.events().await?;
    futures::pin_mut!(events);
    while let Some(event) = events.next().await {
        match event {
            AdapterEvent::DeviceAdded(address) => {
                spawn_device_watcher(adapter.clone(), address, shared.clone(), false);
            }
            AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) => {
                tracing::info!("Adapter powered: {}", powered);
                shared.powered.store(powered, Ordering::Relaxed);
            }
            _ => {}
        }
    }
    Ok(())
}

/// Follow one device's `Connected` property. Devices found during the
/// startup sweep that are already linked belong to someone else.
fn spawn_device_watcher(adapter: bluer::Adapter, address: Address, shared: Arc<Shared>, startup: bool) {
    tokio::spawn(async move {
        let result: Result<(), BleError> = async {
            let device = adapter.device(address)?;
            if device.is_connected().await? {
                if startup {
                    tracing::debug!("{} was linked before startup, ignoring it", address);
                    shared.preexisting.lock().insert(address);
                } else {
                    shared.on_link_changed(&device, true).await?;
                }
            }
            let events = device.events().await?;
            futures::pin_mut!(events);
            while let Some(DeviceEvent::PropertyChanged(property)) = events.next().await {
                if let DeviceProperty::Connected(connected) = property {
                    shared.on_link_changed(&device, connected).await?;
                }
            }
            Ok(())
        }
        .await;
        if let Err(e) = result {
            tracing::debug!("Stopped watching {}: {}", address, e);
        }
    });
}

impl PlatformStack for LinuxStack {
    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    fn is_radio_available(&self) -> bool {
        self.shared.powered.load(Ordering::Relaxed)
    }

    fn set_device_name(&self, name: &str) -> Result<(), BleError> {
        let adapter = self.adapter.clone();
        let name = name.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = adapter.set_alias(name).await {
                tracing::warn!("Failed to set adapter alias: {}", e);
            }
        });
        Ok(())
    }

    fn register_service(&self, service: &ServiceDefinition) -> Result<(), BleError> {
        let application = Application {
            services: vec![Service {
                uuid: service.uuid,
                primary: true,
                characteristics: service
                    .characteristics
                    .iter()
                    .map(|c| self.characteristic(c))
                    .collect(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        let uuid = service.uuid;
        self.runtime.spawn(async move {
            let status = match adapter.serve_gatt_application(application).await {
                Ok(handle) => {
                    shared.applications.lock().push(handle);
                    GattStatus::Success
                }
                Err(e) => {
                    tracing::error!("BlueZ rejected service {}: {}", uuid, e);
                    GattStatus::Failure
                }
            };
            shared.emit(PlatformEvent::ServiceAdded {
                service: uuid,
                status,
            });
        });
        Ok(())
    }

    fn clear_services(&self) {
        self.shared.notifiers.lock().clear();
        let handles = std::mem::take(&mut *self.shared.applications.lock());
        if !handles.is_empty() {
            tracing::debug!("Unregistering {} GATT applications", handles.len());
        }
    }

    fn start_advertising(&self, parameters: &AdvertisingParameters) -> Result<(), BleError> {
        let interval = advertising_interval(parameters.mode);
        let advertisement = Advertisement {
            advertisement_type: if parameters.connectable {
                AdvertisementType::Peripheral
            } else {
                AdvertisementType::Broadcast
            },
            service_uuids: parameters.service_uuids.iter().copied().collect(),
            local_name: parameters
                .include_device_name
                .then(|| parameters.local_name.clone()),
            discoverable: Some(true),
            tx_power: Some(parameters.tx_power.dbm()),
            timeout: parameters.timeout,
            min_interval: Some(interval),
            max_interval: Some(interval),
            ..Default::default()
        };

        let generation = self.shared.advertising_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let adapter = self.adapter.clone();
        let shared = self.shared.clone();
        self.runtime.spawn(async move {
            match adapter.advertise(advertisement).await {
                Ok(handle) => {
                    if shared.advertising_generation.load(Ordering::SeqCst) == generation {
                        *shared.advertisement.lock() = Some(handle);
                        shared.emit(PlatformEvent::AdvertisingStarted);
                    } else {
                        tracing::debug!("Advertising stopped before BlueZ confirmed it");
                    }
                }
                Err(e) => shared.emit(PlatformEvent::AdvertisingFailed {
                    reason: e.to_string(),
                }),
            }
        });
        Ok(())
    }

    fn stop_advertising(&self) {
        self.shared.advertising_generation.fetch_add(1, Ordering::SeqCst);
        self.shared.advertisement.lock().take();
    }

    fn send_response(
        &self,
        _device: &DeviceId,
        request_id: u32,
        status: GattStatus,
        value: &[u8],
    ) -> Result<(), BleError> {
        let reply = self
            .shared
            .pending
            .lock()
            .remove(&request_id)
            .ok_or(BleError::UnknownRequest(request_id))?;
        // The BlueZ call may already have been cancelled
        let _ = reply.send((status, value.to_vec()));
        Ok(())
    }

    fn notify_characteristic_changed(
        &self,
        _device: &DeviceId,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), BleError> {
        let notifiers = self.shared.notifiers.lock();
        let session = notifiers.get(&characteristic).ok_or_else(|| {
            BleError::TransmissionFailed(format!("no notify session for {}", characteristic))
        })?;
        session
            .send(value.to_vec())
            .map_err(|_| BleError::TransmissionFailed(format!("notify session for {} closed", characteristic)))
    }

    fn cancel_connection(&self, device: &DeviceId) {
        let address: Address = match device.as_str().parse() {
            Ok(address) => address,
            Err(_) => {
                tracing::warn!("{}", BleError::InvalidAddress(device.to_string()));
                return;
            }
        };
        let adapter = self.adapter.clone();
        self.runtime.spawn(async move {
            let result = match adapter.device(address) {
                Ok(device) => device.disconnect().await,
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!("Failed to disconnect {}: {}", address, e);
            }
        });
    }

    fn adapter_info(&self) -> AdapterInfo {
        AdapterInfo {
            platform: "Linux".to_string(),
            name: self.adapter.name().to_string(),
            address: self.address.clone(),
            powered: self.is_radio_available(),
        }
    }
}
