// ─── Fakes en memoria para los tests del host ───
//
// Cada fake es un handle clonable sobre estado compartido (Rc<RefCell>):
// el test se queda con un clon para inspeccionar lo que la máquina de
// estados hizo con el otro.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use crate::broker::ConnectOptions;
use crate::commands::{Command, MessageHandler};
use crate::config_store::{ConfigStore, DeviceConfig};
use crate::error::{BrokerError, NetworkError, RuntimeError, StoreError};
use crate::platform::{
    Board, Clock, DiagnosticSink, DigitalOutput, HttpResponder, KeyValueStore, MqttTransport,
    Namespace, Platform, TemperatureSensor, TimeOfDay, WifiRadio,
};
use crate::portal::{AccessPointSettings, HttpMethod, HttpRequest, HttpResponse};
use crate::telemetry::DeviceId;

// ─── Reloj ───

#[derive(Debug, Default, Clone)]
pub struct FakeClock {
    ticks: Rc<Cell<u64>>,
    time: Rc<Cell<Option<TimeOfDay>>>,
}

impl FakeClock {
    pub fn ticks(&self) -> u64 {
        self.ticks.get()
    }

    pub fn advance(&self, ms: u64) {
        self.ticks.set(self.ticks.get() + ms);
    }

    pub fn set_time(&self, time: Option<TimeOfDay>) {
        self.time.set(time);
    }
}

impl Clock for FakeClock {
    fn ticks_ms(&self) -> u64 {
        self.ticks.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration.as_millis() as u64);
    }

    fn time_of_day(&self) -> Option<TimeOfDay> {
        self.time.get()
    }
}

// ─── NVS ───

#[derive(Debug, Clone, PartialEq, Eq)]
enum Stored {
    Str(String),
    I32(i32),
}

#[derive(Debug, Default)]
struct StoreState {
    values: HashMap<(String, &'static str), Stored>,
    namespaces: HashSet<String>,
    failing_key: Option<&'static str>,
    open_handles: usize,
}

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Rc<RefCell<StoreState>>,
}

impl MemoryStore {
    /// Toda escritura a `key` falla a partir de ahora.
    pub fn fail_writes_to(&self, key: &'static str) {
        self.state.borrow_mut().failing_key = Some(key);
    }

    pub fn open_handles(&self) -> usize {
        self.state.borrow().open_handles
    }

    pub fn str_value(&self, namespace: &str, key: &'static str) -> Option<String> {
        match self.state.borrow().values.get(&(namespace.to_string(), key)) {
            Some(Stored::Str(s)) => Some(s.clone()),
            _ => None,
        }
    }

    pub fn i32_value(&self, namespace: &str, key: &'static str) -> Option<i32> {
        match self.state.borrow().values.get(&(namespace.to_string(), key)) {
            Some(Stored::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn put_str(&self, namespace: &str, key: &'static str, value: &str) {
        self.put(namespace, key, Stored::Str(value.to_string()));
    }

    pub fn put_i32(&self, namespace: &str, key: &'static str, value: i32) {
        self.put(namespace, key, Stored::I32(value));
    }

    fn put(&self, namespace: &str, key: &'static str, value: Stored) {
        let mut state = self.state.borrow_mut();
        state.namespaces.insert(namespace.to_string());
        state.values.insert((namespace.to_string(), key), value);
    }
}

impl KeyValueStore for MemoryStore {
    type Namespace = MemoryNamespace;

    fn open(&mut self, namespace: &str, read_write: bool) -> Result<MemoryNamespace, StoreError> {
        let mut state = self.state.borrow_mut();
        if !state.namespaces.contains(namespace) {
            if !read_write {
                return Err(StoreError::Unavailable {
                    namespace: namespace.to_string(),
                    reason: "not found".into(),
                });
            }
            state.namespaces.insert(namespace.to_string());
        }
        state.open_handles += 1;

        Ok(MemoryNamespace {
            state: self.state.clone(),
            namespace: namespace.to_string(),
        })
    }
}

pub struct MemoryNamespace {
    state: Rc<RefCell<StoreState>>,
    namespace: String,
}

impl MemoryNamespace {
    fn get(&self, key: &'static str) -> Option<Stored> {
        self.state
            .borrow()
            .values
            .get(&(self.namespace.clone(), key))
            .cloned()
    }

    fn set(&mut self, key: &'static str, value: Stored) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        if state.failing_key == Some(key) {
            return Err(StoreError::WriteFailed {
                key,
                reason: "flash full".into(),
            });
        }
        state.values.insert((self.namespace.clone(), key), value);
        Ok(())
    }
}

impl Namespace for MemoryNamespace {
    fn get_str(&self, key: &'static str) -> Result<Option<String>, StoreError> {
        match self.get(key) {
            Some(Stored::Str(s)) => Ok(Some(s)),
            Some(Stored::I32(_)) => Err(StoreError::ReadFailed {
                key,
                reason: "type mismatch".into(),
            }),
            None => Ok(None),
        }
    }

    fn get_i32(&self, key: &'static str) -> Result<Option<i32>, StoreError> {
        match self.get(key) {
            Some(Stored::I32(v)) => Ok(Some(v)),
            Some(Stored::Str(_)) => Err(StoreError::ReadFailed {
                key,
                reason: "type mismatch".into(),
            }),
            None => Ok(None),
        }
    }

    fn set_str(&mut self, key: &'static str, value: &str) -> Result<(), StoreError> {
        self.set(key, Stored::Str(value.to_string()))
    }

    fn set_i32(&mut self, key: &'static str, value: i32) -> Result<(), StoreError> {
        self.set(key, Stored::I32(value))
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl Drop for MemoryNamespace {
    fn drop(&mut self) {
        self.state.borrow_mut().open_handles -= 1;
    }
}

// ─── Radio WiFi ───

#[derive(Debug, Default)]
struct RadioState {
    access_point_starts: u32,
    access_point_fails: bool,
    station: Option<(String, String)>,
    /// Chequeos fallidos antes de asociar. `None` = nunca asocia.
    checks_before_link: Option<u32>,
    pending_checks: Option<u32>,
    linked: bool,
}

#[derive(Debug, Default, Clone)]
pub struct FakeRadio {
    state: Rc<RefCell<RadioState>>,
}

impl FakeRadio {
    pub fn associate_after(&self, failed_checks: u32) {
        self.state.borrow_mut().checks_before_link = Some(failed_checks);
    }

    pub fn fail_access_point(&self) {
        self.state.borrow_mut().access_point_fails = true;
    }

    /// El AP se cae y no vuelve solo.
    pub fn lose_link(&self) {
        let mut state = self.state.borrow_mut();
        state.linked = false;
        state.pending_checks = None;
    }

    pub fn access_point_starts(&self) -> u32 {
        self.state.borrow().access_point_starts
    }

    pub fn last_station(&self) -> Option<(String, String)> {
        self.state.borrow().station.clone()
    }
}

impl WifiRadio for FakeRadio {
    fn start_access_point(&mut self, _settings: &AccessPointSettings) -> Result<(), NetworkError> {
        let mut state = self.state.borrow_mut();
        if state.access_point_fails {
            return Err(NetworkError::Radio("AP start failed".into()));
        }
        state.access_point_starts += 1;
        state.linked = false;
        Ok(())
    }

    fn begin_association(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError> {
        let mut state = self.state.borrow_mut();
        state.station = Some((ssid.to_string(), passphrase.to_string()));
        state.linked = false;
        state.pending_checks = state.checks_before_link;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        let mut state = self.state.borrow_mut();
        if state.linked {
            return true;
        }
        let pending = state.pending_checks;
        match pending {
            Some(0) => {
                state.linked = true;
                true
            }
            Some(n) => {
                state.pending_checks = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn ip_address(&self) -> Option<Ipv4Addr> {
        self.state
            .borrow()
            .linked
            .then(|| Ipv4Addr::new(192, 168, 1, 50))
    }

    fn mac_address(&self) -> Result<[u8; 6], NetworkError> {
        Ok([0xa0, 0xb1, 0xc2, 0x03, 0x04, 0xff])
    }
}

// ─── MQTT ───

#[derive(Debug)]
struct MqttState {
    reachable: bool,
    connected: bool,
    connect_attempts: u32,
    last_options: Option<ConnectOptions>,
    published: Vec<(String, Vec<u8>)>,
    subscribed: Vec<String>,
    inbox: VecDeque<Command>,
}

impl Default for MqttState {
    fn default() -> Self {
        Self {
            reachable: true,
            connected: false,
            connect_attempts: 0,
            last_options: None,
            published: Vec::new(),
            subscribed: Vec::new(),
            inbox: VecDeque::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct FakeMqtt {
    state: Rc<RefCell<MqttState>>,
}

impl FakeMqtt {
    pub fn set_reachable(&self, reachable: bool) {
        self.state.borrow_mut().reachable = reachable;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state.borrow().connect_attempts
    }

    pub fn last_options(&self) -> Option<ConnectOptions> {
        self.state.borrow().last_options.clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.state.borrow().published.clone()
    }

    /// Todas las suscripciones hechas, en orden (incluye re-suscripciones).
    pub fn subscribed(&self) -> Vec<String> {
        self.state.borrow().subscribed.clone()
    }

    pub fn is_link_up(&self) -> bool {
        self.state.borrow().connected
    }

    pub fn deliver(&self, command: Command) {
        self.state.borrow_mut().inbox.push_back(command);
    }

    pub fn drop_link(&self) {
        self.state.borrow_mut().connected = false;
    }

    /// Reconexión automática del cliente, sin pasar por connect().
    pub fn restore_link(&self) {
        self.state.borrow_mut().connected = true;
    }
}

impl MqttTransport for FakeMqtt {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        state.connect_attempts += 1;
        state.last_options = Some(options.clone());
        if state.reachable {
            state.connected = true;
            Ok(())
        } else {
            Err(BrokerError::ConnectTimeout)
        }
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        state.subscribed.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(BrokerError::NotConnected);
        }
        state.published.push((topic.to_string(), payload.to_vec()));
        Ok(())
    }

    fn poll(&mut self) -> Option<Command> {
        self.state.borrow_mut().inbox.pop_front()
    }
}

// ─── HTTP ───

#[derive(Debug, Default)]
struct HttpState {
    pending: VecDeque<HttpRequest>,
    responses: Vec<HttpResponse>,
}

#[derive(Debug, Default, Clone)]
pub struct FakeHttp {
    state: Rc<RefCell<HttpState>>,
}

impl FakeHttp {
    /// Encola un GET como lo haría el browser ("/save?ssid=...").
    pub fn get(&self, uri: &str) {
        self.push(HttpRequest::from_uri(HttpMethod::Get, uri, ""));
    }

    pub fn push(&self, request: HttpRequest) {
        self.state.borrow_mut().pending.push_back(request);
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn responses(&self) -> Vec<HttpResponse> {
        self.state.borrow().responses.clone()
    }
}

impl HttpResponder for FakeHttp {
    fn serve_next(&mut self, handler: &mut dyn FnMut(&HttpRequest) -> HttpResponse) -> bool {
        let Some(request) = self.state.borrow_mut().pending.pop_front() else {
            return false;
        };
        let response = handler(&request);
        self.state.borrow_mut().responses.push(response);
        true
    }
}

// ─── GPIO, sensor, UART ───

#[derive(Debug, Default, Clone)]
pub struct FakeOutput {
    high: Rc<Cell<bool>>,
}

impl FakeOutput {
    pub fn level(&self) -> bool {
        self.high.get()
    }
}

impl DigitalOutput for FakeOutput {
    fn set_level(&mut self, high: bool) -> Result<(), RuntimeError> {
        self.high.set(high);
        Ok(())
    }

    fn is_high(&self) -> bool {
        self.high.get()
    }
}

#[derive(Debug, Clone)]
pub struct FakeSensor {
    reading: Rc<Cell<Option<f32>>>,
}

impl Default for FakeSensor {
    fn default() -> Self {
        Self {
            reading: Rc::new(Cell::new(Some(43.5))),
        }
    }
}

impl FakeSensor {
    /// `None` simula un sensor que falla.
    pub fn set_reading(&self, reading: Option<f32>) {
        self.reading.set(reading);
    }
}

impl TemperatureSensor for FakeSensor {
    fn read_celsius(&mut self) -> Result<f32, RuntimeError> {
        self.reading
            .get()
            .ok_or_else(|| RuntimeError::SensorRead("sensor offline".into()))
    }
}

#[derive(Debug, Default, Clone)]
pub struct CaptureSink {
    lines: Rc<RefCell<Vec<String>>>,
}

impl CaptureSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

impl DiagnosticSink for CaptureSink {
    fn emit(&mut self, line: &str) {
        self.lines.borrow_mut().push(line.to_string());
    }
}

#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub seen: Vec<Command>,
}

impl MessageHandler for RecordingHandler {
    fn on_message(&mut self, command: &Command) {
        self.seen.push(command.clone());
    }
}

// ─── Plataforma de test ───

pub struct TestPlatform;

impl Platform for TestPlatform {
    type Store = MemoryStore;
    type Radio = FakeRadio;
    type Mqtt = FakeMqtt;
    type Http = FakeHttp;
    type Output = FakeOutput;
    type Sensor = FakeSensor;
    type Sink = CaptureSink;
    type Clock = FakeClock;
}

/// Un handle de cada fake. `board()` entrega clones a la máquina.
#[derive(Default)]
pub struct Rig {
    pub store: MemoryStore,
    pub radio: FakeRadio,
    pub mqtt: FakeMqtt,
    pub http: FakeHttp,
    pub output: FakeOutput,
    pub sensor: FakeSensor,
    pub sink: CaptureSink,
    pub clock: FakeClock,
}

impl Rig {
    pub fn board(&self) -> Board<TestPlatform> {
        Board {
            store: self.store.clone(),
            radio: self.radio.clone(),
            mqtt: self.mqtt.clone(),
            http: self.http.clone(),
            output: self.output.clone(),
            sensor: self.sensor.clone(),
            sink: self.sink.clone(),
            clock: self.clock.clone(),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        let mac = self.radio.mac_address().unwrap_or([0; 6]);
        DeviceId::from_mac(mac)
    }

    /// Deja una config guardada, como si el portal ya hubiera corrido.
    pub fn provision(&self, ssid: &str, passphrase: &str, host: &str, port: u16) {
        let config = DeviceConfig {
            ssid: ssid.into(),
            passphrase: passphrase.into(),
            broker_host: host.into(),
            broker_port: port,
            broker_user: String::new(),
            broker_pass: String::new(),
        };
        ConfigStore::new(self.store.clone())
            .save(&config)
            .expect("provision");
    }

    /// Lo que quedó en NVS.
    pub fn store_config(&self) -> DeviceConfig {
        ConfigStore::new(self.store.clone()).load()
    }
}
