// ─── Paso 3: Interfaces de plataforma ───
//
// El núcleo no habla con ESP-IDF directamente: compone capacidades que la
// plataforma le entrega (NVS, radio WiFi, cliente MQTT, servidor HTTP,
// GPIO, sensor, reloj). En el ESP32 las implementa el módulo `esp`; en los
// tests, fakes en memoria.

use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::broker::ConnectOptions;
use crate::commands::Command;
use crate::error::{BrokerError, NetworkError, RuntimeError, StoreError};
use crate::portal::{AccessPointSettings, HttpRequest, HttpResponse};

// ─── Almacenamiento clave/valor ───

/// Partición key-value persistente (NVS en el ESP32).
pub trait KeyValueStore {
    type Namespace: Namespace;

    /// Abre un namespace. El handle se cierra al hacer drop, así que
    /// cualquier salida temprana (incluido `?`) libera el handle.
    fn open(&mut self, namespace: &str, read_write: bool) -> Result<Self::Namespace, StoreError>;
}

/// Handle abierto sobre un namespace.
pub trait Namespace {
    fn get_str(&self, key: &'static str) -> Result<Option<String>, StoreError>;
    fn get_i32(&self, key: &'static str) -> Result<Option<i32>, StoreError>;
    fn set_str(&mut self, key: &'static str, value: &str) -> Result<(), StoreError>;
    fn set_i32(&mut self, key: &'static str, value: i32) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
}

// ─── Radio WiFi ───

pub trait WifiRadio {
    /// Levanta el access point de setup (modo provisioning).
    fn start_access_point(&mut self, settings: &AccessPointSettings) -> Result<(), NetworkError>;

    /// Inicia la asociación como station. No bloquea: el progreso se
    /// consulta con `is_connected()`.
    fn begin_association(&mut self, ssid: &str, passphrase: &str) -> Result<(), NetworkError>;

    /// Asociado y con IP asignada.
    fn is_connected(&self) -> bool;

    fn ip_address(&self) -> Option<Ipv4Addr>;

    fn mac_address(&self) -> Result<[u8; 6], NetworkError>;
}

// ─── Cliente MQTT ───

pub trait MqttTransport {
    /// Un único intento de conexión, acotado por `options.connect_timeout`.
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError>;

    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;

    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError>;

    /// Mensaje entrante pendiente, si hay uno. Nunca bloquea.
    fn poll(&mut self) -> Option<Command>;
}

// ─── Servidor HTTP local ───

pub trait HttpResponder {
    /// Atiende como mucho un request pendiente llamando a `handler` en el
    /// thread de control. Retorna `true` si atendió uno.
    fn serve_next(&mut self, handler: &mut dyn FnMut(&HttpRequest) -> HttpResponse) -> bool;
}

// ─── Reloj ───

/// Hora local del día (para el campo `Time` de la telemetría).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeOfDay {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hour, self.minute, self.second)
    }
}

/// Reloj monotónico + hora de pared.
///
/// `ticks_ms` no salta con las resincronizaciones de SNTP; todos los
/// intervalos (publish, supervisión, reintentos) se miden con él.
pub trait Clock: Clone {
    fn ticks_ms(&self) -> u64;

    fn sleep(&self, duration: Duration);

    /// `None` mientras la hora no esté sincronizada.
    fn time_of_day(&self) -> Option<TimeOfDay>;
}

// ─── Sensores, actuadores y diagnóstico ───

pub trait TemperatureSensor {
    fn read_celsius(&mut self) -> Result<f32, RuntimeError>;
}

pub trait DigitalOutput {
    fn set_level(&mut self, high: bool) -> Result<(), RuntimeError>;

    fn is_high(&self) -> bool;
}

/// Canal de diagnóstico local (UART en el ESP32).
pub trait DiagnosticSink {
    fn emit(&mut self, line: &str);
}

/// Sink por defecto: usa el logger, que en el ESP32 sale por UART.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn emit(&mut self, line: &str) {
        log::info!(target: "uart", "Data over UART: {}", line);
    }
}

// ─── Bundle de la plataforma ───

/// Tipos concretos de una plataforma.
pub trait Platform {
    type Store: KeyValueStore;
    type Radio: WifiRadio;
    type Mqtt: MqttTransport;
    type Http: HttpResponder;
    type Output: DigitalOutput;
    type Sensor: TemperatureSensor;
    type Sink: DiagnosticSink;
    type Clock: Clock;
}

/// Una instancia de cada capacidad. Se entrega por valor a la máquina de
/// estados, que pasa a ser su única dueña.
pub struct Board<P: Platform> {
    pub store: P::Store,
    pub radio: P::Radio,
    pub mqtt: P::Mqtt,
    pub http: P::Http,
    pub output: P::Output,
    pub sensor: P::Sensor,
    pub sink: P::Sink,
    pub clock: P::Clock,
}
