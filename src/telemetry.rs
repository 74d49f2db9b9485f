// ─── Paso 3: Telemetría periódica ───
//
// Cada 5 s (medidos con el reloj monotónico) se arma un TelemetrySample y
// se publica en status/<deviceId>. Si no hay sesión el sample se descarta:
// no se encola ni se reintenta, y la cadencia sigue igual.

use std::fmt::{self, Write as _};
use std::net::Ipv4Addr;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::broker::BrokerSession;
use crate::error::{BrokerError, RuntimeError};
use crate::platform::{Clock, DiagnosticSink, MqttTransport, TimeOfDay};

// ─── Identidad del dispositivo ───

/// MAC en hex mayúscula sin separadores, ej. "A0B1C2D3E4F5".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceId(heapless::String<12>);

impl DeviceId {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut id = heapless::String::new();
        for byte in mac {
            // 6 bytes × 2 chars = 12: siempre entra
            let _ = write!(id, "{:02X}", byte);
        }
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Sample ───

/// Payload JSON publicado en `status/<deviceId>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    #[serde(rename = "MessageID")]
    pub message_id: u64,
    #[serde(rename = "FwVerEsp")]
    pub firmware_version: String,
    #[serde(rename = "InternalTemperature")]
    pub temperature: String,
    #[serde(rename = "ip")]
    pub ip_address: String,
    #[serde(rename = "Time")]
    pub timestamp: String,
    #[serde(rename = "GPIOStatus")]
    pub actuator_status: &'static str,
}

/// Lecturas tomadas justo antes de publicar.
#[derive(Debug, Clone)]
pub struct TelemetryInputs {
    pub temperature: Result<f32, RuntimeError>,
    pub wifi_connected: bool,
    pub ip: Option<Ipv4Addr>,
    pub time: Option<TimeOfDay>,
    pub actuator_high: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { message_id: u64 },
    Dropped(BrokerError),
}

// ─── Publisher ───

pub struct TelemetryPublisher {
    topic: String,
    firmware_version: &'static str,
    interval: Duration,
    last_publish_ms: Option<u64>,
    next_message_id: u64,
}

impl TelemetryPublisher {
    pub fn new(device_id: &DeviceId, firmware_version: &'static str, interval: Duration) -> Self {
        Self {
            topic: format!("status/{}", device_id),
            firmware_version,
            interval,
            last_publish_ms: None,
            // Vive solo en RAM: vuelve a 1 en cada reboot
            next_message_id: 1,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// El primer sample sale apenas se entra en `Running`.
    pub fn restart_cadence(&mut self) {
        self.last_publish_ms = None;
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_publish_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval.as_millis() as u64,
        }
    }

    pub fn build_sample(&self, inputs: &TelemetryInputs) -> TelemetrySample {
        let temperature = match &inputs.temperature {
            Ok(celsius) => format!("{:.2}C", celsius),
            Err(e) => {
                warn!("{}", e);
                "N/A".to_string()
            }
        };

        let (ip_address, timestamp) = if inputs.wifi_connected {
            let ip = inputs
                .ip
                .map(|ip| ip.to_string())
                .unwrap_or_else(|| "Not connected".to_string());
            let time = inputs
                .time
                .map(|t| t.to_string())
                .unwrap_or_else(|| "Time not synced".to_string());
            (ip, time)
        } else {
            ("Not connected".to_string(), "Unavailable".to_string())
        };

        TelemetrySample {
            message_id: self.next_message_id,
            firmware_version: self.firmware_version.to_string(),
            temperature,
            ip_address,
            timestamp,
            actuator_status: if inputs.actuator_high { "1" } else { "0" },
        }
    }

    /// Arma y publica un sample.
    ///
    /// El MessageID solo avanza con publicaciones exitosas: un sample
    /// descartado no consume número. `mirror` recibe todos los samples,
    /// publicados o no.
    pub fn publish<T, C, D>(
        &mut self,
        now_ms: u64,
        inputs: &TelemetryInputs,
        session: &mut BrokerSession<T, C>,
        mirror: Option<&mut D>,
    ) -> PublishOutcome
    where
        T: MqttTransport,
        C: Clock,
        D: DiagnosticSink,
    {
        self.last_publish_ms = Some(now_ms);

        let sample = self.build_sample(inputs);
        let json = match serde_json::to_string(&sample) {
            Ok(json) => json,
            Err(e) => return PublishOutcome::Dropped(BrokerError::Transport(e.to_string())),
        };

        if let Some(sink) = mirror {
            sink.emit(&json);
        }

        match session.publish(&self.topic, json.as_bytes()) {
            Ok(()) => {
                debug!("Published MessageID {} to {}", sample.message_id, self.topic);
                self.next_message_id += 1;
                PublishOutcome::Published {
                    message_id: sample.message_id,
                }
            }
            Err(e) => {
                warn!("Telemetry sample {} dropped: {}", sample.message_id, e);
                PublishOutcome::Dropped(e)
            }
        }
    }
}
