// ─── Paso 3: MQTT Telemetry (Núcleo portable) ───
//
// El dispositivo se provisiona por un portal web, se conecta al WiFi y a un
// broker MQTT (TLS en 8883), publica telemetría cada 5 s y acepta comandos
// para un GPIO y para el espejo por UART.
//
// Todo lo que no toca hardware vive acá y se testea en el host. El módulo
// `esp` implementa las interfaces de `platform` sobre ESP-IDF.

pub mod broker;
pub mod commands;
pub mod config_store;
pub mod error;
pub mod machine;
pub mod platform;
pub mod portal;
pub mod retry;
pub mod settings;
pub mod telemetry;
pub mod wifi;

#[cfg(target_os = "espidf")]
pub mod esp;

#[cfg(test)]
mod testing;

pub use error::DeviceError;
pub use machine::{ConnectionState, DeviceStateMachine, RestartReason, Step};
pub use settings::Settings;
