// ─── Paso 3: Parámetros del firmware ───
//
// Todo lo que define el "perfil" del dispositivo: topes de reintentos,
// intervalos, política ante broker caído. `Settings::default()` es el
// perfil documentado.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Versión reportada en el campo `FwVerEsp`.
pub const FW_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Zona horaria POSIX para el campo `Time` (Europa central con DST).
pub const TIMEZONE: &str = "CET-1CEST,M3.5.0/2,M10.5.0/3";

/// Período del loop de control en el ESP32.
pub const CONTROL_LOOP_TICK_MS: u32 = 10;

/// Qué hacer cuando el broker no responde tras agotar los reintentos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerFailurePolicy {
    /// Tratarlo como configuración incorrecta y volver al portal de setup.
    Reprovision,
    /// Seguir intentando en el siguiente ciclo sin tocar la configuración.
    KeepRetrying,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Asociación WiFi: 20 chequeos, 1 s entre ellos.
    pub wifi_retry: RetryPolicy,
    /// Conexión al broker: 5 intentos, 3 s entre ellos.
    pub broker_retry: RetryPolicy,
    /// Tope de bloqueo de un intento de conexión MQTT.
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    pub publish_interval: Duration,
    /// Cada cuánto se re-chequea la asociación WiFi en `Running`.
    pub supervision_interval: Duration,
    pub broker_failure: BrokerFailurePolicy,
    /// Estado inicial del espejo de telemetría por UART.
    pub diagnostics_enabled: bool,
    /// Tras un restart lógico, reiniciar también el chip.
    pub hard_restart: bool,
    pub restart_delay: Duration,
    pub firmware_version: &'static str,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            wifi_retry: RetryPolicy::new(20, Duration::from_secs(1)),
            broker_retry: RetryPolicy::new(5, Duration::from_secs(3)),
            connect_timeout: Duration::from_secs(10),
            keep_alive: Duration::from_secs(30),
            publish_interval: Duration::from_secs(5),
            supervision_interval: Duration::from_secs(10),
            broker_failure: BrokerFailurePolicy::Reprovision,
            diagnostics_enabled: true,
            hard_restart: true,
            restart_delay: Duration::from_secs(2),
            firmware_version: FW_VERSION,
        }
    }
}
