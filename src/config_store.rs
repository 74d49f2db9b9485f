// ─── Paso 3: ConfigStore (Configuración de red en NVS) ───
//
// NVS (Non-Volatile Storage) es la "flash persistente" del ESP32.
// Sobrevive reinicios y power cycles. Acá guardamos lo que el usuario
// cargó en el portal: WiFi + broker MQTT, en el namespace "config".
//
// La configuración se borra de memoria automáticamente al salir de scope
// gracias a Zeroize/ZeroizeOnDrop.

use std::fmt;

use log::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::StoreError;
use crate::platform::{KeyValueStore, Namespace};

// ─── Constantes NVS ───

pub const NVS_NAMESPACE: &str = "config";
const KEY_WIFI_SSID: &str = "wifiSSID";
const KEY_WIFI_PASS: &str = "wifiPassword";
const KEY_BROKER_HOST: &str = "mqttServer";
const KEY_BROKER_PORT: &str = "mqttPort";
const KEY_BROKER_USER: &str = "mqttUser";
const KEY_BROKER_PASS: &str = "mqttPass";

/// Puerto MQTT sobre TLS. También es el default cuando no hay uno guardado.
pub const DEFAULT_BROKER_PORT: u16 = 8883;

// ─── Configuración del dispositivo ───

/// Credenciales de WiFi y del broker.
///
/// O bien todo está vacío (sin provisionar) o `ssid` no está vacío.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct DeviceConfig {
    pub ssid: String,
    pub passphrase: String,
    pub broker_host: String,
    pub broker_port: u16,
    pub broker_user: String,
    pub broker_pass: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            passphrase: String::new(),
            broker_host: String::new(),
            broker_port: DEFAULT_BROKER_PORT,
            broker_user: String::new(),
            broker_pass: String::new(),
        }
    }
}

impl DeviceConfig {
    pub fn is_provisioned(&self) -> bool {
        !self.ssid.is_empty()
    }
}

// Nunca imprimir passwords: solo si están cargados
impl fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("ssid", &self.ssid)
            .field("passphrase_set", &!self.passphrase.is_empty())
            .field("broker_host", &self.broker_host)
            .field("broker_port", &self.broker_port)
            .field("broker_user", &self.broker_user)
            .field("broker_pass_set", &!self.broker_pass.is_empty())
            .finish()
    }
}

// ─── Config Store ───

/// Dueño exclusivo de la configuración persistida.
///
/// Cada operación abre el namespace, opera y lo cierra. El handle se cierra
/// en su `Drop`, así que también se libera cuando una escritura falla.
pub struct ConfigStore<S: KeyValueStore> {
    backend: S,
}

impl<S: KeyValueStore> ConfigStore<S> {
    pub fn new(backend: S) -> Self {
        Self { backend }
    }

    /// Carga la configuración guardada.
    ///
    /// Nunca falla: namespace ausente, claves ausentes o errores de lectura
    /// se traducen a string vacío / puerto default.
    pub fn load(&mut self) -> DeviceConfig {
        let nvs = match self.backend.open(NVS_NAMESPACE, false) {
            Ok(nvs) => nvs,
            Err(e) => {
                info!("No stored config ({}), starting unprovisioned", e);
                return DeviceConfig::default();
            }
        };

        let config = DeviceConfig {
            ssid: read_str(&nvs, KEY_WIFI_SSID),
            passphrase: read_str(&nvs, KEY_WIFI_PASS),
            broker_host: read_str(&nvs, KEY_BROKER_HOST),
            broker_port: read_port(&nvs),
            broker_user: read_str(&nvs, KEY_BROKER_USER),
            broker_pass: read_str(&nvs, KEY_BROKER_PASS),
        };

        // Sin SSID cualquier otro campo es resto de un save interrumpido
        if !config.is_provisioned() {
            info!("No SSID stored, starting unprovisioned");
            return DeviceConfig::default();
        }

        info!("Config loaded from NVS: {:?}", config);
        config
    }

    /// Guarda la configuración completa (replace-then-commit).
    ///
    /// El SSID es el marcador de "provisionado": primero se vacía, después
    /// se escriben los demás campos y el SSID va último. Si se corta la
    /// luz a mitad de camino el dispositivo queda sin provisionar, nunca
    /// con una mezcla de configuración vieja y nueva.
    pub fn save(&mut self, config: &DeviceConfig) -> Result<(), StoreError> {
        let mut nvs = self.backend.open(NVS_NAMESPACE, true).map_err(|e| match e {
            StoreError::Unavailable { reason, .. } => StoreError::WriteFailed {
                key: NVS_NAMESPACE,
                reason,
            },
            other => other,
        })?;

        nvs.set_str(KEY_WIFI_SSID, "")?;
        nvs.set_str(KEY_WIFI_PASS, &config.passphrase)?;
        nvs.set_str(KEY_BROKER_HOST, &config.broker_host)?;
        nvs.set_i32(KEY_BROKER_PORT, i32::from(config.broker_port))?;
        nvs.set_str(KEY_BROKER_USER, &config.broker_user)?;
        nvs.set_str(KEY_BROKER_PASS, &config.broker_pass)?;
        nvs.set_str(KEY_WIFI_SSID, &config.ssid)?;
        nvs.commit()?;

        info!("Config stored (ssid '{}')", config.ssid);
        Ok(())
    }
}

fn read_str<N: Namespace>(nvs: &N, key: &'static str) -> String {
    match nvs.get_str(key) {
        Ok(Some(val)) => val.trim_end_matches('\0').to_string(),
        Ok(None) => String::new(),
        Err(e) => {
            warn!("{}", e);
            String::new()
        }
    }
}

fn read_port<N: Namespace>(nvs: &N) -> u16 {
    match nvs.get_i32(KEY_BROKER_PORT) {
        Ok(Some(port)) => u16::try_from(port)
            .ok()
            .filter(|p| *p != 0)
            .unwrap_or(DEFAULT_BROKER_PORT),
        Ok(None) => DEFAULT_BROKER_PORT,
        Err(e) => {
            warn!("{}", e);
            DEFAULT_BROKER_PORT
        }
    }
}
