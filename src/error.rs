// ─── Paso 3: Errores tipados por componente ───
//
// Cada hoja del sistema reporta su propio tipo de error. La máquina de
// estados decide qué hacer con ellos (reintentar, cambiar de estado o
// reiniciar); los componentes nunca escalan por su cuenta.

use thiserror::Error;

/// Fallos del almacenamiento persistente (NVS).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("namespace '{namespace}' unavailable: {reason}")]
    Unavailable { namespace: String, reason: String },

    #[error("read of '{key}' failed: {reason}")]
    ReadFailed { key: &'static str, reason: String },

    #[error("write of '{key}' failed: {reason}")]
    WriteFailed { key: &'static str, reason: String },
}

/// Formulario de provisioning incompleto o malformado.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProvisioningError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' longer than {max} bytes")]
    TooLong { field: &'static str, max: usize },
}

/// Fallos de la radio WiFi (station o access point).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("invalid WiFi credentials: {0}")]
    InvalidCredentials(&'static str),

    #[error("WiFi association failed after {attempts} attempts")]
    AssociationFailed { attempts: u32 },

    #[error("WiFi not associated")]
    NotAssociated,

    #[error("radio error: {0}")]
    Radio(String),
}

/// Fallos de la sesión MQTT.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("broker session not connected")]
    NotConnected,

    #[error("broker connect timed out")]
    ConnectTimeout,

    #[error("broker unreachable after {attempts} attempts")]
    Unreachable { attempts: u32 },

    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("malformed payload on '{topic}'")]
    MalformedPayload { topic: String },
}

/// Fallos de sensores y actuadores locales.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("sensor read failed: {0}")]
    SensorRead(String),

    #[error("actuator write failed: {0}")]
    Actuator(String),
}

/// Error de nivel superior: solo lo que la máquina no sabe recuperar.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
