// ─── Paso 3: ProvisioningPortal (Portal de configuración WiFi + MQTT) ───
//
// Cuando el dispositivo NO está provisionado (o la red/broker fallaron),
// entra en modo Access Point: crea una red WiFi propia ("ESP32-Setup")
// donde el usuario se conecta y configura todo via browser.
//
// Flujo:
// 1. Device levanta el AP de setup
// 2. Usuario se conecta a "ESP32-Setup" / "12345678"
// 3. Abre http://192.168.4.1 en el browser
// 4. Llena SSID, password y los datos del broker MQTT
// 5. Device guarda la config en NVS y reinicia la secuencia de conexión
//
// Las credenciales del AP son fijas y públicas: cualquiera en rango de radio
// puede provisionar el equipo. Es el modelo de setup supervisado de este tipo
// de dispositivos, no un agujero a tapar acá.

use std::borrow::Cow;

use log::{error, info, warn};

use crate::config_store::{ConfigStore, DeviceConfig, DEFAULT_BROKER_PORT};
use crate::error::{NetworkError, ProvisioningError};
use crate::platform::{KeyValueStore, WifiRadio};
use crate::wifi::{MAX_PASSPHRASE_LEN, MAX_SSID_LEN};

// ─── Configuración del Access Point ───

pub const AP_SSID: &str = "ESP32-Setup";
pub const AP_PASSWORD: &str = "12345678"; // Mínimo 8 chars para WPA2
pub const AP_CHANNEL: u8 = 1;
pub const AP_MAX_CONNECTIONS: u16 = 4;

/// Parámetros del AP de setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointSettings {
    pub ssid: &'static str,
    pub password: &'static str,
    pub channel: u8,
    pub max_connections: u16,
}

impl Default for AccessPointSettings {
    fn default() -> Self {
        Self {
            ssid: AP_SSID,
            password: AP_PASSWORD,
            channel: AP_CHANNEL,
            max_connections: AP_MAX_CONNECTIONS,
        }
    }
}

// ─── Request / Response ───

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Request ya leído por el servidor HTTP de la plataforma.
///
/// `form` es el query string (GET) o el body url-encoded (POST).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub form: String,
}

impl HttpRequest {
    /// Separa "/save?ssid=x" en path y query.
    pub fn from_uri(method: HttpMethod, uri: &str, body: &str) -> Self {
        let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
        let form = match method {
            HttpMethod::Post if !body.is_empty() => body.to_string(),
            _ => query.to_string(),
        };
        Self {
            method,
            path: path.to_string(),
            form,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Cow<'static, str>,
}

impl HttpResponse {
    pub fn html(status: u16, body: impl Into<Cow<'static, str>>) -> Self {
        Self {
            status,
            content_type: "text/html",
            body: body.into(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: "text/plain",
            body: Cow::Borrowed("Not Found"),
        }
    }
}

// ─── HTML ───

const HTML_FORM: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>ESP32 Config</title>
    <style>
        body { font-family: -apple-system, sans-serif; max-width: 400px; margin: 50px auto; padding: 20px; background: #1a1a2e; color: #eee; }
        h1 { color: #00d4ff; text-align: center; }
        form { background: #16213e; padding: 20px; border-radius: 10px; }
        label { display: block; margin: 15px 0 5px; color: #00d4ff; }
        input { width: 100%; padding: 12px; border: 1px solid #0f3460; border-radius: 5px; background: #1a1a2e; color: #fff; box-sizing: border-box; }
        button { width: 100%; padding: 15px; margin-top: 20px; background: #00d4ff; color: #1a1a2e; border: none; border-radius: 5px; font-weight: bold; cursor: pointer; }
        .info { font-size: 12px; color: #888; margin-top: 5px; }
    </style>
</head>
<body>
    <h1>ESP32 Configuration</h1>
    <form method="POST" action="/save">
        <label>WiFi Network (SSID)</label>
        <input type="text" name="ssid" required maxlength="32">

        <label>WiFi Password</label>
        <input type="password" name="passphrase" required maxlength="64">

        <label>MQTT Broker Address</label>
        <input type="text" name="brokerHost" maxlength="128">

        <label>MQTT Port</label>
        <input type="number" name="brokerPort" value="8883" min="1" max="65535">
        <div class="info">8883 = TLS, any other port = plain MQTT</div>

        <label>MQTT Username</label>
        <input type="text" name="brokerUser" maxlength="64">

        <label>MQTT Password</label>
        <input type="password" name="brokerPass" maxlength="64">

        <button type="submit">Save</button>
    </form>
</body>
</html>"#;

const HTML_SAVED: &str = "<h2>Settings saved. Restarting...</h2>";

const HTML_NOT_PERSISTED: &str = "<h2>Settings could not be stored.</h2>\
<p>They will be used until the next power cycle.</p>";

// ─── Portal ───

/// Config recibida por `/save`.
#[derive(Debug)]
pub struct Submission {
    pub config: DeviceConfig,
    /// `false` si NVS rechazó la escritura: la config vale solo en RAM.
    pub persisted: bool,
}

#[derive(Debug)]
pub struct PortalOutcome {
    pub response: HttpResponse,
    pub submission: Option<Submission>,
}

#[derive(Debug, Default)]
pub struct ProvisioningPortal {
    settings: AccessPointSettings,
    active: bool,
}

impl ProvisioningPortal {
    pub fn new(settings: AccessPointSettings) -> Self {
        Self {
            settings,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Levanta el AP de setup. El servidor HTTP ya está corriendo.
    pub fn activate<R: WifiRadio>(&mut self, radio: &mut R) -> Result<(), NetworkError> {
        if self.active {
            return Ok(());
        }

        radio.start_access_point(&self.settings)?;
        self.active = true;

        info!("Provisioning mode active");
        info!(
            "Connect to WiFi: '{}' / Password: '{}'",
            self.settings.ssid, self.settings.password
        );
        info!("Then open http://192.168.4.1 in your browser");
        Ok(())
    }

    /// El AP se reemplaza por la config de station al asociar.
    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Rutea un request: `GET /` sirve el formulario, `GET|POST /save`
    /// valida, persiste y devuelve la config para reiniciar la secuencia.
    pub fn handle<S: KeyValueStore>(
        &mut self,
        request: &HttpRequest,
        store: &mut ConfigStore<S>,
    ) -> PortalOutcome {
        match (request.method, request.path.as_str()) {
            (HttpMethod::Get, "/") => PortalOutcome {
                response: HttpResponse::html(200, HTML_FORM),
                submission: None,
            },
            (_, "/save") => self.save(request, store),
            _ => PortalOutcome {
                response: HttpResponse::not_found(),
                submission: None,
            },
        }
    }

    fn save<S: KeyValueStore>(
        &mut self,
        request: &HttpRequest,
        store: &mut ConfigStore<S>,
    ) -> PortalOutcome {
        let config = match parse_submission(&request.form) {
            Ok(config) => config,
            Err(e) => {
                warn!("Rejected provisioning form: {}", e);
                return PortalOutcome {
                    response: HttpResponse::html(400, format!("<h2>{}</h2>", e)),
                    submission: None,
                };
            }
        };

        info!("===== SETTINGS RECEIVED FROM FORM =====");
        info!("{:?}", config);

        match store.save(&config) {
            Ok(()) => PortalOutcome {
                response: HttpResponse::html(200, HTML_SAVED),
                submission: Some(Submission {
                    config,
                    persisted: true,
                }),
            },
            Err(e) => {
                error!("Failed to store config: {}", e);
                PortalOutcome {
                    response: HttpResponse::html(500, HTML_NOT_PERSISTED),
                    submission: Some(Submission {
                        config,
                        persisted: false,
                    }),
                }
            }
        }
    }
}

// ─── Parsing del formulario ───

/// Arma la `DeviceConfig` a partir del form url-encoded.
///
/// `ssid` y `passphrase` son obligatorios. Los campos del broker son
/// opcionales; un puerto ausente o no numérico usa 8883.
/// También acepta los nombres de campo del formulario original
/// (`wifiSSID`, `mqttServer`, ...).
pub fn parse_submission(form: &str) -> Result<DeviceConfig, ProvisioningError> {
    let mut config = DeviceConfig::default();
    let mut port = String::new();

    for pair in form.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decoded = urlencoding_decode(value);
        match key {
            "ssid" | "wifiSSID" => config.ssid = decoded,
            "passphrase" | "wifiPassword" => config.passphrase = decoded,
            "brokerHost" | "mqttServer" => config.broker_host = decoded.trim().to_string(),
            "brokerPort" | "mqttPort" => port = decoded,
            "brokerUser" | "mqttUser" => config.broker_user = decoded,
            "brokerPass" | "mqttPass" => config.broker_pass = decoded,
            _ => {}
        }
    }

    if config.ssid.is_empty() {
        return Err(ProvisioningError::MissingField("ssid"));
    }
    if config.passphrase.is_empty() {
        return Err(ProvisioningError::MissingField("passphrase"));
    }
    // Lo que no entra en la config del driver fallaría en cada arranque
    if config.ssid.len() > MAX_SSID_LEN {
        return Err(ProvisioningError::TooLong {
            field: "ssid",
            max: MAX_SSID_LEN,
        });
    }
    if config.passphrase.len() > MAX_PASSPHRASE_LEN {
        return Err(ProvisioningError::TooLong {
            field: "passphrase",
            max: MAX_PASSPHRASE_LEN,
        });
    }

    config.broker_port = port
        .trim()
        .parse::<u16>()
        .ok()
        .filter(|p| *p != 0)
        .unwrap_or(DEFAULT_BROKER_PORT);

    Ok(config)
}

// ─── URL Decoding ───

/// Decodifica URL encoding (maneja %XX y + como espacio).
///
/// Los bytes %XX se juntan antes de convertir, así un SSID con acentos
/// ("Caf%C3%A9") vuelve como UTF-8 válido.
pub fn urlencoding_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRadio, MemoryStore};

    fn get(path: &str, form: &str) -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            path: path.to_string(),
            form: form.to_string(),
        }
    }

    #[test]
    fn root_serves_form() {
        let mut portal = ProvisioningPortal::default();
        let mut store = ConfigStore::new(MemoryStore::default());

        let outcome = portal.handle(&get("/", ""), &mut store);

        assert_eq!(outcome.response.status, 200);
        assert!(outcome.response.body.contains("action=\"/save\""));
        assert!(outcome.submission.is_none());
    }

    #[test]
    fn unknown_route_is_404() {
        let mut portal = ProvisioningPortal::default();
        let mut store = ConfigStore::new(MemoryStore::default());

        let outcome = portal.handle(&get("/admin", ""), &mut store);
        assert_eq!(outcome.response.status, 404);
    }

    #[test]
    fn save_persists_and_returns_submission() {
        let backend = MemoryStore::default();
        let mut portal = ProvisioningPortal::default();
        let mut store = ConfigStore::new(backend.clone());

        let request = HttpRequest::from_uri(
            HttpMethod::Post,
            "/save",
            "ssid=Home&passphrase=secret123&brokerHost=broker.local&brokerPort=8883&brokerUser=u&brokerPass=p",
        );
        let outcome = portal.handle(&request, &mut store);

        assert_eq!(outcome.response.status, 200);
        let submission = outcome.submission.expect("submission");
        assert!(submission.persisted);
        assert_eq!(submission.config.broker_host, "broker.local");
        assert_eq!(ConfigStore::new(backend).load(), submission.config);
    }

    #[test]
    fn missing_passphrase_is_rejected() {
        let mut portal = ProvisioningPortal::default();
        let mut store = ConfigStore::new(MemoryStore::default());

        let outcome = portal.handle(&get("/save", "ssid=Home"), &mut store);

        assert_eq!(outcome.response.status, 400);
        assert!(outcome.submission.is_none());
    }

    #[test]
    fn oversized_credentials_are_rejected_before_saving() {
        let backend = MemoryStore::default();
        let mut portal = ProvisioningPortal::default();
        let mut store = ConfigStore::new(backend.clone());

        let long_ssid = format!("ssid={}&passphrase=secret123", "a".repeat(33));
        let outcome = portal.handle(&get("/save", &long_ssid), &mut store);
        assert_eq!(outcome.response.status, 400);
        assert!(outcome.submission.is_none());

        let long_pass = format!("ssid=Home&passphrase={}", "p".repeat(65));
        let outcome = portal.handle(&get("/save", &long_pass), &mut store);
        assert_eq!(outcome.response.status, 400);
        assert!(outcome.submission.is_none());

        assert!(!ConfigStore::new(backend).load().is_provisioned());
    }

    #[test]
    fn credentials_at_the_limit_are_accepted() {
        let form = format!("ssid={}&passphrase={}", "a".repeat(32), "p".repeat(64));
        let config = parse_submission(&form).expect("valid form");
        assert_eq!(config.ssid.len(), 32);
        assert_eq!(config.passphrase.len(), 64);
    }

    #[test]
    fn store_failure_still_yields_in_memory_config() {
        let backend = MemoryStore::default();
        backend.fail_writes_to("wifiPassword");
        let mut portal = ProvisioningPortal::default();
        let mut store = ConfigStore::new(backend);

        let outcome = portal.handle(&get("/save", "ssid=Home&passphrase=pw123456"), &mut store);

        assert_eq!(outcome.response.status, 500);
        let submission = outcome.submission.expect("submission");
        assert!(!submission.persisted);
        assert_eq!(submission.config.ssid, "Home");
    }

    #[test]
    fn port_defaults_when_absent_or_garbage() {
        let absent = parse_submission("ssid=a&passphrase=b").unwrap();
        assert_eq!(absent.broker_port, DEFAULT_BROKER_PORT);

        let garbage = parse_submission("ssid=a&passphrase=b&brokerPort=mqtt").unwrap();
        assert_eq!(garbage.broker_port, DEFAULT_BROKER_PORT);

        let plain = parse_submission("ssid=a&passphrase=b&brokerPort=1883").unwrap();
        assert_eq!(plain.broker_port, 1883);
    }

    #[test]
    fn legacy_field_names_are_accepted() {
        let config =
            parse_submission("wifiSSID=Home&wifiPassword=pw&mqttServer=b.local&mqttPort=1883")
                .unwrap();
        assert_eq!(config.ssid, "Home");
        assert_eq!(config.passphrase, "pw");
        assert_eq!(config.broker_host, "b.local");
        assert_eq!(config.broker_port, 1883);
    }

    #[test]
    fn decodes_plus_and_utf8_escapes() {
        assert_eq!(urlencoding_decode("Mi+Red"), "Mi Red");
        assert_eq!(urlencoding_decode("abc%21"), "abc!");
        assert_eq!(urlencoding_decode("Caf%C3%A9"), "Café");
        assert_eq!(urlencoding_decode("100%"), "100%");
        assert_eq!(urlencoding_decode("%zz"), "%zz");
    }

    #[test]
    fn from_uri_splits_query() {
        let request = HttpRequest::from_uri(HttpMethod::Get, "/save?ssid=x&passphrase=y", "");
        assert_eq!(request.path, "/save");
        assert_eq!(request.form, "ssid=x&passphrase=y");
    }

    #[test]
    fn activation_starts_access_point_once() {
        let radio_handle = FakeRadio::default();
        let mut radio = radio_handle.clone();
        let mut portal = ProvisioningPortal::default();

        portal.activate(&mut radio).unwrap();
        portal.activate(&mut radio).unwrap();

        assert!(portal.is_active());
        assert_eq!(radio_handle.access_point_starts(), 1);
    }
}
