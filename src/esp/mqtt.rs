// ─── Cliente MQTT sobre esp-idf-svc ───
//
// EspMqttClient entrega los eventos por una EspMqttConnection que hay que
// drenar en otro thread. Ese thread solo actualiza el flag de conexión y
// encola los mensajes recibidos; el loop de control los levanta con poll().
//
// El cliente de ESP-IDF reconecta solo. BrokerSession detecta el cambio
// del flag y se re-suscribe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use embedded_svc::mqtt::client::{EventPayload, QoS};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_svc::mqtt::client::{EspMqttClient, MqttClientConfiguration};
use log::{info, warn};

use crate::broker::{ConnectOptions, TransportKind};
use crate::commands::Command;
use crate::error::BrokerError;
use crate::platform::MqttTransport;

/// Mensajes entrantes en espera. Llegan comandos de a uno; si la cola está
/// llena el mensaje se descarta.
const INBOX_CAPACITY: usize = 4;

const POLL_THREAD_STACK: usize = 8192;

fn transport_err(e: impl std::fmt::Display) -> BrokerError {
    BrokerError::Transport(e.to_string())
}

pub struct EspMqtt {
    client: Option<EspMqttClient<'static>>,
    connected: Arc<AtomicBool>,
    inbox: Option<Receiver<Command>>,
}

impl EspMqtt {
    pub fn new() -> Self {
        Self {
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            inbox: None,
        }
    }
}

impl Default for EspMqtt {
    fn default() -> Self {
        Self::new()
    }
}

impl MqttTransport for EspMqtt {
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), BrokerError> {
        self.disconnect();

        let conf = MqttClientConfiguration {
            client_id: Some(&options.client_id),
            username: options.username.as_deref(),
            password: options.password.as_deref(),
            keep_alive_interval: Some(options.keep_alive),
            network_timeout: options.connect_timeout,
            // TLS: validar el certificado del broker con el bundle de CAs
            crt_bundle_attach: match options.transport {
                TransportKind::Tls => Some(esp_idf_svc::sys::esp_crt_bundle_attach),
                TransportKind::Plain => None,
            },
            ..Default::default()
        };

        let (client, mut conn) =
            EspMqttClient::new(&options.url(), &conf).map_err(transport_err)?;

        let connected = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::sync_channel(INBOX_CAPACITY);

        let flag = connected.clone();
        thread::Builder::new()
            .name("mqtt-poll".to_string())
            .stack_size(POLL_THREAD_STACK)
            .spawn(move || {
                // next() falla cuando el cliente se destruye
                while let Ok(event) = conn.next() {
                    match event.payload() {
                        EventPayload::Connected(_) => flag.store(true, Ordering::SeqCst),
                        EventPayload::Disconnected => flag.store(false, Ordering::SeqCst),
                        EventPayload::Received {
                            topic: Some(topic),
                            data,
                            ..
                        } => {
                            if tx.try_send(Command::new(topic, data)).is_err() {
                                warn!("Inbox full, message on '{}' dropped", topic);
                            }
                        }
                        EventPayload::Error(e) => warn!("MQTT error: {:?}", e),
                        _ => {}
                    }
                }
                flag.store(false, Ordering::SeqCst);
                info!("MQTT connection closed");
            })
            .map_err(transport_err)?;

        self.client = Some(client);
        self.connected = connected;
        self.inbox = Some(rx);

        // Esperar el CONNACK, como mucho connect_timeout
        let start = Instant::now();
        while !self.connected.load(Ordering::SeqCst) {
            if start.elapsed() >= options.connect_timeout {
                self.disconnect();
                return Err(BrokerError::ConnectTimeout);
            }
            FreeRtos::delay_ms(50);
        }

        Ok(())
    }

    fn disconnect(&mut self) {
        // Drop del cliente = esp_mqtt_client_destroy, el thread de poll termina solo
        self.client = None;
        self.inbox = None;
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.client.is_some() && self.connected.load(Ordering::SeqCst)
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        let client = self.client.as_mut().ok_or(BrokerError::NotConnected)?;
        client
            .subscribe(topic, QoS::AtMostOnce)
            .map(|_| ())
            .map_err(transport_err)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerError> {
        let client = self.client.as_mut().ok_or(BrokerError::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload)
            .map(|_| ())
            .map_err(transport_err)
    }

    fn poll(&mut self) -> Option<Command> {
        self.inbox.as_ref()?.try_recv().ok()
    }
}
